#![forbid(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bioimageio_spec::{PackageOptions, ValidationContext, WarningLevel};
use serde::Serialize;
use serde_json::json;

use crate::config::{CONFIG_FILE_NAME, CliConfig, ConfigFile, load_config_file};

pub const ENV_PERFORM_IO_CHECKS: &str = "BIOIMAGEIO_PERFORM_IO_CHECKS";
pub const ENV_WARNING_LEVEL: &str = "BIOIMAGEIO_WARNING_LEVEL";

/// Where a configuration layer came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigLayer {
    Defaults,
    File { path: PathBuf },
    Env,
    Cli,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLayer::Defaults => f.write_str("defaults"),
            ConfigLayer::File { path } => write!(f, "file {}", path.display()),
            ConfigLayer::Env => f.write_str("environment"),
            ConfigLayer::Cli => f.write_str("command line"),
        }
    }
}

/// A layer together with the keys it set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub layer: ConfigLayer,
    pub keys: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: CliConfig,
    pub provenance: Vec<Provenance>,
    pub warnings: Vec<String>,
}

/// Dotted keys the configuration understands.
pub const CONFIG_KEYS: [&str; 5] = [
    "validation.perform_io_checks",
    "validation.warning_level",
    "package.file_name",
    "package.compression_level",
    "package.weights_priority_order",
];

static DEFAULTS_LAYER: ConfigLayer = ConfigLayer::Defaults;

impl ResolvedConfig {
    pub fn explain(&self) -> ConfigExplain<'_> {
        ConfigExplain { resolved: self }
    }

    /// Value of a dotted key and the last layer that set it.
    pub fn lookup(&self, key: &str) -> Option<(serde_json::Value, &ConfigLayer)> {
        if !CONFIG_KEYS.contains(&key) {
            return None;
        }
        let (section, field) = key.split_once('.')?;
        let config = serde_json::to_value(&self.config).ok()?;
        let value = config.get(section)?.get(field)?.clone();
        let layer = self
            .provenance
            .iter()
            .rev()
            .find(|entry| entry.keys.contains(&key))
            .map_or(&DEFAULTS_LAYER, |entry| &entry.layer);
        Some((value, layer))
    }
}

/// Human and JSON rendering of a resolved configuration.
pub struct ConfigExplain<'a> {
    resolved: &'a ResolvedConfig,
}

impl ConfigExplain<'_> {
    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "config": self.resolved.config,
            "provenance": self.resolved.provenance,
            "warnings": self.resolved.warnings,
        })
    }
}

impl fmt::Display for ConfigExplain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.resolved.config;
        writeln!(f, "validation.perform_io_checks = {}", config.validation.perform_io_checks)?;
        writeln!(f, "validation.warning_level = {}", config.validation.warning_level)?;
        writeln!(f, "package.file_name = {}", config.package.file_name)?;
        writeln!(f, "package.compression_level = {}", config.package.compression_level)?;
        match &config.package.weights_priority_order {
            Some(order) => {
                let names: Vec<&str> = order.iter().map(|format| format.as_str()).collect();
                writeln!(f, "package.weights_priority_order = {}", names.join(", "))?;
            }
            None => writeln!(f, "package.weights_priority_order = (all)")?,
        }
        writeln!(f, "layers:")?;
        for entry in &self.resolved.provenance {
            if entry.keys.is_empty() {
                writeln!(f, "  {}", entry.layer)?;
            } else {
                writeln!(f, "  {}: {}", entry.layer, entry.keys.join(", "))?;
            }
        }
        for warning in &self.resolved.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

pub struct RuntimeState {
    pub resolved: ResolvedConfig,
}

pub type RuntimeContext = Arc<RuntimeState>;

impl RuntimeState {
    /// Validation context rooted at the working directory.
    pub fn validation_context(&self) -> ValidationContext {
        let validation = &self.resolved.config.validation;
        ValidationContext::default()
            .with_io_checks(validation.perform_io_checks)
            .with_warning_level(validation.warning_level)
    }

    pub fn package_options(&self) -> PackageOptions {
        let package = &self.resolved.config.package;
        PackageOptions {
            file_name: package.file_name.clone(),
            weights_priority_order: package.weights_priority_order.clone(),
            compression_level: Some(package.compression_level),
            ..PackageOptions::default()
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.resolved.warnings
    }
}

pub fn resolve_runtime(
    project_root: Option<&Path>,
    cli_offline: bool,
    cli_config: Option<&Path>,
) -> Result<RuntimeContext> {
    let resolved = resolve_config(project_root, cli_offline, cli_config, |key| {
        std::env::var(key).ok()
    })?;
    Ok(Arc::new(RuntimeState { resolved }))
}

/// Layer defaults, config file, environment and CLI flags, in that order.
pub fn resolve_config(
    project_root: Option<&Path>,
    cli_offline: bool,
    cli_config: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let mut config = CliConfig::default();
    let mut provenance = vec![Provenance {
        layer: ConfigLayer::Defaults,
        keys: Vec::new(),
    }];
    let mut warnings = Vec::new();

    let file_path = match cli_config {
        Some(path) => Some(path.to_path_buf()),
        None => project_root
            .map(|root| root.join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file()),
    };
    if let Some(path) = file_path {
        let file = load_config_file(&path)?;
        if file.is_empty() {
            warnings.push(format!("{} sets no keys", path.display()));
        }
        let keys = file.apply(&mut config);
        provenance.push(Provenance {
            layer: ConfigLayer::File { path },
            keys,
        });
    }

    let mut env_keys = Vec::new();
    if let Some(raw) = env(ENV_PERFORM_IO_CHECKS) {
        config.validation.perform_io_checks =
            parse_bool(&raw).with_context(|| format!("invalid {ENV_PERFORM_IO_CHECKS}"))?;
        env_keys.push("validation.perform_io_checks");
    }
    if let Some(raw) = env(ENV_WARNING_LEVEL) {
        config.validation.warning_level = raw
            .parse::<WarningLevel>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid {ENV_WARNING_LEVEL}"))?;
        env_keys.push("validation.warning_level");
    }
    if !env_keys.is_empty() {
        provenance.push(Provenance {
            layer: ConfigLayer::Env,
            keys: env_keys,
        });
    }

    if cli_offline {
        config.validation.perform_io_checks = false;
        warnings.push("io checks disabled by CLI --offline flag".to_string());
        provenance.push(Provenance {
            layer: ConfigLayer::Cli,
            keys: vec!["validation.perform_io_checks"],
        });
    }

    Ok(ResolvedConfig {
        config,
        provenance,
        warnings,
    })
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_only() {
        let resolved = resolve_config(None, false, None, no_env).unwrap();
        assert_eq!(resolved.config, CliConfig::default());
        assert_eq!(resolved.provenance.len(), 1);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn env_overrides_file_and_offline_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[validation]\nperform_io_checks = false\nwarning_level = \"error\"\n",
        )
        .unwrap();
        let env = |key: &str| match key {
            ENV_PERFORM_IO_CHECKS => Some("yes".to_string()),
            _ => None,
        };

        let resolved = resolve_config(Some(dir.path()), false, None, env).unwrap();
        assert!(resolved.config.validation.perform_io_checks);
        assert_eq!(resolved.config.validation.warning_level, WarningLevel::Error);
        let layers: Vec<&ConfigLayer> = resolved.provenance.iter().map(|p| &p.layer).collect();
        assert!(matches!(layers.as_slice(), [ConfigLayer::Defaults, ConfigLayer::File { .. }, ConfigLayer::Env]));

        let offline = resolve_config(Some(dir.path()), true, None, env).unwrap();
        assert!(!offline.config.validation.perform_io_checks);
        assert_eq!(offline.warnings, vec!["io checks disabled by CLI --offline flag"]);
    }

    #[test]
    fn explicit_config_must_exist() {
        let err = resolve_config(None, false, Some(Path::new("/no/such/bioimageio.toml")), no_env).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config"), "{err:#}");
    }

    #[test]
    fn bad_env_values_are_reported() {
        let env = |key: &str| (key == ENV_WARNING_LEVEL).then(|| "loud".to_string());
        let err = resolve_config(None, false, None, env).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_WARNING_LEVEL), "{err:#}");
    }

    #[test]
    fn explain_lists_layers() {
        let resolved = resolve_config(None, true, None, no_env).unwrap();
        let text = resolved.explain().to_string();
        assert!(text.contains("validation.perform_io_checks = false"), "{text}");
        assert!(text.contains("command line: validation.perform_io_checks"), "{text}");
        let json = resolved.explain().as_json();
        assert_eq!(json["config"]["validation"]["perform_io_checks"], false);
        assert_eq!(json["provenance"][1]["layer"]["kind"], "cli");
    }

    #[test]
    fn lookup_reports_the_last_layer_that_set_a_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[validation]\nperform_io_checks = true\n[package]\ncompression_level = 3\n",
        )
        .unwrap();
        let resolved = resolve_config(Some(dir.path()), true, None, no_env).unwrap();

        let (value, layer) = resolved.lookup("package.compression_level").unwrap();
        assert_eq!(value, 3);
        assert!(matches!(layer, ConfigLayer::File { .. }));

        let (value, layer) = resolved.lookup("validation.perform_io_checks").unwrap();
        assert_eq!(value, false);
        assert_eq!(layer, &ConfigLayer::Cli);

        let (value, layer) = resolved.lookup("package.file_name").unwrap();
        assert_eq!(value, CliConfig::default().package.file_name);
        assert_eq!(layer, &ConfigLayer::Defaults);

        assert!(resolved.lookup("package.nope").is_none());
        assert!(resolved.lookup("validation").is_none());
    }
}
