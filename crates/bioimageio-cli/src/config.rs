#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use bioimageio_spec::{WarningLevel, WeightsFormat};
use serde::{Deserialize, Serialize};

/// Name of the project configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "bioimageio.toml";

/// Fully resolved CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CliConfig {
    pub validation: ValidationConfig,
    pub package: PackageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationConfig {
    pub perform_io_checks: bool,
    pub warning_level: WarningLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageConfig {
    pub file_name: String,
    pub compression_level: i64,
    pub weights_priority_order: Option<Vec<WeightsFormat>>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig {
                perform_io_checks: true,
                warning_level: WarningLevel::default(),
            },
            package: PackageConfig {
                file_name: bioimageio_spec::BIOIMAGEIO_YAML.to_string(),
                compression_level: bioimageio_spec::package::DEFAULT_COMPRESSION_LEVEL,
                weights_priority_order: None,
            },
        }
    }
}

/// One configuration layer as written in `bioimageio.toml`; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub package: PackageSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    pub perform_io_checks: Option<bool>,
    pub warning_level: Option<WarningLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub file_name: Option<String>,
    pub compression_level: Option<i64>,
    pub weights_priority_order: Option<Vec<WeightsFormat>>,
}

impl ConfigFile {
    pub fn is_empty(&self) -> bool {
        self.validation.perform_io_checks.is_none()
            && self.validation.warning_level.is_none()
            && self.package.file_name.is_none()
            && self.package.compression_level.is_none()
            && self.package.weights_priority_order.is_none()
    }

    /// Apply this layer; returns the dotted keys it set.
    pub fn apply(self, config: &mut CliConfig) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if let Some(value) = self.validation.perform_io_checks {
            config.validation.perform_io_checks = value;
            keys.push("validation.perform_io_checks");
        }
        if let Some(value) = self.validation.warning_level {
            config.validation.warning_level = value;
            keys.push("validation.warning_level");
        }
        if let Some(value) = self.package.file_name {
            config.package.file_name = value;
            keys.push("package.file_name");
        }
        if let Some(value) = self.package.compression_level {
            config.package.compression_level = value;
            keys.push("package.compression_level");
        }
        if let Some(value) = self.package.weights_priority_order {
            config.package.weights_priority_order = Some(value);
            keys.push("package.weights_priority_order");
        }
        keys
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let file: ConfigFile =
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
    if let Some(level) = file.package.compression_level {
        anyhow::ensure!(
            (0..=9).contains(&level),
            "{}: package.compression_level must be between 0 and 9, got {level}",
            path.display()
        );
    }
    Ok(file)
}
