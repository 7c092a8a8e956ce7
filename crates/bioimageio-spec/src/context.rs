use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

pub const BIOIMAGEIO_YAML: &str = "bioimageio.yaml";

/// Severity of a validation warning; also the threshold below which warnings are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    #[default]
    Warning,
    Error,
}

impl WarningLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningLevel::Info => "info",
            WarningLevel::Warning => "warning",
            WarningLevel::Error => "error",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarningLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown warning level `{other}`")),
        }
    }
}

/// Location relative references are resolved against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootLocation {
    Dir(PathBuf),
    Url(Url),
}

impl RootLocation {
    pub fn current_dir() -> Self {
        Self::Dir(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Root of a URL: everything up to and including the last `/`.
    pub fn parent_of_url(url: &Url) -> Self {
        let mut root = url.clone();
        root.set_query(None);
        root.set_fragment(None);
        if let Ok(mut segments) = root.path_segments_mut() {
            segments.pop().push("");
        }
        Self::Url(root)
    }
}

impl fmt::Display for RootLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootLocation::Dir(path) => write!(f, "{}", path.display()),
            RootLocation::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Settings every validation and packaging step reads.
///
/// Passed explicitly by reference. Nested operations derive a new value with
/// [`ValidationContext::replace`]; the caller's context is never mutated, so
/// leaving a nested scope (normally or through an error) restores it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    pub root: RootLocation,
    pub file_name: String,
    pub perform_io_checks: bool,
    pub warning_level: WarningLevel,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            root: RootLocation::current_dir(),
            file_name: BIOIMAGEIO_YAML.to_string(),
            perform_io_checks: true,
            warning_level: WarningLevel::Warning,
        }
    }
}

/// Partial settings layered over an existing context.
#[derive(Clone, Debug, Default)]
pub struct ContextOverrides {
    pub root: Option<RootLocation>,
    pub file_name: Option<String>,
    pub perform_io_checks: Option<bool>,
    pub warning_level: Option<WarningLevel>,
}

impl ValidationContext {
    pub fn offline() -> Self {
        Self {
            perform_io_checks: false,
            ..Self::default()
        }
    }

    pub fn with_root_dir(mut self, root: impl AsRef<Path>) -> Self {
        self.root = RootLocation::Dir(root.as_ref().to_path_buf());
        self
    }

    pub fn with_io_checks(mut self, perform_io_checks: bool) -> Self {
        self.perform_io_checks = perform_io_checks;
        self
    }

    pub fn with_warning_level(mut self, warning_level: WarningLevel) -> Self {
        self.warning_level = warning_level;
        self
    }

    /// Derive the context for a nested scope.
    pub fn replace(&self, overrides: ContextOverrides) -> Self {
        Self {
            root: overrides.root.unwrap_or_else(|| self.root.clone()),
            file_name: overrides
                .file_name
                .unwrap_or_else(|| self.file_name.clone()),
            perform_io_checks: overrides
                .perform_io_checks
                .unwrap_or(self.perform_io_checks),
            warning_level: overrides.warning_level.unwrap_or(self.warning_level),
        }
    }

    /// Run `f` under a derived context.
    pub fn scoped<T>(&self, overrides: ContextOverrides, f: impl FnOnce(&ValidationContext) -> T) -> T {
        let inner = self.replace(overrides);
        f(&inner)
    }

    pub fn records(&self, severity: WarningLevel) -> bool {
        severity >= self.warning_level
    }
}
