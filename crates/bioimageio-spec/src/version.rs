use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Semantic `major.minor.patch` tag naming the schema a description was written against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormatVersion(Version);

impl FormatVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn major_minor(&self) -> (u64, u64) {
        (self.0.major, self.0.minor)
    }

    /// Parse a plain numeric triple. Pre-release and build metadata are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let version = Version::parse(value.trim()).ok()?;
        if !version.pre.is_empty() || !version.build.is_empty() {
            return None;
        }
        Some(Self(version))
    }
}

impl Ord for FormatVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for FormatVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FormatVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("`{s}` is not a valid format version (X.Y.Z)"))
    }
}

impl Serialize for FormatVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FormatVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How far a raw description should be migrated before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FormatTarget {
    /// Newest patch of the declared major.minor.
    #[default]
    Discover,
    Latest,
    Exact(FormatVersion),
}

impl FromStr for FormatTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "discover" => Ok(Self::Discover),
            "latest" => Ok(Self::Latest),
            other => other.parse().map(Self::Exact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_numerically() {
        let a = FormatVersion::parse("0.2.10").unwrap();
        let b = FormatVersion::parse("0.2.9").unwrap();
        assert!(a > b);
        assert_eq!(a.major_minor(), (0, 2));
    }

    #[test]
    fn rejects_non_numeric_shapes() {
        assert!(FormatVersion::parse("latest").is_none());
        assert!(FormatVersion::parse("0.4").is_none());
        assert!(FormatVersion::parse("0.4.0-rc1").is_none());
    }

    #[test]
    fn parses_targets() {
        assert_eq!("latest".parse::<FormatTarget>().unwrap(), FormatTarget::Latest);
        assert_eq!(
            "0.4.9".parse::<FormatTarget>().unwrap(),
            FormatTarget::Exact(FormatVersion::new(0, 4, 9))
        );
        assert!("nope".parse::<FormatTarget>().is_err());
    }
}
