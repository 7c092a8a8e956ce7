use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Supported resource types.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Application,
    Collection,
    Dataset,
    /// Assumed when a description omits `type`.
    #[default]
    Model,
    Notebook,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Application,
        ResourceType::Collection,
        ResourceType::Dataset,
        ResourceType::Model,
        ResourceType::Notebook,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Application => "application",
            ResourceType::Collection => "collection",
            ResourceType::Dataset => "dataset",
            ResourceType::Model => "model",
            ResourceType::Notebook => "notebook",
        }
    }

    /// Resource types sharing the generic schema family.
    pub fn is_generic(self) -> bool {
        !matches!(self, ResourceType::Model)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SpecError::UnknownResourceType {
                resource_type: s.to_string(),
            })
    }
}
