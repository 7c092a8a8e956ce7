use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::weights::WeightsFormat;

pub type Result<T, E = SpecError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unknown resource type `{resource_type}`")]
    UnknownResourceType { resource_type: String },
    #[error("no schema for format_version {format_version} of resource type `{resource_type}`")]
    UnsupportedFormatVersion {
        resource_type: String,
        format_version: String,
    },
    #[error("{path}: {reason}")]
    SchemaField { path: String, reason: String },
    #[error("Invalid URL '{url}': {reason}")]
    NetworkUnreachable { url: String, reason: String },
    #[error("collection[{index}]: {error}")]
    NestedCollection { index: usize, error: String },
    #[error("output directory '{}' is not empty", path.display())]
    OutputNotEmpty { path: PathBuf },
    #[error("invalid file name template '{template}': {reason}")]
    FileNameTemplate { template: String, reason: String },
    #[error("package file name `{name}` is already taken")]
    PackagingCollision { name: String },
    #[error(
        "none of the weight formats {requested:?} is present in the model (available: {available:?})"
    )]
    WeightsFormatNotFound {
        requested: Vec<WeightsFormat>,
        available: Vec<WeightsFormat>,
    },
    #[error("exported package '{}' is invalid: {summary}", path.display())]
    RoundTripVerification { path: PathBuf, summary: String },
    #[error("{source_name} is invalid: {summary}")]
    InvalidDescription { source_name: String, summary: String },
    #[error("failed to interpret '{reference}' as a source: {reason}")]
    InvalidSource { reference: String, reason: String },
    #[error("transport error for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl SpecError {
    pub(crate) fn invalid_source(reference: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSource {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }
}
