#![forbid(unsafe_code)]

pub mod collection;
pub mod context;
pub mod convert;
pub mod error;
pub mod fields;
pub mod kind;
pub mod package;
pub mod reachability;
pub mod reader;
pub mod resolve;
pub mod schema;
pub mod source;
pub mod summary;
pub mod version;
pub mod weights;

pub use context::{BIOIMAGEIO_YAML, ContextOverrides, RootLocation, ValidationContext, WarningLevel};
pub use error::{Result, SpecError};
pub use kind::ResourceType;
pub use package::{PackageEntry, PackageManifest, PackageOptions, Packager};
pub use reachability::{HttpTransport, Reachability, ReqwestTransport, check_url};
pub use reader::RdfSource;
pub use resolve::{BuildOptions, Description, InvalidDescr, ResourceDescr, Resolver};
pub use summary::{ValidationReport, ValidationSummary};
pub use version::{FormatTarget, FormatVersion};
pub use weights::WeightsFormat;
