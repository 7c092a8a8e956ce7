//! Field-level schemas, looked up by resource type and major.minor version.

mod check;
mod generic;
mod model;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::fields::FileField;
use crate::kind::ResourceType;
use crate::version::FormatVersion;

pub use check::{FieldChecker, index_loc, join_loc};
pub use generic::GenericSchema;
pub use model::ModelSchema;

/// Fields that are never repackaged or re-validated.
pub const TRANSIENT_FIELDS: [&str; 1] = ["rdf_source"];

/// Validator for one `(type, major.minor)` pair.
pub trait DescriptionSchema: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Newest patch version this schema describes.
    fn format_version(&self) -> FormatVersion;

    /// Fields holding file references (see [`crate::fields`]).
    fn file_fields(&self) -> &[FileField];

    fn validate(&self, raw: &Map<String, Value>, checker: &mut FieldChecker<'_>);
}

type SchemaKey = (ResourceType, u64, u64);

#[derive(Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<SchemaKey, Arc<dyn DescriptionSchema>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in ResourceType::ALL.into_iter().filter(|kind| kind.is_generic()) {
            registry.register(Arc::new(GenericSchema::new(kind)));
        }
        registry.register(Arc::new(ModelSchema));
        registry
    }
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn register(&mut self, schema: Arc<dyn DescriptionSchema>) {
        let version = schema.format_version();
        self.schemas.insert(
            (schema.resource_type(), version.major(), version.minor()),
            schema,
        );
    }

    pub fn get(&self, kind: ResourceType, version: &FormatVersion) -> Option<&dyn DescriptionSchema> {
        self.schemas
            .get(&(kind, version.major(), version.minor()))
            .map(Arc::as_ref)
    }

    pub fn latest(&self, kind: ResourceType) -> Option<&dyn DescriptionSchema> {
        self.schemas
            .values()
            .filter(|schema| schema.resource_type() == kind)
            .max_by_key(|schema| schema.format_version())
            .map(Arc::as_ref)
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .schemas
            .values()
            .map(|schema| format!("{} {}", schema.resource_type(), schema.format_version()))
            .collect();
        keys.sort();
        f.debug_struct("SchemaRegistry").field("schemas", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_major_minor() {
        let registry = SchemaRegistry::default();
        let schema = registry
            .get(ResourceType::Model, &FormatVersion::new(0, 4, 2))
            .unwrap();
        assert_eq!(schema.format_version(), FormatVersion::new(0, 4, 9));
        assert!(registry.get(ResourceType::Model, &FormatVersion::new(0, 3, 6)).is_none());
        assert_eq!(
            registry.latest(ResourceType::Dataset).unwrap().format_version(),
            FormatVersion::new(0, 2, 3)
        );
    }
}
