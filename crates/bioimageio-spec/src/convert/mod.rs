//! Versioned migrations of raw descriptions.
//!
//! Each resource type owns one [`ConverterChain`]: an ordered list of pure
//! steps, each keyed by the inclusive source range it handles. The table is
//! independent from the schema registry; both are joined by version only.

mod collection;
mod generic;
mod model;

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::kind::ResourceType;
use crate::version::FormatVersion;

pub use generic::{coerce_string_authors, strip_doi_prefixes, strip_slashes_from_names};

pub type StepFn = fn(Map<String, Value>) -> Map<String, Value>;

/// One migration, applicable when the current version lies in `from..=until`.
#[derive(Clone, Debug)]
pub struct ConverterStep {
    pub name: &'static str,
    pub from: FormatVersion,
    pub until: FormatVersion,
    pub to: FormatVersion,
    apply: StepFn,
}

impl ConverterStep {
    pub const fn new(
        name: &'static str,
        from: FormatVersion,
        until: FormatVersion,
        to: FormatVersion,
        apply: StepFn,
    ) -> Self {
        Self {
            name,
            from,
            until,
            to,
            apply,
        }
    }

    fn handles(&self, current: &FormatVersion) -> bool {
        &self.from <= current && current <= &self.until
    }
}

#[derive(Clone, Debug)]
pub struct ConverterChain {
    pub oldest: FormatVersion,
    pub latest: FormatVersion,
    steps: Vec<ConverterStep>,
}

impl ConverterChain {
    pub fn new(oldest: FormatVersion, latest: FormatVersion, steps: Vec<ConverterStep>) -> Self {
        Self {
            oldest,
            latest,
            steps,
        }
    }

    pub fn steps(&self) -> &[ConverterStep] {
        &self.steps
    }

    /// Declared `format_version`, or the oldest known one when absent or malformed.
    pub fn declared_version(&self, raw: &Map<String, Value>) -> FormatVersion {
        raw.get("format_version")
            .and_then(Value::as_str)
            .and_then(FormatVersion::parse)
            .unwrap_or_else(|| self.oldest.clone())
    }

    /// Whether `version` lies beyond the newest known major.minor.
    pub fn is_future(&self, version: &FormatVersion) -> bool {
        version.major_minor() > self.latest.major_minor()
    }

    /// Migrate `raw` forward, never past `target` and never backwards.
    pub fn convert(&self, raw: &Map<String, Value>, target: &FormatVersion) -> Map<String, Value> {
        let declared = self.declared_version(raw);
        if self.is_future(&declared) {
            return raw.clone();
        }

        let mut data = raw.clone();
        let mut current = declared;
        for step in &self.steps {
            if !step.handles(&current) || &step.to > target || step.to < current {
                continue;
            }
            debug!(step = step.name, from = %current, to = %step.to, "applying converter");
            data = (step.apply)(data);
            current = step.to.clone();
            data.insert("format_version".into(), Value::String(current.to_string()));
        }
        data
    }
}

/// Converter chains keyed by resource type.
#[derive(Clone, Debug)]
pub struct ConverterTable {
    chains: HashMap<ResourceType, ConverterChain>,
}

impl Default for ConverterTable {
    fn default() -> Self {
        let mut chains = HashMap::new();
        for kind in [ResourceType::Application, ResourceType::Dataset, ResourceType::Notebook] {
            chains.insert(kind, generic::chain());
        }
        chains.insert(ResourceType::Collection, collection::chain());
        chains.insert(ResourceType::Model, model::chain());
        Self { chains }
    }
}

impl ConverterTable {
    pub fn chain(&self, kind: ResourceType) -> Option<&ConverterChain> {
        self.chains.get(&kind)
    }

    pub fn register(&mut self, kind: ResourceType, chain: ConverterChain) {
        self.chains.insert(kind, chain);
    }
}
