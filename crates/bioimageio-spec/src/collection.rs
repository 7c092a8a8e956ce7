//! Validation of the entries of a collection resource.
//!
//! Every entry is merged onto the parent's own fields (without `collection`)
//! and resolved on its own: a failing entry is recorded under its index and
//! never stops its siblings.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::{ContextOverrides, ValidationContext};
use crate::error::SpecError;
use crate::fields::merge_over;
use crate::reader::{RdfSource, open_rdf};
use crate::resolve::{BuildOptions, Description, Resolver};
use crate::schema::TRANSIENT_FIELDS;
use crate::source::FileSource;
use crate::summary::{ErrorTree, ValidationSummary};

/// Key of an entry that points at an externally hosted description.
pub const ENTRY_SOURCE_KEY: &str = "rdf_source";

/// One item of a collection's `collection` sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionEntry {
    pub id: Option<String>,
    /// External description, if the entry references one.
    pub source: Option<String>,
    /// Remaining entry fields, applied over the parent's fields.
    pub rdf_update: Map<String, Value>,
}

impl CollectionEntry {
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Object(map) = value else {
            return None;
        };
        let source = map
            .get(ENTRY_SOURCE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut rdf_update = map.clone();
        if source.is_some() {
            rdf_update.remove(ENTRY_SOURCE_KEY);
        }
        Some(Self {
            id: map.get("id").and_then(Value::as_str).map(str::to_string),
            source,
            rdf_update,
        })
    }

    fn id_info(&self) -> String {
        self.id
            .as_deref()
            .map(|id| format!("(id={id}) "))
            .unwrap_or_default()
    }
}

/// Parent fields every entry starts from.
pub fn entry_base(parent: &Map<String, Value>) -> Map<String, Value> {
    let mut base = parent.clone();
    base.remove("collection");
    for key in TRANSIENT_FIELDS {
        base.remove(key);
    }
    base
}

/// Merged raw content of one entry, with the context it resolves under.
struct MergedEntry {
    content: Map<String, Value>,
    overrides: ContextOverrides,
}

fn merge_entry(
    resolver: &Resolver,
    base: &Map<String, Value>,
    entry: &CollectionEntry,
    ctx: &ValidationContext,
) -> Result<MergedEntry, String> {
    let merged = merge_over(base, &entry.rdf_update);
    let Some(reference) = &entry.source else {
        return Ok(MergedEntry {
            content: merged,
            overrides: ContextOverrides::default(),
        });
    };

    let source = match FileSource::parse(reference, &ctx.root) {
        Ok(FileSource::Local(path)) => RdfSource::Path(path),
        Ok(FileSource::Remote(url)) => RdfSource::Url(url),
        Ok(FileSource::Inline(Value::Object(map))) => RdfSource::Content(map),
        Ok(FileSource::Inline(_)) => return Err("inline entry source is not a mapping".to_string()),
        Err(err) => return Err(err.to_string()),
    };
    let opened = open_rdf(&source, resolver.transport(), &ctx.root).map_err(|err| err.to_string())?;
    let mut content = merge_over(&merged, &opened.content);
    content.insert(ENTRY_SOURCE_KEY.into(), Value::String(opened.source_name));
    Ok(MergedEntry {
        content,
        overrides: ContextOverrides {
            root: Some(opened.root),
            file_name: Some(opened.file_name),
            ..Default::default()
        },
    })
}

/// Resolve every entry of `parent["collection"]` into `summary`.
pub(crate) fn validate_entries(
    resolver: &Resolver,
    parent: &Map<String, Value>,
    ctx: &ValidationContext,
    opts: &BuildOptions,
    summary: &mut ValidationSummary,
) {
    let Some(Value::Array(entries)) = parent.get("collection") else {
        return;
    };
    let base = entry_base(parent);

    for (index, value) in entries.iter().enumerate() {
        let Some(entry) = CollectionEntry::from_value(value) else {
            summary.push_nested_error(
                index,
                ErrorTree::Message(format!("Invalid collection entry of type {}", value_kind(value))),
            );
            continue;
        };
        let id_info = entry.id_info();

        let merged = match merge_entry(resolver, &base, &entry, ctx) {
            Ok(merged) => merged,
            Err(err) => {
                let nested = SpecError::NestedCollection { index, error: err.clone() };
                warn!(error = %nested, "collection entry source could not be read");
                summary.push_nested_error(
                    index,
                    ErrorTree::Message(format!(
                        "{id_info}Failed to interpret source as rdf source; {err}"
                    )),
                );
                continue;
            }
        };

        let description = ctx.scoped(merged.overrides, |entry_ctx| {
            resolver.build(&merged.content, entry_ctx, opts)
        });
        let entry_summary = description.summary();
        debug!(index, passed = description.is_valid(), "validated collection entry");

        for warning in &entry_summary.warnings {
            let mut warning = warning.clone().nested(index);
            warning.msg = format!("{id_info}{}", warning.msg);
            summary.warnings.push(warning);
        }
        if let Description::Invalid(invalid) = &description {
            let tree = invalid
                .summary
                .error_tree()
                .unwrap_or_else(|| ErrorTree::Message("entry failed validation".into()));
            summary.push_nested_error(index, tree);
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
