use serde_json::{Map, Value};

use super::{ConverterChain, ConverterStep};
use crate::version::FormatVersion;

pub(crate) const DOI_PREFIXES: [&str; 2] = ["https://doi.org/", "http://dx.doi.org/"];

const PERSON_GROUPS: [&str; 3] = ["authors", "maintainers", "packaged_by"];

pub(super) fn chain() -> ConverterChain {
    ConverterChain::new(FormatVersion::new(0, 2, 0), FormatVersion::new(0, 2, 3), steps())
}

pub(super) fn steps() -> Vec<ConverterStep> {
    vec![
        ConverterStep::new(
            "coerce string authors",
            FormatVersion::new(0, 2, 0),
            FormatVersion::new(0, 2, 1),
            FormatVersion::new(0, 2, 2),
            coerce_string_authors,
        ),
        ConverterStep::new(
            "remove slashes from names",
            FormatVersion::new(0, 2, 2),
            FormatVersion::new(0, 2, 2),
            FormatVersion::new(0, 2, 3),
            strip_slashes_from_names,
        ),
        ConverterStep::new(
            "normalize 0.2",
            FormatVersion::new(0, 2, 0),
            FormatVersion::new(0, 2, 3),
            FormatVersion::new(0, 2, 3),
            normalize,
        ),
    ]
}

fn normalize(data: Map<String, Value>) -> Map<String, Value> {
    strip_doi_prefixes(coerce_string_authors(data))
}

/// `authors: ["Jane"]` becomes `authors: [{name: "Jane"}]`.
pub fn coerce_string_authors(mut data: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Array(authors)) = data.get_mut("authors") {
        for author in authors.iter_mut() {
            if let Value::String(name) = author {
                let mut person = Map::new();
                person.insert("name".into(), Value::String(std::mem::take(name)));
                *author = Value::Object(person);
            }
        }
    }
    data
}

fn without_slashes(value: &str) -> String {
    value.replace(['/', '\\'], "")
}

pub fn strip_slashes_from_names(mut data: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::String(name)) = data.get_mut("name") {
        *name = without_slashes(name);
    }
    for group in PERSON_GROUPS {
        if let Some(Value::Array(persons)) = data.get_mut(group) {
            for person in persons.iter_mut() {
                if let Some(Value::String(name)) = person.get_mut("name") {
                    *name = without_slashes(name);
                }
            }
        }
    }
    data
}

pub fn strip_doi_prefixes(mut data: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::Array(cite)) = data.get_mut("cite") {
        for entry in cite.iter_mut() {
            if let Some(Value::String(doi)) = entry.get_mut("doi")
                && let Some(stripped) = DOI_PREFIXES
                    .iter()
                    .find_map(|prefix| doi.strip_prefix(prefix))
            {
                *doi = stripped.to_string();
            }
        }
    }
    data
}
