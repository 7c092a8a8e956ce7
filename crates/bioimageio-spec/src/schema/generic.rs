use serde_json::{Map, Value};

use super::check::{FieldChecker, index_loc, join_loc};
use super::DescriptionSchema;
use crate::context::WarningLevel;
use crate::fields::FileField;
use crate::kind::ResourceType;
use crate::version::FormatVersion;

const IMAGE_SUFFIXES: [&str; 6] = [".gif", ".jpeg", ".jpg", ".png", ".svg", ".tif"];

const KNOWN_LICENSES: [&str; 24] = [
    "0BSD",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "Apache-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BSL-1.0",
    "CC-BY-4.0",
    "CC-BY-NC-4.0",
    "CC-BY-NC-SA-4.0",
    "CC-BY-SA-4.0",
    "CC0-1.0",
    "EPL-2.0",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.1-only",
    "LGPL-3.0-only",
    "MIT",
    "MPL-2.0",
    "Unlicense",
    "Zlib",
];

const DEPRECATED_LICENSES: [&str; 8] = [
    "AGPL-3.0",
    "BSD-2-Clause-FreeBSD",
    "GPL-2.0",
    "GPL-2.0+",
    "GPL-3.0",
    "GPL-3.0+",
    "LGPL-2.1",
    "LGPL-3.0",
];

const GENERIC_FILE_FIELDS: [FileField; 3] = [
    FileField::plain("documentation"),
    FileField::plain("covers[]"),
    FileField::plain("attachments.files[]"),
];
const SOURCE_FILE_FIELDS: [FileField; 4] = [
    FileField::plain("documentation"),
    FileField::plain("covers[]"),
    FileField::plain("attachments.files[]"),
    FileField::plain("source"),
];

/// Schema shared by dataset, application, notebook and collection (0.2).
#[derive(Clone, Debug)]
pub struct GenericSchema {
    kind: ResourceType,
}

impl GenericSchema {
    pub fn new(kind: ResourceType) -> Self {
        Self { kind }
    }
}

/// Requirements that differ between the generic family and models.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Strictness {
    pub authors_required: bool,
    pub documentation_required: bool,
    pub license_required: bool,
}

impl DescriptionSchema for GenericSchema {
    fn resource_type(&self) -> ResourceType {
        self.kind
    }

    fn format_version(&self) -> FormatVersion {
        FormatVersion::new(0, 2, 3)
    }

    fn file_fields(&self) -> &[FileField] {
        match self.kind {
            ResourceType::Application | ResourceType::Notebook => &SOURCE_FILE_FIELDS,
            _ => &GENERIC_FILE_FIELDS,
        }
    }

    fn validate(&self, raw: &Map<String, Value>, checker: &mut FieldChecker<'_>) {
        validate_common(raw, checker, Strictness::default());
        match self.kind {
            ResourceType::Notebook => match raw.get("source") {
                Some(source) => {
                    checker.check_file("source", source);
                }
                None => checker.error("source", "field required"),
            },
            ResourceType::Application => {
                if let Some(source) = raw.get("source") {
                    checker.check_file("source", source);
                }
            }
            ResourceType::Dataset => {
                if let Some(source) = raw.get("source") {
                    checker.check_url_field("source", source);
                }
            }
            ResourceType::Collection => {
                checker.optional_seq(raw, "", "collection");
            }
            ResourceType::Model => {}
        }
    }
}

/// Fields every resource description shares.
pub(crate) fn validate_common(raw: &Map<String, Value>, checker: &mut FieldChecker<'_>, strict: Strictness) {
    if let Some(name) = checker.require_str(raw, "", "name") {
        let len = name.chars().count();
        if !(5..=64).contains(&len) {
            checker.warn(
                WarningLevel::Info,
                "name",
                format!("name should be 5 to 64 characters long, got {len}"),
            );
        }
    }
    checker.require_str(raw, "", "description");

    let authors = if strict.authors_required {
        checker.require_seq(raw, "", "authors")
    } else {
        checker.optional_seq(raw, "", "authors")
    };
    for group in ["authors", "packaged_by"] {
        let items = if group == "authors" {
            authors
        } else {
            checker.optional_seq(raw, "", group)
        };
        if let Some(items) = items {
            for (loc, person) in checker.mappings(items, group) {
                checker.require_str(person, &loc, "name");
            }
        }
    }
    if let Some(maintainers) = checker.optional_seq(raw, "", "maintainers") {
        for (loc, person) in checker.mappings(maintainers, "maintainers") {
            checker.require_str(person, &loc, "github_user");
            checker.optional_str(person, &loc, "name");
        }
    }

    if let Some(cite) = checker.optional_seq(raw, "", "cite") {
        for (loc, entry) in checker.mappings(cite, "cite") {
            checker.require_str(entry, &loc, "text");
            let doi = checker.optional_str(entry, &loc, "doi");
            let url = entry.get("url");
            if let Some(doi) = doi {
                checker.check_doi(&join_loc(&loc, "doi"), doi);
            }
            if let Some(url) = url {
                checker.check_url_field(&join_loc(&loc, "url"), url);
            }
            if doi.is_none() && url.is_none() {
                checker.error(loc, "either 'doi' or 'url' is required");
            }
        }
    }

    let license = if strict.license_required {
        checker.require_str(raw, "", "license")
    } else {
        checker.optional_str(raw, "", "license")
    };
    if let Some(license) = license {
        if DEPRECATED_LICENSES.contains(&license) {
            checker.warn(
                WarningLevel::Warning,
                "license",
                format!("'{license}' is a deprecated SPDX license identifier"),
            );
        } else if !KNOWN_LICENSES.contains(&license) {
            checker.warn(
                WarningLevel::Warning,
                "license",
                format!("'{license}' is not a known SPDX license identifier"),
            );
        }
    }

    match raw.get("documentation") {
        Some(doc) => {
            checker.check_file_with_suffix("documentation", doc, &[".md"]);
        }
        None if strict.documentation_required => checker.error("documentation", "field required"),
        None => {}
    }

    if let Some(covers) = checker.optional_seq(raw, "", "covers") {
        for (index, cover) in covers.iter().enumerate() {
            checker.check_file_with_suffix(&index_loc("covers", index), cover, &IMAGE_SUFFIXES);
        }
    }

    if let Some(attachments) = checker.optional_map(raw, "", "attachments")
        && let Some(files) = checker.optional_seq(attachments, "attachments", "files")
    {
        for (index, file) in files.iter().enumerate() {
            checker.check_file(&index_loc("attachments.files", index), file);
        }
    }

    for key in ["tags", "links"] {
        if let Some(items) = checker.optional_seq(raw, "", key) {
            checker.strings(items, key);
        }
    }

    if let Some(repo) = raw.get("git_repo") {
        checker.check_url_field("git_repo", repo);
    }

    if let Some(badges) = checker.optional_seq(raw, "", "badges") {
        for (loc, badge) in checker.mappings(badges, "badges") {
            checker.require_str(badge, &loc, "label");
            checker.optional_str(badge, &loc, "icon");
            match badge.get("url") {
                Some(url) => checker.check_url_field(&join_loc(&loc, "url"), url),
                None => checker.error(join_loc(&loc, "url"), "field required"),
            }
        }
    }

    for key in ["id", "version", "icon", "rdf_source"] {
        checker.optional_str(raw, "", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ValidationContext;
    use crate::reachability::fake::FakeTransport;
    use serde_json::json;

    fn run(kind: ResourceType, raw: Value) -> (Vec<String>, Vec<String>) {
        let ctx = ValidationContext::offline();
        let transport = FakeTransport::default();
        let mut checker = FieldChecker::new(&ctx, &transport);
        GenericSchema::new(kind).validate(raw.as_object().unwrap(), &mut checker);
        let (errors, warnings) = checker.into_parts();
        (
            errors.iter().map(ToString::to_string).collect(),
            warnings.iter().map(ToString::to_string).collect(),
        )
    }

    #[test]
    fn minimal_dataset_passes() {
        let (errors, warnings) = run(
            ResourceType::Dataset,
            json!({"name": "cells dataset", "description": "segmented nuclei"}),
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn reports_structural_errors_with_locations() {
        let (errors, warnings) = run(
            ResourceType::Notebook,
            json!({
                "name": "",
                "description": "nb",
                "authors": [{"affiliation": "lab"}],
                "cite": [{"text": "paper", "doi": "not-a-doi"}, {"text": "no link"}],
                "license": "GPL-3.0",
                "documentation": "README.txt"
            }),
        );
        assert_eq!(
            errors,
            vec![
                "name: must not be empty",
                "authors[0].name: field required",
                "cite[0].doi: 'not-a-doi' is not a valid DOI",
                "cite[1]: either 'doi' or 'url' is required",
                "documentation: expected a file ending with one of .md",
                "source: field required",
            ]
        );
        assert_eq!(warnings, vec!["license: 'GPL-3.0' is a deprecated SPDX license identifier"]);
    }

    #[test]
    fn collection_must_be_a_sequence() {
        let (errors, _) = run(
            ResourceType::Collection,
            json!({"name": "my collection", "description": "d", "collection": {"a": 1}}),
        );
        assert_eq!(errors, vec!["collection: expected a sequence"]);
    }
}
