use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::context::{ValidationContext, WarningLevel};
use crate::reachability::{HttpTransport, Reachability, check_url};
use crate::source::{FileSource, sha256_file};
use crate::summary::{FieldError, ValidationWarning};

static DOI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10[.][0-9]{4,9}/[-._;()/:A-Za-z0-9]+$").expect("static DOI pattern")
});

static SHA256: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("static sha256 pattern"));

/// Collects field errors and warnings while a schema walks a raw description.
pub struct FieldChecker<'a> {
    ctx: &'a ValidationContext,
    transport: &'a dyn HttpTransport,
    errors: Vec<FieldError>,
    warnings: Vec<ValidationWarning>,
    checked_urls: HashSet<String>,
}

pub fn join_loc(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

pub fn index_loc(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

impl<'a> FieldChecker<'a> {
    pub fn new(ctx: &'a ValidationContext, transport: &'a dyn HttpTransport) -> Self {
        Self {
            ctx,
            transport,
            errors: Vec::new(),
            warnings: Vec::new(),
            checked_urls: HashSet::new(),
        }
    }

    pub fn context(&self) -> &ValidationContext {
        self.ctx
    }

    pub fn error(&mut self, loc: impl Into<String>, msg: impl Into<String>) {
        self.errors.push(FieldError::new(loc, msg));
    }

    pub fn warn(&mut self, severity: WarningLevel, loc: impl Into<String>, msg: impl Into<String>) {
        if self.ctx.records(severity) {
            self.warnings.push(ValidationWarning::new(severity, loc, msg));
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_parts(self) -> (Vec<FieldError>, Vec<ValidationWarning>) {
        (self.errors, self.warnings)
    }

    /// Required non-empty string.
    pub fn require_str<'v>(&mut self, map: &'v Map<String, Value>, parent: &str, key: &str) -> Option<&'v str> {
        let loc = join_loc(parent, key);
        match map.get(key) {
            None | Some(Value::Null) => {
                self.error(loc, "field required");
                None
            }
            Some(Value::String(value)) if value.trim().is_empty() => {
                self.error(loc, "must not be empty");
                None
            }
            Some(Value::String(value)) => Some(value),
            Some(_) => {
                self.error(loc, "expected a string");
                None
            }
        }
    }

    pub fn optional_str<'v>(&mut self, map: &'v Map<String, Value>, parent: &str, key: &str) -> Option<&'v str> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value),
            Some(_) => {
                self.error(join_loc(parent, key), "expected a string");
                None
            }
        }
    }

    pub fn optional_seq<'v>(
        &mut self,
        map: &'v Map<String, Value>,
        parent: &str,
        key: &str,
    ) -> Option<&'v Vec<Value>> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                self.error(join_loc(parent, key), "expected a sequence");
                None
            }
        }
    }

    /// Required sequence with at least one item.
    pub fn require_seq<'v>(
        &mut self,
        map: &'v Map<String, Value>,
        parent: &str,
        key: &str,
    ) -> Option<&'v Vec<Value>> {
        if map.get(key).is_none_or(Value::is_null) {
            self.error(join_loc(parent, key), "field required");
            return None;
        }
        let items = self.optional_seq(map, parent, key)?;
        if items.is_empty() {
            self.error(join_loc(parent, key), "must contain at least one entry");
            return None;
        }
        Some(items)
    }

    pub fn optional_map<'v>(
        &mut self,
        map: &'v Map<String, Value>,
        parent: &str,
        key: &str,
    ) -> Option<&'v Map<String, Value>> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Object(inner)) => Some(inner),
            Some(_) => {
                self.error(join_loc(parent, key), "expected a mapping");
                None
            }
        }
    }

    /// Items of a sequence that are mappings; others are reported.
    pub fn mappings<'v>(&mut self, items: &'v [Value], loc: &str) -> Vec<(String, &'v Map<String, Value>)> {
        let mut out = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let item_loc = index_loc(loc, index);
            match item {
                Value::Object(map) => out.push((item_loc, map)),
                _ => self.error(item_loc, "expected a mapping"),
            }
        }
        out
    }

    pub fn strings(&mut self, items: &[Value], loc: &str) {
        for (index, item) in items.iter().enumerate() {
            if !item.is_string() {
                self.error(index_loc(loc, index), "expected a string");
            }
        }
    }

    pub fn check_doi(&mut self, loc: &str, doi: &str) {
        if !DOI.is_match(doi) {
            self.error(loc, format!("'{doi}' is not a valid DOI"));
        }
    }

    pub fn check_sha256_shape(&mut self, loc: &str, value: &str) -> bool {
        let ok = SHA256.is_match(value);
        if !ok {
            self.error(loc, "expected 64 hexadecimal characters");
        }
        ok
    }

    pub fn check_timestamp(&mut self, loc: &str, value: &str) {
        let naive = format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
        );
        let parsed = OffsetDateTime::parse(value, &Rfc3339).is_ok()
            || PrimitiveDateTime::parse(value, naive).is_ok();
        if !parsed {
            self.error(loc, format!("'{value}' is not an ISO 8601 timestamp"));
        }
    }

    /// Reachability of an HTTP(S) URL, only under io checks.
    pub fn check_url(&mut self, loc: &str, url: &str) {
        if !self.ctx.perform_io_checks || !self.checked_urls.insert(url.to_string()) {
            return;
        }
        match check_url(self.transport, url) {
            Reachability::Ok => {}
            Reachability::Warning(msg) => self.warn(WarningLevel::Warning, loc, msg),
            Reachability::Fails(msg) => self.error(loc, msg),
        }
    }

    /// A string field that must be a URL.
    pub fn check_url_field(&mut self, loc: &str, value: &Value) {
        match value.as_str() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                self.check_url(loc, url)
            }
            Some(other) => self.error(loc, format!("'{other}' is not an http(s) URL")),
            None => self.error(loc, "expected a URL string"),
        }
    }

    /// A file reference resolved against the context root.
    ///
    /// Local files must exist and remote ones must be reachable, both only
    /// under io checks.
    pub fn check_file(&mut self, loc: &str, value: &Value) -> Option<FileSource> {
        let Some(reference) = value.as_str() else {
            self.error(loc, "expected a file path or URL");
            return None;
        };
        let source = match FileSource::parse(reference, &self.ctx.root) {
            Ok(source) => source,
            Err(err) => {
                self.error(loc, err.to_string());
                return None;
            }
        };
        if self.ctx.perform_io_checks {
            match &source {
                FileSource::Local(path) if !path.is_file() => {
                    self.error(loc, format!("file '{}' does not exist", path.display()));
                }
                FileSource::Remote(url) => self.check_url(loc, url.as_str()),
                _ => {}
            }
        }
        Some(source)
    }

    /// File reference that must carry one of `suffixes` (lowercase, with dot).
    pub fn check_file_with_suffix(&mut self, loc: &str, value: &Value, suffixes: &[&str]) -> Option<FileSource> {
        if let Some(reference) = value.as_str() {
            let lower = reference.to_ascii_lowercase();
            if !suffixes.iter().any(|suffix| lower.ends_with(suffix)) {
                self.error(loc, format!("expected a file ending with one of {}", suffixes.join(", ")));
                return None;
            }
        }
        self.check_file(loc, value)
    }

    /// Compare a local file's SHA-256 against the declared one, under io checks.
    pub fn verify_sha256(&mut self, loc: &str, source: &FileSource, expected: &str) {
        let FileSource::Local(path) = source else {
            return;
        };
        if !self.ctx.perform_io_checks || !path.is_file() {
            return;
        }
        match sha256_file(path) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {
                debug!(path = %path.display(), "sha256 verified");
            }
            Ok(actual) => self.error(
                loc,
                format!("SHA256 mismatch: expected {expected}, got {actual}"),
            ),
            Err(err) => self.error(loc, format!("failed to hash file: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::fake::FakeTransport;
    use serde_json::json;
    use std::fs;

    #[test]
    fn warnings_below_threshold_are_dropped() {
        let ctx = ValidationContext::offline();
        let transport = FakeTransport::default();
        let mut checker = FieldChecker::new(&ctx, &transport);
        checker.warn(WarningLevel::Info, "name", "short");
        checker.warn(WarningLevel::Warning, "license", "deprecated");
        let (errors, warnings) = checker.into_parts();
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].loc, "license");
    }

    #[test]
    fn doi_and_timestamps() {
        let ctx = ValidationContext::offline();
        let transport = FakeTransport::default();
        let mut checker = FieldChecker::new(&ctx, &transport);
        checker.check_doi("cite[0].doi", "10.5281/zenodo.5764892");
        checker.check_timestamp("timestamp", "2019-12-11T12:22:32Z");
        checker.check_timestamp("timestamp", "2019-12-11T12:22:32.123456");
        assert!(!checker.has_errors());
        checker.check_doi("cite[1].doi", "https://doi.org/10.5281/zenodo.5764892");
        checker.check_timestamp("timestamp", "yesterday");
        let (errors, _) = checker.into_parts();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn io_checks_gate_file_existence_and_urls() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("present.md"), "# hi").unwrap();
        let transport = FakeTransport::default().with_status("https://host.org/gone", 404, "Not Found");

        let offline = ValidationContext::offline().with_root_dir(dir.path());
        let mut checker = FieldChecker::new(&offline, &transport);
        checker.check_file("documentation", &json!("missing.md"));
        checker.check_url("git_repo", "https://host.org/gone");
        assert!(!checker.has_errors());

        let online = offline.clone().with_io_checks(true);
        let mut checker = FieldChecker::new(&online, &transport);
        checker.check_file("documentation", &json!("present.md"));
        assert!(!checker.has_errors());
        checker.check_file("covers[0]", &json!("missing.png"));
        checker.check_url("git_repo", "https://host.org/gone");
        let (errors, _) = checker.into_parts();
        let locs: Vec<&str> = errors.iter().map(|e| e.loc.as_str()).collect();
        assert_eq!(locs, vec!["covers[0]", "git_repo"]);
    }
}
