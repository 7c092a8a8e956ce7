use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::context::WarningLevel;

/// A failing field, addressed by its dotted location (`weights.onnx.source`, `inputs[0].name`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub loc: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(loc: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            msg: msg.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loc.is_empty() {
            f.write_str(&self.msg)
        } else {
            write!(f, "{}: {}", self.loc, self.msg)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub loc: String,
    pub msg: String,
    pub severity: WarningLevel,
}

impl ValidationWarning {
    pub fn new(severity: WarningLevel, loc: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            msg: msg.into(),
            severity,
        }
    }

    /// Re-home a warning raised inside collection entry `index`.
    pub fn nested(mut self, index: usize) -> Self {
        self.loc = if self.loc.is_empty() {
            format!("collection[{index}]")
        } else {
            format!("collection[{index}]:{}", self.loc)
        };
        self
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.msg)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
}

/// Errors grouped by field path segments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorTree {
    Message(String),
    Messages(Vec<String>),
    Fields(BTreeMap<String, ErrorTree>),
}

const SCHEMA_KEY: &str = "_schema";

impl ErrorTree {
    fn empty() -> Self {
        ErrorTree::Fields(BTreeMap::new())
    }

    fn push_message(&mut self, msg: String) {
        match self {
            ErrorTree::Message(existing) => {
                *self = ErrorTree::Messages(vec![std::mem::take(existing), msg]);
            }
            ErrorTree::Messages(messages) => messages.push(msg),
            ErrorTree::Fields(fields) => fields
                .entry(SCHEMA_KEY.to_string())
                .or_insert_with(|| ErrorTree::Messages(Vec::new()))
                .push_message(msg),
        }
    }

    fn child(&mut self, key: String) -> &mut ErrorTree {
        if !matches!(self, ErrorTree::Fields(_)) {
            let previous = std::mem::replace(self, ErrorTree::empty());
            if let ErrorTree::Fields(fields) = self {
                fields.insert(SCHEMA_KEY.to_string(), previous);
            }
        }
        match self {
            ErrorTree::Fields(fields) => fields.entry(key).or_insert_with(ErrorTree::empty),
            _ => unreachable!("error tree node was converted to fields above"),
        }
    }

    fn insert(&mut self, segments: &[String], msg: String) {
        let mut node = self;
        for segment in segments {
            node = node.child(segment.clone());
        }
        if matches!(node, ErrorTree::Fields(fields) if fields.is_empty()) {
            *node = ErrorTree::Message(msg);
        } else {
            node.push_message(msg);
        }
    }

    fn attach(&mut self, segments: &[String], subtree: ErrorTree) {
        let mut node = self;
        for segment in segments {
            node = node.child(segment.clone());
        }
        *node = subtree;
    }

    /// Flatten into `loc: msg` lines.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_lines(String::new(), &mut out);
        out
    }

    fn collect_lines(&self, prefix: String, out: &mut Vec<String>) {
        let label = |msg: &str| {
            if prefix.is_empty() {
                msg.to_string()
            } else {
                format!("{prefix}: {msg}")
            }
        };
        match self {
            ErrorTree::Message(msg) => out.push(label(msg)),
            ErrorTree::Messages(messages) => out.extend(messages.iter().map(|msg| label(msg))),
            ErrorTree::Fields(fields) => {
                for (key, child) in fields {
                    let next = if key == SCHEMA_KEY {
                        prefix.clone()
                    } else if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    child.collect_lines(next, out);
                }
            }
        }
    }
}

/// Split `inputs[0].axes` into `["inputs", "0", "axes"]`.
pub fn loc_segments(loc: &str) -> Vec<String> {
    let mut segments = Vec::new();
    for part in loc.split('.').filter(|part| !part.is_empty()) {
        let mut rest = part;
        if let Some(open) = rest.find('[') {
            if open > 0 {
                segments.push(rest[..open].to_string());
            }
            rest = &rest[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    segments.push(stripped.to_string());
                    break;
                };
                segments.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
        } else {
            segments.push(rest.to_string());
        }
    }
    segments
}

/// Outcome of validating one resource description.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationSummary {
    pub name: String,
    pub source_name: String,
    pub status: Status,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<ValidationWarning>,
    pub nested_errors: BTreeMap<usize, ErrorTree>,
    pub traceback: Vec<String>,
}

impl ValidationSummary {
    pub fn new(name: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_name: source_name.into(),
            status: Status::Passed,
            errors: Vec::new(),
            warnings: Vec::new(),
            nested_errors: BTreeMap::new(),
            traceback: Vec::new(),
        }
    }

    /// Summary for input that failed before any field could be checked.
    pub fn failure(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut summary = Self::new("", source_name);
        summary.push_error(FieldError::new("", error));
        summary
    }

    pub fn push_error(&mut self, error: FieldError) {
        self.errors.push(error);
        self.status = Status::Failed;
    }

    pub fn push_nested_error(&mut self, index: usize, error: ErrorTree) {
        self.nested_errors.insert(index, error);
        self.status = Status::Failed;
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// Structured error tree, `None` when nothing failed.
    pub fn error_tree(&self) -> Option<ErrorTree> {
        if self.errors.is_empty() && self.nested_errors.is_empty() {
            return None;
        }
        let mut tree = ErrorTree::empty();
        for error in &self.errors {
            let segments = loc_segments(&error.loc);
            if segments.is_empty() {
                tree.push_message(error.msg.clone());
            } else {
                tree.insert(&segments, error.msg.clone());
            }
        }
        for (index, nested) in &self.nested_errors {
            tree.attach(&["collection".to_string(), index.to_string()], nested.clone());
        }
        Some(tree)
    }

    pub fn report(&self) -> ValidationReport {
        let mut warnings: BTreeMap<WarningLevel, Vec<String>> = BTreeMap::new();
        for warning in &self.warnings {
            warnings
                .entry(warning.severity)
                .or_default()
                .push(warning.to_string());
        }
        ValidationReport {
            name: self.name.clone(),
            source_name: self.source_name.clone(),
            status: self.status,
            error: self.error_tree(),
            warnings,
            traceback: if self.traceback.is_empty() {
                None
            } else {
                Some(self.traceback.clone())
            },
            nested_errors: self.nested_errors.clone(),
        }
    }
}

/// Serialisable validation output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub name: String,
    pub source_name: String,
    pub status: Status,
    pub error: Option<ErrorTree>,
    pub warnings: BTreeMap<WarningLevel, Vec<String>>,
    pub traceback: Option<Vec<String>>,
    pub nested_errors: BTreeMap<usize, ErrorTree>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "passed" } else { "failed" };
        let name = if self.name.is_empty() {
            self.source_name.as_str()
        } else {
            self.name.as_str()
        };
        writeln!(f, "validation {verdict}: {name}")?;
        writeln!(f, "  source: {}", self.source_name)?;
        if let Some(error) = &self.error {
            writeln!(f, "  errors:")?;
            for line in error.lines() {
                writeln!(f, "    - {line}")?;
            }
        }
        for (severity, warnings) in &self.warnings {
            writeln!(f, "  {severity}s:")?;
            for warning in warnings {
                writeln!(f, "    - {warning}")?;
            }
        }
        if let Some(traceback) = &self.traceback {
            writeln!(f, "  traceback:")?;
            for line in traceback {
                writeln!(f, "    {line}")?;
            }
        }
        Ok(())
    }
}
