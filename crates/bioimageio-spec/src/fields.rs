//! Addressing fields inside raw descriptions.
//!
//! A field pattern is a dotted path where `*` visits every value of a
//! mapping and a trailing `[]` visits every item of a sequence:
//! `weights.*.source`, `test_inputs[]`, `attachments.files[]`.

use serde_json::{Map, Value};

/// How a file reference is embedded in a string field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileRefShape {
    /// The whole value is the reference.
    Plain,
    /// `path/to/module.py:Callable`; `module.Callable` holds no file.
    Callable,
    /// `manager:path/to/file`, e.g. `conda:environment.yaml`.
    Dependency,
}

/// A file reference found inside a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRef<'v> {
    pub prefix: &'v str,
    pub file: &'v str,
    pub suffix: &'v str,
}

impl FileRef<'_> {
    /// The field value with the file part replaced.
    pub fn with_file(&self, file: &str) -> String {
        format!("{}{file}{}", self.prefix, self.suffix)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl FileRefShape {
    /// Locate the file part of `value`; `None` when the value holds no file.
    pub fn split(self, value: &str) -> Option<FileRef<'_>> {
        match self {
            FileRefShape::Plain => Some(FileRef {
                prefix: "",
                file: value,
                suffix: "",
            }),
            FileRefShape::Callable => {
                let (file, callable) = value.rsplit_once(':')?;
                if file.is_empty() || !is_identifier(callable) {
                    return None;
                }
                Some(FileRef {
                    prefix: "",
                    file,
                    suffix: &value[file.len()..],
                })
            }
            FileRefShape::Dependency => {
                let (manager, file) = value.split_once(':')?;
                if manager.trim().is_empty() || file.is_empty() {
                    return None;
                }
                Some(FileRef {
                    prefix: &value[..=manager.len()],
                    file,
                    suffix: "",
                })
            }
        }
    }
}

/// Field pattern holding file references of one shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileField {
    pub pattern: &'static str,
    pub shape: FileRefShape,
}

impl FileField {
    pub const fn plain(pattern: &'static str) -> Self {
        Self {
            pattern,
            shape: FileRefShape::Plain,
        }
    }

    pub const fn callable(pattern: &'static str) -> Self {
        Self {
            pattern,
            shape: FileRefShape::Callable,
        }
    }

    pub const fn dependency(pattern: &'static str) -> Self {
        Self {
            pattern,
            shape: FileRefShape::Dependency,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Step<'a> {
    Key(&'a str),
    AnyKey,
    AnyItem,
}

fn parse_pattern(pattern: &str) -> Vec<Step<'_>> {
    let mut steps = Vec::new();
    for part in pattern.split('.').filter(|part| !part.is_empty()) {
        let mut rest = part;
        let mut items = 0;
        while let Some(stripped) = rest.strip_suffix("[]") {
            rest = stripped;
            items += 1;
        }
        match rest {
            "" => {}
            "*" => steps.push(Step::AnyKey),
            key => steps.push(Step::Key(key)),
        }
        steps.extend(std::iter::repeat_n(Step::AnyItem, items));
    }
    steps
}

fn join_key(loc: &str, key: &str) -> String {
    if loc.is_empty() {
        key.to_string()
    } else {
        format!("{loc}.{key}")
    }
}

/// Visit every value matching `pattern`, with its location.
pub fn visit<'v>(root: &'v Value, pattern: &str, visitor: &mut dyn FnMut(&str, &'v Value)) {
    walk(root, &parse_pattern(pattern), String::new(), visitor);
}

fn walk<'v>(value: &'v Value, steps: &[Step<'_>], loc: String, visitor: &mut dyn FnMut(&str, &'v Value)) {
    let Some((step, rest)) = steps.split_first() else {
        visitor(&loc, value);
        return;
    };
    match (step, value) {
        (Step::Key(key), Value::Object(map)) => {
            if let Some(child) = map.get(*key) {
                walk(child, rest, join_key(&loc, key), visitor);
            }
        }
        (Step::AnyKey, Value::Object(map)) => {
            for (key, child) in map {
                walk(child, rest, join_key(&loc, key), visitor);
            }
        }
        (Step::AnyItem, Value::Array(items)) => {
            for (index, child) in items.iter().enumerate() {
                walk(child, rest, format!("{loc}[{index}]"), visitor);
            }
        }
        _ => {}
    }
}

/// Mutable counterpart of [`visit`]; the first error stops the walk.
pub fn visit_mut<E>(
    root: &mut Value,
    pattern: &str,
    visitor: &mut dyn FnMut(&str, &mut Value) -> Result<(), E>,
) -> Result<(), E> {
    walk_mut(root, &parse_pattern(pattern), String::new(), visitor)
}

fn walk_mut<E>(
    value: &mut Value,
    steps: &[Step<'_>],
    loc: String,
    visitor: &mut dyn FnMut(&str, &mut Value) -> Result<(), E>,
) -> Result<(), E> {
    let Some((step, rest)) = steps.split_first() else {
        return visitor(&loc, value);
    };
    match (step, value) {
        (Step::Key(key), Value::Object(map)) => {
            if let Some(child) = map.get_mut(*key) {
                walk_mut(child, rest, join_key(&loc, key), visitor)?;
            }
        }
        (Step::AnyKey, Value::Object(map)) => {
            for (key, child) in map.iter_mut() {
                walk_mut(child, rest, join_key(&loc, key), visitor)?;
            }
        }
        (Step::AnyItem, Value::Array(items)) => {
            for (index, child) in items.iter_mut().enumerate() {
                walk_mut(child, rest, format!("{loc}[{index}]"), visitor)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Shallow-merge `update` over `base`; `update` wins on shared keys.
pub fn merge_over(base: &Map<String, Value>, update: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in update {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
