use std::collections::HashSet;

use serde_json::{Map, Value};

use super::DescriptionSchema;
use super::check::{FieldChecker, index_loc, join_loc};
use super::generic::{Strictness, validate_common};
use crate::context::WarningLevel;
use crate::fields::{FileField, FileRefShape};
use crate::kind::ResourceType;
use crate::version::FormatVersion;
use crate::weights::WeightsFormat;

const FILE_FIELDS: [FileField; 10] = [
    FileField::plain("documentation"),
    FileField::plain("covers[]"),
    FileField::plain("attachments.files[]"),
    FileField::plain("test_inputs[]"),
    FileField::plain("test_outputs[]"),
    FileField::plain("sample_inputs[]"),
    FileField::plain("sample_outputs[]"),
    FileField::plain("weights.*.source"),
    FileField::callable("weights.pytorch_state_dict.architecture"),
    FileField::dependency("weights.*.dependencies"),
];

/// Model description schema (0.4).
#[derive(Clone, Copy, Debug, Default)]
pub struct ModelSchema;

impl DescriptionSchema for ModelSchema {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Model
    }

    fn format_version(&self) -> FormatVersion {
        FormatVersion::new(0, 4, 9)
    }

    fn file_fields(&self) -> &[FileField] {
        &FILE_FIELDS
    }

    fn validate(&self, raw: &Map<String, Value>, checker: &mut FieldChecker<'_>) {
        validate_common(
            raw,
            checker,
            Strictness {
                authors_required: true,
                documentation_required: true,
                license_required: true,
            },
        );

        if let Some(timestamp) = checker.require_str(raw, "", "timestamp") {
            checker.check_timestamp("timestamp", timestamp);
        }

        let mut tensor_names = HashSet::new();
        for group in ["inputs", "outputs"] {
            let Some(tensors) = checker.require_seq(raw, "", group) else {
                continue;
            };
            for (loc, tensor) in checker.mappings(tensors, group) {
                if let Some(name) = checker.require_str(tensor, &loc, "name")
                    && !tensor_names.insert(name.to_string())
                {
                    checker.error(join_loc(&loc, "name"), format!("duplicate tensor name '{name}'"));
                }
                checker.require_str(tensor, &loc, "axes");
                checker.require_str(tensor, &loc, "data_type");
                if tensor.get("shape").is_none_or(Value::is_null) {
                    checker.error(join_loc(&loc, "shape"), "field required");
                }
            }
        }

        for group in ["test_inputs", "test_outputs"] {
            if let Some(files) = checker.require_seq(raw, "", group) {
                for (index, file) in files.iter().enumerate() {
                    checker.check_file_with_suffix(&index_loc(group, index), file, &[".npy"]);
                }
            }
        }
        for group in ["sample_inputs", "sample_outputs"] {
            if let Some(files) = checker.optional_seq(raw, "", group) {
                for (index, file) in files.iter().enumerate() {
                    checker.check_file(&index_loc(group, index), file);
                }
            }
        }

        validate_weights(raw, checker);
    }
}

fn validate_weights(raw: &Map<String, Value>, checker: &mut FieldChecker<'_>) {
    let weights = match raw.get("weights") {
        None | Some(Value::Null) => {
            checker.error("weights", "field required");
            return;
        }
        Some(Value::Object(weights)) if weights.is_empty() => {
            checker.error("weights", "at least one weights entry is required");
            return;
        }
        Some(Value::Object(weights)) => weights,
        Some(_) => {
            checker.error("weights", "expected a mapping");
            return;
        }
    };

    for (key, entry) in weights {
        let loc = join_loc("weights", key);
        let Ok(format) = key.parse::<WeightsFormat>() else {
            checker.error(loc, format!("unknown weights format '{key}'"));
            continue;
        };
        let Value::Object(entry) = entry else {
            checker.error(loc, "expected a mapping");
            continue;
        };

        let source = match entry.get("source") {
            Some(source) => checker.check_file(&join_loc(&loc, "source"), source),
            None => {
                checker.error(join_loc(&loc, "source"), "field required");
                None
            }
        };
        match checker.optional_str(entry, &loc, "sha256") {
            Some(sha) => {
                let sha_loc = join_loc(&loc, "sha256");
                if checker.check_sha256_shape(&sha_loc, sha)
                    && let Some(source) = &source
                {
                    checker.verify_sha256(&sha_loc, source, sha);
                }
            }
            None => checker.warn(
                WarningLevel::Warning,
                join_loc(&loc, "sha256"),
                "missing sha256; the weights file cannot be verified",
            ),
        }

        if let Some(parent) = checker.optional_str(entry, &loc, "parent") {
            let parent_loc = join_loc(&loc, "parent");
            match parent.parse::<WeightsFormat>() {
                Ok(parent) if parent == format => {
                    checker.error(parent_loc, "weights entry cannot be its own parent");
                }
                Ok(_) => {}
                Err(err) => checker.error(parent_loc, err),
            }
        }

        if format == WeightsFormat::PytorchStateDict
            && let Some(architecture) = checker.require_str(entry, &loc, "architecture")
        {
            let arch_loc = join_loc(&loc, "architecture");
            let arch_source = match FileRefShape::Callable.split(architecture) {
                Some(reference) => checker.check_file(&arch_loc, &Value::String(reference.file.to_string())),
                None if architecture.contains(':') => {
                    checker.error(arch_loc, "expected '<file>:<callable>' or '<module>.<callable>'");
                    None
                }
                None => None,
            };
            if let Some(sha) = checker.optional_str(entry, &loc, "architecture_sha256") {
                let sha_loc = join_loc(&loc, "architecture_sha256");
                if checker.check_sha256_shape(&sha_loc, sha)
                    && let Some(source) = &arch_source
                {
                    checker.verify_sha256(&sha_loc, source, sha);
                }
            }
        }

        if let Some(dependencies) = checker.optional_str(entry, &loc, "dependencies") {
            let deps_loc = join_loc(&loc, "dependencies");
            match FileRefShape::Dependency.split(dependencies) {
                Some(reference) => {
                    checker.check_file(&deps_loc, &Value::String(reference.file.to_string()));
                }
                None => checker.error(deps_loc, "expected '<manager>:<file>', e.g. 'conda:environment.yaml'"),
            }
        }

        let version_field = format.version_field();
        if entry.get(version_field).is_none_or(Value::is_null) {
            checker.warn(
                WarningLevel::Warning,
                join_loc(&loc, version_field),
                format!("missing {version_field}"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ValidationContext;
    use crate::reachability::fake::FakeTransport;
    use serde_json::json;
    use std::fs;

    fn model(weights: Value) -> Value {
        json!({
            "type": "model",
            "format_version": "0.4.9",
            "name": "unet 2d nuclei",
            "description": "nucleus segmentation",
            "authors": [{"name": "Jane"}],
            "documentation": "README.md",
            "license": "MIT",
            "timestamp": "2022-05-01T10:00:00",
            "inputs": [{"name": "raw", "axes": "bcyx", "data_type": "float32", "shape": [1, 1, 64, 64]}],
            "outputs": [{"name": "mask", "axes": "bcyx", "data_type": "float32", "shape": [1, 1, 64, 64]}],
            "test_inputs": ["in.npy"],
            "test_outputs": ["out.npy"],
            "weights": weights
        })
    }

    fn errors_for(raw: &Value, ctx: &ValidationContext) -> Vec<String> {
        let transport = FakeTransport::default();
        let mut checker = FieldChecker::new(ctx, &transport);
        ModelSchema.validate(raw.as_object().unwrap(), &mut checker);
        checker.into_parts().0.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn weights_entries_are_checked() {
        let raw = model(json!({
            "onnx": {"source": "w.onnx", "sha256": "abc", "parent": "onnx", "opset_version": 12},
            "pytorch_state_dict": {"source": "w.pt", "pytorch_version": "1.13"},
            "caffe": {"source": "w.caffe"}
        }));
        let mut errors = errors_for(&raw, &ValidationContext::offline());
        errors.sort();
        assert_eq!(
            errors,
            vec![
                "weights.caffe: unknown weights format 'caffe'",
                "weights.onnx.parent: weights entry cannot be its own parent",
                "weights.onnx.sha256: expected 64 hexadecimal characters",
                "weights.pytorch_state_dict.architecture: field required",
            ]
        );
    }

    #[test]
    fn duplicate_tensor_names_and_empty_weights_fail() {
        let mut raw = model(json!({}));
        raw["outputs"][0]["name"] = json!("raw");
        let errors = errors_for(&raw, &ValidationContext::offline());
        assert_eq!(
            errors,
            vec![
                "outputs[0].name: duplicate tensor name 'raw'",
                "weights: at least one weights entry is required",
            ]
        );
    }

    #[test]
    fn sha256_is_verified_against_local_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["README.md", "in.npy", "out.npy", "w.onnx"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let raw = model(json!({
            "onnx": {"source": "w.onnx", "sha256": "0".repeat(64), "opset_version": 12}
        }));
        let ctx = ValidationContext::default().with_root_dir(dir.path());
        let errors = errors_for(&raw, &ctx);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].starts_with("weights.onnx.sha256: SHA256 mismatch"));
    }

    #[test]
    fn architecture_and_dependency_files_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["README.md", "in.npy", "out.npy", "w.pt", "unet.py"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let ctx = ValidationContext::default().with_root_dir(dir.path());
        let weights = |architecture: &str, dependencies: &str| {
            model(json!({
                "pytorch_state_dict": {
                    "source": "w.pt",
                    "sha256": "0".repeat(64),
                    "architecture": architecture,
                    "dependencies": dependencies,
                    "pytorch_version": "1.13"
                }
            }))
        };

        let mut present = weights("unet.py:UNet", "conda:environment.yaml");
        present["weights"]["pytorch_state_dict"]
            .as_object_mut()
            .unwrap()
            .remove("sha256");
        let errors = errors_for(&present, &ctx);
        assert_eq!(
            errors,
            vec!["weights.pytorch_state_dict.dependencies: file '".to_string()
                + &dir.path().join("environment.yaml").display().to_string()
                + "' does not exist"]
        );

        let errors = errors_for(&weights("missing.py:UNet", "environment.yaml"), &ValidationContext::offline());
        assert_eq!(
            errors,
            vec![
                "weights.pytorch_state_dict.dependencies: expected '<manager>:<file>', e.g. 'conda:environment.yaml'"
                    .to_string()
            ]
        );

        let errors = errors_for(&weights("my_pkg.models.UNet", "pip:requirements.txt"), &ValidationContext::offline());
        assert!(errors.is_empty(), "{errors:?}");
    }
}
