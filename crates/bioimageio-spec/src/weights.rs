use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Weight formats a model may ship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsFormat {
    KerasHdf5,
    Onnx,
    PytorchStateDict,
    TensorflowJs,
    TensorflowSavedModelBundle,
    Torchscript,
}

impl WeightsFormat {
    pub const ALL: [WeightsFormat; 6] = [
        WeightsFormat::KerasHdf5,
        WeightsFormat::Onnx,
        WeightsFormat::PytorchStateDict,
        WeightsFormat::TensorflowJs,
        WeightsFormat::TensorflowSavedModelBundle,
        WeightsFormat::Torchscript,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WeightsFormat::KerasHdf5 => "keras_hdf5",
            WeightsFormat::Onnx => "onnx",
            WeightsFormat::PytorchStateDict => "pytorch_state_dict",
            WeightsFormat::TensorflowJs => "tensorflow_js",
            WeightsFormat::TensorflowSavedModelBundle => "tensorflow_saved_model_bundle",
            WeightsFormat::Torchscript => "torchscript",
        }
    }

    /// Field naming the framework version an entry was produced with.
    pub fn version_field(self) -> &'static str {
        match self {
            WeightsFormat::KerasHdf5 | WeightsFormat::TensorflowJs | WeightsFormat::TensorflowSavedModelBundle => {
                "tensorflow_version"
            }
            WeightsFormat::Onnx => "opset_version",
            WeightsFormat::PytorchStateDict | WeightsFormat::Torchscript => "pytorch_version",
        }
    }
}

impl fmt::Display for WeightsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeightsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WeightsFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown weights format `{s}` (expected one of {})",
                    WeightsFormat::ALL.map(WeightsFormat::as_str).join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_identifiers() {
        assert_eq!(
            "pytorch_state_dict".parse::<WeightsFormat>().unwrap(),
            WeightsFormat::PytorchStateDict
        );
        let err = "caffe".parse::<WeightsFormat>().unwrap_err();
        assert!(err.contains("torchscript"));
    }
}
