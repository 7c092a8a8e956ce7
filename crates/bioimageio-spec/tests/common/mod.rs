#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use bioimageio_spec::Resolver;
use bioimageio_spec::reachability::{HeadResponse, HttpTransport, TransportError};
use indoc::indoc;

/// Transport for tests that never touch the network.
pub struct NoNetwork;

impl HttpTransport for NoNetwork {
    fn head(&self, url: &str) -> Result<HeadResponse, TransportError> {
        Err(TransportError::Other(format!("network disabled: {url}")))
    }

    fn download(&self, url: &str, _sink: &mut dyn Write) -> Result<u64, TransportError> {
        Err(TransportError::Other(format!("network disabled: {url}")))
    }
}

pub fn resolver() -> Resolver {
    Resolver::with_transport(Arc::new(NoNetwork))
}

pub const MODEL_YAML: &str = indoc! {r#"
    type: model
    format_version: 0.4.9
    name: unet 2d nuclei
    description: nucleus segmentation
    authors:
      - name: Jane Doe
    documentation: README.md
    license: MIT
    timestamp: "2022-05-01T10:00:00"
    covers:
      - covers/a/cover.png
      - covers/b/cover.png
    inputs:
      - name: raw
        axes: bcyx
        data_type: float32
        shape: [1, 1, 64, 64]
    outputs:
      - name: mask
        axes: bcyx
        data_type: float32
        shape: [1, 1, 64, 64]
    test_inputs: [test_input.npy]
    test_outputs: [test_output.npy]
    weights:
      pytorch_state_dict:
        source: weights.pt
        architecture: src/unet.py:UNet
        dependencies: conda:env/environment.yaml
        pytorch_version: "1.13"
      onnx:
        source: weights.onnx
        opset_version: 15
"#};

/// A model folder whose references all exist on disk.
pub fn write_model(dir: &Path) {
    fs::create_dir_all(dir.join("covers/a")).unwrap();
    fs::create_dir_all(dir.join("covers/b")).unwrap();
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::create_dir_all(dir.join("env")).unwrap();
    fs::write(dir.join("bioimageio.yaml"), MODEL_YAML).unwrap();
    fs::write(dir.join("README.md"), "# unet\n").unwrap();
    fs::write(dir.join("covers/a/cover.png"), b"png a").unwrap();
    fs::write(dir.join("covers/b/cover.png"), b"png b").unwrap();
    fs::write(dir.join("test_input.npy"), b"input").unwrap();
    fs::write(dir.join("test_output.npy"), b"output").unwrap();
    fs::write(dir.join("weights.pt"), b"state dict").unwrap();
    fs::write(dir.join("weights.onnx"), b"onnx graph").unwrap();
    fs::write(dir.join("src/unet.py"), "class UNet:\n    pass\n").unwrap();
    fs::write(dir.join("env/environment.yaml"), "dependencies: [pytorch]\n").unwrap();
}
