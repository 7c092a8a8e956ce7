use serde_json::{Map, Value};

use super::{ConverterChain, ConverterStep, generic};
use crate::version::FormatVersion;

pub(super) fn chain() -> ConverterChain {
    ConverterChain::new(
        FormatVersion::new(0, 3, 0),
        FormatVersion::new(0, 4, 9),
        vec![
            ConverterStep::new(
                "model 0.3 to 0.4",
                FormatVersion::new(0, 3, 0),
                FormatVersion::new(0, 3, 6),
                FormatVersion::new(0, 4, 0),
                from_v0_3,
            ),
            ConverterStep::new(
                "normalize model 0.4",
                FormatVersion::new(0, 4, 0),
                FormatVersion::new(0, 4, 9),
                FormatVersion::new(0, 4, 9),
                normalize,
            ),
        ],
    )
}

fn from_v0_3(data: Map<String, Value>) -> Map<String, Value> {
    let mut data = generic::coerce_string_authors(data);

    if let Some(Value::Object(weights)) = data.get_mut("weights")
        && let Some(entry) = weights.remove("pytorch_script")
    {
        weights.entry("torchscript").or_insert(entry);
    }

    let moved: Vec<(&str, Value)> = [("source", "architecture"), ("sha256", "architecture_sha256"), ("kwargs", "kwargs")]
        .into_iter()
        .filter_map(|(from, to)| data.remove(from).map(|value| (to, value)))
        .collect();
    match data
        .get_mut("weights")
        .and_then(|weights| weights.get_mut("pytorch_state_dict"))
        .and_then(Value::as_object_mut)
    {
        Some(state_dict) => {
            for (key, value) in moved {
                state_dict.entry(key).or_insert(value);
            }
        }
        None => {
            for (key, value) in moved {
                let original = match key {
                    "architecture" => "source",
                    "architecture_sha256" => "sha256",
                    other => other,
                };
                data.insert(original.to_string(), value);
            }
        }
    }

    data.remove("language");
    data.remove("framework");
    strip_empty_config(data)
}

fn normalize(data: Map<String, Value>) -> Map<String, Value> {
    let data = generic::coerce_string_authors(data);
    let data = generic::strip_slashes_from_names(data);
    strip_empty_config(generic::strip_doi_prefixes(data))
}

fn strip_empty_config(mut data: Map<String, Value>) -> Map<String, Value> {
    let mut drop_config = false;
    if let Some(Value::Object(config)) = data.get_mut("config") {
        if matches!(config.get("future"), Some(Value::Object(future)) if future.is_empty()) {
            config.remove("future");
        }
        drop_config = config.is_empty();
    }
    if drop_config {
        data.remove("config");
    }
    data
}
