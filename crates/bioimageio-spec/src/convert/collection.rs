use serde_json::{Map, Value};

use super::{ConverterChain, ConverterStep, generic};
use crate::version::FormatVersion;

const LEGACY_GROUPS: [&str; 4] = ["application", "model", "dataset", "notebook"];

pub(super) fn chain() -> ConverterChain {
    let mut steps = vec![ConverterStep::new(
        "merge legacy groups into collection",
        FormatVersion::new(0, 2, 0),
        FormatVersion::new(0, 2, 1),
        FormatVersion::new(0, 2, 2),
        merge_legacy_groups,
    )];
    steps.extend(generic::steps());
    ConverterChain::new(FormatVersion::new(0, 2, 0), FormatVersion::new(0, 2, 3), steps)
}

fn merge_legacy_groups(mut data: Map<String, Value>) -> Map<String, Value> {
    let mut entries = match data.remove("collection") {
        Some(Value::Array(entries)) => entries,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    for group in LEGACY_GROUPS {
        match data.remove(group) {
            Some(Value::Array(items)) => entries.extend(items),
            Some(other) => {
                data.insert(group.to_string(), other);
            }
            None => {}
        }
    }
    data.insert("collection".into(), Value::Array(entries));

    if let Some(Value::Object(config)) = data.get_mut("config")
        && let Some(id) = config.remove("id")
    {
        data.insert("id".into(), id);
    }
    generic::coerce_string_authors(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_groups_are_merged_in_order() {
        let data = json!({
            "format_version": "0.2.1",
            "collection": [{"id": "c0"}],
            "application": [{"id": "a0"}],
            "model": [{"id": "m0"}, {"id": "m1"}],
            "notebook": [{"id": "n0"}],
            "config": {"id": "legacy-id", "other": 1}
        });
        let out = merge_legacy_groups(data.as_object().cloned().unwrap());
        let ids: Vec<&str> = out["collection"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["c0", "a0", "m0", "m1", "n0"]);
        assert_eq!(out["id"], "legacy-id");
        assert_eq!(out["config"], json!({"other": 1}));
        assert!(out.get("model").is_none());
    }

    #[test]
    fn chain_runs_collection_step_before_generic_ones() {
        let chain = chain();
        let raw = json!({"format_version": "0.2.0", "name": "c/d", "model": [{"id": "m"}]});
        let out = chain.convert(raw.as_object().unwrap(), &chain.latest);
        assert_eq!(out["format_version"], "0.2.3");
        assert_eq!(out["name"], "cd");
        assert_eq!(out["collection"], json!([{"id": "m"}]));
    }
}
