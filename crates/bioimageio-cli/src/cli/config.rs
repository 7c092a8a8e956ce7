#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use clap::Parser;
use serde_json::{Value, json};

use crate::runtime::{CONFIG_KEYS, RuntimeContext};

#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Show one dotted key (e.g. `validation.warning_level`) and the layer that set it
    #[arg(value_name = "KEY")]
    pub key: Option<String>,
}

pub fn handle(args: ConfigArgs, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let resolved = &runtime.resolved;
    let Some(key) = args.key else {
        let report = resolved.explain();
        if json {
            println!("{}", serde_json::to_string_pretty(&report.as_json())?);
        } else {
            print!("{report}");
        }
        return Ok(());
    };

    let Some((value, layer)) = resolved.lookup(&key) else {
        bail!(
            "unknown configuration key `{key}` (known keys: {})",
            CONFIG_KEYS.join(", ")
        );
    };
    if json {
        let payload = json!({ "key": key, "value": value, "layer": layer });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{key} = {} (from {layer})", render_value(&value));
    }
    Ok(())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "(all)".to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
