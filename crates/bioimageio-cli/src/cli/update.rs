#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use bioimageio_spec::{FormatTarget, RdfSource, Resolver};
use clap::Parser;
use serde_json::Value;

use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct UpdateFormatArgs {
    /// Description file, folder, zipped package or URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Where to write the converted YAML
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// `latest` or an exact X.Y.Z format version
    #[arg(long, default_value = "latest")]
    pub target: FormatTarget,
}

pub fn handle(args: UpdateFormatArgs, json: bool, resolver: &Resolver, runtime: &RuntimeContext) -> Result<()> {
    let source = RdfSource::from_arg(&args.source);
    let converted = resolver
        .update_format(&source, &args.output, &args.target, &runtime.validation_context())
        .with_context(|| format!("failed to update {}", args.source))?;
    let format_version = converted
        .get("format_version")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "source": args.source,
                "output": args.output,
                "format_version": format_version,
            }))?
        );
    } else {
        println!(
            "updated {} to format_version {format_version}: {}",
            args.source,
            args.output.display()
        );
    }
    Ok(())
}
