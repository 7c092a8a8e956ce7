#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use bioimageio_spec::{BuildOptions, Packager, RdfSource, Resolver, WeightsFormat};
use clap::Parser;
use tracing::info;

use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct PackageArgs {
    /// Description file, folder, zipped package or URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Output archive (or folder with --folder)
    #[arg(long = "out", value_name = "PATH")]
    pub output: PathBuf,

    /// Write a folder instead of a zip archive
    #[arg(long)]
    pub folder: bool,

    /// Keep only the first of these weight formats the model provides
    #[arg(long = "weights-priority-order", value_name = "FORMAT", num_args = 1.., value_delimiter = ',')]
    pub weights_priority_order: Option<Vec<WeightsFormat>>,

    /// Metadata file name; may use {name} and {type}
    #[arg(long = "file-name", value_name = "TEMPLATE")]
    pub file_name: Option<String>,

    /// Deflate level for archives
    #[arg(long = "compression-level", value_name = "N", value_parser = clap::value_parser!(i64).range(0..=9))]
    pub compression_level: Option<i64>,
}

pub fn handle(args: PackageArgs, json: bool, resolver: &Resolver, runtime: &RuntimeContext) -> Result<()> {
    let mut options = runtime.package_options();
    if let Some(order) = args.weights_priority_order {
        options.weights_priority_order = Some(order);
    }
    if let Some(file_name) = args.file_name {
        options.file_name = file_name;
    }
    if let Some(level) = args.compression_level {
        options.compression_level = Some(level);
    }

    let ctx = runtime.validation_context();
    let source = RdfSource::from_arg(&args.source);
    let descr = resolver
        .load(&source, &ctx, &BuildOptions::default())
        .with_context(|| format!("failed to read {}", args.source))?
        .into_valid()
        .with_context(|| format!("cannot package {}", args.source))?;
    info!(source = %source, output = %args.output.display(), folder = args.folder, "packaging");

    let packager = Packager::new(resolver, &ctx, options);
    let written = if args.folder {
        packager.save_as_folder(&descr, &args.output)
    } else {
        packager.save_as_archive(&descr, &args.output)
    }
    .with_context(|| format!("failed to package {}", args.source))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "source": args.source,
                "output": written,
                "resource_type": descr.resource_type,
                "format_version": descr.format_version.to_string(),
            }))?
        );
    } else {
        println!("packaged {} into {}", args.source, written.display());
    }
    Ok(())
}
