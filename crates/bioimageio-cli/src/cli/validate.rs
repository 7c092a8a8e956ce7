#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use bioimageio_spec::{BuildOptions, FormatTarget, RdfSource, Resolver};
use clap::Parser;
use tracing::info;

use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct ValidateArgs {
    /// Description file, folder, zipped package or URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Validate against the latest format instead of the declared one
    #[arg(long = "update-format")]
    pub update_format: bool,

    /// Validate collection entries against the latest format
    #[arg(long = "update-format-inner")]
    pub update_format_inner: bool,
}

impl ValidateArgs {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            target: if self.update_format {
                FormatTarget::Latest
            } else {
                FormatTarget::Discover
            },
            inner_target: self.update_format_inner.then_some(FormatTarget::Latest),
        }
    }
}

pub fn handle(args: ValidateArgs, json: bool, resolver: &Resolver, runtime: &RuntimeContext) -> Result<()> {
    let source = RdfSource::from_arg(&args.source);
    info!(source = %source, "validating");

    let report = resolver.validate(&source, &runtime.validation_context(), &args.build_options());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    if !report.passed() {
        bail!("validation failed for {}", args.source);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_targets() {
        let args = ValidateArgs {
            source: "rdf.yaml".into(),
            update_format: false,
            update_format_inner: true,
        };
        let opts = args.build_options();
        assert_eq!(opts.target, FormatTarget::Discover);
        assert_eq!(opts.inner().target, FormatTarget::Latest);
    }
}
