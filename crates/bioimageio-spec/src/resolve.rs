use std::backtrace::Backtrace;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::collection;
use crate::context::{ContextOverrides, RootLocation, ValidationContext, WarningLevel};
use crate::convert::{ConverterChain, ConverterTable};
use crate::error::{Result, SpecError};
use crate::fields::FileField;
use crate::kind::ResourceType;
use crate::reachability::{HttpTransport, ReqwestTransport};
use crate::reader::{OpenedRdf, RdfSource, open_rdf};
use crate::schema::{DescriptionSchema, FieldChecker, SchemaRegistry};
use crate::summary::{FieldError, ValidationReport, ValidationSummary, ValidationWarning};
use crate::version::{FormatTarget, FormatVersion};

const LATEST: &str = "latest";

/// How far descriptions (and collection entries) are migrated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub target: FormatTarget,
    /// Target for nested collection entries; `None` reuses `target`.
    pub inner_target: Option<FormatTarget>,
}

impl BuildOptions {
    pub fn latest() -> Self {
        Self {
            target: FormatTarget::Latest,
            inner_target: None,
        }
    }

    /// Options for collection entries.
    pub fn inner(&self) -> Self {
        let target = self.inner_target.clone().unwrap_or_else(|| self.target.clone());
        Self {
            target,
            inner_target: self.inner_target.clone(),
        }
    }
}

/// A validated, converted description.
#[derive(Clone, Debug)]
pub struct ResourceDescr {
    pub resource_type: ResourceType,
    pub format_version: FormatVersion,
    pub name: String,
    /// Converted content, including fields the schema does not know.
    pub fields: Map<String, Value>,
    pub summary: ValidationSummary,
    pub root: RootLocation,
    pub file_fields: Vec<FileField>,
    keepalive: Option<Arc<TempDir>>,
}

impl ResourceDescr {
    /// Serialised content without transient fields.
    pub fn to_content(&self) -> Map<String, Value> {
        let mut content = self.fields.clone();
        for key in crate::schema::TRANSIENT_FIELDS {
            content.remove(key);
        }
        content
    }

    /// Whether the description was read from an unpacked archive.
    pub fn is_unpacked(&self) -> bool {
        self.keepalive.is_some()
    }
}

/// Description that failed validation.
#[derive(Clone, Debug)]
pub struct InvalidDescr {
    pub resource_type: Option<ResourceType>,
    pub summary: ValidationSummary,
}

#[derive(Clone, Debug)]
pub enum Description {
    Valid(ResourceDescr),
    Invalid(InvalidDescr),
}

impl Description {
    pub fn summary(&self) -> &ValidationSummary {
        match self {
            Description::Valid(descr) => &descr.summary,
            Description::Invalid(invalid) => &invalid.summary,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Description::Valid(_))
    }

    /// The valid description, or an error carrying the summary.
    pub fn into_valid(self) -> Result<ResourceDescr> {
        match self {
            Description::Valid(descr) => Ok(descr),
            Description::Invalid(invalid) => Err(SpecError::InvalidDescription {
                source_name: invalid.summary.source_name.clone(),
                summary: summary_line(&invalid.summary),
            }),
        }
    }
}

impl From<ResourceDescr> for Description {
    fn from(descr: ResourceDescr) -> Self {
        Description::Valid(descr)
    }
}

pub(crate) fn summary_line(summary: &ValidationSummary) -> String {
    summary
        .error_tree()
        .map(|tree| tree.lines().join("; "))
        .unwrap_or_else(|| "passed".to_string())
}

/// Dispatches raw descriptions to converters and schemas.
#[derive(Clone)]
pub struct Resolver {
    registry: SchemaRegistry,
    converters: ConverterTable,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Resolver with the built-in schemas and a real HTTP client.
    pub fn new() -> Result<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            registry: SchemaRegistry::default(),
            converters: ConverterTable::default(),
            transport,
        }
    }

    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_converters(mut self, converters: ConverterTable) -> Self {
        self.converters = converters;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn converters(&self) -> &ConverterTable {
        &self.converters
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    /// Convert and validate raw content under `ctx`.
    pub fn build(&self, raw: &Map<String, Value>, ctx: &ValidationContext, opts: &BuildOptions) -> Description {
        let source_name = raw
            .get("rdf_source")
            .and_then(Value::as_str)
            .unwrap_or("in-memory")
            .to_string();
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut summary = ValidationSummary::new(name, source_name);

        let kind = match raw.get("type") {
            None | Some(Value::Null) => ResourceType::default(),
            Some(Value::String(kind)) => match kind.parse::<ResourceType>() {
                Ok(kind) => kind,
                Err(err) => return invalid(None, summary, FieldError::new("type", err.to_string())),
            },
            Some(_) => return invalid(None, summary, FieldError::new("type", "expected a string")),
        };
        let Some(chain) = self.converters.chain(kind) else {
            let err = SpecError::UnsupportedFormatVersion {
                resource_type: kind.to_string(),
                format_version: "any".into(),
            };
            return invalid(Some(kind), summary, FieldError::new("format_version", err.to_string()));
        };

        let (converted, schema) = match self.convert_for_schema(kind, chain, raw, ctx, opts, &mut summary) {
            Ok(found) => found,
            Err(err) => return invalid(Some(kind), summary, err),
        };
        let format_version = chain.declared_version(&converted);
        debug!(resource_type = %kind, %format_version, "validating description");

        let mut checker = FieldChecker::new(ctx, self.transport.as_ref());
        schema.validate(&converted, &mut checker);
        let (errors, warnings) = checker.into_parts();
        for error in errors {
            summary.push_error(error);
        }
        summary.warnings.extend(warnings);

        if kind == ResourceType::Collection {
            collection::validate_entries(self, &converted, ctx, &opts.inner(), &mut summary);
        }

        if !summary.passed() {
            return Description::Invalid(InvalidDescr {
                resource_type: Some(kind),
                summary,
            });
        }
        Description::Valid(ResourceDescr {
            resource_type: kind,
            format_version,
            name: summary.name.clone(),
            fields: converted,
            summary,
            root: ctx.root.clone(),
            file_fields: schema.file_fields().to_vec(),
            keepalive: None,
        })
    }

    /// Run the converter chain towards the requested target and pick the schema.
    fn convert_for_schema<'r>(
        &'r self,
        kind: ResourceType,
        chain: &ConverterChain,
        raw: &Map<String, Value>,
        ctx: &ValidationContext,
        opts: &BuildOptions,
        summary: &mut ValidationSummary,
    ) -> std::result::Result<(Map<String, Value>, &'r dyn DescriptionSchema), FieldError> {
        let unsupported = |version: &str| {
            FieldError::new(
                "format_version",
                SpecError::UnsupportedFormatVersion {
                    resource_type: kind.to_string(),
                    format_version: version.to_string(),
                }
                .to_string(),
            )
        };

        let mut raw = raw.clone();
        let mut target = opts.target.clone();
        if raw.get("format_version").and_then(Value::as_str) == Some(LATEST) {
            raw.insert("format_version".into(), Value::String(chain.latest.to_string()));
            target = FormatTarget::Latest;
        }
        let declared = chain.declared_version(&raw);
        if declared < chain.oldest {
            return Err(unsupported(&declared.to_string()));
        }

        let target_version = match &target {
            FormatTarget::Latest => chain.latest.clone(),
            FormatTarget::Exact(version) => {
                if self.registry.get(kind, version).is_none() || version < &chain.oldest {
                    return Err(unsupported(&version.to_string()));
                }
                version.clone()
            }
            FormatTarget::Discover if chain.is_future(&declared) => declared.clone(),
            FormatTarget::Discover => match self.registry.get(kind, &declared) {
                Some(schema) => schema.format_version(),
                None => {
                    record(
                        ctx,
                        summary,
                        ValidationWarning::new(
                            WarningLevel::Info,
                            "format_version",
                            format!(
                                "no schema for {kind} {}.{}; converting to {}",
                                declared.major(),
                                declared.minor(),
                                chain.latest
                            ),
                        ),
                    );
                    chain.latest.clone()
                }
            },
        };

        let converted = chain.convert(&raw, &target_version);
        let version = chain.declared_version(&converted);
        if chain.is_future(&version) || version > chain.latest {
            let Some(schema) = self.registry.latest(kind) else {
                return Err(unsupported(&version.to_string()));
            };
            record(
                ctx,
                summary,
                ValidationWarning::new(
                    WarningLevel::Warning,
                    "format_version",
                    format!(
                        "format_version {version} is newer than the latest known {}; validating against {}",
                        chain.latest,
                        schema.format_version()
                    ),
                ),
            );
            return Ok((converted, schema));
        }
        match self.registry.get(kind, &version) {
            Some(schema) => Ok((converted, schema)),
            None => Err(unsupported(&version.to_string())),
        }
    }

    /// Open `source`, scope the context to its location and build it.
    pub fn load(&self, source: &RdfSource, ctx: &ValidationContext, opts: &BuildOptions) -> Result<Description> {
        let mut opened = open_rdf(source, self.transport.as_ref(), &ctx.root)?;
        if !matches!(source, RdfSource::Content(_) | RdfSource::Text(_)) {
            opened
                .content
                .insert("rdf_source".into(), Value::String(opened.source_name.clone()));
        }
        Ok(self.load_opened(opened, ctx, opts))
    }

    /// Build an opened description under a context scoped to its location.
    pub fn load_opened(&self, opened: OpenedRdf, ctx: &ValidationContext, opts: &BuildOptions) -> Description {
        let OpenedRdf {
            content,
            root,
            file_name,
            source_name,
            keepalive,
        } = opened;
        info!(source = %source_name, "loading description");

        let description = ctx.scoped(
            ContextOverrides {
                root: Some(root),
                file_name: Some(file_name),
                ..Default::default()
            },
            |scoped| self.build(&content, scoped, opts),
        );
        match description {
            Description::Valid(mut descr) => {
                descr.summary.source_name = source_name;
                descr.keepalive = keepalive;
                Description::Valid(descr)
            }
            Description::Invalid(mut invalid) => {
                invalid.summary.source_name = source_name;
                Description::Invalid(invalid)
            }
        }
    }

    /// Batch-safe validation: every failure, including panics, becomes a report.
    pub fn validate(&self, source: &RdfSource, ctx: &ValidationContext, opts: &BuildOptions) -> ValidationReport {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load(source, ctx, opts)));
        let summary = match outcome {
            Ok(Ok(description)) => description.summary().clone(),
            Ok(Err(err)) => {
                warn!(source = %source, error = %err, "failed to load description");
                ValidationSummary::failure(source.to_string(), err.to_string())
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|msg| (*msg).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(source = %source, error = %message, "validation panicked");
                let mut summary =
                    ValidationSummary::failure(source.to_string(), format!("unexpected error: {message}"));
                summary.traceback = Backtrace::force_capture()
                    .to_string()
                    .lines()
                    .map(str::to_string)
                    .collect();
                summary
            }
        };
        summary.report()
    }

    /// Convert a description without validating it and write it as YAML.
    pub fn update_format(
        &self,
        source: &RdfSource,
        output: &Path,
        target: &FormatTarget,
        ctx: &ValidationContext,
    ) -> Result<Map<String, Value>> {
        let opened = open_rdf(source, self.transport.as_ref(), &ctx.root)?;
        let kind = match opened.content.get("type").and_then(Value::as_str) {
            Some(kind) => kind.parse()?,
            None => ResourceType::default(),
        };
        let chain = self
            .converters
            .chain(kind)
            .ok_or_else(|| SpecError::UnsupportedFormatVersion {
                resource_type: kind.to_string(),
                format_version: "any".into(),
            })?;
        let target_version = match target {
            FormatTarget::Exact(version) => version.clone(),
            FormatTarget::Latest | FormatTarget::Discover => chain.latest.clone(),
        };
        let converted = chain.convert(&opened.content, &target_version);

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, serde_yaml_bw::to_string(&converted)?)?;
        info!(
            source = %opened.source_name,
            output = %output.display(),
            format_version = %chain.declared_version(&converted),
            "updated format"
        );
        Ok(converted)
    }
}

fn record(ctx: &ValidationContext, summary: &mut ValidationSummary, warning: ValidationWarning) {
    if ctx.records(warning.severity) {
        summary.warnings.push(warning);
    }
}

fn invalid(kind: Option<ResourceType>, mut summary: ValidationSummary, error: FieldError) -> Description {
    summary.push_error(error);
    Description::Invalid(InvalidDescr {
        resource_type: kind,
        summary,
    })
}
