//! Bundling a description with every file it references.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

use crate::collection::ENTRY_SOURCE_KEY;
use crate::context::{BIOIMAGEIO_YAML, RootLocation, ValidationContext};
use crate::error::{Result, SpecError};
use crate::fields::{FileField, visit_mut};
use crate::kind::ResourceType;
use crate::reader::{LEGACY_RDF_YAML, RdfSource, open_package_member, open_rdf};
use crate::resolve::{BuildOptions, Description, ResourceDescr, Resolver, summary_line};
use crate::schema::{index_loc, join_loc};
use crate::source::{FileSource, LocalContent, SourceResolver, copy_file};
use crate::weights::WeightsFormat;

pub const DEFAULT_COMPRESSION_LEVEL: i64 = 1;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("static pattern"));

#[derive(Clone, Debug, PartialEq)]
pub struct PackageOptions {
    /// Metadata file name; may interpolate `{name}` and `{type}`.
    pub file_name: String,
    /// Keep only the first of these weight formats the model provides.
    pub weights_priority_order: Option<Vec<WeightsFormat>>,
    pub compression: CompressionMethod,
    pub compression_level: Option<i64>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            file_name: BIOIMAGEIO_YAML.to_string(),
            weights_priority_order: None,
            compression: CompressionMethod::Deflated,
            compression_level: Some(DEFAULT_COMPRESSION_LEVEL),
        }
    }
}

/// Content of one bundle member.
#[derive(Clone, Debug, PartialEq)]
pub enum PackageEntry {
    /// Serialised as YAML.
    Content(Map<String, Value>),
    /// Copied or downloaded.
    File(FileSource),
}

/// Bundle member names mapped to their content; the metadata file comes first.
#[derive(Clone, Debug, Default)]
pub struct PackageManifest {
    entries: IndexMap<String, PackageEntry>,
    by_source: HashMap<String, String>,
    /// Root and type of nested descriptions, by member name.
    nested: HashMap<String, (RootLocation, ResourceType)>,
    /// Unpacked archives nested descriptions were read from.
    scratch: Vec<Arc<TempDir>>,
}

/// Names a reader could mistake for the bundle's metadata file.
fn is_metadata_like(name: &str) -> bool {
    name == BIOIMAGEIO_YAML || name == LEGACY_RDF_YAML || name.ends_with(&format!(".{BIOIMAGEIO_YAML}"))
}

impl PackageManifest {
    pub fn metadata_name(&self) -> Option<&str> {
        self.entries.keys().next().map(String::as_str)
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        match self.entries.first() {
            Some((_, PackageEntry::Content(content))) => Some(content),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PackageEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a member under an exact name.
    pub fn insert(&mut self, name: impl Into<String>, entry: PackageEntry) -> Result<()> {
        let name = name.into();
        if let Some(existing) = self.entries.get(&name)
            && existing != &entry
        {
            return Err(SpecError::PackagingCollision { name });
        }
        if let PackageEntry::File(source) = &entry {
            self.by_source.insert(source.to_string(), name.clone());
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Add a referenced file under a free name derived from its own.
    ///
    /// The same source always maps to the same member; distinct sources with
    /// the same base name get `stem_1.ext`, `stem_2.ext`, ...
    pub fn add_file(&mut self, source: FileSource) -> Result<String> {
        if let Some(name) = self.by_source.get(&source.to_string()) {
            return Ok(name.clone());
        }
        let base = source.file_name().unwrap_or_else(|| "file".to_string());
        let name = self.free_name(&base);
        self.insert(name.clone(), PackageEntry::File(source))?;
        Ok(name)
    }

    /// Reserve a member for a description nested in the bundle.
    ///
    /// Returns the member name and whether it was newly reserved; a source
    /// seen before keeps its member, so self-referencing collections end.
    fn reserve_nested(&mut self, source: &FileSource) -> (String, bool) {
        if let Some(name) = self.by_source.get(&source.to_string()) {
            return (name.clone(), false);
        }
        let base = source.file_name().unwrap_or_else(|| LEGACY_RDF_YAML.to_string());
        let name = self.free_name(&base);
        self.by_source.insert(source.to_string(), name.clone());
        self.entries.insert(name.clone(), PackageEntry::Content(Map::new()));
        (name, true)
    }

    fn free_name(&self, base: &str) -> String {
        if !self.entries.contains_key(base) && !is_metadata_like(base) {
            return base.to_string();
        }
        let path = Path::new(base);
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        let ext = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        (1..)
            .map(|n| format!("{stem}_{n}{ext}"))
            .find(|candidate| !self.entries.contains_key(candidate) && !is_metadata_like(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

/// `unet 2d/v1` becomes `unet_2d_v1`; a leading digit gets a `_` prefix.
pub fn os_friendly_name(name: &str) -> String {
    let replaced = NON_WORD.replace_all(name, "_");
    if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{replaced}")
    } else {
        replaced.into_owned()
    }
}

/// Expand a metadata file name template.
pub fn metadata_file_name(template: &str, name: &str, kind: ResourceType) -> Result<String> {
    let suffix = format!(".{BIOIMAGEIO_YAML}");
    if template != BIOIMAGEIO_YAML && !template.ends_with(&suffix) {
        return Err(SpecError::FileNameTemplate {
            template: template.to_string(),
            reason: format!("must be '{BIOIMAGEIO_YAML}' or end with '{suffix}'"),
        });
    }
    let expanded = template
        .replace("{name}", &os_friendly_name(name))
        .replace("{type}", kind.as_str());
    if expanded.contains(['{', '}', '/', '\\']) {
        return Err(SpecError::FileNameTemplate {
            template: template.to_string(),
            reason: "only {name} and {type} may be interpolated into a plain file name".into(),
        });
    }
    Ok(expanded)
}

/// Keep only the first entry of `priority` that `weights` provides.
pub fn select_weights(weights: &mut Map<String, Value>, priority: &[WeightsFormat]) -> Result<WeightsFormat> {
    let Some(chosen) = priority
        .iter()
        .copied()
        .find(|format| weights.contains_key(format.as_str()))
    else {
        let mut available: Vec<WeightsFormat> = weights
            .keys()
            .filter_map(|key| key.parse().ok())
            .collect();
        available.sort();
        return Err(SpecError::WeightsFormatNotFound {
            requested: priority.to_vec(),
            available,
        });
    };
    weights.retain(|key, _| key == chosen.as_str());
    Ok(chosen)
}

pub struct Packager<'r> {
    resolver: &'r Resolver,
    ctx: ValidationContext,
    options: PackageOptions,
}

impl<'r> Packager<'r> {
    pub fn new(resolver: &'r Resolver, ctx: &ValidationContext, options: PackageOptions) -> Self {
        Self {
            resolver,
            ctx: ctx.clone(),
            options,
        }
    }

    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// Bundle members of `descr`, without materialising them.
    pub fn package_content(&self, descr: &ResourceDescr) -> Result<PackageManifest> {
        let metadata_name = metadata_file_name(&self.options.file_name, &descr.name, descr.resource_type)?;
        let mut manifest = PackageManifest::default();
        // reserved first so no referenced file can take the name
        manifest.insert(metadata_name.clone(), PackageEntry::Content(Map::new()))?;

        let mut content = descr.to_content();
        if descr.resource_type == ResourceType::Model
            && let Some(priority) = &self.options.weights_priority_order
        {
            let weights = match content.get_mut("weights") {
                Some(Value::Object(weights)) => weights,
                _ => {
                    return Err(SpecError::WeightsFormatNotFound {
                        requested: priority.clone(),
                        available: Vec::new(),
                    });
                }
            };
            let chosen = select_weights(weights, priority)?;
            debug!(weights = %chosen, "selected weights format");
        }

        let content = self.pack_references(
            &mut manifest,
            content,
            descr.resource_type,
            &descr.file_fields,
            &descr.root,
        )?;
        manifest.entries.insert(metadata_name, PackageEntry::Content(content));
        Ok(manifest)
    }

    /// Rewrite the file references of `content` to bundle members.
    ///
    /// Collection entries are packed too: external entry descriptions become
    /// members of their own, with their references rewritten in turn.
    fn pack_references(
        &self,
        manifest: &mut PackageManifest,
        content: Map<String, Value>,
        kind: ResourceType,
        fields: &[FileField],
        root: &RootLocation,
    ) -> Result<Map<String, Value>> {
        let mut root_value = Value::Object(content);
        for field in fields {
            visit_mut::<SpecError>(&mut root_value, field.pattern, &mut |loc, value| {
                let Some(reference) = value.as_str().and_then(|text| field.shape.split(text)) else {
                    return Ok(());
                };
                let source = FileSource::parse(reference.file, root).map_err(|err| SpecError::SchemaField {
                    path: loc.to_string(),
                    reason: err.to_string(),
                })?;
                let name = manifest.add_file(source)?;
                debug!(field = loc, member = %name, "packaging file reference");
                *value = Value::String(reference.with_file(&name));
                Ok(())
            })?;
        }
        let Value::Object(mut content) = root_value else {
            return Err(SpecError::SchemaField {
                path: String::new(),
                reason: "description content is not a mapping".into(),
            });
        };

        if kind == ResourceType::Collection
            && let Some(Value::Array(entries)) = content.get_mut("collection")
        {
            for (index, entry) in entries.iter_mut().enumerate() {
                if let Value::Object(entry) = entry {
                    let packed = self.pack_collection_entry(manifest, std::mem::take(entry), index, root)?;
                    *entry = packed;
                }
            }
        }
        Ok(content)
    }

    fn pack_collection_entry(
        &self,
        manifest: &mut PackageManifest,
        mut entry: Map<String, Value>,
        index: usize,
        root: &RootLocation,
    ) -> Result<Map<String, Value>> {
        let Some(reference) = entry.get(ENTRY_SOURCE_KEY).and_then(Value::as_str).map(str::to_string) else {
            // inline entries resolve against the collection itself
            let kind = declared_kind(&entry).unwrap_or(ResourceType::Collection);
            let fields = self.file_fields_for(kind);
            return self.pack_references(manifest, entry, kind, &fields, root);
        };
        let source_loc = join_loc(&index_loc("collection", index), ENTRY_SOURCE_KEY);
        let source = FileSource::parse(&reference, root).map_err(|err| SpecError::SchemaField {
            path: source_loc.clone(),
            reason: err.to_string(),
        })?;
        let rdf = match &source {
            FileSource::Local(path) => RdfSource::Path(path.clone()),
            FileSource::Remote(url) => RdfSource::Url(url.clone()),
            FileSource::Inline(_) => return Ok(entry),
        };

        let (name, fresh) = manifest.reserve_nested(&source);
        if fresh {
            let opened = open_rdf(&rdf, self.resolver.transport(), root)?;
            let kind = declared_kind(&opened.content).unwrap_or_default();
            let content = match self.resolver.converters().chain(kind) {
                Some(chain) => chain.convert(&opened.content, &chain.latest),
                None => opened.content,
            };
            if let Some(scratch) = opened.keepalive {
                manifest.scratch.push(scratch);
            }
            manifest.nested.insert(name.clone(), (opened.root.clone(), kind));
            let fields = self.file_fields_for(kind);
            let content = self.pack_references(manifest, content, kind, &fields, &opened.root)?;
            debug!(field = %source_loc, member = %name, "packaging collection entry");
            manifest.entries.insert(name.clone(), PackageEntry::Content(content));
        }

        // entry overrides resolve against the external description's root
        entry.remove(ENTRY_SOURCE_KEY);
        if let Some((entry_root, kind)) = manifest.nested.get(&name).cloned() {
            let fields = self.file_fields_for(kind);
            entry = self.pack_references(manifest, entry, kind, &fields, &entry_root)?;
        }
        entry.insert(ENTRY_SOURCE_KEY.into(), Value::String(name));
        Ok(entry)
    }

    fn file_fields_for(&self, kind: ResourceType) -> Vec<FileField> {
        self.resolver
            .registry()
            .latest(kind)
            .map(|schema| schema.file_fields().to_vec())
            .unwrap_or_default()
    }

    /// Write the bundle as a folder at `output`, which must be absent or empty.
    pub fn save_as_folder(&self, descr: &ResourceDescr, output: &Path) -> Result<PathBuf> {
        if output.is_file() || (output.is_dir() && fs::read_dir(output)?.next().is_some()) {
            return Err(SpecError::OutputNotEmpty {
                path: output.to_path_buf(),
            });
        }
        let manifest = self.package_content(descr)?;
        let staging = staging_dir(output)?;
        self.materialize(&manifest, staging.path())?;
        self.verify(&manifest, staging.path(), output)?;

        fs::create_dir_all(output)?;
        for (name, _) in manifest.iter() {
            fs::rename(staging.path().join(name), output.join(name))?;
        }
        info!(output = %output.display(), files = manifest.len(), "wrote package folder");
        Ok(output.to_path_buf())
    }

    /// Write the bundle as a zip archive at `output`.
    pub fn save_as_archive(&self, descr: &ResourceDescr, output: &Path) -> Result<PathBuf> {
        let manifest = self.package_content(descr)?;
        let staging = staging_dir(output)?;
        self.materialize(&manifest, staging.path())?;

        let mut names: Vec<&String> = manifest.iter().map(|(name, _)| name).collect();
        names.sort();
        let files: Vec<PendingFile> = names
            .into_iter()
            .map(|name| PendingFile {
                name: name.clone(),
                path: staging.path().join(name),
            })
            .collect();

        let parent = parent_dir(output);
        fs::create_dir_all(&parent)?;
        let archive = tempfile::Builder::new()
            .prefix(".bioimageio-")
            .suffix(".zip")
            .tempfile_in(&parent)?;
        write_zip(archive.as_file(), &files, &self.options)?;
        self.verify(&manifest, archive.path(), output)?;

        persist(archive, output)?;
        info!(output = %output.display(), files = files.len(), "wrote package archive");
        Ok(output.to_path_buf())
    }

    fn materialize(&self, manifest: &PackageManifest, dir: &Path) -> Result<()> {
        let mut sources = SourceResolver::new(self.resolver.transport());
        for (name, entry) in manifest.iter() {
            let dest = dir.join(name);
            match entry {
                PackageEntry::Content(content) => {
                    let yaml = serde_yaml_bw::to_string(&Value::Object(content.clone()))?;
                    fs::write(&dest, yaml)?;
                }
                PackageEntry::File(source) => match sources.resolve(source)? {
                    LocalContent::File(path) => copy_file(&path, &dest)?,
                    LocalContent::Inline(value) => fs::write(&dest, serde_yaml_bw::to_string(value)?)?,
                },
            }
        }
        Ok(())
    }

    /// Reload the metadata member of freshly written output and require it to validate.
    fn verify(&self, manifest: &PackageManifest, staged: &Path, output: &Path) -> Result<()> {
        let metadata_name = manifest.metadata_name().unwrap_or(BIOIMAGEIO_YAML);
        let opened = open_package_member(staged, metadata_name)?;
        match self.resolver.load_opened(opened, &self.ctx, &BuildOptions::default()) {
            Description::Valid(_) => {
                debug!(output = %output.display(), "package round trip verified");
                Ok(())
            }
            Description::Invalid(invalid) => Err(SpecError::RoundTripVerification {
                path: output.to_path_buf(),
                summary: summary_line(&invalid.summary),
            }),
        }
    }
}

fn declared_kind(content: &Map<String, Value>) -> Option<ResourceType> {
    content.get("type").and_then(Value::as_str).and_then(|kind| kind.parse().ok())
}

struct PendingFile {
    name: String,
    path: PathBuf,
}

fn parent_dir(output: &Path) -> PathBuf {
    output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn staging_dir(output: &Path) -> Result<TempDir> {
    let parent = parent_dir(output);
    fs::create_dir_all(&parent)?;
    Ok(tempfile::Builder::new()
        .prefix(".bioimageio-staging-")
        .tempdir_in(parent)?)
}

fn persist(file: NamedTempFile, output: &Path) -> Result<()> {
    file.persist(output).map_err(|err| SpecError::Io(err.error))?;
    Ok(())
}

fn write_zip(out: &File, files: &[PendingFile], options: &PackageOptions) -> Result<()> {
    let mut writer = ZipWriter::new(out);
    let timestamp = zip_timestamp();
    let level = match options.compression {
        CompressionMethod::Stored => None,
        _ => options.compression_level,
    };

    for entry in files {
        let file_options = SimpleFileOptions::default()
            .compression_method(options.compression)
            .compression_level(level)
            .last_modified_time(timestamp)
            .unix_permissions(0o644)
            .large_file(fs::metadata(&entry.path)?.len() >= u64::from(u32::MAX));
        writer.start_file(entry.name.as_str(), file_options)?;
        let mut input = File::open(&entry.path)?;
        io::copy(&mut input, &mut writer)?;
    }

    let mut out = writer.finish()?;
    out.flush()?;
    Ok(())
}

fn zip_timestamp() -> ZipDateTime {
    ZipDateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap_or_else(|_| ZipDateTime::default())
}
