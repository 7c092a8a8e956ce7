//! Opening descriptions from files, folders, bundles, URLs and text.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;
use zip::ZipArchive;

use crate::context::{BIOIMAGEIO_YAML, RootLocation};
use crate::error::{Result, SpecError};
use crate::reachability::HttpTransport;

/// Legacy metadata file name, still accepted when reading.
pub const LEGACY_RDF_YAML: &str = "rdf.yaml";

/// Where a description comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum RdfSource {
    /// YAML file, folder holding one, or zipped bundle.
    Path(PathBuf),
    Url(Url),
    /// YAML document given as text.
    Text(String),
    /// Already parsed content.
    Content(Map<String, Value>),
}

impl RdfSource {
    /// Interpret a command-line style argument: HTTP(S) URLs, else a path.
    pub fn from_arg(arg: &str) -> Self {
        match Url::parse(arg) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(url),
            _ => Self::Path(PathBuf::from(arg)),
        }
    }
}

impl fmt::Display for RdfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfSource::Path(path) => write!(f, "{}", path.display()),
            RdfSource::Url(url) => write!(f, "{url}"),
            RdfSource::Text(_) => f.write_str("<yaml text>"),
            RdfSource::Content(_) => f.write_str("<in-memory content>"),
        }
    }
}

/// Parsed description plus the location its references resolve against.
#[derive(Clone, Debug)]
pub struct OpenedRdf {
    pub content: Map<String, Value>,
    pub root: RootLocation,
    pub file_name: String,
    pub source_name: String,
    /// Scratch directory an archive was unpacked into.
    pub keepalive: Option<Arc<TempDir>>,
}

pub fn open_rdf(source: &RdfSource, transport: &dyn HttpTransport, cwd: &RootLocation) -> Result<OpenedRdf> {
    match source {
        RdfSource::Path(path) => open_path(path),
        RdfSource::Url(url) => open_url(url, transport),
        RdfSource::Text(text) => Ok(OpenedRdf {
            content: parse_yaml(text, "<yaml text>")?,
            root: cwd.clone(),
            file_name: BIOIMAGEIO_YAML.to_string(),
            source_name: source.to_string(),
            keepalive: None,
        }),
        RdfSource::Content(content) => Ok(OpenedRdf {
            content: content.clone(),
            root: cwd.clone(),
            file_name: BIOIMAGEIO_YAML.to_string(),
            source_name: source.to_string(),
            keepalive: None,
        }),
    }
}

pub fn parse_yaml(text: &str, origin: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_yaml_bw::from_str(text)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SpecError::invalid_source(
            origin,
            format!("expected a mapping at the document root, found {}", kind_of(&other)),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

fn open_path(path: &Path) -> Result<OpenedRdf> {
    if path.is_dir() {
        let file = find_rdf_in_dir(path)?;
        return open_yaml_file(&file, None);
    }
    if !path.is_file() {
        return Err(SpecError::invalid_source(
            path.display().to_string(),
            "no such file or directory",
        ));
    }
    if is_zip(path)? {
        let file = File::open(path)?;
        return open_archive(file, &path.display().to_string());
    }
    open_yaml_file(path, None)
}

fn open_yaml_file(path: &Path, keepalive: Option<Arc<TempDir>>) -> Result<OpenedRdf> {
    let text = fs::read_to_string(path)?;
    let source_name = path.display().to_string();
    let content = parse_yaml(&text, &source_name)?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let root = fs::canonicalize(&root).unwrap_or(root);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| BIOIMAGEIO_YAML.to_string());
    debug!(path = %path.display(), "opened description");
    Ok(OpenedRdf {
        content,
        root: RootLocation::Dir(root),
        file_name,
        source_name,
        keepalive,
    })
}

/// `bioimageio.yaml`, then `rdf.yaml`, then any `*.bioimageio.yaml`.
pub fn find_rdf_in_dir(dir: &Path) -> Result<PathBuf> {
    for name in [BIOIMAGEIO_YAML, LEGACY_RDF_YAML] {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    let suffix = format!(".{BIOIMAGEIO_YAML}");
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().ends_with(&suffix))
        })
        .collect();
    matches.sort();
    matches.into_iter().next().ok_or_else(|| {
        SpecError::invalid_source(
            dir.display().to_string(),
            format!("no {BIOIMAGEIO_YAML} or {LEGACY_RDF_YAML} found"),
        )
    })
}

fn is_zip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == *b"PK\x03\x04"),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Open the metadata file `member` of a bundle folder or zipped bundle by name.
pub fn open_package_member(path: &Path, member: &str) -> Result<OpenedRdf> {
    let missing = || {
        SpecError::invalid_source(
            path.display().to_string(),
            format!("package has no member '{member}'"),
        )
    };
    if path.is_dir() {
        let file = path.join(member);
        if !file.is_file() {
            return Err(missing());
        }
        return open_yaml_file(&file, None);
    }
    let scratch = unpack_archive(File::open(path)?, &path.display().to_string())?;
    let file = scratch.path().join(member);
    if !file.is_file() {
        return Err(missing());
    }
    let mut opened = open_yaml_file(&file, Some(Arc::new(scratch)))?;
    opened.source_name = path.display().to_string();
    Ok(opened)
}

fn unpack_archive<R: Read + Seek>(reader: R, source_name: &str) -> Result<TempDir> {
    let mut archive = ZipArchive::new(reader)?;
    let scratch = tempfile::Builder::new()
        .prefix("bioimageio-package-")
        .tempdir()?;
    extract_archive(&mut archive, scratch.path())?;
    info!(source = source_name, dest = %scratch.path().display(), "unpacked package");
    Ok(scratch)
}

fn open_archive<R: Read + Seek>(reader: R, source_name: &str) -> Result<OpenedRdf> {
    let scratch = unpack_archive(reader, source_name)?;
    let rdf = find_rdf_in_dir(scratch.path())?;
    let mut opened = open_yaml_file(&rdf, Some(Arc::new(scratch)))?;
    opened.source_name = source_name.to_string();
    Ok(opened)
}

/// Unpack regular files only; entries escaping `dest` are rejected.
fn extract_archive<R: Read + Seek>(archive: &mut ZipArchive<R>, dest: &Path) -> Result<()> {
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(SpecError::invalid_source(
                entry.name().to_string(),
                "archive entry contains unsafe path",
            ));
        };
        if let Some(mode) = entry.unix_mode()
            && mode & 0o170000 != 0o100000
        {
            return Err(SpecError::invalid_source(
                entry.name().to_string(),
                "only regular files are allowed in a package",
            ));
        }
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

fn open_url(url: &Url, transport: &dyn HttpTransport) -> Result<OpenedRdf> {
    let mut body = Vec::new();
    transport
        .download(url.as_str(), &mut body)
        .map_err(|err| err.into_spec_error(url.as_str()))?;
    info!(url = %url, bytes = body.len(), "fetched description");

    if body.starts_with(b"PK\x03\x04") {
        return open_archive(Cursor::new(body), url.as_str());
    }
    let text = String::from_utf8(body)
        .map_err(|err| SpecError::invalid_source(url.to_string(), err))?;
    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(BIOIMAGEIO_YAML)
        .to_string();
    Ok(OpenedRdf {
        content: parse_yaml(&text, url.as_str())?,
        root: RootLocation::parent_of_url(url),
        file_name,
        source_name: url.to_string(),
        keepalive: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::fake::FakeTransport;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn folder_prefers_bioimageio_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rdf.yaml"), "name: legacy\n").unwrap();
        fs::write(dir.path().join("bioimageio.yaml"), "name: current\n").unwrap();
        let opened = open_path(dir.path()).unwrap();
        assert_eq!(opened.content["name"], "current");
        assert_eq!(opened.file_name, "bioimageio.yaml");
    }

    #[test]
    fn zipped_bundles_are_unpacked_and_kept_alive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        let mut writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        writer.start_file("rdf.yaml", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"name: zipped\ndocumentation: README.md\n").unwrap();
        writer.start_file("README.md", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"# docs").unwrap();
        writer.finish().unwrap();

        let opened = open_path(&zip_path).unwrap();
        assert_eq!(opened.content["name"], "zipped");
        assert!(opened.keepalive.is_some());
        let RootLocation::Dir(root) = &opened.root else {
            panic!("expected a directory root");
        };
        assert!(root.join("README.md").is_file());
    }

    #[test]
    fn url_sources_resolve_relative_to_their_folder() {
        let transport = FakeTransport::default().with_body("https://host.org/m/rdf.yaml", b"name: remote\n");
        let url = Url::parse("https://host.org/m/rdf.yaml").unwrap();
        let opened = open_url(&url, &transport).unwrap();
        assert_eq!(opened.root.to_string(), "https://host.org/m/");
        assert_eq!(opened.file_name, "rdf.yaml");
    }

    #[test]
    fn non_mapping_documents_are_rejected() {
        let err = parse_yaml("- a\n- b\n", "list.yaml").unwrap_err();
        assert!(err.to_string().contains("a sequence"), "{err}");
    }

    #[test]
    fn from_arg_distinguishes_urls_and_paths() {
        assert!(matches!(RdfSource::from_arg("https://host.org/rdf.yaml"), RdfSource::Url(_)));
        assert!(matches!(RdfSource::from_arg("models/unet/rdf.yaml"), RdfSource::Path(_)));
    }
}
