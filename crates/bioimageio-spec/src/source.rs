use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

use crate::context::RootLocation;
use crate::error::{Result, SpecError};
use crate::reachability::HttpTransport;

/// Anything a description field can point at.
#[derive(Clone, Debug, PartialEq)]
pub enum FileSource {
    Local(PathBuf),
    Remote(Url),
    /// In-memory content, serialised as YAML rather than copied.
    Inline(Value),
}

impl FileSource {
    /// Interpret `reference` relative to `root`.
    pub fn parse(reference: &str, root: &RootLocation) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(SpecError::invalid_source(reference, "empty file reference"));
        }
        if let Ok(url) = Url::parse(trimmed) {
            match url.scheme() {
                "http" | "https" => return Ok(Self::Remote(url)),
                "file" => {
                    return url.to_file_path().map(Self::Local).map_err(|_| {
                        SpecError::invalid_source(reference, "file URL is not a local path")
                    });
                }
                // windows drive letters parse as a one-letter scheme
                scheme if scheme.len() > 1 => {
                    return Err(SpecError::invalid_source(
                        reference,
                        format!("unsupported URL scheme `{scheme}`"),
                    ));
                }
                _ => {}
            }
        }
        let path = Path::new(trimmed);
        if path.is_absolute() {
            return Ok(Self::Local(path.to_path_buf()));
        }
        match root {
            RootLocation::Dir(dir) => Ok(Self::Local(dir.join(path))),
            RootLocation::Url(base) => base
                .join(&trimmed.replace('\\', "/"))
                .map(Self::Remote)
                .map_err(|err| SpecError::invalid_source(reference, err)),
        }
    }

    /// Base file name the source would naturally be stored under.
    pub fn file_name(&self) -> Option<String> {
        match self {
            FileSource::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            FileSource::Remote(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            FileSource::Inline(_) => None,
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Local(path) => write!(f, "{}", path.display()),
            FileSource::Remote(url) => write!(f, "{url}"),
            FileSource::Inline(_) => f.write_str("<inline content>"),
        }
    }
}

/// Local handle on a resolved source.
#[derive(Debug)]
pub enum LocalContent<'s> {
    File(PathBuf),
    Inline(&'s Value),
}

/// Materialises remote sources for the duration of one operation.
///
/// Every URL is downloaded at most once into a fresh file of a private
/// scratch directory; the directory disappears with the resolver.
pub struct SourceResolver<'t> {
    transport: &'t dyn HttpTransport,
    scratch: Option<TempDir>,
    downloads: HashMap<Url, PathBuf>,
}

impl<'t> SourceResolver<'t> {
    pub fn new(transport: &'t dyn HttpTransport) -> Self {
        Self {
            transport,
            scratch: None,
            downloads: HashMap::new(),
        }
    }

    pub fn resolve<'s>(&mut self, source: &'s FileSource) -> Result<LocalContent<'s>> {
        match source {
            FileSource::Local(path) => {
                if !path.is_file() {
                    return Err(SpecError::invalid_source(
                        path.display().to_string(),
                        "file does not exist",
                    ));
                }
                Ok(LocalContent::File(path.clone()))
            }
            FileSource::Remote(url) => self.download(url).map(LocalContent::File),
            FileSource::Inline(value) => Ok(LocalContent::Inline(value)),
        }
    }

    fn scratch_dir(&mut self) -> Result<&Path> {
        let dir = match self.scratch.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new()
                .prefix("bioimageio-download-")
                .tempdir()?,
        };
        Ok(self.scratch.insert(dir).path())
    }

    fn download(&mut self, url: &Url) -> Result<PathBuf> {
        if let Some(path) = self.downloads.get(url) {
            return Ok(path.clone());
        }
        let index = self.downloads.len();
        let name = FileSource::Remote(url.clone())
            .file_name()
            .unwrap_or_else(|| "download".to_string());
        let dest = self.scratch_dir()?.join(format!("{index}_{name}"));

        info!(url = %url, dest = %dest.display(), "downloading");
        let file = File::create_new(&dest)?;
        let mut writer = BufWriter::new(file);
        self.transport
            .download(url.as_str(), &mut writer)
            .map_err(|err| err.into_spec_error(url.as_str()))?;
        writer.flush()?;
        debug!(url = %url, "download complete");

        self.downloads.insert(url.clone(), dest.clone());
        Ok(dest)
    }
}

/// Hex encoded SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Copy a resolved local file, creating parent directories.
pub(crate) fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::fake::FakeTransport;

    #[test]
    fn parses_references_against_roots() {
        let dir_root = RootLocation::Dir(PathBuf::from("/models/unet"));
        assert_eq!(
            FileSource::parse("weights/w.pt", &dir_root).unwrap(),
            FileSource::Local(PathBuf::from("/models/unet/weights/w.pt"))
        );
        let url_root = RootLocation::Url(Url::parse("https://host.org/unet/").unwrap());
        assert_eq!(
            FileSource::parse("w.pt", &url_root).unwrap(),
            FileSource::Remote(Url::parse("https://host.org/unet/w.pt").unwrap())
        );
        assert!(FileSource::parse("ftp://host.org/w.pt", &dir_root).is_err());
        assert!(FileSource::parse("  ", &dir_root).is_err());
    }

    #[test]
    fn remote_sources_download_once_per_resolver() {
        let transport = FakeTransport::default().with_body("https://host.org/a/data.bin", b"payload");
        let source = FileSource::Remote(Url::parse("https://host.org/a/data.bin").unwrap());
        let mut resolver = SourceResolver::new(&transport);
        let first = match resolver.resolve(&source).unwrap() {
            LocalContent::File(path) => path,
            LocalContent::Inline(_) => panic!("expected a file"),
        };
        let second = match resolver.resolve(&source).unwrap() {
            LocalContent::File(path) => path,
            LocalContent::Inline(_) => panic!("expected a file"),
        };
        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"payload");
        assert_eq!(transport.requests(), vec!["GET https://host.org/a/data.bin".to_string()]);
    }

    #[test]
    fn hashes_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
