//! Artifact cache
//!
//! Fetch-or-reuse of external binary dependencies: the debug-probe tools
//! archive, the board firmware image, and the per-board offset metadata.
//! The cache is source-controlled: once a local path exists the remote is
//! never consulted again until the operator deletes the copy.
//!
//! Downloads and extractions land in a temporary sibling path and are
//! renamed into place only after full success, so a path that exists always
//! holds complete bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::error::FetchError;
use crate::patch::PatchOffsets;

/// How an artifact is stored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Plain file, stored byte-for-byte
    File,
    /// Gzipped tarball, extracted into a directory
    TarGz,
}

/// A remote artifact with a fixed local home
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Short name for log messages
    pub name: String,
    /// Remote location to fetch from
    pub url: String,
    /// Local file (or extraction directory for [`ArtifactKind::TarGz`])
    pub local_path: PathBuf,
    /// Storage kind
    pub kind: ArtifactKind,
}

/// Transport seam for fetching remote bytes
pub trait Fetcher {
    /// Download the full body at `url`
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking HTTP fetcher with a bounded per-request timeout
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e,
        })?;
        Ok(body.to_vec())
    }
}

/// Make an artifact present locally, fetching it only if it is missing
///
/// Returns the local path. Presence means a prior download or extraction
/// completed fully; a stale copy is used silently until removed.
pub fn ensure<F: Fetcher + ?Sized>(fetcher: &F, artifact: &Artifact) -> Result<PathBuf, FetchError> {
    if artifact.local_path.exists() {
        log::debug!(
            "{} already cached at {}",
            artifact.name,
            artifact.local_path.display()
        );
        return Ok(artifact.local_path.clone());
    }

    log::info!("fetching {} from {}", artifact.name, artifact.url);
    let bytes = fetcher.fetch(&artifact.url)?;

    match artifact.kind {
        ArtifactKind::File => place_file(&bytes, &artifact.local_path)?,
        ArtifactKind::TarGz => unpack_targz(&bytes, &artifact.local_path)?,
    }

    log::debug!(
        "{} cached at {}",
        artifact.name,
        artifact.local_path.display()
    );
    Ok(artifact.local_path.clone())
}

/// Fetch and parse the per-board offset metadata document
///
/// Single attempt, no retry: a malformed or unreachable document fails the
/// run rather than guessing offsets.
pub fn fetch_offsets<F: Fetcher + ?Sized>(fetcher: &F, url: &str) -> Result<PatchOffsets, FetchError> {
    let bytes = fetcher.fetch(url)?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Metadata {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn io_err(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    Ok(())
}

fn staging_path(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    dest.with_file_name(format!(".{name}.{suffix}"))
}

fn place_file(bytes: &[u8], dest: &Path) -> Result<(), FetchError> {
    create_parent(dest)?;
    let staging = staging_path(dest, "part");

    if let Err(e) = fs::write(&staging, bytes) {
        let _ = fs::remove_file(&staging);
        return Err(io_err(&staging, e));
    }
    fs::rename(&staging, dest).map_err(|e| {
        let _ = fs::remove_file(&staging);
        io_err(dest, e)
    })
}

fn unpack_targz(bytes: &[u8], dest: &Path) -> Result<(), FetchError> {
    create_parent(dest)?;
    let staging = staging_path(dest, "extract");

    // A staging directory left behind by an interrupted run is stale
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
    }

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    if let Err(e) = archive.unpack(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(FetchError::Extract {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        });
    }

    fs::rename(&staging, dest).map_err(|e| {
        let _ = fs::remove_dir_all(&staging);
        io_err(dest, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::Write;

    struct FakeFetcher {
        bodies: HashMap<String, Result<Vec<u8>, u16>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                bodies: HashMap::new(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn serve(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), Ok(body.to_vec()));
            self
        }

        fn fail(mut self, url: &str, status: u16) -> Self {
            self.bodies.insert(url.to_string(), Err(status));
            self
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.borrow_mut().push(url.to_string());
            match self.bodies.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: *status,
                }),
                None => Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn file_artifact(dir: &Path) -> Artifact {
        Artifact {
            name: "firmware".to_string(),
            url: "http://host/fw.elf".to_string(),
            local_path: dir.join("fw.elf"),
            kind: ArtifactKind::File,
        }
    }

    fn targz_bytes(file_name: &str, content: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, file_name, content).unwrap();
        let tar = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_ensure_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new().serve("http://host/fw.elf", b"elf-bytes");
        let artifact = file_artifact(dir.path());

        let path = ensure(&fetcher, &artifact).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"elf-bytes");
        assert_eq!(fetcher.call_count(), 1);

        // second call reuses the cached copy
        let again = ensure(&fetcher, &artifact).unwrap();
        assert_eq!(again, path);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[test]
    fn test_ensure_failed_fetch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new().fail("http://host/fw.elf", 503);
        let artifact = file_artifact(dir.path());

        let err = ensure(&fetcher, &artifact).unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert!(!artifact.local_path.exists());

        // a later run with a working remote succeeds
        let fetcher = FakeFetcher::new().serve("http://host/fw.elf", b"elf-bytes");
        ensure(&fetcher, &artifact).unwrap();
        assert!(artifact.local_path.exists());
    }

    #[test]
    fn test_ensure_extracts_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = targz_bytes("JLinkExe", b"#!probe");
        let fetcher = FakeFetcher::new().serve("http://host/jlink.tar.gz", &archive);
        let artifact = Artifact {
            name: "jlink tools".to_string(),
            url: "http://host/jlink.tar.gz".to_string(),
            local_path: dir.path().join("jlink"),
            kind: ArtifactKind::TarGz,
        };

        let path = ensure(&fetcher, &artifact).unwrap();
        assert!(path.is_dir());
        assert_eq!(fs::read(path.join("JLinkExe")).unwrap(), b"#!probe");

        ensure(&fetcher, &artifact).unwrap();
        assert_eq!(fetcher.call_count(), 1);
    }

    #[test]
    fn test_ensure_corrupt_archive_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::new().serve("http://host/jlink.tar.gz", b"not gzip at all");
        let artifact = Artifact {
            name: "jlink tools".to_string(),
            url: "http://host/jlink.tar.gz".to_string(),
            local_path: dir.path().join("jlink"),
            kind: ArtifactKind::TarGz,
        };

        let err = ensure(&fetcher, &artifact).unwrap_err();
        assert!(matches!(err, FetchError::Extract { .. }));
        assert!(!artifact.local_path.exists());
    }

    #[test]
    fn test_fetch_offsets() {
        let fetcher = FakeFetcher::new().serve(
            "http://host/xg24_ek2703a.offsets.json",
            br#"{"key_offset": 8192, "utc_offset": 8224}"#,
        );
        let offsets = fetch_offsets(&fetcher, "http://host/xg24_ek2703a.offsets.json").unwrap();
        assert_eq!(offsets.key_offset, 0x2000);
        assert_eq!(offsets.utc_offset, 0x2020);
    }

    #[test]
    fn test_fetch_offsets_malformed() {
        let fetcher = FakeFetcher::new().serve("http://host/meta.json", b"{\"key_offset\": true}");
        let err = fetch_offsets(&fetcher, "http://host/meta.json").unwrap_err();
        assert!(matches!(err, FetchError::Metadata { .. }));
    }
}
