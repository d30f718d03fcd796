//! Loading secondary images and watermark assets.
//!
//! Boolean operands and joined channels reference other images by URL or by
//! a path relative to the local image root. [`RoutingFetcher`] sends
//! `http://`/`https://` references to [`HttpFetcher`] and everything else to
//! [`FsFetcher`]. Watermarks come from a flat directory of named files, see
//! [`AssetStore`].

use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("empty image reference")]
    EmptyReference,
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}")]
    Status { status: u16 },
}

/// Fetches the raw bytes of a secondary image by reference.
pub trait SecondaryFetcher: Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reject references that would escape the root they are resolved against.
pub(crate) fn relative_path(reference: &str) -> Result<PathBuf, FetchError> {
    let trimmed = reference.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(FetchError::EmptyReference);
    }
    let path = Path::new(trimmed);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(FetchError::InvalidReference(reference.to_string()));
    }
    Ok(path.to_path_buf())
}

/// Reads secondary images from a local directory.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SecondaryFetcher for FsFetcher {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(relative_path(reference)?);
        log::debug!("reading secondary image {}", path.display());
        std::fs::read(&path).map_err(|source| FetchError::Io { path, source })
    }
}

/// Downloads secondary images with a bounded timeout.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl SecondaryFetcher for HttpFetcher {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let url = url::Url::parse(reference)
            .map_err(|_| FetchError::InvalidReference(reference.to_string()))?;
        log::debug!("downloading secondary image {url}");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|e| self.map_reqwest_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(|e| self.map_reqwest_error(e))?;
        Ok(bytes.to_vec())
    }
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Dispatches on the reference scheme.
pub struct RoutingFetcher<L = FsFetcher, R = HttpFetcher> {
    local: L,
    remote: R,
}

impl<L: SecondaryFetcher, R: SecondaryFetcher> RoutingFetcher<L, R> {
    pub fn new(local: L, remote: R) -> Self {
        Self { local, remote }
    }
}

impl<L: SecondaryFetcher, R: SecondaryFetcher> SecondaryFetcher for RoutingFetcher<L, R> {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        if reference.trim().is_empty() {
            return Err(FetchError::EmptyReference);
        }
        if is_remote(reference) {
            self.remote.fetch(reference.trim())
        } else {
            self.local.fetch(reference)
        }
    }
}

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("invalid asset name '{0}'")]
    InvalidName(String),
    #[error("asset '{name}' unavailable: {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
}

/// Flat directory of named watermark files.
#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read an asset by bare file name; separators and `..` are refused.
    pub fn load(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        if name.is_empty() || name == "." || name.contains(['/', '\\']) || name.contains("..") {
            return Err(AssetError::InvalidName(name.to_string()));
        }
        std::fs::read(self.dir.join(name)).map_err(|source| AssetError::Io {
            name: name.to_string(),
            source,
        })
    }
}
