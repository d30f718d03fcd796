//! Request plumbing around the pipeline.
//!
//! A GET for `path?query` runs through:
//!
//! ```text
//! path filter ──▶ parse_image_key ──▶ StorageReader::get
//!     │                                   │
//!  404 (empty)               no query ──▶ original bytes
//!                                         │
//!              decode ──▶ EditSpecBuilder ──▶ OutputOptionsResolver ──▶ PipelineExecutor
//! ```
//!
//! Every failure becomes a [`FailurePayload`] JSON body. Storage misses are
//! `404 not-found`; everything else is `500 internal-error`.

use crate::config::{ConfigError, ServiceConfig};
use crate::edits::{EditSpec, EditSpecBuilder, OutputOptionsResolver, RawParams};
use crate::fetch::{
    AssetStore, FetchError, FsFetcher, HttpFetcher, RoutingFetcher, SecondaryFetcher,
    relative_path,
};
use crate::imaging::{
    BackendError, EncoderOptions, Format, ImageBackend, ImageEngine, RustBackend, SourceMetadata,
};
use crate::pipeline::{PipelineError, PipelineExecutor, Step, plan};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const JSON: &str = "application/json";
const NOT_FOUND_MESSAGE: &str = "No image exists under the requested path";
const GENERIC_MESSAGE: &str = "Internal error";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no image stored under '{0}'")]
    NotFound(String),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An original image as held in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Supplies original image bytes by key.
pub trait StorageReader: Sync {
    fn get(&self, key: &str) -> Result<StoredObject, StorageError>;
}

/// Originals stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageReader for FsStorage {
    fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let relative = relative_path(key).map_err(|e| match e {
            FetchError::EmptyReference => StorageError::NotFound(key.to_string()),
            _ => StorageError::InvalidKey(key.to_string()),
        })?;
        let path = self.root.join(relative);
        let bytes = std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io { path: path.clone(), source }
            }
        })?;
        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Format::from_str(&ext.to_ascii_lowercase()).ok())
            .map(|format| format.mime_type().to_string());
        Ok(StoredObject {
            bytes,
            content_type,
            cache_control: None,
        })
    }
}

/// Storage key for a request path: one leading and one trailing `/` are
/// stripped, then percent-escapes are decoded.
pub fn parse_image_key(path: &str) -> String {
    let key = path.strip_prefix('/').unwrap_or(path);
    let key = key.strip_suffix('/').unwrap_or(key);
    percent_decode_str(key).decode_utf8_lossy().into_owned()
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Decode(#[from] BackendError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ServiceError {
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Storage(StorageError::NotFound(_)) => 404,
            _ => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.status() {
            404 => "not-found",
            _ => "internal-error",
        }
    }
}

/// JSON body returned for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailurePayload {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl FailurePayload {
    pub fn from_error(error: &ServiceError, verbose: bool) -> Self {
        let message = match error {
            ServiceError::Storage(StorageError::NotFound(_)) => NOT_FOUND_MESSAGE.to_string(),
            _ if verbose => error.to_string(),
            _ => GENERIC_MESSAGE.to_string(),
        };
        Self {
            status: error.status(),
            code: error.code(),
            message,
        }
    }
}

/// Everything a request would do, without doing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPlan {
    pub key: String,
    pub source: SourceMetadata,
    pub spec: EditSpec,
    pub options: EncoderOptions,
    pub steps: Vec<Step>,
}

/// What goes back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn skipped() -> Self {
        Self {
            status: 404,
            content_type: Some(JSON.to_string()),
            cache_control: None,
            body: Vec::new(),
        }
    }

    fn failure(payload: &FailurePayload) -> Self {
        Self {
            status: payload.status,
            content_type: Some(JSON.to_string()),
            cache_control: None,
            body: serde_json::to_vec(payload).unwrap_or_default(),
        }
    }
}

/// The GET handler: storage, engine, fetcher and per-process settings.
pub struct Service<B: ImageBackend, S: StorageReader> {
    config: ServiceConfig,
    backend: B,
    storage: S,
    fetcher: Box<dyn SecondaryFetcher>,
    assets: AssetStore,
    builder: EditSpecBuilder,
    resolver: OutputOptionsResolver,
    path_filter: Regex,
}

impl Service<RustBackend, FsStorage> {
    /// Pure-Rust engine over the configured storage root, with local and
    /// HTTP(S) secondary images.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ServiceError> {
        let root = PathBuf::from(&config.storage_root);
        let fetcher = RoutingFetcher::new(
            FsFetcher::new(&root),
            HttpFetcher::new(config.fetch.timeout_secs)?,
        );
        let backend = RustBackend::with_max_pixels(config.max_pixels);
        Self::new(config, backend, FsStorage::new(root), Box::new(fetcher))
    }
}

impl<B: ImageBackend, S: StorageReader> Service<B, S> {
    pub fn new(
        config: ServiceConfig,
        backend: B,
        storage: S,
        fetcher: Box<dyn SecondaryFetcher>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let path_filter = Regex::new(&config.valid_path_regex).map_err(|e| {
            ConfigError::Validation(format!("valid_path_regex is not a valid regex: {e}"))
        })?;
        Ok(Self {
            assets: AssetStore::new(&config.assets_dir),
            builder: EditSpecBuilder::new(EditSpec::default(), config.supported_formats.clone()),
            resolver: OutputOptionsResolver::new(config.default_quality),
            path_filter,
            config,
            backend,
            storage,
            fetcher,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn builder(&self) -> &EditSpecBuilder {
        &self.builder
    }

    /// Ignored keys and paths outside the valid-path pattern are not served.
    pub fn should_skip(&self, path: &str) -> bool {
        let key = path.strip_prefix('/').unwrap_or(path);
        self.config.ignore.iter().any(|ignored| ignored == key) || !self.path_filter.is_match(path)
    }

    /// Handle a GET. Never fails: errors become a JSON failure response.
    pub fn get(&self, path: &str, query: &str) -> Response {
        if self.should_skip(path) {
            log::debug!("skipping {path}");
            return Response::skipped();
        }
        match self.try_get(path, query) {
            Ok(response) => response,
            Err(e) => {
                log::error!("GET {path}: {e}");
                Response::failure(&FailurePayload::from_error(&e, self.config.verbose_errors))
            }
        }
    }

    /// The GET flow with errors surfaced.
    pub fn try_get(&self, path: &str, query: &str) -> Result<Response, ServiceError> {
        let key = parse_image_key(path);
        let object = self.storage.get(&key)?;

        let query = query.strip_prefix('?').unwrap_or(query);
        if query.is_empty() {
            log::debug!("{key}: no edits, serving original");
            let cache_control = object
                .cache_control
                .or_else(|| self.config.default_cache_control.clone());
            return Ok(Response {
                status: 200,
                content_type: object.content_type,
                cache_control,
                body: object.bytes,
            });
        }

        let image = self.backend.decode(&object.bytes)?;
        let metadata = image.metadata();
        let spec = self.builder.build(&RawParams::from_query(query), &metadata);
        let options = self.resolver.resolve(&spec.output);

        let processed = PipelineExecutor::new(&self.backend, self.fetcher.as_ref(), &self.assets)
            .execute(image, spec, &options, &metadata)?;

        if processed.metadata.content_length > metadata.size {
            log::warn!(
                "{key}: processed size of {} is bigger than the original size of {}",
                processed.metadata.content_length,
                metadata.size
            );
        }

        Ok(Response {
            status: 200,
            content_type: Some(processed.metadata.content_type.to_string()),
            cache_control: self.config.default_cache_control.clone(),
            body: processed.bytes,
        })
    }

    /// Decode the stored original and plan `query` against it.
    pub fn plan(&self, path: &str, query: &str) -> Result<RequestPlan, ServiceError> {
        let key = parse_image_key(path);
        let object = self.storage.get(&key)?;
        let source = self.backend.decode(&object.bytes)?.metadata();
        let query = query.strip_prefix('?').unwrap_or(query);
        let spec = self.builder.build(&RawParams::from_query(query), &source);
        let options = self.resolver.resolve(&spec.output);
        let steps = plan(&spec, &source)?;
        Ok(RequestPlan {
            key,
            source,
            spec,
            options,
            steps,
        })
    }
}
