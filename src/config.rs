//! Service configuration module.
//!
//! Handles loading, validating, and layering the service configuration.
//! Three layers are applied in order:
//!
//! ```text
//! stock defaults  →  pixelrelay.toml  →  environment variables
//! ```
//!
//! ## Config File
//!
//! Place `pixelrelay.toml` in the working directory (or pass `--config-dir`):
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! default_quality = 70
//! supported_formats = ["jpeg", "png", "webp", "avif", "tiff", "gif"]
//! verbose_errors = true
//! # default_cache_control = "public, max-age=31536000"
//! storage_root = "images"
//! assets_dir = "assets"
//! ignore = []
//! valid_path_regex = ".*"
//! max_pixels = 268402689
//!
//! [fetch]
//! timeout_secs = 10
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! ## Environment Overrides
//!
//! | Variable | Field | Parsing |
//! |---|---|---|
//! | `DEFAULT_QUALITY` | `default_quality` | leading integer |
//! | `ALLOW_VERBOSE_ERRORS` | `verbose_errors` | `true`/`false`, anything else is false |
//! | `DEFAULT_CACHE_CONTROL` | `default_cache_control` | empty unsets |
//! | `SLS_IGNORE` | `ignore` | comma-separated |
//! | `SLS_VALID_PATH_REGEX` | `valid_path_regex` | regex |

use crate::edits::coerce::integer_prefix;
use crate::imaging::rust_backend::DEFAULT_MAX_PIXELS;
use crate::imaging::Format;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const CONFIG_FILE: &str = "pixelrelay.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Process-wide settings, loaded once at startup and shared read-only.
///
/// All fields have sensible defaults. Config files need only specify the
/// values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Quality used when none is requested, or when the request exceeds 70.
    pub default_quality: u32,
    /// Output formats a request may ask for with `fm`.
    pub supported_formats: Vec<Format>,
    /// Include underlying error messages in failure payloads.
    pub verbose_errors: bool,
    /// `Cache-Control` sent when the stored object carries none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_cache_control: Option<String>,
    /// Directory the original images are read from.
    pub storage_root: String,
    /// Directory holding watermark assets.
    pub assets_dir: String,
    /// Keys answered with an empty 404.
    pub ignore: Vec<String>,
    /// Keys not matching this pattern are answered with an empty 404.
    pub valid_path_regex: String,
    /// Largest canvas, in pixels, any edit may produce.
    pub max_pixels: u64,
    pub fetch: FetchConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_quality: 70,
            supported_formats: vec![
                Format::Jpeg,
                Format::Png,
                Format::Webp,
                Format::Avif,
                Format::Tiff,
                Format::Gif,
            ],
            verbose_errors: true,
            default_cache_control: None,
            storage_root: "images".to_string(),
            assets_dir: "assets".to_string(),
            ignore: Vec::new(),
            valid_path_regex: ".*".to_string(),
            max_pixels: DEFAULT_MAX_PIXELS,
            fetch: FetchConfig::default(),
        }
    }
}

/// Secondary image download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Per-request timeout for HTTP(S) secondary images.
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.default_quality) {
            return Err(ConfigError::Validation(
                "default_quality must be 1-100".into(),
            ));
        }
        if self.supported_formats.is_empty() {
            return Err(ConfigError::Validation(
                "supported_formats must not be empty".into(),
            ));
        }
        if self.max_pixels == 0 {
            return Err(ConfigError::Validation("max_pixels must be non-zero".into()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be non-zero".into(),
            ));
        }
        regex::Regex::new(&self.valid_path_regex).map_err(|e| {
            ConfigError::Validation(format!("valid_path_regex is not a valid regex: {e}"))
        })?;
        Ok(())
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("DEFAULT_QUALITY") {
            let quality = integer_prefix(&value)
                .and_then(|q| u32::try_from(q).ok())
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "DEFAULT_QUALITY must be a non-negative integer, got '{value}'"
                    ))
                })?;
            self.default_quality = quality;
        }
        if let Some(value) = lookup("ALLOW_VERBOSE_ERRORS") {
            self.verbose_errors = matches!(
                serde_json::from_str::<serde_json::Value>(&value.to_lowercase()),
                Ok(serde_json::Value::Bool(true))
            );
        }
        if let Some(value) = lookup("DEFAULT_CACHE_CONTROL") {
            self.default_cache_control = (!value.is_empty()).then_some(value);
        }
        if let Some(value) = lookup("SLS_IGNORE") {
            self.ignore = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup("SLS_VALID_PATH_REGEX") {
            self.valid_path_regex = value;
        }
        Ok(self)
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ServiceConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `pixelrelay.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the full configuration: stock defaults, the file in `dir`, then the
/// process environment.
pub fn load_config(dir: &Path) -> Result<ServiceConfig, ConfigError> {
    load_config_with_env(dir, |key| std::env::var(key).ok())
}

pub fn load_config_with_env(
    dir: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    let config = resolve_config(base, overlay)?.with_env_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `pixelrelay.toml` with all keys.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pixelrelay configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Environment variables override this file:
#   DEFAULT_QUALITY, ALLOW_VERBOSE_ERRORS, DEFAULT_CACHE_CONTROL,
#   SLS_IGNORE (comma-separated), SLS_VALID_PATH_REGEX
#
# Unknown keys will cause an error.

# Quality used when a request sets none. Requests above 70 also fall back
# to this value.
default_quality = 70

# Formats a request may select with `fm`. Anything else keeps the source
# format.
supported_formats = ["jpeg", "png", "webp", "avif", "tiff", "gif"]

# Include underlying error messages in failure payloads.
verbose_errors = true

# Cache-Control header for responses whose stored object has none.
# default_cache_control = "public, max-age=31536000"

# Directory original images are read from.
storage_root = "images"

# Directory holding watermark images referenced by `wm`.
assets_dir = "assets"

# Keys answered with an empty 404, e.g. ["favicon.ico"].
ignore = []

# Keys that do not match this pattern are answered with an empty 404.
valid_path_regex = ".*"

# Edits that would produce a larger canvas (extend, affine, rotate,
# contain) fail instead of allocating it.
max_pixels = 268402689

# ---------------------------------------------------------------------------
# Secondary images (boolean operands, joined channels)
# ---------------------------------------------------------------------------
[fetch]
# Timeout for HTTP(S) downloads, in seconds.
timeout_secs = 10
"##
}
