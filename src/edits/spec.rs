//! The validated edit description for one request.
//!
//! An [`EditSpec`] is built fresh per request by cloning the defaults
//! template and overlaying the request's parameters. Every field is either a
//! coerced value or unset (`None` / `false`). Secondary-image fields hold the
//! reference only; fetching happens in the pipeline.

use crate::imaging::{ClaheParams, ConvolveKernel, Format, ModulateParams, Region, SharpenParams};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EditSpec {
    pub resize: ResizeEdits,
    pub operations: OperationEdits,
    pub color: ColorEdits,
    pub channel: ChannelEdits,
    pub compositing: CompositingEdits,
    pub output: OutputEdits,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResizeEdits {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Option<String>,
    pub position: Option<String>,
    pub background: Option<String>,
    pub kernel: Option<String>,
    pub crop_before: Option<Region>,
    pub crop_after: Option<Region>,
    pub extend: Option<ExtendRequest>,
    pub trim: Option<u32>,
}

/// Edge padding as requested; `background` defaults to the resize background.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendRequest {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
    pub background: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationEdits {
    pub rotate: Option<i64>,
    pub flip: bool,
    pub flop: bool,
    pub affine: Option<Vec<f64>>,
    pub affine_background: String,
    pub affine_interpolator: String,
    pub sharpen: Option<SharpenParams>,
    pub median: Option<u32>,
    pub blur: Option<f64>,
    pub flatten: Option<String>,
    pub gamma: Option<Vec<f64>>,
    pub negate: bool,
    pub normalize: bool,
    pub clahe: Option<ClaheParams>,
    pub convolve: Option<ConvolveKernel>,
    pub threshold: Option<u32>,
    pub boolean: Option<BooleanRequest>,
    pub linear: Option<Vec<f64>>,
    pub recomb: Option<Vec<Vec<f64>>>,
    pub modulate: Option<ModulateParams>,
}

impl Default for OperationEdits {
    fn default() -> Self {
        Self {
            rotate: None,
            flip: false,
            flop: false,
            affine: None,
            affine_background: "#000000".into(),
            affine_interpolator: "bicubic".into(),
            sharpen: None,
            median: None,
            blur: None,
            flatten: None,
            gamma: None,
            negate: false,
            normalize: false,
            clahe: None,
            convolve: None,
            threshold: None,
            boolean: None,
            linear: None,
            recomb: None,
            modulate: None,
        }
    }
}

/// Boolean combination with an image fetched from `source`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BooleanRequest {
    pub operator: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ColorEdits {
    pub tint: Option<TintRequest>,
    pub grayscale: bool,
    pub pipeline_colourspace: Option<String>,
    pub colourspace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TintRequest {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChannelEdits {
    pub remove_alpha: bool,
    pub ensure_alpha: Option<f64>,
    pub extract_channel: Option<String>,
    pub join_channels: Option<Vec<String>>,
    pub band_bool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositingEdits {
    pub watermark: Option<String>,
    pub gravity: String,
}

impl Default for CompositingEdits {
    fn default() -> Self {
        Self {
            watermark: None,
            gravity: "southeast".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputEdits {
    pub format: Format,
    /// Explicitly requested quality; `None` resolves to the configured default.
    pub quality: Option<u32>,
    pub lossless: bool,
}

impl Default for OutputEdits {
    fn default() -> Self {
        Self {
            format: Format::Jpeg,
            quality: None,
            lossless: false,
        }
    }
}
