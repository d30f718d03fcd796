//! Image processing: pure Rust, no system libraries.
//!
//! | Concern | Where |
//! |---|---|
//! | **Decode / encode** | `image` codecs behind [`RustBackend`] |
//! | **Resize, crop, extend, rotate** | [`calculations`] geometry + `image` resampling |
//! | **Tone, colour and channel kernels** | `filters` (8-bit RGBA buffers) |
//!
//! The module is split into:
//! - **Parameters**: Data structures describing image operations
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Backend**: [`ImageBackend`] / [`ImageEngine`] traits + [`RustBackend`]

pub mod backend;
pub mod calculations;
mod filters;
pub mod params;
pub mod rust_backend;

pub use backend::{BackendError, Encoded, ImageBackend, ImageEngine, SourceMetadata};
pub use params::{
    AffineParams, Anchor, BooleanOperator, ClaheParams, Color, Colourspace, ConvolveKernel,
    EncoderOptions, ExtendParams, Fit, Format, FormatFlags, Interpolator, Kernel, ModulateParams,
    Quality, Region, ResizeParams, SharpenParams,
};
pub use rust_backend::RustBackend;
