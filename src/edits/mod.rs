//! Query parameters → validated edits → encoder options.
//!
//! ```text
//! RawParams ──coerce──▶ EditSpecBuilder ──▶ EditSpec ──▶ OutputOptionsResolver ──▶ EncoderOptions
//! ```
//!
//! Nothing in this module fails: malformed input is absorbed into defaults.
//! Rejections only happen later, when the pipeline hands values to the engine.

pub mod builder;
pub mod coerce;
pub mod encoder;
pub mod param;
pub mod spec;

pub use builder::EditSpecBuilder;
pub use coerce::{Coerced, coerce};
pub use encoder::{OutputOptionsResolver, QUALITY_CEILING};
pub use param::{ParamKind, ParamName, RawParams};
pub use spec::{
    BooleanRequest, ChannelEdits, ColorEdits, CompositingEdits, EditSpec, ExtendRequest,
    OperationEdits, OutputEdits, ResizeEdits, TintRequest,
};
