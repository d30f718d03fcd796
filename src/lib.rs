//! # pixelrelay
//!
//! On-the-fly image transformation driven by URL query parameters. A request
//! names a stored original by path and describes edits in its query string;
//! the response is the edited, re-encoded image.
//!
//! # Architecture: Compile, Then Execute
//!
//! A query is compiled into a typed edit description before any pixel is
//! touched:
//!
//! ```text
//! query string ──▶ RawParams ──▶ EditSpec ──▶ Vec<Step> ──▶ engine ──▶ bytes
//!                 (coercion)    (builder)     (plan)     (executor)
//! ```
//!
//! - **Coercion never fails.** Malformed values become unset or fall back to
//!   their defaults, so a typo in one parameter does not sink the request.
//! - **Planning is where arguments are checked.** Colours, fit modes, matrix
//!   shapes and channel names are parsed once, into [`pipeline::Step`]s.
//! - **Execution order is fixed.** Resize, then operations, then colour,
//!   then channel, then compositing, then encode. Query order is irrelevant.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`edits`] | Parameter names, coercion, [`edits::EditSpec`] building and encoder option resolution |
//! | [`pipeline`] | Fixed-order plan and [`pipeline::PipelineExecutor`] |
//! | [`imaging`] | Engine traits, engine-facing parameter types, and the pure-Rust engine |
//! | [`fetch`] | Secondary images (filesystem / HTTP) and watermark assets |
//! | [`service`] | Storage, path filtering, the GET flow and failure payloads |
//! | [`config`] | `pixelrelay.toml` loading, environment overrides, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Pure-Rust Imaging
//!
//! The engine is [`imaging::RustBackend`], built on the `image` crate. No
//! libvips, no ImageMagick: the binary is self-contained. The pipeline only
//! talks to the [`imaging::ImageEngine`] trait, so tests run against a
//! recording mock and another engine can be slotted in.

pub mod config;
pub mod edits;
pub mod fetch;
pub mod imaging;
pub mod output;
pub mod pipeline;
pub mod service;

#[cfg(test)]
pub(crate) mod test_helpers;
