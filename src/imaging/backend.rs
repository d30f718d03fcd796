//! Image engine traits and shared types.
//!
//! An [`ImageBackend`] decodes bytes into an engine-owned image handle. The
//! handle implements [`ImageEngine`]: one method per transformation the
//! pipeline can request, plus a consuming [`ImageEngine::encode`]. Every
//! method either applies its operation or rejects its arguments with
//! [`BackendError::Rejected`]; the pipeline aborts on the first rejection.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust on top of the
//! `image` crate. Tests use the recording mock in this module.

use super::params::{
    AffineParams, Anchor, BooleanOperator, ClaheParams, Color, Colourspace, ConvolveKernel,
    EncoderOptions, ExtendParams, Format, ModulateParams, Region, ResizeParams, SharpenParams,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("Encoding to {format} failed: {reason}")]
    Encode { format: Format, reason: String },
}

impl BackendError {
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            reason: reason.into(),
        }
    }
}

/// Metadata read from a decoded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    pub format: Format,
    /// Encoded size of the source in bytes.
    pub size: usize,
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
}

/// Output of a successful encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

/// Decodes raw bytes into engine handles.
///
/// Secondary images (boolean operands, joined channels, watermarks) are
/// decoded through the same backend so they share the handle type.
pub trait ImageBackend: Sync {
    type Image: ImageEngine;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Image, BackendError>;
}

/// A decoded image, exclusively owned by one request.
pub trait ImageEngine: Sized + Send {
    fn metadata(&self) -> SourceMetadata;

    // Resize domain
    fn crop(&mut self, region: Region) -> Result<(), BackendError>;
    fn resize(&mut self, params: &ResizeParams) -> Result<(), BackendError>;
    fn extend(&mut self, params: &ExtendParams) -> Result<(), BackendError>;
    fn trim(&mut self, threshold: u32) -> Result<(), BackendError>;

    // Operation domain
    fn rotate(&mut self, degrees: i64, background: Color) -> Result<(), BackendError>;
    fn flip(&mut self) -> Result<(), BackendError>;
    fn flop(&mut self) -> Result<(), BackendError>;
    fn affine(&mut self, params: &AffineParams) -> Result<(), BackendError>;
    fn sharpen(&mut self, params: &SharpenParams) -> Result<(), BackendError>;
    fn median(&mut self, size: u32) -> Result<(), BackendError>;
    fn blur(&mut self, sigma: f64) -> Result<(), BackendError>;
    fn flatten(&mut self, background: Color) -> Result<(), BackendError>;
    fn gamma(&mut self, gamma: f64, gamma_out: Option<f64>) -> Result<(), BackendError>;
    fn negate(&mut self, alpha: bool) -> Result<(), BackendError>;
    fn normalize(&mut self) -> Result<(), BackendError>;
    fn clahe(&mut self, params: &ClaheParams) -> Result<(), BackendError>;
    fn convolve(&mut self, kernel: &ConvolveKernel) -> Result<(), BackendError>;
    fn threshold(&mut self, level: u32) -> Result<(), BackendError>;
    fn boolean(&mut self, operand: &Self, operator: BooleanOperator) -> Result<(), BackendError>;
    fn linear(&mut self, a: f64, b: f64) -> Result<(), BackendError>;
    fn recomb(&mut self, matrix: &[[f64; 3]; 3]) -> Result<(), BackendError>;
    fn modulate(&mut self, params: &ModulateParams) -> Result<(), BackendError>;

    // Color domain
    fn tint(&mut self, color: Color) -> Result<(), BackendError>;
    fn grayscale(&mut self) -> Result<(), BackendError>;
    fn pipeline_colourspace(&mut self, space: Colourspace) -> Result<(), BackendError>;
    fn to_colourspace(&mut self, space: Colourspace) -> Result<(), BackendError>;

    // Channel domain
    fn remove_alpha(&mut self) -> Result<(), BackendError>;
    fn ensure_alpha(&mut self, alpha: f64) -> Result<(), BackendError>;
    fn extract_channel(&mut self, channel: usize) -> Result<(), BackendError>;
    fn join_channels(&mut self, others: &[Self]) -> Result<(), BackendError>;
    fn band_bool(&mut self, operator: BooleanOperator) -> Result<(), BackendError>;

    // Compositing domain
    fn composite(&mut self, overlay: &Self, gravity: Anchor) -> Result<(), BackendError>;

    /// Encode the final image, consuming the handle.
    fn encode(self, format: Format, options: &EncoderOptions) -> Result<Encoded, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{FormatFlags, Quality};
    use std::sync::{Arc, Mutex};

    /// Mock backend that records operations without executing them.
    ///
    /// Bytes are treated as a UTF-8 label so tests can tell the source image
    /// from fetched operands. The bytes `corrupt` fail to decode.
    pub struct MockBackend {
        pub metadata: SourceMetadata,
        /// Operation name to reject, e.g. `"affine"`.
        pub reject: Option<&'static str>,
        pub operations: Arc<Mutex<Vec<RecordedOp>>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Decode(String),
        Resize { width: Option<u32>, height: Option<u32> },
        Rotate(i64),
        Boolean { operand: String, operator: BooleanOperator },
        EnsureAlpha(f64),
        JoinChannels(Vec<String>),
        Composite { overlay: String, gravity: Anchor },
        Encode { format: Format, quality: u32, flags: FormatFlags },
        /// Any other operation, by name.
        Op(&'static str),
    }

    pub struct MockImage {
        pub label: String,
        metadata: SourceMetadata,
        reject: Option<&'static str>,
        log: Arc<Mutex<Vec<RecordedOp>>>,
    }

    pub fn metadata(format: Format, has_alpha: bool) -> SourceMetadata {
        SourceMetadata {
            format,
            size: 1000,
            width: 1600,
            height: 1200,
            has_alpha,
        }
    }

    impl MockBackend {
        pub fn new(metadata: SourceMetadata) -> Self {
            Self {
                metadata,
                reject: None,
                operations: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn rejecting(metadata: SourceMetadata, operation: &'static str) -> Self {
            Self {
                reject: Some(operation),
                ..Self::new(metadata)
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        /// Recorded operations excluding decodes.
        pub fn applied(&self) -> Vec<RecordedOp> {
            self.get_operations()
                .into_iter()
                .filter(|op| !matches!(op, RecordedOp::Decode(_)))
                .collect()
        }
    }

    impl ImageBackend for MockBackend {
        type Image = MockImage;

        fn decode(&self, bytes: &[u8]) -> Result<MockImage, BackendError> {
            let label = String::from_utf8_lossy(bytes).to_string();
            if label == "corrupt" {
                return Err(BackendError::Decode("corrupt input".into()));
            }
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Decode(label.clone()));
            Ok(MockImage {
                label,
                metadata: SourceMetadata {
                    size: bytes.len(),
                    ..self.metadata
                },
                reject: self.reject,
                log: Arc::clone(&self.operations),
            })
        }
    }

    impl MockImage {
        fn record(&self, op: RecordedOp, name: &'static str) -> Result<(), BackendError> {
            if self.reject == Some(name) {
                return Err(BackendError::rejected(name, "mock rejection"));
            }
            self.log.lock().unwrap().push(op);
            Ok(())
        }

        fn named(&self, name: &'static str) -> Result<(), BackendError> {
            self.record(RecordedOp::Op(name), name)
        }
    }

    impl ImageEngine for MockImage {
        fn metadata(&self) -> SourceMetadata {
            self.metadata
        }

        fn crop(&mut self, _region: Region) -> Result<(), BackendError> {
            self.named("crop")
        }

        fn resize(&mut self, params: &ResizeParams) -> Result<(), BackendError> {
            self.record(
                RecordedOp::Resize {
                    width: params.width,
                    height: params.height,
                },
                "resize",
            )
        }

        fn extend(&mut self, _params: &ExtendParams) -> Result<(), BackendError> {
            self.named("extend")
        }

        fn trim(&mut self, _threshold: u32) -> Result<(), BackendError> {
            self.named("trim")
        }

        fn rotate(&mut self, degrees: i64, _background: Color) -> Result<(), BackendError> {
            self.record(RecordedOp::Rotate(degrees), "rotate")
        }

        fn flip(&mut self) -> Result<(), BackendError> {
            self.named("flip")
        }

        fn flop(&mut self) -> Result<(), BackendError> {
            self.named("flop")
        }

        fn affine(&mut self, _params: &AffineParams) -> Result<(), BackendError> {
            self.named("affine")
        }

        fn sharpen(&mut self, _params: &SharpenParams) -> Result<(), BackendError> {
            self.named("sharpen")
        }

        fn median(&mut self, _size: u32) -> Result<(), BackendError> {
            self.named("median")
        }

        fn blur(&mut self, _sigma: f64) -> Result<(), BackendError> {
            self.named("blur")
        }

        fn flatten(&mut self, _background: Color) -> Result<(), BackendError> {
            self.named("flatten")
        }

        fn gamma(&mut self, _gamma: f64, _gamma_out: Option<f64>) -> Result<(), BackendError> {
            self.named("gamma")
        }

        fn negate(&mut self, _alpha: bool) -> Result<(), BackendError> {
            self.named("negate")
        }

        fn normalize(&mut self) -> Result<(), BackendError> {
            self.named("normalize")
        }

        fn clahe(&mut self, _params: &ClaheParams) -> Result<(), BackendError> {
            self.named("clahe")
        }

        fn convolve(&mut self, _kernel: &ConvolveKernel) -> Result<(), BackendError> {
            self.named("convolve")
        }

        fn threshold(&mut self, _level: u32) -> Result<(), BackendError> {
            self.named("threshold")
        }

        fn boolean(&mut self, operand: &Self, operator: BooleanOperator) -> Result<(), BackendError> {
            self.record(
                RecordedOp::Boolean {
                    operand: operand.label.clone(),
                    operator,
                },
                "boolean",
            )
        }

        fn linear(&mut self, _a: f64, _b: f64) -> Result<(), BackendError> {
            self.named("linear")
        }

        fn recomb(&mut self, _matrix: &[[f64; 3]; 3]) -> Result<(), BackendError> {
            self.named("recomb")
        }

        fn modulate(&mut self, _params: &ModulateParams) -> Result<(), BackendError> {
            self.named("modulate")
        }

        fn tint(&mut self, _color: Color) -> Result<(), BackendError> {
            self.named("tint")
        }

        fn grayscale(&mut self) -> Result<(), BackendError> {
            self.named("grayscale")
        }

        fn pipeline_colourspace(&mut self, _space: Colourspace) -> Result<(), BackendError> {
            self.named("pipeline_colourspace")
        }

        fn to_colourspace(&mut self, _space: Colourspace) -> Result<(), BackendError> {
            self.named("to_colourspace")
        }

        fn remove_alpha(&mut self) -> Result<(), BackendError> {
            self.named("remove_alpha")
        }

        fn ensure_alpha(&mut self, alpha: f64) -> Result<(), BackendError> {
            self.record(RecordedOp::EnsureAlpha(alpha), "ensure_alpha")
        }

        fn extract_channel(&mut self, _channel: usize) -> Result<(), BackendError> {
            self.named("extract_channel")
        }

        fn join_channels(&mut self, others: &[Self]) -> Result<(), BackendError> {
            self.record(
                RecordedOp::JoinChannels(others.iter().map(|o| o.label.clone()).collect()),
                "join_channels",
            )
        }

        fn band_bool(&mut self, _operator: BooleanOperator) -> Result<(), BackendError> {
            self.named("band_bool")
        }

        fn composite(&mut self, overlay: &Self, gravity: Anchor) -> Result<(), BackendError> {
            self.record(
                RecordedOp::Composite {
                    overlay: overlay.label.clone(),
                    gravity,
                },
                "composite",
            )
        }

        fn encode(self, format: Format, options: &EncoderOptions) -> Result<Encoded, BackendError> {
            self.record(
                RecordedOp::Encode {
                    format,
                    quality: options.quality.value(),
                    flags: options.flags,
                },
                "encode",
            )?;
            Ok(Encoded {
                bytes: format!("{}.{}", self.label, format).into_bytes(),
                format,
                width: self.metadata.width,
                height: self.metadata.height,
            })
        }
    }

    #[test]
    fn mock_decodes_label_and_records() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let image = backend.decode(b"source").unwrap();
        assert_eq!(image.label, "source");
        assert_eq!(image.metadata().size, 6);
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Decode("source".into())]
        );
    }

    #[test]
    fn mock_rejects_configured_operation() {
        let backend = MockBackend::rejecting(metadata(Format::Png, true), "flip");
        let mut image = backend.decode(b"source").unwrap();
        let err = image.flip().unwrap_err();
        assert!(matches!(err, BackendError::Rejected { operation: "flip", .. }));
        assert!(backend.applied().is_empty());
    }

    #[test]
    fn mock_corrupt_bytes_fail_to_decode() {
        let backend = MockBackend::new(metadata(Format::Png, false));
        assert!(matches!(
            backend.decode(b"corrupt"),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn mock_records_encode_options() {
        let backend = MockBackend::new(metadata(Format::Png, false));
        let image = backend.decode(b"source").unwrap();
        let options = EncoderOptions {
            quality: Quality(60),
            effort: 1,
            flags: FormatFlags::Lossless(true),
        };
        let encoded = image.encode(Format::Webp, &options).unwrap();
        assert_eq!(encoded.bytes, b"source.webp");
        assert_eq!(
            backend.applied(),
            vec![RecordedOp::Encode {
                format: Format::Webp,
                quality: 60,
                flags: FormatFlags::Lossless(true),
            }]
        );
    }
}
