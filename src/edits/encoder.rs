//! Output domain → encoder options.

use super::spec::OutputEdits;
use crate::imaging::{EncoderOptions, Format, FormatFlags, Quality};

/// Requested qualities above this are replaced by the configured default
/// rather than clamped.
pub const QUALITY_CEILING: u32 = 70;

/// PNG zlib level applied to every PNG output.
pub const PNG_COMPRESSION_LEVEL: u8 = 6;

/// Resolves [`OutputEdits`] into final [`EncoderOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptionsResolver {
    default_quality: u32,
}

impl OutputOptionsResolver {
    pub fn new(default_quality: u32) -> Self {
        Self { default_quality }
    }

    pub fn default_quality(&self) -> u32 {
        self.default_quality
    }

    pub fn resolve(&self, output: &OutputEdits) -> EncoderOptions {
        let desired = output.quality.unwrap_or(self.default_quality);
        let quality = if desired <= QUALITY_CEILING {
            desired
        } else {
            log::debug!(
                "quality {desired} above {QUALITY_CEILING}, using default {}",
                self.default_quality
            );
            self.default_quality
        };

        let flags = match output.format {
            Format::Png => FormatFlags::Png {
                compression_level: PNG_COMPRESSION_LEVEL,
                palette: true,
            },
            Format::Webp | Format::Avif => FormatFlags::Lossless(output.lossless),
            Format::Jpeg | Format::Tiff | Format::Gif | Format::Bmp => FormatFlags::None,
        };

        EncoderOptions {
            quality: Quality(quality),
            effort: 1,
            flags,
        }
    }
}
