//! Shared test utilities for the pixelrelay test suite.
//!
//! Provides synthetic in-memory images and a recording secondary-image
//! fetcher, so pipeline and engine tests need no fixtures on disk.
//!
//! # Usage
//!
//! ```text
//! use crate::test_helpers::*;
//!
//! let png = encode_png(&gradient_rgb(64, 48));
//! let fetcher = RecordingFetcher::failing_on("broken.png");
//! ```

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use crate::fetch::{FetchError, SecondaryFetcher};

// =========================================================================
// Synthetic images
// =========================================================================

/// Horizontal red / vertical green gradient, so crops and flips are visible.
pub fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

pub fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(rgba))
}

/// Encode any buffer as PNG bytes.
pub fn encode_png(image: &(impl Clone + Into<DynamicImage>)) -> Vec<u8> {
    let mut bytes = Vec::new();
    let dynamic: DynamicImage = image.clone().into();
    dynamic
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

// =========================================================================
// Secondary image fetcher
// =========================================================================

/// Fetcher that returns each reference's own text as the image bytes and
/// records what was asked for. Clones share the record.
///
/// Paired with the mock backend, the fetched image's label is the reference.
#[derive(Clone, Default)]
pub struct RecordingFetcher {
    fail_on: Option<String>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingFetcher {
    /// Fail with a 404 for `reference`, succeed for everything else.
    pub fn failing_on(reference: &str) -> Self {
        Self {
            fail_on: Some(reference.to_string()),
            ..Self::default()
        }
    }

    /// References fetched so far, in call order.
    pub fn references(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl SecondaryFetcher for RecordingFetcher {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        self.seen.lock().unwrap().push(reference.to_string());
        if self.fail_on.as_deref() == Some(reference) {
            return Err(FetchError::Status { status: 404 });
        }
        Ok(reference.as_bytes().to_vec())
    }
}
