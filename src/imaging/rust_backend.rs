//! Pure Rust image engine built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF, BMP) | `image::load_from_memory_with_format` |
//! | Resize | `DynamicImage::resize_exact` + crop/letterbox from [`calculations`](super::calculations) |
//! | Rotate (right angles), flip, flop, blur, unsharp mask, grayscale | `image` built-ins |
//! | Arbitrary rotate, affine, median, convolve, CLAHE, tone curves | [`filters`](super::filters) |
//! | Hue rotation | `image::imageops::huerotate` |
//! | Composite | `image::imageops::overlay` |
//! | Encode → JPEG / PNG / WebP / AVIF / TIFF / GIF / BMP | `image::codecs::*` |
//!
//! AVIF is encode-only: the `image` crate's `"avif"` feature ships the rav1e
//! encoder but no decoder, so AVIF sources fail to decode.

use super::backend::{BackendError, Encoded, ImageBackend, ImageEngine, SourceMetadata};
use super::calculations::{
    affine_bounds, anchor_offset, calculate_fit, canvas_bytes, rotation_matrix,
};
use super::filters;
use super::params::{
    AffineParams, Anchor, BooleanOperator, ClaheParams, Color, Colourspace, ConvolveKernel,
    EncoderOptions, ExtendParams, Fit, Format, FormatFlags, Interpolator, Kernel, ModulateParams,
    Region, ResizeParams, SharpenParams,
};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// Largest canvas any operation may allocate, in pixels (16383 x 16383).
pub const DEFAULT_MAX_PIXELS: u64 = 268_402_689;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    max_pixels: u64,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::with_max_pixels(DEFAULT_MAX_PIXELS)
    }

    /// Operations that would build a canvas larger than `max_pixels` are
    /// rejected instead of allocated.
    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self { max_pixels }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_format(bytes: &[u8]) -> Result<Format, BackendError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| BackendError::Decode(format!("Unrecognised image data: {e}")))?;
    match guessed {
        ImageFormat::Jpeg => Ok(Format::Jpeg),
        ImageFormat::Png => Ok(Format::Png),
        ImageFormat::WebP => Ok(Format::Webp),
        ImageFormat::Avif => Ok(Format::Avif),
        ImageFormat::Tiff => Ok(Format::Tiff),
        ImageFormat::Gif => Ok(Format::Gif),
        ImageFormat::Bmp => Ok(Format::Bmp),
        other => Err(BackendError::Decode(format!(
            "Unsupported source format: {other:?}"
        ))),
    }
}

fn image_format(format: Format) -> ImageFormat {
    match format {
        Format::Jpeg => ImageFormat::Jpeg,
        Format::Png => ImageFormat::Png,
        Format::Webp => ImageFormat::WebP,
        Format::Avif => ImageFormat::Avif,
        Format::Tiff => ImageFormat::Tiff,
        Format::Gif => ImageFormat::Gif,
        Format::Bmp => ImageFormat::Bmp,
    }
}

impl ImageBackend for RustBackend {
    type Image = RustImage;

    fn decode(&self, bytes: &[u8]) -> Result<RustImage, BackendError> {
        let format = detect_format(bytes)?;
        let image = image::load_from_memory_with_format(bytes, image_format(format))
            .map_err(|e| BackendError::Decode(format!("Failed to decode {format}: {e}")))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::Decode("Image has no pixels".into()));
        }
        Ok(RustImage {
            max_pixels: self.max_pixels,
            source_format: format,
            source_size: bytes.len(),
            image,
        })
    }
}

/// Channel layout of a decoded image, restored after RGBA-based kernels run.
#[derive(Debug, Clone, Copy)]
struct Layout {
    grey: bool,
    alpha: bool,
    wide: bool,
}

impl Layout {
    fn of(image: &DynamicImage) -> Self {
        let color = image.color();
        Self {
            grey: !color.has_color(),
            alpha: color.has_alpha(),
            wide: color.bytes_per_pixel() / color.channel_count() > 1,
        }
    }

    fn coloured(self) -> Self {
        Self {
            grey: false,
            ..self
        }
    }

    fn restore(self, image: DynamicImage) -> DynamicImage {
        match (self.grey, self.alpha, self.wide) {
            (true, false, false) => DynamicImage::ImageLuma8(image.to_luma8()),
            (true, true, false) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
            (false, false, false) => DynamicImage::ImageRgb8(image.to_rgb8()),
            (false, true, false) => DynamicImage::ImageRgba8(image.to_rgba8()),
            (true, false, true) => DynamicImage::ImageLuma16(image.to_luma16()),
            (true, true, true) => DynamicImage::ImageLumaA16(image.to_luma_alpha16()),
            (false, false, true) => DynamicImage::ImageRgb16(image.to_rgb16()),
            (false, true, true) => DynamicImage::ImageRgba16(image.to_rgba16()),
        }
    }
}

/// Split an image into 8-bit bands (1–4 depending on layout).
fn planes(image: &DynamicImage) -> Vec<Vec<u8>> {
    let count = image.color().channel_count() as usize;
    let raw = match count {
        1 => image.to_luma8().into_raw(),
        2 => image.to_luma_alpha8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        _ => image.to_rgba8().into_raw(),
    };
    let count = count.min(4);
    (0..count)
        .map(|c| raw.iter().skip(c).step_by(count).copied().collect())
        .collect()
}

/// Interleave 1–4 bands back into an image.
fn from_planes(width: u32, height: u32, bands: &[Vec<u8>]) -> Option<DynamicImage> {
    let pixels = (width as usize).checked_mul(height as usize)?;
    let mut raw = Vec::with_capacity(pixels.checked_mul(bands.len())?);
    for i in 0..pixels {
        for band in bands {
            raw.push(*band.get(i)?);
        }
    }
    match bands.len() {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(width, height, raw).map(DynamicImage::ImageLumaA8),
        3 => image::RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, raw).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

fn filter_type(kernel: Kernel) -> FilterType {
    match kernel {
        Kernel::Nearest => FilterType::Nearest,
        Kernel::Linear => FilterType::Triangle,
        Kernel::Cubic | Kernel::Mitchell => FilterType::CatmullRom,
        Kernel::Lanczos2 | Kernel::Lanczos3 => FilterType::Lanczos3,
    }
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// A decoded image owned by one request.
pub struct RustImage {
    image: DynamicImage,
    max_pixels: u64,
    source_format: Format,
    source_size: usize,
}

impl RustImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Refuse canvases beyond the pixel limit before allocating them.
    fn check_canvas(
        &self,
        operation: &'static str,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        match canvas_bytes(width, height, self.max_pixels) {
            Some(_) => Ok(()),
            None => Err(BackendError::rejected(
                operation,
                format!(
                    "{width}x{height} canvas exceeds the {} pixel limit",
                    self.max_pixels
                ),
            )),
        }
    }

    /// Run an RGBA kernel and convert back to the current layout.
    fn map_rgba(&mut self, f: impl FnOnce(&mut RgbaImage)) {
        self.map_rgba_into(Layout::of(&self.image), f);
    }

    fn map_rgba_into(&mut self, layout: Layout, f: impl FnOnce(&mut RgbaImage)) {
        let mut buffer = self.image.to_rgba8();
        f(&mut buffer);
        self.image = layout.restore(DynamicImage::ImageRgba8(buffer));
    }

    /// Replace the image with a freshly built canvas, keeping an alpha
    /// channel only when the fill colour is translucent.
    fn replace_with_canvas(&mut self, canvas: RgbaImage, fill: Color) {
        let mut layout = Layout::of(&self.image);
        layout.alpha |= fill.0[3] < 255;
        self.image = layout.restore(DynamicImage::ImageRgba8(canvas));
    }

    fn convert_colourspace(&mut self, space: Colourspace) {
        let layout = Layout::of(&self.image);
        self.image = match space {
            Colourspace::Srgb => Layout { wide: false, ..layout }.restore(self.image.clone()),
            Colourspace::Rgb16 => Layout {
                wide: true,
                grey: false,
                ..layout
            }
            .restore(self.image.clone()),
            Colourspace::BlackWhite => Layout {
                grey: true,
                ..layout
            }
            .restore(self.image.clone()),
        };
    }
}

impl ImageEngine for RustImage {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            format: self.source_format,
            size: self.source_size,
            width: self.image.width(),
            height: self.image.height(),
            has_alpha: self.image.color().has_alpha(),
        }
    }

    fn crop(&mut self, region: Region) -> Result<(), BackendError> {
        let (w, h) = self.dimensions();
        let fits = region.width > 0
            && region.height > 0
            && region.left as u64 + region.width as u64 <= w as u64
            && region.top as u64 + region.height as u64 <= h as u64;
        if !fits {
            return Err(BackendError::rejected(
                "crop",
                format!(
                    "region {}x{}+{}+{} outside {w}x{h} image",
                    region.width, region.height, region.left, region.top
                ),
            ));
        }
        self.image = self
            .image
            .crop_imm(region.left, region.top, region.width, region.height);
        Ok(())
    }

    fn resize(&mut self, params: &ResizeParams) -> Result<(), BackendError> {
        let source = self.dimensions();
        let plan = calculate_fit(source, params.width, params.height, params.fit);
        if plan.scaled == source && plan.canvas == source {
            return Ok(());
        }

        self.check_canvas("resize", plan.scaled.0, plan.scaled.1)?;
        let scaled = self
            .image
            .resize_exact(plan.scaled.0, plan.scaled.1, filter_type(params.kernel));

        match params.fit {
            Fit::Cover if plan.canvas != plan.scaled => {
                let (x, y) = anchor_offset(plan.scaled, plan.canvas, params.position);
                self.image = scaled.crop_imm(x as u32, y as u32, plan.canvas.0, plan.canvas.1);
            }
            Fit::Contain if plan.canvas != plan.scaled => {
                self.check_canvas("resize", plan.canvas.0, plan.canvas.1)?;
                let mut canvas =
                    RgbaImage::from_pixel(plan.canvas.0, plan.canvas.1, Rgba(params.background.0));
                let (x, y) = anchor_offset(plan.canvas, plan.scaled, params.position);
                image::imageops::overlay(&mut canvas, &scaled.to_rgba8(), x, y);
                self.replace_with_canvas(canvas, params.background);
            }
            _ => self.image = scaled,
        }
        Ok(())
    }

    fn extend(&mut self, params: &ExtendParams) -> Result<(), BackendError> {
        let (w, h) = self.dimensions();
        let new_w = w as u64 + params.left as u64 + params.right as u64;
        let new_h = h as u64 + params.top as u64 + params.bottom as u64;
        let (Ok(new_w), Ok(new_h)) = (u32::try_from(new_w), u32::try_from(new_h)) else {
            return Err(BackendError::rejected("extend", "resulting canvas too large"));
        };
        self.check_canvas("extend", new_w, new_h)?;
        let mut canvas = RgbaImage::from_pixel(new_w, new_h, Rgba(params.background.0));
        image::imageops::overlay(
            &mut canvas,
            &self.image.to_rgba8(),
            params.left as i64,
            params.top as i64,
        );
        self.replace_with_canvas(canvas, params.background);
        Ok(())
    }

    fn trim(&mut self, threshold: u32) -> Result<(), BackendError> {
        if let Some((x, y, w, h)) = filters::trim_bounds(&self.image.to_rgba8(), threshold) {
            self.image = self.image.crop_imm(x, y, w, h);
        }
        Ok(())
    }

    fn rotate(&mut self, degrees: i64, background: Color) -> Result<(), BackendError> {
        match degrees.rem_euclid(360) {
            0 => {}
            90 => self.image = self.image.rotate90(),
            180 => self.image = self.image.rotate180(),
            270 => self.image = self.image.rotate270(),
            _ => {
                return self.affine(&AffineParams {
                    matrix: rotation_matrix(degrees),
                    background,
                    interpolator: Interpolator::Bilinear,
                });
            }
        }
        Ok(())
    }

    fn flip(&mut self) -> Result<(), BackendError> {
        self.image = self.image.flipv();
        Ok(())
    }

    fn flop(&mut self) -> Result<(), BackendError> {
        self.image = self.image.fliph();
        Ok(())
    }

    fn affine(&mut self, params: &AffineParams) -> Result<(), BackendError> {
        if params.matrix.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::rejected("affine", "matrix values must be finite"));
        }
        let (w, h) = self.dimensions();
        let bounds = affine_bounds(w, h, params.matrix)
            .ok_or_else(|| BackendError::rejected("affine", "matrix is not invertible"))?;
        self.check_canvas("affine", bounds.width, bounds.height)?;
        let transformed = filters::affine(
            &self.image.to_rgba8(),
            &bounds,
            params.background,
            params.interpolator,
        );
        self.replace_with_canvas(transformed, params.background);
        Ok(())
    }

    fn sharpen(&mut self, params: &SharpenParams) -> Result<(), BackendError> {
        self.image = match params.sigma {
            None => self
                .image
                .filter3x3(&[0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0]),
            Some(sigma) if (0.01..=10000.0).contains(&sigma) => {
                self.image.unsharpen(sigma, params.threshold)
            }
            Some(sigma) => {
                return Err(BackendError::rejected(
                    "sharpen",
                    format!("sigma {sigma} outside 0.01-10000"),
                ));
            }
        };
        Ok(())
    }

    fn median(&mut self, size: u32) -> Result<(), BackendError> {
        if !(1..=49).contains(&size) {
            return Err(BackendError::rejected(
                "median",
                format!("window size {size} outside 1-49"),
            ));
        }
        self.map_rgba(|buffer| *buffer = filters::median(buffer, size));
        Ok(())
    }

    fn blur(&mut self, sigma: f64) -> Result<(), BackendError> {
        if !(0.3..=1000.0).contains(&sigma) {
            return Err(BackendError::rejected(
                "blur",
                format!("sigma {sigma} outside 0.3-1000"),
            ));
        }
        self.image = self.image.blur(sigma as f32);
        Ok(())
    }

    fn flatten(&mut self, background: Color) -> Result<(), BackendError> {
        if !self.image.color().has_alpha() {
            return Ok(());
        }
        let layout = Layout {
            alpha: false,
            ..Layout::of(&self.image)
        };
        self.map_rgba_into(layout, |buffer| filters::flatten(buffer, background));
        Ok(())
    }

    fn gamma(&mut self, gamma: f64, gamma_out: Option<f64>) -> Result<(), BackendError> {
        let gamma_out = gamma_out.unwrap_or(gamma);
        for value in [gamma, gamma_out] {
            if !(1.0..=3.0).contains(&value) {
                return Err(BackendError::rejected(
                    "gamma",
                    format!("gamma {value} outside 1.0-3.0"),
                ));
            }
        }
        let table = filters::gamma_table(gamma, gamma_out);
        self.map_rgba(|buffer| filters::apply_lut(buffer, &table));
        Ok(())
    }

    fn negate(&mut self, alpha: bool) -> Result<(), BackendError> {
        self.map_rgba(|buffer| filters::negate(buffer, alpha));
        Ok(())
    }

    fn normalize(&mut self) -> Result<(), BackendError> {
        self.map_rgba(filters::normalize);
        Ok(())
    }

    fn clahe(&mut self, params: &ClaheParams) -> Result<(), BackendError> {
        if params.width == 0 || params.height == 0 {
            return Err(BackendError::rejected(
                "clahe",
                "tile width and height must be positive",
            ));
        }
        let params = *params;
        self.map_rgba(|buffer| filters::clahe(buffer, &params));
        Ok(())
    }

    fn convolve(&mut self, kernel: &ConvolveKernel) -> Result<(), BackendError> {
        let shape_ok = kernel.width % 2 == 1
            && kernel.height % 2 == 1
            && (kernel.width as usize) * (kernel.height as usize) == kernel.kernel.len();
        if !shape_ok {
            return Err(BackendError::rejected(
                "convolve",
                format!(
                    "kernel of {} values does not match odd {}x{} shape",
                    kernel.kernel.len(),
                    kernel.width,
                    kernel.height
                ),
            ));
        }
        self.map_rgba(|buffer| *buffer = filters::convolve(buffer, kernel));
        Ok(())
    }

    fn threshold(&mut self, level: u32) -> Result<(), BackendError> {
        let level = u8::try_from(level).map_err(|_| {
            BackendError::rejected("threshold", format!("level {level} outside 0-255"))
        })?;
        self.map_rgba(|buffer| filters::threshold(buffer, level));
        Ok(())
    }

    fn boolean(&mut self, operand: &Self, operator: BooleanOperator) -> Result<(), BackendError> {
        if operand.dimensions() != self.dimensions() {
            let (w, h) = operand.dimensions();
            return Err(BackendError::rejected(
                "boolean",
                format!("operand is {w}x{h}, expected {:?}", self.dimensions()),
            ));
        }
        let other = operand.image.to_rgba8();
        self.map_rgba(|buffer| filters::boolean(buffer, &other, operator));
        Ok(())
    }

    fn linear(&mut self, a: f64, b: f64) -> Result<(), BackendError> {
        if !a.is_finite() || !b.is_finite() {
            return Err(BackendError::rejected("linear", "coefficients must be finite"));
        }
        let table = filters::linear_table(a, b);
        self.map_rgba(|buffer| filters::apply_lut(buffer, &table));
        Ok(())
    }

    fn recomb(&mut self, matrix: &[[f64; 3]; 3]) -> Result<(), BackendError> {
        let layout = Layout::of(&self.image).coloured();
        self.map_rgba_into(layout, |buffer| filters::recomb(buffer, matrix));
        Ok(())
    }

    fn modulate(&mut self, params: &ModulateParams) -> Result<(), BackendError> {
        if params.brightness < 0.0 || params.saturation < 0.0 {
            return Err(BackendError::rejected(
                "modulate",
                "brightness and saturation must not be negative",
            ));
        }
        let layout = Layout::of(&self.image).coloured();
        self.map_rgba_into(layout, |buffer| {
            filters::modulate(buffer, params);
            if params.hue != 0 {
                *buffer = image::imageops::huerotate(buffer, params.hue);
            }
        });
        Ok(())
    }

    fn tint(&mut self, color: Color) -> Result<(), BackendError> {
        let layout = Layout::of(&self.image).coloured();
        self.map_rgba_into(layout, |buffer| filters::tint(buffer, color));
        Ok(())
    }

    fn grayscale(&mut self) -> Result<(), BackendError> {
        self.image = self.image.grayscale();
        Ok(())
    }

    fn pipeline_colourspace(&mut self, space: Colourspace) -> Result<(), BackendError> {
        self.convert_colourspace(space);
        Ok(())
    }

    fn to_colourspace(&mut self, space: Colourspace) -> Result<(), BackendError> {
        self.convert_colourspace(space);
        Ok(())
    }

    fn remove_alpha(&mut self) -> Result<(), BackendError> {
        let layout = Layout::of(&self.image);
        if layout.alpha {
            self.image = Layout {
                alpha: false,
                ..layout
            }
            .restore(self.image.clone());
        }
        Ok(())
    }

    fn ensure_alpha(&mut self, alpha: f64) -> Result<(), BackendError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(BackendError::rejected(
                "ensure_alpha",
                format!("alpha {alpha} outside 0-1"),
            ));
        }
        let layout = Layout::of(&self.image);
        if layout.alpha {
            return Ok(());
        }
        let value = (alpha * 255.0).round() as u8;
        self.map_rgba_into(Layout { alpha: true, ..layout }, |buffer| {
            for px in buffer.pixels_mut() {
                px[3] = value;
            }
        });
        Ok(())
    }

    fn extract_channel(&mut self, channel: usize) -> Result<(), BackendError> {
        let bands = planes(&self.image);
        let band = bands.get(channel).ok_or_else(|| {
            BackendError::rejected(
                "extract_channel",
                format!("channel {channel} not present in {}-band image", bands.len()),
            )
        })?;
        let (w, h) = self.dimensions();
        self.image = from_planes(w, h, std::slice::from_ref(band))
            .ok_or_else(|| BackendError::rejected("extract_channel", "band size mismatch"))?;
        Ok(())
    }

    fn join_channels(&mut self, others: &[Self]) -> Result<(), BackendError> {
        let (w, h) = self.dimensions();
        let mut bands = planes(&self.image);
        for other in others {
            if other.dimensions() != (w, h) {
                return Err(BackendError::rejected(
                    "join_channels",
                    format!("joined image is {:?}, expected {w}x{h}", other.dimensions()),
                ));
            }
            bands.extend(planes(&other.image));
        }
        if bands.len() > 4 {
            return Err(BackendError::rejected(
                "join_channels",
                format!("{} bands exceed the 4-band maximum", bands.len()),
            ));
        }
        self.check_canvas("join_channels", w, h)?;
        self.image = from_planes(w, h, &bands)
            .ok_or_else(|| BackendError::rejected("join_channels", "band size mismatch"))?;
        Ok(())
    }

    fn band_bool(&mut self, operator: BooleanOperator) -> Result<(), BackendError> {
        let (w, h) = self.dimensions();
        let reduced = filters::band_bool(&planes(&self.image), operator);
        self.image = GrayImage::from_raw(w, h, reduced)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| BackendError::rejected("band_bool", "band size mismatch"))?;
        Ok(())
    }

    fn composite(&mut self, overlay: &Self, gravity: Anchor) -> Result<(), BackendError> {
        let (x, y) = anchor_offset(self.dimensions(), overlay.dimensions(), gravity);
        let top = overlay.image.to_rgba8();
        self.map_rgba(|buffer| image::imageops::overlay(buffer, &top, x, y));
        Ok(())
    }

    fn encode(self, format: Format, options: &EncoderOptions) -> Result<Encoded, BackendError> {
        let (width, height) = self.dimensions();
        let has_alpha = self.image.color().has_alpha();
        let quality = options.quality.value().clamp(1, 100) as u8;
        let encode_err = |e: image::ImageError| BackendError::Encode {
            format,
            reason: e.to_string(),
        };

        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        match format {
            Format::Jpeg => {
                let flat = match self.image {
                    DynamicImage::ImageLuma8(_) => self.image,
                    other => DynamicImage::ImageRgb8(other.to_rgb8()),
                };
                flat.write_with_encoder(JpegEncoder::new_with_quality(&mut cursor, quality))
                    .map_err(encode_err)?;
            }
            Format::Png => {
                let level = match options.flags {
                    FormatFlags::Png {
                        compression_level, ..
                    } => compression_level,
                    _ => 6,
                };
                if matches!(options.flags, FormatFlags::Png { palette: true, .. }) {
                    log::debug!("palette quantisation unavailable, writing truecolour PNG");
                }
                let encoder = PngEncoder::new_with_quality(
                    &mut cursor,
                    png_compression(level),
                    image::codecs::png::FilterType::Adaptive,
                );
                self.image.write_with_encoder(encoder).map_err(encode_err)?;
            }
            Format::Webp => {
                if !options.lossless() {
                    log::debug!("lossy WebP unavailable, writing lossless WebP");
                }
                let rgb = eight_bit_rgb(self.image, has_alpha);
                rgb.write_with_encoder(WebPEncoder::new_lossless(&mut cursor))
                    .map_err(encode_err)?;
            }
            Format::Avif => {
                let quality = if options.lossless() { 100 } else { quality };
                let speed = 10 - options.effort.min(9);
                let rgb = eight_bit_rgb(self.image, has_alpha);
                rgb.write_with_encoder(AvifEncoder::new_with_speed_quality(
                    &mut cursor,
                    speed,
                    quality,
                ))
                .map_err(encode_err)?;
            }
            Format::Gif => {
                DynamicImage::ImageRgba8(self.image.to_rgba8())
                    .write_to(&mut cursor, ImageFormat::Gif)
                    .map_err(encode_err)?;
            }
            Format::Tiff | Format::Bmp => {
                eight_bit_rgb(self.image, has_alpha)
                    .write_to(&mut cursor, image_format(format))
                    .map_err(encode_err)?;
            }
        }

        Ok(Encoded {
            bytes,
            format,
            width,
            height,
        })
    }
}

fn eight_bit_rgb(image: DynamicImage, has_alpha: bool) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other if has_alpha => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
