//! Pixel kernels for the pure-Rust engine.
//!
//! Everything the `image` crate does not provide directly lives here. The
//! kernels work on 8-bit RGBA buffers; [`RustBackend`](super::RustBackend)
//! converts back to the image's original layout afterwards. Colour channels
//! are processed, alpha is carried through untouched unless stated otherwise.

use super::calculations::AffineBounds;
use super::params::{
    BooleanOperator, ClaheParams, Color, ConvolveKernel, Interpolator, ModulateParams,
};
use image::{Rgba, RgbaImage};

fn clamp_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Rec. 601 luma of an RGBA pixel.
fn luma(px: &Rgba<u8>) -> f64 {
    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
}

/// Apply a per-value lookup table to the colour channels.
pub fn apply_lut(img: &mut RgbaImage, table: &[u8; 256]) {
    for px in img.pixels_mut() {
        for c in 0..3 {
            px[c] = table[px[c] as usize];
        }
    }
}

/// Lookup table for `out = in ^ (gamma / gamma_out)` in normalised space.
pub fn gamma_table(gamma: f64, gamma_out: f64) -> [u8; 256] {
    let exponent = gamma / gamma_out;
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = clamp_u8((i as f64 / 255.0).powf(exponent) * 255.0);
    }
    table
}

/// Lookup table for `out = a·in + b`.
pub fn linear_table(a: f64, b: f64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = clamp_u8(a * i as f64 + b);
    }
    table
}

/// Invert colour channels, and alpha when `alpha` is set.
pub fn negate(img: &mut RgbaImage, alpha: bool) {
    for px in img.pixels_mut() {
        px[0] = 255 - px[0];
        px[1] = 255 - px[1];
        px[2] = 255 - px[2];
        if alpha {
            px[3] = 255 - px[3];
        }
    }
}

/// Median filter with a square `size`x`size` window, edges clamped.
pub fn median(img: &RgbaImage, size: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let radius = (size / 2) as i64;
    let mut out = img.clone();
    let mut window: Vec<u8> = Vec::with_capacity((size * size) as usize);

    for y in 0..h {
        for x in 0..w {
            let mut px = *img.get_pixel(x, y);
            for c in 0..3 {
                window.clear();
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                        let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                        window.push(img.get_pixel(sx, sy)[c]);
                    }
                }
                window.sort_unstable();
                px[c] = window[window.len() / 2];
            }
            out.put_pixel(x, y, px);
        }
    }
    out
}

/// Convolve colour channels with a `width`x`height` kernel, edges clamped.
pub fn convolve(img: &RgbaImage, kernel: &ConvolveKernel) -> RgbaImage {
    let (w, h) = img.dimensions();
    let kw = kernel.width as i64;
    let kh = kernel.height as i64;
    let sum: f32 = kernel.kernel.iter().sum();
    let scale = f64::from(match kernel.scale {
        Some(s) if s != 0.0 => s,
        _ if sum != 0.0 => sum,
        _ => 1.0,
    });
    let offset = kernel.offset as f64;

    let mut out = img.clone();
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f64; 3];
            for ky in 0..kh {
                for kx in 0..kw {
                    let weight = kernel.kernel[(ky * kw + kx) as usize] as f64;
                    let sx = (x as i64 + kx - kw / 2).clamp(0, w as i64 - 1) as u32;
                    let sy = (y as i64 + ky - kh / 2).clamp(0, h as i64 - 1) as u32;
                    let src = img.get_pixel(sx, sy);
                    for c in 0..3 {
                        acc[c] += weight * src[c] as f64;
                    }
                }
            }
            let px = out.get_pixel_mut(x, y);
            for c in 0..3 {
                px[c] = clamp_u8(acc[c] / scale + offset);
            }
        }
    }
    out
}

/// Sample `img` under an affine transform into a new canvas.
pub fn affine(
    img: &RgbaImage,
    bounds: &AffineBounds,
    background: Color,
    interpolator: Interpolator,
) -> RgbaImage {
    let [ia, ib, ic, id] = bounds.inverse;
    let mut out = RgbaImage::from_pixel(bounds.width, bounds.height, Rgba(background.0));

    for (x, y, px) in out.enumerate_pixels_mut() {
        // Sample at pixel centres.
        let ox = x as f64 + 0.5 - bounds.dx;
        let oy = y as f64 + 0.5 - bounds.dy;
        let sx = ia * ox + ib * oy - 0.5;
        let sy = ic * ox + id * oy - 0.5;
        let sampled = match interpolator {
            Interpolator::Nearest => sample_nearest(img, sx, sy),
            Interpolator::Bilinear | Interpolator::Bicubic => sample_bilinear(img, sx, sy),
        };
        if let Some(value) = sampled {
            *px = value;
        }
    }
    out
}

fn sample_nearest(img: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    let (w, h) = img.dimensions();
    let (rx, ry) = (x.round(), y.round());
    if rx < 0.0 || ry < 0.0 || rx >= w as f64 || ry >= h as f64 {
        return None;
    }
    Some(*img.get_pixel(rx as u32, ry as u32))
}

fn sample_bilinear(img: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    let (w, h) = img.dimensions();
    if x < -0.5 || y < -0.5 || x > w as f64 - 0.5 || y > h as f64 - 0.5 {
        return None;
    }
    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);
    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *slot = clamp_u8(top * (1.0 - fy) + bottom * fy);
    }
    Some(Rgba(out))
}

/// Stretch luminance so the 1st and 99th percentiles span the full range.
pub fn normalize(img: &mut RgbaImage) {
    let mut histogram = [0u64; 256];
    for px in img.pixels() {
        histogram[clamp_u8(luma(px)) as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return;
    }
    let percentile = |fraction: f64| {
        let target = (total as f64 * fraction).ceil() as u64;
        let mut seen = 0;
        for (value, count) in histogram.iter().enumerate() {
            seen += count;
            if seen >= target.max(1) {
                return value as f64;
            }
        }
        255.0
    };
    let (low, high) = (percentile(0.01), percentile(0.99));
    if high <= low {
        return;
    }
    let a = 255.0 / (high - low);
    apply_lut(img, &linear_table(a, -low * a));
}

/// Contrast-limited adaptive histogram equalisation on luminance.
///
/// Each tile gets a clipped, equalised mapping; pixels blend the mappings of
/// the four nearest tile centres. Colour is preserved by scaling RGB with the
/// luminance ratio.
pub fn clahe(img: &mut RgbaImage, params: &ClaheParams) {
    let (w, h) = img.dimensions();
    let tile_w = params.width.clamp(1, w);
    let tile_h = params.height.clamp(1, h);
    let tiles_x = w.div_ceil(tile_w) as usize;
    let tiles_y = h.div_ceil(tile_h) as usize;

    let lumas: Vec<u8> = img.pixels().map(|px| clamp_u8(luma(px))).collect();

    let mut maps = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut histogram = [0u32; 256];
            let x_end = ((tx as u32 + 1) * tile_w).min(w);
            let y_end = ((ty as u32 + 1) * tile_h).min(h);
            for y in ty as u32 * tile_h..y_end {
                for x in tx as u32 * tile_w..x_end {
                    histogram[lumas[(y * w + x) as usize] as usize] += 1;
                }
            }
            maps[ty * tiles_x + tx] = equalise(&mut histogram, params.max_slope);
        }
    }

    let tile_centre = |index: usize, size: u32| (index as f64 + 0.5) * size as f64;
    for y in 0..h {
        let fy = (y as f64 + 0.5 - tile_centre(0, tile_h)) / tile_h as f64;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f64) as usize;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (fy - ty0 as f64).clamp(0.0, 1.0);
        for x in 0..w {
            let fx = (x as f64 + 0.5 - tile_centre(0, tile_w)) / tile_w as f64;
            let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f64) as usize;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (fx - tx0 as f64).clamp(0.0, 1.0);

            let l = lumas[(y * w + x) as usize] as usize;
            let m = |tx: usize, ty: usize| maps[ty * tiles_x + tx][l] as f64;
            let top = m(tx0, ty0) * (1.0 - wx) + m(tx1, ty0) * wx;
            let bottom = m(tx0, ty1) * (1.0 - wx) + m(tx1, ty1) * wx;
            let target = top * (1.0 - wy) + bottom * wy;

            let px = img.get_pixel_mut(x, y);
            let ratio = if l == 0 { 0.0 } else { target / l as f64 };
            for c in 0..3 {
                px[c] = if l == 0 {
                    clamp_u8(target)
                } else {
                    clamp_u8(px[c] as f64 * ratio)
                };
            }
        }
    }
}

/// Clip a histogram at `max_slope` times its mean bin, redistribute the
/// excess and return the cumulative mapping.
fn equalise(histogram: &mut [u32; 256], max_slope: u32) -> [u8; 256] {
    let total: u32 = histogram.iter().sum();
    if total == 0 {
        let mut identity = [0u8; 256];
        for (i, slot) in identity.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return identity;
    }
    if max_slope > 0 {
        let limit = ((total as f64 / 256.0) * max_slope as f64).ceil().max(1.0) as u32;
        let mut excess = 0;
        for bin in histogram.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in histogram.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }
    }
    let mut mapping = [0u8; 256];
    let mut cumulative = 0u64;
    for (i, slot) in mapping.iter_mut().enumerate() {
        cumulative += histogram[i] as u64;
        *slot = clamp_u8(cumulative as f64 * 255.0 / total as f64);
    }
    mapping
}

/// Binarise: pixels with luminance at or above `level` become white, others black.
pub fn threshold(img: &mut RgbaImage, level: u8) {
    for px in img.pixels_mut() {
        let value = if luma(px) >= level as f64 { 255 } else { 0 };
        px[0] = value;
        px[1] = value;
        px[2] = value;
    }
}

/// Bitwise combination of two equally sized images, colour channels only.
pub fn boolean(img: &mut RgbaImage, operand: &RgbaImage, operator: BooleanOperator) {
    for (px, other) in img.pixels_mut().zip(operand.pixels()) {
        for c in 0..3 {
            px[c] = operator.apply(px[c], other[c]);
        }
    }
}

/// Recombine colour channels with a 3x3 matrix (rows produce output channels).
pub fn recomb(img: &mut RgbaImage, matrix: &[[f64; 3]; 3]) {
    for px in img.pixels_mut() {
        let input = [px[0] as f64, px[1] as f64, px[2] as f64];
        for (c, row) in matrix.iter().enumerate() {
            px[c] = clamp_u8(row[0] * input[0] + row[1] * input[1] + row[2] * input[2]);
        }
    }
}

/// Brightness and saturation multipliers plus additive lightness.
///
/// Hue rotation is applied separately with `image::imageops::huerotate`.
pub fn modulate(img: &mut RgbaImage, params: &ModulateParams) {
    for px in img.pixels_mut() {
        let grey = luma(px);
        for c in 0..3 {
            let saturated = grey + (px[c] as f64 - grey) * params.saturation as f64;
            px[c] = clamp_u8(saturated * params.brightness as f64 + params.lightness as f64);
        }
    }
}

/// Replace chroma with `color` while keeping each pixel's luminance.
pub fn tint(img: &mut RgbaImage, color: Color) {
    let tint_luma = luma(&Rgba(color.0)).max(1.0);
    for px in img.pixels_mut() {
        let l = luma(px);
        for c in 0..3 {
            px[c] = clamp_u8(color.0[c] as f64 * l / tint_luma);
        }
    }
}

/// Composite the image over an opaque background, dropping transparency.
pub fn flatten(img: &mut RgbaImage, background: Color) {
    for px in img.pixels_mut() {
        let alpha = px[3] as f64 / 255.0;
        for c in 0..3 {
            px[c] = clamp_u8(px[c] as f64 * alpha + background.0[c] as f64 * (1.0 - alpha));
        }
        px[3] = 255;
    }
}

/// Bounding box of the pixels that differ from the top-left pixel by more
/// than `threshold` in any channel. `None` when nothing differs.
pub fn trim_bounds(img: &RgbaImage, threshold: u32) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let reference = *img.get_pixel(0, 0);
    let differs = |px: &Rgba<u8>| {
        (0..4).any(|c| (px[c] as i32 - reference[c] as i32).unsigned_abs() > threshold)
    };

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
    for (x, y, px) in img.enumerate_pixels() {
        if differs(px) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x == u32::MAX {
        return None;
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Reduce equally sized bands to one with a boolean operator.
pub fn band_bool(bands: &[Vec<u8>], operator: BooleanOperator) -> Vec<u8> {
    let Some((first, rest)) = bands.split_first() else {
        return Vec::new();
    };
    let mut out = first.clone();
    for band in rest {
        for (acc, v) in out.iter_mut().zip(band) {
            *acc = operator.apply(*acc, *v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::calculations::affine_bounds;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    #[test]
    fn gamma_table_identity_when_equal() {
        let table = gamma_table(2.2, 2.2);
        assert_eq!(table[0], 0);
        assert_eq!(table[128], 128);
        assert_eq!(table[255], 255);
    }

    #[test]
    fn linear_table_clamps() {
        let table = linear_table(2.0, 10.0);
        assert_eq!(table[0], 10);
        assert_eq!(table[100], 210);
        assert_eq!(table[200], 255);
    }

    #[test]
    fn negate_optionally_inverts_alpha() {
        let mut img = solid(1, 1, [10, 20, 30, 200]);
        negate(&mut img, false);
        assert_eq!(img.get_pixel(0, 0).0, [245, 235, 225, 200]);
        negate(&mut img, true);
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30, 55]);
    }

    #[test]
    fn median_removes_single_outlier() {
        let mut img = solid(5, 5, [100, 100, 100, 255]);
        img.put_pixel(2, 2, Rgba([255, 0, 255, 255]));
        let out = median(&img, 3);
        assert_eq!(out.get_pixel(2, 2).0, [100, 100, 100, 255]);
    }

    #[test]
    fn identity_convolution_preserves_pixels() {
        let mut img = solid(4, 4, [50, 60, 70, 255]);
        img.put_pixel(1, 1, Rgba([200, 10, 0, 255]));
        let kernel = ConvolveKernel {
            width: 3,
            height: 3,
            kernel: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            scale: None,
            offset: 0.0,
        };
        assert_eq!(convolve(&img, &kernel), img);
    }

    #[test]
    fn affine_identity_copies_image() {
        let mut img = solid(3, 2, [1, 2, 3, 255]);
        img.put_pixel(2, 1, Rgba([9, 9, 9, 255]));
        let bounds = affine_bounds(3, 2, [1.0, 0.0, 0.0, 1.0]).unwrap();
        let out = affine(&img, &bounds, Color::WHITE, Interpolator::Nearest);
        assert_eq!(out, img);
    }

    #[test]
    fn threshold_binarises_on_luminance() {
        let mut img = solid(2, 1, [10, 10, 10, 255]);
        img.put_pixel(1, 0, Rgba([200, 200, 200, 255]));
        threshold(&mut img, 128);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn flatten_blends_with_background() {
        let mut img = solid(1, 1, [255, 255, 255, 0]);
        flatten(&mut img, Color::BLACK);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn trim_bounds_finds_content() {
        let mut img = solid(10, 10, [255, 255, 255, 255]);
        img.put_pixel(3, 4, Rgba([0, 0, 0, 255]));
        img.put_pixel(6, 5, Rgba([0, 0, 0, 255]));
        assert_eq!(trim_bounds(&img, 10), Some((3, 4, 4, 2)));
        assert_eq!(trim_bounds(&solid(4, 4, [1, 1, 1, 255]), 10), None);
    }

    #[test]
    fn normalize_stretches_range() {
        let mut img = solid(2, 1, [100, 100, 100, 255]);
        img.put_pixel(1, 0, Rgba([150, 150, 150, 255]));
        normalize(&mut img);
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn clahe_keeps_flat_image_dimensions() {
        let mut img = solid(16, 16, [80, 80, 80, 255]);
        clahe(
            &mut img,
            &ClaheParams {
                width: 8,
                height: 8,
                max_slope: 3,
            },
        );
        assert_eq!(img.dimensions(), (16, 16));
    }

    #[test]
    fn band_bool_reduces_channels() {
        let bands = vec![vec![0b1100], vec![0b1010], vec![0b1111]];
        assert_eq!(band_bool(&bands, BooleanOperator::And), vec![0b1000]);
        assert_eq!(band_bool(&bands[..2], BooleanOperator::Eor), vec![0b0110]);
    }
}
