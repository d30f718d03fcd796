//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{Anchor, Fit};

/// Outcome of fitting a source into a requested box.
///
/// The source is scaled to `scaled`, then placed on (or cropped to) a
/// `canvas`. For `inside`, `outside` and `fill` the two are equal; `cover`
/// crops the scaled image down to the canvas and `contain` letterboxes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub scaled: (u32, u32),
    pub canvas: (u32, u32),
}

/// Calculate the scaled and canvas dimensions for a resize.
///
/// Never enlarges: a scale factor above 1 is clamped to 1, and the canvas is
/// never larger than the source along either axis.
///
/// ```text
/// 1600x1200, w=800 h=800, cover   → scaled 1067x800, canvas 800x800
/// 1600x1200, w=800 h=800, inside  → scaled 800x600,  canvas 800x600
/// 400x300,   w=800 h=600, inside  → scaled 400x300 (no upscaling)
/// ```
pub fn calculate_fit(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    fit: Fit,
) -> FitPlan {
    let (src_w, src_h) = (source.0.max(1), source.1.max(1));
    let sx = width.map(|w| w as f64 / src_w as f64);
    let sy = height.map(|h| h as f64 / src_h as f64);

    let (sx, sy) = match (sx, sy) {
        (None, None) => {
            return FitPlan {
                scaled: (src_w, src_h),
                canvas: (src_w, src_h),
            };
        }
        // A single dimension keeps the aspect ratio whatever the fit mode.
        (Some(s), None) | (None, Some(s)) => (s, s),
        (Some(x), Some(y)) => match fit {
            Fit::Fill => (x, y),
            Fit::Inside | Fit::Contain => (x.min(y), x.min(y)),
            Fit::Cover | Fit::Outside => (x.max(y), x.max(y)),
        },
    };

    let scaled = (scale(src_w, sx.min(1.0)), scale(src_h, sy.min(1.0)));

    let canvas = match (width, height, fit) {
        (Some(w), Some(h), Fit::Cover) => (w.min(scaled.0), h.min(scaled.1)),
        (Some(w), Some(h), Fit::Contain) => (w.min(src_w), h.min(src_h)),
        _ => scaled,
    };

    FitPlan { scaled, canvas }
}

fn scale(length: u32, factor: f64) -> u32 {
    ((length as f64 * factor).round() as u32).max(1)
}

/// Offset that places an `inner` box within an `outer` box at `anchor`.
///
/// Offsets are negative when `inner` is larger than `outer` along an axis.
pub fn anchor_offset(outer: (u32, u32), inner: (u32, u32), anchor: Anchor) -> (i64, i64) {
    let free_x = outer.0 as i64 - inner.0 as i64;
    let free_y = outer.1 as i64 - inner.1 as i64;

    let x = match anchor {
        Anchor::West | Anchor::NorthWest | Anchor::SouthWest => 0,
        Anchor::East | Anchor::NorthEast | Anchor::SouthEast => free_x,
        Anchor::Center | Anchor::North | Anchor::South => free_x / 2,
    };
    let y = match anchor {
        Anchor::North | Anchor::NorthWest | Anchor::NorthEast => 0,
        Anchor::South | Anchor::SouthWest | Anchor::SouthEast => free_y,
        Anchor::Center | Anchor::West | Anchor::East => free_y / 2,
    };
    (x, y)
}

/// Bounding box of a `width`x`height` image under the affine `matrix`.
///
/// Returns the output dimensions and the translation `(dx, dy)` that moves
/// the transformed image into positive coordinates. Returns `None` for a
/// singular matrix.
pub fn affine_bounds(width: u32, height: u32, matrix: [f64; 4]) -> Option<AffineBounds> {
    let [a, b, c, d] = matrix;
    let det = a * d - b * c;
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }

    let corners = [
        (0.0, 0.0),
        (width as f64, 0.0),
        (0.0, height as f64),
        (width as f64, height as f64),
    ];
    let mapped = corners.map(|(x, y)| (a * x + b * y, c * x + d * y));

    let min_x = mapped.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = mapped.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = mapped.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = mapped.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    Some(AffineBounds {
        width: ((max_x - min_x).round() as u32).max(1),
        height: ((max_y - min_y).round() as u32).max(1),
        dx: -min_x,
        dy: -min_y,
        inverse: [d / det, -b / det, -c / det, a / det],
    })
}

/// Output geometry of an affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineBounds {
    pub width: u32,
    pub height: u32,
    pub dx: f64,
    pub dy: f64,
    /// Inverse matrix, used to map output pixels back to source coordinates.
    pub inverse: [f64; 4],
}

/// Byte size of a `width`x`height` RGBA8 canvas, or `None` when it has
/// more than `max_pixels` pixels or does not fit the address space.
pub fn canvas_bytes(width: u32, height: u32, max_pixels: u64) -> Option<usize> {
    let pixels = (width as u64).checked_mul(height as u64)?;
    if pixels > max_pixels {
        return None;
    }
    usize::try_from(pixels).ok()?.checked_mul(4)
}

/// Rotation matrix for `degrees` clockwise.
pub fn rotation_matrix(degrees: i64) -> [f64; 4] {
    let radians = (degrees as f64).to_radians();
    let (sin, cos) = radians.sin_cos();
    [cos, -sin, sin, cos]
}
