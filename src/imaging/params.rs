//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the [`pipeline`](crate::pipeline) (which decides which
//! operations run, with which arguments, in which order) and the
//! [`backend`](super::backend) (which does the actual pixel work). This
//! separation allows swapping engines (e.g. for testing with a mock) without
//! changing pipeline logic.
//!
//! ## Types
//!
//! - [`Format`]: Encodable image formats and their MIME types.
//! - [`Fit`], [`Anchor`], [`Kernel`], [`Interpolator`]: Resize and resample vocabulary.
//! - [`Color`]: RGBA colour parsed from `#rgb`, `#rrggbb`, `#rrggbbaa` or a small set of names.
//! - [`Region`], [`ExtendParams`], [`ResizeParams`], [`AffineParams`]: Geometry operations.
//! - [`SharpenParams`], [`ClaheParams`], [`ConvolveKernel`], [`ModulateParams`]: Structured
//!   filter arguments, decoded leniently from query parameters.
//! - [`EncoderOptions`]: Final encoder settings produced by the output resolver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encodable output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
    Gif,
    Bmp,
}

impl Format {
    pub const ALL: [Format; 7] = [
        Format::Jpeg,
        Format::Png,
        Format::Webp,
        Format::Avif,
        Format::Tiff,
        Format::Gif,
        Format::Bmp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Webp => "webp",
            Format::Avif => "avif",
            Format::Tiff => "tiff",
            Format::Gif => "gif",
            Format::Bmp => "bmp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Webp => "image/webp",
            Format::Avif => "image/avif",
            Format::Tiff => "image/tiff",
            Format::Gif => "image/gif",
            Format::Bmp => "image/bmp",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    /// Exact, lower-case names only; `jpg` is accepted as an alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg" | "jpg" => Ok(Format::Jpeg),
            "png" => Ok(Format::Png),
            "webp" => Ok(Format::Webp),
            "avif" => Ok(Format::Avif),
            "tiff" => Ok(Format::Tiff),
            "gif" => Ok(Format::Gif),
            "bmp" => Ok(Format::Bmp),
            other => Err(format!("unknown format '{other}'")),
        }
    }
}

/// How the image is fitted into the requested box when both dimensions are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Cover the box, cropping the overflow at the requested position.
    #[default]
    Cover,
    /// Fit inside the box and letterbox with the background colour.
    Contain,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box without letterboxing.
    Inside,
    /// Cover the box without cropping.
    Outside,
}

impl FromStr for Fit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(Fit::Cover),
            "contain" => Ok(Fit::Contain),
            "fill" => Ok(Fit::Fill),
            "inside" => Ok(Fit::Inside),
            "outside" => Ok(Fit::Outside),
            other => Err(format!(
                "unknown fit '{other}'. Expected cover, contain, fill, inside or outside"
            )),
        }
    }
}

/// Compass anchor, used both as a crop position and as a composite gravity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    #[default]
    Center,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl FromStr for Anchor {
    type Err = String;

    /// Accepts compass names (`northeast`), CSS-like positions
    /// (`right top`, `left`) and the smart-crop strategies, which fall back
    /// to the centre.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let anchor = match normalized.as_str() {
            "center" | "centre" | "entropy" | "attention" => Anchor::Center,
            "north" | "top" => Anchor::North,
            "northeast" | "right top" | "top right" => Anchor::NorthEast,
            "east" | "right" => Anchor::East,
            "southeast" | "right bottom" | "bottom right" => Anchor::SouthEast,
            "south" | "bottom" => Anchor::South,
            "southwest" | "left bottom" | "bottom left" => Anchor::SouthWest,
            "west" | "left" => Anchor::West,
            "northwest" | "left top" | "top left" => Anchor::NorthWest,
            other => return Err(format!("unknown position '{other}'")),
        };
        Ok(anchor)
    }
}

/// Resampling kernel for resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Nearest,
    Linear,
    Cubic,
    Mitchell,
    Lanczos2,
    #[default]
    Lanczos3,
}

impl FromStr for Kernel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Kernel::Nearest),
            "linear" => Ok(Kernel::Linear),
            "cubic" => Ok(Kernel::Cubic),
            "mitchell" => Ok(Kernel::Mitchell),
            "lanczos2" => Ok(Kernel::Lanczos2),
            "lanczos3" => Ok(Kernel::Lanczos3),
            other => Err(format!("unknown kernel '{other}'")),
        }
    }
}

/// Interpolator used when sampling an affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolator {
    Nearest,
    Bilinear,
    #[default]
    Bicubic,
}

impl FromStr for Interpolator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "nearest" => Ok(Interpolator::Nearest),
            "bilinear" => Ok(Interpolator::Bilinear),
            "bicubic" | "locallyBoundedBicubic" | "nohalo" | "vertexSplitQuadraticBasisSpline" => {
                Ok(Interpolator::Bicubic)
            }
            other => Err(format!("unknown interpolator '{other}'")),
        }
    }
}

/// Bitwise operator for boolean combination and band reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanOperator {
    And,
    Or,
    Eor,
}

impl BooleanOperator {
    pub fn apply(self, a: u8, b: u8) -> u8 {
        match self {
            BooleanOperator::And => a & b,
            BooleanOperator::Or => a | b,
            BooleanOperator::Eor => a ^ b,
        }
    }
}

impl FromStr for BooleanOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(BooleanOperator::And),
            "or" => Ok(BooleanOperator::Or),
            "eor" | "xor" => Ok(BooleanOperator::Eor),
            other => Err(format!("unknown boolean operator '{other}'")),
        }
    }
}

/// Colour space for the processing pipeline or the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Colourspace {
    Srgb,
    Rgb16,
    BlackWhite,
}

impl FromStr for Colourspace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srgb" | "rgb" => Ok(Colourspace::Srgb),
            "rgb16" => Ok(Colourspace::Rgb16),
            "b-w" | "bw" | "grey16" | "grey" => Ok(Colourspace::BlackWhite),
            other => Err(format!("unsupported colourspace '{other}'")),
        }
    }
}

/// Parse a channel selector (`red`, `green`, `blue`, `alpha` or a band index).
pub fn parse_channel(s: &str) -> Result<usize, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "red" => Ok(0),
        "green" => Ok(1),
        "blue" => Ok(2),
        "alpha" => Ok(3),
        other => other
            .parse::<usize>()
            .map_err(|_| format!("unknown channel '{other}'")),
    }
}

/// RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0, 255]);
    pub const WHITE: Color = Color([255, 255, 255, 255]);
    pub const TRANSPARENT: Color = Color([0, 0, 0, 0]);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "black" => return Ok(Color::BLACK),
            "white" => return Ok(Color::WHITE),
            "transparent" => return Ok(Color::TRANSPARENT),
            "red" => return Ok(Color::rgb(255, 0, 0)),
            "green" => return Ok(Color::rgb(0, 128, 0)),
            "blue" => return Ok(Color::rgb(0, 0, 255)),
            _ => {}
        }

        let hex = trimmed
            .strip_prefix('#')
            .ok_or_else(|| format!("invalid colour '{trimmed}'"))?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid colour '{trimmed}'"));
        }
        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).map(|v| v * 17);
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        let parsed = match hex.len() {
            3 => [nibble(0), nibble(1), nibble(2), Ok(255)],
            4 => [nibble(0), nibble(1), nibble(2), nibble(3)],
            6 => [byte(0), byte(2), byte(4), Ok(255)],
            8 => [byte(0), byte(2), byte(4), byte(6)],
            _ => return Err(format!("invalid colour '{trimmed}'")),
        };
        let mut rgba = [0u8; 4];
        for (slot, value) in rgba.iter_mut().zip(parsed) {
            *slot = value.map_err(|_| format!("invalid colour '{trimmed}'"))?;
        }
        Ok(Color(rgba))
    }
}

/// Rectangle in pixel coordinates, used for crops before and after resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Padding added to each edge, filled with `background`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtendParams {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
    pub background: Color,
}

/// Fully resolved resize request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResizeParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub position: Anchor,
    pub background: Color,
    pub kernel: Kernel,
}

/// 2x2 affine matrix `[a, b, c, d]` mapping `(x, y)` to `(a·x + b·y, c·x + d·y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineParams {
    pub matrix: [f64; 4],
    pub background: Color,
    pub interpolator: Interpolator,
}

/// Unsharp-mask parameters.
///
/// - `sigma`: Gaussian radius; `None` requests a fast, mild sharpen
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpenParams {
    pub sigma: Option<f32>,
    pub threshold: i32,
}

/// Contrast-limited adaptive histogram equalisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaheParams {
    /// Tile width in pixels.
    pub width: u32,
    /// Tile height in pixels.
    pub height: u32,
    /// Clip limit as a multiple of the mean histogram bin; 0 disables clipping.
    pub max_slope: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            max_slope: 3,
        }
    }
}

/// Convolution kernel. `scale` defaults to the kernel sum (or 1 when zero).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvolveKernel {
    pub width: u32,
    pub height: u32,
    pub kernel: Vec<f32>,
    pub scale: Option<f32>,
    pub offset: f32,
}

/// Brightness/saturation multipliers, hue rotation in degrees, additive lightness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulateParams {
    pub brightness: f32,
    pub saturation: f32,
    pub hue: i32,
    pub lightness: f32,
}

impl Default for ModulateParams {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            saturation: 1.0,
            hue: 0,
            lightness: 0.0,
        }
    }
}

/// Quality setting for lossy encoding, already resolved against the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Format-specific encoder switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFlags {
    None,
    Png { compression_level: u8, palette: bool },
    Lossless(bool),
}

/// Final encoder settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderOptions {
    pub quality: Quality,
    pub effort: u8,
    pub flags: FormatFlags,
}

impl EncoderOptions {
    pub fn lossless(&self) -> bool {
        matches!(self.flags, FormatFlags::Lossless(true))
    }
}
