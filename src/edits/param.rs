//! The closed set of recognised query parameters.
//!
//! Every query key the service understands is a [`ParamName`] variant that
//! knows its wire key, its [`ParamKind`] and whether negative numbers are
//! admitted. [`RawParams`] is the request's parameter bag keyed by those
//! variants, so an unknown key never reaches the builder.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Semantic type a raw parameter value is coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Integer,
    Float,
    Boolean,
    List,
    Object,
}

macro_rules! params {
    ($($variant:ident => $key:literal, $kind:ident, $negative:literal;)+) => {
        /// One variant per recognised query key.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum ParamName {
            $($variant,)+
        }

        impl ParamName {
            pub const ALL: &'static [ParamName] = &[$(ParamName::$variant,)+];

            /// Query-string key, e.g. `"w"`.
            pub fn key(self) -> &'static str {
                match self {
                    $(ParamName::$variant => $key,)+
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                match key {
                    $($key => Some(ParamName::$variant),)+
                    _ => None,
                }
            }

            pub fn kind(self) -> ParamKind {
                match self {
                    $(ParamName::$variant => ParamKind::$kind,)+
                }
            }

            /// Whether a parsed negative number is kept rather than unset.
            pub fn allows_negative(self) -> bool {
                match self {
                    $(ParamName::$variant => $negative,)+
                }
            }
        }
    };
}

params! {
    // resize
    Width => "w", Integer, false;
    Height => "h", Integer, false;
    Fit => "f", Text, false;
    Position => "p", Text, false;
    Background => "bg", Text, false;
    Kernel => "k", Text, false;
    CropBefore => "cb", Object, false;
    CropAfter => "ca", Object, false;
    Extend => "ex", Object, false;
    Trim => "tr", Integer, false;
    // operations
    Rotate => "r", Integer, true;
    Flip => "flip", Boolean, false;
    Flop => "flop", Boolean, false;
    Affine => "af", List, false;
    AffineBackground => "afbg", Text, false;
    AffineInterpolator => "afi", Text, false;
    Sharpen => "sh", Object, false;
    Median => "md", Integer, false;
    Blur => "bl", Float, false;
    Flatten => "fl", Text, false;
    Gamma => "gm", List, false;
    Negate => "ng", Boolean, false;
    Normalize => "nr", Boolean, false;
    Clahe => "cl", Object, false;
    Convolve => "cv", Object, false;
    Threshold => "th", Integer, false;
    Boolean => "bo", Object, false;
    Linear => "li", List, false;
    Recomb => "rc", List, false;
    Modulate => "mo", Object, false;
    // color
    Tint => "t", Object, false;
    Grayscale => "g", Boolean, false;
    PipelineColourspace => "pc", Text, false;
    Colourspace => "tc", Text, false;
    // channel
    RemoveAlpha => "ra", Boolean, false;
    EnsureAlpha => "ea", Float, false;
    ExtractChannel => "ec", Text, false;
    JoinChannels => "jc", List, false;
    BandBool => "bb", Text, false;
    // compositing
    Watermark => "wm", Text, false;
    Gravity => "gr", Text, false;
    // output
    Format => "fm", Text, false;
    Quality => "q", Integer, false;
    Lossless => "ll", Boolean, false;
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The request's recognised parameters and their raw values.
///
/// Values are kept as JSON so that query strings (always text) and
/// structured callers (e.g. tests or an API gateway event) share one path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawParams {
    values: BTreeMap<ParamName, Value>,
}

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URL query string (with or without the leading `?`).
    ///
    /// Percent-escapes and `+` are decoded; when a key repeats, the last
    /// value wins.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Build from string key/value pairs, dropping unrecognised keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            match ParamName::from_key(key.as_ref()) {
                Some(name) => params.insert(name, Value::String(value.into())),
                None => log::trace!("ignoring unrecognised parameter '{}'", key.as_ref()),
            }
        }
        params
    }

    pub fn insert(&mut self, name: ParamName, value: impl Into<Value>) {
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: ParamName) -> Option<&Value> {
        self.values.get(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamName, &Value)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }
}
