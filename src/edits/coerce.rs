//! Lenient coercion of one raw parameter value.
//!
//! [`coerce`] never fails: anything it cannot make sense of degrades to
//! [`Coerced::Unset`], `false`, or an empty list/object depending on the
//! target kind.

use super::param::ParamKind;
use serde_json::{Map, Value};

/// Result of coercing a raw value into a [`ParamKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Unset,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<Value>),
    Object(Map<String, Value>),
}

impl Coerced {
    pub fn text(self) -> Option<String> {
        match self {
            Coerced::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn integer(self) -> Option<i64> {
        match self {
            Coerced::Integer(n) => Some(n),
            _ => None,
        }
    }

    /// Integer clamped into `u32`.
    pub fn unsigned(self) -> Option<u32> {
        self.integer().map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
    }

    pub fn float(self) -> Option<f64> {
        match self {
            Coerced::Float(n) => Some(n),
            Coerced::Integer(n) => Some(n as f64),
            _ => None,
        }
    }

    pub fn flag(self) -> bool {
        matches!(self, Coerced::Boolean(true))
    }

    /// The structured value, as JSON, for typed decoding.
    pub fn structured(self) -> Option<Value> {
        match self {
            Coerced::List(items) => Some(Value::Array(items)),
            Coerced::Object(map) => Some(Value::Object(map)),
            _ => None,
        }
    }
}

pub fn coerce(raw: &Value, kind: ParamKind, allow_negative: bool) -> Coerced {
    match kind {
        ParamKind::Text => Coerced::Text(match raw {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        ParamKind::Integer => match integer(raw) {
            Some(n) if n < 0 && !allow_negative => Coerced::Unset,
            Some(n) => Coerced::Integer(n),
            None => Coerced::Unset,
        },
        ParamKind::Float => match float(raw) {
            Some(n) if n < 0.0 && !allow_negative => Coerced::Unset,
            Some(n) => Coerced::Float(n),
            None => Coerced::Unset,
        },
        ParamKind::Boolean => Coerced::Boolean(boolean(raw)),
        ParamKind::List => Coerced::List(match structured(raw) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }),
        ParamKind::Object => Coerced::Object(match structured(raw) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }),
    }
}

fn integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => integer_prefix(s),
        _ => None,
    }
}

fn float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => float_prefix(s),
        _ => None,
    }
}

/// `0` and `1` (by integer prefix) map to false/true, any other integer to
/// false; otherwise only a lower-cased JSON `true`/`false` counts.
fn boolean(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Number(_) => integer(raw) == Some(1),
        Value::String(s) => match integer_prefix(s) {
            Some(n) => n == 1,
            None => matches!(
                serde_json::from_str::<Value>(&s.to_lowercase()),
                Ok(Value::Bool(true))
            ),
        },
        _ => false,
    }
}

fn structured(raw: &Value) -> Option<Value> {
    match raw {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Array(_) | Value::Object(_) => Some(raw.clone()),
        _ => None,
    }
}

/// Split a leading sign and the run of characters accepted by `accept`.
fn numeric_prefix(s: &str, accept: impl Fn(usize, char) -> bool) -> &str {
    let s = s.trim_start();
    let sign = usize::from(s.starts_with(['+', '-']));
    let len = s[sign..]
        .char_indices()
        .take_while(|(i, c)| accept(*i, *c))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    &s[..sign + len]
}

/// Leading decimal integer: `"800px"` → 800, `"12.9"` → 12, `"px"` → none.
/// Saturates instead of overflowing.
pub(crate) fn integer_prefix(s: &str) -> Option<i64> {
    let prefix = numeric_prefix(s, |_, c| c.is_ascii_digit());
    let (negative, digits) = match prefix.as_bytes().first() {
        Some(b'-') => (true, &prefix[1..]),
        Some(b'+') => (false, &prefix[1..]),
        _ => (false, prefix),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.bytes().fold(0i64, |acc, d| {
        acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

/// Leading decimal number with optional fraction and exponent.
pub(crate) fn float_prefix(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let prefix = numeric_prefix(trimmed, |_, c| c.is_ascii_digit() || c == '.');
    // A second '.' ends the number.
    let prefix = match prefix.match_indices('.').nth(1) {
        Some((second, _)) => &prefix[..second],
        None => prefix,
    };
    if !prefix.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = &trimmed[prefix.len()..];
    let exponent = rest
        .strip_prefix(['e', 'E'])
        .filter(|exp| exp.starts_with(|c: char| c.is_ascii_digit() || c == '+' || c == '-'))
        .map(|exp| numeric_prefix(exp, |_, c| c.is_ascii_digit()))
        .filter(|exp| exp.bytes().any(|b| b.is_ascii_digit()))
        .map(|exp| exp.len() + 1)
        .unwrap_or(0);
    trimmed[..prefix.len() + exponent].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn boolean_vectors() {
        let cases = [
            ("1", true),
            ("0", false),
            ("true", true),
            ("false", false),
            ("yes", false),
            ("2", false),
            ("tru", false),
            ("TRUE", true),
            ("null", false),
            ("1abc", true),
            ("", false),
        ];
        for (input, expected) in cases {
            assert_eq!(
                coerce(&text(input), ParamKind::Boolean, true),
                Coerced::Boolean(expected),
                "input {input:?}"
            );
        }
        assert_eq!(
            coerce(&json!(true), ParamKind::Boolean, true),
            Coerced::Boolean(true)
        );
    }

    #[test]
    fn integers_use_leading_prefix() {
        assert_eq!(integer_prefix("800px"), Some(800));
        assert_eq!(integer_prefix("  12.9"), Some(12));
        assert_eq!(integer_prefix("-90"), Some(-90));
        assert_eq!(integer_prefix("+7"), Some(7));
        assert_eq!(integer_prefix("px800"), None);
        assert_eq!(integer_prefix("-"), None);
        assert_eq!(integer_prefix("99999999999999999999999"), Some(i64::MAX));
    }

    #[test]
    fn floats_use_leading_prefix() {
        assert_eq!(float_prefix("1.5x"), Some(1.5));
        assert_eq!(float_prefix(".5"), Some(0.5));
        assert_eq!(float_prefix("2.5.1"), Some(2.5));
        assert_eq!(float_prefix("1e2px"), Some(100.0));
        assert_eq!(float_prefix("3e"), Some(3.0));
        assert_eq!(float_prefix("."), None);
        assert_eq!(float_prefix("abc"), None);
    }

    #[test]
    fn negative_policy() {
        assert_eq!(coerce(&text("-5"), ParamKind::Integer, false), Coerced::Unset);
        assert_eq!(
            coerce(&text("-90"), ParamKind::Integer, true),
            Coerced::Integer(-90)
        );
        assert_eq!(coerce(&text("-0.5"), ParamKind::Float, false), Coerced::Unset);
        assert_eq!(coerce(&text("abc"), ParamKind::Integer, true), Coerced::Unset);
    }

    #[test]
    fn text_stringifies_non_strings() {
        assert_eq!(
            coerce(&json!(42), ParamKind::Text, false),
            Coerced::Text("42".into())
        );
        assert_eq!(
            coerce(&text("webp"), ParamKind::Text, false),
            Coerced::Text("webp".into())
        );
    }

    #[test]
    fn structured_falls_back_to_empty() {
        assert_eq!(
            coerce(&text("[1,0,0,1]"), ParamKind::List, false),
            Coerced::List(vec![json!(1), json!(0), json!(0), json!(1)])
        );
        assert_eq!(
            coerce(&text("[1,0"), ParamKind::List, false),
            Coerced::List(vec![])
        );
        assert_eq!(
            coerce(&text("[1]"), ParamKind::Object, false),
            Coerced::Object(Map::new())
        );
        let Coerced::Object(map) = coerce(&text(r#"{"sigma":2}"#), ParamKind::Object, false)
        else {
            panic!("expected object");
        };
        assert_eq!(map.get("sigma"), Some(&json!(2)));
    }

    proptest! {
        #[test]
        fn integer_prefix_ignores_trailing_junk(n in -1_000_000i64..1_000_000, junk in "[a-z%. ]{0,6}") {
            prop_assert_eq!(integer_prefix(&format!("{n}{junk}")), Some(n));
        }

        #[test]
        fn disallowed_negatives_never_survive(n in i64::MIN / 2..0) {
            prop_assert_eq!(coerce(&Value::String(n.to_string()), ParamKind::Integer, false), Coerced::Unset);
        }

        #[test]
        fn integer_booleans_are_true_only_for_one(n in -1000i64..1000) {
            prop_assert_eq!(
                coerce(&Value::String(n.to_string()), ParamKind::Boolean, false),
                Coerced::Boolean(n == 1)
            );
        }

        #[test]
        fn coercion_never_panics(s in ".*") {
            for kind in [ParamKind::Text, ParamKind::Integer, ParamKind::Float, ParamKind::Boolean, ParamKind::List, ParamKind::Object] {
                let _ = coerce(&Value::String(s.clone()), kind, false);
            }
        }
    }
}
