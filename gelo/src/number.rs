use std::{fmt, sync::OnceLock};

use crate::symbol::Symbol;

/// A float64 with a cached serialization.
///
/// Numbers read from source keep the spelling they were written with, so
/// `1.0` and `1` are equal numbers but distinct dictionary keys. Computed
/// numbers serialize as an integer when integral, otherwise as the
/// shortest spelling that reads back to the same value.
#[derive(Clone)]
pub struct Number {
    value: f64,
    ser: OnceLock<Symbol>,
}

impl Number {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            ser: OnceLock::new(),
        }
    }

    /// Parse a number, remembering `text` as its serialization.
    pub fn parse(text: &[u8]) -> Option<Self> {
        // `inf` and `NaN` stay symbols
        if text
            .iter()
            .any(|b| b.is_ascii_alphabetic() && !matches!(b, b'e' | b'E'))
        {
            return None;
        }
        let value = std::str::from_utf8(text).ok()?.parse::<f64>().ok()?;
        Some(Self {
            value,
            ser: OnceLock::from(Symbol::new(text)),
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// The value as an integer, if it is integral and fits in an `i64`.
    pub fn as_int(&self) -> Option<i64> {
        let v = self.value;
        if !v.is_finite() || v.fract() != 0.0 || v >= i64::MAX as f64 || v < i64::MIN as f64 {
            return None;
        }
        Some(v as i64)
    }

    pub fn ser(&self) -> Symbol {
        self.ser
            .get_or_init(|| match self.as_int() {
                Some(i) => Symbol::new(i.to_string().into_bytes()),
                None => Symbol::new(format!("{:?}", self.value).into_bytes()),
            })
            .clone()
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Number({})", self.ser())
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Self::new(v)
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Self::new(v as f64)
    }
}
