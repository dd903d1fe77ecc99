//! Typed values carried by data broadcasts and exchanged with a device's API.
//!
//! A device declares each of its variables as one of three wire types:
//!
//! | Wire name | [`ValueType`]        | Rust representation |
//! |-----------|----------------------|---------------------|
//! | `UINT8`   | [`ValueType::Byte`]  | `u8`                |
//! | `INT`     | [`ValueType::Int`]   | `i32`               |
//! | `STRING`  | [`ValueType::String`]| non-empty `String`  |
//!
//! # Parsing vs. coercion
//!
//! [`Value::parse`] is strict: text that is not a literal of the requested
//! type is a [`ValueError::Format`], a numeric literal outside the type's range
//! is a [`ValueError::Range`].  Nothing is clamped.
//!
//! [`Value::coerce_to_byte`] and [`Value::coerce_to_int`] are the opposite:
//! best-effort, lossy conversions used when one layer needs to compare or
//! display a value of a different type.  Out-of-range integers are clamped to
//! `[0, 255]` when coerced to a byte.
//!
//! # Integer literal forms
//!
//! Integer text accepts an optional sign followed by decimal digits, a `0x`,
//! `0X` or `#` hexadecimal prefix, or a leading `0` for octal:
//!
//! ```rust
//! use uconfig_core::protocol::value::{Value, ValueType};
//!
//! assert_eq!(Value::parse(ValueType::Byte, "0xFF").unwrap(), Value::Byte(255));
//! assert_eq!(Value::parse(ValueType::Int, "-010").unwrap(), Value::Int(-8));
//! // Formatting is always decimal.
//! assert_eq!(Value::Byte(0x1F).format(), "31");
//! ```

use std::fmt;
use std::num::IntErrorKind;

use thiserror::Error;

/// The declared type of a device variable or action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Unsigned 8-bit integer (`UINT8` on the wire).
    Byte,
    /// Signed 32-bit integer (`INT` on the wire).
    Int,
    /// Non-empty text (`STRING` on the wire).
    String,
}

impl ValueType {
    /// Maps a wire type name to a [`ValueType`].
    ///
    /// Returns `None` for names the device protocol does not define.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "UINT8" => Some(Self::Byte),
            "INT" => Some(Self::Int),
            "STRING" => Some(Self::String),
            _ => None,
        }
    }

    /// The wire name used in beacons and schema documents.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Byte => "UINT8",
            Self::Int => "INT",
            Self::String => "STRING",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Errors produced by [`Value::parse`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The text is not a literal of the requested type.
    #[error("not a valid {kind} literal: {text:?}")]
    Format { kind: ValueType, text: String },

    /// The literal is well formed but outside the type's range.
    #[error("{text:?} is out of range for {kind}")]
    Range { kind: ValueType, text: String },
}

/// Why an integer literal could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralError {
    /// Not an integer literal at all.
    Malformed,
    /// A valid literal whose magnitude does not fit in an `i64`.
    Overflow,
}

/// Decodes a signed decimal, hexadecimal (`0x`, `0X`, `#`) or octal (leading
/// `0`) integer literal.
///
/// # Errors
///
/// Returns [`LiteralError::Malformed`] for anything that is not a literal and
/// [`LiteralError::Overflow`] when the value does not fit in an `i64`.
pub fn decode_integer_literal(text: &str) -> Result<i64, LiteralError> {
    let (negative, body) = if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix('+') {
        (false, rest)
    } else {
        (false, text)
    };

    let (radix, digits) = if let Some(rest) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
        .or_else(|| body.strip_prefix('#'))
    {
        (16, rest)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };

    // `from_str_radix` tolerates its own sign prefix; a second sign is not a literal.
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(LiteralError::Malformed);
    }

    let magnitude = u64::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => LiteralError::Overflow,
        _ => LiteralError::Malformed,
    })?;

    let signed = if negative {
        -i128::from(magnitude)
    } else {
        i128::from(magnitude)
    };
    i64::try_from(signed).map_err(|_| LiteralError::Overflow)
}

/// A single typed value.
///
/// Values are immutable; a new one is built for every reading.  Equality only
/// holds between values of the same variant, so `Byte(1) != Int(1)`.
///
/// Build `String` values through [`Value::parse`] or [`Value::text`] to keep
/// the non-empty invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Byte(u8),
    Int(i32),
    String(String),
}

impl Value {
    /// Builds a `String` value, rejecting empty text.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Format`] for the empty string.
    pub fn text(text: impl Into<String>) -> Result<Self, ValueError> {
        let text = text.into();
        if text.is_empty() {
            return Err(ValueError::Format {
                kind: ValueType::String,
                text,
            });
        }
        Ok(Self::String(text))
    }

    /// Parses `text` as a literal of type `kind`.
    ///
    /// # Errors
    ///
    /// - [`ValueError::Format`] when `text` is not a literal of `kind`
    ///   (including the empty string for [`ValueType::String`]).
    /// - [`ValueError::Range`] when a numeric literal does not fit `kind`.
    pub fn parse(kind: ValueType, text: &str) -> Result<Self, ValueError> {
        let range_err = || ValueError::Range {
            kind,
            text: text.to_string(),
        };
        let format_err = || ValueError::Format {
            kind,
            text: text.to_string(),
        };

        match kind {
            ValueType::Byte | ValueType::Int => {
                let n = decode_integer_literal(text).map_err(|e| match e {
                    LiteralError::Malformed => format_err(),
                    LiteralError::Overflow => range_err(),
                })?;
                if kind == ValueType::Byte {
                    u8::try_from(n).map(Self::Byte).map_err(|_| range_err())
                } else {
                    i32::try_from(n).map(Self::Int).map_err(|_| range_err())
                }
            }
            ValueType::String => Self::text(text),
        }
    }

    /// The variant's type.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Byte(_) => ValueType::Byte,
            Self::Int(_) => ValueType::Int,
            Self::String(_) => ValueType::String,
        }
    }

    /// Renders the value as text.
    ///
    /// Inverse of [`Value::parse`] for every value; numbers are always decimal.
    pub fn format(&self) -> String {
        self.to_string()
    }

    /// Best-effort conversion to a byte.
    ///
    /// Integers are clamped to `[0, 255]`; strings are decoded as integer
    /// literals first.  Returns `None` for non-numeric strings.
    pub fn coerce_to_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(b) => Some(*b),
            Self::Int(_) | Self::String(_) => self
                .coerce_to_int()
                .map(|i| i.clamp(0, i32::from(u8::MAX)) as u8),
        }
    }

    /// Best-effort conversion to an `i32`.
    ///
    /// Returns `None` for strings that are not integer literals or that do
    /// not fit in an `i32`.
    pub fn coerce_to_int(&self) -> Option<i32> {
        match self {
            Self::Byte(b) => Some(i32::from(*b)),
            Self::Int(i) => Some(*i),
            Self::String(s) => decode_integer_literal(s)
                .ok()
                .and_then(|n| i32::try_from(n).ok()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
