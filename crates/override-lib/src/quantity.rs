//! Resource quantity arithmetic
//!
//! Kubernetes serializes CPU and memory amounts as suffixed strings
//! ("500m", "16Gi", "1e3"). This module parses them into an exact
//! fixed-point value so amounts can be compared, clamped and rounded
//! without going through string comparison, and prints them back in
//! the canonical form the API server would produce.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Internal resolution: one unit is 10^9 nanos
const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;

/// Rounding unit for memory amounts declared with a binary suffix
pub const MEBIBYTE: i64 = 1024 * 1024;

/// Rounding unit for every other memory amount
pub const MEGABYTE: i64 = 1000 * 1000;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Serialization family of a quantity, inferred from its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// SI suffixes (m, k, M, G, ...) or no suffix
    DecimalSI,
    /// Power-of-two suffixes (Ki, Mi, Gi, ...)
    BinarySI,
    /// Scientific notation (1e3, 5E-3)
    DecimalExponent,
}

/// Errors raised while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("quantity {0:?} does not start with a valid number")]
    InvalidNumber(String),

    #[error("quantity {input:?} has unknown suffix {suffix:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// An exact resource amount
///
/// Equality and ordering compare the numeric value only; two quantities
/// written as `1Gi` and `1073741824` are equal.
#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

impl Quantity {
    /// Parse a Kubernetes quantity string
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let out_of_range = || QuantityError::OutOfRange(input.to_string());

        let mut mantissa: i128 = 0;
        for digit in whole.bytes().chain(fraction.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(out_of_range)?;
        }

        let (binary_shift, decimal_exponent, format) = Self::parse_suffix(input, suffix)?;

        if binary_shift > 0 {
            mantissa = mantissa
                .checked_mul(1i128 << binary_shift)
                .ok_or_else(out_of_range)?;
        }

        // value = mantissa * 10^(decimal_exponent - fraction digits), stored in nanos
        let exponent = decimal_exponent + 9 - fraction.len() as i32;
        let magnitude = if exponent >= 0 {
            10i128
                .checked_pow(exponent as u32)
                .and_then(|scale| mantissa.checked_mul(scale))
                .ok_or_else(out_of_range)?
        } else {
            // precision finer than a nano rounds up, as the API server does
            match 10i128.checked_pow(exponent.unsigned_abs()) {
                Some(scale) => div_ceil(mantissa, scale),
                None => i128::from(mantissa != 0),
            }
        };

        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format,
        })
    }

    fn parse_suffix(input: &str, suffix: &str) -> Result<(u32, i32, Format), QuantityError> {
        if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
            return Ok((*shift, 0, Format::BinarySI));
        }

        if let Some((_, exponent)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
            return Ok((0, *exponent, Format::DecimalSI));
        }

        if suffix.len() > 1 && (suffix.starts_with('e') || suffix.starts_with('E')) {
            if let Ok(exponent) = suffix[1..].parse::<i32>() {
                return Ok((0, exponent, Format::DecimalExponent));
            }
        }

        Err(QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Quantity holding a whole number of units
    pub fn from_value(value: i64, format: Format) -> Self {
        Self {
            nanos: i128::from(value) * NANOS_PER_UNIT,
            format,
        }
    }

    /// Quantity holding a number of thousandths of a unit
    pub fn from_milli(milli: i64, format: Format) -> Self {
        Self {
            nanos: i128::from(milli) * NANOS_PER_MILLI,
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Whole units, rounded up
    pub fn value(&self) -> i64 {
        saturate(div_ceil(self.nanos, NANOS_PER_UNIT))
    }

    /// Thousandths of a unit, rounded up
    pub fn milli_value(&self) -> i64 {
        saturate(div_ceil(self.nanos, NANOS_PER_MILLI))
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Smallest of the given quantities, `None` if there are none
    pub fn min_of(quantities: &[Quantity]) -> Option<Quantity> {
        quantities.iter().min().copied()
    }

    /// Largest of the given quantities, `None` if there are none
    pub fn max_of(quantities: &[Quantity]) -> Option<Quantity> {
        quantities.iter().max().copied()
    }

    fn fmt_binary(&self, f: &mut fmt::Formatter<'_>) -> Option<fmt::Result> {
        if self.nanos % NANOS_PER_UNIT != 0 {
            return None;
        }

        let value = self.nanos / NANOS_PER_UNIT;
        if value.abs() < 1024 {
            return None;
        }

        let (shift, suffix) = BINARY_SUFFIXES
            .iter()
            .rev()
            .find(|(_, shift)| value % (1i128 << shift) == 0)
            .map(|(suffix, shift)| (*shift, *suffix))
            .unwrap_or((0, ""));

        Some(write!(f, "{}{}", value >> shift, suffix))
    }

    /// Largest power-of-thousand exponent that keeps the mantissa whole
    fn decimal_parts(&self) -> (i128, i32) {
        if self.nanos == 0 {
            return (0, 0);
        }

        for exponent in (-9..=18).rev().step_by(3) {
            let scale = 10i128.pow((exponent + 9) as u32);
            if self.nanos % scale == 0 {
                return (self.nanos / scale, exponent);
            }
        }

        (self.nanos, -9)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.format == Format::BinarySI {
            if let Some(result) = self.fmt_binary(f) {
                return result;
            }
        }

        let (mantissa, exponent) = self.decimal_parts();
        match self.format {
            Format::DecimalExponent if exponent != 0 => write!(f, "{}e{}", mantissa, exponent),
            Format::DecimalExponent => write!(f, "{}", mantissa),
            _ => {
                let suffix = DECIMAL_SUFFIXES
                    .iter()
                    .find(|(_, e)| *e == exponent)
                    .map(|(s, _)| *s)
                    .unwrap_or("");
                write!(f, "{}{}", mantissa, suffix)
            }
        }
    }
}

impl TryFrom<&RawQuantity> for Quantity {
    type Error = QuantityError;

    fn try_from(raw: &RawQuantity) -> Result<Self, Self::Error> {
        Self::parse(&raw.0)
    }
}

impl From<Quantity> for RawQuantity {
    fn from(quantity: Quantity) -> Self {
        RawQuantity(quantity.to_string())
    }
}

/// Round a byte count down to a whole MiB (binary) or MB (otherwise)
pub fn round_down_to_unit(bytes: i64, format: Format) -> i64 {
    let unit = match format {
        Format::BinarySI => MEBIBYTE,
        _ => MEGABYTE,
    };

    match bytes % unit {
        0 => bytes,
        rem => bytes - rem,
    }
}

fn div_ceil(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator.div_euclid(denominator);
    if numerator.rem_euclid(denominator) != 0 {
        quotient + 1
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value > 0 { i64::MAX } else { i64::MIN })
}
