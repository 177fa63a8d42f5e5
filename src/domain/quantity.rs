//! Exact Kubernetes quantity arithmetic
//!
//! Quantities are held as an integer count of milli-units so that sums such
//! as `1Gi + 2Gi` stay exact and render back as `3Gi`.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::fmt;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 7] = [
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Notation a quantity was written in; sums keep the left operand's notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Powers of two: Ki, Mi, Gi, ...
    BinarySI,
    /// Powers of ten: m, k, M, G, ...
    DecimalSI,
    /// Scientific: 1e3
    DecimalExponent,
}

/// A parsed quantity with exact integer arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactQuantity {
    millis: i128,
    format: QuantityFormat,
}

impl ExactQuantity {
    /// Zero in the given notation
    pub fn zero(format: QuantityFormat) -> Self {
        Self { millis: 0, format }
    }

    /// Parse a quantity string such as `10Gi`, `1.5G`, `500m` or `1e3`.
    ///
    /// Precision finer than one milli-unit is rounded up.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidQuantity {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = value.trim();
        let (negative, unsigned) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            Some(_) => (false, trimmed),
            None => return Err(invalid("empty quantity")),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("missing numeric part"));
        }
        if fraction.contains('.') {
            return Err(invalid("more than one decimal point"));
        }

        let (format, binary_power, decimal_exponent) =
            parse_suffix(suffix).ok_or_else(|| invalid("unknown suffix"))?;

        let mantissa: i128 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| invalid("numeric part out of range"))?;
        let scaled = 1024i128
            .checked_pow(binary_power)
            .and_then(|factor| mantissa.checked_mul(factor))
            .ok_or_else(|| invalid("value out of range"))?;

        // value = scaled * 10^(decimal_exponent - fraction digits); store value * 1000
        let exponent = i32::try_from(fraction.len())
            .ok()
            .and_then(|digits| decimal_exponent.checked_sub(digits))
            .and_then(|exponent| exponent.checked_add(3))
            .ok_or_else(|| invalid("exponent out of range"))?;
        let millis = if exponent >= 0 {
            10i128
                .checked_pow(exponent as u32)
                .and_then(|factor| scaled.checked_mul(factor))
                .ok_or_else(|| invalid("value out of range"))?
        } else {
            let divisor = 10i128
                .checked_pow(exponent.unsigned_abs())
                .ok_or_else(|| invalid("too many fractional digits"))?;
            let truncated = scaled / divisor;
            if scaled % divisor == 0 {
                truncated
            } else {
                truncated + 1
            }
        };

        Ok(Self {
            millis: if negative { -millis } else { millis },
            format,
        })
    }

    /// Parse a Kubernetes `Quantity`
    pub fn from_quantity(quantity: &Quantity) -> Result<Self> {
        Self::parse(&quantity.0)
    }

    /// Render back into a Kubernetes `Quantity` in canonical form
    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.to_string())
    }

    /// Exact sum, keeping this quantity's notation
    pub fn checked_add(self, other: ExactQuantity) -> Option<ExactQuantity> {
        Some(Self {
            millis: self.millis.checked_add(other.millis)?,
            format: self.format,
        })
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Value in whole base units, rounded up
    pub fn value(&self) -> i128 {
        let whole = self.millis / 1000;
        if self.millis % 1000 > 0 {
            whole + 1
        } else {
            whole
        }
    }
}

impl fmt::Display for ExactQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 != 0 {
            return write!(f, "{}m", self.millis);
        }
        let value = self.millis / 1000;
        if value == 0 {
            return write!(f, "0");
        }

        match self.format {
            QuantityFormat::BinarySI => {
                for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
                    let divisor = 1024i128.pow(*power);
                    if value % divisor == 0 {
                        return write!(f, "{}{}", value / divisor, suffix);
                    }
                }
            }
            QuantityFormat::DecimalExponent => {
                let mut mantissa = value;
                let mut exponent = 0;
                while mantissa % 1000 == 0 {
                    mantissa /= 1000;
                    exponent += 3;
                }
                return if exponent == 0 {
                    write!(f, "{}", mantissa)
                } else {
                    write!(f, "{}e{}", mantissa, exponent)
                };
            }
            QuantityFormat::DecimalSI => {}
        }

        // Binary values that are not a whole multiple of 1Ki fall back to decimal
        for (suffix, exponent) in DECIMAL_SUFFIXES.iter().rev() {
            if *exponent <= 0 {
                continue;
            }
            let divisor = 10i128.pow(*exponent as u32);
            if value % divisor == 0 {
                return write!(f, "{}{}", value / divisor, suffix);
            }
        }
        write!(f, "{}", value)
    }
}

fn parse_suffix(suffix: &str) -> Option<(QuantityFormat, u32, i32)> {
    if suffix.is_empty() {
        return Some((QuantityFormat::DecimalSI, 0, 0));
    }
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((QuantityFormat::BinarySI, *power, 0));
    }
    if let Some((_, exponent)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((QuantityFormat::DecimalSI, 0, *exponent));
    }
    let exponent = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
    exponent
        .parse::<i32>()
        .ok()
        .map(|exponent| (QuantityFormat::DecimalExponent, 0, exponent))
}

/// Add a fixed headroom to a requested capacity.
///
/// A missing request counts as zero, so the result is the headroom alone.
pub fn add_headroom(requested: Option<&Quantity>, headroom: &str) -> Result<Quantity> {
    let headroom = ExactQuantity::parse(headroom)?;
    let requested = match requested {
        Some(quantity) => ExactQuantity::from_quantity(quantity)?,
        None => ExactQuantity::zero(headroom.format()),
    };
    requested
        .checked_add(headroom)
        .map(|sum| sum.to_quantity())
        .ok_or_else(|| Error::InvalidQuantity {
            value: format!("{} + {}", requested, headroom),
            reason: "sum out of range".into(),
        })
}
