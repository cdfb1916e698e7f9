//! Exact arithmetic over Kubernetes quantity strings.
//!
//! Quantities are parsed into signed nano-units so that `m`, `u` and `n`
//! suffixed values add up exactly. Formatting keeps the suffix family of the
//! left operand (binary `Ki..Ei` or decimal `k..E`) the way the API server
//! canonicalizes quantities.

use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::{Error, Result};

const NANO: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    BinarySI,
    DecimalSI,
}

/// A parsed quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Amount {
    nanos: i128,
    format: Format,
}

impl Amount {
    pub fn zero(format: Format) -> Self {
        Self { nanos: 0, format }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::validation(format!("invalid quantity {raw:?}"));
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid());
        }

        let (negative, body) = match raw.as_bytes()[0] {
            b'-' => (true, &raw[1..]),
            b'+' => (false, &raw[1..]),
            _ => (false, raw),
        };
        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut frac_digits: String = frac_part.chars().take(9).collect();
        while frac_digits.len() < 9 {
            frac_digits.push('0');
        }
        let frac: i128 = frac_digits.parse().map_err(|_| invalid())?;
        let mut nanos = int
            .checked_mul(NANO)
            .and_then(|n| n.checked_add(frac))
            .ok_or_else(invalid)?;

        let format = if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix)
        {
            nanos = nanos
                .checked_mul(1024_i128.pow(*power))
                .ok_or_else(invalid)?;
            Format::BinarySI
        } else {
            let exponent = if suffix.is_empty() {
                0
            } else if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
                *exp
            } else if let Some(exp) = suffix.strip_prefix(['e', 'E']) {
                exp.parse::<i32>().map_err(|_| invalid())?
            } else {
                return Err(invalid());
            };
            nanos = scale_by_power_of_ten(nanos, exponent).ok_or_else(invalid)?;
            Format::DecimalSI
        };

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
            format,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Sum keeping `self`'s format.
    pub fn add(self, other: Amount) -> Result<Amount> {
        self.combine(other, i128::checked_add)
    }

    /// Difference keeping `self`'s format.
    pub fn sub(self, other: Amount) -> Result<Amount> {
        self.combine(other, i128::checked_sub)
    }

    fn combine(self, other: Amount, op: fn(i128, i128) -> Option<i128>) -> Result<Amount> {
        let nanos = op(self.nanos, other.nanos)
            .ok_or_else(|| Error::validation(format!("quantity overflow combining {self} and {other}")))?;
        Ok(Amount {
            nanos,
            format: self.format,
        })
    }

    pub fn to_quantity(self) -> Quantity {
        Quantity(self.to_string())
    }
}

impl TryFrom<&Quantity> for Amount {
    type Error = Error;

    fn try_from(q: &Quantity) -> Result<Self> {
        Amount::parse(&q.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        if self.nanos < 0 {
            f.write_str("-")?;
        }
        let abs = self.nanos.abs();

        if abs % NANO != 0 {
            return if abs % 1_000_000 == 0 {
                write!(f, "{}m", abs / 1_000_000)
            } else if abs % 1_000 == 0 {
                write!(f, "{}u", abs / 1_000)
            } else {
                write!(f, "{abs}n")
            };
        }

        let whole = abs / NANO;
        match self.format {
            Format::BinarySI => {
                for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
                    let base = 1024_i128.pow(*power);
                    if whole % base == 0 {
                        return write!(f, "{}{}", whole / base, suffix);
                    }
                }
            }
            Format::DecimalSI => {
                for (suffix, exp) in DECIMAL_SUFFIXES.iter().rev().filter(|(_, e)| *e > 0) {
                    let base = 10_i128.pow(*exp as u32);
                    if whole % base == 0 {
                        return write!(f, "{}{}", whole / base, suffix);
                    }
                }
            }
        }
        write!(f, "{whole}")
    }
}

/// Multiplies by `10^exp`; negative exponents round away from zero so that a
/// sub-nano remainder is never silently dropped.
fn scale_by_power_of_ten(value: i128, exp: i32) -> Option<i128> {
    if exp >= 0 {
        value.checked_mul(10_i128.checked_pow(exp as u32)?)
    } else {
        let div = 10_i128.checked_pow(exp.unsigned_abs())?;
        let quotient = value / div;
        Some(if value % div == 0 {
            quotient
        } else {
            quotient + 1
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", "1", "2")]
    #[case("500m", "500m", "1")]
    #[case("1Gi", "1Gi", "2Gi")]
    #[case("512Mi", "512Mi", "1Gi")]
    #[case("1.5", "500m", "2")]
    #[case("100m", "50m", "150m")]
    #[case("1k", "24", "1024")]
    #[case("2e3", "0", "2k")]
    fn adds(#[case] a: &str, #[case] b: &str, #[case] expected: &str) {
        let sum = Amount::parse(a).unwrap().add(Amount::parse(b).unwrap()).unwrap();
        assert_eq!(sum.to_string(), expected);
    }

    #[rstest]
    #[case("1", "1", "0")]
    #[case("1", "2", "-1")]
    #[case("2Gi", "1Gi", "1Gi")]
    #[case("1", "250m", "750m")]
    fn subtracts(#[case] a: &str, #[case] b: &str, #[case] expected: &str) {
        let diff = Amount::parse(a).unwrap().sub(Amount::parse(b).unwrap()).unwrap();
        assert_eq!(diff.to_string(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("1Xi")]
    #[case(".")]
    #[case("1e")]
    fn rejects_garbage(#[case] raw: &str) {
        assert!(Amount::parse(raw).is_err());
    }

    #[test]
    fn format_follows_left_operand() {
        let binary = Amount::parse("1Ki").unwrap();
        let decimal = Amount::parse("1024").unwrap();
        assert_eq!(binary.add(Amount::zero(Format::DecimalSI)).unwrap().to_string(), "1Ki");
        assert_eq!(decimal.add(Amount::zero(Format::BinarySI)).unwrap().to_string(), "1024");
    }

    #[test]
    fn overflow_is_an_error() {
        let big = Amount::parse("1e29").unwrap();
        let err = big.add(big).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(Amount::parse("-1e29").unwrap().sub(big).is_err());
        assert!(big.sub(big).unwrap().is_zero());
    }
}
