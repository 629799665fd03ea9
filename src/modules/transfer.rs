//! Token transfer records and fixed-point amount normalization

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits kept when normalizing a raw amount for display and thresholding
pub const DISPLAY_PRECISION: usize = 2;

/// Significant digits a `Decimal` holds without rounding
const MAX_SIGNIFICANT_DIGITS: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty token value")]
    Empty,
    #[error("token value is not a non-negative integer: {0}")]
    NotAnInteger(String),
    #[error("token value {0} overflows the decimal range")]
    Overflow(String),
}

/// Raw integer amount in the token's smallest unit.
///
/// Kept as its decimal digit string so values beyond 64 (or 128) bits survive intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenValue(String);

impl TokenValue {
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AmountError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::NotAnInteger(raw.to_string()));
        }
        let digits = raw.trim_start_matches('0');
        Ok(Self(if digits.is_empty() {
            "0".to_string()
        } else {
            digits.to_string()
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TokenValue {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TokenValue {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TokenValue> for String {
    fn from(value: TokenValue) -> Self {
        value.0
    }
}

impl From<u128> for TokenValue {
    fn from(value: u128) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed token movement, already mapped out of the upstream response shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: TokenValue,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
}

/// Divide `value` by `10^decimals`, truncating (never rounding) to two fractional digits.
///
/// Works on the digit string directly so the result is identical for any input width.
pub fn format_token_amount(value: &TokenValue, decimals: u32) -> Result<Decimal, AmountError> {
    let digits = value.as_str();
    let scale = decimals as usize;

    let (whole, fraction) = if digits.len() > scale {
        digits.split_at(digits.len() - scale)
    } else {
        ("0", digits)
    };

    let mut fraction: String = format!("{:0>width$}", fraction, width = scale)
        .chars()
        .take(DISPLAY_PRECISION)
        .collect();
    while fraction.len() < DISPLAY_PRECISION {
        fraction.push('0');
    }

    let whole = match whole.trim_start_matches('0') {
        "" => "0",
        w => w,
    };

    // Past this width the parse would silently round the last digits
    if whole.len() + DISPLAY_PRECISION > MAX_SIGNIFICANT_DIGITS {
        return Err(AmountError::Overflow(digits.to_string()));
    }

    Decimal::from_str(&format!("{}.{}", whole, fraction))
        .map_err(|_| AmountError::Overflow(digits.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(raw: &str, decimals: u32) -> Decimal {
        format_token_amount(&TokenValue::parse(raw).unwrap(), decimals).unwrap()
    }

    #[test]
    fn truncates_instead_of_rounding() {
        assert_eq!(amount("5123456789012345678", 18), dec!(5.12));
        assert_eq!(amount("5129999999999999999", 18), dec!(5.12));
    }

    #[test]
    fn values_below_one_token_keep_leading_zeros() {
        assert_eq!(amount("50000000000000000", 18), dec!(0.05));
        assert_eq!(amount("4", 18), dec!(0));
        assert_eq!(amount("0", 18), dec!(0));
    }

    #[test]
    fn values_wider_than_u128_are_exact() {
        // 10^40 base units at 18 decimals is 10^22 tokens
        let raw = format!("1{}", "0".repeat(40));
        assert_eq!(amount(&raw, 18), Decimal::from_str("10000000000000000000000").unwrap());
    }

    #[test]
    fn small_decimal_scales() {
        assert_eq!(amount("123456", 0), dec!(123456));
        assert_eq!(amount("123456", 1), dec!(12345.6));
        assert_eq!(amount("123456", 3), dec!(123.45));
    }

    #[test]
    fn eight_thousand_tokens() {
        let raw = format!("8000{}", "0".repeat(18));
        assert_eq!(amount(&raw, 18), dec!(8000));
    }

    #[test]
    fn rejects_non_integer_values() {
        assert_eq!(TokenValue::parse(""), Err(AmountError::Empty));
        assert!(matches!(TokenValue::parse("-12"), Err(AmountError::NotAnInteger(_))));
        assert!(matches!(TokenValue::parse("1.5"), Err(AmountError::NotAnInteger(_))));
        assert!(matches!(TokenValue::parse("0x1f"), Err(AmountError::NotAnInteger(_))));
    }

    #[test]
    fn leading_zeros_are_normalized() {
        assert_eq!(TokenValue::parse("000123").unwrap().as_str(), "123");
        assert_eq!(TokenValue::parse("0000").unwrap().as_str(), "0");
    }

    #[test]
    fn overflowing_whole_part_is_an_error() {
        let raw = format!("9{}", "9".repeat(60));
        let value = TokenValue::parse(&raw).unwrap();
        assert!(matches!(
            format_token_amount(&value, 0),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn widest_exact_whole_part_is_kept() {
        // 26 whole digits plus 2 fractional fill the 28-digit mantissa
        let raw = format!("{}99", "7".repeat(26));
        let expected = Decimal::from_str(&format!("{}.99", "7".repeat(26))).unwrap();
        assert_eq!(amount(&raw, 2), expected);
    }

    #[test]
    fn whole_part_that_would_round_is_an_error() {
        for whole in ["9".repeat(28), "7".repeat(28), "1".repeat(27)] {
            let value = TokenValue::parse(&format!("{}99", whole)).unwrap();
            assert!(
                matches!(format_token_amount(&value, 2), Err(AmountError::Overflow(_))),
                "{} digits should not fit",
                whole.len()
            );
        }
    }

    #[test]
    fn token_value_serde_as_string() {
        let value: TokenValue = serde_json::from_str("\"0042\"").unwrap();
        assert_eq!(value.as_str(), "42");
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"42\"");
        assert!(serde_json::from_str::<TokenValue>("\"abc\"").is_err());
    }
}
