//! Base-unit denominations.
//!
//! A denomination is carried as a base-10 digit string so values wider than
//! any machine integer (18-decimal currencies, card-compressed exponents up
//! to 255) survive untouched.  Cards store a value as `base * 10^exponent`
//! with both parts in a `u8`, so not every string is representable on a card.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DenominationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Denomination(String);

impl Denomination {
    /// Parse a non-negative base-10 integer.  Leading zeros are dropped.
    pub fn parse(value: &str) -> Result<Self, DenominationError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DenominationError::Empty);
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_digit()) {
            return Err(DenominationError::InvalidDigit(bad));
        }
        let trimmed = value.trim_start_matches('0');
        let normalized = if trimmed.is_empty() { "0" } else { trimmed };
        Ok(Self(normalized.to_string()))
    }

    /// Build from the card's compressed form.
    pub fn from_parts(base: u8, exponent: u8) -> Self {
        if base == 0 {
            return Self("0".to_string());
        }
        let mut digits = base.to_string();
        digits.extend(std::iter::repeat('0').take(exponent as usize));
        Self(digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    /// Compress into `(base, exponent)` the way a card stores it: trailing
    /// zeros move into the exponent only while the base still exceeds a `u8`.
    pub fn to_parts(&self) -> Result<(u8, u8), DenominationError> {
        let mut digits = self.0.as_str();
        let mut exponent: usize = 0;
        while exceeds_u8(digits) {
            match digits.strip_suffix('0') {
                Some(rest) => {
                    digits = rest;
                    exponent += 1;
                }
                None => return Err(DenominationError::NotRepresentable(self.0.clone())),
            }
        }
        let exponent = u8::try_from(exponent).map_err(|_| DenominationError::ExceedsPrecision)?;
        let base = digits
            .parse::<u8>()
            .map_err(|_| DenominationError::NotRepresentable(self.0.clone()))?;
        Ok((base, exponent))
    }

    /// Render in whole units given the currency's decimal count,
    /// e.g. `1500000000000000000` with 18 decimals is `"1.5"`.
    pub fn to_display(&self, decimals: u32) -> String {
        let decimals = decimals as usize;
        if decimals == 0 {
            return self.0.clone();
        }
        let padded = if self.0.len() <= decimals {
            format!("{}{}", "0".repeat(decimals + 1 - self.0.len()), self.0)
        } else {
            self.0.clone()
        };
        let (whole, frac) = padded.split_at(padded.len() - decimals);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            whole.to_string()
        } else {
            format!("{whole}.{frac}")
        }
    }
}

fn exceeds_u8(digits: &str) -> bool {
    digits.len() > 3 || digits.parse::<u16>().map_or(true, |v| v > u8::MAX as u16)
}

impl Default for Denomination {
    fn default() -> Self {
        Self("0".to_string())
    }
}

impl Ord for Denomination {
    fn cmp(&self, other: &Self) -> Ordering {
        // normalized strings: longer means larger
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Denomination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Denomination {
    type Error = DenominationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Denomination> for String {
    fn from(value: Denomination) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_digits() {
        assert_eq!(Denomination::parse(""), Err(DenominationError::Empty));
        assert_eq!(
            Denomination::parse("-5"),
            Err(DenominationError::InvalidDigit('-'))
        );
        assert_eq!(
            Denomination::parse("1.5"),
            Err(DenominationError::InvalidDigit('.'))
        );
    }

    #[test]
    fn normalizes_leading_zeros() {
        assert_eq!(Denomination::parse("000").unwrap().as_str(), "0");
        assert_eq!(Denomination::parse("0042").unwrap().as_str(), "42");
    }

    #[test]
    fn card_compression() {
        let d = Denomination::parse("1000000000000000000").unwrap();
        assert_eq!(d.to_parts().unwrap(), (100, 16));

        let d = Denomination::parse("200").unwrap();
        assert_eq!(d.to_parts().unwrap(), (200, 0));

        let d = Denomination::parse("25500").unwrap();
        assert_eq!(d.to_parts().unwrap(), (255, 2));

        let d = Denomination::parse("256").unwrap();
        assert!(matches!(
            d.to_parts(),
            Err(DenominationError::NotRepresentable(_))
        ));

        let huge = format!("1{}", "0".repeat(258));
        assert_eq!(
            Denomination::parse(&huge).unwrap().to_parts(),
            Err(DenominationError::ExceedsPrecision)
        );
    }

    #[test]
    fn parts_rebuild_the_same_value() {
        assert_eq!(Denomination::from_parts(12, 3).as_str(), "12000");
        assert_eq!(Denomination::from_parts(0, 9).as_str(), "0");
    }

    #[test]
    fn display_in_whole_units() {
        let d = Denomination::parse("1500000000000000000").unwrap();
        assert_eq!(d.to_display(18), "1.5");
        assert_eq!(Denomination::parse("5").unwrap().to_display(3), "0.005");
        assert_eq!(Denomination::parse("2000").unwrap().to_display(3), "2");
        assert_eq!(Denomination::parse("7").unwrap().to_display(0), "7");
    }

    #[test]
    fn orders_by_value() {
        let small = Denomination::parse("99").unwrap();
        let big = Denomination::parse("100").unwrap();
        assert!(small < big);
    }

    #[test]
    fn serde_as_string() {
        let d: Denomination = serde_json::from_str("\"300\"").unwrap();
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"300\"");
        assert!(serde_json::from_str::<Denomination>("\"3e5\"").is_err());
    }
}
