mod confirmation;
mod hotel;
mod reservation;

use std::{fmt, str::FromStr};

use derive_more::{Display, Error};
use num_format::{Locale, ToFormattedString};
use serde_with::{DeserializeFromStr, SerializeDisplay};

pub use self::confirmation::*;
pub use self::hotel::*;
pub use self::reservation::*;

#[cfg(test)]
pub(crate) use self::confirmation::tests::ScriptedSource;

/// Largest whole part a price may have (10 digits, 2 of them decimals)
const MAX_WHOLE: u64 = 99_999_999;

/// A price with two decimal places, kept in hundredths.
///
/// Serialized as a decimal string such as `"300.00"`.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct Money(u64);

impl Money {
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// `1,250.50` style, for logs and receipts
    pub fn to_grouped_string(&self) -> String {
        format!(
            "{}.{:02}",
            (self.0 / 100).to_formatted_string(&Locale::en),
            self.0 % 100
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        let dangling_point = s.ends_with('.');
        if whole.is_empty() || dangling_point || !all_digits(whole) || !all_digits(fraction) {
            return Err(MoneyError::Malformed);
        }
        if fraction.len() > 2 {
            return Err(MoneyError::TooManyDecimals);
        }
        let whole = whole
            .parse::<u64>()
            .ok()
            .filter(|w| *w <= MAX_WHOLE)
            .ok_or(MoneyError::TooLarge)?;
        let cents = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| MoneyError::Malformed)? * 10,
            _ => fraction.parse::<u64>().map_err(|_| MoneyError::Malformed)?,
        };
        Ok(Self(whole * 100 + cents))
    }
}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[display(fmt = "Price must be a non-negative decimal number")]
    Malformed,
    #[display(fmt = "Price allows at most 2 decimal places")]
    TooManyDecimals,
    #[display(fmt = "Price allows at most 8 digits before the decimal point")]
    TooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_display() {
        assert_eq!(Money::from_cents(30000).to_string(), "300.00");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::default().to_string(), "0.00");
    }

    #[test]
    fn test_price_grouped() {
        assert_eq!(Money::from_cents(125050).to_grouped_string(), "1,250.50");
        assert_eq!(
            Money::from_cents(100000000).to_grouped_string(),
            "1,000,000.00"
        );
    }

    #[test]
    fn test_price_parse() {
        assert_eq!("300.00".parse::<Money>(), Ok(Money::from_cents(30000)));
        assert_eq!("300".parse::<Money>(), Ok(Money::from_cents(30000)));
        assert_eq!("12.5".parse::<Money>(), Ok(Money::from_cents(1250)));
        assert_eq!("99999999.99".parse::<Money>(), Ok(Money::from_cents(9999999999)));
        assert_eq!("-1.00".parse::<Money>(), Err(MoneyError::Malformed));
        assert_eq!("1,000".parse::<Money>(), Err(MoneyError::Malformed));
        assert_eq!("".parse::<Money>(), Err(MoneyError::Malformed));
        assert_eq!(".50".parse::<Money>(), Err(MoneyError::Malformed));
        assert_eq!("1.005".parse::<Money>(), Err(MoneyError::TooManyDecimals));
        assert_eq!("1.".parse::<Money>(), Err(MoneyError::Malformed));
        assert_eq!("100000000".parse::<Money>(), Err(MoneyError::TooLarge));
    }

    #[test]
    fn test_price_serializes_as_decimal_string() {
        let price = Money::from_cents(30000);
        assert_eq!(serde_json::to_string(&price).unwrap(), "\"300.00\"");
        assert_eq!(serde_json::from_str::<Money>("\"300.00\"").unwrap(), price);
        assert!(serde_json::from_str::<Money>("\"3.000\"").is_err());
    }
}
