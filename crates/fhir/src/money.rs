//! Money amounts.
//!
//! The stored representation keeps two decimal places. [`Money::new`] rounds the amount
//! (midpoint away from zero) once, at construction, so every `Money` value survives a
//! round trip through a resource unchanged. Callers holding more precise amounts lose the
//! extra digits at that point.

use crate::{FhirError, FhirResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Number, Value};
use std::fmt;
use std::str::FromStr;

/// Decimal places kept by the stored representation.
pub const MONEY_SCALE: u32 = 2;

/// An amount with an ISO 4217 currency code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Money {
    value: Decimal,
    currency: String,
}

impl Money {
    /// Builds a money value rounded to two decimal places.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if `currency` is not three uppercase ASCII letters.
    pub fn new(value: Decimal, currency: &str) -> FhirResult<Self> {
        let currency = currency.trim();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(FhirError::InvalidInput(format!(
                "currency must be a 3-letter ISO code, got '{currency}'"
            )));
        }
        let mut value =
            value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(MONEY_SCALE);
        Ok(Self {
            value,
            currency: currency.to_string(),
        })
    }

    /// Parses a textual amount such as `"15.50"` or `"15,50"`.
    pub fn parse(amount: &str, currency: &str) -> FhirResult<Self> {
        let normalised = amount.trim().replace(',', ".");
        let value = Decimal::from_str(&normalised)
            .map_err(|_| FhirError::InvalidInput(format!("'{}' is not a number", amount.trim())))?;
        Self::new(value, currency)
    }

    pub fn zero(currency: &str) -> FhirResult<Self> {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    /// JSON form: `{"value": 15.50, "currency": "GEL"}`.
    ///
    /// The amount is written as its exact decimal text, never through a float.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the amount cannot be written as a JSON number.
    pub fn to_json(&self) -> FhirResult<Value> {
        let number = Number::from_str(&self.value.to_string()).map_err(|e| {
            FhirError::Translation(format!("money.value '{}': {e}", self.value))
        })?;
        Ok(json!({ "value": number, "currency": self.currency }))
    }

    pub fn from_json(value: &Value) -> FhirResult<Self> {
        let Some(Value::Number(amount)) = value.get("value") else {
            return Err(FhirError::Translation("money.value must be a number".into()));
        };
        let currency = value
            .get("currency")
            .and_then(Value::as_str)
            .ok_or_else(|| FhirError::Translation("money.currency must be a string".into()))?;
        let decimal = Decimal::from_str(&amount.to_string())
            .or_else(|_| Decimal::from_scientific(&amount.to_string()))
            .map_err(|e| FhirError::Translation(format!("money.value '{amount}': {e}")))?;
        Self::new(decimal, currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_two_places() {
        let money = Money::parse("10.005", "GEL").unwrap();
        assert_eq!(money.value().to_string(), "10.01");

        let money = Money::parse("7", "GEL").unwrap();
        assert_eq!(money.value().to_string(), "7.00");
    }

    #[test]
    fn accepts_comma_decimal_separator() {
        let money = Money::parse("15,5", "GEL").unwrap();
        assert_eq!(money.value().to_string(), "15.50");
    }

    #[test]
    fn rejects_non_numeric_amounts() {
        let err = Money::parse("abc", "GEL").expect_err("not a number");
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn rejects_bad_currency() {
        assert!(Money::parse("1", "gel").is_err());
        assert!(Money::parse("1", "LARI").is_err());
    }

    #[test]
    fn json_round_trip_is_exact() {
        for amount in ["15.50", "0.10", "0.07", "1234567.89", "0"] {
            let money = Money::parse(amount, "USD").unwrap();
            let back = Money::from_json(&money.to_json().unwrap()).unwrap();
            assert_eq!(back, money, "{amount}");
        }
    }

    #[test]
    fn large_amounts_keep_every_digit() {
        for amount in ["12345678901234567.89", "-98765432109876543.21", "9007199254740993.01"] {
            let money = Money::parse(amount, "GEL").unwrap();
            let json = money.to_json().unwrap();
            assert_eq!(json["value"].to_string(), money.value().to_string());
            let back = Money::from_json(&json).unwrap();
            assert_eq!(back, money, "{amount}");
        }
    }

    #[test]
    fn json_amount_keeps_two_decimals() {
        let json = Money::parse("15.5", "GEL").unwrap().to_json().unwrap();
        assert_eq!(json.to_string(), r#"{"value":15.50,"currency":"GEL"}"#);
    }

    #[test]
    fn detects_negative_amounts() {
        assert!(Money::parse("-1", "GEL").unwrap().is_negative());
        assert!(!Money::parse("0", "GEL").unwrap().is_negative());
    }
}
