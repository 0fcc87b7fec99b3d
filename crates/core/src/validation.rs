//! Input validation utilities.
//!
//! This module contains functions for validating user inputs before they reach a store or
//! become part of a search.

use crate::constants::MAX_PERSONAL_ID_LEN;
use crate::{ClinicError, ClinicResult};

/// Validates a personal-id number and returns it trimmed.
///
/// The value is matched exactly against stored identifiers, so only surrounding whitespace
/// is removed; case and inner characters are kept.
///
/// # Errors
///
/// Returns [`ClinicError::Validation`] if the value is blank or longer than
/// [`MAX_PERSONAL_ID_LEN`] characters.
pub fn validate_personal_id(value: &str) -> ClinicResult<&str> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ClinicError::Validation("personal id cannot be empty".into()));
    }

    if value.chars().count() > MAX_PERSONAL_ID_LEN {
        return Err(ClinicError::Validation(format!(
            "personal id exceeds maximum length of {MAX_PERSONAL_ID_LEN} characters"
        )));
    }

    Ok(value)
}

/// Validates an ISO 4217-style currency code: exactly three uppercase ASCII letters.
pub fn validate_currency_code(code: &str) -> ClinicResult<()> {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ClinicError::Validation(format!(
            "currency must be a three-letter uppercase code, got '{code}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_id_is_trimmed() {
        assert_eq!(validate_personal_id("  92032012345 ").unwrap(), "92032012345");
    }

    #[test]
    fn personal_id_rejects_blank_and_overlong() {
        assert!(validate_personal_id("   ").is_err());
        assert!(validate_personal_id(&"1".repeat(65)).is_err());
        assert!(validate_personal_id(&"ł".repeat(64)).is_ok());
    }

    #[test]
    fn personal_id_keeps_inner_characters() {
        assert_eq!(validate_personal_id(" AB 12/34.x ").unwrap(), "AB 12/34.x");
        assert_eq!(validate_personal_id("123|456").unwrap(), "123|456");
    }

    #[test]
    fn currency_codes() {
        assert!(validate_currency_code("EUR").is_ok());
        assert!(validate_currency_code("eur").is_err());
        assert!(validate_currency_code("EURO").is_err());
    }
}
