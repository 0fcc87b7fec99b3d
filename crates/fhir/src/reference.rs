//! Validated `Type/id` references.
//!
//! References stand in for foreign keys between resources. A [`Reference`] can only be
//! built from a well-formed `(Type, id)` pair, so malformed pointers are rejected where
//! they enter the system rather than where they are dereferenced.

use crate::{FhirError, FhirResult};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a resource id.
const MAX_ID_LEN: usize = 64;

/// A typed pointer of the form `Type/id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    resource_type: String,
    id: String,
}

impl Reference {
    /// Builds a reference from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidReference`] if:
    /// - `resource_type` does not start with an ASCII letter or contains non-alphanumerics,
    /// - `id` is empty, longer than 64 characters, or contains characters other than
    ///   ASCII letters, digits, `-` and `.`.
    pub fn new(resource_type: &str, id: &str) -> FhirResult<Self> {
        let type_ok = resource_type
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && resource_type.bytes().all(|b| b.is_ascii_alphanumeric());
        if !type_ok {
            return Err(FhirError::InvalidReference(format!(
                "invalid resource type '{resource_type}'"
            )));
        }

        let id_ok = !id.is_empty()
            && id.len() <= MAX_ID_LEN
            && id
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'.'));
        if !id_ok {
            return Err(FhirError::InvalidReference(format!(
                "invalid id '{id}' for {resource_type}"
            )));
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })
    }

    /// Parses `Type/id`. Anything else (missing slash, extra segments, absolute URLs) is
    /// rejected.
    pub fn parse(input: &str) -> FhirResult<Self> {
        let mut parts = input.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(resource_type), Some(id), None) => Self::new(resource_type, id),
            _ => Err(FhirError::InvalidReference(format!(
                "expected 'Type/id', got '{input}'"
            ))),
        }
    }

    /// Parses `Type/id` and checks the type.
    pub fn parse_typed(input: &str, expected_type: &str) -> FhirResult<Self> {
        let reference = Self::parse(input)?;
        if reference.resource_type != expected_type {
            return Err(FhirError::InvalidReference(format!(
                "expected a {expected_type} reference, got '{input}'"
            )));
        }
        Ok(reference)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// JSON form used inside resources: `{"reference": "Type/id"}`.
    pub fn to_json(&self) -> Value {
        json!({ "reference": self.to_string() })
    }

    /// Reads `{"reference": "Type/id"}`.
    pub fn from_json(value: &Value) -> FhirResult<Self> {
        let raw = value
            .get("reference")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FhirError::InvalidReference(format!("expected {{\"reference\": ...}}, got {value}"))
            })?;
        Self::parse(raw)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl FromStr for Reference {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_displays() {
        let reference = Reference::new("Patient", "p-1").expect("valid");
        assert_eq!(reference.to_string(), "Patient/p-1");
        assert_eq!(reference.resource_type(), "Patient");
        assert_eq!(reference.id(), "p-1");
    }

    #[test]
    fn parses_well_formed_strings() {
        let reference: Reference = "SpecimenDefinition/abc.1".parse().expect("valid");
        assert_eq!(reference.id(), "abc.1");
    }

    #[test]
    fn rejects_malformed_strings() {
        for input in [
            "",
            "Patient",
            "Patient/",
            "/123",
            "Patient/1/_history/2",
            "http://x/Patient/1",
            "Patient/has space",
            "1Patient/1",
        ] {
            assert!(Reference::parse(input).is_err(), "should reject '{input}'");
        }
    }

    #[test]
    fn rejects_overlong_id() {
        let id = "a".repeat(65);
        assert!(Reference::new("Patient", &id).is_err());
        assert!(Reference::new("Patient", &id[..64]).is_ok());
    }

    #[test]
    fn parse_typed_checks_type() {
        assert!(Reference::parse_typed("Organization/1", "Organization").is_ok());
        let err = Reference::parse_typed("Patient/1", "Organization").expect_err("wrong type");
        assert!(matches!(err, FhirError::InvalidReference(_)));
    }

    #[test]
    fn json_form_round_trips() {
        let reference = Reference::new("Encounter", "e1").unwrap();
        let json = reference.to_json();
        assert_eq!(json["reference"], "Encounter/e1");
        assert_eq!(Reference::from_json(&json).unwrap(), reference);
        assert!(Reference::from_json(&serde_json::json!({"display": "x"})).is_err());
    }
}
