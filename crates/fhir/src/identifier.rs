//! Namespaced business identifiers.
//!
//! Identifiers are `(system, value)` pairs. Lookups always match on `system`; the position of
//! an identifier in a resource's list carries no meaning.

use crate::resource::Resource;
use crate::{FhirError, FhirResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// Identifier system for national personal-id numbers (duplicate-detection natural key).
pub const PERSONAL_ID_SYSTEM: &str = "http://clinic.local/fhir/NamingSystem/personal-id";

/// Identifier system for hospital registration numbers (patients and visits).
pub const REGISTRATION_NUMBER_SYSTEM: &str =
    "http://clinic.local/fhir/NamingSystem/registration-number";

/// Identifier system for service catalog business codes.
pub const SERVICE_CODE_SYSTEM: &str = "http://clinic.local/fhir/NamingSystem/service-code";

/// A `(system, value)` pair, both parts trimmed and non-blank.
///
/// [`Identifier::new`] is the only constructor, so a stored identifier always matches a
/// lookup built from the same text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identifier {
    system: String,
    value: String,
}

impl Identifier {
    /// Builds an identifier; both parts are trimmed and must be non-blank.
    pub fn new(system: &str, value: &str) -> FhirResult<Self> {
        let system = system.trim();
        let value = value.trim();
        if system.is_empty() || value.is_empty() {
            return Err(FhirError::InvalidInput(
                "identifier system and value cannot be empty".into(),
            ));
        }
        Ok(Self {
            system: system.to_string(),
            value: value.to_string(),
        })
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Search token form: `system|value`.
    pub fn token(&self) -> String {
        format!("{}|{}", self.system, self.value)
    }
}

/// First identifier with the given system.
pub fn find_by_system<'a>(identifiers: &'a [Identifier], system: &str) -> Option<&'a Identifier> {
    identifiers.iter().find(|i| i.system == system)
}

/// Replaces (or removes, when `value` is `None` or blank) the identifier for one system,
/// leaving identifiers of other systems untouched and in order.
pub fn replace_system(identifiers: &mut Vec<Identifier>, system: &str, value: Option<&str>) {
    let position = identifiers.iter().position(|i| i.system == system.trim());
    identifiers.retain(|i| i.system != system.trim());
    if let Some(identifier) = value.and_then(|v| Identifier::new(system, v).ok()) {
        let index = position.unwrap_or(identifiers.len()).min(identifiers.len());
        identifiers.insert(index, identifier);
    }
}

/// Reads the `identifier` member of a resource. Members other than `system` and `value`
/// are ignored. Both parts are trimmed; entries with a blank or missing part cannot be
/// looked up and are skipped.
pub fn read_identifiers(resource: &Resource) -> FhirResult<Vec<Identifier>> {
    #[derive(Deserialize)]
    struct IdentifierWire {
        system: Option<String>,
        value: Option<String>,
    }

    let wires = resource
        .field_as::<Vec<IdentifierWire>>("identifier")?
        .unwrap_or_default();
    Ok(wires
        .into_iter()
        .filter_map(|w| match (w.system, w.value) {
            (Some(system), Some(value)) => Identifier::new(&system, &value).ok(),
            _ => None,
        })
        .collect())
}

/// Sets (or removes, when `value` is `None` or blank) the identifier for one system directly
/// on the raw `identifier` member, leaving other entries byte-for-byte intact. The value is
/// stored trimmed.
pub fn set_resource_identifier(resource: &mut Resource, system: &str, value: Option<&str>) {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let mut entries = match resource.field("identifier") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let matches = |v: &Value| v.get("system").and_then(Value::as_str) == Some(system);
    let position = entries.iter().position(matches);
    entries.retain(|v| !matches(v));
    if let Some(value) = value {
        let index = position.unwrap_or(entries.len()).min(entries.len());
        entries.insert(index, json!({ "system": system, "value": value }));
    }
    let field = (!entries.is_empty()).then_some(Value::Array(entries));
    resource.set_or_remove_field("identifier", field);
}
