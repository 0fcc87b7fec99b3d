//! Patient demographics as `Patient` resources.
//!
//! Responsibilities:
//! - Define the public domain type [`PatientData`] and its code enums
//! - Translate patients to and from [`Resource`]
//!
//! Notes:
//! - The wire format supports multiple names; the flat domain type carries the first one and
//!   [`Patient::apply`] rewrites only that entry
//! - Identifiers are looked up by system. The personal id is the duplicate-detection key

use crate::identifier::{
    read_identifiers, set_resource_identifier, Identifier, PERSONAL_ID_SYSTEM,
    REGISTRATION_NUMBER_SYSTEM,
};
use crate::resource::Resource;
use crate::{FhirError, FhirResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Public domain-level types
// ============================================================================

/// Purpose of a human name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameUse {
    /// Official name.
    Official,
    /// Usual/preferred name.
    Usual,
    Temp,
    Nickname,
    Anonymous,
    /// Old name (no longer in use).
    Old,
    Maiden,
}

impl NameUse {
    /// Convert to FHIR wire format string.
    pub fn to_wire(self) -> &'static str {
        match self {
            NameUse::Official => "official",
            NameUse::Usual => "usual",
            NameUse::Temp => "temp",
            NameUse::Nickname => "nickname",
            NameUse::Anonymous => "anonymous",
            NameUse::Old => "old",
            NameUse::Maiden => "maiden",
        }
    }

    /// Parse from FHIR wire format string.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "official" => Some(NameUse::Official),
            "usual" => Some(NameUse::Usual),
            "temp" => Some(NameUse::Temp),
            "nickname" => Some(NameUse::Nickname),
            "anonymous" => Some(NameUse::Anonymous),
            "old" => Some(NameUse::Old),
            "maiden" => Some(NameUse::Maiden),
            _ => None,
        }
    }
}

/// Administrative gender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

impl Gender {
    pub fn to_wire(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::Unknown => "unknown",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }
}

/// Kind of contact channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactSystem {
    Phone,
    Email,
    Fax,
    Sms,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub system: ContactSystem,
    pub value: String,
}

/// Domain-level carrier for patient data (flat structure).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientData {
    /// Store-assigned id; `None` until the patient is persisted.
    pub id: Option<String>,

    /// Business identifiers, each under its own system.
    pub identifiers: Vec<Identifier>,

    /// Purpose of the name (official, usual, nickname, etc.).
    pub use_type: Option<NameUse>,

    /// Family name (surname).
    pub family: Option<String>,

    /// Given names (first name, middle names).
    pub given: Vec<String>,

    pub gender: Option<Gender>,

    pub birth_date: Option<NaiveDate>,

    pub telecom: Vec<ContactPoint>,
}

impl PatientData {
    /// National personal-id number, if recorded.
    pub fn personal_id(&self) -> Option<&str> {
        self.identifier(PERSONAL_ID_SYSTEM)
    }

    pub fn registration_number(&self) -> Option<&str> {
        self.identifier(REGISTRATION_NUMBER_SYSTEM)
    }

    pub fn identifier(&self, system: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|i| i.system() == system)
            .map(Identifier::value)
    }

    /// Human-readable name for logs and warnings: given names then family name.
    pub fn display_name(&self) -> String {
        self.given
            .iter()
            .map(String::as_str)
            .chain(self.family.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Public Patient operations
// ============================================================================

/// Patient resource operations.
///
/// This is a zero-sized type used for namespacing patient-related operations.
/// All methods are associated functions.
pub struct Patient;

impl Patient {
    pub const RESOURCE_TYPE: &'static str = "Patient";

    pub fn to_resource(data: &PatientData) -> FhirResult<Resource> {
        Self::apply(&Resource::new(Self::RESOURCE_TYPE), data)
    }

    /// Writes the patient's values onto a copy of `existing`.
    ///
    /// Identifiers of systems not named in `data` are kept, except the personal-id and
    /// registration-number systems, which are always taken from `data`. Names after the
    /// first are kept.
    pub fn apply(existing: &Resource, data: &PatientData) -> FhirResult<Resource> {
        existing.expect_type(Self::RESOURCE_TYPE)?;

        let mut resource = existing.clone();
        if data.id.is_some() {
            resource.set_id(data.id.clone());
        }

        for system in [PERSONAL_ID_SYSTEM, REGISTRATION_NUMBER_SYSTEM] {
            set_resource_identifier(&mut resource, system, data.identifier(system));
        }
        for identifier in &data.identifiers {
            set_resource_identifier(&mut resource, identifier.system(), Some(identifier.value()));
        }

        let mut names = match resource.field("name") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let has_name = data.use_type.is_some() || data.family.is_some() || !data.given.is_empty();
        if has_name {
            let name = serde_json::to_value(HumanNameWire {
                use_type: data.use_type.map(|u| u.to_wire().to_string()),
                family: data.family.clone(),
                given: data.given.clone(),
            })?;
            match names.first_mut() {
                Some(first) => *first = name,
                None => names.push(name),
            }
        } else if !names.is_empty() {
            names.remove(0);
        }
        resource.set_or_remove_field("name", (!names.is_empty()).then_some(Value::Array(names)));

        resource.set_or_remove_field("gender", data.gender.map(|g| json!(g.to_wire())));
        resource.set_or_remove_field(
            "birthDate",
            data.birth_date
                .map(|d| json!(d.format("%Y-%m-%d").to_string())),
        );
        let telecom = (!data.telecom.is_empty())
            .then(|| serde_json::to_value(&data.telecom))
            .transpose()?;
        resource.set_or_remove_field("telecom", telecom);

        Ok(resource)
    }

    pub fn from_resource(resource: &Resource) -> FhirResult<PatientData> {
        resource.expect_type(Self::RESOURCE_TYPE)?;

        let first_name = resource
            .field_as::<Vec<HumanNameWire>>("name")?
            .and_then(|names| names.into_iter().next());
        let (use_type, family, given) = match first_name {
            Some(name) => {
                let use_type = name
                    .use_type
                    .map(|raw| {
                        NameUse::from_wire(&raw).ok_or_else(|| {
                            FhirError::Translation(format!("unknown name use '{raw}'"))
                        })
                    })
                    .transpose()?;
                (use_type, name.family, name.given)
            }
            None => (None, None, Vec::new()),
        };

        let gender = resource
            .string_field("gender")?
            .map(|raw| {
                Gender::from_wire(&raw)
                    .ok_or_else(|| FhirError::Translation(format!("unknown gender '{raw}'")))
            })
            .transpose()?;

        let birth_date = resource
            .string_field("birthDate")?
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    FhirError::Translation(format!("invalid birthDate '{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(PatientData {
            id: resource.id().map(str::to_string),
            identifiers: read_identifiers(resource)?,
            use_type,
            family,
            given,
            gender,
            birth_date,
            telecom: resource
                .field_as::<Vec<ContactPoint>>("telecom")?
                .unwrap_or_default(),
        })
    }

    /// Parse a patient from JSON text.
    pub fn parse(json_text: &str) -> FhirResult<PatientData> {
        Self::from_resource(&Resource::parse(json_text)?)
    }

    /// Render a patient as JSON text.
    pub fn render(data: &PatientData) -> FhirResult<String> {
        Self::to_resource(data)?.render()
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

/// Wire representation of a human name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
struct HumanNameWire {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    use_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    family: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    given: Vec<String>,
}
