//! Patient visits as `Encounter` resources.
//!
//! Responsibilities:
//! - Define the public domain type [`Visit`] and its code enums
//! - Translate visits to and from [`Resource`]
//!
//! Notes:
//! - Visits are never removed; closing a visit is a status transition
//! - The registration number is an identifier under its own system, never read by position

use crate::extensions::{VISIT_REFERRER, VISIT_SENDING_ORGANIZATION};
use crate::identifier::{
    find_by_system, read_identifiers, set_resource_identifier, REGISTRATION_NUMBER_SYSTEM,
};
use crate::reference::Reference;
use crate::resource::{parse_instant, Extension, Resource};
use crate::{FhirError, FhirResult};
use chrono::{DateTime, Utc};
use clinic_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Code system for the encounter class.
pub const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";

// ============================================================================
// Public domain-level types
// ============================================================================

/// Encounter lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisitStatus {
    Planned,
    Arrived,
    Triaged,
    InProgress,
    OnLeave,
    Finished,
    Cancelled,
    EnteredInError,
    Unknown,
}

impl VisitStatus {
    /// Convert to FHIR wire format string.
    pub fn to_wire(self) -> &'static str {
        match self {
            VisitStatus::Planned => "planned",
            VisitStatus::Arrived => "arrived",
            VisitStatus::Triaged => "triaged",
            VisitStatus::InProgress => "in-progress",
            VisitStatus::OnLeave => "onleave",
            VisitStatus::Finished => "finished",
            VisitStatus::Cancelled => "cancelled",
            VisitStatus::EnteredInError => "entered-in-error",
            VisitStatus::Unknown => "unknown",
        }
    }

    /// Parse from FHIR wire format string.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(VisitStatus::Planned),
            "arrived" => Some(VisitStatus::Arrived),
            "triaged" => Some(VisitStatus::Triaged),
            "in-progress" => Some(VisitStatus::InProgress),
            "onleave" => Some(VisitStatus::OnLeave),
            "finished" => Some(VisitStatus::Finished),
            "cancelled" => Some(VisitStatus::Cancelled),
            "entered-in-error" => Some(VisitStatus::EnteredInError),
            "unknown" => Some(VisitStatus::Unknown),
            _ => None,
        }
    }

    /// Closed visits accept no further edits other than error correction.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            VisitStatus::Finished | VisitStatus::Cancelled | VisitStatus::EnteredInError
        )
    }
}

/// Kind of visit, carried as the encounter class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisitType {
    /// Inpatient stay.
    Stationary,
    Ambulatory,
    Emergency,
}

impl VisitType {
    pub fn to_wire(self) -> &'static str {
        match self {
            VisitType::Stationary => "IMP",
            VisitType::Ambulatory => "AMB",
            VisitType::Emergency => "EMER",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "IMP" => Some(VisitType::Stationary),
            "AMB" => Some(VisitType::Ambulatory),
            "EMER" => Some(VisitType::Emergency),
            _ => None,
        }
    }
}

/// Time span of a visit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Period {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Domain-level carrier for a visit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Visit {
    /// Store-assigned id; `None` until the visit is persisted.
    pub id: Option<String>,

    /// The patient this visit belongs to.
    pub patient: Reference,

    pub status: VisitStatus,

    pub visit_type: VisitType,

    pub period: Period,

    /// Referring practitioner.
    pub referrer: Option<Reference>,

    /// Organisation that sent the patient.
    pub sending_organization: Option<Reference>,

    pub registration_number: Option<NonEmptyText>,
}

// ============================================================================
// Public Encounter operations
// ============================================================================

/// Visit resource operations.
pub struct Encounter;

impl Encounter {
    pub const RESOURCE_TYPE: &'static str = "Encounter";

    pub fn to_resource(visit: &Visit) -> FhirResult<Resource> {
        Self::apply(&Resource::new(Self::RESOURCE_TYPE), visit)
    }

    /// Writes the visit's values onto a copy of `existing`, keeping unrelated data.
    pub fn apply(existing: &Resource, visit: &Visit) -> FhirResult<Resource> {
        existing.expect_type(Self::RESOURCE_TYPE)?;
        if visit.patient.resource_type() != "Patient" {
            return Err(FhirError::InvalidReference(format!(
                "visit subject must be a Patient, got {}",
                visit.patient
            )));
        }
        if let (Some(start), Some(end)) = (visit.period.start, visit.period.end) {
            if end < start {
                return Err(FhirError::InvalidInput(
                    "visit period ends before it starts".into(),
                ));
            }
        }

        let mut resource = existing.clone();
        if visit.id.is_some() {
            resource.set_id(visit.id.clone());
        }

        resource.set_field("status", json!(visit.status.to_wire()));
        resource.set_field(
            "class",
            json!({ "system": ACT_CODE_SYSTEM, "code": visit.visit_type.to_wire() }),
        );
        resource.set_field("subject", visit.patient.to_json());

        let period = PeriodWire {
            start: visit.period.start.map(|dt| dt.to_rfc3339()),
            end: visit.period.end.map(|dt| dt.to_rfc3339()),
        };
        let period = (period.start.is_some() || period.end.is_some())
            .then(|| serde_json::to_value(&period))
            .transpose()?;
        resource.set_or_remove_field("period", period);

        set_resource_identifier(
            &mut resource,
            REGISTRATION_NUMBER_SYSTEM,
            visit.registration_number.as_ref().map(NonEmptyText::as_str),
        );

        resource.set_or_remove_extension(
            VISIT_REFERRER,
            visit
                .referrer
                .as_ref()
                .map(|r| Extension::reference(VISIT_REFERRER, r)),
        );
        resource.set_or_remove_extension(
            VISIT_SENDING_ORGANIZATION,
            visit
                .sending_organization
                .as_ref()
                .map(|r| Extension::reference(VISIT_SENDING_ORGANIZATION, r)),
        );

        Ok(resource)
    }

    pub fn from_resource(resource: &Resource) -> FhirResult<Visit> {
        resource.expect_type(Self::RESOURCE_TYPE)?;

        let raw_status = resource
            .string_field("status")?
            .ok_or_else(|| FhirError::Translation("Encounter has no status".into()))?;
        let status = VisitStatus::from_wire(&raw_status).ok_or_else(|| {
            FhirError::Translation(format!("unknown Encounter status '{raw_status}'"))
        })?;

        let class = resource
            .field_as::<CodingWire>("class")?
            .ok_or_else(|| FhirError::Translation("Encounter has no class".into()))?;
        let visit_type = class
            .code
            .as_deref()
            .and_then(VisitType::from_wire)
            .ok_or_else(|| {
                FhirError::Translation(format!("unknown Encounter class {:?}", class.code))
            })?;

        let patient = resource
            .field("subject")
            .map(Reference::from_json)
            .transpose()?
            .ok_or_else(|| FhirError::Translation("Encounter has no subject".into()))?;

        let period = match resource.field_as::<PeriodWire>("period")? {
            Some(wire) => Period {
                start: parse_instant("period.start", wire.start)?,
                end: parse_instant("period.end", wire.end)?,
            },
            None => Period::default(),
        };

        let identifiers = read_identifiers(resource)?;
        let registration_number = find_by_system(&identifiers, REGISTRATION_NUMBER_SYSTEM)
            .and_then(|i| NonEmptyText::new(i.value()).ok());

        Ok(Visit {
            id: resource.id().map(str::to_string),
            patient,
            status,
            visit_type,
            period,
            referrer: resource.extension_reference(VISIT_REFERRER)?,
            sending_organization: resource.extension_reference(VISIT_SENDING_ORGANIZATION)?,
            registration_number,
        })
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
struct PeriodWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodingWire {
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit() -> Visit {
        Visit {
            id: Some("enc-1".into()),
            patient: Reference::new("Patient", "p1").unwrap(),
            status: VisitStatus::InProgress,
            visit_type: VisitType::Stationary,
            period: Period {
                start: Some("2024-05-01T08:30:00Z".parse().unwrap()),
                end: None,
            },
            referrer: Some(Reference::new("Practitioner", "dr-7").unwrap()),
            sending_organization: Some(Reference::new("Organization", "clinic-2").unwrap()),
            registration_number: Some(NonEmptyText::new("2024-0001").unwrap()),
        }
    }

    #[test]
    fn round_trips_visit() {
        let visit = visit();
        let resource = Encounter::to_resource(&visit).unwrap();
        assert_eq!(Encounter::from_resource(&resource).unwrap(), visit);
    }

    #[test]
    fn round_trips_through_json_text() {
        let visit = visit();
        let json = Encounter::to_resource(&visit).unwrap().render().unwrap();
        let back = Encounter::from_resource(&Resource::parse(&json).unwrap()).unwrap();
        assert_eq!(back, visit);
    }

    #[test]
    fn visit_types_map_to_act_codes() {
        for (visit_type, code) in [
            (VisitType::Stationary, "IMP"),
            (VisitType::Ambulatory, "AMB"),
            (VisitType::Emergency, "EMER"),
        ] {
            let mut v = visit();
            v.visit_type = visit_type;
            let resource = Encounter::to_resource(&v).unwrap();
            assert_eq!(resource.field("class").unwrap()["code"], code);
        }
    }

    #[test]
    fn absent_optionals_emit_nothing() {
        let mut v = visit();
        v.referrer = None;
        v.sending_organization = None;
        v.registration_number = None;
        v.period = Period::default();

        let resource = Encounter::to_resource(&v).unwrap();
        assert!(resource.extensions().is_empty());
        assert!(resource.field("identifier").is_none());
        assert!(resource.field("period").is_none());
        assert_eq!(Encounter::from_resource(&resource).unwrap(), v);
    }

    #[test]
    fn rejects_unknown_status() {
        let mut resource = Encounter::to_resource(&visit()).unwrap();
        resource.set_field("status", json!("paused"));
        let err = Encounter::from_resource(&resource).expect_err("unknown status");
        assert!(err.to_string().contains("paused"));
    }

    #[test]
    fn rejects_malformed_referrer() {
        let mut resource = Encounter::to_resource(&visit()).unwrap();
        resource.set_extension(Extension::string(VISIT_REFERRER, "dr-7"));
        assert!(Encounter::from_resource(&resource).is_err());
    }

    #[test]
    fn rejects_period_ending_before_start() {
        let mut v = visit();
        v.period.end = Some("2024-04-01T00:00:00Z".parse().unwrap());
        assert!(Encounter::to_resource(&v).is_err());
    }

    #[test]
    fn rejects_non_patient_subject() {
        let mut v = visit();
        v.patient = Reference::new("Group", "g1").unwrap();
        assert!(matches!(
            Encounter::to_resource(&v),
            Err(FhirError::InvalidReference(_))
        ));
    }

    #[test]
    fn closed_statuses() {
        assert!(VisitStatus::Finished.is_closed());
        assert!(VisitStatus::EnteredInError.is_closed());
        assert!(!VisitStatus::InProgress.is_closed());
    }
}
