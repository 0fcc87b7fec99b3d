//! Insurance coverage as `Coverage` resources.
//!
//! A coverage belongs to one visit (linked through the coverage-encounter extension) and
//! occupies a priority slot: 1 is the primary payer. Slots are identities, not positions.

use crate::extensions::COVERAGE_ENCOUNTER;
use crate::reference::Reference;
use crate::resource::{Extension, Resource};
use crate::{FhirError, FhirResult};
use chrono::{DateTime, Utc};
use clinic_types::NonEmptyText;
use serde::Deserialize;
use serde_json::json;
use std::fmt;

/// Number of coverage slots per visit.
pub const MAX_COVERAGES_PER_VISIT: u8 = 3;

// ============================================================================
// Public domain-level types
// ============================================================================

/// Priority slot of a coverage within a visit: 1, 2 or 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoverageOrder(u8);

impl CoverageOrder {
    pub const PRIMARY: CoverageOrder = CoverageOrder(1);

    pub fn new(order: u8) -> FhirResult<Self> {
        if (1..=MAX_COVERAGES_PER_VISIT).contains(&order) {
            Ok(Self(order))
        } else {
            Err(FhirError::InvalidInput(format!(
                "coverage order must be between 1 and {MAX_COVERAGES_PER_VISIT}, got {order}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = CoverageOrder> {
        (1..=MAX_COVERAGES_PER_VISIT).map(CoverageOrder)
    }
}

impl fmt::Display for CoverageOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coverage status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CoverageStatus {
    #[default]
    Active,
    Cancelled,
    Draft,
    EnteredInError,
}

impl CoverageStatus {
    pub fn to_wire(self) -> &'static str {
        match self {
            CoverageStatus::Active => "active",
            CoverageStatus::Cancelled => "cancelled",
            CoverageStatus::Draft => "draft",
            CoverageStatus::EnteredInError => "entered-in-error",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CoverageStatus::Active),
            "cancelled" => Some(CoverageStatus::Cancelled),
            "draft" => Some(CoverageStatus::Draft),
            "entered-in-error" => Some(CoverageStatus::EnteredInError),
            _ => None,
        }
    }
}

/// Domain-level carrier for a coverage record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageData {
    /// Store-assigned id; `None` until persisted.
    pub id: Option<String>,

    /// Visit this coverage is attached to.
    pub encounter: Reference,

    /// Insurance company.
    pub payor: Reference,

    /// Insured patient.
    pub beneficiary: Reference,

    /// Priority slot; records written by older tools may lack one.
    pub order: Option<CoverageOrder>,

    pub status: CoverageStatus,

    pub type_code: Option<NonEmptyText>,

    /// Policy or subscriber number.
    pub subscriber_id: Option<NonEmptyText>,

    /// Creation time recorded by the store (read from `meta.created`).
    pub created: Option<DateTime<Utc>>,
}

// ============================================================================
// Public Coverage operations
// ============================================================================

/// Coverage resource operations.
pub struct Coverage;

impl Coverage {
    pub const RESOURCE_TYPE: &'static str = "Coverage";

    pub fn to_resource(data: &CoverageData) -> FhirResult<Resource> {
        Self::apply(&Resource::new(Self::RESOURCE_TYPE), data)
    }

    /// Writes coverage values onto a copy of `existing`, keeping unrelated data.
    pub fn apply(existing: &Resource, data: &CoverageData) -> FhirResult<Resource> {
        existing.expect_type(Self::RESOURCE_TYPE)?;
        expect_reference_type("encounter", &data.encounter, "Encounter")?;
        expect_reference_type("beneficiary", &data.beneficiary, "Patient")?;

        let mut resource = existing.clone();
        if data.id.is_some() {
            resource.set_id(data.id.clone());
        }
        if data.created.is_some() {
            resource.meta_mut().created = data.created;
        }

        resource.set_field("status", json!(data.status.to_wire()));
        resource.set_or_remove_field(
            "type",
            data.type_code
                .as_ref()
                .map(|code| json!({ "coding": [{ "code": code.as_str() }] })),
        );
        resource.set_or_remove_field(
            "subscriberId",
            data.subscriber_id.as_ref().map(|s| json!(s.as_str())),
        );
        resource.set_field("beneficiary", data.beneficiary.to_json());
        resource.set_field("payor", json!([data.payor.to_json()]));
        resource.set_or_remove_field("order", data.order.map(|o| json!(o.get())));
        resource.set_extension(Extension::reference(COVERAGE_ENCOUNTER, &data.encounter));

        Ok(resource)
    }

    pub fn from_resource(resource: &Resource) -> FhirResult<CoverageData> {
        resource.expect_type(Self::RESOURCE_TYPE)?;

        let status = match resource.string_field("status")? {
            Some(raw) => CoverageStatus::from_wire(&raw).ok_or_else(|| {
                FhirError::Translation(format!("unknown Coverage status '{raw}'"))
            })?,
            None => return Err(FhirError::Translation("Coverage has no status".into())),
        };

        let encounter = resource
            .extension_reference(COVERAGE_ENCOUNTER)?
            .ok_or_else(|| FhirError::Translation("Coverage is not linked to a visit".into()))?;

        let beneficiary = resource
            .field("beneficiary")
            .map(Reference::from_json)
            .transpose()?
            .ok_or_else(|| FhirError::Translation("Coverage has no beneficiary".into()))?;

        let payor = match resource.field("payor") {
            Some(serde_json::Value::Array(items)) => items
                .first()
                .map(Reference::from_json)
                .transpose()?,
            Some(other) => {
                return Err(FhirError::Translation(format!(
                    "Coverage payor must be a list, got {other}"
                )))
            }
            None => None,
        }
        .ok_or_else(|| FhirError::Translation("Coverage has no payor".into()))?;

        let order = resource
            .field_as::<u32>("order")?
            .map(|o| {
                u8::try_from(o)
                    .map_err(|_| FhirError::InvalidInput(format!("coverage order {o} out of range")))
                    .and_then(CoverageOrder::new)
            })
            .transpose()?;

        let type_code = resource
            .field_as::<TypeWire>("type")?
            .and_then(|t| t.coding.into_iter().find_map(|c| c.code))
            .and_then(|c| NonEmptyText::new(c).ok());

        Ok(CoverageData {
            id: resource.id().map(str::to_string),
            encounter,
            payor,
            beneficiary,
            order,
            status,
            type_code,
            subscriber_id: NonEmptyText::from_optional(resource.string_field("subscriberId")?),
            created: resource.meta().created,
        })
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Deserialize)]
struct TypeWire {
    #[serde(default)]
    coding: Vec<CodingWire>,
}

#[derive(Deserialize)]
struct CodingWire {
    code: Option<String>,
}

fn expect_reference_type(field: &str, reference: &Reference, expected: &str) -> FhirResult<()> {
    if reference.resource_type() != expected {
        return Err(FhirError::InvalidReference(format!(
            "coverage {field} must reference {expected}, got {reference}"
        )));
    }
    Ok(())
}
