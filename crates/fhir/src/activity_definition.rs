//! Service catalog entries as `ActivityDefinition` resources.
//!
//! Responsibilities:
//! - Define the public domain type [`ServiceCatalogEntry`]
//! - Translate entries to and from [`Resource`] without losing unrelated data
//! - Enforce entry invariants (non-negative base price, well-formed and unique links)
//!
//! Field layout:
//! - `identifier[system=service-code]` carries the business code
//! - `title`, `description`, `date` (created), `topic[0].text` (group)
//! - `meta.tag[system=service-tag]` carries free-text tags
//! - `specimenRequirement` / `observationRequirement` hold linked definition references
//! - every other optional attribute is exactly one extension (see [`crate::extensions`])

use crate::extensions::{
    BASE_PRICE, CALCULATION_METHOD, EXTERNAL_CLASSIFICATION_CODE, EXTERNAL_ORDER_CODE,
    LAB_INTEGRATION_ENABLED, LAB_INTEGRATION_PROVIDER, SERVICE_TAG_SYSTEM, SERVICE_TYPE,
    TOTAL_AMOUNT,
};
use crate::identifier::{
    find_by_system, read_identifiers, set_resource_identifier, SERVICE_CODE_SYSTEM,
};
use crate::money::Money;
use crate::reference::Reference;
use crate::resource::{Extension, Resource, Tag};
use crate::{FhirError, FhirResult};
use chrono::{DateTime, NaiveDate};
use clinic_types::NonEmptyText;
use serde::Deserialize;
use serde_json::{json, Value};

// ============================================================================
// Public domain-level types
// ============================================================================

/// Lab-integration state of a service.
///
/// A provider can only exist while the integration is enabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LabIntegration {
    #[default]
    Disabled,
    Enabled { provider: Option<NonEmptyText> },
}

impl LabIntegration {
    pub fn is_enabled(&self) -> bool {
        matches!(self, LabIntegration::Enabled { .. })
    }

    pub fn provider(&self) -> Option<&NonEmptyText> {
        match self {
            LabIntegration::Enabled { provider } => provider.as_ref(),
            LabIntegration::Disabled => None,
        }
    }
}

/// Domain-level carrier for a medical-service catalog entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCatalogEntry {
    /// Store-assigned id; `None` until the entry is persisted.
    pub id: Option<String>,

    /// Unique business code.
    pub code: NonEmptyText,

    pub title: NonEmptyText,

    pub description: Option<NonEmptyText>,

    /// Group or topic the service is listed under.
    pub group: Option<NonEmptyText>,

    pub service_type: Option<NonEmptyText>,

    /// Non-negative base price.
    pub base_price: Money,

    pub total_amount: Option<Money>,

    pub calculation_method: Option<NonEmptyText>,

    pub created: Option<NaiveDate>,

    pub tags: Vec<NonEmptyText>,

    pub lab_integration: LabIntegration,

    /// Order code used by the external laboratory.
    pub order_code: Option<NonEmptyText>,

    /// Classification code used by the external laboratory.
    pub classification_code: Option<NonEmptyText>,

    /// Linked `SpecimenDefinition` ids, without duplicates.
    pub specimen_definition_ids: Vec<String>,

    /// Linked `ObservationDefinition` ids, without duplicates.
    pub observation_definition_ids: Vec<String>,
}

impl ServiceCatalogEntry {
    /// Minimal entry with a code, title and base price; everything else empty.
    pub fn new(code: NonEmptyText, title: NonEmptyText, base_price: Money) -> Self {
        Self {
            id: None,
            code,
            title,
            description: None,
            group: None,
            service_type: None,
            base_price,
            total_amount: None,
            calculation_method: None,
            created: None,
            tags: Vec::new(),
            lab_integration: LabIntegration::Disabled,
            order_code: None,
            classification_code: None,
            specimen_definition_ids: Vec::new(),
            observation_definition_ids: Vec::new(),
        }
    }
}

// ============================================================================
// Public ActivityDefinition operations
// ============================================================================

/// Service catalog resource operations.
///
/// This is a zero-sized type used for namespacing; all methods are associated functions.
pub struct ActivityDefinition;

impl ActivityDefinition {
    pub const RESOURCE_TYPE: &'static str = "ActivityDefinition";

    /// Member holding linked specimen-definition references.
    pub const SPECIMEN_FIELD: &'static str = "specimenRequirement";

    /// Member holding linked observation-definition references.
    pub const OBSERVATION_FIELD: &'static str = "observationRequirement";

    pub const SPECIMEN_TYPE: &'static str = "SpecimenDefinition";

    pub const OBSERVATION_TYPE: &'static str = "ObservationDefinition";

    /// Builds a fresh resource from an entry.
    pub fn to_resource(entry: &ServiceCatalogEntry) -> FhirResult<Resource> {
        Self::apply(&Resource::new(Self::RESOURCE_TYPE), entry)
    }

    /// Writes the entry's values onto a copy of `existing`.
    ///
    /// Members, tags, identifiers and extensions that this mapper does not own are kept
    /// unchanged. Owned optional values that are absent are removed, never emitted empty.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - `existing` is not an `ActivityDefinition`,
    /// - the base price is negative,
    /// - a linked id cannot form a valid reference.
    pub fn apply(existing: &Resource, entry: &ServiceCatalogEntry) -> FhirResult<Resource> {
        existing.expect_type(Self::RESOURCE_TYPE)?;
        if entry.base_price.is_negative() {
            return Err(FhirError::InvalidInput(format!(
                "base price cannot be negative (service {})",
                entry.code
            )));
        }

        let mut resource = existing.clone();
        if entry.id.is_some() {
            resource.set_id(entry.id.clone());
        }

        set_resource_identifier(&mut resource, SERVICE_CODE_SYSTEM, Some(entry.code.as_str()));
        if resource.field("status").is_none() {
            resource.set_field("status", json!("active"));
        }
        resource.set_field("title", json!(entry.title.as_str()));
        resource.set_or_remove_field("description", text_value(&entry.description));
        resource.set_or_remove_field(
            "topic",
            entry.group.as_ref().map(|g| json!([{ "text": g.as_str() }])),
        );
        resource.set_or_remove_field(
            "date",
            entry
                .created
                .map(|d| json!(d.format("%Y-%m-%d").to_string())),
        );

        let tags = &mut resource.meta_mut().tags;
        tags.retain(|t| t.system.as_deref() != Some(SERVICE_TAG_SYSTEM));
        tags.extend(entry.tags.iter().map(|t| Tag {
            system: Some(SERVICE_TAG_SYSTEM.to_string()),
            code: t.to_string(),
        }));

        resource.set_or_remove_field(
            Self::SPECIMEN_FIELD,
            reference_list(Self::SPECIMEN_TYPE, &entry.specimen_definition_ids)?,
        );
        resource.set_or_remove_field(
            Self::OBSERVATION_FIELD,
            reference_list(Self::OBSERVATION_TYPE, &entry.observation_definition_ids)?,
        );

        set_text_extension(&mut resource, SERVICE_TYPE, &entry.service_type);
        resource.set_extension(Extension::money(BASE_PRICE, &entry.base_price)?);
        resource.set_or_remove_extension(
            TOTAL_AMOUNT,
            entry
                .total_amount
                .as_ref()
                .map(|m| Extension::money(TOTAL_AMOUNT, m))
                .transpose()?,
        );
        set_text_extension(&mut resource, CALCULATION_METHOD, &entry.calculation_method);
        write_lab_integration(&mut resource, &entry.lab_integration);
        set_text_extension(&mut resource, EXTERNAL_ORDER_CODE, &entry.order_code);
        set_text_extension(
            &mut resource,
            EXTERNAL_CLASSIFICATION_CODE,
            &entry.classification_code,
        );

        Ok(resource)
    }

    /// Reads an entry from a resource.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the resource is not an `ActivityDefinition`,
    /// - the service-code identifier, title or base price is missing,
    /// - an extension holds the wrong value type,
    /// - a linked reference is malformed or points at the wrong resource type,
    /// - a lab provider is stored while the integration flag is not set.
    pub fn from_resource(resource: &Resource) -> FhirResult<ServiceCatalogEntry> {
        resource.expect_type(Self::RESOURCE_TYPE)?;

        let identifiers = read_identifiers(resource)?;
        let code = find_by_system(&identifiers, SERVICE_CODE_SYSTEM)
            .and_then(|i| NonEmptyText::new(i.value()).ok())
            .ok_or_else(|| {
                FhirError::Translation("ActivityDefinition has no service code identifier".into())
            })?;

        let title = resource
            .string_field("title")?
            .and_then(|t| NonEmptyText::new(t).ok())
            .ok_or_else(|| FhirError::Translation(format!("service {code} has no title")))?;

        let group = resource
            .field_as::<Vec<TopicWire>>("topic")?
            .and_then(|topics| topics.into_iter().find_map(|t| t.text))
            .and_then(|t| NonEmptyText::new(t).ok());

        let base_price = resource
            .extension_money(BASE_PRICE)?
            .ok_or_else(|| FhirError::Translation(format!("service {code} has no base price")))?;

        let created = resource
            .string_field("date")?
            .map(|raw| parse_date(&raw))
            .transpose()?;

        let tags = resource
            .meta()
            .tags
            .iter()
            .filter(|t| t.system.as_deref() == Some(SERVICE_TAG_SYSTEM))
            .filter_map(|t| NonEmptyText::new(&t.code).ok())
            .collect();

        Ok(ServiceCatalogEntry {
            id: resource.id().map(str::to_string),
            code,
            title,
            description: NonEmptyText::from_optional(resource.string_field("description")?),
            group,
            service_type: NonEmptyText::from_optional(resource.extension_string(SERVICE_TYPE)?),
            base_price,
            total_amount: resource.extension_money(TOTAL_AMOUNT)?,
            calculation_method: NonEmptyText::from_optional(
                resource.extension_string(CALCULATION_METHOD)?,
            ),
            created,
            tags,
            lab_integration: read_lab_integration(resource)?,
            order_code: NonEmptyText::from_optional(
                resource.extension_string(EXTERNAL_ORDER_CODE)?,
            ),
            classification_code: NonEmptyText::from_optional(
                resource.extension_string(EXTERNAL_CLASSIFICATION_CODE)?,
            ),
            specimen_definition_ids: read_reference_ids(
                resource,
                Self::SPECIMEN_FIELD,
                Self::SPECIMEN_TYPE,
            )?,
            observation_definition_ids: read_reference_ids(
                resource,
                Self::OBSERVATION_FIELD,
                Self::OBSERVATION_TYPE,
            )?,
        })
    }

    /// Parse an entry from JSON text.
    pub fn parse(json_text: &str) -> FhirResult<ServiceCatalogEntry> {
        Self::from_resource(&Resource::parse(json_text)?)
    }

    /// Render an entry as JSON text.
    pub fn render(entry: &ServiceCatalogEntry) -> FhirResult<String> {
        Self::to_resource(entry)?.render()
    }
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

#[derive(Deserialize)]
struct TopicWire {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ReferenceWire {
    reference: String,
}

fn text_value(value: &Option<NonEmptyText>) -> Option<Value> {
    value.as_ref().map(|v| json!(v.as_str()))
}

fn set_text_extension(resource: &mut Resource, url: &str, value: &Option<NonEmptyText>) {
    resource.set_or_remove_extension(
        url,
        value.as_ref().map(|v| Extension::string(url, v.as_str())),
    );
}

fn write_lab_integration(resource: &mut Resource, state: &LabIntegration) {
    match state {
        LabIntegration::Disabled => {
            resource.remove_extension(LAB_INTEGRATION_ENABLED);
            resource.remove_extension(LAB_INTEGRATION_PROVIDER);
        }
        LabIntegration::Enabled { provider } => {
            resource.set_extension(Extension::boolean(LAB_INTEGRATION_ENABLED, true));
            set_text_extension(resource, LAB_INTEGRATION_PROVIDER, provider);
        }
    }
}

fn read_lab_integration(resource: &Resource) -> FhirResult<LabIntegration> {
    let enabled = resource
        .extension_bool(LAB_INTEGRATION_ENABLED)?
        .unwrap_or(false);
    let provider = NonEmptyText::from_optional(resource.extension_string(LAB_INTEGRATION_PROVIDER)?);

    match (enabled, provider) {
        (true, provider) => Ok(LabIntegration::Enabled { provider }),
        (false, None) => Ok(LabIntegration::Disabled),
        (false, Some(provider)) => Err(FhirError::Translation(format!(
            "lab integration provider '{provider}' stored while integration is disabled"
        ))),
    }
}

/// Builds a `[{"reference": "Type/id"}]` list, dropping repeated ids.
fn reference_list(resource_type: &str, ids: &[String]) -> FhirResult<Option<Value>> {
    let mut seen: Vec<&str> = Vec::with_capacity(ids.len());
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if seen.contains(&id.as_str()) {
            continue;
        }
        seen.push(id.as_str());
        items.push(Reference::new(resource_type, id)?.to_json());
    }
    Ok((!items.is_empty()).then_some(Value::Array(items)))
}

fn read_reference_ids(
    resource: &Resource,
    field: &str,
    resource_type: &str,
) -> FhirResult<Vec<String>> {
    let wires = resource
        .field_as::<Vec<ReferenceWire>>(field)?
        .unwrap_or_default();
    let mut ids: Vec<String> = Vec::with_capacity(wires.len());
    for wire in wires {
        let reference = Reference::parse_typed(&wire.reference, resource_type)
            .map_err(|e| FhirError::InvalidReference(format!("{field}: {e}")))?;
        if !ids.iter().any(|id| id == reference.id()) {
            ids.push(reference.id().to_string());
        }
    }
    Ok(ids)
}

fn parse_date(raw: &str) -> FhirResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|e| FhirError::Translation(format!("invalid date '{raw}': {e}")))
}
