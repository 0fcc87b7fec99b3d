//! Specimen/observation links and lab-integration settings of service catalog entries.
//!
//! Every operation is a pure transform over an `ActivityDefinition` resource. Results are
//! [`Cow`]s: `Cow::Borrowed` means the input already had the requested state and nothing
//! needs persisting, `Cow::Owned` carries the changed copy. Members and extensions the
//! operation does not own are never touched.
//!
//! Link lists have set semantics: adding an id twice is a no-op, and removal matches the
//! full `Type/id` reference exactly.

use crate::ClinicResult;
use fhir::extensions::{LAB_INTEGRATION_ENABLED, LAB_INTEGRATION_PROVIDER};
use fhir::{ActivityDefinition, Extension, Reference, Resource};
use serde_json::Value;
use std::borrow::Cow;

/// Which requirement list an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Specimen,
    Observation,
}

impl LinkKind {
    fn field(self) -> &'static str {
        match self {
            LinkKind::Specimen => ActivityDefinition::SPECIMEN_FIELD,
            LinkKind::Observation => ActivityDefinition::OBSERVATION_FIELD,
        }
    }

    fn target_type(self) -> &'static str {
        match self {
            LinkKind::Specimen => ActivityDefinition::SPECIMEN_TYPE,
            LinkKind::Observation => ActivityDefinition::OBSERVATION_TYPE,
        }
    }
}

pub fn link_specimen<'a>(entry: &'a Resource, id: &str) -> ClinicResult<Cow<'a, Resource>> {
    bulk_link(entry, LinkKind::Specimen, &[id])
}

pub fn link_observation<'a>(entry: &'a Resource, id: &str) -> ClinicResult<Cow<'a, Resource>> {
    bulk_link(entry, LinkKind::Observation, &[id])
}

pub fn unlink_specimen<'a>(entry: &'a Resource, id: &str) -> ClinicResult<Cow<'a, Resource>> {
    unlink(entry, LinkKind::Specimen, id)
}

pub fn unlink_observation<'a>(entry: &'a Resource, id: &str) -> ClinicResult<Cow<'a, Resource>> {
    unlink(entry, LinkKind::Observation, id)
}

pub fn bulk_link_specimens<'a, S: AsRef<str>>(
    entry: &'a Resource,
    ids: &[S],
) -> ClinicResult<Cow<'a, Resource>> {
    bulk_link(entry, LinkKind::Specimen, ids)
}

pub fn bulk_link_observations<'a, S: AsRef<str>>(
    entry: &'a Resource,
    ids: &[S],
) -> ClinicResult<Cow<'a, Resource>> {
    bulk_link(entry, LinkKind::Observation, ids)
}

pub fn linked_specimens(entry: &Resource) -> Vec<String> {
    linked(entry, LinkKind::Specimen)
}

pub fn linked_observations(entry: &Resource) -> Vec<String> {
    linked(entry, LinkKind::Observation)
}

/// Adds every id not already linked, in the given order, as a single change.
///
/// # Errors
///
/// Returns [`crate::ClinicError::Mapping`] if `entry` is not an `ActivityDefinition` or an
/// id cannot form a reference. Nothing is changed in that case.
pub fn bulk_link<'a, S: AsRef<str>>(
    entry: &'a Resource,
    kind: LinkKind,
    ids: &[S],
) -> ClinicResult<Cow<'a, Resource>> {
    entry.expect_type(ActivityDefinition::RESOURCE_TYPE)?;

    let mut items = current_items(entry, kind);
    let mut changed = false;
    for id in ids {
        let reference = Reference::new(kind.target_type(), id.as_ref())?;
        let target = reference.to_string();
        if items.iter().any(|item| reference_of(item) == Some(target.as_str())) {
            continue;
        }
        items.push(reference.to_json());
        changed = true;
    }

    if !changed {
        return Ok(Cow::Borrowed(entry));
    }
    let mut updated = entry.clone();
    updated.set_field(kind.field(), Value::Array(items));
    Ok(Cow::Owned(updated))
}

/// Removes the entry whose reference is exactly `Type/id`; an absent id is a no-op.
pub fn unlink<'a>(entry: &'a Resource, kind: LinkKind, id: &str) -> ClinicResult<Cow<'a, Resource>> {
    entry.expect_type(ActivityDefinition::RESOURCE_TYPE)?;

    let target = format!("{}/{}", kind.target_type(), id);
    let mut items = current_items(entry, kind);
    let before = items.len();
    items.retain(|item| reference_of(item) != Some(target.as_str()));
    if items.len() == before {
        return Ok(Cow::Borrowed(entry));
    }

    let mut updated = entry.clone();
    updated.set_or_remove_field(kind.field(), (!items.is_empty()).then_some(Value::Array(items)));
    Ok(Cow::Owned(updated))
}

/// Ids of well-formed links of the right type, without repeats.
///
/// Malformed entries are skipped (and logged at debug); use
/// [`ActivityDefinition::from_resource`] for a strict read.
pub fn linked(entry: &Resource, kind: LinkKind) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for item in current_items(entry, kind) {
        let parsed = reference_of(&item)
            .ok_or_else(|| "entry has no reference string".to_string())
            .and_then(|raw| {
                Reference::parse_typed(raw, kind.target_type()).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(reference) => {
                if !ids.iter().any(|id| id == reference.id()) {
                    ids.push(reference.id().to_string());
                }
            }
            Err(reason) => {
                tracing::debug!(
                    entry = entry.id().unwrap_or("<new>"),
                    field = kind.field(),
                    "discarding malformed link {item}: {reason}"
                );
            }
        }
    }
    ids
}

/// Removes both link lists.
pub fn clear_all_links(entry: &Resource) -> ClinicResult<Cow<'_, Resource>> {
    entry.expect_type(ActivityDefinition::RESOURCE_TYPE)?;

    let fields = [LinkKind::Specimen.field(), LinkKind::Observation.field()];
    if fields.iter().all(|f| entry.field(f).is_none()) {
        return Ok(Cow::Borrowed(entry));
    }
    let mut updated = entry.clone();
    for field in fields {
        updated.remove_field(field);
    }
    Ok(Cow::Owned(updated))
}

/// Sets the lab-integration extensions.
///
/// - disabled: both the flag and the provider are removed
/// - enabled without provider (or with a blank one): only the flag is stored and any earlier
///   provider is dropped
/// - enabled with provider: both are stored
pub fn configure_lab_integration<'a>(
    entry: &'a Resource,
    enabled: bool,
    provider: Option<&str>,
) -> ClinicResult<Cow<'a, Resource>> {
    entry.expect_type(ActivityDefinition::RESOURCE_TYPE)?;

    let mut updated = entry.clone();
    if enabled {
        updated.set_extension(Extension::boolean(LAB_INTEGRATION_ENABLED, true));
        let provider = provider.map(str::trim).filter(|p| !p.is_empty());
        updated.set_or_remove_extension(
            LAB_INTEGRATION_PROVIDER,
            provider.map(|p| Extension::string(LAB_INTEGRATION_PROVIDER, p)),
        );
    } else {
        updated.remove_extension(LAB_INTEGRATION_ENABLED);
        updated.remove_extension(LAB_INTEGRATION_PROVIDER);
    }

    if updated == *entry {
        Ok(Cow::Borrowed(entry))
    } else {
        Ok(Cow::Owned(updated))
    }
}

fn current_items(entry: &Resource, kind: LinkKind) -> Vec<Value> {
    match entry.field(kind.field()) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn reference_of(item: &Value) -> Option<&str> {
    item.get("reference").and_then(Value::as_str)
}
