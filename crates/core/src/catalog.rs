//! Persisted service catalog operations.
//!
//! Every change is read-modify-write: the stored resource is read, the domain change is
//! applied onto it (so data this crate does not model survives) and the result is written
//! back only when something changed.

use crate::links::{self, LinkKind};
use crate::store::{ResourceStore, SearchParams};
use crate::{ClinicError, ClinicResult};
use fhir::identifier::SERVICE_CODE_SYSTEM;
use fhir::{ActivityDefinition, Identifier, Resource, ServiceCatalogEntry};
use std::borrow::Cow;

/// Whether an upsert created a new entry or updated an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Service catalog operations over a [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct CatalogService<S> {
    store: S,
}

impl<S: ResourceStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::Validation`] if another entry already uses the code.
    pub fn create(&self, entry: &ServiceCatalogEntry) -> ClinicResult<ServiceCatalogEntry> {
        if let Some(existing) = self.find_resource_by_code(entry.code.as_str())? {
            return Err(ClinicError::Validation(format!(
                "service code '{}' is already used by ActivityDefinition/{}",
                entry.code,
                existing.id().unwrap_or_default()
            )));
        }
        let mut fresh = entry.clone();
        fresh.id = None;
        let stored = self.store.create(ActivityDefinition::to_resource(&fresh)?)?;
        Ok(ActivityDefinition::from_resource(&stored)?)
    }

    /// Writes `entry` over the stored entry with the same id.
    pub fn update(&self, entry: &ServiceCatalogEntry) -> ClinicResult<ServiceCatalogEntry> {
        let id = entry.id.as_deref().ok_or_else(|| {
            ClinicError::Validation(format!("service {} has no id to update", entry.code))
        })?;
        let existing = self.read_resource(id)?;

        if let Some(other) = self.find_resource_by_code(entry.code.as_str())? {
            if other.id() != Some(id) {
                return Err(ClinicError::Validation(format!(
                    "service code '{}' is already used by ActivityDefinition/{}",
                    entry.code,
                    other.id().unwrap_or_default()
                )));
            }
        }

        let updated = ActivityDefinition::apply(&existing, entry)?;
        if updated == existing {
            return Ok(ActivityDefinition::from_resource(&existing)?);
        }
        let stored = self.store.update(updated)?;
        Ok(ActivityDefinition::from_resource(&stored)?)
    }

    /// Creates the entry, or updates the stored entry with the same code.
    ///
    /// An update keeps the stored id, the stored links and lab integration (those are managed
    /// through the link operations) and every member the entry does not describe.
    pub fn upsert_by_code(
        &self,
        entry: &ServiceCatalogEntry,
    ) -> ClinicResult<(UpsertOutcome, ServiceCatalogEntry)> {
        match self.find_resource_by_code(entry.code.as_str())? {
            None => Ok((UpsertOutcome::Created, self.create(entry)?)),
            Some(existing) => {
                let current = ActivityDefinition::from_resource(&existing)?;
                let mut merged = entry.clone();
                merged.id = current.id;
                merged.specimen_definition_ids = current.specimen_definition_ids;
                merged.observation_definition_ids = current.observation_definition_ids;
                merged.lab_integration = current.lab_integration;
                let updated = ActivityDefinition::apply(&existing, &merged)?;
                let stored = if updated == existing {
                    existing
                } else {
                    self.store.update(updated)?
                };
                Ok((UpsertOutcome::Updated, ActivityDefinition::from_resource(&stored)?))
            }
        }
    }

    pub fn read(&self, id: &str) -> ClinicResult<ServiceCatalogEntry> {
        Ok(ActivityDefinition::from_resource(&self.read_resource(id)?)?)
    }

    pub fn find_by_code(&self, code: &str) -> ClinicResult<Option<ServiceCatalogEntry>> {
        self.find_resource_by_code(code)?
            .map(|r| ActivityDefinition::from_resource(&r).map_err(ClinicError::from))
            .transpose()
    }

    /// Raw stored resource, for callers that need members the domain type does not carry.
    pub fn read_resource(&self, id: &str) -> ClinicResult<Resource> {
        self.store
            .read(ActivityDefinition::RESOURCE_TYPE, id)?
            .ok_or_else(|| ClinicError::NotFound {
                resource_type: ActivityDefinition::RESOURCE_TYPE.to_string(),
                id: id.to_string(),
            })
    }

    pub fn link(&self, id: &str, kind: LinkKind, target_ids: &[&str]) -> ClinicResult<bool> {
        self.modify(id, |entry| links::bulk_link(entry, kind, target_ids))
    }

    pub fn unlink(&self, id: &str, kind: LinkKind, target_id: &str) -> ClinicResult<bool> {
        self.modify(id, |entry| links::unlink(entry, kind, target_id))
    }

    pub fn clear_links(&self, id: &str) -> ClinicResult<bool> {
        self.modify(id, links::clear_all_links)
    }

    pub fn set_lab_integration(
        &self,
        id: &str,
        enabled: bool,
        provider: Option<&str>,
    ) -> ClinicResult<bool> {
        self.modify(id, |entry| {
            links::configure_lab_integration(entry, enabled, provider)
        })
    }

    /// Applies a pure transform to a stored entry; returns whether anything was written.
    fn modify<F>(&self, id: &str, transform: F) -> ClinicResult<bool>
    where
        F: for<'a> FnOnce(&'a Resource) -> ClinicResult<Cow<'a, Resource>>,
    {
        let existing = self.read_resource(id)?;
        match transform(&existing)? {
            Cow::Borrowed(_) => Ok(false),
            Cow::Owned(updated) => {
                self.store.update(updated)?;
                Ok(true)
            }
        }
    }

    fn find_resource_by_code(&self, code: &str) -> ClinicResult<Option<Resource>> {
        let token = Identifier::new(SERVICE_CODE_SYSTEM, code)?.token();
        let matches = self.store.search(
            ActivityDefinition::RESOURCE_TYPE,
            &SearchParams::new().with("identifier", token),
        )?;
        if matches.len() > 1 {
            tracing::warn!(
                code,
                count = matches.len(),
                "service code is used by several entries; using the oldest"
            );
        }
        Ok(matches.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryResourceStore;
    use fhir::extensions::{LAB_INTEGRATION_ENABLED, LAB_INTEGRATION_PROVIDER};
    use fhir::{Extension, LabIntegration, Money, NonEmptyText};

    fn entry(code: &str) -> ServiceCatalogEntry {
        ServiceCatalogEntry::new(
            NonEmptyText::new(code).unwrap(),
            NonEmptyText::new("Complete blood count").unwrap(),
            Money::parse("15.50", "PLN").unwrap(),
        )
    }

    #[test]
    fn create_rejects_duplicate_code() {
        let service = CatalogService::new(MemoryResourceStore::new());
        let created = service.create(&entry("LAB001")).unwrap();
        assert!(created.id.is_some());
        let err = service.create(&entry("LAB001")).expect_err("duplicate code");
        assert!(matches!(err, ClinicError::Validation(_)));
    }

    #[test]
    fn update_preserves_unknown_data() {
        let store = MemoryResourceStore::new();
        let service = CatalogService::new(&store);
        let created = service.create(&entry("LAB001")).unwrap();
        let id = created.id.clone().unwrap();

        let mut raw = service.read_resource(&id).unwrap();
        raw.set_extension(Extension::string("urn:legacy:ward", "3B"));
        store.update(raw).unwrap();

        let mut edited = created;
        edited.title = NonEmptyText::new("CBC").unwrap();
        service.update(&edited).unwrap();

        let raw = service.read_resource(&id).unwrap();
        assert_eq!(raw.string_field("title").unwrap().as_deref(), Some("CBC"));
        assert!(raw.has_extension("urn:legacy:ward"));
    }

    #[test]
    fn upsert_by_code_updates_in_place() {
        let service = CatalogService::new(MemoryResourceStore::new());
        let (outcome, first) = service.upsert_by_code(&entry("LAB001")).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let mut changed = entry("LAB001");
        changed.base_price = Money::parse("20", "PLN").unwrap();
        let (outcome, second) = service.upsert_by_code(&changed).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(second.id, first.id);
        assert_eq!(second.base_price, Money::parse("20.00", "PLN").unwrap());
    }

    #[test]
    fn update_of_missing_entry_is_not_found() {
        let service = CatalogService::new(MemoryResourceStore::new());
        let mut ghost = entry("X1");
        ghost.id = Some("missing".into());
        assert!(matches!(
            service.update(&ghost),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn link_operations_write_only_on_change() {
        let store = MemoryResourceStore::new();
        let service = CatalogService::new(&store);
        let id = service.create(&entry("LAB001")).unwrap().id.unwrap();

        assert!(service.link(&id, LinkKind::Specimen, &["blood"]).unwrap());
        let version = store
            .read(ActivityDefinition::RESOURCE_TYPE, &id)
            .unwrap()
            .unwrap()
            .meta()
            .version_id
            .clone();
        assert!(!service.link(&id, LinkKind::Specimen, &["blood"]).unwrap());
        let unchanged = store
            .read(ActivityDefinition::RESOURCE_TYPE, &id)
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.meta().version_id, version);

        assert!(service.unlink(&id, LinkKind::Specimen, "blood").unwrap());
        assert!(service.read(&id).unwrap().specimen_definition_ids.is_empty());
    }

    #[test]
    fn lab_integration_round_trip() {
        let service = CatalogService::new(MemoryResourceStore::new());
        let id = service.create(&entry("LAB001")).unwrap().id.unwrap();

        service.set_lab_integration(&id, true, Some("Alab")).unwrap();
        assert_eq!(
            service.read(&id).unwrap().lab_integration,
            LabIntegration::Enabled {
                provider: Some(NonEmptyText::new("Alab").unwrap())
            }
        );

        service.set_lab_integration(&id, false, None).unwrap();
        let raw = service.read_resource(&id).unwrap();
        assert!(!raw.has_extension(LAB_INTEGRATION_ENABLED));
        assert!(!raw.has_extension(LAB_INTEGRATION_PROVIDER));
    }
}
