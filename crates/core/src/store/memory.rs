//! In-memory resource store.

use super::search::select;
use super::{validate_resource_type, ResourceStore, SearchParams, Stamper, StoreError, StoreResult};
use fhir::Resource;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Keeps resources in a map keyed by type, in creation order.
///
/// Intended for tests and dry runs; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: RwLock<HashMap<String, Vec<Resource>>>,
    stamper: Stamper,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources of one type.
    pub fn count(&self, resource_type: &str) -> StoreResult<usize> {
        Ok(self.read_guard()?.get(resource_type).map_or(0, Vec::len))
    }

    fn read_guard(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Vec<Resource>>>> {
        self.resources
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write_guard(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Vec<Resource>>>> {
        self.resources
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl ResourceStore for MemoryResourceStore {
    fn create(&self, resource: Resource) -> StoreResult<Resource> {
        validate_resource_type(resource.resource_type())?;
        let stored = self.stamper.stamp_created(resource);
        self.write_guard()?
            .entry(stored.resource_type().to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>> {
        Ok(self
            .read_guard()?
            .get(resource_type)
            .and_then(|all| all.iter().find(|r| r.id() == Some(id)))
            .cloned())
    }

    fn update(&self, resource: Resource) -> StoreResult<Resource> {
        let id = resource.id().ok_or(StoreError::MissingId)?.to_string();
        let mut guard = self.write_guard()?;
        let slot = guard
            .get_mut(resource.resource_type())
            .and_then(|all| all.iter_mut().find(|r| r.id() == Some(id.as_str())))
            .ok_or_else(|| StoreError::NotFound {
                resource_type: resource.resource_type().to_string(),
                id: id.clone(),
            })?;
        let stored = self.stamper.stamp_updated(resource, slot);
        *slot = stored.clone();
        Ok(stored)
    }

    fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()> {
        let mut guard = self.write_guard()?;
        let all = guard.get_mut(resource_type);
        let position = all
            .as_ref()
            .and_then(|all| all.iter().position(|r| r.id() == Some(id)));
        match (all, position) {
            (Some(all), Some(position)) => {
                all.remove(position);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }),
        }
    }

    fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>> {
        let candidates = self
            .read_guard()?
            .get(resource_type)
            .cloned()
            .unwrap_or_default();
        select(candidates, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_read_update_delete() {
        let store = MemoryResourceStore::new();
        let mut patient = Resource::new("Patient");
        patient.set_field("gender", json!("female"));

        let created = store.create(patient).unwrap();
        let id = created.id().unwrap().to_string();
        assert_eq!(created.meta().version_id.as_deref(), Some("1"));

        let mut edited = store.read("Patient", &id).unwrap().expect("stored");
        edited.set_field("gender", json!("other"));
        let updated = store.update(edited).unwrap();
        assert_eq!(updated.meta().version_id.as_deref(), Some("2"));
        assert_eq!(
            store.read("Patient", &id).unwrap().unwrap().field("gender"),
            Some(&json!("other"))
        );

        store.delete("Patient", &id).unwrap();
        assert!(store.read("Patient", &id).unwrap().is_none());
        assert!(matches!(
            store.delete("Patient", &id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn update_of_unknown_resource_fails() {
        let store = MemoryResourceStore::new();
        let mut ghost = Resource::new("Patient");
        ghost.set_id(Some("nope".into()));
        assert!(matches!(store.update(ghost), Err(StoreError::NotFound { .. })));
        assert!(matches!(
            store.update(Resource::new("Patient")),
            Err(StoreError::MissingId)
        ));
    }

    #[test]
    fn search_returns_creation_order() {
        let store = MemoryResourceStore::new();
        let ids: Vec<String> = (0..3)
            .map(|_| {
                store
                    .create(Resource::new("Coverage"))
                    .unwrap()
                    .id()
                    .unwrap()
                    .to_string()
            })
            .collect();
        let found: Vec<String> = store
            .search("Coverage", &SearchParams::new())
            .unwrap()
            .iter()
            .map(|r| r.id().unwrap().to_string())
            .collect();
        assert_eq!(found, ids);
        assert_eq!(store.count("Coverage").unwrap(), 3);
        assert!(store.search("Patient", &SearchParams::new()).unwrap().is_empty());
    }
}
