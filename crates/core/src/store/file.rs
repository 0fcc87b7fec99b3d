//! On-disk resource store.
//!
//! Each resource is one pretty-printed JSON file:
//! `<data_dir>/<Type>/<s1>/<s2>/<id>/resource.json` (see [`StoreId::sharded_dir`]).

use super::search::select;
use super::{
    validate_resource_type, ResourceStore, SearchParams, Stamper, StoreError, StoreId, StoreResult,
};
use crate::constants::RESOURCE_JSON_FILENAME;
use fhir::Resource;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Sharded JSON-file store rooted at a data directory.
///
/// Writes are serialised through an internal lock. Other processes writing the same
/// directory are not coordinated with.
#[derive(Debug)]
pub struct FileResourceStore {
    data_dir: PathBuf,
    lock: RwLock<()>,
    stamper: Stamper,
}

impl FileResourceStore {
    /// Opens (and creates, if needed) a store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|e| StoreError::io(&data_dir, e))?;
        Ok(Self {
            data_dir,
            lock: RwLock::new(()),
            stamper: Stamper::default(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn type_dir(&self, resource_type: &str) -> StoreResult<PathBuf> {
        validate_resource_type(resource_type)?;
        Ok(self.data_dir.join(resource_type))
    }

    /// Path of the resource file, or `None` for ids this store never assigns.
    fn resource_path(&self, resource_type: &str, id: &str) -> StoreResult<Option<PathBuf>> {
        let type_dir = self.type_dir(resource_type)?;
        Ok(StoreId::parse(id).map(|id| id.sharded_dir(&type_dir).join(RESOURCE_JSON_FILENAME)))
    }

    fn read_file(path: &Path) -> StoreResult<Option<Resource>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(Resource::parse(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_file(path: &Path, resource: &Resource) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let json = resource.render()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("file store lock poisoned".into())
    }

    /// Walks `<Type>/<s1>/<s2>/<id>/resource.json`. Files that fail to parse are logged and
    /// skipped so one damaged record cannot hide the rest.
    fn load_all(&self, type_dir: &Path) -> StoreResult<Vec<Resource>> {
        let mut resources = Vec::new();

        let s1_iter = match fs::read_dir(type_dir) {
            Ok(it) => it,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(resources),
            Err(e) => return Err(StoreError::io(type_dir, e)),
        };
        for s1 in s1_iter.flatten() {
            let Ok(s2_iter) = fs::read_dir(s1.path()) else {
                continue;
            };
            for s2 in s2_iter.flatten() {
                let Ok(id_iter) = fs::read_dir(s2.path()) else {
                    continue;
                };
                for id_ent in id_iter.flatten() {
                    let path = id_ent.path().join(RESOURCE_JSON_FILENAME);
                    if !path.is_file() {
                        continue;
                    }
                    match Self::read_file(&path) {
                        Ok(Some(resource)) => resources.push(resource),
                        Ok(None) => {}
                        Err(StoreError::PermissionDenied(msg)) => {
                            return Err(StoreError::PermissionDenied(msg))
                        }
                        Err(e) => {
                            tracing::warn!("skipping unreadable resource {}: {e}", path.display());
                        }
                    }
                }
            }
        }

        Ok(resources)
    }
}

impl ResourceStore for FileResourceStore {
    fn create(&self, resource: Resource) -> StoreResult<Resource> {
        let type_dir = self.type_dir(resource.resource_type())?;
        let _guard = self.lock.write().map_err(|_| Self::poisoned())?;

        // A fresh v4 id colliding with an existing directory means outside interference;
        // retry a few times with a new id before giving up.
        for _attempt in 0..5 {
            let stored = self.stamper.stamp_created(resource.clone());
            let Some(id) = stored.id().and_then(StoreId::parse) else {
                continue;
            };
            let dir = id.sharded_dir(&type_dir);
            if dir.exists() {
                continue;
            }
            Self::write_file(&dir.join(RESOURCE_JSON_FILENAME), &stored)?;
            return Ok(stored);
        }

        Err(StoreError::Unavailable(
            "failed to allocate a unique resource directory after 5 attempts".into(),
        ))
    }

    fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>> {
        let Some(path) = self.resource_path(resource_type, id)? else {
            return Ok(None);
        };
        let _guard = self.lock.read().map_err(|_| Self::poisoned())?;
        Self::read_file(&path)
    }

    fn update(&self, resource: Resource) -> StoreResult<Resource> {
        let id = resource.id().ok_or(StoreError::MissingId)?;
        let not_found = || StoreError::NotFound {
            resource_type: resource.resource_type().to_string(),
            id: id.to_string(),
        };
        let path = self
            .resource_path(resource.resource_type(), id)?
            .ok_or_else(not_found)?;

        let _guard = self.lock.write().map_err(|_| Self::poisoned())?;
        let previous = Self::read_file(&path)?.ok_or_else(not_found)?;
        let stored = self.stamper.stamp_updated(resource.clone(), &previous);
        Self::write_file(&path, &stored)?;
        Ok(stored)
    }

    fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()> {
        let not_found = || StoreError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        };
        let path = self.resource_path(resource_type, id)?.ok_or_else(not_found)?;
        let dir = path.parent().ok_or_else(not_found)?;

        let _guard = self.lock.write().map_err(|_| Self::poisoned())?;
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>> {
        let type_dir = self.type_dir(resource_type)?;
        let _guard = self.lock.read().map_err(|_| Self::poisoned())?;
        select(self.load_all(&type_dir)?, params)
    }
}
