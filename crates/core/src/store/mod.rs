//! Resource persistence seam.
//!
//! Services talk to storage only through [`ResourceStore`]: create, read, update, delete and
//! search by parameter set. Two implementations ship with the crate:
//! - [`MemoryResourceStore`] for tests and dry runs
//! - [`FileResourceStore`] for sharded JSON files on disk (used by the CLI)
//!
//! Stores own resource metadata. `create` assigns the id, `meta.versionId` = `1` and the
//! `created`/`lastUpdated` instants; `update` keeps `created` and bumps the version.

mod file;
mod ids;
mod memory;
mod search;

pub use file::FileResourceStore;
pub use memory::MemoryResourceStore;
pub use search::SearchParams;

pub(crate) use ids::StoreId;

use chrono::{DateTime, Duration, Utc};
use fhir::{FhirError, Resource};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Errors returned by resource stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported search parameter '{0}'")]
    UnsupportedParameter(String),

    #[error("invalid value '{value}' for search parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    #[error("invalid resource type '{0}'")]
    InvalidResourceType(String),

    #[error("resource has no id")]
    MissingId,

    #[error("I/O error at {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored resource could not be read: {0}")]
    Corrupt(#[from] FhirError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Wraps an I/O error, surfacing permission problems as [`StoreError::PermissionDenied`].
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return StoreError::PermissionDenied(format!("{}: {source}", path.display()));
        }
        StoreError::Io { path, source }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage backend for resources.
///
/// Implementations must be safe to share between threads; all methods take `&self`.
pub trait ResourceStore: Send + Sync {
    /// Persists a new resource under a store-assigned id and returns the stored form.
    ///
    /// Any id already present on `resource` is replaced.
    fn create(&self, resource: Resource) -> StoreResult<Resource>;

    /// Reads the current form of a resource; `Ok(None)` when it does not exist.
    fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>>;

    /// Replaces an existing resource (matched by type and id) and returns the stored form.
    ///
    /// # Errors
    ///
    /// * [`StoreError::MissingId`] if `resource` has no id
    /// * [`StoreError::NotFound`] if no such resource exists
    fn update(&self, resource: Resource) -> StoreResult<Resource>;

    /// Removes a resource.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotFound`] if no such resource exists
    fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()>;

    /// Returns every resource of `resource_type` matching all `params`, oldest first.
    fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>>;
}

impl<S: ResourceStore + ?Sized> ResourceStore for &S {
    fn create(&self, resource: Resource) -> StoreResult<Resource> {
        (**self).create(resource)
    }

    fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>> {
        (**self).read(resource_type, id)
    }

    fn update(&self, resource: Resource) -> StoreResult<Resource> {
        (**self).update(resource)
    }

    fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()> {
        (**self).delete(resource_type, id)
    }

    fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>> {
        (**self).search(resource_type, params)
    }
}

impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    fn create(&self, resource: Resource) -> StoreResult<Resource> {
        (**self).create(resource)
    }

    fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>> {
        (**self).read(resource_type, id)
    }

    fn update(&self, resource: Resource) -> StoreResult<Resource> {
        (**self).update(resource)
    }

    fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()> {
        (**self).delete(resource_type, id)
    }

    fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>> {
        (**self).search(resource_type, params)
    }
}

/// Assigns store-managed metadata.
///
/// Instants handed out by one stamper strictly increase, so ordering by `meta.created` is
/// the same as ordering by creation even when the system clock is coarse.
#[derive(Debug, Default)]
pub(crate) struct Stamper {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl Stamper {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    pub(crate) fn stamp_created(&self, mut resource: Resource) -> Resource {
        let now = self.now();
        resource.set_id(Some(StoreId::new().to_string()));
        let meta = resource.meta_mut();
        meta.version_id = Some("1".to_string());
        meta.created = Some(now);
        meta.last_updated = Some(now);
        resource
    }

    pub(crate) fn stamp_updated(&self, mut resource: Resource, previous: &Resource) -> Resource {
        let version = previous
            .meta()
            .version_id
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let now = self.now();
        let meta = resource.meta_mut();
        meta.version_id = Some(version.to_string());
        meta.created = previous.meta().created;
        meta.last_updated = Some(now);
        resource
    }
}

/// Rejects resource types that could not name a directory or a reference.
pub(crate) fn validate_resource_type(resource_type: &str) -> StoreResult<()> {
    let mut chars = resource_type.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidResourceType(resource_type.to_string()))
    }
}
