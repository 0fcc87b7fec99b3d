use crate::store::StoreError;

/// Errors returned by clinic services.
///
/// Variants group failures by how callers recover from them: a `Validation` error skips one
/// import row, a `Persistence` error fails it, and `Configuration` errors abort the process.
#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),

    #[error("{resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mapping error: {0}")]
    Mapping(#[from] fhir::FhirError),

    #[error(
        "a patient with personal id '{personal_id}' already exists ({})",
        existing.join(", ")
    )]
    DuplicatePatient {
        personal_id: String,
        existing: Vec<String>,
    },
}

impl From<StoreError> for ClinicError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { resource_type, id } => {
                ClinicError::NotFound { resource_type, id }
            }
            StoreError::PermissionDenied(msg) => ClinicError::Permission(msg),
            other => ClinicError::Persistence(other),
        }
    }
}

pub type ClinicResult<T> = std::result::Result<T, ClinicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: ClinicError = StoreError::NotFound {
            resource_type: "Encounter".into(),
            id: "e1".into(),
        }
        .into();
        assert!(matches!(err, ClinicError::NotFound { .. }));
        assert_eq!(err.to_string(), "Encounter/e1 not found");
    }

    #[test]
    fn permission_is_surfaced_verbatim() {
        let err: ClinicError = StoreError::PermissionDenied("read-only operator".into()).into();
        match err {
            ClinicError::Permission(msg) => assert_eq!(msg, "read-only operator"),
            other => panic!("expected Permission, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_lists_existing_ids() {
        let err = ClinicError::DuplicatePatient {
            personal_id: "123".into(),
            existing: vec!["p1".into(), "p2".into()],
        };
        assert!(err.to_string().contains("p1, p2"));
    }
}
