//! Duplicate-patient detection and gated registration.
//!
//! The personal-id identifier is the natural key. Before a patient is created the store is
//! searched for an exact, case-sensitive `(system, value)` match; when one exists the caller
//! decides what happens ([`DuplicateResolution`]). Nothing is resolved automatically.
//!
//! Known gap: the check and the create are separate store calls, so two registrations racing
//! on the same personal id can both pass the check. Stores do not enforce uniqueness.

use crate::store::{ResourceStore, SearchParams};
use crate::validation::validate_personal_id;
use crate::{ClinicError, ClinicResult};
use clinic_types::NonEmptyText;
use fhir::extensions::DUPLICATE_OVERRIDE;
use fhir::identifier::PERSONAL_ID_SYSTEM;
use fhir::{Extension, Identifier, Patient, PatientData};

/// Several stored patients share one personal id.
///
/// Returned to the caller for display; it never triggers a merge or a deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataIntegrityWarning {
    pub personal_id: String,

    /// Every matching patient id, oldest first.
    pub patient_ids: Vec<String>,
}

impl std::fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} patients share personal id '{}': {}",
            self.patient_ids.len(),
            self.personal_id,
            self.patient_ids.join(", ")
        )
    }
}

/// Result of a duplicate check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateCheck {
    NoMatch,
    /// The earliest-created matching patient, plus a warning when there are several.
    Match {
        patient: PatientData,
        warning: Option<DataIntegrityWarning>,
    },
}

/// What the operator chose after being shown a match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateResolution {
    /// Use the existing patient instead of creating one.
    OpenExisting,
    /// Create a second patient anyway. The reason is logged and stored on the new record.
    RegisterAnyway { reason: NonEmptyText },
    Cancel,
}

/// Outcome of [`PatientRegistration::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created(PatientData),
    OpenedExisting(PatientData),
    Cancelled,
}

/// Personal-id lookups over a [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct DuplicateDetector<S> {
    store: S,
}

impl<S: ResourceStore> DuplicateDetector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Looks up patients by personal id. The input is trimmed; matching is exact.
    ///
    /// # Errors
    ///
    /// * [`ClinicError::Validation`] if the personal id is blank or malformed
    /// * [`ClinicError::Mapping`] if a matching stored patient cannot be read
    pub fn find_by_personal_id(&self, personal_id: &str) -> ClinicResult<DuplicateCheck> {
        let personal_id = validate_personal_id(personal_id)?;
        let token = Identifier::new(PERSONAL_ID_SYSTEM, personal_id)?.token();
        let matches = self.store.search(
            Patient::RESOURCE_TYPE,
            &SearchParams::new().with("identifier", token),
        )?;

        let Some(first) = matches.first() else {
            return Ok(DuplicateCheck::NoMatch);
        };
        let patient = Patient::from_resource(first)?;

        let warning = (matches.len() > 1).then(|| DataIntegrityWarning {
            personal_id: personal_id.to_string(),
            patient_ids: matches
                .iter()
                .filter_map(|p| p.id().map(str::to_string))
                .collect(),
        });
        if let Some(warning) = &warning {
            tracing::warn!(
                personal_id,
                patients = ?warning.patient_ids,
                "data integrity: personal id is shared by several patients"
            );
        }

        Ok(DuplicateCheck::Match { patient, warning })
    }
}

/// Patient creation gated by duplicate detection.
#[derive(Clone, Debug)]
pub struct PatientRegistration<S> {
    detector: DuplicateDetector<S>,
    store: S,
    operator: NonEmptyText,
}

impl<S: ResourceStore + Clone> PatientRegistration<S> {
    /// `operator` is recorded with every duplicate override.
    pub fn new(store: S, operator: NonEmptyText) -> Self {
        Self {
            detector: DuplicateDetector::new(store.clone()),
            store,
            operator,
        }
    }

    pub fn detector(&self) -> &DuplicateDetector<S> {
        &self.detector
    }

    /// Creates `patient` unless a patient with the same personal id exists.
    ///
    /// With a match, `resolution` decides: `None` refuses with
    /// [`ClinicError::DuplicatePatient`], `OpenExisting` returns the existing patient,
    /// `RegisterAnyway` creates an audited duplicate and `Cancel` does nothing. Without a
    /// match the patient is created and `resolution` is ignored.
    pub fn register(
        &self,
        patient: &PatientData,
        resolution: Option<&DuplicateResolution>,
    ) -> ClinicResult<RegistrationOutcome> {
        if patient.id.is_some() {
            return Err(ClinicError::Validation(
                "a new patient cannot carry an id".into(),
            ));
        }

        let check = match patient.personal_id() {
            Some(personal_id) => self.detector.find_by_personal_id(personal_id)?,
            None => DuplicateCheck::NoMatch,
        };

        let (existing, warning) = match check {
            DuplicateCheck::NoMatch => return self.create(patient, None),
            DuplicateCheck::Match { patient, warning } => (patient, warning),
        };

        match resolution {
            None => {
                let existing_ids = match warning {
                    Some(w) => w.patient_ids,
                    None => existing.id.into_iter().collect(),
                };
                Err(ClinicError::DuplicatePatient {
                    personal_id: patient.personal_id().unwrap_or_default().to_string(),
                    existing: existing_ids,
                })
            }
            Some(DuplicateResolution::OpenExisting) => {
                Ok(RegistrationOutcome::OpenedExisting(existing))
            }
            Some(DuplicateResolution::Cancel) => Ok(RegistrationOutcome::Cancelled),
            Some(DuplicateResolution::RegisterAnyway { reason }) => {
                tracing::warn!(
                    operator = %self.operator,
                    reason = %reason,
                    existing = existing.id.as_deref(),
                    "registering patient despite duplicate personal id"
                );
                self.create(patient, Some(reason))
            }
        }
    }

    fn create(
        &self,
        patient: &PatientData,
        override_reason: Option<&NonEmptyText>,
    ) -> ClinicResult<RegistrationOutcome> {
        let mut resource = Patient::to_resource(patient)?;
        if let Some(reason) = override_reason {
            resource.set_extension(Extension::string(
                DUPLICATE_OVERRIDE,
                format!("{}: {}", self.operator, reason),
            ));
        }
        let stored = self.store.create(resource)?;
        Ok(RegistrationOutcome::Created(Patient::from_resource(&stored)?))
    }
}
