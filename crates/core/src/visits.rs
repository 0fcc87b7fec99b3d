//! Visit registration, editing, closing and search.
//!
//! Visits are never removed. Closing is a status transition to `finished`, `cancelled` or
//! `entered-in-error`; closed visits only accept a further correction to
//! `entered-in-error`.

use crate::coverage::CoverageService;
use crate::store::{ResourceStore, SearchParams};
use crate::{ClinicError, ClinicResult};
use chrono::{NaiveDate, Utc};
use fhir::identifier::{PERSONAL_ID_SYSTEM, REGISTRATION_NUMBER_SYSTEM};
use fhir::{CoverageData, Encounter, Identifier, Patient, Reference, Visit, VisitStatus, VisitType};
use std::collections::HashSet;

/// A visit together with its coverages (sorted by slot).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisitRecord {
    pub visit: Visit,
    pub coverages: Vec<CoverageData>,
}

/// Visit search criteria. Every criterion that is set must match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisitSearch {
    /// Visits with at least one coverage paid by this organisation.
    pub insurance_company: Option<Reference>,

    pub personal_id: Option<String>,

    /// Case-insensitive substring of the patient's family or given names.
    pub name: Option<String>,

    /// Visits starting on or after this date.
    pub from: Option<NaiveDate>,

    /// Visits starting on or before this date.
    pub to: Option<NaiveDate>,

    pub registration_number: Option<String>,

    pub status: Option<VisitStatus>,

    pub visit_type: Option<VisitType>,

    pub count: Option<usize>,

    pub offset: usize,
}

impl VisitSearch {
    /// Store parameters for the criteria that live on the `Encounter` itself.
    pub fn encounter_params(&self) -> ClinicResult<SearchParams> {
        let mut params = SearchParams::new();
        if let Some(status) = self.status {
            params.push("status", status.to_wire());
        }
        if let Some(visit_type) = self.visit_type {
            params.push("class", visit_type.to_wire());
        }
        if let Some(from) = self.from {
            params.push("date", format!("ge{}", from.format("%Y-%m-%d")));
        }
        if let Some(to) = self.to {
            params.push("date", format!("le{}", to.format("%Y-%m-%d")));
        }
        if let Some(number) = &self.registration_number {
            params.push(
                "identifier",
                Identifier::new(REGISTRATION_NUMBER_SYSTEM, number)?.token(),
            );
        }
        Ok(params)
    }

    fn patient_params(&self) -> ClinicResult<Option<SearchParams>> {
        let mut params = SearchParams::new();
        if let Some(personal_id) = &self.personal_id {
            params.push(
                "identifier",
                Identifier::new(PERSONAL_ID_SYSTEM, personal_id)?.token(),
            );
        }
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            params.push("name", name.trim());
        }
        Ok((!params.is_empty()).then_some(params))
    }
}

/// Visit operations over a [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct VisitService<S> {
    store: S,
}

impl<S: ResourceStore + Clone> VisitService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a new visit for an existing patient.
    pub fn register(&self, visit: &Visit) -> ClinicResult<Visit> {
        if visit.id.is_some() {
            return Err(ClinicError::Validation(
                "a new visit cannot carry an id".into(),
            ));
        }
        if self
            .store
            .read(Patient::RESOURCE_TYPE, visit.patient.id())?
            .is_none()
        {
            return Err(ClinicError::NotFound {
                resource_type: Patient::RESOURCE_TYPE.to_string(),
                id: visit.patient.id().to_string(),
            });
        }
        let stored = self.store.create(Encounter::to_resource(visit)?)?;
        let visit = Encounter::from_resource(&stored)?;
        tracing::info!(visit = visit.id.as_deref(), patient = %visit.patient, "visit registered");
        Ok(visit)
    }

    /// Writes `visit` over the stored visit with the same id.
    pub fn edit(&self, visit: &Visit) -> ClinicResult<Visit> {
        let id = visit
            .id
            .as_deref()
            .ok_or_else(|| ClinicError::Validation("visit has no id to edit".into()))?;
        let existing = self.read_resource(id)?;
        let current = Encounter::from_resource(&existing)?;
        if current.status.is_closed() && visit.status != VisitStatus::EnteredInError {
            return Err(ClinicError::Validation(format!(
                "visit {id} is {} and can only be marked entered-in-error",
                current.status.to_wire()
            )));
        }
        let stored = self.store.update(Encounter::apply(&existing, visit)?)?;
        Ok(Encounter::from_resource(&stored)?)
    }

    /// Soft-closes a visit. Closing as `finished` also ends an open period now.
    pub fn close(&self, id: &str, status: VisitStatus) -> ClinicResult<Visit> {
        if !status.is_closed() {
            return Err(ClinicError::Validation(format!(
                "'{}' does not close a visit",
                status.to_wire()
            )));
        }
        let existing = self.read_resource(id)?;
        let mut visit = Encounter::from_resource(&existing)?;
        if visit.status == status {
            return Ok(visit);
        }
        if visit.status.is_closed() && status != VisitStatus::EnteredInError {
            return Err(ClinicError::Validation(format!(
                "visit {id} is already {}",
                visit.status.to_wire()
            )));
        }

        visit.status = status;
        if status == VisitStatus::Finished && visit.period.end.is_none() {
            let now = Utc::now();
            visit.period.end = Some(visit.period.start.map_or(now, |start| start.max(now)));
        }
        let stored = self.store.update(Encounter::apply(&existing, &visit)?)?;
        tracing::info!(visit = id, status = status.to_wire(), "visit closed");
        Ok(Encounter::from_resource(&stored)?)
    }

    pub fn read(&self, id: &str) -> ClinicResult<VisitRecord> {
        let visit = Encounter::from_resource(&self.read_resource(id)?)?;
        self.record(visit)
    }

    /// Visits matching every set criterion, oldest first, paged after filtering.
    pub fn search(&self, criteria: &VisitSearch) -> ClinicResult<Vec<VisitRecord>> {
        let subjects = match criteria.patient_params()? {
            Some(params) => {
                let patients = self.store.search(Patient::RESOURCE_TYPE, &params)?;
                if patients.is_empty() {
                    return Ok(Vec::new());
                }
                Some(
                    patients
                        .iter()
                        .filter_map(|p| p.reference().ok().map(|r| r.to_string()))
                        .collect::<HashSet<_>>(),
                )
            }
            None => None,
        };

        let insured_visits = match &criteria.insurance_company {
            Some(payor) => {
                let coverages = self.store.search(
                    fhir::Coverage::RESOURCE_TYPE,
                    &SearchParams::new().with("payor", payor.to_string()),
                )?;
                let visits = coverages
                    .iter()
                    .filter_map(|c| fhir::Coverage::from_resource(c).ok())
                    .map(|c| c.encounter.id().to_string())
                    .collect::<HashSet<_>>();
                if visits.is_empty() {
                    return Ok(Vec::new());
                }
                Some(visits)
            }
            None => None,
        };

        let encounters = self
            .store
            .search(Encounter::RESOURCE_TYPE, &criteria.encounter_params()?)?;

        let mut records = Vec::new();
        for visit in encounters
            .iter()
            .map(Encounter::from_resource)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|v| {
                subjects
                    .as_ref()
                    .is_none_or(|s| s.contains(&v.patient.to_string()))
            })
            .filter(|v| {
                insured_visits
                    .as_ref()
                    .is_none_or(|ids| v.id.as_ref().is_some_and(|id| ids.contains(id)))
            })
            .skip(criteria.offset)
            .take(criteria.count.unwrap_or(usize::MAX))
        {
            records.push(self.record(visit)?);
        }
        Ok(records)
    }

    fn record(&self, visit: Visit) -> ClinicResult<VisitRecord> {
        let reference = Reference::new(Encounter::RESOURCE_TYPE, visit.id.as_deref().unwrap_or(""))?;
        let coverages =
            CoverageService::new(self.store.clone()).fetch_coverages_for_encounter(&reference)?;
        Ok(VisitRecord { visit, coverages })
    }

    fn read_resource(&self, id: &str) -> ClinicResult<fhir::Resource> {
        self.store
            .read(Encounter::RESOURCE_TYPE, id)?
            .ok_or_else(|| ClinicError::NotFound {
                resource_type: Encounter::RESOURCE_TYPE.to_string(),
                id: id.to_string(),
            })
    }
}
