//! Coverage ordering: at most three ranked coverages per visit.
//!
//! A coverage's order is its slot identity. Upserting into a slot replaces its occupant
//! (keeping the occupant's id); deleting a slot leaves a gap. Slots are never renumbered,
//! so deleting the primary coverage does not promote the secondary one.

use crate::store::{ResourceStore, SearchParams};
use crate::{ClinicError, ClinicResult};
use clinic_types::NonEmptyText;
use fhir::{Coverage, CoverageData, CoverageOrder, CoverageStatus, Encounter, Reference, Resource};
use std::cmp::Ordering;

/// Caller-supplied coverage values; the visit and slot are given separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageValues {
    pub payor: Reference,
    pub beneficiary: Reference,
    pub status: CoverageStatus,
    pub type_code: Option<NonEmptyText>,
    pub subscriber_id: Option<NonEmptyText>,
}

impl CoverageValues {
    pub fn new(payor: Reference, beneficiary: Reference) -> Self {
        Self {
            payor,
            beneficiary,
            status: CoverageStatus::Active,
            type_code: None,
            subscriber_id: None,
        }
    }
}

/// What an upsert will write.
#[derive(Clone, Debug, PartialEq)]
pub enum CoveragePlan {
    /// The slot is empty; persist a new resource.
    Create(Resource),
    /// The slot is taken; overwrite the occupant (same id).
    Replace(Resource),
}

/// Decides how to store `values` in slot `order` of a visit, given that visit's existing
/// coverage resources.
///
/// When the slot holds several records (an integrity breach left by older tools or
/// concurrent writers) the earliest-created one is replaced and a warning is logged; the
/// others are left for manual clean-up.
pub fn plan_upsert(
    existing: &[Resource],
    encounter: &Reference,
    values: &CoverageValues,
    order: CoverageOrder,
) -> ClinicResult<CoveragePlan> {
    let mut occupants: Vec<(&Resource, CoverageData)> = Vec::new();
    for resource in existing {
        let data = Coverage::from_resource(resource)?;
        if data.encounter == *encounter && data.order == Some(order) {
            occupants.push((resource, data));
        }
    }
    occupants.sort_by(|(_, a), (_, b)| by_created(a, b));

    if occupants.len() > 1 {
        let ids: Vec<&str> = occupants.iter().filter_map(|(_, d)| d.id.as_deref()).collect();
        tracing::warn!(
            encounter = %encounter,
            order = order.get(),
            ids = ?ids,
            "several coverages share one slot; replacing the earliest"
        );
    }

    let data = CoverageData {
        id: None,
        encounter: encounter.clone(),
        payor: values.payor.clone(),
        beneficiary: values.beneficiary.clone(),
        order: Some(order),
        status: values.status,
        type_code: values.type_code.clone(),
        subscriber_id: values.subscriber_id.clone(),
        created: None,
    };

    match occupants.into_iter().next() {
        None => Ok(CoveragePlan::Create(Coverage::to_resource(&data)?)),
        Some((resource, _)) => Ok(CoveragePlan::Replace(Coverage::apply(resource, &data)?)),
    }
}

/// Orders coverages by slot ascending, order-less records last, ties by creation time.
pub fn sort_coverages(coverages: &mut [CoverageData]) {
    coverages.sort_by(|a, b| {
        let slot = match (a.order, b.order) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        slot.then_with(|| by_created(a, b))
    });
}

fn by_created(a: &CoverageData, b: &CoverageData) -> Ordering {
    a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id))
}

/// Coverage operations over a [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct CoverageService<S> {
    store: S,
}

impl<S: ResourceStore> CoverageService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates or replaces the coverage in slot `order` of a visit.
    ///
    /// # Errors
    ///
    /// * [`ClinicError::NotFound`] if the visit does not exist
    /// * [`ClinicError::Mapping`] if a stored coverage of the visit cannot be read
    pub fn upsert_coverage(
        &self,
        encounter: &Reference,
        values: &CoverageValues,
        order: CoverageOrder,
    ) -> ClinicResult<CoverageData> {
        self.require_visit(encounter)?;
        let existing = self.coverage_resources(encounter)?;

        let stored = match plan_upsert(&existing, encounter, values, order)? {
            CoveragePlan::Create(resource) => self.store.create(resource)?,
            CoveragePlan::Replace(resource) => self.store.update(resource)?,
        };
        Ok(Coverage::from_resource(&stored)?)
    }

    /// Removes exactly one coverage. Other slots keep their order.
    pub fn delete_coverage(&self, id: &str) -> ClinicResult<()> {
        self.store.delete(Coverage::RESOURCE_TYPE, id)?;
        tracing::info!(coverage = id, "coverage deleted");
        Ok(())
    }

    /// Coverages of a visit, sorted by [`sort_coverages`].
    pub fn fetch_coverages_for_encounter(
        &self,
        encounter: &Reference,
    ) -> ClinicResult<Vec<CoverageData>> {
        let mut coverages = self
            .coverage_resources(encounter)?
            .iter()
            .map(Coverage::from_resource)
            .collect::<Result<Vec<_>, _>>()?;
        sort_coverages(&mut coverages);
        Ok(coverages)
    }

    fn coverage_resources(&self, encounter: &Reference) -> ClinicResult<Vec<Resource>> {
        Ok(self.store.search(
            Coverage::RESOURCE_TYPE,
            &SearchParams::new().with("encounter", encounter.to_string()),
        )?)
    }

    fn require_visit(&self, encounter: &Reference) -> ClinicResult<()> {
        if encounter.resource_type() != Encounter::RESOURCE_TYPE {
            return Err(ClinicError::Validation(format!(
                "coverage must belong to an Encounter, got {encounter}"
            )));
        }
        match self.store.read(Encounter::RESOURCE_TYPE, encounter.id())? {
            Some(_) => Ok(()),
            None => Err(ClinicError::NotFound {
                resource_type: Encounter::RESOURCE_TYPE.to_string(),
                id: encounter.id().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryResourceStore;
    use fhir::{Period, Visit, VisitStatus, VisitType};

    fn order(n: u8) -> CoverageOrder {
        CoverageOrder::new(n).unwrap()
    }

    fn values(payor: &str) -> CoverageValues {
        CoverageValues::new(
            Reference::new("Organization", payor).unwrap(),
            Reference::new("Patient", "p1").unwrap(),
        )
    }

    fn visit(store: &MemoryResourceStore) -> Reference {
        let visit = Visit {
            id: None,
            patient: Reference::new("Patient", "p1").unwrap(),
            status: VisitStatus::InProgress,
            visit_type: VisitType::Ambulatory,
            period: Period::default(),
            referrer: None,
            sending_organization: None,
            registration_number: None,
        };
        store
            .create(Encounter::to_resource(&visit).unwrap())
            .unwrap()
            .reference()
            .unwrap()
    }

    fn payors(coverages: &[CoverageData]) -> Vec<(Option<u8>, String)> {
        coverages
            .iter()
            .map(|c| (c.order.map(CoverageOrder::get), c.payor.id().to_string()))
            .collect()
    }

    #[test]
    fn orders_one_two_three_regardless_of_insertion() {
        let store = MemoryResourceStore::new();
        let service = CoverageService::new(&store);
        let enc = visit(&store);

        service.upsert_coverage(&enc, &values("c"), order(3)).unwrap();
        service.upsert_coverage(&enc, &values("a"), order(1)).unwrap();
        service.upsert_coverage(&enc, &values("b"), order(2)).unwrap();

        let listed = service.fetch_coverages_for_encounter(&enc).unwrap();
        assert_eq!(
            payors(&listed),
            vec![
                (Some(1), "a".to_string()),
                (Some(2), "b".to_string()),
                (Some(3), "c".to_string())
            ]
        );
    }

    #[test]
    fn upsert_replaces_occupant_keeping_id() {
        let store = MemoryResourceStore::new();
        let service = CoverageService::new(&store);
        let enc = visit(&store);

        let first = service.upsert_coverage(&enc, &values("a"), order(1)).unwrap();
        let second = service.upsert_coverage(&enc, &values("z"), order(1)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.count(Coverage::RESOURCE_TYPE).unwrap(), 1);
        assert_eq!(second.payor.id(), "z");
    }

    #[test]
    fn delete_leaves_gap_without_renumbering() {
        let store = MemoryResourceStore::new();
        let service = CoverageService::new(&store);
        let enc = visit(&store);

        let primary = service.upsert_coverage(&enc, &values("a"), order(1)).unwrap();
        service.upsert_coverage(&enc, &values("b"), order(2)).unwrap();
        service.delete_coverage(primary.id.as_deref().unwrap()).unwrap();

        let listed = service.fetch_coverages_for_encounter(&enc).unwrap();
        assert_eq!(payors(&listed), vec![(Some(2), "b".to_string())]);
        assert!(matches!(
            service.delete_coverage(primary.id.as_deref().unwrap()),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn order_less_records_sort_last() {
        let store = MemoryResourceStore::new();
        let service = CoverageService::new(&store);
        let enc = visit(&store);

        let legacy = CoverageData {
            id: None,
            encounter: enc.clone(),
            payor: Reference::new("Organization", "legacy").unwrap(),
            beneficiary: Reference::new("Patient", "p1").unwrap(),
            order: None,
            status: CoverageStatus::Active,
            type_code: None,
            subscriber_id: None,
            created: None,
        };
        store.create(Coverage::to_resource(&legacy).unwrap()).unwrap();
        service.upsert_coverage(&enc, &values("b"), order(2)).unwrap();

        let listed = service.fetch_coverages_for_encounter(&enc).unwrap();
        assert_eq!(
            payors(&listed),
            vec![(Some(2), "b".to_string()), (None, "legacy".to_string())]
        );
    }

    #[test]
    fn duplicate_slot_replaces_earliest() {
        let store = MemoryResourceStore::new();
        let enc = visit(&store);
        let mut data = CoverageData {
            id: None,
            encounter: enc.clone(),
            payor: Reference::new("Organization", "old").unwrap(),
            beneficiary: Reference::new("Patient", "p1").unwrap(),
            order: Some(order(1)),
            status: CoverageStatus::Active,
            type_code: None,
            subscriber_id: None,
            created: None,
        };
        let earliest = store.create(Coverage::to_resource(&data).unwrap()).unwrap();
        data.payor = Reference::new("Organization", "newer").unwrap();
        store.create(Coverage::to_resource(&data).unwrap()).unwrap();

        let existing = store
            .search(Coverage::RESOURCE_TYPE, &SearchParams::new())
            .unwrap();
        let plan = plan_upsert(&existing, &enc, &values("fresh"), order(1)).unwrap();
        match plan {
            CoveragePlan::Replace(resource) => assert_eq!(resource.id(), earliest.id()),
            other => panic!("expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn plan_creates_for_empty_slot() {
        let enc = Reference::new("Encounter", "e1").unwrap();
        let plan = plan_upsert(&[], &enc, &values("a"), order(2)).unwrap();
        let CoveragePlan::Create(resource) = plan else {
            panic!("expected Create");
        };
        let data = Coverage::from_resource(&resource).unwrap();
        assert_eq!(data.order, Some(order(2)));
        assert_eq!(data.encounter, enc);
    }

    #[test]
    fn upsert_requires_existing_visit() {
        let service = CoverageService::new(MemoryResourceStore::new());
        let ghost = Reference::new("Encounter", "missing").unwrap();
        assert!(matches!(
            service.upsert_coverage(&ghost, &values("a"), order(1)),
            Err(ClinicError::NotFound { .. })
        ));
    }
}
