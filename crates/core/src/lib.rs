//! # Clinic Core
//!
//! Core business logic for the clinic records layer.
//!
//! This crate contains the services that sit between typed domain records and a
//! [`store::ResourceStore`]:
//! - service catalog upserts and specimen/observation links ([`catalog`], [`links`])
//! - visit coverages with a fixed 1..=3 ranking ([`coverage`]) and visit search ([`visits`])
//! - duplicate-patient detection and gated registration ([`duplicates`])
//! - bulk import of service catalog rows ([`import`])
//!
//! Resource mapping lives in the `fhir` crate. Stores are synchronous: a sharded on-disk
//! store under the configured data directory, and an in-memory store for tests and tools.
//!
//! **No transport concerns**: command-line handling and process setup belong in the binary.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod coverage;
pub mod duplicates;
pub mod error;
pub mod import;
pub mod links;
pub mod store;
pub mod validation;
pub mod visits;

pub use catalog::{CatalogService, UpsertOutcome};
pub use config::{CoreConfig, ImportPacing};
pub use coverage::{CoverageService, CoverageValues};
pub use duplicates::{
    DataIntegrityWarning, DuplicateCheck, DuplicateDetector, DuplicateResolution,
    PatientRegistration, RegistrationOutcome,
};
pub use error::{ClinicError, ClinicResult};
pub use import::{CancelFlag, ImportPipeline, ImportSummary};
pub use links::LinkKind;
pub use store::{FileResourceStore, MemoryResourceStore, ResourceStore, SearchParams};
pub use visits::{VisitRecord, VisitSearch, VisitService};
