//! FHIR-aligned boundary support for the clinic records layer.
//!
//! This crate provides a **generic resource model** and **translation helpers** between
//! typed domain records and that model:
//! - [`Resource`]: a typed, versioned record with an ordered field map and extension list
//! - [`Reference`]: a validated `Type/id` pointer
//! - per-resource facades ([`ActivityDefinition`], [`Encounter`], [`Coverage`], [`Patient`])
//!
//! This crate focuses on:
//! - FHIR semantic alignment (JSON shape, without REST transport)
//! - lossless handling of data it does not understand (unknown fields and extensions)
//! - strict reading: malformed references and wrong value types are errors, never dropped
//!
//! Money amounts are rounded to two decimal places when a [`Money`] value is built. This is
//! the precision of the stored representation, so round trips are exact for any `Money`.

pub mod activity_definition;
pub mod coverage;
pub mod encounter;
pub mod extensions;
pub mod identifier;
pub mod money;
pub mod patient;
pub mod reference;
pub mod resource;

// Re-export facades
pub use activity_definition::ActivityDefinition;
pub use coverage::Coverage;
pub use encounter::Encounter;
pub use patient::Patient;

// Re-export public domain-level types
pub use activity_definition::{LabIntegration, ServiceCatalogEntry};
pub use coverage::{CoverageData, CoverageOrder, CoverageStatus};
pub use encounter::{Period, Visit, VisitStatus, VisitType};
pub use identifier::Identifier;
pub use money::Money;
pub use patient::{ContactPoint, ContactSystem, Gender, NameUse, PatientData};
pub use reference::Reference;
pub use resource::{Extension, Meta, Resource, Tag};

pub use clinic_types::NonEmptyText;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("expected resourceType '{expected}', got '{found}'")]
    ResourceType { expected: &'static str, found: String },
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
