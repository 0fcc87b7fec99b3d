//! Stable extension URLs.
//!
//! These strings are the persisted identity of each extension. Renaming one orphans every
//! stored value, so treat them as part of the storage format.

macro_rules! extension_url {
    ($name:ident, $slug:literal) => {
        pub const $name: &str = concat!("http://clinic.local/fhir/StructureDefinition/", $slug);
    };
}

// Service catalog entries (ActivityDefinition)
extension_url!(SERVICE_TYPE, "service-type");
extension_url!(BASE_PRICE, "base-price");
extension_url!(TOTAL_AMOUNT, "total-amount");
extension_url!(CALCULATION_METHOD, "calculation-method");
extension_url!(LAB_INTEGRATION_ENABLED, "lab-integration-enabled");
extension_url!(LAB_INTEGRATION_PROVIDER, "lab-integration-provider");
extension_url!(EXTERNAL_ORDER_CODE, "external-order-code");
extension_url!(EXTERNAL_CLASSIFICATION_CODE, "external-classification-code");

// Visits (Encounter)
extension_url!(VISIT_REFERRER, "visit-referrer");
extension_url!(VISIT_SENDING_ORGANIZATION, "visit-sending-organization");

// Coverage
extension_url!(COVERAGE_ENCOUNTER, "coverage-encounter");

// Patients
extension_url!(DUPLICATE_OVERRIDE, "duplicate-override");

/// Every lab-integration extension; disabling the integration removes all of them.
pub const LAB_INTEGRATION_URLS: [&str; 2] = [LAB_INTEGRATION_ENABLED, LAB_INTEGRATION_PROVIDER];

/// Tag system used for free-text service tags in `meta.tag`.
pub const SERVICE_TAG_SYSTEM: &str = "http://clinic.local/fhir/CodeSystem/service-tag";
