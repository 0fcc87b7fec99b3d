//! Constants used throughout the clinic core crate.

/// Default directory for resource storage when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "clinic_data";

/// Currency used for imported prices when none is configured.
pub const DEFAULT_CURRENCY: &str = "PLN";

/// Filename of a stored resource inside its sharded directory.
pub const RESOURCE_JSON_FILENAME: &str = "resource.json";

/// Import pacing: pause after this many rows.
pub const DEFAULT_IMPORT_PAUSE_EVERY: usize = 100;

/// Import pacing: length of each pause, in milliseconds.
pub const DEFAULT_IMPORT_PAUSE_MS: u64 = 1_000;

/// Longest accepted personal-id value.
pub const MAX_PERSONAL_ID_LEN: usize = 64;
