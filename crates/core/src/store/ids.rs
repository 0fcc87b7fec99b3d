//! Store-assigned resource ids and sharded-path derivation.
//!
//! Stores assign every new resource a *canonical* id: **32 lowercase hexadecimal characters**
//! (a v4 UUID without hyphens). Canonical ids are also valid reference ids, so they can be
//! used in `Type/id` strings unchanged.
//!
//! ## Sharded directory layout
//! For a canonical id `u`, the on-disk store keeps a resource under:
//! `<data_dir>/<Type>/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `clinic_data/Encounter/55/0e/550e8400e29b41d4a716446655440000/resource.json`
//!
//! This keeps the fan-out of any single directory small.

use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Canonical store id (32 lowercase hex characters, no hyphens).
///
/// Once constructed, the contained UUID is known to be in canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StoreId(Uuid);

impl StoreId {
    /// Generates a fresh id for a resource being created.
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Accepts only ids already in canonical form.
    ///
    /// Hyphenated, uppercase or otherwise non-canonical values return `None`: such ids were
    /// never assigned by a store, so they cannot name a stored resource.
    pub(crate) fn parse(input: &str) -> Option<Self> {
        if !Self::is_canonical(input) {
            return None;
        }
        Uuid::parse_str(input).ok().map(Self)
    }

    pub(crate) fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<id>/` where `s1`/`s2` are the first two pairs of hex
    /// characters.
    pub(crate) fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        let s1 = &canonical[0..2];
        let s2 = &canonical[2..4];
        parent_dir.join(s1).join(s2).join(&canonical)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
