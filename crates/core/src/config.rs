//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Services never read environment variables themselves, so tests
//! and the CLI can run several differently-configured services side by side.

use crate::constants::{DEFAULT_IMPORT_PAUSE_EVERY, DEFAULT_IMPORT_PAUSE_MS};
use crate::validation::validate_currency_code;
use crate::{ClinicError, ClinicResult};
use clinic_types::NonEmptyText;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the import pipeline throttles itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportPacing {
    /// Pause after this many rows; `0` disables pacing.
    pub every: usize,

    pub pause: Duration,
}

impl ImportPacing {
    pub const fn none() -> Self {
        Self {
            every: 0,
            pause: Duration::ZERO,
        }
    }

    /// Whether the pipeline should pause after finishing `rows_done` rows.
    pub fn pause_after(&self, rows_done: usize) -> bool {
        self.every > 0 && !self.pause.is_zero() && rows_done > 0 && rows_done % self.every == 0
    }
}

impl Default for ImportPacing {
    fn default() -> Self {
        Self {
            every: DEFAULT_IMPORT_PAUSE_EVERY,
            pause: Duration::from_millis(DEFAULT_IMPORT_PAUSE_MS),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    operator: NonEmptyText,
    default_currency: String,
    import_pacing: ImportPacing,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::Configuration`] if the operator is blank or the currency is not a
    /// three-letter uppercase code.
    pub fn new(
        data_dir: PathBuf,
        operator: &str,
        default_currency: &str,
        import_pacing: ImportPacing,
    ) -> ClinicResult<Self> {
        let operator = NonEmptyText::new(operator).map_err(|_| {
            ClinicError::Configuration(
                "operator name is required (set CLINIC_OPERATOR or pass --operator)".into(),
            )
        })?;
        validate_currency_code(default_currency)
            .map_err(|e| ClinicError::Configuration(e.to_string()))?;

        Ok(Self {
            data_dir,
            operator,
            default_currency: default_currency.to_string(),
            import_pacing,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Name recorded in audit logs and override extensions.
    pub fn operator(&self) -> &NonEmptyText {
        &self.operator
    }

    pub fn default_currency(&self) -> &str {
        &self.default_currency
    }

    pub fn import_pacing(&self) -> ImportPacing {
        self.import_pacing
    }
}

/// Parse import pacing from optional string values (typically environment variables).
///
/// Missing or blank values fall back to the defaults.
pub fn import_pacing_from_env_values(
    every: Option<String>,
    pause_ms: Option<String>,
) -> ClinicResult<ImportPacing> {
    fn parse<T: std::str::FromStr>(name: &str, value: Option<String>) -> ClinicResult<Option<T>> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    ClinicError::Configuration(format!("{name} must be a whole number, got '{v}'"))
                })
            })
            .transpose()
    }

    let defaults = ImportPacing::default();
    let every = parse::<usize>("CLINIC_IMPORT_PAUSE_EVERY", every)?.unwrap_or(defaults.every);
    let pause = parse::<u64>("CLINIC_IMPORT_PAUSE_MS", pause_ms)?
        .map(Duration::from_millis)
        .unwrap_or(defaults.pause);

    Ok(ImportPacing { every, pause })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_operator() {
        let err = CoreConfig::new("data".into(), "  ", "PLN", ImportPacing::none())
            .expect_err("blank operator");
        assert!(matches!(err, ClinicError::Configuration(_)));
    }

    #[test]
    fn rejects_bad_currency() {
        assert!(CoreConfig::new("data".into(), "admin", "zl", ImportPacing::none()).is_err());
    }

    #[test]
    fn pacing_defaults_when_values_missing() {
        let pacing = import_pacing_from_env_values(None, Some("  ".into())).unwrap();
        assert_eq!(pacing, ImportPacing::default());
        assert_eq!(pacing.every, 100);
        assert_eq!(pacing.pause, Duration::from_secs(1));
    }

    #[test]
    fn pacing_parses_values() {
        let pacing = import_pacing_from_env_values(Some("25".into()), Some("0".into())).unwrap();
        assert_eq!(pacing.every, 25);
        assert!(pacing.pause.is_zero());
        assert!(import_pacing_from_env_values(Some("many".into()), None).is_err());
    }

    #[test]
    fn pauses_on_every_nth_row() {
        let pacing = ImportPacing {
            every: 3,
            pause: Duration::from_millis(5),
        };
        let pauses: Vec<usize> = (1..=7).filter(|n| pacing.pause_after(*n)).collect();
        assert_eq!(pauses, vec![3, 6]);
        assert!(!ImportPacing::none().pause_after(3));
    }
}
