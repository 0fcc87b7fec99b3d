//! Bulk import of service catalog entries.
//!
//! Rows are processed one at a time, in source order. A row that fails validation is
//! skipped; a row whose write fails is recorded as failed. Neither stops the batch. Row
//! numbers start at 1 and always match the source position.

mod columns;
mod row;
mod source;

pub use columns::{ColumnMap, RawRow};
pub use row::map_row;
pub use source::{parse_rows, read_rows, SourceFormat};

use crate::catalog::CatalogService;
use crate::config::{CoreConfig, ImportPacing};
use crate::store::ResourceStore;
use crate::{ClinicError, ClinicResult};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation for a running import.
///
/// Clones share the same flag. The pipeline checks it before each row.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowErrorKind {
    /// The row was invalid and nothing was written.
    Skipped,
    /// The row was valid but could not be persisted.
    Failed,
}

/// A problem with one source row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub code: Option<String>,
    pub error: String,
    pub kind: RowErrorKind,
}

/// Outcome of an import run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Rows in the source, including any left unprocessed after cancellation.
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,

    /// Sorted by row number.
    pub errors: Vec<RowError>,
}

impl ImportSummary {
    /// Skipped rows alone do not make a run fail.
    pub fn is_failure(&self) -> bool {
        self.failed > 0
    }

    pub fn processed(&self) -> usize {
        self.success + self.failed + self.skipped
    }
}

type PauseFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Sequential import worker over a [`ResourceStore`].
#[derive(Clone)]
pub struct ImportPipeline<S> {
    catalog: CatalogService<S>,
    columns: ColumnMap,
    currency: String,
    pacing: ImportPacing,
    pause: PauseFn,
}

impl<S: ResourceStore> ImportPipeline<S> {
    /// Pipeline using the configured currency and pacing, and the default column names.
    pub fn new(store: S, config: &CoreConfig) -> Self {
        Self {
            catalog: CatalogService::new(store),
            columns: ColumnMap::default(),
            currency: config.default_currency().to_string(),
            pacing: config.import_pacing(),
            pause: Arc::new(std::thread::sleep),
        }
    }

    pub fn with_columns(mut self, columns: ColumnMap) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_pacing(mut self, pacing: ImportPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Replaces the function called for each pacing pause (the default sleeps the thread).
    pub fn with_pause_fn(mut self, pause: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.pause = Arc::new(pause);
        self
    }

    /// Loads `path` and imports its rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ClinicError::Configuration`] if the source cannot be read. Row
    /// problems never produce an error; they are reported in the summary.
    pub fn run_file(&self, path: &Path, cancel: &CancelFlag) -> ClinicResult<ImportSummary> {
        let rows = read_rows(path)?;
        tracing::info!(source = %path.display(), rows = rows.len(), "starting service import");
        Ok(self.run(&rows, cancel))
    }

    /// Imports `rows` in order.
    pub fn run(&self, rows: &[RawRow], cancel: &CancelFlag) -> ImportSummary {
        let mut summary = ImportSummary {
            total: rows.len(),
            ..ImportSummary::default()
        };

        for (index, raw) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                tracing::info!(
                    processed = index,
                    remaining = rows.len() - index,
                    "service import cancelled"
                );
                break;
            }

            let row = index + 1;
            self.import_row(row, raw, &mut summary);

            if row < rows.len() && self.pacing.pause_after(row) {
                tracing::debug!(row, pause_ms = self.pacing.pause.as_millis() as u64, "pacing pause");
                (self.pause)(self.pacing.pause);
            }
        }

        summary.errors.sort_by_key(|e| e.row);
        tracing::info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "service import finished"
        );
        summary
    }

    fn import_row(&self, row: usize, raw: &RawRow, summary: &mut ImportSummary) {
        let code = raw.get(&self.columns.code).map(str::to_string);

        let entry = match map_row(raw, &self.columns, &self.currency) {
            Ok(entry) => entry,
            Err(err) => {
                let error = match err {
                    ClinicError::Validation(message) => message,
                    other => other.to_string(),
                };
                tracing::warn!(row, code = code.as_deref(), %error, "skipping import row");
                summary.skipped += 1;
                summary.errors.push(RowError {
                    row,
                    code,
                    error,
                    kind: RowErrorKind::Skipped,
                });
                return;
            }
        };

        match self.catalog.upsert_by_code(&entry) {
            Ok((outcome, _)) => {
                tracing::debug!(row, code = entry.code.as_str(), ?outcome, "imported service");
                summary.success += 1;
            }
            Err(err) => {
                tracing::warn!(row, code = entry.code.as_str(), error = %err, "failed to import row");
                summary.failed += 1;
                summary.errors.push(RowError {
                    row,
                    code,
                    error: err.to_string(),
                    kind: RowErrorKind::Failed,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkKind;
    use crate::store::{MemoryResourceStore, SearchParams, StoreError, StoreResult};
    use fhir::{ActivityDefinition, Money, Resource};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn config() -> CoreConfig {
        CoreConfig::new(PathBuf::from("unused"), "importer", "PLN", ImportPacing::none()).unwrap()
    }

    fn service_row(code: &str) -> RawRow {
        RawRow::new()
            .with("code", code)
            .with("title", format!("Service {code}"))
            .with("group", "Lab")
            .with("type", "blood")
            .with("price", "10.00")
    }

    /// Memory store that refuses to create one particular service code.
    struct RefusingStore {
        inner: MemoryResourceStore,
        refused_code: &'static str,
    }

    impl ResourceStore for RefusingStore {
        fn create(&self, resource: Resource) -> StoreResult<Resource> {
            let entry = ActivityDefinition::from_resource(&resource)?;
            if entry.code.as_str() == self.refused_code {
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.create(resource)
        }

        fn read(&self, resource_type: &str, id: &str) -> StoreResult<Option<Resource>> {
            self.inner.read(resource_type, id)
        }

        fn update(&self, resource: Resource) -> StoreResult<Resource> {
            self.inner.update(resource)
        }

        fn delete(&self, resource_type: &str, id: &str) -> StoreResult<()> {
            self.inner.delete(resource_type, id)
        }

        fn search(&self, resource_type: &str, params: &SearchParams) -> StoreResult<Vec<Resource>> {
            self.inner.search(resource_type, params)
        }
    }

    #[test]
    fn batch_continues_past_bad_rows() {
        let store = RefusingStore {
            inner: MemoryResourceStore::new(),
            refused_code: "SVC7",
        };
        let rows: Vec<RawRow> = (1..=10)
            .map(|n| {
                let row = service_row(&format!("SVC{n}"));
                if n == 5 { row.with("title", "") } else { row }
            })
            .collect();

        let summary = ImportPipeline::new(&store, &config()).run(&rows, &CancelFlag::new());

        assert_eq!(summary.total, 10);
        assert_eq!(summary.success, 8);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);
        assert!(summary.is_failure());

        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].row, 5);
        assert_eq!(summary.errors[0].kind, RowErrorKind::Skipped);
        assert_eq!(summary.errors[0].error, "Missing title");
        assert_eq!(summary.errors[0].code.as_deref(), Some("SVC5"));
        assert_eq!(summary.errors[1].row, 7);
        assert_eq!(summary.errors[1].kind, RowErrorKind::Failed);
        assert!(summary.errors[1].error.contains("disk full"));

        assert_eq!(store.inner.count(ActivityDefinition::RESOURCE_TYPE).unwrap(), 8);
    }

    #[test]
    fn skipped_rows_alone_are_not_a_failure() {
        let store = MemoryResourceStore::new();
        let rows = vec![service_row("A"), RawRow::new().with("title", "no code")];
        let summary = ImportPipeline::new(&store, &config()).run(&rows, &CancelFlag::new());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors[0].code, None);
        assert_eq!(summary.errors[0].error, "Missing service code");
        assert!(!summary.is_failure());
    }

    #[test]
    fn lab_row_end_to_end() {
        let store = MemoryResourceStore::new();
        let pipeline = ImportPipeline::new(&store, &config());
        let row = RawRow::new()
            .with("code", "LAB001")
            .with("title", "CBC")
            .with("group", "Lab")
            .with("type", "blood")
            .with("price", "15.50");

        let summary = pipeline.run(std::slice::from_ref(&row), &CancelFlag::new());
        assert_eq!(summary.success, 1);

        let catalog = CatalogService::new(&store);
        let stored = catalog.find_by_code("LAB001").unwrap().expect("imported entry");
        assert_eq!(stored.title.as_str(), "CBC");
        assert_eq!(stored.base_price, Money::parse("15.50", "PLN").unwrap());
        let id = stored.id.clone().unwrap();

        // Re-importing the same code updates in place and keeps links made since.
        catalog
            .link(&id, LinkKind::Specimen, &["spec-1"])
            .unwrap();
        let renamed = row.with("title", "Complete blood count");
        let summary = pipeline.run(&[renamed], &CancelFlag::new());
        assert_eq!(summary.success, 1);

        assert_eq!(store.count(ActivityDefinition::RESOURCE_TYPE).unwrap(), 1);
        let updated = catalog.read(&id).unwrap();
        assert_eq!(updated.title.as_str(), "Complete blood count");
        assert_eq!(updated.specimen_definition_ids, vec!["spec-1".to_string()]);
    }

    #[test]
    fn cancellation_stops_at_the_next_row() {
        let store = MemoryResourceStore::new();
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let pipeline = ImportPipeline::new(&store, &config())
            .with_pacing(ImportPacing {
                every: 2,
                pause: Duration::from_millis(5),
            })
            .with_pause_fn(move |_| trigger.cancel());

        let rows: Vec<RawRow> = (1..=5).map(|n| service_row(&format!("S{n}"))).collect();
        let summary = pipeline.run(&rows, &cancel);

        assert!(summary.cancelled);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.processed(), 2);
        assert!(!summary.is_failure());
        assert_eq!(store.count(ActivityDefinition::RESOURCE_TYPE).unwrap(), 2);
    }

    #[test]
    fn pauses_after_every_n_rows_but_not_at_the_end() {
        let store = MemoryResourceStore::new();
        let pauses = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&pauses);
        let pipeline = ImportPipeline::new(&store, &config())
            .with_pacing(ImportPacing {
                every: 2,
                pause: Duration::from_millis(250),
            })
            .with_pause_fn(move |d| recorded.lock().unwrap().push(d));

        let rows: Vec<RawRow> = (1..=6).map(|n| service_row(&format!("S{n}"))).collect();
        let summary = pipeline.run(&rows, &CancelFlag::new());

        assert_eq!(summary.success, 6);
        assert_eq!(*pauses.lock().unwrap(), vec![Duration::from_millis(250); 2]);
    }

    #[test]
    fn summary_serialises_for_reporting() {
        let summary = ImportSummary {
            total: 1,
            skipped: 1,
            errors: vec![RowError {
                row: 1,
                code: None,
                error: "Missing service code".into(),
                kind: RowErrorKind::Skipped,
            }],
            ..ImportSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["errors"][0]["kind"], "skipped");
        assert_eq!(json["cancelled"], false);
    }

    #[test]
    fn run_file_reports_unreadable_source() {
        let store = MemoryResourceStore::new();
        let dir = tempfile::tempdir().unwrap();
        let result = ImportPipeline::new(&store, &config())
            .run_file(&dir.path().join("missing.json"), &CancelFlag::new());
        assert!(matches!(result, Err(ClinicError::Configuration(_))));
    }
}
