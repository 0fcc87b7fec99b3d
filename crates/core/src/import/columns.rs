//! Import rows and the column names bound to each field.

use super::source::SourceFormat;
use crate::{ClinicError, ClinicResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One source row: column name to cell text.
///
/// Column names are matched exactly and case-sensitively. A missing column and a blank cell
/// both read as "no value".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: HashMap<String, String>,
    problem: Option<String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A row the source could not turn into cells; it is skipped with `reason`.
    pub fn unreadable(reason: impl Into<String>) -> Self {
        Self {
            cells: HashMap::new(),
            problem: Some(reason.into()),
        }
    }

    /// Builder-style cell setter.
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        self.cells.insert(column.to_string(), value.into());
    }

    /// Trimmed cell text; `None` when the column is missing or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn problem(&self) -> Option<&str> {
        self.problem.as_deref()
    }
}

/// Source column name for each service field.
///
/// Loadable from JSON or YAML; fields left out keep their default names.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnMap {
    pub code: String,
    pub title: String,
    pub description: String,
    pub group: String,
    pub service_type: String,
    pub price: String,
    pub total: String,
    pub calculation_method: String,
    pub order_code: String,
    pub classification_code: String,
    pub tags: String,
    pub created: String,
}

impl ColumnMap {
    /// Loads a column mapping from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns [`ClinicError::Configuration`] if the file cannot be read or names an unknown
    /// field.
    pub fn from_file(path: &Path) -> ClinicResult<Self> {
        let format = SourceFormat::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClinicError::Configuration(format!(
                "cannot read column mapping {}: {e}",
                path.display()
            ))
        })?;
        let parsed = match format {
            SourceFormat::Json => serde_json::from_str(&text).map_err(|e| e.to_string()),
            SourceFormat::Yaml => serde_yaml::from_str(&text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| {
            ClinicError::Configuration(format!("invalid column mapping {}: {e}", path.display()))
        })
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            code: "code".into(),
            title: "title".into(),
            description: "description".into(),
            group: "group".into(),
            service_type: "type".into(),
            price: "price".into(),
            total: "total".into(),
            calculation_method: "calculation_method".into(),
            order_code: "order_code".into(),
            classification_code: "classification_code".into(),
            tags: "tags".into(),
            created: "created".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_missing_cells_read_as_none() {
        let row = RawRow::new().with("code", "  ").with("title", " CBC ");
        assert_eq!(row.get("code"), None);
        assert_eq!(row.get("group"), None);
        assert_eq!(row.get("title"), Some("CBC"));
    }

    #[test]
    fn column_names_are_case_sensitive() {
        let row = RawRow::new().with("Code", "LAB001");
        assert_eq!(row.get(&ColumnMap::default().code), None);
    }

    #[test]
    fn partial_column_map_keeps_defaults() {
        let map: ColumnMap = serde_json::from_str(r#"{"code": "Kod", "price": "Cena"}"#).unwrap();
        assert_eq!(map.code, "Kod");
        assert_eq!(map.price, "Cena");
        assert_eq!(map.title, "title");
        assert_eq!(map.service_type, "type");
    }

    #[test]
    fn column_map_file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("columns.yaml");
        std::fs::write(&good, "title: Nazwa\n").unwrap();
        assert_eq!(ColumnMap::from_file(&good).unwrap().title, "Nazwa");

        let bad = dir.path().join("columns.json");
        std::fs::write(&bad, r#"{"colour": "x"}"#).unwrap();
        assert!(matches!(
            ColumnMap::from_file(&bad),
            Err(ClinicError::Configuration(_))
        ));
    }
}
