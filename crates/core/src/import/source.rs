//! Loading import rows from JSON or YAML files.

use super::columns::RawRow;
use crate::{ClinicError, ClinicResult};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported source encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
}

impl SourceFormat {
    /// Picks the format from the file extension (`.json`, `.yaml`, `.yml`).
    pub fn from_path(path: &Path) -> ClinicResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(ClinicError::Configuration(format!(
                "unsupported import source {}: use a .json, .yaml or .yml file",
                path.display()
            ))),
        }
    }
}

/// Reads every row from `path`.
///
/// # Errors
///
/// Returns [`ClinicError::Configuration`] if the file is missing, unreadable, has an
/// unsupported extension, or is not an array of rows.
pub fn read_rows(path: &Path) -> ClinicResult<Vec<RawRow>> {
    let format = SourceFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|e| {
        ClinicError::Configuration(format!(
            "cannot read import source {}: {e}. Check the path and file permissions",
            path.display()
        ))
    })?;
    parse_rows(&text, format)
        .map_err(|e| ClinicError::Configuration(format!("{}: {e}", path.display())))
}

/// Parses rows from source text.
///
/// The document must be an array. Each element that is an object becomes one row; other
/// elements become unreadable rows so row numbering still matches the source.
pub fn parse_rows(text: &str, format: SourceFormat) -> Result<Vec<RawRow>, String> {
    let document: Value = match format {
        SourceFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string())?,
        SourceFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string())?,
    };

    let Value::Array(items) = document else {
        return Err("import source must be a list of rows".to_string());
    };

    Ok(items.into_iter().map(to_row).collect())
}

fn to_row(item: Value) -> RawRow {
    let Value::Object(cells) = item else {
        return RawRow::unreadable("row is not an object");
    };
    let mut row = RawRow::new();
    for (column, value) in cells {
        if let Some(text) = cell_text(value) {
            row.insert(&column, text);
        }
    }
    row
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // A list cell (e.g. YAML tags) joins its scalar items.
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(cell_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_become_text() {
        let rows = parse_rows(
            r#"[{"code": "LAB001", "price": 15.5, "active": true, "description": null}]"#,
            SourceFormat::Json,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("code"), Some("LAB001"));
        assert_eq!(rows[0].get("price"), Some("15.5"));
        assert_eq!(rows[0].get("active"), Some("true"));
        assert_eq!(rows[0].get("description"), None);
    }

    #[test]
    fn yaml_rows_and_list_cells() {
        let text = "- code: LAB001\n  title: CBC\n  tags: [morning, fasting]\n- code: LAB002\n";
        let rows = parse_rows(text, SourceFormat::Yaml).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("tags"), Some("morning,fasting"));
        assert_eq!(rows[1].get("code"), Some("LAB002"));
    }

    #[test]
    fn non_object_items_keep_their_position() {
        let rows = parse_rows(r#"[{"code": "A"}, 42, {"code": "B"}]"#, SourceFormat::Json).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].problem(), Some("row is not an object"));
        assert_eq!(rows[2].get("code"), Some("B"));
    }

    #[test]
    fn top_level_must_be_a_list() {
        assert!(parse_rows(r#"{"code": "A"}"#, SourceFormat::Json).is_err());
        assert!(parse_rows("not: [valid", SourceFormat::Yaml).is_err());
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_rows(&dir.path().join("services.json")).unwrap_err();
        assert!(matches!(err, ClinicError::Configuration(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.xlsx");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            read_rows(&path),
            Err(ClinicError::Configuration(_))
        ));
    }

    #[test]
    fn reads_rows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.yml");
        std::fs::write(&path, "- code: LAB001\n  price: '15,50'\n").unwrap();
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows[0].get("price"), Some("15,50"));
    }
}
