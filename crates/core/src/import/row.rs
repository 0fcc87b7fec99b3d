//! Row validation and mapping to catalog entries.

use super::columns::{ColumnMap, RawRow};
use crate::{ClinicError, ClinicResult};
use chrono::NaiveDate;
use clinic_types::NonEmptyText;
use fhir::{Money, ServiceCatalogEntry};

/// Validates a row and builds the entry it describes.
///
/// Checks run in a fixed order and the first failure is reported, so a row missing both its
/// code and its title reports "Missing service code". A missing price means a zero price in
/// `currency`.
///
/// # Errors
///
/// Returns [`ClinicError::Validation`] carrying the row's problem, for example
/// "Missing title" or "Invalid price: 'abc'".
pub fn map_row(
    row: &RawRow,
    columns: &ColumnMap,
    currency: &str,
) -> ClinicResult<ServiceCatalogEntry> {
    if let Some(problem) = row.problem() {
        return Err(invalid(problem));
    }

    let code = required(row, &columns.code, "Missing service code")?;
    let title = required(row, &columns.title, "Missing title")?;
    let group = required(row, &columns.group, "Missing group")?;
    let service_type = required(row, &columns.service_type, "Missing service type")?;

    let base_price = match row.get(&columns.price) {
        Some(raw) => parse_amount(raw, currency)
            .filter(|m| !m.is_negative())
            .ok_or_else(|| invalid(format!("Invalid price: '{raw}'")))?,
        None => Money::zero(currency).map_err(|e| invalid(e.to_string()))?,
    };

    let total_amount = row
        .get(&columns.total)
        .map(|raw| parse_amount(raw, currency).ok_or_else(|| invalid(format!("Invalid total: '{raw}'"))))
        .transpose()?;

    let created = row
        .get(&columns.created)
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| invalid(format!("Invalid created date: '{raw}' (expected YYYY-MM-DD)")))
        })
        .transpose()?;

    let tags = row
        .get(&columns.tags)
        .map(|raw| {
            let mut tags: Vec<NonEmptyText> = Vec::new();
            for tag in raw.split([',', ';']).filter_map(|t| NonEmptyText::new(t).ok()) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            tags
        })
        .unwrap_or_default();

    let mut entry = ServiceCatalogEntry::new(code, title, base_price);
    entry.group = Some(group);
    entry.service_type = Some(service_type);
    entry.description = optional(row, &columns.description);
    entry.total_amount = total_amount;
    entry.calculation_method = optional(row, &columns.calculation_method);
    entry.order_code = optional(row, &columns.order_code);
    entry.classification_code = optional(row, &columns.classification_code);
    entry.created = created;
    entry.tags = tags;
    Ok(entry)
}

fn required(row: &RawRow, column: &str, message: &str) -> ClinicResult<NonEmptyText> {
    optional(row, column).ok_or_else(|| invalid(message))
}

fn invalid(message: impl Into<String>) -> ClinicError {
    ClinicError::Validation(message.into())
}

fn optional(row: &RawRow, column: &str) -> Option<NonEmptyText> {
    NonEmptyText::from_optional(row.get(column))
}

fn parse_amount(raw: &str, currency: &str) -> Option<Money> {
    Money::parse(raw, currency).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbc() -> RawRow {
        RawRow::new()
            .with("code", "LAB001")
            .with("title", "CBC")
            .with("group", "Lab")
            .with("type", "blood")
            .with("price", "15.50")
    }

    fn error(row: RawRow) -> String {
        match map_row(&row, &ColumnMap::default(), "PLN") {
            Err(ClinicError::Validation(message)) => message,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn maps_minimal_lab_row() {
        let entry = map_row(&cbc(), &ColumnMap::default(), "PLN").unwrap();
        assert_eq!(entry.code.as_str(), "LAB001");
        assert_eq!(entry.title.as_str(), "CBC");
        assert_eq!(entry.group.as_ref().map(NonEmptyText::as_str), Some("Lab"));
        assert_eq!(entry.base_price, Money::parse("15.50", "PLN").unwrap());
        assert!(entry.total_amount.is_none());
    }

    #[test]
    fn required_fields_report_in_order() {
        assert_eq!(error(RawRow::new()), "Missing service code");
        assert_eq!(error(cbc().with("title", " ")), "Missing title");
        assert_eq!(error(cbc().with("group", "")), "Missing group");
        assert_eq!(error(cbc().with("type", "")), "Missing service type");
    }

    #[test]
    fn price_must_be_a_non_negative_number() {
        assert_eq!(error(cbc().with("price", "abc")), "Invalid price: 'abc'");
        assert_eq!(error(cbc().with("price", "-5")), "Invalid price: '-5'");
        assert_eq!(error(cbc().with("total", "lots")), "Invalid total: 'lots'");

        let comma = map_row(&cbc().with("price", "12,5"), &ColumnMap::default(), "PLN").unwrap();
        assert_eq!(comma.base_price, Money::parse("12.50", "PLN").unwrap());
    }

    #[test]
    fn missing_price_defaults_to_zero() {
        let mut row = cbc();
        row.insert("price", "");
        let entry = map_row(&row, &ColumnMap::default(), "EUR").unwrap();
        assert_eq!(entry.base_price, Money::zero("EUR").unwrap());
    }

    #[test]
    fn optional_fields_and_tags() {
        let row = cbc()
            .with("created", "2024-01-31")
            .with("tags", "morning; fasting, morning,,")
            .with("order_code", "ALB-17");
        let entry = map_row(&row, &ColumnMap::default(), "PLN").unwrap();
        assert_eq!(entry.created, NaiveDate::from_ymd_opt(2024, 1, 31));
        let tags: Vec<&str> = entry.tags.iter().map(NonEmptyText::as_str).collect();
        assert_eq!(tags, vec!["morning", "fasting"]);
        assert_eq!(entry.order_code.unwrap().as_str(), "ALB-17");

        assert!(error(cbc().with("created", "31/01/2024")).starts_with("Invalid created date"));
    }

    #[test]
    fn custom_column_names() {
        let columns = ColumnMap {
            code: "Kod".into(),
            ..ColumnMap::default()
        };
        let row = cbc().with("Kod", "X1");
        assert_eq!(
            map_row(&row, &columns, "PLN").unwrap().code.as_str(),
            "X1"
        );
    }

    #[test]
    fn row_problems_are_validation_errors() {
        let err = map_row(&cbc().with("price", "abc"), &ColumnMap::default(), "PLN").unwrap_err();
        assert!(matches!(err, ClinicError::Validation(_)));
        assert_eq!(err.to_string(), "validation failed: Invalid price: 'abc'");
    }

    #[test]
    fn unreadable_rows_are_rejected_with_their_reason() {
        assert_eq!(error(RawRow::unreadable("row is not an object")), "row is not an object");
    }
}
