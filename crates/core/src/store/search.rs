//! Search parameters and matching shared by the bundled stores.
//!
//! Supported parameters:
//! - `_id`: exact id
//! - `identifier`: `system|value`, or a bare `value` matched under any system
//! - `status`: exact top-level `status`
//! - `class`: `class.code`
//! - `subject`, `beneficiary`: `Type/id` of that reference member
//! - `payor`: `Type/id` of any entry of the `payor` list
//! - `encounter`: `Type/id` of the coverage-encounter extension
//! - `date`: `geYYYY-MM-DD`, `leYYYY-MM-DD` or `YYYY-MM-DD` against `period.start` or `date`
//! - `name`: case-insensitive substring of any family or given name
//! - `_count`, `_offset`: paging, applied after filtering and ordering
//!
//! Repeating a parameter ANDs the conditions (`date=ge…&date=le…` is a range).

use super::{StoreError, StoreResult};
use chrono::NaiveDate;
use fhir::extensions::COVERAGE_ENCOUNTER;
use fhir::Resource;
use serde_json::Value;

const SUPPORTED: [&str; 12] = [
    "_id",
    "identifier",
    "status",
    "class",
    "subject",
    "beneficiary",
    "payor",
    "encounter",
    "date",
    "name",
    "_count",
    "_offset",
];

/// Ordered name/value search parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_string(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// First value given for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Filters `candidates`, orders them by creation and applies paging.
pub(crate) fn select(
    candidates: impl IntoIterator<Item = Resource>,
    params: &SearchParams,
) -> StoreResult<Vec<Resource>> {
    if let Some((name, _)) = params.iter().find(|(n, _)| !SUPPORTED.contains(n)) {
        return Err(StoreError::UnsupportedParameter(name.to_string()));
    }
    let count = paging_value(params, "_count")?;
    let offset = paging_value(params, "_offset")?.unwrap_or(0);

    let mut matched = Vec::new();
    for resource in candidates {
        if matches_all(&resource, params)? {
            matched.push(resource);
        }
    }
    matched.sort_by(|a, b| {
        a.meta()
            .created
            .cmp(&b.meta().created)
            .then_with(|| a.id().cmp(&b.id()))
    });

    Ok(matched
        .into_iter()
        .skip(offset)
        .take(count.unwrap_or(usize::MAX))
        .collect())
}

fn paging_value(params: &SearchParams, name: &str) -> StoreResult<Option<usize>> {
    params
        .get(name)
        .map(|raw| {
            raw.trim().parse::<usize>().map_err(|_| StoreError::InvalidParameter {
                name: name.to_string(),
                value: raw.to_string(),
            })
        })
        .transpose()
}

fn matches_all(resource: &Resource, params: &SearchParams) -> StoreResult<bool> {
    for (name, value) in params.iter() {
        if !matches(resource, name, value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches(resource: &Resource, name: &str, value: &str) -> StoreResult<bool> {
    let matched = match name {
        "_count" | "_offset" => true,
        "_id" => resource.id() == Some(value),
        "identifier" => identifier_matches(resource, value),
        "status" => resource.field("status").and_then(Value::as_str) == Some(value),
        "class" => {
            resource
                .field("class")
                .and_then(|c| c.get("code"))
                .and_then(Value::as_str)
                == Some(value)
        }
        "subject" | "beneficiary" => {
            resource.field(name).and_then(reference_string) == Some(value)
        }
        "payor" => match resource.field("payor") {
            Some(Value::Array(items)) => items.iter().any(|i| reference_string(i) == Some(value)),
            _ => false,
        },
        "encounter" => {
            resource
                .extension(COVERAGE_ENCOUNTER)
                .and_then(|e| e.raw_value().get("valueReference"))
                .and_then(reference_string)
                == Some(value)
        }
        "date" => date_matches(resource, value)?,
        "name" => name_matches(resource, value),
        other => return Err(StoreError::UnsupportedParameter(other.to_string())),
    };
    Ok(matched)
}

fn reference_string(value: &Value) -> Option<&str> {
    value.get("reference").and_then(Value::as_str)
}

fn identifier_matches(resource: &Resource, token: &str) -> bool {
    let Some(Value::Array(items)) = resource.field("identifier") else {
        return false;
    };
    let (system, value) = match token.split_once('|') {
        Some((system, value)) => (Some(system), value),
        None => (None, token),
    };
    items.iter().any(|item| {
        // Stored parts are compared trimmed, as `Identifier` builds them.
        let item_value = item.get("value").and_then(Value::as_str).map(str::trim);
        let item_system = item.get("system").and_then(Value::as_str).map(str::trim);
        item_value == Some(value.trim())
            && system.is_none_or(|s| item_system == Some(s.trim()))
    })
}

fn name_matches(resource: &Resource, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let Some(Value::Array(names)) = resource.field("name") else {
        return false;
    };
    names.iter().any(|name| {
        let family = name.get("family").and_then(Value::as_str).into_iter();
        let given = name
            .get("given")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        family
            .chain(given)
            .any(|part| part.to_lowercase().contains(&needle))
    })
}

fn date_matches(resource: &Resource, raw: &str) -> StoreResult<bool> {
    let invalid = || StoreError::InvalidParameter {
        name: "date".into(),
        value: raw.to_string(),
    };
    let (prefix, date) = match raw.get(..2) {
        Some(p @ ("ge" | "le" | "eq")) => (p, &raw[2..]),
        _ => ("eq", raw),
    };
    let wanted = leading_date(date).ok_or_else(invalid)?;

    let stored = resource
        .field("period")
        .and_then(|p| p.get("start"))
        .or_else(|| resource.field("date"))
        .and_then(Value::as_str)
        .and_then(leading_date);
    let Some(stored) = stored else {
        return Ok(false);
    };

    Ok(match prefix {
        "ge" => stored >= wanted,
        "le" => stored <= wanted,
        _ => stored == wanted,
    })
}

/// Date part of `YYYY-MM-DD` or an RFC 3339 instant.
fn leading_date(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encounter(id: &str, start: &str) -> Resource {
        let mut r = Resource::new("Encounter");
        r.set_id(Some(id.into()));
        r.set_field("status", json!("in-progress"));
        r.set_field("class", json!({"code": "AMB"}));
        r.set_field("subject", json!({"reference": "Patient/p1"}));
        r.set_field("period", json!({"start": start}));
        r.set_field(
            "identifier",
            json!([{"system": "urn:reg", "value": "R-1"}]),
        );
        r
    }

    #[test]
    fn filters_on_every_parameter() {
        let r = encounter("e1", "2024-05-01T08:00:00Z");
        let hit = SearchParams::new()
            .with("status", "in-progress")
            .with("class", "AMB")
            .with("subject", "Patient/p1")
            .with("identifier", "urn:reg|R-1")
            .with("date", "ge2024-05-01")
            .with("date", "le2024-05-31");
        assert_eq!(select([r.clone()], &hit).unwrap().len(), 1);

        let miss = SearchParams::new().with("identifier", "urn:other|R-1");
        assert!(select([r.clone()], &miss).unwrap().is_empty());

        let bare = SearchParams::new().with("identifier", "R-1");
        assert_eq!(select([r], &bare).unwrap().len(), 1);
    }

    #[test]
    fn name_is_case_insensitive_substring() {
        let mut p = Resource::new("Patient");
        p.set_field("name", json!([{"family": "Kowalska", "given": ["Anna"]}]));
        assert_eq!(select([p.clone()], &SearchParams::new().with("name", "kowal")).unwrap().len(), 1);
        assert_eq!(select([p.clone()], &SearchParams::new().with("name", "ANN")).unwrap().len(), 1);
        assert!(select([p], &SearchParams::new().with("name", "nowak")).unwrap().is_empty());
    }

    #[test]
    fn pages_after_ordering() {
        let resources: Vec<Resource> = (0..5)
            .map(|i| {
                let mut r = encounter(&format!("e{i}"), "2024-05-01");
                r.meta_mut().created = Some(
                    format!("2024-05-01T00:00:0{}Z", 4 - i).parse().unwrap(),
                );
                r
            })
            .collect();
        let page = select(
            resources,
            &SearchParams::new().with("_offset", "1").with("_count", "2"),
        )
        .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id().unwrap()).collect();
        assert_eq!(ids, vec!["e3", "e2"]);
    }

    #[test]
    fn rejects_unknown_and_malformed_parameters() {
        let r = encounter("e1", "2024-05-01");
        assert!(matches!(
            select([r.clone()], &SearchParams::new().with("colour", "red")),
            Err(StoreError::UnsupportedParameter(_))
        ));
        assert!(matches!(
            select([r.clone()], &SearchParams::new().with("date", "ge-yesterday")),
            Err(StoreError::InvalidParameter { .. })
        ));
        assert!(select([r], &SearchParams::new().with("_count", "x")).is_err());
    }
}
