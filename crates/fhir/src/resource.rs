//! Generic, extensible resource representation.
//!
//! A [`Resource`] is the shape every domain record is translated to before it reaches a
//! store. It keeps:
//! - the resource type and id,
//! - store-managed [`Meta`] (version, creation and update timestamps, tags),
//! - an ordered list of [`Extension`]s keyed by URL,
//! - every other top-level JSON member in insertion order.
//!
//! Members and extensions that no mapper recognises are carried verbatim, so a
//! read-modify-write cycle through a mapper never erases unrelated data.

use crate::money::Money;
use crate::reference::Reference;
use crate::{FhirError, FhirResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Public types
// ============================================================================

/// A coded tag carried in resource metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
}

/// Store-managed resource metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meta {
    /// Version counter assigned by the store, as a string.
    pub version_id: Option<String>,

    /// When the store first persisted the resource.
    pub created: Option<DateTime<Utc>>,

    /// When the store last persisted the resource.
    pub last_updated: Option<DateTime<Utc>>,

    /// Coded tags.
    pub tags: Vec<Tag>,

    other: Map<String, Value>,
}

impl Meta {
    fn is_empty(&self) -> bool {
        self.version_id.is_none()
            && self.created.is_none()
            && self.last_updated.is_none()
            && self.tags.is_empty()
            && self.other.is_empty()
    }
}

/// A key-addressed optional attribute slot on a resource.
///
/// The value members (for example `valueString`) are kept as raw JSON so that extensions
/// with value kinds this crate does not model are preserved unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Extension {
    url: String,
    value: Map<String, Value>,
}

impl Extension {
    fn with_value(url: &str, key: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Self {
            url: url.to_string(),
            value: map,
        }
    }

    pub fn string(url: &str, value: impl Into<String>) -> Self {
        Self::with_value(url, "valueString", Value::String(value.into()))
    }

    pub fn boolean(url: &str, value: bool) -> Self {
        Self::with_value(url, "valueBoolean", Value::Bool(value))
    }

    pub fn money(url: &str, value: &Money) -> FhirResult<Self> {
        Ok(Self::with_value(url, "valueMoney", value.to_json()?))
    }

    pub fn reference(url: &str, value: &Reference) -> Self {
        Self::with_value(url, "valueReference", value.to_json())
    }

    pub fn date(url: &str, value: NaiveDate) -> Self {
        Self::with_value(
            url,
            "valueDate",
            Value::String(value.format("%Y-%m-%d").to_string()),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw value members, excluding `url`.
    pub fn raw_value(&self) -> &Map<String, Value> {
        &self.value
    }

    fn typed_value(&self, key: &str) -> FhirResult<&Value> {
        self.value.get(key).ok_or_else(|| {
            FhirError::Translation(format!("extension '{}' has no {key}", self.url))
        })
    }

    pub fn as_string(&self) -> FhirResult<&str> {
        self.typed_value("valueString")?.as_str().ok_or_else(|| {
            FhirError::Translation(format!("extension '{}' valueString is not a string", self.url))
        })
    }

    pub fn as_bool(&self) -> FhirResult<bool> {
        self.typed_value("valueBoolean")?.as_bool().ok_or_else(|| {
            FhirError::Translation(format!(
                "extension '{}' valueBoolean is not a boolean",
                self.url
            ))
        })
    }

    pub fn as_money(&self) -> FhirResult<Money> {
        Money::from_json(self.typed_value("valueMoney")?)
            .map_err(|e| FhirError::Translation(format!("extension '{}': {e}", self.url)))
    }

    pub fn as_reference(&self) -> FhirResult<Reference> {
        Reference::from_json(self.typed_value("valueReference")?)
    }

    pub fn as_date(&self) -> FhirResult<NaiveDate> {
        let raw = self.typed_value("valueDate")?.as_str().ok_or_else(|| {
            FhirError::Translation(format!("extension '{}' valueDate is not a string", self.url))
        })?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            FhirError::Translation(format!("extension '{}' valueDate '{raw}': {e}", self.url))
        })
    }
}

/// Typed, versioned, extensible record.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    resource_type: String,
    id: Option<String>,
    meta: Meta,
    extensions: Vec<Extension>,
    fields: Map<String, Value>,
}

impl Resource {
    /// Creates an empty resource of the given type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            meta: Meta::default(),
            extensions: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// Returns `Type/id` for a persisted resource.
    pub fn reference(&self) -> FhirResult<Reference> {
        let id = self.id.as_deref().ok_or_else(|| {
            FhirError::InvalidReference(format!("{} has no id", self.resource_type))
        })?;
        Reference::new(&self.resource_type, id)
    }

    /// Fails unless this resource has the expected type.
    pub fn expect_type(&self, expected: &'static str) -> FhirResult<()> {
        if self.resource_type != expected {
            return Err(FhirError::ResourceType {
                expected,
                found: self.resource_type.clone(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Top-level members
    // ------------------------------------------------------------------

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Sets a member, keeping its position if it already exists.
    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Sets the member when `value` is present, removes it otherwise.
    pub fn set_or_remove_field(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(value) => self.set_field(name, value),
            None => {
                self.remove_field(name);
            }
        }
    }

    /// Deserialises a member into a typed wire struct, reporting the failing path.
    pub fn field_as<T: DeserializeOwned>(&self, name: &str) -> FhirResult<Option<T>> {
        let Some(value) = self.fields.get(name) else {
            return Ok(None);
        };
        match serde_path_to_error::deserialize::<_, T>(value.clone()) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    name.to_string()
                } else {
                    format!("{name}.{path}")
                };
                Err(FhirError::Translation(format!(
                    "{} schema mismatch at {path}: {source}",
                    self.resource_type
                )))
            }
        }
    }

    pub fn string_field(&self, name: &str) -> FhirResult<Option<String>> {
        self.field_as::<String>(name)
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extension(&self, url: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.url == url)
    }

    pub fn has_extension(&self, url: &str) -> bool {
        self.extension(url).is_some()
    }

    /// Inserts or replaces the extension with the same URL.
    ///
    /// A replaced extension keeps its position; any further duplicates of the URL are
    /// removed so each URL appears at most once.
    pub fn set_extension(&mut self, extension: Extension) {
        match self.extensions.iter().position(|e| e.url == extension.url) {
            Some(index) => {
                let url = extension.url.clone();
                self.extensions[index] = extension;
                let mut seen = false;
                self.extensions.retain(|e| {
                    if e.url != url {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.extensions.push(extension),
        }
    }

    /// Removes every extension with the URL; returns whether any was removed.
    pub fn remove_extension(&mut self, url: &str) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e.url != url);
        before != self.extensions.len()
    }

    /// Sets the extension when `extension` is present, removes the URL otherwise.
    pub fn set_or_remove_extension(&mut self, url: &str, extension: Option<Extension>) {
        match extension {
            Some(extension) => {
                debug_assert_eq!(extension.url, url);
                self.set_extension(extension);
            }
            None => {
                self.remove_extension(url);
            }
        }
    }

    pub fn extension_string(&self, url: &str) -> FhirResult<Option<String>> {
        self.extension(url)
            .map(|e| e.as_string().map(str::to_string))
            .transpose()
    }

    pub fn extension_bool(&self, url: &str) -> FhirResult<Option<bool>> {
        self.extension(url).map(Extension::as_bool).transpose()
    }

    pub fn extension_money(&self, url: &str) -> FhirResult<Option<Money>> {
        self.extension(url).map(Extension::as_money).transpose()
    }

    pub fn extension_reference(&self, url: &str) -> FhirResult<Option<Reference>> {
        self.extension(url).map(Extension::as_reference).transpose()
    }

    pub fn extension_date(&self, url: &str) -> FhirResult<Option<NaiveDate>> {
        self.extension(url).map(Extension::as_date).transpose()
    }

    // ------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------

    /// Parse a resource from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] naming the failing path when the JSON does not
    /// have the generic resource shape (for example a missing `resourceType`).
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        let wire = match serde_path_to_error::deserialize::<_, ResourceWire>(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "resource schema mismatch at {path}: {source}"
                )));
            }
        };
        wire.try_into()
    }

    /// Render the resource as pretty-printed JSON text.
    pub fn render(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(&ResourceWire::from(self))?)
    }

    pub fn to_json(&self) -> FhirResult<Value> {
        Ok(serde_json::to_value(ResourceWire::from(self))?)
    }

    pub fn from_json(value: Value) -> FhirResult<Self> {
        let wire: ResourceWire = serde_json::from_value(value)?;
        wire.try_into()
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
struct ResourceWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<MetaWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extension: Vec<ExtensionWire>,

    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MetaWire {
    #[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<String>,

    #[serde(rename = "lastUpdated", default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tag: Vec<Tag>,

    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ExtensionWire {
    url: String,

    #[serde(flatten)]
    value: Map<String, Value>,
}

/// Parses an optional RFC 3339 instant, naming `field` in the error.
pub(crate) fn parse_instant(field: &str, raw: Option<String>) -> FhirResult<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| FhirError::Translation(format!("{field} '{s}': {e}")))
    })
    .transpose()
}

impl TryFrom<ResourceWire> for Resource {
    type Error = FhirError;

    fn try_from(wire: ResourceWire) -> FhirResult<Self> {
        if wire.resource_type.trim().is_empty() {
            return Err(FhirError::InvalidInput("resourceType cannot be empty".into()));
        }

        let meta = match wire.meta {
            Some(m) => Meta {
                version_id: m.version_id,
                created: parse_instant("meta.created", m.created)?,
                last_updated: parse_instant("meta.lastUpdated", m.last_updated)?,
                tags: m.tag,
                other: m.other,
            },
            None => Meta::default(),
        };

        Ok(Resource {
            resource_type: wire.resource_type,
            id: wire.id,
            meta,
            extensions: wire
                .extension
                .into_iter()
                .map(|e| Extension {
                    url: e.url,
                    value: e.value,
                })
                .collect(),
            fields: wire.fields,
        })
    }
}

impl From<&Resource> for ResourceWire {
    fn from(resource: &Resource) -> Self {
        let meta = (!resource.meta.is_empty()).then(|| MetaWire {
            version_id: resource.meta.version_id.clone(),
            created: resource.meta.created.map(|dt| dt.to_rfc3339()),
            last_updated: resource.meta.last_updated.map(|dt| dt.to_rfc3339()),
            tag: resource.meta.tags.clone(),
            other: resource.meta.other.clone(),
        });

        ResourceWire {
            resource_type: resource.resource_type.clone(),
            id: resource.id.clone(),
            meta,
            extension: resource
                .extensions
                .iter()
                .map(|e| ExtensionWire {
                    url: e.url.clone(),
                    value: e.value.clone(),
                })
                .collect(),
            fields: resource.fields.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_unknown_members_and_extensions() {
        let input = r#"{
  "resourceType": "ActivityDefinition",
  "id": "svc-1",
  "meta": {"versionId": "3", "source": "legacy"},
  "extension": [
    {"url": "http://other.example/ext/colour", "valueCodeableConcept": {"text": "red"}}
  ],
  "title": "CBC",
  "useContext": [{"code": {"code": "focus"}}]
}"#;

        let resource = Resource::parse(input).expect("parse");
        let rendered = resource.render().expect("render");
        let reparsed = Resource::parse(&rendered).expect("reparse");

        assert_eq!(resource, reparsed);
        assert!(rendered.contains("valueCodeableConcept"));
        assert!(rendered.contains("useContext"));
        assert!(rendered.contains("\"source\": \"legacy\""));
    }

    #[test]
    fn rejects_missing_resource_type() {
        let err = Resource::parse(r#"{"id": "x"}"#).expect_err("should fail");
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("resourceType")),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn set_extension_replaces_in_place() {
        let mut resource = Resource::new("ActivityDefinition");
        resource.set_extension(Extension::string("urn:a", "1"));
        resource.set_extension(Extension::boolean("urn:b", true));
        resource.set_extension(Extension::string("urn:a", "2"));

        let urls: Vec<_> = resource.extensions().iter().map(Extension::url).collect();
        assert_eq!(urls, vec!["urn:a", "urn:b"]);
        assert_eq!(resource.extension_string("urn:a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn large_money_extension_survives_render_and_parse() {
        let price = Money::parse("12345678901234567.89", "GEL").unwrap();
        let mut resource = Resource::new("ActivityDefinition");
        resource.set_extension(Extension::money("urn:price", &price).unwrap());

        let back = Resource::parse(&resource.render().unwrap()).unwrap();
        assert_eq!(back.extension_money("urn:price").unwrap(), Some(price));
    }

    #[test]
    fn wrong_extension_value_kind_is_an_error() {
        let mut resource = Resource::new("ActivityDefinition");
        resource.set_extension(Extension::string("urn:flag", "yes"));

        let err = resource.extension_bool("urn:flag").expect_err("should fail");
        assert!(matches!(err, FhirError::Translation(_)));
    }

    #[test]
    fn field_as_reports_path() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct PeriodWire {
            start: String,
        }

        let mut resource = Resource::new("Encounter");
        resource.set_field("period", json!({"start": 5}));

        let err = resource
            .field_as::<PeriodWire>("period")
            .expect_err("should fail");
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("period.start"), "{msg}"),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_meta_is_not_rendered() {
        let resource = Resource::new("Patient");
        let rendered = resource.render().expect("render");
        assert!(!rendered.contains("meta"));
        assert!(!rendered.contains("extension"));
    }
}
