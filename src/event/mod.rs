//! MISP event model
//!
//! Only the identifier and the attribute list are interpreted; every other
//! field of the event and of each attribute is carried through unmodified.

mod merge;

pub use merge::merge;

use crate::error::{GlueError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A MISP event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// MISP event id; accepted as a JSON string or number
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(rename = "Attribute", default)]
    pub attributes: Vec<Attribute>,

    /// Everything else MISP sent (info, uuid, Orgc, Tag, Object, ...)
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// One typed observable inside an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub attr_type: String,

    pub value: String,

    /// MISP matches attributes on edit by uuid; one without is stored as new
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Attribute {
    /// An attribute carrying only a type and value
    pub fn new(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr_type: attr_type.into(),
            value: value.into(),
            uuid: None,
            metadata: Map::new(),
        }
    }

    /// A new attribute with a freshly generated v4 uuid
    pub fn generated(attr_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            uuid: Some(Uuid::new_v4().to_string()),
            ..Self::new(attr_type, value)
        }
    }
}

/// `{"Event": {...}}` envelope used on the feed and by the REST API
#[derive(Serialize)]
struct EventEnvelopeRef<'a> {
    #[serde(rename = "Event")]
    event: &'a Event,
}

impl Event {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Parse an event from JSON, with or without the `Event` envelope
    pub fn from_json(json: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(json).map_err(|e| GlueError::Json {
            source: e,
            context: "Event payload is not valid JSON".to_string(),
        })?;

        if let Some(inner) = value.as_object_mut().and_then(|o| o.remove("Event")) {
            value = inner;
        }

        serde_json::from_value(value).map_err(|e| GlueError::Json {
            source: e,
            context: "Payload is not a MISP event".to_string(),
        })
    }

    /// Serialize wrapped in the `Event` envelope
    pub fn to_envelope(&self) -> Result<Value> {
        serde_json::to_value(EventEnvelopeRef { event: self }).map_err(|e| GlueError::Json {
            source: e,
            context: format!("Failed to serialize event {}", self.id),
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected event id as string or number, got {}",
            other
        ))),
    }
}
