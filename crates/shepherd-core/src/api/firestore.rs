//! Firestore REST value codec.
//!
//! Firestore documents carry typed values (`{"stringValue": "x"}`,
//! `{"integerValue": "42"}`, ...). The models in this crate are plain serde
//! structs, so documents are decoded into ordinary JSON before deserializing
//! and records are encoded back into typed values before writing.

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A single document as returned by the REST API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name: `projects/{p}/databases/{d}/documents/{collection}/{id}`
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    pub next_page_token: Option<String>,
}

impl Document {
    /// Document id (last path segment of the resource name)
    pub fn id(&self) -> &str {
        document_id(&self.name)
    }

    /// Decode the document into a record type.
    /// The document id is injected as `id` unless the fields already carry one.
    pub fn into_record<T: DeserializeOwned>(self) -> Result<T> {
        let id = self.id().to_string();
        let mut plain = decode_fields(&self.fields)
            .with_context(|| format!("Failed to decode document {}", self.name))?;
        if let Value::Object(ref mut map) = plain {
            map.entry("id").or_insert(Value::String(id));
        }
        serde_json::from_value(plain)
            .with_context(|| format!("Failed to deserialize document {}", self.name))
    }
}

pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Decode a Firestore `fields` map into a plain JSON object
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Value> {
    let mut out = Map::with_capacity(fields.len());
    for (key, value) in fields {
        let decoded = decode_value(value).with_context(|| format!("field `{}`", key))?;
        out.insert(key.clone(), decoded);
    }
    Ok(Value::Object(out))
}

/// Decode a single typed Firestore value into plain JSON
pub fn decode_value(value: &Value) -> Result<Value> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("expected a typed value object, got {}", value))?;
    let (kind, inner) = obj
        .iter()
        .next()
        .ok_or_else(|| anyhow!("empty typed value"))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => match inner {
            Value::Bool(_) => Ok(inner.clone()),
            other => bail!("booleanValue is not a boolean: {}", other),
        },
        // Int64 values travel as decimal strings
        "integerValue" => match inner {
            Value::String(s) => {
                let n: i64 = s.parse().with_context(|| format!("bad integerValue {:?}", s))?;
                Ok(json!(n))
            }
            Value::Number(_) => Ok(inner.clone()),
            other => bail!("integerValue has unexpected shape: {}", other),
        },
        "doubleValue" => match inner {
            Value::Number(_) => Ok(inner.clone()),
            // "NaN" / "Infinity" have no JSON representation
            Value::String(_) => Ok(Value::Null),
            other => bail!("doubleValue has unexpected shape: {}", other),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => match inner {
            Value::String(_) => Ok(inner.clone()),
            other => bail!("{} is not a string: {}", kind, other),
        },
        "geoPointValue" => Ok(json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        })),
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Value::Array(values)) => values.iter().map(decode_value).collect::<Result<Vec<_>>>()?,
                // An empty array is sent as `{}`
                _ => Vec::new(),
            };
            Ok(Value::Array(values))
        }
        "mapValue" => match inner.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields),
            _ => Ok(Value::Object(Map::new())),
        },
        other => bail!("unknown Firestore value kind `{}`", other),
    }
}

/// Encode plain JSON into a typed Firestore value.
/// Strings are written as `stringValue`; use [`encode_record`] to mark
/// timestamp fields explicitly.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_map(map, &[]) } }),
    }
}

fn encode_map(map: &Map<String, Value>, timestamp_fields: &[&str]) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let encoded = match value {
                Value::String(s) if timestamp_fields.contains(&key.as_str()) => {
                    json!({ "timestampValue": s })
                }
                other => encode_value(other),
            };
            (key.clone(), encoded)
        })
        .collect()
}

/// Serialize a record into a Firestore `fields` map.
/// Top-level keys listed in `timestamp_fields` are written as `timestampValue`;
/// an `id` key is dropped because the id lives in the document name.
pub fn encode_record<T: Serialize>(record: &T, timestamp_fields: &[&str]) -> Result<Map<String, Value>> {
    match serde_json::to_value(record).context("Failed to serialize record")? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(encode_map(&map, timestamp_fields))
        }
        other => bail!("record must serialize to an object, got {}", other),
    }
}

/// Encode a partial update; returns the fields map and the update mask paths
pub fn encode_patch(patch: &Map<String, Value>, timestamp_fields: &[&str]) -> (Map<String, Value>, Vec<String>) {
    let mask = patch.keys().cloned().collect();
    (encode_map(patch, timestamp_fields), mask)
}
