//! Object codec - payload encoding and decoding
//!
//! The payload of a row is a JSON object holding the object's own fields.
//! Values that are not plain JSON are tagged:
//! - pointers: `{"__type": "Pointer", "className": "User", "objectId": "u1"}`
//! - dates: `{"__type": "Date", "iso": "2024-05-01T10:00:00.000000Z"}`
//!
//! Referenced objects are stored by key only. Decoding a pointer yields the
//! object already decoded for that key in the same pass, or a stub.

use crate::object::{Object, ObjectKey, ObjectRef, Value};
use crate::row::Row;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const TYPE_KEY: &str = "__type";
const POINTER_TYPE: &str = "Pointer";
const DATE_TYPE: &str = "Date";

/// Format a timestamp the way it is stored: RFC 3339, microseconds, `Z`.
///
/// The format is fixed width, so string order matches time order.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_date(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| Error::decode(text, format!("invalid date: {}", e)))
}

/// Result of encoding one object
#[derive(Debug, Clone)]
pub struct Encoded {
    /// JSON payload of the object's own fields
    pub payload: String,
    /// Objects referenced directly by this object, in field order
    pub references: Vec<ObjectRef>,
}

/// Encode an object's fields into a payload and report its references.
///
/// Plain JSON maps may not use the `__type` key, since decoding would read
/// them back as pointers or dates.
pub fn encode(object: &Object) -> Result<Encoded> {
    let mut references = Vec::new();
    let mut payload = Map::new();

    for (key, value) in object.fields() {
        if has_type_key(&value) {
            return Err(Error::decode(
                object.key(),
                format!("field `{}` holds a map with the reserved `{}` key", key, TYPE_KEY),
            ));
        }
        payload.insert(key, encode_value(&value, &mut references));
    }

    Ok(Encoded {
        payload: serde_json::to_string(&payload)?,
        references,
    })
}

/// Objects referenced directly by an object, without building a payload
pub fn references(object: &Object) -> Vec<ObjectRef> {
    let mut references = Vec::new();
    for value in object.fields().values() {
        collect_references(value, &mut references);
    }
    references
}

fn collect_references(value: &Value, out: &mut Vec<ObjectRef>) {
    match value {
        Value::Pointer(object) => out.push(Arc::clone(object)),
        Value::List(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Value::Json(_) | Value::Date(_) => {}
    }
}

/// Whether a plain JSON value would be mistaken for a tagged one on decode
fn has_type_key(value: &Value) -> bool {
    fn tagged(json: &serde_json::Value) -> bool {
        match json {
            serde_json::Value::Object(map) => map.contains_key(TYPE_KEY),
            serde_json::Value::Array(items) => items.iter().any(tagged),
            _ => false,
        }
    }

    match value {
        Value::Json(json) => tagged(json),
        Value::List(items) => items.iter().any(has_type_key),
        Value::Date(_) | Value::Pointer(_) => false,
    }
}

fn encode_value(value: &Value, references: &mut Vec<ObjectRef>) -> serde_json::Value {
    match value {
        Value::Json(json) => json.clone(),
        Value::Date(date) => json!({ TYPE_KEY: DATE_TYPE, "iso": format_date(date) }),
        Value::Pointer(object) => {
            references.push(Arc::clone(object));
            json!({
                TYPE_KEY: POINTER_TYPE,
                "className": object.class_name(),
                "objectId": object.object_id(),
            })
        }
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(|item| encode_value(item, references)).collect(),
        ),
    }
}

/// A display/interchange document for one object:
/// `{className, objectId, createdAt, updatedAt, fields}`
pub fn to_json(object: &Object) -> serde_json::Value {
    let mut ignored = Vec::new();
    let fields: Map<String, serde_json::Value> = object
        .fields()
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value, &mut ignored)))
        .collect();

    json!({
        "className": object.class_name(),
        "objectId": object.object_id(),
        "createdAt": object.created_at().as_ref().map(format_date),
        "updatedAt": object.updated_at().as_ref().map(format_date),
        "fields": fields,
    })
}

/// Decoder with an identity cache.
///
/// Within one decoder every key maps to exactly one [`ObjectRef`]: a pointer
/// to an object that is decoded later in the same pass is populated in place,
/// and cycles decode to the same shared handles.
#[derive(Debug, Default)]
pub struct Decoder {
    cache: HashMap<ObjectKey, ObjectRef>,
}

impl Decoder {
    /// Create a new decoder with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `object` the decode target for its key
    pub fn seed(&mut self, object: ObjectRef) {
        self.cache.insert(object.key(), object);
    }

    /// Get the object for a key, creating a stub on first sight
    pub fn object_for(&mut self, key: &ObjectKey) -> ObjectRef {
        Arc::clone(
            self.cache
                .entry(key.clone())
                .or_insert_with(|| Object::stub(key)),
        )
    }

    /// Number of distinct objects seen by this decoder
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Decode a row into its object, populating the cached handle
    pub fn decode_row(&mut self, row: &Row) -> Result<ObjectRef> {
        let key = row.key();
        let fields = self.decode_fields(&key, &row.payload)?;
        let object = self.object_for(&key);
        object.populate(fields, Some(row.created_at), Some(row.updated_at));
        Ok(object)
    }

    /// Decode a payload string into a field map
    pub fn decode_fields(&mut self, owner: &ObjectKey, payload: &str) -> Result<BTreeMap<String, Value>> {
        let parsed: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| Error::decode(owner, format!("payload is not JSON: {}", e)))?;

        match parsed {
            serde_json::Value::Object(map) => self.decode_map(owner, map),
            other => Err(Error::decode(
                owner,
                format!("payload must be a JSON object, got {}", json_type(&other)),
            )),
        }
    }

    /// Decode an interchange document produced by [`to_json`].
    ///
    /// Timestamps in the document are ignored; they are assigned on save.
    pub fn decode_document(&mut self, document: &serde_json::Value) -> Result<ObjectRef> {
        let class_name = document
            .get("className")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::decode("document", "missing className"))?;
        let object_id = document
            .get("objectId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::decode("document", "missing objectId"))?;
        let key = ObjectKey::new(class_name, object_id);

        let fields = match document.get("fields") {
            None | Some(serde_json::Value::Null) => BTreeMap::new(),
            Some(serde_json::Value::Object(map)) => self.decode_map(&key, map.clone())?,
            Some(other) => {
                return Err(Error::decode(
                    &key,
                    format!("fields must be an object, got {}", json_type(other)),
                ));
            }
        };

        let object = self.object_for(&key);
        object.populate(fields, None, None);
        Ok(object)
    }

    fn decode_map(&mut self, owner: &ObjectKey, map: Map<String, serde_json::Value>) -> Result<BTreeMap<String, Value>> {
        let mut fields = BTreeMap::new();
        for (key, value) in map {
            fields.insert(key, self.decode_value(owner, value)?);
        }
        Ok(fields)
    }

    fn decode_value(&mut self, owner: &ObjectKey, value: serde_json::Value) -> Result<Value> {
        match value {
            serde_json::Value::Object(map) => {
                match map.get(TYPE_KEY).and_then(|t| t.as_str()) {
                    Some(POINTER_TYPE) => {
                        let class_name = map.get("className").and_then(|v| v.as_str());
                        let object_id = map.get("objectId").and_then(|v| v.as_str());
                        match (class_name, object_id) {
                            (Some(class_name), Some(object_id)) => {
                                let key = ObjectKey::new(class_name, object_id);
                                Ok(Value::Pointer(self.object_for(&key)))
                            }
                            _ => Err(Error::decode(owner, "pointer without className/objectId")),
                        }
                    }
                    Some(DATE_TYPE) => {
                        let iso = map
                            .get("iso")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| Error::decode(owner, "date without iso"))?;
                        let date = DateTime::parse_from_rfc3339(iso).map_err(|e| {
                            Error::decode(owner, format!("invalid date `{}`: {}", iso, e))
                        })?;
                        Ok(Value::Date(date.with_timezone(&Utc)))
                    }
                    _ => Ok(Value::Json(serde_json::Value::Object(map))),
                }
            }
            serde_json::Value::Array(items) => {
                let decoded = items
                    .into_iter()
                    .map(|item| self.decode_value(owner, item))
                    .collect::<Result<Vec<_>>>()?;

                if decoded.iter().all(|v| matches!(v, Value::Json(_))) {
                    let plain = decoded
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::Json(json) => Some(json),
                            _ => None,
                        })
                        .collect();
                    Ok(Value::Json(serde_json::Value::Array(plain)))
                } else {
                    Ok(Value::List(decoded))
                }
            }
            scalar => Ok(Value::Json(scalar)),
        }
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_for(object: &Object, payload: String) -> Row {
        let now = Utc::now();
        Row::new(object.class_name(), object.object_id(), now, now, payload)
    }

    #[test]
    fn test_encode_reports_references() {
        let author = Object::new("User", "u1");
        let tag = Object::new("Tag", "t1");
        let note = Object::with_fields("Note", "n1", [("title", Value::from("hi"))]);
        note.set("author", &author);
        note.set("tags", vec![Value::from(&tag), Value::from("loose")]);

        let encoded = encode(&note).unwrap();
        let keys: Vec<_> = encoded.references.iter().map(|o| o.key().to_string()).collect();
        assert_eq!(keys, vec!["User/u1", "Tag/t1"]);

        let payload: serde_json::Value = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(payload["title"], "hi");
        assert_eq!(payload["author"]["__type"], "Pointer");
        assert_eq!(payload["author"]["objectId"], "u1");

        assert_eq!(references(&note).len(), 2);
    }

    #[test]
    fn test_decode_pointer_yields_stub() {
        let note = Object::new("Note", "n1");
        note.set("author", Object::new("User", "u1"));
        let encoded = encode(&note).unwrap();

        let mut decoder = Decoder::new();
        let decoded = decoder.decode_row(&row_for(&note, encoded.payload)).unwrap();

        let author = decoded.get("author").unwrap();
        let author = author.as_pointer().unwrap();
        assert_eq!(author.key(), ObjectKey::new("User", "u1"));
        assert!(!author.is_data_available());
        assert!(decoded.is_data_available());
    }

    #[test]
    fn test_decode_cycle_shares_identity() {
        let a = Object::new("Node", "a");
        let b = Object::new("Node", "b");
        a.set("next", &b);
        b.set("next", &a);

        let row_a = row_for(&a, encode(&a).unwrap().payload);
        let row_b = row_for(&b, encode(&b).unwrap().payload);

        let mut decoder = Decoder::new();
        let decoded_a = decoder.decode_row(&row_a).unwrap();
        let decoded_b = decoder.decode_row(&row_b).unwrap();

        let next_of_a = decoded_a.get("next").unwrap();
        assert!(Arc::ptr_eq(next_of_a.as_pointer().unwrap(), &decoded_b));
        assert!(decoded_b.is_data_available());
        assert_eq!(decoder.len(), 2);
    }

    #[test]
    fn test_dates_roundtrip() {
        let when = parse_date("2024-05-01T10:00:00.123456Z").unwrap();
        let event = Object::with_fields("Event", "e1", [("at", when)]);

        let mut decoder = Decoder::new();
        let decoded = decoder
            .decode_row(&row_for(&event, encode(&event).unwrap().payload))
            .unwrap();
        assert_eq!(decoded.get("at"), Some(Value::Date(when)));
        assert_eq!(format_date(&when), "2024-05-01T10:00:00.123456Z");
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        let note = Object::new("Note", "n1");
        let mut decoder = Decoder::new();
        let err = decoder.decode_row(&row_for(&note, "[1,2]".to_string())).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_document_roundtrip() {
        let user = Object::with_fields("User", "u1", [("name", "ada")]);
        let note = Object::with_fields("Note", "n1", [("title", "hi")]);
        note.set("author", &user);

        let mut decoder = Decoder::new();
        let decoded_user = decoder.decode_document(&to_json(&user)).unwrap();
        let decoded_note = decoder.decode_document(&to_json(&note)).unwrap();

        let author = decoded_note.get("author").unwrap();
        assert!(Arc::ptr_eq(author.as_pointer().unwrap(), &decoded_user));
        assert_eq!(decoded_user.get("name").unwrap().as_str(), Some("ada"));
    }

    #[test]
    fn test_encode_rejects_reserved_type_key() {
        let event = Object::new("Event", "e1");
        event.set("meta", json!({ "__type": "Date", "iso": "soon" }));
        match encode(&event).unwrap_err() {
            Error::Decode { key, reason } => {
                assert_eq!(key, "Event/e1");
                assert!(reason.contains("meta"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let nested = Object::new("Event", "e2");
        nested.set("log", json!([1, { "__type": "Pointer" }]));
        assert!(encode(&nested).is_err());

        // Only top-level maps and array items are read back as tags
        let deep = Object::new("Event", "e3");
        deep.set("meta", json!({ "inner": { "__type": "Date" } }));
        assert!(encode(&deep).is_ok());
    }

    #[test]
    fn test_bad_stored_date_names_owner() {
        let event = Object::new("Event", "e1");
        let payload = r#"{"at":{"__type":"Date","iso":"soon"}}"#.to_string();

        let mut decoder = Decoder::new();
        match decoder.decode_row(&row_for(&event, payload)).unwrap_err() {
            Error::Decode { key, reason } => {
                assert_eq!(key, "Event/e1");
                assert!(reason.contains("`soon`"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
