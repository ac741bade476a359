//! Object model - the in-memory graph that gets mirrored into the store
//!
//! Every object is identified by an [`ObjectKey`]:
//! `(class_name, object_id)`, rendered as `<class>/<id>`.
//!
//! Examples:
//! - `Note/n1`
//! - `Tag/t1`
//!
//! Objects are shared through [`ObjectRef`] handles so a graph may contain
//! shared and cyclic references. Objects decoded from the store as the
//! target of a pointer start out as stubs: identity only, no field data,
//! until their own row is loaded.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared handle to an object.
pub type ObjectRef = Arc<Object>;

/// Primary key of a persisted object.
///
/// This key is used for:
/// - The primary key of the `objects` table
/// - The visited set of graph walks
/// - The identity cache of the decoder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Logical type of the object, used for registry lookup
    pub class_name: String,
    /// Identifier, unique within `class_name`
    pub object_id: String,
}

impl ObjectKey {
    /// Create a new ObjectKey
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Parse a `<class>/<id>` string into an ObjectKey
    ///
    /// The class name ends at the first `/`; the remainder is the id.
    pub fn parse(key: &str) -> Result<Self> {
        let (class_name, object_id) = key
            .split_once('/')
            .ok_or_else(|| Error::InvalidKey(format!("expected <class>/<id>, got `{}`", key)))?;

        if class_name.is_empty() || object_id.is_empty() {
            return Err(Error::InvalidKey(format!("empty class or id in `{}`", key)));
        }

        Ok(Self::new(class_name, object_id))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_name, self.object_id)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ObjectKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A field value.
///
/// Scalars and plain compound values are carried as JSON. Dates and
/// references to other objects get their own variants so the codec can
/// encode them and report references.
#[derive(Clone)]
pub enum Value {
    /// Strings, numbers, booleans, null, and pointer-free arrays/maps
    Json(serde_json::Value),
    /// A point in time
    Date(DateTime<Utc>),
    /// A reference to another object
    Pointer(ObjectRef),
    /// A list that may contain pointers
    List(Vec<Value>),
}

impl Value {
    /// Get the string content, if this is a JSON string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Json(json) => json.as_str(),
            _ => None,
        }
    }

    /// Get the integer content, if this is a JSON integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Json(json) => json.as_i64(),
            _ => None,
        }
    }

    /// Get the referenced object, if this is a pointer
    pub fn as_pointer(&self) -> Option<&ObjectRef> {
        match self {
            Value::Pointer(object) => Some(object),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => {
                a.class_name == b.class_name && a.object_id == b.object_id
            }
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

// Pointers print their key only, so cyclic graphs stay printable.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Json(json) => write!(f, "{}", json),
            Value::Date(date) => write!(f, "Date({})", date.to_rfc3339()),
            Value::Pointer(object) => write!(f, "Pointer({})", object.key()),
            Value::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Json(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Json(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Json(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Json(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Json(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Json(value.into())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Pointer(value)
    }
}

impl From<&ObjectRef> for Value {
    fn from(value: &ObjectRef) -> Self {
        Value::Pointer(Arc::clone(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

#[derive(Debug, Default)]
struct ObjectState {
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    fields: BTreeMap<String, Value>,
    data_available: bool,
}

/// An application object.
///
/// The identity (`class_name`, `object_id`) is fixed at construction. Fields
/// and timestamps live behind a lock so a shared handle can be updated by
/// the store after a save or a fetch.
pub struct Object {
    class_name: String,
    object_id: String,
    state: RwLock<ObjectState>,
}

impl Object {
    /// Create a new object with no fields
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
            state: RwLock::new(ObjectState {
                data_available: true,
                ..ObjectState::default()
            }),
        })
    }

    /// Create an object with an initial set of fields
    pub fn with_fields<K, V>(
        class_name: impl Into<String>,
        object_id: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> ObjectRef
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new(class_name, object_id);
        for (key, value) in fields {
            object.set(key, value);
        }
        object
    }

    /// Create an identity-only placeholder whose data has not been loaded
    pub fn stub(key: &ObjectKey) -> ObjectRef {
        Arc::new(Self {
            class_name: key.class_name.clone(),
            object_id: key.object_id.clone(),
            state: RwLock::new(ObjectState::default()),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Get the primary key of this object
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.class_name, &self.object_id)
    }

    /// Whether the fields of this object are loaded (false for stubs)
    pub fn is_data_available(&self) -> bool {
        self.read().data_available
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.read().created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().updated_at
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().fields.get(key).cloned()
    }

    /// Set a field value
    ///
    /// Setting a field on a stub does not make its data available.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().fields.insert(key.into(), value.into());
    }

    /// Remove a field, returning its previous value
    pub fn unset(&self, key: &str) -> Option<Value> {
        self.write().fields.remove(key)
    }

    /// Names of all fields, in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.read().fields.keys().cloned().collect()
    }

    /// Snapshot of all fields
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.read().fields.clone()
    }

    /// Record the timestamps of a successful save
    pub(crate) fn mark_saved(&self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
        let mut state = self.write();
        state.created_at = Some(created_at);
        state.updated_at = Some(updated_at);
    }

    /// Replace the whole state with decoded data
    pub(crate) fn populate(
        &self,
        fields: BTreeMap<String, Value>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.write();
        state.fields = fields;
        state.created_at = created_at;
        state.updated_at = updated_at;
        state.data_available = true;
    }

    fn read(&self) -> RwLockReadGuard<'_, ObjectState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ObjectState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Object")
            .field("key", &self.key().to_string())
            .field("data_available", &state.data_available)
            .field("created_at", &state.created_at)
            .field("updated_at", &state.updated_at)
            .field("fields", &state.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = ObjectKey::new("Note", "n1");
        assert_eq!(key.to_string(), "Note/n1");

        let parsed = ObjectKey::parse("Note/n1").unwrap();
        assert_eq!(parsed, key);

        // ids may contain slashes, class names may not
        let nested = ObjectKey::parse("File/a/b.txt").unwrap();
        assert_eq!(nested.class_name, "File");
        assert_eq!(nested.object_id, "a/b.txt");
    }

    #[test]
    fn test_invalid_key() {
        assert!(ObjectKey::parse("Note").is_err());
        assert!(ObjectKey::parse("/n1").is_err());
        assert!(ObjectKey::parse("Note/").is_err());
    }

    #[test]
    fn test_fields() {
        let note = Object::with_fields("Note", "n1", [("title", "hi")]);
        note.set("views", 3);

        assert_eq!(note.get("title").unwrap().as_str(), Some("hi"));
        assert_eq!(note.get("views").unwrap().as_i64(), Some(3));
        assert_eq!(note.keys(), vec!["title".to_string(), "views".to_string()]);

        assert!(note.unset("views").is_some());
        assert!(note.get("views").is_none());
        assert!(note.is_data_available());
    }

    #[test]
    fn test_stub_has_no_data() {
        let stub = Object::stub(&ObjectKey::new("Note", "n2"));
        assert!(!stub.is_data_available());
        assert!(stub.created_at().is_none());
    }

    #[test]
    fn test_pointer_equality_by_key() {
        let a = Object::new("User", "u1");
        let b = Object::stub(&ObjectKey::new("User", "u1"));
        assert_eq!(Value::from(&a), Value::from(b));
        assert_ne!(Value::from(&a), Value::from(Object::new("User", "u2")));
    }

    #[test]
    fn test_debug_on_cycle_terminates() {
        let a = Object::new("Node", "a");
        let b = Object::new("Node", "b");
        a.set("next", &b);
        b.set("next", &a);

        let printed = format!("{:?}", a);
        assert!(printed.contains("Pointer(Node/b)"));
    }
}
