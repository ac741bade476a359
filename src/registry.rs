//! Subclass registry - maps class names to row types
//!
//! A row type decides how objects of one class are encoded into rows and
//! decoded back. Classes without a registered row type use [`GenericRow`].
//!
//! The process-wide registry is available through [`SubclassRegistry::global`];
//! stores may also be opened against a private registry.

use crate::codec::{self, Decoder, Encoded};
use crate::object::{Object, ObjectRef};
use crate::row::Row;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

static GLOBAL: OnceLock<Arc<SubclassRegistry>> = OnceLock::new();

/// Trait for row types
///
/// Each row type is responsible for:
/// 1. Declaring the class it represents
/// 2. Encoding objects of that class into a payload
/// 3. Decoding rows of that class back into objects
pub trait RowType: Send + Sync {
    /// The class this row type represents, `None` for a catch-all
    fn class_name(&self) -> Option<&str>;

    /// Encode an object into a payload and its references
    fn encode(&self, object: &Object) -> Result<Encoded> {
        codec::encode(object)
    }

    /// Decode a row into an object
    fn decode(&self, row: &Row, decoder: &mut Decoder) -> Result<ObjectRef> {
        decoder.decode_row(row)
    }
}

/// The default row type: stores every field as-is
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericRow;

impl RowType for GenericRow {
    fn class_name(&self) -> Option<&str> {
        None
    }
}

/// A row type for one class that requires a set of fields.
///
/// Saving an object or decoding a row that lacks a required field fails
/// instead of silently producing an object of the wrong shape.
#[derive(Debug, Clone)]
pub struct SchemaRow {
    class_name: String,
    required: Vec<String>,
}

impl SchemaRow {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            required: Vec::new(),
        }
    }

    /// Require a field to be present
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    fn check(&self, object: &Object) -> Result<()> {
        if object.class_name() != self.class_name {
            return Err(Error::decode(
                object.key(),
                format!("row type for `{}` cannot handle this class", self.class_name),
            ));
        }

        match self.required.iter().find(|field| object.get(field).is_none()) {
            Some(missing) => Err(Error::decode(
                object.key(),
                format!("missing required field `{}`", missing),
            )),
            None => Ok(()),
        }
    }
}

impl RowType for SchemaRow {
    fn class_name(&self) -> Option<&str> {
        Some(&self.class_name)
    }

    fn encode(&self, object: &Object) -> Result<Encoded> {
        self.check(object)?;
        codec::encode(object)
    }

    fn decode(&self, row: &Row, decoder: &mut Decoder) -> Result<ObjectRef> {
        let object = decoder.decode_row(row)?;
        self.check(&object)?;
        Ok(object)
    }
}

/// Registry of row types, keyed by class name
pub struct SubclassRegistry {
    entries: Mutex<HashMap<String, Arc<dyn RowType>>>,
    fallback: Arc<dyn RowType>,
}

impl Default for SubclassRegistry {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fallback: Arc::new(GenericRow),
        }
    }
}

impl SubclassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<SubclassRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SubclassRegistry::new())))
    }

    /// Register a row type for a class name.
    ///
    /// The last registration for a class wins. A row type that declares a
    /// class name must be registered under that name.
    pub fn register(&self, class_name: &str, row_type: Arc<dyn RowType>) -> Result<()> {
        if let Some(declared) = row_type.class_name() {
            if declared != class_name {
                tracing::warn!("Rejected row type for `{}` registered as `{}`", declared, class_name);
                return Err(Error::ClassMismatch {
                    requested: class_name.to_string(),
                    declared: declared.to_string(),
                });
            }
        }

        tracing::debug!("Registered row type for `{}`", class_name);
        self.lock().insert(class_name.to_string(), row_type);
        Ok(())
    }

    /// Register a row type under the class name it declares
    pub fn register_subclass(&self, row_type: Arc<dyn RowType>) -> Result<()> {
        let class_name = row_type
            .class_name()
            .map(str::to_string)
            .ok_or(Error::UndeclaredClass)?;
        self.register(&class_name, row_type)
    }

    /// Unregister a row type.
    ///
    /// Only removes the entry if `row_type` is the one currently registered,
    /// so a late unregister cannot remove a newer registration.
    pub fn unregister(&self, class_name: &str, row_type: &Arc<dyn RowType>) -> bool {
        let mut entries = self.lock();
        let is_current = entries
            .get(class_name)
            .is_some_and(|current| same_row_type(current, row_type));

        if is_current {
            entries.remove(class_name);
            tracing::debug!("Unregistered row type for `{}`", class_name);
        }
        is_current
    }

    /// Get the row type for a class, or the generic row type
    pub fn resolve(&self, class_name: &str) -> Arc<dyn RowType> {
        self.lock()
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Check if a class has its own row type
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.lock().contains_key(class_name)
    }

    /// All class names with a registered row type, sorted
    pub fn registered_class_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn RowType>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubclassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubclassRegistry")
            .field("registered", &self.registered_class_names())
            .finish()
    }
}

// Compare data pointers only; vtable pointers are not guaranteed unique.
fn same_row_type(a: &Arc<dyn RowType>, b: &Arc<dyn RowType>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct NoteRow;

    impl RowType for NoteRow {
        fn class_name(&self) -> Option<&str> {
            Some("Note")
        }
    }

    #[test]
    fn test_resolve_falls_back_to_generic() {
        let registry = SubclassRegistry::new();
        assert!(registry.resolve("Unknown").class_name().is_none());
        assert!(!registry.is_registered("Unknown"));
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = SubclassRegistry::new();
        registry.register_subclass(Arc::new(NoteRow)).unwrap();

        assert_eq!(registry.resolve("Note").class_name(), Some("Note"));
        assert_eq!(registry.registered_class_names(), vec!["Note".to_string()]);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = SubclassRegistry::new();
        let first: Arc<dyn RowType> = Arc::new(NoteRow);
        let second: Arc<dyn RowType> = Arc::new(SchemaRow::new("Note").require("title"));

        registry.register("Note", Arc::clone(&first)).unwrap();
        registry.register("Note", Arc::clone(&second)).unwrap();

        assert!(same_row_type(&registry.resolve("Note"), &second));
    }

    #[test]
    fn test_unregister_only_current() {
        let registry = SubclassRegistry::new();
        let old: Arc<dyn RowType> = Arc::new(NoteRow);
        let new: Arc<dyn RowType> = Arc::new(NoteRow);

        registry.register("Note", Arc::clone(&old)).unwrap();
        registry.register("Note", Arc::clone(&new)).unwrap();

        // A stale unregister leaves the newer registration alone
        assert!(!registry.unregister("Note", &old));
        assert!(registry.is_registered("Note"));

        assert!(registry.unregister("Note", &new));
        assert!(!registry.is_registered("Note"));
    }

    #[test]
    fn test_register_rejects_mismatched_class() {
        let registry = SubclassRegistry::new();
        let err = registry.register("Tag", Arc::new(NoteRow)).unwrap_err();
        assert!(matches!(err, Error::ClassMismatch { .. }));
        assert!(!registry.is_registered("Tag"));

        // The catch-all may be registered under any name
        registry.register("Tag", Arc::new(GenericRow)).unwrap();
        assert!(registry.is_registered("Tag"));

        assert!(matches!(
            registry.register_subclass(Arc::new(GenericRow)),
            Err(Error::UndeclaredClass)
        ));
    }

    #[test]
    fn test_schema_row_requires_fields() {
        let row_type = SchemaRow::new("Note").require("title");

        let valid = Object::with_fields("Note", "n1", [("title", "hi")]);
        assert!(row_type.encode(&valid).is_ok());

        let invalid = Object::new("Note", "n2");
        assert!(matches!(row_type.encode(&invalid), Err(Error::Decode { .. })));

        let now = Utc::now();
        let row = Row::new("Note", "n3", now, now, r#"{"body":"no title"}"#);
        let mut decoder = Decoder::new();
        assert!(row_type.decode(&row, &mut decoder).is_err());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(SubclassRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let class_name = format!("Class{}", i % 4);
                    let row_type: Arc<dyn RowType> = Arc::new(SchemaRow::new(class_name.clone()));
                    registry.register(&class_name, row_type).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.registered_class_names().len(), 4);
    }
}
