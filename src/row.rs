//! Row representation - the on-disk shape of one persisted object

use crate::object::ObjectKey;
use chrono::{DateTime, Utc};

/// One persisted object.
///
/// `(class_name, object_id)` is the primary key. A save overwrites the row
/// in place; there is no version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub class_name: String,
    pub object_id: String,
    /// Set on the first save, preserved afterwards
    pub created_at: DateTime<Utc>,
    /// Advances on every save
    pub updated_at: DateTime<Utc>,
    /// Encoded fields, see [`crate::codec`]
    pub payload: String,
}

impl Row {
    pub fn new(
        class_name: impl Into<String>,
        object_id: impl Into<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
            created_at,
            updated_at,
            payload: payload.into(),
        }
    }

    /// Get the primary key of this row
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.class_name, &self.object_id)
    }
}
