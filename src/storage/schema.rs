//! Database schema definitions

/// Version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// SQL to create the objects table
pub const CREATE_OBJECTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    class_name TEXT NOT NULL,
    object_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (class_name, object_id)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_objects_class_updated ON objects(class_name, updated_at)",
];

/// Columns selected for a full row, in [`crate::row::Row`] field order
pub const ROW_COLUMNS: &str = "class_name, object_id, created_at, updated_at, payload";

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_OBJECTS_TABLE];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
