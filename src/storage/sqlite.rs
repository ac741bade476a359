//! SQLite storage implementation

use std::path::Path;
use std::time::Duration;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use crate::{Error, Result};
use crate::codec::{format_date, parse_date};
use crate::config::StoreConfig;
use crate::object::ObjectKey;
use crate::row::Row;
use super::schema;

const UPSERT_ROW: &str = r#"
    INSERT INTO objects (class_name, object_id, created_at, updated_at, payload)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (class_name, object_id)
    DO UPDATE SET updated_at = excluded.updated_at, payload = excluded.payload
    RETURNING created_at
"#;

/// A SQL expression with its positional (`?`) parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Append literal SQL text
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append another fragment with its parameters
    pub fn append(&mut self, other: &SqlFragment) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params.iter().cloned());
        self
    }

    /// Append a `?` placeholder bound to `value`
    pub fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }
}

/// A row scan over one class
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub class_name: String,
    /// Boolean expression rows must satisfy
    pub filter: Option<SqlFragment>,
    /// Sort expression; ties and the default use insertion order
    pub order: Option<SqlFragment>,
    pub limit: Option<usize>,
}

impl Scan {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from("class_name = ?");
        let mut params = vec![SqlValue::Text(self.class_name.clone())];

        if let Some(filter) = &self.filter {
            sql.push_str(" AND (");
            sql.push_str(&filter.sql);
            sql.push(')');
            params.extend(filter.params.iter().cloned());
        }

        (sql, params)
    }
}

/// SQLite-backed storage for object rows
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema(false)?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema(false)?;
        Ok(store)
    }

    /// Open the database described by a store configuration
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        let Some(path) = config.database_path() else {
            return Self::open_in_memory();
        };

        if !config.read_only {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = if config.read_only {
            Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            Connection::open(&path)?
        };

        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))?;
        }
        if config.wal && !config.read_only {
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!("Journal mode for {}: {}", path.display(), mode);
        }

        let store = Self { conn };
        store.initialize_schema(config.read_only)?;
        Ok(store)
    }

    /// Initialize the database schema, refusing databases from a newer version
    fn initialize_schema(&self, read_only: bool) -> Result<()> {
        let version: i64 = self.conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > schema::SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                found: version,
                supported: schema::SCHEMA_VERSION,
            });
        }

        if read_only {
            return Ok(());
        }

        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        if version < schema::SCHEMA_VERSION {
            self.conn.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
        }
        Ok(())
    }

    // ========== Write Operations ==========

    /// Insert or overwrite rows in one transaction.
    ///
    /// An existing row keeps its `created_at`. Returns the stored
    /// `created_at` of every row, in input order.
    pub fn upsert_rows(&mut self, rows: &[Row]) -> Result<Vec<DateTime<Utc>>> {
        let tx = self.conn.transaction()?;
        let mut created = Vec::with_capacity(rows.len());

        {
            let mut stmt = tx.prepare_cached(UPSERT_ROW)?;
            for row in rows {
                let stored: String = stmt.query_row(
                    params![
                        row.class_name,
                        row.object_id,
                        format_date(&row.created_at),
                        format_date(&row.updated_at),
                        row.payload,
                    ],
                    |r| r.get(0),
                )?;
                created.push(parse_date(&stored)?);
            }
        }

        tx.commit()?;
        Ok(created)
    }

    /// Delete rows in one transaction; absent rows are skipped.
    ///
    /// Returns the number of rows actually deleted.
    pub fn delete_rows(&mut self, keys: &[ObjectKey]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;

        {
            let mut stmt = tx.prepare_cached("DELETE FROM objects WHERE class_name = ?1 AND object_id = ?2")?;
            for key in keys {
                deleted += stmt.execute(params![key.class_name, key.object_id])?;
            }
        }

        tx.commit()?;
        Ok(deleted)
    }

    /// Delete every row of a class
    pub fn delete_class(&mut self, class_name: &str) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM objects WHERE class_name = ?1", [class_name])?;
        Ok(deleted)
    }

    // ========== Read Operations ==========

    /// Get a row by key
    pub fn get_row(&self, key: &ObjectKey) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT {} FROM objects WHERE class_name = ?1 AND object_id = ?2",
            schema::ROW_COLUMNS
        );
        self.conn
            .query_row(&sql, params![key.class_name, key.object_id], Self::row_to_row)
            .optional()
            .map_err(Into::into)
    }

    /// Run a scan and return the matching rows
    pub fn scan_rows(&self, scan: &Scan) -> Result<Vec<Row>> {
        let (where_sql, mut params) = scan.where_clause();
        let mut sql = format!("SELECT {} FROM objects WHERE {}", schema::ROW_COLUMNS, where_sql);

        match &scan.order {
            Some(order) => {
                sql.push_str(" ORDER BY ");
                sql.push_str(&order.sql);
                sql.push_str(", rowid");
                params.extend(order.params.iter().cloned());
            }
            None => sql.push_str(" ORDER BY rowid"),
        }

        if let Some(limit) = scan.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        tracing::trace!("scan: {}", sql);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), Self::row_to_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Count the rows a scan would match, ignoring its order and limit
    pub fn count_matching(&self, scan: &Scan) -> Result<usize> {
        let (where_sql, params) = scan.where_clause();
        let sql = format!("SELECT COUNT(*) FROM objects WHERE {}", where_sql);
        let count: i64 = self.conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count all rows
    pub fn count_rows(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let mut stmt = self.conn.prepare(
            "SELECT class_name, COUNT(*) FROM objects GROUP BY class_name ORDER BY class_name",
        )?;
        let classes = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DbStats {
            rows: self.count_rows()?,
            classes,
        })
    }

    /// Helper to convert a SQLite row to a Row
    fn row_to_row(row: &rusqlite::Row) -> rusqlite::Result<Row> {
        let created_str: String = row.get(2)?;
        let updated_str: String = row.get(3)?;

        let created_at = parse_date(&created_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let updated_at = parse_date(&updated_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Row {
            class_name: row.get(0)?,
            object_id: row.get(1)?,
            created_at,
            updated_at,
            payload: row.get(4)?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub rows: usize,
    /// Row count per class name, sorted by class name
    pub classes: Vec<(String, usize)>,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Rows: {}", self.rows)?;
        for (class_name, count) in &self.classes {
            writeln!(f, "  {}: {}", class_name, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_row(class_name: &str, id: &str, payload: &str) -> Row {
        let now = Utc::now();
        Row::new(class_name, id, now, now, payload)
    }

    #[test]
    fn test_row_crud() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let row = sample_row("Note", "n1", r#"{"title":"hi"}"#);
        store.upsert_rows(&[row.clone()]).unwrap();

        let retrieved = store.get_row(&row.key()).unwrap().unwrap();
        assert_eq!(retrieved.payload, r#"{"title":"hi"}"#);
        assert_eq!(format_date(&retrieved.created_at), format_date(&row.created_at));

        assert!(store.get_row(&ObjectKey::new("Note", "missing")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = sample_row("Note", "n1", r#"{"v":1}"#);
        store.upsert_rows(&[first.clone()]).unwrap();

        let later = first.updated_at + ChronoDuration::seconds(5);
        let second = Row::new("Note", "n1", later, later, r#"{"v":2}"#);
        let created = store.upsert_rows(&[second]).unwrap();

        assert_eq!(format_date(&created[0]), format_date(&first.created_at));
        let stored = store.get_row(&first.key()).unwrap().unwrap();
        assert_eq!(stored.payload, r#"{"v":2}"#);
        assert_eq!(format_date(&stored.updated_at), format_date(&later));
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert_rows(&[sample_row("Tag", "t1", "{}")]).unwrap();

        let key = ObjectKey::new("Tag", "t1");
        assert_eq!(store.delete_rows(&[key.clone()]).unwrap(), 1);
        assert_eq!(store.delete_rows(&[key]).unwrap(), 0);
    }

    #[test]
    fn test_scan_with_filter_and_limit() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_rows(&[
                sample_row("Note", "n1", r#"{"rank":1}"#),
                sample_row("Note", "n2", r#"{"rank":2}"#),
                sample_row("Note", "n3", r#"{"rank":3}"#),
                sample_row("Tag", "t1", r#"{"rank":9}"#),
            ])
            .unwrap();

        let mut scan = Scan::new("Note");
        scan.filter = Some(SqlFragment::new(
            "json_extract(payload, ?) >= ?",
            vec![SqlValue::Text("$.rank".into()), SqlValue::Integer(2)],
        ));
        let rows = store.scan_rows(&scan).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.object_id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n3"]);
        assert_eq!(store.count_matching(&scan).unwrap(), 2);

        scan.order = Some(SqlFragment::new(
            "json_extract(payload, ?) DESC",
            vec![SqlValue::Text("$.rank".into())],
        ));
        scan.limit = Some(1);
        let rows = store.scan_rows(&scan).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].object_id, "n3");
    }

    #[test]
    fn test_malformed_filter_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut scan = Scan::new("Note");
        scan.filter = Some(SqlFragment::new("title ==== 'x'", Vec::new()));
        assert!(matches!(store.scan_rows(&scan), Err(Error::Storage(_))));
    }

    #[test]
    fn test_stats() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_rows(&[
                sample_row("Note", "n1", "{}"),
                sample_row("Tag", "t1", "{}"),
                sample_row("Tag", "t2", "{}"),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.classes, vec![("Note".to_string(), 1), ("Tag".to_string(), 2)]);

        assert_eq!(store.delete_class("Tag").unwrap(), 2);
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        match SqliteStore::open(&path) {
            Err(Error::SchemaMismatch { found, supported }) => {
                assert_eq!(found, 99);
                assert_eq!(supported, schema::SCHEMA_VERSION);
            }
            other => panic!("expected schema mismatch, got {:?}", other.err()),
        }
    }
}
