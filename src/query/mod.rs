//! Query builder
//!
//! A [`Query`] targets one class and accumulates a [`Filter`], an ordering
//! and a limit. Execution runs on the store's executor; matching rows are
//! decoded with the row type the registry resolves for their class.

pub mod filter;

pub use filter::{Comparison, Condition, Filter, Literal, TextMatch};

use crate::codec::Decoder;
use crate::object::ObjectRef;
use crate::storage::{Scan, SqlFragment, Task};
use crate::store::Store;
use std::sync::Arc;

/// How a new condition combines with the existing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    /// Discard the existing filter
    Replace,
    And,
    Or,
    /// `existing AND NOT condition`
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// A query over the stored objects of one class
#[derive(Debug, Clone)]
pub struct Query {
    store: Store,
    class_name: String,
    filter: Option<Filter>,
    order: Vec<(String, Order)>,
    limit: Option<usize>,
    /// Set by `find_first`; the limit stays at most 1 afterwards
    pinned: bool,
}

impl Query {
    pub(crate) fn new(store: Store, class_name: impl Into<String>) -> Self {
        Self {
            store,
            class_name: class_name.into(),
            filter: None,
            order: Vec::new(),
            limit: None,
            pinned: false,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn current_filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn current_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Start over with `condition` as the whole filter
    pub fn filter(&mut self, condition: impl Into<Filter>) -> &mut Self {
        self.add_condition(condition, Connective::Replace)
    }

    pub fn and(&mut self, condition: impl Into<Filter>) -> &mut Self {
        self.add_condition(condition, Connective::And)
    }

    pub fn or(&mut self, condition: impl Into<Filter>) -> &mut Self {
        self.add_condition(condition, Connective::Or)
    }

    pub fn not(&mut self, condition: impl Into<Filter>) -> &mut Self {
        self.add_condition(condition, Connective::Not)
    }

    /// Combine `condition` with the existing filter.
    ///
    /// With no existing filter every connective starts a new one.
    pub fn add_condition(&mut self, condition: impl Into<Filter>, connective: Connective) -> &mut Self {
        let condition = condition.into();
        self.filter = Some(match (self.filter.take(), connective) {
            (_, Connective::Replace) | (None, Connective::And | Connective::Or) => condition,
            (None, Connective::Not) => !condition,
            (Some(existing), Connective::And) => existing.and(condition),
            (Some(existing), Connective::Or) => existing.or(condition),
            (Some(existing), Connective::Not) => existing.and(!condition),
        });
        self
    }

    /// Sort by a field; later calls break ties of earlier ones
    pub fn order_by(&mut self, field: impl Into<String>, order: Order) -> &mut Self {
        self.order.push((field.into(), order));
        self
    }

    /// Cap the number of results.
    ///
    /// After `find_first` the limit cannot grow past 1.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        if self.pinned && limit > 1 {
            tracing::warn!(
                "Query on {}: limit {} ignored, find_first pinned it to 1",
                self.class_name,
                limit
            );
            return self;
        }
        self.limit = Some(limit);
        self
    }

    /// All matching objects
    pub fn find_all(&self) -> Task<Vec<ObjectRef>> {
        self.execute(|objects| objects)
    }

    /// The first matching object, `None` when nothing matches.
    ///
    /// Sets this query's limit to 1, which also applies to later calls.
    pub fn find_first(&mut self) -> Task<Option<ObjectRef>> {
        self.pinned = true;
        self.limit = Some(1);
        self.execute(|objects| objects.into_iter().next())
    }

    /// Number of matching rows, ignoring the limit
    pub fn count(&self) -> Task<usize> {
        let scan = self.scan();
        let context = format!("count {}", self.class_name);
        self.store
            .submit(move |store| store.count_matching(&scan).map_err(|e| e.context(context)))
    }

    fn execute<T, F>(&self, finish: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(Vec<ObjectRef>) -> T + Send + 'static,
    {
        let scan = self.scan();
        let registry = Arc::clone(self.store.registry());
        let context = format!("query {}", self.class_name);

        self.store.submit(move |store| {
            let rows = store.scan_rows(&scan).map_err(|e| e.context(&context))?;

            let mut decoder = Decoder::new();
            let mut objects = Vec::with_capacity(rows.len());
            for row in &rows {
                let object = registry
                    .resolve(&row.class_name)
                    .decode(row, &mut decoder)
                    .map_err(|e| e.context(&context))?;
                objects.push(object);
            }

            tracing::debug!("{}: {} rows", context, objects.len());
            Ok(finish(objects))
        })
    }

    fn scan(&self) -> Scan {
        let mut scan = Scan::new(&self.class_name);
        scan.filter = self.filter.as_ref().map(Filter::to_sql);
        scan.order = self.order_sql();
        scan.limit = self.limit;
        scan
    }

    fn order_sql(&self) -> Option<SqlFragment> {
        if self.order.is_empty() {
            return None;
        }

        let mut sql = SqlFragment::default();
        for (i, (field, order)) in self.order.iter().enumerate() {
            if i > 0 {
                sql.push_sql(", ");
            }
            sql.append(&filter::field_expr(field, false)).push_sql(match order {
                Order::Ascending => " ASC",
                Order::Descending => " DESC",
            });
        }
        Some(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::object::Object;
    use crate::registry::{SchemaRow, SubclassRegistry};
    use crate::Error;
    use rusqlite::types::Value as SqlValue;

    fn store() -> Store {
        Store::open_with_registry(StoreConfig::in_memory(), Arc::new(SubclassRegistry::new())).unwrap()
    }

    async fn seeded() -> Store {
        let store = store();
        let mut notes = Vec::new();
        for (id, title, rank) in [("n1", "Hello world", 3), ("n2", "hello again", 1), ("n3", "Goodbye", 2)] {
            let note = Object::with_fields("Note", id, [("title", title)]);
            note.set("rank", rank);
            notes.push(note);
        }
        store.save_many(&notes).await.unwrap();
        store
    }

    async fn ids(query: &Query) -> Vec<String> {
        query
            .find_all()
            .await
            .unwrap()
            .iter()
            .map(|o| o.object_id().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_find_first_pins_limit() {
        let store = seeded().await;
        let mut query = store.query("Note");

        assert_eq!(ids(&query).await.len(), 3);
        assert!(query.find_first().await.unwrap().is_some());
        assert_eq!(query.current_limit(), Some(1));
        assert_eq!(ids(&query).await.len(), 1);

        query.limit(10);
        assert_eq!(query.current_limit(), Some(1));
        assert_eq!(query.find_all().await.unwrap().len(), 1);

        query.limit(0);
        assert!(query.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_class_uses_generic_row() {
        let store = seeded().await;
        assert!(!store.registry().is_registered("Note"));

        let found = store.query("Note").find_all().await.unwrap();
        assert_eq!(found[0].get("title").unwrap().as_str(), Some("Hello world"));
    }

    #[tokio::test]
    async fn test_string_matching() {
        let store = seeded().await;
        let mut query = store.query("Note");

        query.filter(Condition::begins_with("title", "Hello"));
        assert_eq!(ids(&query).await, vec!["n1"]);

        query.filter(Condition::begins_with("title", "hello").case_insensitive());
        assert_eq!(ids(&query).await, vec!["n1", "n2"]);

        query.filter(Condition::contains("title", "bye"));
        assert_eq!(ids(&query).await, vec!["n3"]);

        query.filter(Condition::ends_with("title", "WORLD").case_insensitive());
        assert_eq!(ids(&query).await, vec!["n1"]);

        query.filter(Condition::ends_with("title", "a very long suffix"));
        assert!(ids(&query).await.is_empty());
    }

    #[tokio::test]
    async fn test_comparisons_and_connectives() {
        let store = seeded().await;
        let mut query = store.query("Note");

        query.filter(Condition::ge("rank", 2));
        assert_eq!(ids(&query).await, vec!["n1", "n3"]);

        query.and(Condition::lt("rank", 3));
        assert_eq!(ids(&query).await, vec!["n3"]);

        query.or(Condition::eq("objectId", "n2"));
        assert_eq!(ids(&query).await, vec!["n2", "n3"]);

        query.not(Condition::is_in("objectId", ["n3"]));
        assert_eq!(ids(&query).await, vec!["n2"]);

        query.filter(Condition::between("rank", 1, 2));
        assert_eq!(query.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_connective_without_filter_starts_one() {
        let store = seeded().await;

        let mut query = store.query("Note");
        query.not(Condition::eq("objectId", "n1"));
        assert_eq!(ids(&query).await, vec!["n2", "n3"]);

        let mut query = store.query("Note");
        query.or(Condition::eq("objectId", "n1"));
        assert_eq!(ids(&query).await, vec!["n1"]);
    }

    #[tokio::test]
    async fn test_order_and_limit() {
        let store = seeded().await;
        let mut query = store.query("Note");
        query.order_by("rank", Order::Descending);
        assert_eq!(ids(&query).await, vec!["n1", "n3", "n2"]);

        query.limit(2);
        assert_eq!(ids(&query).await, vec!["n1", "n3"]);
        assert_eq!(query.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_points_to() {
        let store = store();
        let ada = Object::with_fields("User", "ada", [("name", "Ada")]);
        let bob = Object::with_fields("User", "bob", [("name", "Bob")]);
        let first = Object::new("Note", "n1");
        let second = Object::new("Note", "n2");
        first.set("author", &ada);
        second.set("author", &bob);
        store.save_many(&[first, second]).await.unwrap();

        let found = store
            .query("Note")
            .filter(Condition::points_to("author", &bob))
            .find_all()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id(), "n2");

        // Pointer targets decode as stubs
        let author = found[0].get("author").unwrap().as_pointer().cloned().unwrap();
        assert!(!author.is_data_available());
    }

    #[tokio::test]
    async fn test_field_names_with_quotes() {
        let store = store();
        let ada = Object::new("User", "ada");
        let first = Object::with_fields("Note", "n1", [("say \"hi\"", "yes")]);
        let second = Object::with_fields("Note", "n2", [("say \"hi\"", "no")]);
        second.set("by \"whom\"", &ada);
        store.save_many(&[first, second]).await.unwrap();

        let found = store
            .query("Note")
            .filter(Condition::eq("say \"hi\"", "yes"))
            .find_all()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id(), "n1");

        let found = store
            .query("Note")
            .filter(Condition::points_to("by \"whom\"", &ada))
            .find_all()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id(), "n2");
    }

    #[tokio::test]
    async fn test_null_checks() {
        let store = seeded().await;
        let extra = Object::new("Note", "n4");
        store.save(&extra).await.unwrap();

        let mut query = store.query("Note");
        query.filter(Condition::is_null("title"));
        assert_eq!(ids(&query).await, vec!["n4"]);

        query.filter(Condition::not_null("title"));
        assert_eq!(ids(&query).await.len(), 3);

        query.filter(Condition::ne("title", "Goodbye"));
        assert_eq!(ids(&query).await, vec!["n1", "n2", "n4"]);
    }

    #[tokio::test]
    async fn test_raw_condition() {
        let store = seeded().await;
        let mut query = store.query("Note");
        query.filter(Condition::raw(
            "json_extract(payload, '$.rank') * 10 = ?",
            vec![SqlValue::Integer(20)],
        ));
        assert_eq!(ids(&query).await, vec!["n3"]);
    }

    #[tokio::test]
    async fn test_malformed_raw_condition_fails() {
        let store = seeded().await;
        let err = store
            .query("Note")
            .filter(Condition::raw("title ==== 'x'", Vec::new()))
            .find_all()
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), Error::Storage(_)));
        assert!(err.to_string().starts_with("query Note: "));
    }

    #[tokio::test]
    async fn test_mismatched_row_type_fails_on_decode() {
        let store = seeded().await;
        store
            .registry()
            .register_subclass(Arc::new(SchemaRow::new("Note").require("body")))
            .unwrap();

        let err = store.query("Note").find_all().await.unwrap_err();
        assert!(matches!(err.root_cause(), Error::Decode { .. }));
    }

    #[tokio::test]
    async fn test_date_comparison() {
        let store = store();
        let early = chrono::Utc::now() - chrono::Duration::days(2);
        let late = chrono::Utc::now() + chrono::Duration::days(2);
        let a = Object::with_fields("Task", "a", [("due", early)]);
        let b = Object::with_fields("Task", "b", [("due", late)]);
        store.save_many(&[a, b]).await.unwrap();

        let found = store
            .query("Task")
            .filter(Condition::gt("due", chrono::Utc::now()))
            .find_all()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id(), "b");
    }
}
