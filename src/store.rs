//! Store - save, remove and fetch object graphs
//!
//! A [`Store`] owns one configuration, one executor thread holding the
//! SQLite connection, and a handle to a subclass registry. Graph walks and
//! encoding run on the calling thread when an operation is called; the
//! resulting rows are handed to the executor, which runs operations in the
//! order they were called.

use crate::codec::Decoder;
use crate::config::StoreConfig;
use crate::graph;
use crate::object::{Object, ObjectKey, ObjectRef};
use crate::query::Query;
use crate::registry::SubclassRegistry;
use crate::row::Row;
use crate::storage::{DbStats, Executor, SqliteStore, Task};
use crate::{Error, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::{Arc, OnceLock};

static DEFAULT_STORE: OnceLock<Store> = OnceLock::new();

type Cascade = Box<dyn Fn(&Object) -> bool + Send>;

/// Handle to an object store. Clones share the same executor.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    executor: Executor,
    registry: Arc<SubclassRegistry>,
}

impl Store {
    /// Open a store using the process-wide registry
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_registry(config, SubclassRegistry::global())
    }

    /// Open a store against a specific registry
    pub fn open_with_registry(config: StoreConfig, registry: Arc<SubclassRegistry>) -> Result<Self> {
        let executor = Executor::start(&config)?;
        tracing::info!("Opened store on {}", executor.thread_name());

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                executor,
                registry,
            }),
        })
    }

    /// Open a private in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// The process-wide store opened with the default configuration
    pub fn default_store() -> Result<Self> {
        if let Some(store) = DEFAULT_STORE.get() {
            return Ok(store.clone());
        }
        let store = Self::open(StoreConfig::default())?;
        Ok(DEFAULT_STORE.get_or_init(|| store).clone())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SubclassRegistry> {
        &self.inner.registry
    }

    // ========== Save ==========

    /// Save an object and every object it references
    pub fn save(&self, object: &ObjectRef) -> Task<usize> {
        self.save_many(std::slice::from_ref(object))
    }

    /// Save several object graphs in one transaction.
    ///
    /// Resolves to the number of rows written.
    pub fn save_many(&self, objects: &[ObjectRef]) -> Task<usize> {
        let context = describe("save", objects);
        let staged = match self.stage(objects) {
            Ok(staged) => staged,
            Err(e) => return Task::failed(e.context(context)),
        };

        self.inner.executor.submit(move |store| {
            let rows: Vec<Row> = staged.iter().map(|(_, row)| row.clone()).collect();
            let created = store.upsert_rows(&rows).map_err(|e| e.context(&context))?;

            for ((object, row), created_at) in staged.iter().zip(created) {
                object.mark_saved(created_at, row.updated_at);
            }
            tracing::debug!("{}: wrote {} rows", context, rows.len());
            Ok(rows.len())
        })
    }

    /// Walk the graph from `roots` and encode every object to write
    fn stage(&self, roots: &[ObjectRef]) -> Result<Vec<(ObjectRef, Row)>> {
        if let Some(stub) = roots.iter().find(|o| !o.is_data_available()) {
            return Err(Error::DataUnavailable(stub.key().to_string()));
        }

        // Rows keep microseconds; compare and stamp at that precision
        let now = Utc::now().trunc_subsecs(6);
        let registry = &self.inner.registry;
        let mut staged = Vec::new();

        graph::closure(
            roots,
            |object| {
                // A stub would overwrite its stored row with nothing
                let loaded = object.is_data_available();
                if !loaded {
                    tracing::warn!("Skipping {}: data not loaded", object.key());
                }
                Ok(loaded)
            },
            |object| {
                let encoded = registry.resolve(object.class_name()).encode(object)?;
                let updated_at = next_updated_at(object, now);
                let created_at = object.created_at().unwrap_or(updated_at);
                let row = Row::new(
                    object.class_name(),
                    object.object_id(),
                    created_at,
                    updated_at,
                    encoded.payload,
                );
                staged.push((Arc::clone(object), row));
                Ok(encoded.references)
            },
        )?;

        Ok(staged)
    }

    // ========== Remove ==========

    /// Remove one object, without cascading
    pub fn remove(&self, object: &ObjectRef) -> Task<usize> {
        self.remove_many(std::slice::from_ref(object))
    }

    /// Remove several objects, without cascading.
    ///
    /// Resolves to the number of rows actually deleted.
    pub fn remove_many(&self, objects: &[ObjectRef]) -> Task<usize> {
        self.delete(objects, None)
    }

    /// Remove an object and the nested objects `cascade` accepts
    pub fn remove_cascade<F>(&self, object: &ObjectRef, cascade: F) -> Task<usize>
    where
        F: Fn(&Object) -> bool + Send + 'static,
    {
        self.remove_many_cascade(std::slice::from_ref(object), cascade)
    }

    /// Remove several objects and the nested objects `cascade` accepts.
    ///
    /// A nested object the predicate rejects is kept, and so is everything
    /// reachable only through it. Stubs reached by the walk are loaded from
    /// the store first, so the predicate sees their fields and the walk
    /// continues through their stored references.
    pub fn remove_many_cascade<F>(&self, objects: &[ObjectRef], cascade: F) -> Task<usize>
    where
        F: Fn(&Object) -> bool + Send + 'static,
    {
        self.delete(objects, Some(Box::new(cascade)))
    }

    fn delete(&self, roots: &[ObjectRef], cascade: Option<Cascade>) -> Task<usize> {
        let context = describe("remove", roots);
        let roots = roots.to_vec();
        let registry = Arc::clone(&self.inner.registry);

        self.inner.executor.submit(move |store| {
            let mut decoder = Decoder::new();
            let cascade = cascade.as_ref().map(|c| c.as_ref() as &dyn Fn(&Object) -> bool);
            let doomed = graph::removal_closure(&roots, cascade, |object| {
                load_stored(store, &registry, &mut decoder, object)
            })
            .map_err(|e| e.context(&context))?;

            let keys: Vec<ObjectKey> = doomed.iter().map(|o| o.key()).collect();
            let deleted = store.delete_rows(&keys).map_err(|e| e.context(&context))?;
            tracing::debug!("{}: deleted {} of {} rows", context, deleted, keys.len());
            Ok(deleted)
        })
    }

    // ========== Read ==========

    /// Fetch one object by key; `None` when it is not stored
    pub fn get(&self, class_name: &str, object_id: &str) -> Task<Option<ObjectRef>> {
        let key = ObjectKey::new(class_name, object_id);
        let registry = Arc::clone(&self.inner.registry);

        self.inner.executor.submit(move |store| {
            let context = format!("get {}", key);
            let Some(row) = store.get_row(&key).map_err(|e| e.context(&context))? else {
                return Ok(None);
            };
            let mut decoder = Decoder::new();
            let object = registry
                .resolve(&row.class_name)
                .decode(&row, &mut decoder)
                .map_err(|e| e.context(&context))?;
            Ok(Some(object))
        })
    }

    /// Load the stored data of `object` into it, typically to resolve a stub.
    ///
    /// Resolves to `false` when no row exists for the object.
    pub fn fetch(&self, object: &ObjectRef) -> Task<bool> {
        let object = Arc::clone(object);
        let registry = Arc::clone(&self.inner.registry);

        self.inner.executor.submit(move |store| {
            let key = object.key();
            let context = format!("fetch {}", key);
            let Some(row) = store.get_row(&key).map_err(|e| e.context(&context))? else {
                return Ok(false);
            };
            let mut decoder = Decoder::new();
            decoder.seed(object);
            registry
                .resolve(&row.class_name)
                .decode(&row, &mut decoder)
                .map_err(|e| e.context(&context))?;
            Ok(true)
        })
    }

    /// Start a query over one class
    pub fn query(&self, class_name: impl Into<String>) -> Query {
        Query::new(self.clone(), class_name)
    }

    /// Row counts of the whole store
    pub fn stats(&self) -> Task<DbStats> {
        self.inner.executor.submit(|store| store.stats())
    }

    /// Delete every stored object of a class
    pub fn clear_class(&self, class_name: &str) -> Task<usize> {
        let class_name = class_name.to_string();
        self.inner.executor.submit(move |store| {
            let deleted = store
                .delete_class(&class_name)
                .map_err(|e| e.context(format!("clear {}", class_name)))?;
            tracing::debug!("Cleared {} rows of {}", deleted, class_name);
            Ok(deleted)
        })
    }

    pub(crate) fn submit<T, F>(&self, job: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStore) -> Result<T> + Send + 'static,
    {
        self.inner.executor.submit(job)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("executor", &self.inner.executor.thread_name())
            .finish()
    }
}

/// Populate `object` from its stored row, if there is one
fn load_stored(
    store: &SqliteStore,
    registry: &SubclassRegistry,
    decoder: &mut Decoder,
    object: &ObjectRef,
) -> Result<()> {
    let key = object.key();
    let Some(row) = store.get_row(&key)? else {
        tracing::debug!("{} has no stored row to cascade through", key);
        return Ok(());
    };
    decoder.seed(Arc::clone(object));
    registry.resolve(&row.class_name).decode(&row, decoder)?;
    Ok(())
}

/// `updated_at` for the next save; never at or before the previous one
fn next_updated_at(object: &Object, now: DateTime<Utc>) -> DateTime<Utc> {
    match object.updated_at() {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}

fn describe(operation: &str, objects: &[ObjectRef]) -> String {
    match objects {
        [] => format!("{} (no objects)", operation),
        [one] => format!("{} {}", operation, one.key()),
        [first, rest @ ..] => format!("{} {} (+{} more)", operation, first.key(), rest.len()),
    }
}
