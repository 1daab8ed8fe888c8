use crate::table::CacheTable;
use crate::types::Result;
use parking_lot::RwLock;
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};
use tokio::runtime::Handle;
use tracing::debug;

/// Named [`CacheTable`]s sharing the same key, value and loader argument types.
///
/// There is no global registry: create a `Cache` once and pass it to whoever needs tables from it. Tables are created
/// on first request and live as long as the registry or any other holder of their `Arc`.
pub struct Cache<K, V, A = ()>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    runtime: Option<Handle>,
    tables:  RwLock<HashMap<String, Arc<CacheTable<K, V, A>>>>,
}

impl<K, V, A> Cache<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    pub fn new() -> Self {
        Self {
            runtime: None,
            tables:  RwLock::new(HashMap::new()),
        }
    }

    /// Registry whose tables run their expiration timers on `runtime`.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            tables:  RwLock::new(HashMap::new()),
        }
    }

    /// Get the table named `name`, creating an empty one if there is none yet.
    pub fn table(&self, name: &str) -> Result<Arc<CacheTable<K, V, A>>> {
        if let Some(table) = self.tables.read().get(name) {
            return Ok(Arc::clone(table));
        }

        let mut tables = self.tables.write();
        // Somebody else could have created it while we were waiting for the write lock.
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let table = CacheTable::build_named(name.to_string(), self.runtime.clone())?;
        debug!("Created cache table '{name}'");
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl<K, V, A> Default for Cache<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A> Debug for Cache<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("tables", &self.table_names())
            .finish()
    }
}
