use crate::item::CacheItem;
use crate::listeners::Listeners;
use crate::timer::ExpirationTimer;
use crate::traits::DataLoader;
use crate::types::{CacheError, ItemCallback, Result};
use fieldx_plus::fx_plus;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tokio::runtime::Handle;
use tracing::{debug, error, instrument, trace, warn};

// Everything a table mutates lives under the single table lock.
pub(crate) struct TableState<K, V, A> {
    items:                HashMap<K, Arc<CacheItem<K, V>>>,
    timer:                ExpirationTimer,
    loader:               Option<Arc<dyn DataLoader<K, V, A>>>,
    added_item:           Listeners<ItemCallback<K, V>>,
    about_to_delete_item: Listeners<ItemCallback<K, V>>,
}

impl<K, V, A> Default for TableState<K, V, A> {
    fn default() -> Self {
        Self {
            items:                HashMap::new(),
            timer:                ExpirationTimer::default(),
            loader:               None,
            added_item:           Listeners::new(),
            about_to_delete_item: Listeners::new(),
        }
    }
}

type StateGuard<'a, K, V, A> = RwLockWriteGuard<'a, TableState<K, V, A>>;

// Keeps an item marked as being deleted. Released on every exit from the delete protocol, unwinding included.
struct DeletionMark<K, V>(Arc<CacheItem<K, V>>);

impl<K, V> Drop for DeletionMark<K, V> {
    fn drop(&mut self) {
        self.0.end_delete();
    }
}

/// A named collection of expiring items.
///
/// Every item lives for its lifespan since the last time it was obtained with [`value()`](Self::value). A single
/// timer per table wakes up exactly when the soonest item is due, removes everything that has expired and re-arms
/// itself for the next deadline.
///
/// User code, i.e. the data loader and all callbacks, is never called while the table lock is held. Any of them may
/// use the table they were called from.
///
/// ```ignore
/// let table = CacheTable::<&str, String, ()>::new("sessions")?;
/// table.add_about_to_delete_item_callback(|item| println!("dropping {}", item.key()));
/// table.add("alice", Duration::from_secs(30), "token".to_string());
///
/// let item = table.value(&"alice")?;
/// assert_eq!(item.data(), "token");
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        error(CacheError),
        doc("Builder object of [`CacheTable`].", "", "See [`CacheTable::builder()`] method."),
        method_doc("Implement builder pattern for [`CacheTable`]."),
    )
)]
pub struct CacheTable<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    /// Table name. Identifies the table in a [`Cache`](crate::Cache) and in log records.
    #[fieldx(get, builder(required, into))]
    name: String,

    /// Runtime to spawn the expiration timer on. When not set, the current tokio context is used if there is one, or
    /// a background runtime owned by this crate otherwise.
    #[fieldx(builder(into), default(None))]
    runtime: Option<Handle>,

    #[fieldx(builder(off), default(RwLock::new(TableState::default())))]
    state: RwLock<TableState<K, V, A>>,
}

impl<K, V, A> CacheTable<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>> {
        Self::build_named(name.into(), None)
    }

    pub(crate) fn build_named(name: String, runtime: Option<Handle>) -> Result<Arc<Self>> {
        let mut builder = Self::builder().name(name);
        if let Some(runtime) = runtime {
            builder = builder.runtime(runtime);
        }
        builder.build()
    }

    /// Number of items currently in the table.
    pub fn count(&self) -> usize {
        self.state.read().items.len()
    }

    /// Check whether `key` is in the table. Unlike [`value()`](Self::value) this neither keeps the item alive nor
    /// consults the data loader.
    pub fn exists(&self, key: &K) -> bool {
        self.state.read().items.contains_key(key)
    }

    /// Call `f` for every item. The table is read-locked for the whole traversal: `f` must not use this table.
    /// Items are visited in no particular order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &Arc<CacheItem<K, V>>),
    {
        let state = self.state.read();
        for (key, item) in state.items.iter() {
            f(key, item);
        }
    }

    /// Duration the expiration timer is currently armed for. Zero when no mortal items are waiting or the timer has
    /// just fired.
    pub fn cleanup_interval(&self) -> Duration {
        self.state.read().timer.armed_interval()
    }

    /// Configure the closure to be called by [`value_with()`](Self::value_with) for keys missing in the table.
    pub fn set_data_loader<F>(&self, f: F)
    where
        F: Fn(&K, &[A]) -> Option<CacheItem<K, V>> + Send + Sync + 'static,
    {
        self.set_loader(f);
    }

    /// Same as [`set_data_loader()`](Self::set_data_loader) but for any [`DataLoader`] implementation.
    pub fn set_loader<L>(&self, loader: L)
    where
        L: DataLoader<K, V, A>,
    {
        let loader: Arc<dyn DataLoader<K, V, A>> = Arc::new(loader);
        self.state.write().loader = Some(loader);
    }

    pub fn remove_data_loader(&self) {
        self.state.write().loader = None;
    }

    /// Install `f` as the only callback to be called every time an item is added.
    pub fn set_added_item_callback<F>(&self, f: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        let f: Arc<ItemCallback<K, V>> = Arc::new(f);
        self.state.write().added_item.replace(f);
    }

    /// Add `f` to the callbacks called every time an item is added.
    pub fn add_added_item_callback<F>(&self, f: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        let f: Arc<ItemCallback<K, V>> = Arc::new(f);
        self.state.write().added_item.append(f);
    }

    pub fn remove_added_item_callbacks(&self) {
        self.state.write().added_item.clear();
    }

    /// Install `f` as the only callback to be called every time an item is about to be removed.
    pub fn set_about_to_delete_item_callback<F>(&self, f: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        let f: Arc<ItemCallback<K, V>> = Arc::new(f);
        self.state.write().about_to_delete_item.replace(f);
    }

    /// Add `f` to the callbacks called every time an item is about to be removed.
    pub fn add_about_to_delete_item_callback<F>(&self, f: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        let f: Arc<ItemCallback<K, V>> = Arc::new(f);
        self.state.write().about_to_delete_item.append(f);
    }

    pub fn remove_about_to_delete_item_callbacks(&self) {
        self.state.write().about_to_delete_item.clear();
    }

    // Must be called with the table write-locked; the lock is released before any callback runs.
    fn add_internal(&self, mut state: StateGuard<'_, K, V, A>, item: Arc<CacheItem<K, V>>) {
        debug!(
            "[{}] Adding item with key {:?} and lifespan of {:?}",
            self.name,
            item.key(),
            item.lifespan()
        );
        state.items.insert(item.key().clone(), Arc::clone(&item));

        // A timer lost with its runtime counts as not armed.
        let interval = state.timer.armed_interval();
        let callbacks = state.added_item.snapshot();
        drop(state);

        for callback in callbacks {
            callback(&item);
        }

        // No timer armed yet, or the new item may expire before the armed timer fires.
        if item.is_mortal() && (interval.is_zero() || item.lifespan() < interval) {
            self.expiration_check();
        }
    }

    // Must be called with the table write-locked. The lock is released while callbacks run and re-acquired for the
    // removal itself.
    fn delete_internal(&self, state: StateGuard<'_, K, V, A>, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        let Some(item) = state.items.get(key).cloned()
        else {
            return Err(CacheError::KeyNotFound);
        };

        // Callbacks are announced once per item. Whoever marked it first completes the removal.
        if !item.begin_delete() {
            trace!("[{}] Item with key {key:?} is already being deleted", self.name);
            return Ok(item);
        }
        let mark = DeletionMark(Arc::clone(&item));

        let callbacks = state.about_to_delete_item.snapshot();
        drop(state);

        for callback in callbacks {
            callback(&item);
        }

        for callback in item.expire_callbacks() {
            callback(item.key());
        }

        let mut state = self.state.write();
        // The key could have been re-added by a callback or by another thread. The new item stays.
        if state.items.get(key).is_some_and(|current| Arc::ptr_eq(current, &item)) {
            state.items.remove(key);
            debug!(
                "[{}] Deleting item with key {key:?} created {:?} ago and hit {} times",
                self.name,
                item.created_on().elapsed(),
                item.access_count()
            );
        }
        else {
            trace!("[{}] Item with key {key:?} was replaced while being deleted", self.name);
        }
        drop(state);
        drop(mark);

        Ok(item)
    }

    /// Add an item, replacing any item already stored under `key`.
    ///
    /// `lifespan` is how long the item is kept without being accessed; [`Duration::ZERO`] keeps it forever.
    pub fn add(&self, key: K, lifespan: Duration, data: V) -> Arc<CacheItem<K, V>> {
        let item = Arc::new(CacheItem::new(key, lifespan, data));
        let state = self.state.write();
        self.add_internal(state, Arc::clone(&item));
        item
    }

    /// Add an item only if `key` is not in the table yet. Returns `false` if it was there, leaving the existing item
    /// untouched.
    pub fn not_found_add(&self, key: K, lifespan: Duration, data: V) -> bool {
        let state = self.state.write();
        if state.items.contains_key(&key) {
            return false;
        }

        self.add_internal(state, Arc::new(CacheItem::new(key, lifespan, data)));
        true
    }

    /// Remove an item from the table, calling the table's about-to-delete callbacks and then the item's own expire
    /// callbacks first.
    ///
    /// If the item is already being deleted, by the expiration timer or by a callback re-entering `delete()`, it is
    /// returned right away and no callbacks are called again.
    pub fn delete(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        let state = self.state.write();
        self.delete_internal(state, key)
    }

    /// Shortcut for [`value_with()`](Self::value_with) with no loader arguments.
    #[inline]
    pub fn value(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        self.value_with(key, &[])
    }

    /// Get an item and keep it alive.
    ///
    /// On a miss the data loader, if any, is called with `key` and `args`. An item produced by the loader is added to
    /// the table. Concurrent misses on the same key call the loader independently.
    pub fn value_with(&self, key: &K, args: &[A]) -> Result<Arc<CacheItem<K, V>>> {
        let (found, loader) = {
            let state = self.state.read();
            (state.items.get(key).cloned(), state.loader.clone())
        };

        if let Some(item) = found {
            item.keep_alive();
            return Ok(item);
        }

        let Some(loader) = loader
        else {
            return Err(CacheError::KeyNotFound);
        };

        match loader.load(key, args) {
            Some(loaded) => {
                let (lifespan, data) = loaded.into_parts();
                Ok(self.add(key.clone(), lifespan, data))
            }
            None => Err(CacheError::KeyNotFoundOrLoadable),
        }
    }

    /// Drop all items and disarm the expiration timer. No callbacks are called.
    pub fn flush(&self) {
        let mut state = self.state.write();
        debug!("[{}] Flushing table", self.name);
        let items = std::mem::take(&mut state.items);
        state.timer.cancel();
        drop(state);
        drop(items);
    }

    /// Up to `count` items with the highest access counts, most accessed first. Items deleted while the ranking is
    /// being computed are skipped, so fewer items may be returned.
    pub fn most_accessed(&self, count: usize) -> Vec<Arc<CacheItem<K, V>>> {
        let mut ranking = {
            let state = self.state.read();
            state
                .items
                .iter()
                .map(|(key, item)| (key.clone(), item.access_count()))
                .collect::<Vec<_>>()
        };

        ranking.sort_unstable_by(|a, b| b.1.cmp(&a.1));

        let state = self.state.read();
        ranking
            .into_iter()
            .take(count)
            .filter_map(|(key, _)| state.items.get(&key).cloned())
            .collect()
    }

    fn weak_self(&self) -> Option<Weak<Self>> {
        self.myself().map(|myself| Arc::downgrade(&myself))
    }

    /// Remove all expired items and re-arm the timer for the soonest deadline among the remaining ones.
    #[instrument(level = "trace", skip(self), fields(table = %self.name))]
    pub(crate) fn expiration_check(&self) {
        loop {
            let mut state = self.state.write();

            let armed_for = state.timer.interval();
            if armed_for.is_zero() {
                trace!("[{}] Expiration check installed", self.name);
            }
            else {
                trace!("[{}] Expiration check triggered after {armed_for:?}", self.name);
            }
            state.timer.cancel();

            let now = Instant::now();
            let mut expired = Vec::new();
            let mut smallest = Duration::ZERO;
            for (key, item) in state.items.iter() {
                // Its deletion is in progress elsewhere.
                if item.is_being_deleted() {
                    continue;
                }
                match item.remaining_at(now) {
                    None => (),
                    Some(remaining) if remaining.is_zero() => expired.push(key.clone()),
                    Some(remaining) => {
                        if smallest.is_zero() || remaining < smallest {
                            smallest = remaining;
                        }
                    }
                }
            }

            if expired.is_empty() {
                if !smallest.is_zero() {
                    self.arm_timer(&mut state, smallest);
                }
                return;
            }

            drop(state);

            for key in expired {
                let state = self.state.write();
                // Could have been kept alive, deleted or replaced since the scan.
                if !state
                    .items
                    .get(&key)
                    .is_some_and(|item| !item.is_being_deleted() && item.is_expired_at(Instant::now()))
                {
                    continue;
                }
                if let Err(err) = self.delete_internal(state, &key) {
                    trace!("[{}] Expired key {key:?} is already gone: {err}", self.name);
                }
            }
        }
    }

    fn arm_timer(&self, state: &mut StateGuard<'_, K, V, A>, after: Duration) {
        let Some(weak) = self.weak_self()
        else {
            warn!("[{}] Table is being dropped, expiration timer is not armed", self.name);
            return;
        };

        state
            .timer
            .arm(self.runtime.as_ref(), after, move || {
                if let Some(table) = weak.upgrade() {
                    table.on_timer();
                }
            });
    }

    // Entry point of a fired timer. There is no caller to propagate a callback panic to, so it is logged instead and
    // the timer stays disarmed until the next mortal item is added.
    fn on_timer(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.expiration_check())).is_err() {
            error!(
                "[{}] A callback panicked during expiration check; timer is disarmed until the next add",
                self.name
            );
        }
    }
}

impl<K, V, A> Debug for CacheTable<K, V, A>
where
    K: Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheTable")
            .field("name", &self.name)
            .field("items", &state.items.len())
            .field("cleanup_interval", &state.timer.interval())
            .field("timer_armed", &state.timer.is_armed())
            .field("has_loader", &state.loader.is_some())
            .field("added_item_callbacks", &state.added_item.len())
            .field("about_to_delete_item_callbacks", &state.about_to_delete_item.len())
            .finish()
    }
}
