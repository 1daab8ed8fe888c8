use crate::listeners::Listeners;
use crate::types::ExpireCallback;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ItemState<K> {
    accessed_on:      Instant,
    access_count:     u64,
    expire_callbacks: Listeners<ExpireCallback<K>>,
    // Set while a table runs the delete protocol for this item.
    deleting:         bool,
}

/// A single cached record.
///
/// Key, data, lifespan and creation time never change after the item is created. Replacing a value means adding a
/// new item under the same key. The last access time, the access counter and the expire callbacks are guarded by the
/// item's own lock.
pub struct CacheItem<K, V> {
    key:        K,
    data:       V,
    lifespan:   Duration,
    created_on: Instant,
    state:      RwLock<ItemState<K>>,
}

impl<K, V> CacheItem<K, V> {
    /// Create a new item.
    ///
    /// `lifespan` is how long the item survives in a table without being accessed. [`Duration::ZERO`] makes it
    /// immortal.
    pub fn new(key: K, lifespan: Duration, data: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            data,
            lifespan,
            created_on: now,
            state: RwLock::new(ItemState {
                accessed_on:      now,
                access_count:     0,
                expire_callbacks: Listeners::new(),
                deleting:         false,
            }),
        }
    }

    /// Mark the item as accessed: refreshes its deadline and bumps the access counter.
    pub fn keep_alive(&self) {
        let mut state = self.state.write();
        state.accessed_on = Instant::now();
        state.access_count += 1;
    }

    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn data(&self) -> &V {
        &self.data
    }

    #[inline]
    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    #[inline]
    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    pub fn accessed_on(&self) -> Instant {
        self.state.read().accessed_on
    }

    pub fn access_count(&self) -> u64 {
        self.state.read().access_count
    }

    #[inline]
    pub fn is_mortal(&self) -> bool {
        !self.lifespan.is_zero()
    }

    /// The moment the item expires unless kept alive before. `None` for immortal items and for deadlines too far in
    /// the future to be represented.
    pub fn expires_at(&self) -> Option<Instant> {
        if self.is_mortal() {
            self.accessed_on().checked_add(self.lifespan)
        }
        else {
            None
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.is_mortal() && now.saturating_duration_since(self.accessed_on()) >= self.lifespan
    }

    /// Time left before the item expires as seen at `now`. `None` for immortal items, zero for expired ones.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.is_mortal()
            .then(|| self.lifespan.saturating_sub(now.saturating_duration_since(self.accessed_on())))
    }

    /// Install `f` as the only callback to be called right before the item is removed from its table.
    pub fn set_expire_callback<F>(&self, f: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        let f: Arc<ExpireCallback<K>> = Arc::new(f);
        self.state.write().expire_callbacks.replace(f);
    }

    /// Add `f` to the callbacks to be called right before the item is removed from its table.
    pub fn add_expire_callback<F>(&self, f: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        let f: Arc<ExpireCallback<K>> = Arc::new(f);
        self.state.write().expire_callbacks.append(f);
    }

    pub fn remove_expire_callbacks(&self) {
        self.state.write().expire_callbacks.clear();
    }

    // The lock is released by the time the caller gets the list.
    pub(crate) fn expire_callbacks(&self) -> Vec<Arc<ExpireCallback<K>>> {
        self.state.read().expire_callbacks.snapshot()
    }

    // Returns false if the item is already being deleted.
    pub(crate) fn begin_delete(&self) -> bool {
        let mut state = self.state.write();
        !std::mem::replace(&mut state.deleting, true)
    }

    pub(crate) fn end_delete(&self) {
        self.state.write().deleting = false;
    }

    pub(crate) fn is_being_deleted(&self) -> bool {
        self.state.read().deleting
    }

    /// Consume the item and return its lifespan and data.
    pub fn into_parts(self) -> (Duration, V) {
        (self.lifespan, self.data)
    }
}

impl<K, V> Debug for CacheItem<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("data", &self.data)
            .field("lifespan", &self.lifespan)
            .field("created_on", &self.created_on)
            .field("accessed_on", &state.accessed_on)
            .field("access_count", &state.access_count)
            .field("expire_callbacks", &state.expire_callbacks.len())
            .field("deleting", &state.deleting)
            .finish()
    }
}
