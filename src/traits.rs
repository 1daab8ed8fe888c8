use crate::item::CacheItem;

/// Fallback source of items for [`CacheTable::value_with()`](crate::CacheTable::value_with) on a cache miss.
///
/// The loader is called without any table lock held; it may be slow and it may use the table itself. Only the
/// lifespan and the data of the returned item are used, the item is re-created under the requested key.
///
/// Any `Fn(&K, &[A]) -> Option<CacheItem<K, V>>` closure is a loader.
pub trait DataLoader<K, V, A>: Send + Sync + 'static {
    fn load(&self, key: &K, args: &[A]) -> Option<CacheItem<K, V>>;
}

impl<K, V, A, F> DataLoader<K, V, A> for F
where
    F: Fn(&K, &[A]) -> Option<CacheItem<K, V>> + Send + Sync + 'static,
{
    #[inline(always)]
    fn load(&self, key: &K, args: &[A]) -> Option<CacheItem<K, V>> {
        self(key, args)
    }
}
