use crate::item::CacheItem;
use std::sync::Arc;

/// Table-level hook receiving an item that has just been added or is about to be deleted.
pub type ItemCallback<K, V> = dyn Fn(&Arc<CacheItem<K, V>>) + Send + Sync;

/// Item-level hook receiving the key of an item that is about to be removed from its table.
pub type ExpireCallback<K> = dyn Fn(&K) + Send + Sync;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("key not found in cache")]
    KeyNotFound,

    /// A data loader was consulted on a miss but didn't produce an item.
    #[error("key not found and could not be loaded")]
    KeyNotFoundOrLoadable,

    #[error("failed to build cache table: {0}")]
    TableBuild(#[from] fieldx::error::FieldXError),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
