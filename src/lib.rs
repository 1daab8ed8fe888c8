//! # ttl-table
//!
//! In-process keyed cache tables with per-item time-to-live, access counting and lifecycle callbacks.
//!
//! Think of it as a lookaside cache for values that are expensive to produce and are only worth keeping while they
//! are being used.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - Values are addressed by a key and can be re-created on demand, e.g. by a database query or a remote call.
//! - A value is worth keeping only while it keeps being requested.
//! - The application wants to know when values come and go.
//!
//! The cache operates on the following principles:
//!
//! - It is key and value agnostic: any `Hash + Eq` key and any `Send + Sync` value.
//! - Items are grouped in named [`CacheTable`]s. A [`Cache`] registry hands out tables by name, creating them on first
//!   use. There is no global state; the registry is an ordinary value owned by the application.
//! - Every item has its own lifespan. An item which isn't obtained with [`CacheTable::value()`] for longer than its
//!   lifespan is removed. A zero lifespan means the item never expires.
//! - There is no periodic sweeping. Each table keeps a single one-shot timer armed for the moment the soonest item is
//!   due. Every time it fires, the deadline is re-computed from the current content of the table.
//! - Nothing is evicted because of size. As an in-process cache it doesn't support distributed invalidation or
//!   persistence either.
//!
//! # Callbacks And Loaders
//!
//! A table can be given a [`DataLoader`] which is consulted when a requested key is missing. Whatever item it returns
//! is added to the table. Tables report added items and items about to be deleted to their callbacks; items report
//! their own removal to item-level expire callbacks.
//!
//! Callbacks and loaders are never called while the table is locked, so they are free to use the table they were
//! called from. The only exception is [`CacheTable::for_each()`] which holds a read lock during the whole iteration.
//!
//! A panic in a callback propagates to the caller of the operation that triggered it. If it happens during a
//! timer-driven expiration check, the panic is logged and the timer stays disarmed until the next mortal item is
//! added.
//!
//! # Timers
//!
//! Expiration timers are tokio tasks. A table spawns them on the runtime it was built with, or on the runtime of the
//! calling context, or, if there is none, on a small background runtime owned by this crate. Hence tables work the
//! same in async and in plain threaded code.
//!
//! ```ignore
//! use std::time::Duration;
//! use ttl_table::prelude::*;
//!
//! let cache: Cache<String, String> = Cache::new();
//! let users = cache.table("users")?;
//!
//! users.set_data_loader(|key: &String, _args: &[()]| {
//!     Some(CacheItem::new(key.clone(), Duration::from_secs(60), format!("profile of {key}")))
//! });
//!
//! let profile = users.value(&"alice".to_string())?;
//! assert_eq!(profile.data(), "profile of alice");
//! ```

pub mod item;
pub mod listeners;
pub mod registry;
pub mod table;
pub(crate) mod timer;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use item::CacheItem;
#[doc(inline)]
pub use registry::Cache;
#[doc(inline)]
pub use table::CacheTable;
#[doc(inline)]
pub use traits::DataLoader;
#[doc(inline)]
pub use types::CacheError;

pub mod prelude {
    pub use crate::item::CacheItem;
    pub use crate::registry::Cache;
    pub use crate::table::CacheTable;
    pub use crate::traits::DataLoader;
    pub use crate::types::*;
}
