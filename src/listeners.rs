use std::fmt::Debug;
use std::sync::Arc;

/// Ordered list of callbacks.
///
/// The list itself is not synchronized; it lives inside whatever lock guards its owner (the table state or an item's
/// state). Callbacks are handed out as a [`snapshot`](Self::snapshot) so they can be invoked after that lock is
/// released.
pub struct Listeners<T: ?Sized> {
    list: Vec<Arc<T>>,
}

impl<T: ?Sized> Listeners<T> {
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    /// Drop all registered listeners and install `listener` as the only one.
    pub fn replace(&mut self, listener: Arc<T>) {
        self.list.clear();
        self.list.push(listener);
    }

    /// Register `listener` after those already in the list.
    pub fn append(&mut self, listener: Arc<T>) {
        self.list.push(listener);
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Clone the listener handles in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.list.clone()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.list.len()).finish()
    }
}
