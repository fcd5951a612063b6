//! Single-slot "latest callback" cell.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

type ItemsFn<T> = dyn Fn(Vec<T>) + Send + Sync;

/// Holds the most recently supplied new-items callback.
///
/// The driver reads the cell on every delivered payload, so replacing the
/// callback takes effect on the next event without reopening the transport.
pub struct LatestCallback<T> {
    slot: Arc<RwLock<Arc<ItemsFn<T>>>>,
}

impl<T> LatestCallback<T> {
    /// Create a cell holding `callback`.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(callback))),
        }
    }

    /// A cell whose callback discards everything.
    pub fn noop() -> Self
    where
        T: 'static,
    {
        Self::new(|_| {})
    }

    /// Replace the callback.
    pub fn replace<F>(&self, callback: F)
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        *self.slot.write() = Arc::new(callback);
    }

    /// Invoke the current callback. The lock is released before the call, so
    /// the callback may itself replace the cell's contents.
    pub fn invoke(&self, items: Vec<T>) {
        let callback = Arc::clone(&self.slot.read());
        callback(items);
    }
}

impl<T> Clone for LatestCallback<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for LatestCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatestCallback").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_invoke_uses_latest() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        let cell = LatestCallback::new(move |items: Vec<u32>| {
            counter.fetch_add(items.len(), Ordering::SeqCst);
        });
        let reader = cell.clone();

        reader.invoke(vec![1]);
        let counter = Arc::clone(&second);
        cell.replace(move |items: Vec<u32>| {
            counter.fetch_add(items.len(), Ordering::SeqCst);
        });
        reader.invoke(vec![2, 3]);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_may_replace_itself() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cell = LatestCallback::<u8>::noop();

        let inner = cell.clone();
        let counter = Arc::clone(&hits);
        cell.replace(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.replace(|_| {});
        });

        cell.invoke(vec![0]);
        cell.invoke(vec![0]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
