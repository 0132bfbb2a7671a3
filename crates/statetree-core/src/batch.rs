//! Batch boundaries.
//!
//! Every mutation runs inside a write guard; with no explicit batch open the
//! guard is an implicit single-write batch and flushes immediately on drop.
//! The guard decrements on all exit paths, so an error unwinding out of a
//! batched closure cannot leave the nesting counter pinned above zero —
//! records queued before the unwind stay pending and are delivered by the
//! next flush.

use crate::store::Store;

/// RAII batch scope used by every mutation path.
pub(crate) struct WriteGuard {
    store: Store,
}

impl WriteGuard {
    pub fn begin(store: &Store) -> Self {
        store.inner.borrow_mut().batch_depth += 1;
        Self {
            store: store.clone(),
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let at_zero = {
            let mut inner = self.store.inner.borrow_mut();
            inner.batch_depth = inner.batch_depth.saturating_sub(1);
            inner.batch_depth == 0
        };
        // Delivering user callbacks while unwinding risks a double panic;
        // the queue survives for the next flush instead.
        if at_zero && !std::thread::panicking() {
            self.store.flush();
        }
    }
}

impl Store {
    /// Open an explicit batch: notifications are deferred until the matching
    /// [`end_batch`](Store::end_batch).
    pub fn start_batch(&self) {
        self.inner.borrow_mut().batch_depth += 1;
    }

    /// Close one batch level; closing the outermost level flushes queued
    /// notifications. Calling without an open batch is a no-op.
    pub fn end_batch(&self) {
        let flush = {
            let mut inner = self.inner.borrow_mut();
            if inner.batch_depth == 0 {
                false
            } else {
                inner.batch_depth -= 1;
                inner.batch_depth == 0
            }
        };
        if flush {
            self.flush();
        }
    }

    /// Run `f` inside a batch scope. The scope closes on all exit paths.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = WriteGuard::begin(self);
        f()
    }
}
