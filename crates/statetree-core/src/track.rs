//! Dependency tracking: a stack of recording frames.
//!
//! Reads record into the top frame only. Computed evaluation pushes its own
//! frame, so an outer computation that reads a computed records the computed
//! itself while the computed's sources land in the computed's own dependency
//! set; invalidation then propagates transitively through dirtying instead
//! of flattened dependency sets.

use std::collections::BTreeSet;

use crate::node::NodeId;
use crate::store::Store;

/// Identity-based set of nodes read during one tracked computation.
pub type DependencySet = BTreeSet<NodeId>;

#[derive(Default)]
pub(crate) struct Frame {
    pub deps: DependencySet,
    /// Raised when a cyclic read is detected anywhere below this frame, so
    /// the owning evaluation fails even if a closure swallowed the error.
    pub cycle: bool,
}

/// Scoped frame handle: the frame is popped on all exit paths.
pub(crate) struct FrameScope {
    store: Store,
    finished: bool,
}

impl FrameScope {
    pub fn push(store: &Store) -> Self {
        store.inner.borrow_mut().frames.push(Frame::default());
        Self {
            store: store.clone(),
            finished: false,
        }
    }

    pub fn finish(mut self) -> Frame {
        self.finished = true;
        self.store
            .inner
            .borrow_mut()
            .frames
            .pop()
            .unwrap_or_default()
    }
}

impl Drop for FrameScope {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.store.inner.borrow_mut().frames.pop();
        }
    }
}

impl Store {
    /// Run `f` under a fresh recording scope and return its result together
    /// with the set of node identities it read.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> (R, DependencySet) {
        let scope = FrameScope::push(self);
        let result = f();
        let frame = scope.finish();
        (result, frame.deps)
    }

    /// Record a read of `id` into the active frame, if any.
    pub(crate) fn record_read(&self, id: NodeId) {
        if let Some(frame) = self.inner.borrow_mut().frames.last_mut() {
            frame.deps.insert(id);
        }
    }

    /// Poison every active frame; used when a cyclic read is detected.
    pub(crate) fn poison_frames(&self) {
        for frame in self.inner.borrow_mut().frames.iter_mut() {
            frame.cycle = true;
        }
    }
}
