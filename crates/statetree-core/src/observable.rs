//! Path-addressed handles over the observable tree.

use std::cell::RefCell;
use std::rc::Weak;

use serde_json::Value;
use statetree_pointer::{parse_pointer, Path, PointerError, Step};

use crate::error::StoreError;
use crate::events::{ChangeEvent, ObserveOptions, SubscriptionId};
use crate::node::{NodeId, NodeKind};
use crate::store::{Store, StoreInner};

/// Handle to a node of an observable tree.
///
/// Handles are cheap path views: cloning one, or deriving a child accessor,
/// touches no tree state. The node itself is materialized on first access.
#[derive(Clone)]
pub struct Observable {
    store: Store,
    root: NodeId,
    path: Path,
}

impl Observable {
    pub(crate) fn new(store: Store, root: NodeId, path: Path) -> Self {
        Self { store, root, path }
    }

    /// Current value at this path, or `None` when absent or not yet settled.
    /// Reading inside a tracking scope registers this node as a dependency.
    pub fn get(&self) -> Option<Value> {
        self.store.read_value(self.root, &self.path)
    }

    /// Shape of the value currently held here.
    pub fn kind(&self) -> Option<NodeKind> {
        self.store.read_kind(self.root, &self.path)
    }

    /// Replace the value at this path. Missing intermediate steps are
    /// materialized as objects; arrays are padded with nulls.
    pub fn set(&self, value: Value) {
        self.store.apply_value(self.root, &self.path, value);
    }

    /// Merge an object-shaped partial into the value at this path.
    pub fn assign(&self, partial: Value) -> Result<(), StoreError> {
        self.store.assign_value(self.root, &self.path, partial)
    }

    /// Remove this key (or index) from the parent container.
    pub fn delete(&self) -> Result<(), StoreError> {
        self.store.delete_value(self.root, &self.path)
    }

    pub fn key(&self, key: impl Into<String>) -> Observable {
        let mut path = self.path.clone();
        path.push(Step::Key(key.into()));
        Observable::new(self.store.clone(), self.root, path)
    }

    pub fn index(&self, index: usize) -> Observable {
        let mut path = self.path.clone();
        path.push(Step::Index(index));
        Observable::new(self.store.clone(), self.root, path)
    }

    /// Child accessor addressed by an RFC 6901 pointer relative to this node.
    pub fn pointer(&self, pointer: &str) -> Result<Observable, PointerError> {
        let mut path = self.path.clone();
        path.extend(parse_pointer(pointer)?);
        Ok(Observable::new(self.store.clone(), self.root, path))
    }

    /// Register a change listener on this node. The handler fires once per
    /// flushed batch that touched the node, with the records accumulated
    /// across the batch.
    pub fn on_change(
        &self,
        handler: impl FnMut(&ChangeEvent) + 'static,
        options: ObserveOptions,
    ) -> SubscriptionId {
        self.store
            .add_value_listener(self.root, &self.path, handler, options)
    }

    pub fn unlisten(&self, sub: SubscriptionId) -> bool {
        self.store.remove_listener(sub)
    }
}

/// Settles a pending observable created by
/// [`observable_pending`](Store::observable_pending).
///
/// The first settlement establishes the value through the normal write path;
/// later calls behave like plain `set`s.
#[derive(Clone)]
pub struct Resolver {
    store: Weak<RefCell<StoreInner>>,
    node: NodeId,
}

impl Resolver {
    pub(crate) fn new(store: Weak<RefCell<StoreInner>>, node: NodeId) -> Self {
        Self { store, node }
    }

    pub fn settle(&self, value: Value) {
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).apply_value(self.node, &[], value);
        }
    }
}
