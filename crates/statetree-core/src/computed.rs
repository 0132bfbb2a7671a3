//! Computed nodes: lazy, memoized derivation with optional write-back and
//! asynchronous settlement.
//!
//! A computed evaluates at most once per dirty-to-clean transition and never
//! before its first read. Evaluation runs under a fresh tracking frame; the
//! dependency set is swapped wholesale afterwards, unsubscribing edges that
//! were not read this time. Asynchronous evaluations are tagged with a
//! generation; a settlement carrying a superseded generation is dropped
//! silently so a stale result can never overwrite a fresher one.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use serde_json::Value;
use statetree_pointer::{value_at, Path, Step};

use crate::batch::WriteGuard;
use crate::diff::diff_values;
use crate::error::StoreError;
use crate::events::{ChangeEvent, ListenerEntry, ObserveOptions, SubscriptionId};
use crate::node::{set_into, NodeId};
use crate::store::{mark_dependents_dirty, PendingGroup, Store, StoreInner};
use crate::track::{DependencySet, FrameScope};

/// Result of one computed read-function invocation.
pub enum Eval {
    Ready(Value),
    /// The value is still being produced; the engine keeps the last settled
    /// cache and commits the deferred result when it arrives.
    Pending(Deferred),
}

/// Settlement handle for an asynchronous computed result.
///
/// Cloneable; the party producing the value keeps one clone and calls
/// [`settle`](Deferred::settle) when done. Only the first settlement counts.
#[derive(Clone, Default)]
pub struct Deferred {
    inner: Rc<RefCell<DeferredInner>>,
}

#[derive(Default)]
struct DeferredInner {
    settled: Option<Value>,
    waiters: Vec<(Weak<RefCell<StoreInner>>, NodeId, u64)>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().settled.is_some()
    }

    /// Deliver the result. Waiting computeds commit it through the normal
    /// write path unless their evaluation generation has been superseded.
    pub fn settle(&self, value: Value) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            if inner.settled.is_some() {
                return;
            }
            inner.settled = Some(value.clone());
            std::mem::take(&mut inner.waiters)
        };
        for (store, cid, generation) in waiters {
            if let Some(rc) = store.upgrade() {
                Store::from_inner(rc).settle_computed(cid, generation, value.clone());
            }
        }
    }

    /// Returns the settled value if already available, otherwise parks the
    /// waiter.
    fn register(
        &self,
        store: Weak<RefCell<StoreInner>>,
        cid: NodeId,
        generation: u64,
    ) -> Option<Value> {
        let mut inner = self.inner.borrow_mut();
        if let Some(v) = &inner.settled {
            return Some(v.clone());
        }
        inner.waiters.push((store, cid, generation));
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CState {
    Uninitialized,
    Clean,
    Dirty,
    Evaluating,
}

pub(crate) struct ComputedState {
    pub read: Rc<dyn Fn() -> Eval>,
    pub write: Option<Rc<dyn Fn(Value)>>,
    pub deps: DependencySet,
    pub cache: Option<Value>,
    pub state: CState,
    /// A dependency changed while this computed was mid-evaluation.
    pub redirty: bool,
    pub generation: u64,
    pub listeners: BTreeMap<u64, ListenerEntry>,
}

impl ComputedState {
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }
}

impl Store {
    /// Create a lazily-evaluated, memoized computed node.
    pub fn computed(&self, read: impl Fn() -> Value + 'static) -> Computed {
        self.computed_async(move || Eval::Ready(read()))
    }

    /// Create a two-way computed: `write` receives the value being set and
    /// is expected to mutate the sources `read` derives from. It runs inside
    /// a batch so its writes coalesce into one notification per observer.
    pub fn computed_with_write(
        &self,
        read: impl Fn() -> Value + 'static,
        write: impl Fn(Value) + 'static,
    ) -> Computed {
        let computed = self.computed_async(move || Eval::Ready(read()));
        if let Some(cs) = self.inner.borrow_mut().computeds.get_mut(&computed.id) {
            cs.write = Some(Rc::new(write));
        }
        computed
    }

    /// Create a computed whose read function may return a still-pending
    /// result. See [`Eval`] and [`Deferred`].
    pub fn computed_async(&self, read: impl Fn() -> Eval + 'static) -> Computed {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.tree.alloc_id();
            inner.computeds.insert(
                id,
                ComputedState {
                    read: Rc::new(read),
                    write: None,
                    deps: DependencySet::new(),
                    cache: None,
                    state: CState::Uninitialized,
                    redirty: false,
                    generation: 0,
                    listeners: BTreeMap::new(),
                },
            );
            id
        };
        Computed {
            store: self.clone(),
            id,
            path: Vec::new(),
        }
    }

    pub(crate) fn computed_value(&self, cid: NodeId) -> Result<Option<Value>, StoreError> {
        self.record_read(cid);
        let state = self.inner.borrow().computeds.get(&cid).map(|c| c.state);
        match state {
            None => Ok(None),
            Some(CState::Clean) => Ok(self
                .inner
                .borrow()
                .computeds
                .get(&cid)
                .and_then(|c| c.cache.clone())),
            Some(CState::Evaluating) => {
                self.poison_frames();
                Err(StoreError::CyclicEvaluation)
            }
            Some(CState::Uninitialized) | Some(CState::Dirty) => self.evaluate(cid),
        }
    }

    fn evaluate(&self, cid: NodeId) -> Result<Option<Value>, StoreError> {
        let (read, generation, establishing) = {
            let mut inner = self.inner.borrow_mut();
            let Some(cs) = inner.computeds.get_mut(&cid) else {
                return Ok(None);
            };
            let establishing = cs.state == CState::Uninitialized;
            cs.state = CState::Evaluating;
            cs.generation += 1;
            (Rc::clone(&cs.read), cs.generation, establishing)
        };
        let scope = FrameScope::push(self);
        let outcome = (*read)();
        let frame = scope.finish();
        if frame.cycle {
            if let Some(cs) = self.inner.borrow_mut().computeds.get_mut(&cid) {
                cs.state = CState::Dirty;
                cs.redirty = false;
            }
            return Err(StoreError::CyclicEvaluation);
        }
        self.swap_deps(cid, frame.deps);
        match outcome {
            Eval::Ready(value) => self.commit_computed(cid, establishing, value),
            Eval::Pending(deferred) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    if let Some(cs) = inner.computeds.get_mut(&cid) {
                        cs.state = if cs.redirty {
                            CState::Dirty
                        } else {
                            CState::Clean
                        };
                        cs.redirty = false;
                    }
                }
                if let Some(value) = deferred.register(self.downgrade(), cid, generation) {
                    self.settle_computed(cid, generation, value);
                }
            }
        }
        Ok(self
            .inner
            .borrow()
            .computeds
            .get(&cid)
            .and_then(|c| c.cache.clone()))
    }

    fn swap_deps(&self, cid: NodeId, new: DependencySet) {
        let mut inner = self.inner.borrow_mut();
        let StoreInner {
            computeds,
            dependents,
            ..
        } = &mut *inner;
        let Some(cs) = computeds.get_mut(&cid) else {
            return;
        };
        let old = std::mem::replace(&mut cs.deps, new);
        for dep in old.difference(&cs.deps) {
            if let Some(set) = dependents.get_mut(dep) {
                set.remove(&cid);
            }
        }
        for dep in cs.deps.difference(&old) {
            dependents.entry(*dep).or_default().insert(cid);
        }
    }

    /// Commit a computed value. When the cache actually changes, records are
    /// queued exactly like a value-node write and dependents are dirtied.
    /// `establishing` suppresses both for the very first synchronous
    /// evaluation: there is no previous value to have moved from.
    fn commit_computed(&self, cid: NodeId, establishing: bool, value: Value) {
        let _guard = WriteGuard::begin(self);
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let StoreInner {
                computeds, pending, ..
            } = &mut *inner;
            let Some(cs) = computeds.get_mut(&cid) else {
                return;
            };
            let prev = cs.cache.clone();
            // An evaluation commit transitions to clean; a settlement commit
            // must not mask dirtiness acquired since the evaluation.
            cs.state = match cs.state {
                CState::Evaluating => {
                    if cs.redirty {
                        CState::Dirty
                    } else {
                        CState::Clean
                    }
                }
                other => other,
            };
            cs.redirty = false;
            if prev.as_ref() == Some(&value) {
                false
            } else {
                if !establishing && cs.has_listeners() {
                    let group = pending.entry(cid).or_insert_with(|| PendingGroup {
                        previous: prev.clone(),
                        records: Vec::new(),
                    });
                    group
                        .records
                        .extend(diff_values(prev.as_ref(), Some(&value)));
                }
                cs.cache = Some(value);
                true
            }
        };
        if changed && !establishing {
            let mut inner = self.inner.borrow_mut();
            let seeds = std::iter::once(cid).collect();
            mark_dependents_dirty(&mut inner, &seeds);
        }
    }

    /// Entry point for deferred settlements. A generation mismatch means the
    /// evaluation was superseded; the result is discarded silently.
    pub(crate) fn settle_computed(&self, cid: NodeId, generation: u64, value: Value) {
        let fresh = self
            .inner
            .borrow()
            .computeds
            .get(&cid)
            .is_some_and(|c| c.generation == generation);
        if !fresh {
            return;
        }
        self.commit_computed(cid, false, value);
    }

    pub(crate) fn computed_write(&self, cid: NodeId) -> Option<Rc<dyn Fn(Value)>> {
        self.inner
            .borrow()
            .computeds
            .get(&cid)
            .and_then(|c| c.write.clone())
    }
}

/// Handle to a computed node, or an accessor into part of its value.
///
/// A computed producing an object exposes the same per-key accessor shape as
/// an observable; each accessor is itself lazy, memoized, and observable.
#[derive(Clone)]
pub struct Computed {
    store: Store,
    pub(crate) id: NodeId,
    path: Path,
}

impl Computed {
    /// Read the (possibly cached) value. The read function runs only when a
    /// dependency changed since the last evaluation, and never before the
    /// first `get`.
    pub fn get(&self) -> Result<Option<Value>, StoreError> {
        let whole = self.store.computed_value(self.id)?;
        if self.path.is_empty() {
            return Ok(whole);
        }
        Ok(whole.and_then(|v| value_at(&v, &self.path).cloned()))
    }

    /// Write through the configured write function, inside a batch so the
    /// write function's source mutations coalesce into one notification per
    /// observer. Fails with [`StoreError::ReadOnlyComputed`] when no write
    /// function is configured; engine state is untouched in that case.
    pub fn set(&self, value: Value) -> Result<(), StoreError> {
        let Some(write) = self.store.computed_write(self.id) else {
            return Err(StoreError::ReadOnlyComputed);
        };
        let target = if self.path.is_empty() {
            value
        } else {
            let mut base = self.store.computed_value(self.id)?.unwrap_or(Value::Null);
            set_into(&mut base, &self.path, value);
            base
        };
        self.store.batch(move || (*write)(target));
        Ok(())
    }

    pub fn assign(&self, partial: Value) -> Result<(), StoreError> {
        if self.store.computed_write(self.id).is_none() {
            return Err(StoreError::ReadOnlyComputed);
        }
        let Value::Object(partial_map) = partial else {
            return Err(StoreError::NotAnObject);
        };
        let merged = match self.get()? {
            Some(Value::Object(mut map)) => {
                for (key, v) in partial_map {
                    map.insert(key, v);
                }
                Value::Object(map)
            }
            None => Value::Object(partial_map),
            Some(_) => return Err(StoreError::NotAnObject),
        };
        self.set(merged)
    }

    /// Absence maps to null for the write function.
    pub fn delete(&self) -> Result<(), StoreError> {
        self.set(Value::Null)
    }

    pub fn key(&self, key: impl Into<String>) -> Computed {
        let mut path = self.path.clone();
        path.push(Step::Key(key.into()));
        Computed {
            store: self.store.clone(),
            id: self.id,
            path,
        }
    }

    pub fn index(&self, index: usize) -> Computed {
        let mut path = self.path.clone();
        path.push(Step::Index(index));
        Computed {
            store: self.store.clone(),
            id: self.id,
            path,
        }
    }

    pub fn on_change(
        &self,
        handler: impl FnMut(&ChangeEvent) + 'static,
        options: ObserveOptions,
    ) -> SubscriptionId {
        self.store
            .add_computed_listener(self.id, self.path.clone(), handler, options)
    }

    pub fn unlisten(&self, sub: SubscriptionId) -> bool {
        self.store.remove_listener(sub)
    }
}
