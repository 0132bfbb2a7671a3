//! The store: node arena, write pipeline, dirtying, and notification flush.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use statetree_pointer::{split_parent, value_at, Path, Step};

use crate::batch::WriteGuard;
use crate::computed::{CState, ComputedState};
use crate::error::StoreError;
use crate::events::{
    default_equality, opt_eq, ChangeEvent, ChangeRecord, ListenerEntry, ObserveOptions,
    SubscriptionId, Tracking,
};
use crate::node::{set_into, NodeBody, NodeId, NodeKind, Plan, Tree};
use crate::observable::{Observable, Resolver};
use crate::track::Frame;

pub(crate) struct PendingGroup {
    /// Snapshot of the observed node from before the batch first touched it.
    pub previous: Option<Value>,
    /// Records relative to the observed node, in write order.
    pub records: Vec<ChangeRecord>,
}

pub(crate) struct StoreInner {
    pub tree: Tree,
    pub computeds: BTreeMap<NodeId, ComputedState>,
    /// Source node -> computed nodes that read it on their last evaluation.
    pub dependents: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pub frames: Vec<Frame>,
    pub batch_depth: u32,
    pub pending: IndexMap<NodeId, PendingGroup>,
    /// Dirty computeds somebody listens to; refreshed at flush so their
    /// records join the same delivery.
    pub dirty_observed: BTreeSet<NodeId>,
    pub flushing: bool,
    pub next_sub_id: u64,
    /// Subscription id -> owning node, for O(log n) removal.
    pub subscriptions: BTreeMap<u64, NodeId>,
}

/// A reactive state engine. Cheap to clone; all handles created from one
/// store share its tracking scope, batch context, and notification queue.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<RefCell<StoreInner>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                tree: Tree::default(),
                computeds: BTreeMap::new(),
                dependents: BTreeMap::new(),
                frames: Vec::new(),
                batch_depth: 0,
                pending: IndexMap::new(),
                dirty_observed: BTreeSet::new(),
                flushing: false,
                next_sub_id: 1,
                subscriptions: BTreeMap::new(),
            })),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<StoreInner>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<StoreInner>> {
        Rc::downgrade(&self.inner)
    }

    /// Create a root observable holding `initial`.
    pub fn observable(&self, initial: Value) -> Observable {
        let root = self
            .inner
            .borrow_mut()
            .tree
            .alloc_node(None, NodeBody::Void(IndexMap::new()));
        let observable = Observable::new(self.clone(), root, Vec::new());
        self.apply_value(root, &[], initial);
        observable
    }

    /// Create a root observable backed by a not-yet-settled asynchronous
    /// source. Reads yield `None` until the resolver settles it; settlement
    /// runs the normal write path, so dependents and listeners cascade.
    pub fn observable_pending(&self) -> (Observable, Resolver) {
        let root = self
            .inner
            .borrow_mut()
            .tree
            .alloc_node(None, NodeBody::Pending);
        let observable = Observable::new(self.clone(), root, Vec::new());
        let resolver = Resolver::new(self.downgrade(), root);
        (observable, resolver)
    }

    // ---- reads ----

    pub(crate) fn read_value(&self, root: NodeId, path: &[Step]) -> Option<Value> {
        let (node, consumed, value) = {
            let mut inner = self.inner.borrow_mut();
            let (node, consumed) = inner.tree.resolve_or_materialize(root, path);
            let value = inner.tree.node_value(node);
            (node, consumed, value)
        };
        self.record_read(node);
        if consumed == path.len() {
            value
        } else {
            value.and_then(|v| value_at(&v, &path[consumed..]).cloned())
        }
    }

    pub(crate) fn read_kind(&self, root: NodeId, path: &[Step]) -> Option<NodeKind> {
        let (node, consumed, kind) = {
            let mut inner = self.inner.borrow_mut();
            let (node, consumed) = inner.tree.resolve_or_materialize(root, path);
            let kind = inner.tree.kind(node);
            (node, consumed, kind)
        };
        self.record_read(node);
        if consumed == path.len() {
            kind
        } else {
            None
        }
    }

    // ---- writes ----

    /// Reconcile the subtree at `path` under `root` toward `value`. Runs as
    /// an implicit single-write batch when no explicit batch is open.
    pub(crate) fn apply_value(&self, root: NodeId, path: &[Step], value: Value) {
        let _guard = WriteGuard::begin(self);
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let (anchor, consumed) = inner.tree.resolve_or_materialize(root, path);
        let target = if consumed == path.len() {
            value
        } else {
            let mut base = inner.tree.node_value(anchor).unwrap_or(Value::Null);
            set_into(&mut base, &path[consumed..], value);
            base
        };
        let (anchor, target) = inner.tree.lift_void_anchor(anchor, target);
        let plan = inner.tree.plan_reconcile(anchor, &target);
        if plan.is_empty() {
            return;
        }
        enqueue_plan(inner, &plan);
        mark_plan_dirty(inner, &plan);
        inner.tree.apply_plan(&plan);
    }

    pub(crate) fn assign_value(
        &self,
        root: NodeId,
        path: &[Step],
        partial: Value,
    ) -> Result<(), StoreError> {
        let Value::Object(partial_map) = partial else {
            return Err(StoreError::NotAnObject);
        };
        let current = {
            let mut inner = self.inner.borrow_mut();
            let (node, consumed) = inner.tree.resolve_or_materialize(root, path);
            let value = inner.tree.node_value(node);
            if consumed == path.len() {
                value
            } else {
                value.and_then(|v| value_at(&v, &path[consumed..]).cloned())
            }
        };
        let merged = match current {
            Some(Value::Object(mut map)) => {
                for (key, v) in partial_map {
                    map.insert(key, v);
                }
                Value::Object(map)
            }
            None => Value::Object(partial_map),
            Some(_) => return Err(StoreError::NotAnObject),
        };
        self.apply_value(root, path, merged);
        Ok(())
    }

    pub(crate) fn delete_value(&self, root: NodeId, path: &[Step]) -> Result<(), StoreError> {
        let Some((parent_path, leaf)) = split_parent(path) else {
            return Err(StoreError::DeleteRoot);
        };
        let parent_value = {
            let mut inner = self.inner.borrow_mut();
            let (node, consumed) = inner.tree.resolve_or_materialize(root, parent_path);
            if consumed == parent_path.len() {
                inner.tree.node_value(node)
            } else {
                None
            }
        };
        let Some(mut parent_value) = parent_value else {
            return Ok(());
        };
        let removed = match (&mut parent_value, leaf) {
            (Value::Object(map), Step::Key(key)) => map.remove(key).is_some(),
            (Value::Object(map), Step::Index(idx)) => map.remove(&idx.to_string()).is_some(),
            (Value::Array(arr), Step::Index(idx)) => {
                if *idx < arr.len() {
                    arr.remove(*idx);
                    true
                } else {
                    false
                }
            }
            (Value::Array(arr), Step::Key(key)) => match key.parse::<usize>() {
                Ok(idx) if idx < arr.len() => {
                    arr.remove(idx);
                    true
                }
                _ => false,
            },
            (Value::Array(arr), Step::Append) => arr.pop().is_some(),
            _ => false,
        };
        if removed {
            self.apply_value(root, parent_path, parent_value);
        }
        Ok(())
    }

    // ---- listeners ----

    pub(crate) fn add_value_listener(
        &self,
        root: NodeId,
        path: &[Step],
        handler: impl FnMut(&ChangeEvent) + 'static,
        options: ObserveOptions,
    ) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let (node, consumed) = inner.tree.resolve_or_materialize(root, path);
        let entry = ListenerEntry {
            scope: path[consumed..].to_vec(),
            tracking: options.tracking,
            equality: options.equality.unwrap_or_else(default_equality),
            handler: Rc::new(RefCell::new(Box::new(handler))),
        };
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        if let Some(n) = inner.tree.node_mut(node) {
            n.listeners.insert(id, entry);
            inner.subscriptions.insert(id, node);
        }
        SubscriptionId(id)
    }

    pub(crate) fn add_computed_listener(
        &self,
        computed: NodeId,
        scope: Path,
        handler: impl FnMut(&ChangeEvent) + 'static,
        options: ObserveOptions,
    ) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let entry = ListenerEntry {
            scope,
            tracking: options.tracking,
            equality: options.equality.unwrap_or_else(default_equality),
            handler: Rc::new(RefCell::new(Box::new(handler))),
        };
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        if let Some(cs) = inner.computeds.get_mut(&computed) {
            cs.listeners.insert(id, entry);
            inner.subscriptions.insert(id, computed);
            // A change may already be pending from before anyone listened.
            if cs.state == CState::Dirty {
                inner.dirty_observed.insert(computed);
            }
        }
        SubscriptionId(id)
    }

    pub(crate) fn remove_listener(&self, sub: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(owner) = inner.subscriptions.remove(&sub.0) else {
            return false;
        };
        if let Some(node) = inner.tree.node_mut(owner) {
            return node.listeners.remove(&sub.0).is_some();
        }
        if let Some(cs) = inner.computeds.get_mut(&owner) {
            return cs.listeners.remove(&sub.0).is_some();
        }
        false
    }

    // ---- flush ----

    /// Deliver queued notifications. Called when the outermost batch closes;
    /// re-entrant calls (from computed refresh or listener writes) no-op and
    /// the outer loop drains everything.
    pub(crate) fn flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing || inner.batch_depth > 0 {
                return;
            }
            inner.flushing = true;
        }
        loop {
            // Refresh dirty computeds that are being observed so their
            // records join this delivery round.
            loop {
                let next = self.inner.borrow_mut().dirty_observed.pop_first();
                match next {
                    Some(cid) => {
                        let _ = self.computed_value(cid);
                    }
                    None => break,
                }
            }
            let groups: Vec<(NodeId, PendingGroup)> = {
                let mut inner = self.inner.borrow_mut();
                if inner.pending.is_empty() {
                    if inner.dirty_observed.is_empty() {
                        inner.flushing = false;
                        return;
                    }
                    continue;
                }
                inner.pending.drain(..).collect()
            };
            for (id, group) in groups {
                let (listeners, current) = {
                    let inner = self.inner.borrow();
                    if let Some(node) = inner.tree.node(id) {
                        (
                            node.listeners.values().cloned().collect::<Vec<_>>(),
                            inner.tree.node_value(id),
                        )
                    } else if let Some(cs) = inner.computeds.get(&id) {
                        (
                            cs.listeners.values().cloned().collect::<Vec<_>>(),
                            cs.cache.clone(),
                        )
                    } else {
                        (Vec::new(), None)
                    }
                };
                for entry in listeners {
                    if let Some(event) = build_event(&group, &entry, current.as_ref()) {
                        let mut handler = entry.handler.borrow_mut();
                        (*handler)(&event);
                    }
                }
            }
        }
    }
}

// ---- write-path helpers ----

/// Queue one record per listening ancestor-or-self node, plus synthesized
/// whole-value records for listener-bearing descendants subsumed by a
/// kind-change or removal. Runs before the plan is applied, so every group
/// snapshot predates the whole write.
fn enqueue_plan(inner: &mut StoreInner, plan: &Plan) {
    let StoreInner { tree, pending, .. } = inner;
    for rec in &plan.records {
        let base_len = if rec.node.is_some() {
            rec.path.len()
        } else {
            rec.path.len().saturating_sub(1)
        };
        let mut cur = Some(rec.node.unwrap_or(rec.anchor));
        let mut cur_len = base_len;
        while let Some(id) = cur {
            let Some(node) = tree.node(id) else { break };
            if node.has_listeners() {
                let group = pending.entry(id).or_insert_with(|| PendingGroup {
                    previous: tree.node_value(id),
                    records: Vec::new(),
                });
                group.records.push(ChangeRecord {
                    path: rec.path[cur_len..].to_vec(),
                    path_types: rec.path_types[cur_len..].to_vec(),
                    value_at_path: rec.next.clone(),
                    prev_at_path: rec.prev.clone(),
                });
            }
            cur = node.parent;
            cur_len = cur_len.saturating_sub(1);
        }
        if let Some(id) = rec.node {
            for (descendant, rel) in tree.descendant_listeners(id) {
                let prev = tree.node_value(descendant);
                let next = rec.next.as_ref().and_then(|v| value_at(v, &rel)).cloned();
                if prev == next {
                    continue;
                }
                let group = pending.entry(descendant).or_insert_with(|| PendingGroup {
                    previous: tree.node_value(descendant),
                    records: Vec::new(),
                });
                group.records.push(ChangeRecord {
                    path: Vec::new(),
                    path_types: Vec::new(),
                    value_at_path: next,
                    prev_at_path: prev,
                });
            }
        }
    }
}

/// Mark every computed that depends on a touched node, or on any of its
/// ancestors, dirty — transitively through computed-on-computed edges.
fn mark_plan_dirty(inner: &mut StoreInner, plan: &Plan) {
    let mut seeds = plan.touched.clone();
    for rec in &plan.records {
        if rec.node.is_none() {
            seeds.insert(rec.anchor);
        }
    }
    let mut expanded = BTreeSet::new();
    for seed in seeds {
        let mut cur = Some(seed);
        while let Some(id) = cur {
            if !expanded.insert(id) {
                break;
            }
            cur = inner.tree.node(id).and_then(|n| n.parent);
        }
    }
    mark_dependents_dirty(inner, &expanded);
}

pub(crate) fn mark_dependents_dirty(inner: &mut StoreInner, seeds: &BTreeSet<NodeId>) {
    let StoreInner {
        computeds,
        dependents,
        dirty_observed,
        ..
    } = inner;
    let mut stack: Vec<NodeId> = seeds
        .iter()
        .filter_map(|s| dependents.get(s))
        .flat_map(|set| set.iter().copied())
        .collect();
    while let Some(cid) = stack.pop() {
        let Some(cs) = computeds.get_mut(&cid) else {
            continue;
        };
        match cs.state {
            CState::Clean => {
                cs.state = CState::Dirty;
                if cs.has_listeners() {
                    dirty_observed.insert(cid);
                }
                if let Some(set) = dependents.get(&cid) {
                    stack.extend(set.iter().copied());
                }
            }
            CState::Evaluating => cs.redirty = true,
            CState::Dirty | CState::Uninitialized => {}
        }
    }
}

// ---- delivery ----

fn scope_value(value: Option<&Value>, scope: &[Step]) -> Option<Value> {
    if scope.is_empty() {
        value.cloned()
    } else {
        value.and_then(|v| value_at(v, scope)).cloned()
    }
}

fn scope_record(rec: &ChangeRecord, scope: &[Step]) -> Option<ChangeRecord> {
    if scope.is_empty() {
        return Some(rec.clone());
    }
    if rec.path.len() >= scope.len() && rec.path[..scope.len()] == scope[..] {
        return Some(ChangeRecord {
            path: rec.path[scope.len()..].to_vec(),
            path_types: rec.path_types[scope.len()..].to_vec(),
            value_at_path: rec.value_at_path.clone(),
            prev_at_path: rec.prev_at_path.clone(),
        });
    }
    if rec.path.len() < scope.len() && scope[..rec.path.len()] == rec.path[..] {
        let rel = &scope[rec.path.len()..];
        return Some(ChangeRecord {
            path: Vec::new(),
            path_types: Vec::new(),
            value_at_path: rec.value_at_path.as_ref().and_then(|v| value_at(v, rel)).cloned(),
            prev_at_path: rec.prev_at_path.as_ref().and_then(|v| value_at(v, rel)).cloned(),
        });
    }
    None
}

fn build_event(
    group: &PendingGroup,
    entry: &ListenerEntry,
    current: Option<&Value>,
) -> Option<ChangeEvent> {
    let value = scope_value(current, &entry.scope);
    let previous = scope_value(group.previous.as_ref(), &entry.scope);
    match entry.tracking {
        Tracking::Whole => {
            if opt_eq(&entry.equality, previous.as_ref(), value.as_ref()) {
                return None;
            }
            Some(ChangeEvent {
                records: vec![ChangeRecord {
                    path: Vec::new(),
                    path_types: Vec::new(),
                    value_at_path: value.clone(),
                    prev_at_path: previous.clone(),
                }],
                value,
                previous,
            })
        }
        Tracking::Leaves => {
            // Coalesce repeat writes to one path: first prev, last value.
            let mut coalesced: IndexMap<Path, ChangeRecord> = IndexMap::new();
            for rec in &group.records {
                let Some(scoped) = scope_record(rec, &entry.scope) else {
                    continue;
                };
                match coalesced.entry(scoped.path.clone()) {
                    indexmap::map::Entry::Occupied(mut slot) => {
                        slot.get_mut().value_at_path = scoped.value_at_path;
                    }
                    indexmap::map::Entry::Vacant(slot) => {
                        slot.insert(scoped);
                    }
                }
            }
            let records: Vec<ChangeRecord> = coalesced
                .into_values()
                .filter(|r| {
                    !opt_eq(&entry.equality, r.prev_at_path.as_ref(), r.value_at_path.as_ref())
                })
                .collect();
            if records.is_empty() {
                return None;
            }
            Some(ChangeEvent {
                value,
                previous,
                records,
            })
        }
    }
}
