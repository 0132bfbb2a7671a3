//! The observable node tree: bodies, reconciliation, and value views.
//!
//! Mutations are planned against the current tree (records and touched nodes
//! are computed while nothing has been applied yet, so every previous-value
//! snapshot predates the whole write) and then applied as a flat op list.
//! Reconciliation is identity-stable: a surviving object key or array index
//! keeps its node, so listeners and dependency edges survive wholesale
//! parent replacement.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use statetree_pointer::{Path, Step};

use crate::events::ListenerEntry;

/// Stable identity of a node (value node or computed node) within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u64);

/// Shape of the value a node currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    Primitive,
    /// An asynchronous source that has not settled yet.
    Pending,
}

pub(crate) enum NodeBody {
    /// Primitive value: null, bool, number, or string.
    Leaf(Value),
    Object(IndexMap<String, NodeId>),
    Array(Vec<NodeId>),
    Pending,
    /// Absent value. Key children may be pre-materialized so that listeners
    /// and dependency identities exist before the value does.
    Void(IndexMap<String, NodeId>),
}

pub(crate) struct Node {
    pub parent: Option<NodeId>,
    pub body: NodeBody,
    pub listeners: BTreeMap<u64, ListenerEntry>,
}

impl Node {
    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }
}

/// One planned record: the minimal description of one mutation, with the
/// absolute path from the tree root. `node` is the existing node the record
/// is about; fresh inserts have no node yet and carry the parent as `anchor`.
pub(crate) struct PlannedChange {
    pub node: Option<NodeId>,
    pub anchor: NodeId,
    pub path: Path,
    pub path_types: Vec<NodeKind>,
    pub prev: Option<Value>,
    pub next: Option<Value>,
}

pub(crate) enum ApplyOp {
    SetLeaf { node: NodeId, value: Value },
    /// Establishment or kind change: replace the body wholesale, reusing
    /// object-key child identities where the key survives.
    Rebuild { node: NodeId, value: Value },
    /// Key removal: the node stays (listeners survive) but holds no value.
    VoidNode { node: NodeId },
    ObjInsert { parent: NodeId, key: String, value: Value },
    ArrPush { parent: NodeId, value: Value },
    ArrTruncate { parent: NodeId, len: usize },
}

#[derive(Default)]
pub(crate) struct Plan {
    pub records: Vec<PlannedChange>,
    pub touched: BTreeSet<NodeId>,
    pub ops: Vec<ApplyOp>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.ops.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct Tree {
    pub nodes: BTreeMap<NodeId, Node>,
    next_id: u64,
}

impl Tree {
    pub fn alloc_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    pub fn alloc_node(&mut self, parent: Option<NodeId>, body: NodeBody) -> NodeId {
        let id = self.alloc_id();
        self.nodes.insert(
            id,
            Node {
                parent,
                body,
                listeners: BTreeMap::new(),
            },
        );
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        match &self.node(id)?.body {
            NodeBody::Leaf(_) => Some(NodeKind::Primitive),
            NodeBody::Object(_) => Some(NodeKind::Object),
            NodeBody::Array(_) => Some(NodeKind::Array),
            NodeBody::Pending => Some(NodeKind::Pending),
            NodeBody::Void(_) => None,
        }
    }

    /// Reconstruct the value a node currently holds. Void and unsettled
    /// pending nodes hold none; void object members are omitted from their
    /// parent, void array elements read as null.
    pub fn node_value(&self, id: NodeId) -> Option<Value> {
        match &self.node(id)?.body {
            NodeBody::Leaf(v) => Some(v.clone()),
            NodeBody::Object(children) => {
                let mut map = Map::new();
                for (key, child) in children {
                    if let Some(v) = self.node_value(*child) {
                        map.insert(key.clone(), v);
                    }
                }
                Some(Value::Object(map))
            }
            NodeBody::Array(children) => Some(Value::Array(
                children
                    .iter()
                    .map(|c| self.node_value(*c).unwrap_or(Value::Null))
                    .collect(),
            )),
            NodeBody::Pending | NodeBody::Void(_) => None,
        }
    }

    fn step_of(&self, parent: &Node, child: NodeId) -> Option<Step> {
        match &parent.body {
            NodeBody::Object(children) | NodeBody::Void(children) => children
                .iter()
                .find(|(_, id)| **id == child)
                .map(|(key, _)| Step::Key(key.clone())),
            NodeBody::Array(children) => children
                .iter()
                .position(|id| *id == child)
                .map(Step::Index),
            _ => None,
        }
    }

    /// Absolute path and per-segment container kinds of a node, walking the
    /// parent chain up to its root.
    pub fn locate(&self, id: NodeId) -> (NodeId, Path, Vec<NodeKind>) {
        let mut path = Vec::new();
        let mut types = Vec::new();
        let mut cur = id;
        while let Some(node) = self.node(cur) {
            let Some(parent_id) = node.parent else { break };
            let Some(parent) = self.node(parent_id) else {
                break;
            };
            let Some(step) = self.step_of(parent, cur) else {
                break;
            };
            path.push(step);
            types.push(match parent.body {
                NodeBody::Array(_) => NodeKind::Array,
                _ => NodeKind::Object,
            });
            cur = parent_id;
        }
        path.reverse();
        types.reverse();
        (cur, path, types)
    }

    /// Walk down from `root`, materializing void key children so the deepest
    /// reachable node has a stable identity. Returns that node and how many
    /// steps were consumed; the remainder could not be given a node (index
    /// past the end of an array, or a path through a primitive).
    pub fn resolve_or_materialize(&mut self, root: NodeId, path: &[Step]) -> (NodeId, usize) {
        let mut cur = root;
        let mut consumed = 0;
        for step in path {
            enum Next {
                Child(NodeId),
                Create(String),
                Stop,
            }
            let next = match self.node(cur).map(|n| &n.body) {
                Some(NodeBody::Object(children)) => {
                    let key = match step {
                        Step::Key(k) => k.clone(),
                        Step::Index(n) => n.to_string(),
                        Step::Append => return (cur, consumed),
                    };
                    match children.get(&key) {
                        Some(child) => Next::Child(*child),
                        None => Next::Create(key),
                    }
                }
                // An absent value only materializes key children; an index
                // step means the write path should build an array instead.
                Some(NodeBody::Void(children)) => match step {
                    Step::Key(k) => match children.get(k) {
                        Some(child) => Next::Child(*child),
                        None => Next::Create(k.clone()),
                    },
                    Step::Index(_) | Step::Append => Next::Stop,
                },
                Some(NodeBody::Array(children)) => {
                    let idx = match step {
                        Step::Index(n) => Some(*n),
                        Step::Key(k) => k.parse::<usize>().ok(),
                        Step::Append => None,
                    };
                    match idx.and_then(|i| children.get(i)) {
                        Some(child) => Next::Child(*child),
                        None => Next::Stop,
                    }
                }
                _ => Next::Stop,
            };
            match next {
                Next::Child(child) => cur = child,
                Next::Create(key) => {
                    let child = self.alloc_node(Some(cur), NodeBody::Void(IndexMap::new()));
                    match self.node_mut(cur).map(|n| &mut n.body) {
                        Some(NodeBody::Object(children)) | Some(NodeBody::Void(children)) => {
                            children.insert(key, child);
                        }
                        _ => {}
                    }
                    cur = child;
                }
                Next::Stop => return (cur, consumed),
            }
            consumed += 1;
        }
        (cur, consumed)
    }

    /// Lift a write anchored at a node whose ancestors are still void up to
    /// the highest void ancestor, wrapping the target value accordingly.
    /// Establishment then happens at the highest key that actually appears,
    /// and the void chain materializes as objects in one step.
    pub fn lift_void_anchor(&self, mut anchor: NodeId, mut target: Value) -> (NodeId, Value) {
        while let Some(parent_id) = self.node(anchor).and_then(|n| n.parent) {
            let Some(parent) = self.node(parent_id) else {
                break;
            };
            if !matches!(parent.body, NodeBody::Void(_)) {
                break;
            }
            let Some(Step::Key(key)) = self.step_of(parent, anchor) else {
                break;
            };
            let mut map = Map::new();
            map.insert(key, target);
            target = Value::Object(map);
            anchor = parent_id;
        }
        (anchor, target)
    }

    /// Collect every existing node in a subtree, including `id` itself.
    pub fn subtree_ids(&self, id: NodeId, out: &mut BTreeSet<NodeId>) {
        out.insert(id);
        if let Some(node) = self.node(id) {
            match &node.body {
                NodeBody::Object(children) | NodeBody::Void(children) => {
                    for child in children.values() {
                        self.subtree_ids(*child, out);
                    }
                }
                NodeBody::Array(children) => {
                    for child in children {
                        self.subtree_ids(*child, out);
                    }
                }
                _ => {}
            }
        }
    }

    /// Listener-bearing strict descendants of `id`, with paths relative to it.
    pub fn descendant_listeners(&self, id: NodeId) -> Vec<(NodeId, Path)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.descend_listeners(id, &mut prefix, &mut out, true);
        out
    }

    fn descend_listeners(
        &self,
        id: NodeId,
        prefix: &mut Path,
        out: &mut Vec<(NodeId, Path)>,
        is_root: bool,
    ) {
        let Some(node) = self.node(id) else { return };
        if !is_root && node.has_listeners() {
            out.push((id, prefix.clone()));
        }
        match &node.body {
            NodeBody::Object(children) | NodeBody::Void(children) => {
                for (key, child) in children {
                    prefix.push(Step::Key(key.clone()));
                    self.descend_listeners(*child, prefix, out, false);
                    prefix.pop();
                }
            }
            NodeBody::Array(children) => {
                for (idx, child) in children.iter().enumerate() {
                    prefix.push(Step::Index(idx));
                    self.descend_listeners(*child, prefix, out, false);
                    prefix.pop();
                }
            }
            _ => {}
        }
    }

    // ---- planning ----

    /// Plan the reconciliation of `anchor` toward `next` without mutating
    /// anything. Records carry previous values read from the untouched tree.
    pub fn plan_reconcile(&self, anchor: NodeId, next: &Value) -> Plan {
        let mut plan = Plan::default();
        let (_, mut path, mut types) = self.locate(anchor);
        self.plan_walk(anchor, next, &mut path, &mut types, &mut plan);
        plan
    }

    fn plan_walk(
        &self,
        id: NodeId,
        next: &Value,
        path: &mut Path,
        types: &mut Vec<NodeKind>,
        plan: &mut Plan,
    ) {
        let Some(node) = self.node(id) else { return };
        match (&node.body, next) {
            (NodeBody::Leaf(old), v) if !v.is_object() && !v.is_array() => {
                if old != v {
                    plan.records.push(PlannedChange {
                        node: Some(id),
                        anchor: id,
                        path: path.clone(),
                        path_types: types.clone(),
                        prev: Some(old.clone()),
                        next: Some(v.clone()),
                    });
                    plan.touched.insert(id);
                    plan.ops.push(ApplyOp::SetLeaf {
                        node: id,
                        value: v.clone(),
                    });
                }
            }
            (NodeBody::Object(children), Value::Object(map)) => {
                for (key, child) in children {
                    path.push(Step::Key(key.clone()));
                    types.push(NodeKind::Object);
                    match map.get(key) {
                        Some(nv) => self.plan_walk(*child, nv, path, types, plan),
                        None => self.plan_removal(*child, path, types, plan),
                    }
                    path.pop();
                    types.pop();
                }
                for (key, nv) in map {
                    if !children.contains_key(key) {
                        let mut p = path.clone();
                        p.push(Step::Key(key.clone()));
                        let mut t = types.clone();
                        t.push(NodeKind::Object);
                        plan.records.push(PlannedChange {
                            node: None,
                            anchor: id,
                            path: p,
                            path_types: t,
                            prev: None,
                            next: Some(nv.clone()),
                        });
                        plan.ops.push(ApplyOp::ObjInsert {
                            parent: id,
                            key: key.clone(),
                            value: nv.clone(),
                        });
                    }
                }
            }
            (NodeBody::Array(children), Value::Array(arr)) => {
                let common = children.len().min(arr.len());
                for (idx, child) in children.iter().take(common).enumerate() {
                    path.push(Step::Index(idx));
                    types.push(NodeKind::Array);
                    self.plan_walk(*child, &arr[idx], path, types, plan);
                    path.pop();
                    types.pop();
                }
                for (idx, nv) in arr.iter().enumerate().skip(children.len()) {
                    let mut p = path.clone();
                    p.push(Step::Index(idx));
                    let mut t = types.clone();
                    t.push(NodeKind::Array);
                    plan.records.push(PlannedChange {
                        node: None,
                        anchor: id,
                        path: p,
                        path_types: t,
                        prev: None,
                        next: Some(nv.clone()),
                    });
                    plan.ops.push(ApplyOp::ArrPush {
                        parent: id,
                        value: nv.clone(),
                    });
                }
                if children.len() > arr.len() {
                    for (idx, child) in children.iter().enumerate().skip(arr.len()) {
                        path.push(Step::Index(idx));
                        types.push(NodeKind::Array);
                        self.plan_removal(*child, path, types, plan);
                        path.pop();
                        types.pop();
                    }
                    plan.ops.push(ApplyOp::ArrTruncate {
                        parent: id,
                        len: arr.len(),
                    });
                }
            }
            _ => {
                // Establishment (void/pending) or kind change.
                let prev = self.node_value(id);
                if prev.as_ref() != Some(next) {
                    plan.records.push(PlannedChange {
                        node: Some(id),
                        anchor: id,
                        path: path.clone(),
                        path_types: types.clone(),
                        prev,
                        next: Some(next.clone()),
                    });
                    self.subtree_ids(id, &mut plan.touched);
                    plan.ops.push(ApplyOp::Rebuild {
                        node: id,
                        value: next.clone(),
                    });
                }
            }
        }
    }

    fn plan_removal(&self, id: NodeId, path: &Path, types: &[NodeKind], plan: &mut Plan) {
        if matches!(self.node(id).map(|n| &n.body), Some(NodeBody::Void(_)) | None) {
            return;
        }
        plan.records.push(PlannedChange {
            node: Some(id),
            anchor: id,
            path: path.clone(),
            path_types: types.to_vec(),
            prev: self.node_value(id),
            next: None,
        });
        self.subtree_ids(id, &mut plan.touched);
        plan.ops.push(ApplyOp::VoidNode { node: id });
    }

    // ---- application ----

    pub fn apply_plan(&mut self, plan: &Plan) {
        for op in &plan.ops {
            match op {
                ApplyOp::SetLeaf { node, value } => {
                    if let Some(n) = self.node_mut(*node) {
                        n.body = NodeBody::Leaf(value.clone());
                    }
                }
                ApplyOp::Rebuild { node, value } => self.rebuild_node(*node, value),
                ApplyOp::VoidNode { node } => self.void_subtree(*node),
                ApplyOp::ObjInsert { parent, key, value } => {
                    let child = self.build_subtree(Some(*parent), value);
                    if let Some(NodeBody::Object(children)) =
                        self.node_mut(*parent).map(|n| &mut n.body)
                    {
                        children.insert(key.clone(), child);
                    }
                }
                ApplyOp::ArrPush { parent, value } => {
                    let child = self.build_subtree(Some(*parent), value);
                    if let Some(NodeBody::Array(children)) =
                        self.node_mut(*parent).map(|n| &mut n.body)
                    {
                        children.push(child);
                    }
                }
                ApplyOp::ArrTruncate { parent, len } => {
                    let removed: Vec<NodeId> = match self.node_mut(*parent).map(|n| &mut n.body) {
                        Some(NodeBody::Array(children)) if children.len() > *len => {
                            children.drain(*len..).collect()
                        }
                        _ => Vec::new(),
                    };
                    for id in removed {
                        self.remove_subtree(id);
                    }
                }
            }
        }
    }

    pub fn build_subtree(&mut self, parent: Option<NodeId>, value: &Value) -> NodeId {
        let id = self.alloc_node(parent, NodeBody::Void(IndexMap::new()));
        let body = match value {
            Value::Object(map) => {
                let mut children = IndexMap::new();
                for (key, v) in map {
                    children.insert(key.clone(), self.build_subtree(Some(id), v));
                }
                NodeBody::Object(children)
            }
            Value::Array(arr) => NodeBody::Array(
                arr.iter()
                    .map(|v| self.build_subtree(Some(id), v))
                    .collect(),
            ),
            v => NodeBody::Leaf(v.clone()),
        };
        if let Some(node) = self.node_mut(id) {
            node.body = body;
        }
        id
    }

    /// Force-set a node's body from a value, reusing object-key child
    /// identities where the key survives so listeners and dependency edges
    /// are preserved across kind changes back to object shape.
    fn rebuild_node(&mut self, id: NodeId, value: &Value) {
        let old_body = match self.node_mut(id) {
            Some(node) => std::mem::replace(&mut node.body, NodeBody::Void(IndexMap::new())),
            None => return,
        };
        match value {
            Value::Object(map) => {
                let old_children = match old_body {
                    NodeBody::Object(children) | NodeBody::Void(children) => children,
                    NodeBody::Array(children) => {
                        for child in children {
                            self.remove_subtree(child);
                        }
                        IndexMap::new()
                    }
                    _ => IndexMap::new(),
                };
                let mut children = IndexMap::new();
                for (key, child) in old_children {
                    match map.get(&key) {
                        Some(nv) => self.rebuild_node(child, nv),
                        None => self.void_subtree(child),
                    }
                    children.insert(key, child);
                }
                for (key, nv) in map {
                    if !children.contains_key(key) {
                        children.insert(key.clone(), self.build_subtree(Some(id), nv));
                    }
                }
                if let Some(node) = self.node_mut(id) {
                    node.body = NodeBody::Object(children);
                }
            }
            Value::Array(arr) => {
                self.drop_body_children(old_body);
                let children: Vec<NodeId> = arr
                    .iter()
                    .map(|v| self.build_subtree(Some(id), v))
                    .collect();
                if let Some(node) = self.node_mut(id) {
                    node.body = NodeBody::Array(children);
                }
            }
            v => {
                self.drop_body_children(old_body);
                if let Some(node) = self.node_mut(id) {
                    node.body = NodeBody::Leaf(v.clone());
                }
            }
        }
    }

    fn drop_body_children(&mut self, body: NodeBody) {
        match body {
            NodeBody::Object(children) | NodeBody::Void(children) => {
                for child in children.values() {
                    self.remove_subtree(*child);
                }
            }
            NodeBody::Array(children) => {
                for child in children {
                    self.remove_subtree(child);
                }
            }
            _ => {}
        }
    }

    fn void_subtree(&mut self, id: NodeId) {
        let body = match self.node_mut(id) {
            Some(node) => std::mem::replace(&mut node.body, NodeBody::Void(IndexMap::new())),
            None => return,
        };
        match body {
            NodeBody::Object(children) | NodeBody::Void(children) => {
                for child in children.values() {
                    self.void_subtree(*child);
                }
                if let Some(node) = self.node_mut(id) {
                    node.body = NodeBody::Void(children);
                }
            }
            NodeBody::Array(children) => {
                for child in children {
                    self.remove_subtree(child);
                }
            }
            _ => {}
        }
    }

    fn remove_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            self.drop_body_children(node.body);
        }
    }
}

/// Write `target` into `base` at `path`, materializing intermediate objects
/// and padding arrays with nulls.
pub(crate) fn set_into(base: &mut Value, path: &[Step], target: Value) {
    let Some((step, rest)) = path.split_first() else {
        *base = target;
        return;
    };
    match step {
        Step::Key(key) => {
            if !base.is_object() {
                *base = Value::Object(Map::new());
            }
            if let Some(map) = base.as_object_mut() {
                let slot = map.entry(key.clone()).or_insert(Value::Null);
                set_into(slot, rest, target);
            }
        }
        Step::Index(idx) => {
            if !base.is_array() {
                *base = Value::Array(Vec::new());
            }
            if let Some(arr) = base.as_array_mut() {
                while arr.len() <= *idx {
                    arr.push(Value::Null);
                }
                set_into(&mut arr[*idx], rest, target);
            }
        }
        Step::Append => {
            if !base.is_array() {
                *base = Value::Array(Vec::new());
            }
            if let Some(arr) = base.as_array_mut() {
                arr.push(Value::Null);
                let last = arr.len() - 1;
                set_into(&mut arr[last], rest, target);
            }
        }
    }
}
