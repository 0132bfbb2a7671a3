//! Change records, notification events, and listener bookkeeping.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use statetree_pointer::Path;

use crate::node::NodeKind;

/// Diff granularity for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tracking {
    /// One record describing the whole-subtree movement (`path = []`).
    Whole,
    /// One record per leaf path that actually changed value.
    #[default]
    Leaves,
}

/// Equality used to decide whether a path "actually changed".
pub type Equality = Rc<dyn Fn(&Value, &Value) -> bool>;

/// Per-listener options for [`on_change`](crate::Observable::on_change).
#[derive(Clone, Default)]
pub struct ObserveOptions {
    pub tracking: Tracking,
    /// Custom change predicate; defaults to value equality.
    pub equality: Option<Equality>,
}

impl ObserveOptions {
    pub fn whole() -> Self {
        Self {
            tracking: Tracking::Whole,
            ..Self::default()
        }
    }

    pub fn leaves() -> Self {
        Self {
            tracking: Tracking::Leaves,
            ..Self::default()
        }
    }

    pub fn with_equality(mut self, eq: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        self.equality = Some(Rc::new(eq));
        self
    }
}

/// One path-addressed before/after pair, relative to the listening node.
///
/// `None` endpoints denote absence (a key that did not or no longer exists,
/// or an asynchronous source that has not settled).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub path: Path,
    /// Container kind traversed at each path segment.
    pub path_types: Vec<NodeKind>,
    pub value_at_path: Option<Value>,
    pub prev_at_path: Option<Value>,
}

/// Delivered to a listener once per flushed batch that touched its node.
///
/// `previous` is the snapshot from immediately before the batch first touched
/// the node, so `records` describe the cumulative movement from `previous`
/// to `value` in write order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub value: Option<Value>,
    pub previous: Option<Value>,
    pub records: Vec<ChangeRecord>,
}

/// Handle returned from listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

pub(crate) type Handler = Rc<RefCell<Box<dyn FnMut(&ChangeEvent)>>>;

/// A registered listener. `scope` narrows the listener to a sub-path of the
/// node it is attached to (used when the exact node cannot be materialized,
/// and for accessors into computed values).
#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub scope: Path,
    pub tracking: Tracking,
    pub equality: Equality,
    pub handler: Handler,
}

pub(crate) fn default_equality() -> Equality {
    Rc::new(|a: &Value, b: &Value| a == b)
}

pub(crate) fn opt_eq(eq: &Equality, a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (**eq)(a, b),
        _ => false,
    }
}
