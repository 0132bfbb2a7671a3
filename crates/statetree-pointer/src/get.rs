//! Read and navigate `serde_json::Value` documents by typed path.

use serde_json::Value;

use crate::types::Step;

/// Walk a document down a path, returning the referenced value.
///
/// `Append` steps never resolve (they address a position, not a value).
///
/// ```
/// use statetree_pointer::{value_at, Step};
///
/// let doc = serde_json::json!({"a": [10, 20]});
/// let path = [Step::key("a"), Step::Index(1)];
/// assert_eq!(value_at(&doc, &path), Some(&serde_json::json!(20)));
/// assert_eq!(value_at(&doc, &[Step::key("missing")]), None);
/// ```
pub fn value_at<'a>(value: &'a Value, path: &[Step]) -> Option<&'a Value> {
    let mut cur = value;
    for step in path {
        cur = match (step, cur) {
            (Step::Key(key), Value::Object(map)) => map.get(key)?,
            (Step::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Mutable variant of [`value_at`].
pub fn value_at_mut<'a>(value: &'a mut Value, path: &[Step]) -> Option<&'a mut Value> {
    let mut cur = value;
    for step in path {
        cur = match (step, cur) {
            (Step::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (Step::Index(idx), Value::Array(arr)) => arr.get_mut(*idx)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Split a non-empty path into its parent prefix and leaf step.
pub fn split_parent(path: &[Step]) -> Option<(&[Step], &Step)> {
    if path.is_empty() {
        return None;
    }
    let (parent, leaf) = path.split_at(path.len() - 1);
    Some((parent, &leaf[0]))
}
