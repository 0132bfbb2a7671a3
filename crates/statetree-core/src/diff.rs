//! Structural leaf diff between two optional values.
//!
//! Used for computed cache transitions: the cumulative movement from the
//! previous cache to the next is expressed as one record per leaf path that
//! changed, with a single subsuming record where the kind changed.

use serde_json::Value;
use statetree_pointer::{Path, Step};

use crate::events::ChangeRecord;
use crate::node::NodeKind;

pub(crate) fn diff_values(prev: Option<&Value>, next: Option<&Value>) -> Vec<ChangeRecord> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    let mut types = Vec::new();
    walk(prev, next, &mut path, &mut types, &mut out);
    out
}

fn walk(
    prev: Option<&Value>,
    next: Option<&Value>,
    path: &mut Path,
    types: &mut Vec<NodeKind>,
    out: &mut Vec<ChangeRecord>,
) {
    match (prev, next) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            for (key, av) in a {
                path.push(Step::Key(key.clone()));
                types.push(NodeKind::Object);
                walk(Some(av), b.get(key), path, types, out);
                path.pop();
                types.pop();
            }
            for (key, bv) in b {
                if a.contains_key(key) {
                    continue;
                }
                path.push(Step::Key(key.clone()));
                types.push(NodeKind::Object);
                walk(None, Some(bv), path, types, out);
                path.pop();
                types.pop();
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for idx in 0..a.len().max(b.len()) {
                path.push(Step::Index(idx));
                types.push(NodeKind::Array);
                walk(a.get(idx), b.get(idx), path, types, out);
                path.pop();
                types.pop();
            }
        }
        (a, b) => {
            if a != b {
                out.push(ChangeRecord {
                    path: path.clone(),
                    path_types: types.clone(),
                    value_at_path: b.cloned(),
                    prev_at_path: a.cloned(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_produce_no_records() {
        let v = json!({"a": [1, {"b": true}]});
        assert!(diff_values(Some(&v), Some(&v)).is_empty());
    }

    #[test]
    fn leaf_change_is_one_record_with_container_kinds() {
        let a = json!({"a": [1, 2]});
        let b = json!({"a": [1, 5]});
        let records = diff_values(Some(&a), Some(&b));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, vec![Step::key("a"), Step::Index(1)]);
        assert_eq!(
            records[0].path_types,
            vec![NodeKind::Object, NodeKind::Array]
        );
        assert_eq!(records[0].prev_at_path, Some(json!(2)));
        assert_eq!(records[0].value_at_path, Some(json!(5)));
    }

    #[test]
    fn kind_change_is_one_subsuming_record() {
        let a = json!({"a": {"x": 1}});
        let b = json!({"a": 7});
        let records = diff_values(Some(&a), Some(&b));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, vec![Step::key("a")]);
        assert_eq!(records[0].prev_at_path, Some(json!({"x": 1})));
        assert_eq!(records[0].value_at_path, Some(json!(7)));
    }
}
