use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use statetree_core::{NodeKind, ObserveOptions, Store, StoreError};

#[test]
fn observable_exposes_child_accessors_mirroring_the_initial_shape() {
    let store = Store::new();
    let state = store.observable(json!({
        "user": {"name": "ada", "tags": ["a", "b"]},
        "count": 1,
    }));

    assert_eq!(
        state.get(),
        Some(json!({"user": {"name": "ada", "tags": ["a", "b"]}, "count": 1}))
    );
    assert_eq!(state.key("user").key("name").get(), Some(json!("ada")));
    assert_eq!(state.key("user").key("tags").index(1).get(), Some(json!("b")));
    assert_eq!(state.key("count").get(), Some(json!(1)));
    assert_eq!(state.key("missing").get(), None);
    assert_eq!(state.key("user").key("tags").index(9).get(), None);
}

#[test]
fn pointer_accessors_agree_with_key_and_index_chains() {
    let store = Store::new();
    let state = store.observable(json!({"a": {"b": [10, 20]}}));

    let via_pointer = state.pointer("/a/b/1").unwrap();
    assert_eq!(via_pointer.get(), state.key("a").key("b").index(1).get());
    assert!(state.pointer("a/b").is_err());
}

#[test]
fn set_recomputes_node_kind_on_wholesale_replacement() {
    let store = Store::new();
    let state = store.observable(json!({"value": 1}));
    let value = state.key("value");

    assert_eq!(value.kind(), Some(NodeKind::Primitive));
    value.set(json!({"nested": true}));
    assert_eq!(value.kind(), Some(NodeKind::Object));
    assert_eq!(value.key("nested").get(), Some(json!(true)));
    value.set(json!([1, 2]));
    assert_eq!(value.kind(), Some(NodeKind::Array));
    value.set(json!(7));
    assert_eq!(value.kind(), Some(NodeKind::Primitive));
    assert_eq!(state.get(), Some(json!({"value": 7})));
}

#[test]
fn set_through_a_missing_path_materializes_intermediate_objects() {
    let store = Store::new();
    let state = store.observable(json!({}));

    state.key("a").key("b").set(json!(1));
    assert_eq!(state.get(), Some(json!({"a": {"b": 1}})));

    // An index step into an existing object addresses the stringified key.
    state.key("a").index(2).set(json!("x"));
    assert_eq!(state.key("a").get(), Some(json!({"b": 1, "2": "x"})));
}

#[test]
fn set_an_index_on_an_absent_value_builds_a_padded_array() {
    let store = Store::new();
    let state = store.observable(json!({}));

    state.key("list").index(2).set(json!(9));
    assert_eq!(state.key("list").get(), Some(json!([null, null, 9])));
}

#[test]
fn assign_merges_into_object_shaped_values() {
    let store = Store::new();
    let state = store.observable(json!({"user": {"name": "ada"}}));

    state.key("user").assign(json!({"age": 41})).unwrap();
    assert_eq!(
        state.key("user").get(),
        Some(json!({"name": "ada", "age": 41}))
    );

    // Merging over an existing key replaces it.
    state.key("user").assign(json!({"name": "grace"})).unwrap();
    assert_eq!(state.key("user").key("name").get(), Some(json!("grace")));

    // Absent target: assign establishes the partial.
    state.key("settings").assign(json!({"theme": "dark"})).unwrap();
    assert_eq!(state.key("settings").get(), Some(json!({"theme": "dark"})));

    assert_eq!(
        state.key("user").key("name").assign(json!({"x": 1})),
        Err(StoreError::NotAnObject)
    );
    assert_eq!(
        state.key("user").assign(json!(5)),
        Err(StoreError::NotAnObject)
    );
}

#[test]
fn delete_removes_object_keys_and_shifts_array_elements() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1, "b": 2, "list": [10, 20, 30]}));

    state.key("a").delete().unwrap();
    assert_eq!(state.get(), Some(json!({"b": 2, "list": [10, 20, 30]})));
    assert_eq!(state.key("a").get(), None);

    state.key("list").index(0).delete().unwrap();
    assert_eq!(state.key("list").get(), Some(json!([20, 30])));

    // Deleting a key that does not exist is a no-op.
    state.key("ghost").delete().unwrap();
    assert_eq!(state.delete(), Err(StoreError::DeleteRoot));
}

#[test]
fn deleted_key_returning_reuses_the_same_listener() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    state.key("a").on_change(
        move |ev| seen2.borrow_mut().push((ev.previous.clone(), ev.value.clone())),
        ObserveOptions::default(),
    );

    state.key("a").delete().unwrap();
    state.key("a").set(json!(2));

    let events = seen.borrow();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], (Some(json!(1)), None));
    assert_eq!(events[1], (None, Some(json!(2))));
}

#[test]
fn listener_on_child_survives_wholesale_parent_replacement() {
    let store = Store::new();
    let state = store.observable(json!({"user": {"name": "ada", "role": "eng"}}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    state.key("user").key("name").on_change(
        move |ev| seen2.borrow_mut().push(ev.value.clone()),
        ObserveOptions::default(),
    );

    state.key("user").set(json!({"name": "grace", "role": "eng"}));
    assert_eq!(seen.borrow().as_slice(), &[Some(json!("grace"))]);

    // Same value for the observed key: the listener stays quiet.
    state.key("user").set(json!({"name": "grace", "role": "ops"}));
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn kind_change_notifies_listeners_on_subsumed_descendants() {
    let store = Store::new();
    let state = store.observable(json!({"user": {"name": "ada"}}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    state.key("user").key("name").on_change(
        move |ev| seen2.borrow_mut().push((ev.previous.clone(), ev.value.clone())),
        ObserveOptions::default(),
    );

    // The object collapses to a primitive: the name node is subsumed.
    state.key("user").set(json!(0));
    assert_eq!(seen.borrow().as_slice(), &[(Some(json!("ada")), None)]);
}

#[test]
fn setting_an_equal_value_produces_no_notification() {
    let store = Store::new();
    let state = store.observable(json!({"a": {"b": 1}}));
    let seen = Rc::new(RefCell::new(0usize));
    let seen2 = Rc::clone(&seen);
    state.on_change(move |_| *seen2.borrow_mut() += 1, ObserveOptions::default());

    state.key("a").set(json!({"b": 1}));
    state.set(json!({"a": {"b": 1}}));
    assert_eq!(*seen.borrow(), 0);
}
