use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use serde_json::json;
use statetree_core::{ChangeEvent, ObserveOptions, Step, Store};

fn capture(store_events: &Rc<RefCell<Vec<ChangeEvent>>>) -> impl FnMut(&ChangeEvent) + 'static {
    let events = Rc::clone(store_events);
    move |ev| events.borrow_mut().push(ev.clone())
}

#[test]
fn a_batch_of_n_leaf_writes_delivers_one_event_with_n_records_in_write_order() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1, "b": 2, "c": 3}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    store.batch(|| {
        state.key("c").set(json!(30));
        state.key("a").set(json!(10));
        state.key("b").set(json!(20));
    });

    let events = events.borrow();
    assert_eq!(events.len(), 1, "one notification, not three");
    let records = &events[0].records;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].path, vec![Step::key("c")]);
    assert_eq!(records[1].path, vec![Step::key("a")]);
    assert_eq!(records[2].path, vec![Step::key("b")]);
    assert_eq!(events[0].previous, Some(json!({"a": 1, "b": 2, "c": 3})));
    assert_eq!(events[0].value, Some(json!({"a": 10, "b": 20, "c": 30})));
}

#[test]
fn a_write_outside_any_batch_is_an_implicit_single_write_batch() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    state.key("a").set(json!(2));
    assert_eq!(events.borrow().len(), 1);
    state.key("a").set(json!(3));
    assert_eq!(events.borrow().len(), 2);
}

#[test]
fn nested_batches_coalesce_into_the_outer_flush() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1, "b": 2}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    store.start_batch();
    state.key("a").set(json!(10));
    store.start_batch();
    state.key("b").set(json!(20));
    store.end_batch();
    assert!(events.borrow().is_empty(), "inner end must not flush");
    store.end_batch();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].records.len(), 2);
}

#[test]
fn end_batch_without_start_is_a_harmless_no_op() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    store.end_batch();
    store.end_batch();
    state.key("a").set(json!(2));
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn repeated_writes_to_one_path_coalesce_from_the_pre_batch_snapshot() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    store.batch(|| {
        state.key("a").set(json!(2));
        state.key("a").set(json!(3));
    });

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].records.len(), 1);
    assert_eq!(events[0].records[0].prev_at_path, Some(json!(1)));
    assert_eq!(events[0].records[0].value_at_path, Some(json!(3)));
    assert_eq!(events[0].previous, Some(json!({"a": 1})));
}

#[test]
fn a_batch_that_nets_out_to_no_change_stays_silent() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    store.batch(|| {
        state.key("a").set(json!(2));
        state.key("a").set(json!(1));
    });
    assert!(events.borrow().is_empty());
}

#[test]
fn handlers_on_one_node_fire_in_registration_order() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let order = Rc::new(RefCell::new(Vec::new()));
    let (o1, o2, o3) = (Rc::clone(&order), Rc::clone(&order), Rc::clone(&order));
    state.on_change(move |_| o1.borrow_mut().push("first"), ObserveOptions::default());
    state.on_change(move |_| o2.borrow_mut().push("second"), ObserveOptions::default());
    state.on_change(move |_| o3.borrow_mut().push("third"), ObserveOptions::default());

    state.key("a").set(json!(2));
    assert_eq!(order.borrow().as_slice(), &["first", "second", "third"]);
}

#[test]
fn unlisten_stops_delivery_and_reports_membership() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    let sub = state.on_change(capture(&events), ObserveOptions::default());

    state.key("a").set(json!(2));
    assert_eq!(events.borrow().len(), 1);

    assert!(state.unlisten(sub));
    assert!(!state.unlisten(sub), "second removal finds nothing");
    state.key("a").set(json!(3));
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn whole_tracking_delivers_one_subtree_record() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1, "b": 2}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::whole());

    store.batch(|| {
        state.key("a").set(json!(10));
        state.key("b").set(json!(20));
    });

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].records.len(), 1);
    assert_eq!(events[0].records[0].path, Vec::<Step>::new());
    assert_eq!(
        events[0].records[0].prev_at_path,
        Some(json!({"a": 1, "b": 2}))
    );
    assert_eq!(
        events[0].records[0].value_at_path,
        Some(json!({"a": 10, "b": 20}))
    );
}

#[test]
fn path_types_name_the_container_kind_at_each_segment() {
    use statetree_core::NodeKind;

    let store = Store::new();
    let state = store.observable(json!({"list": [{"done": false}]}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    state.key("list").index(0).key("done").set(json!(true));

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    let record = &events[0].records[0];
    assert_eq!(
        record.path,
        vec![Step::key("list"), Step::Index(0), Step::key("done")]
    );
    assert_eq!(
        record.path_types,
        vec![NodeKind::Object, NodeKind::Array, NodeKind::Object]
    );
}

#[test]
fn custom_equality_suppresses_changes_it_considers_equal() {
    let store = Store::new();
    let state = store.observable(json!({"temp": 20.0}));
    let events = Rc::new(RefCell::new(Vec::new()));
    // Treat sub-degree jitter as no change.
    let options = ObserveOptions::default().with_equality(|a, b| {
        match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < 1.0,
            _ => a == b,
        }
    });
    state.key("temp").on_change(capture(&events), options);

    state.key("temp").set(json!(20.4));
    assert!(events.borrow().is_empty(), "jitter below the threshold");

    state.key("temp").set(json!(25.0));
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn notifications_follow_batch_close_order() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    state.on_change(
        move |ev| seen2.borrow_mut().push(ev.value.clone()),
        ObserveOptions::default(),
    );

    store.batch(|| state.key("a").set(json!(2)));
    store.batch(|| state.key("a").set(json!(3)));

    assert_eq!(
        seen.borrow().as_slice(),
        &[Some(json!({"a": 2})), Some(json!({"a": 3}))]
    );
}

#[test]
fn a_panic_inside_a_batch_does_not_pin_the_nesting_counter() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1}));
    let events = Rc::new(RefCell::new(Vec::new()));
    state.on_change(capture(&events), ObserveOptions::default());

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        store.batch(|| {
            state.key("a").set(json!(2));
            panic!("write failed mid-batch");
        })
    }));
    assert!(outcome.is_err());

    // The counter is back at zero: the next write flushes normally and the
    // pre-panic record is delivered with it rather than being lost.
    state.key("a").set(json!(3));
    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].records.len(), 1);
    assert_eq!(events[0].records[0].prev_at_path, Some(json!(1)));
    assert_eq!(events[0].records[0].value_at_path, Some(json!(3)));
}

#[test]
fn writes_from_a_handler_are_delivered_in_a_following_notification() {
    let store = Store::new();
    let state = store.observable(json!({"a": 1, "echo": 0}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    let echo_target = state.key("echo");
    let fired = Rc::new(RefCell::new(false));
    let fired2 = Rc::clone(&fired);
    state.key("a").on_change(
        move |_| {
            if !*fired2.borrow() {
                *fired2.borrow_mut() = true;
                echo_target.set(json!(1));
            }
        },
        ObserveOptions::default(),
    );
    state.key("echo").on_change(
        move |ev| seen2.borrow_mut().push(ev.value.clone()),
        ObserveOptions::default(),
    );

    state.key("a").set(json!(2));
    assert_eq!(seen.borrow().as_slice(), &[Some(json!(1))]);
}
