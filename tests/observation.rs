//! Change observation against a live stack.

use crossbeam_channel::{unbounded, Receiver};
use futures::executor::block_on;
use futures::StreamExt;
use objstack::{
    ChangeObserver, ChangeStream, CoreStack, EntityNameFilter, Entity, ExecutionQueue,
    ObjectId, ObjectIdentityFilter, ObservationMode, ObservedChanges, Properties, StackConfig,
};
use proptest::prelude::*;
use serde_json::json;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

struct Widget;

impl Entity for Widget {
    const ENTITY_NAME: &'static str = "Widget";
}

struct Gadget;

impl Entity for Gadget {
    const ENTITY_NAME: &'static str = "Gadget";
}

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn test_stack(dir: &TempDir) -> CoreStack {
    let model_path = dir.path().join("model.json");
    fs::write(
        &model_path,
        r#"{"entities": [
            {"name": "Widget", "attributes": ["name"]},
            {"name": "Gadget", "attributes": ["label"]}
        ]}"#,
    )
    .unwrap();
    CoreStack::new(StackConfig::new(model_path, dir.path().join("data"), "Shop"))
}

fn named(name: &str) -> Properties {
    let mut props = Properties::new();
    props.insert("name".into(), json!(name));
    props
}

fn recording_handler() -> (
    impl Fn(&ObservedChanges) + Send + Sync + 'static,
    Receiver<ObservedChanges>,
) {
    let (tx, rx) = unbounded();
    let handler = move |changes: &ObservedChanges| {
        let _ = tx.send(changes.clone());
    };
    (handler, rx)
}

// --- Entity observers ---

#[test]
fn test_one_notification_per_block_with_only_matching_entities() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_background_context();

    let (handler, rx) = recording_handler();
    let _observer =
        stack.observe_entity::<Widget, _>(ObservationMode::single(&context), false, handler);

    context
        .perform_and_wait(|ctx| {
            for i in 0..3 {
                ctx.insert("Widget", named(&format!("widget-{i}")));
            }
            for i in 0..2 {
                let mut props = Properties::new();
                props.insert("label".into(), json!(i));
                ctx.insert("Gadget", props);
            }
        })
        .unwrap();

    let changes = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(changes.inserted().len(), 3);
    assert!(changes.inserted().iter().all(|id| id.entity() == "Widget"));
    assert!(changes.updated().is_empty());
    assert!(changes.deleted().is_empty());
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn test_parent_notifies_with_durable_ids_after_save() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let main = stack.main_context();
    let context = stack.create_temporary_background_context();

    let (handler, rx) = recording_handler();
    let _observer =
        stack.observe_entity::<Widget, _>(ObservationMode::single(&main), false, handler);

    context
        .perform_and_wait(|ctx| {
            ctx.insert("Widget", named("saved"));
        })
        .unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());

    assert!(block_on(stack.save_async(&context, true)));
    let changes = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(changes.inserted().len(), 1);
    assert!(changes.inserted().iter().all(|id| !id.is_temporary()));
}

#[test]
fn test_fire_initially_then_real_changes() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_main_context();

    let (handler, rx) = recording_handler();
    let _observer =
        stack.observe_entity::<Widget, _>(ObservationMode::AllContexts, true, handler);

    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    context
        .perform_and_wait(|ctx| {
            ctx.insert("Widget", named("late"));
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().inserted().len(), 1);
}

#[test]
fn test_default_delivery_queue_is_main_queue() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let observer = stack.observe_entity::<Widget, _>(ObservationMode::AllContexts, false, |_| {});
    assert_eq!(observer.queue(), stack.main_queue());
}

#[test]
fn test_dropped_observer_stops_delivery() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_background_context();

    let (handler, rx) = recording_handler();
    let observer = stack.observe_entity::<Widget, _>(ObservationMode::AllContexts, false, handler);
    assert_eq!(stack.hub().registration_count(), 1);
    drop(observer);
    assert_eq!(stack.hub().registration_count(), 0);

    context
        .perform_and_wait(|ctx| {
            ctx.insert("Widget", named("unseen"));
        })
        .unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn test_multiple_contexts_mode() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let first = stack.create_temporary_background_context();
    let second = stack.create_temporary_background_context();
    let ignored = stack.create_temporary_background_context();

    let (handler, rx) = recording_handler();
    let _observer = stack.observe_entity::<Widget, _>(
        ObservationMode::multiple(&[first.clone(), second.clone()]),
        false,
        handler,
    );
    assert_eq!(stack.hub().registration_count(), 2);

    for context in [&ignored, &first, &second] {
        context
            .perform_and_wait(|ctx| {
                ctx.insert("Widget", named("w"));
            })
            .unwrap();
    }

    assert!(rx.recv_timeout(WAIT).is_ok());
    assert!(rx.recv_timeout(WAIT).is_ok());
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn test_undo_is_reported_to_observers() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let main = stack.main_context();

    let (handler, rx) = recording_handler();
    let _observer =
        stack.observe_entity::<Widget, _>(ObservationMode::single(&main), false, handler);

    let id = main
        .perform_and_wait(|ctx| ctx.insert("Widget", named("fleeting")).object_id())
        .unwrap();
    let inserted = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(inserted.inserted().len(), 1);
    assert!(inserted.inserted().contains(&id));

    assert!(main.perform_and_wait(|ctx| ctx.undo()).unwrap());
    let undone = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(undone.deleted().len(), 1);
    assert!(undone.deleted().contains(&id));
    assert!(undone.inserted().is_empty());
    assert!(!main.has_changes());
}

// --- Publisher and stream ---

#[test]
fn test_publisher_multicasts_to_subscribers() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_background_context();

    let publisher = stack.publish_entity_changes::<Gadget>(ObservationMode::single(&context));
    let first = publisher.subscribe();
    let second = publisher.subscribe();

    context
        .perform_and_wait(|ctx| {
            ctx.insert("Widget", named("skip"));
        })
        .unwrap();
    context
        .perform_and_wait(|ctx| {
            ctx.insert("Gadget", Properties::new());
        })
        .unwrap();

    for subscription in [&first, &second] {
        let changes = subscription.recv_timeout(WAIT).unwrap();
        assert_eq!(changes.inserted().len(), 1);
        assert!(subscription.try_recv().is_none());
    }

    drop(first);
    drop(second);
    assert_eq!(stack.hub().registration_count(), 0);
}

#[test]
fn test_stream_yields_updates_and_deletes() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_background_context();
    let mut stream = stack.entity_changes::<Widget>(ObservationMode::single(&context));

    let id = context
        .perform_and_wait(|ctx| ctx.insert("Widget", named("a")).object_id())
        .unwrap();
    let inserted = block_on(stream.next()).unwrap();
    assert!(inserted.inserted().contains(&id));

    let update_id = id.clone();
    context
        .perform_and_wait(move |ctx| ctx.set(&update_id, "name", json!("b")))
        .unwrap()
        .unwrap();
    let updated = block_on(stream.next()).unwrap();
    assert!(updated.updated().contains(&id));

    let delete_id = id.clone();
    context
        .perform_and_wait(move |ctx| ctx.delete(&delete_id))
        .unwrap()
        .unwrap();
    let deleted = block_on(stream.next()).unwrap();
    assert_eq!(deleted.deleted().len(), 1);
}

#[test]
fn test_cancelled_stream_leaves_no_registration() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);

    let stream = stack.entity_changes::<Widget>(ObservationMode::AllContexts);
    assert_eq!(stack.hub().registration_count(), 1);
    drop(stream);
    assert_eq!(stack.hub().registration_count(), 0);

    let context = stack.create_temporary_background_context();
    let mut stream = ChangeStream::new(
        stack.hub(),
        ObservationMode::single(&context),
        EntityNameFilter::new(["Widget"]),
    );
    context
        .perform_and_wait(|ctx| {
            ctx.insert("Widget", named("one"));
        })
        .unwrap();
    assert!(block_on(stream.next()).is_some());
    drop(stream);
    assert_eq!(stack.hub().registration_count(), 0);
}

// --- Object observers ---

#[test]
#[should_panic(expected = "temporary object identity")]
fn test_identity_filter_rejects_temporary_ids() {
    ObjectIdentityFilter::new([ObjectId::temporary("Widget")]);
}

#[test]
fn test_identity_filter_matches_only_upgraded_objects() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let context = stack.create_temporary_background_context();

    let (watched, all) = context
        .perform_and_wait(|ctx| {
            let objects: Vec<ObjectId> = (0..3)
                .map(|i| ctx.insert("Widget", named(&format!("w{i}"))).object_id())
                .collect();
            let watched = ctx.obtain_permanent_ids(&objects[..2]).unwrap();
            (watched, objects)
        })
        .unwrap();
    assert!(watched.iter().all(|id| !id.is_temporary()));

    let (handler, rx) = recording_handler();
    let _observer = ChangeObserver::new(
        stack.hub(),
        ObservationMode::single(&context),
        ObjectIdentityFilter::new(watched.clone()),
        false,
        handler,
    );

    context
        .perform_and_wait(move |ctx| {
            for id in &all {
                ctx.set(id, "name", json!("renamed")).unwrap();
            }
        })
        .unwrap();

    let changes = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(changes.updated().len(), 2);
    assert!(watched.iter().all(|id| changes.updated().contains(id)));
}

#[test]
fn test_object_observer_follows_its_context() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let main = stack.main_context();

    let object = main
        .perform_and_wait(|ctx| ctx.insert("Widget", named("tracked")))
        .unwrap();
    let (handler, rx) = recording_handler();
    let observer = object.observe(stack.hub(), false, handler);
    assert_eq!(observer.mode(), &ObservationMode::single(&main));
    let id = object.permanent_id().unwrap();
    assert!(block_on(stack.save_main_context_async(true)));

    let editor = stack.create_temporary_background_context();
    let edit_id = id.clone();
    editor
        .perform_and_wait(move |ctx| ctx.set(&edit_id, "name", json!("edited")))
        .unwrap()
        .unwrap();
    assert!(block_on(stack.save_async(&editor, true)));

    let changes = rx.recv_timeout(WAIT).unwrap();
    assert!(changes.updated().contains(&id));
}

#[test]
fn test_objects_in_several_contexts() {
    let dir = TempDir::new().unwrap();
    let stack = test_stack(&dir);
    let first = stack.create_temporary_background_context();
    let second = stack.create_temporary_background_context();

    let a = first
        .perform_and_wait(|ctx| ctx.insert("Widget", named("a")))
        .unwrap();
    let b = second
        .perform_and_wait(|ctx| ctx.insert("Widget", named("b")))
        .unwrap();

    let publisher = stack.publish_object_changes(&[a.clone(), b.clone()]);
    assert_eq!(
        publisher.mode(),
        &ObservationMode::MultipleContexts(vec![first.id(), second.id()])
    );
    assert_eq!(publisher.filter().ids().len(), 2);

    let subscription = publisher.subscribe();
    let a_id = a.object_id();
    first
        .perform_and_wait(move |ctx| ctx.set(&a_id, "name", json!("a2")))
        .unwrap()
        .unwrap();
    let changes = subscription.recv_timeout(WAIT).unwrap();
    assert!(changes.updated().contains(&a.object_id()));

    let stream = stack.object_changes(&[b]);
    assert_eq!(stream.mode(), &ObservationMode::single(&second));
}

// --- Filter suppression ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The handler runs only when at least one changed object passes the
    /// filter.
    #[test]
    fn handler_never_runs_for_unmatched_events(widgets in 0usize..4, gadgets in 0usize..4) {
        let dir = TempDir::new().unwrap();
        let stack = test_stack(&dir);
        let context = stack.create_temporary_background_context();
        let delivery = ExecutionQueue::new("test.delivery");

        let (handler, rx) = recording_handler();
        let _observer = ChangeObserver::with_queue(
            stack.hub(),
            ObservationMode::single(&context),
            EntityNameFilter::new(["Gadget"]),
            delivery.clone(),
            false,
            handler,
        );

        context
            .perform_and_wait(move |ctx| {
                for _ in 0..widgets {
                    ctx.insert("Widget", Properties::new());
                }
                for _ in 0..gadgets {
                    ctx.insert("Gadget", Properties::new());
                }
            })
            .unwrap();
        delivery.sync(|| ()).unwrap();

        let delivered: Vec<ObservedChanges> = rx.try_iter().collect();
        if gadgets == 0 {
            prop_assert!(delivered.is_empty());
        } else {
            prop_assert_eq!(delivered.len(), 1);
            prop_assert_eq!(delivered[0].inserted().len(), gadgets);
        }
    }
}
