//! End-to-end dispatch scenarios over the window workflow.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use gearflow::{
    create, dispatch, dispatch_message, start_workflow, DispatchOptions, Dispatcher, DynHandler,
    Error, HandlerDef, HandlerOutcome, Message, MessageSpec, StateId, Submessage,
    TransitionOutcome, TypedValidator, ValidationErrors, WorkflowEntity,
};

use support::{minimize_effect, registry_with, seeded_store, RecordingObserver, User, Window};

// =============================================================================
// Plain transitions
// =============================================================================

#[tokio::test]
async fn start_workflow_moves_init_to_normal() {
    let observer = RecordingObserver::new();
    let registry = registry_with(|builder| builder.observer(observer.clone()));
    let store = seeded_store([Window::new("w1")]);
    let window = store.get(&"w1".into()).unwrap();

    let outcome = start_workflow(&registry, &store, &window, User::named("alice"), json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.entity.state().as_str(), "normal");
    assert_eq!(store.get(&"w1".into()).unwrap().state().as_str(), "normal");
    // No effect registered for the start transition: logged, not an error.
    assert!(outcome.effects.applied.is_empty());
    assert!(outcome.effects.deferred.is_none());

    let lines = observer.lines();
    assert!(lines.contains(&"transition_handled:start_workflow".to_owned()));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("message_handled:start_workflow")
    );
}

#[tokio::test]
async fn minimize_collects_exactly_one_effect_result() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(|builder| builder.effect(minimize_effect(counter.clone())));
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let outcome = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "minimize",
        json!({}),
    )
    .await
    .unwrap();

    assert_eq!(outcome.entity.state().as_str(), "minimized");
    assert_eq!(outcome.effects.applied.len(), 1);
    assert_eq!(outcome.effects.applied[0].name, "on_minimize");
    assert_eq!(
        outcome.effects.applied[0].value["from"],
        json!("normal")
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Same effect applies from the other registered origin.
    let store = seeded_store([Window::new("w2").in_state("maximized")]);
    let window = store.get(&"w2".into()).unwrap();
    let outcome = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "minimize",
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(outcome.effects.applied.len(), 1);
}

#[tokio::test]
async fn revision_bumps_on_each_transition() {
    let registry = registry_with(|builder| builder);
    let store = seeded_store([Window::new("w1")]);
    let window = store.get(&"w1".into()).unwrap();
    assert_eq!(window.revision, Some(0));

    let outcome = start_workflow(&registry, &store, &window, User::named("alice"), json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.entity.revision, Some(1));

    let outcome = dispatch(
        &registry,
        &store,
        &outcome.entity,
        User::named("alice"),
        "minimize",
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(outcome.entity.revision, Some(2));
}

#[tokio::test]
async fn dispatcher_binding() {
    let registry = registry_with(|builder| builder);
    let store = seeded_store([Window::new("w1")]);
    let window = store.get(&"w1".into()).unwrap();

    let dispatcher = Dispatcher::new(&registry, &store, User::named("alice"));
    let outcome = dispatcher
        .send(&window, "start_workflow", json!({}))
        .await
        .unwrap();
    let outcome = dispatcher
        .send(&outcome.entity, "maximize", json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.entity.state().as_str(), "maximized");
}

// =============================================================================
// Handler selection
// =============================================================================

#[tokio::test]
async fn handler_selection_is_order_and_permission_stable() {
    // Three handlers for the same (state, message); for every combination
    // of pass/fail assignments the lowest-indexed passing handler wins.
    for mask in 0u32..8 {
        let registry = registry_with(|mut builder| {
            builder = builder.message(MessageSpec::new("route"));
            for index in 0..3 {
                let passes = mask & (1 << index) != 0;
                builder = builder.handler(
                    HandlerDef::for_message("route")
                        .states_from(["normal"])
                        .guard(gearflow::PermissionChecker::new(move |_, _| passes))
                        .perform(
                            move |_: &Window,
                                  _: &User,
                                  _: &Value|
                                  -> anyhow::Result<HandlerOutcome<Window, User>> {
                                Ok(HandlerOutcome::mutate(move |window: &mut Window| {
                                    window.set_state(StateId::new("minimized"));
                                    Ok(vec![TransitionOutcome::Value(json!(index))])
                                }))
                            },
                        ),
                );
            }
            builder
        });
        let store = seeded_store([Window::new("w1").in_state("normal")]);
        let window = store.get(&"w1".into()).unwrap();

        let result = dispatch(
            &registry,
            &store,
            &window,
            User::named("alice"),
            "route",
            json!({}),
        )
        .await;

        if mask == 0 {
            assert!(
                matches!(result, Err(Error::PermissionDenied { .. })),
                "mask {mask:#05b}: expected PermissionDenied"
            );
        } else {
            let expected = mask.trailing_zeros() as i64;
            let outcome = result.unwrap();
            assert_eq!(
                outcome.results[0].as_value(),
                Some(&json!(expected)),
                "mask {mask:#05b}: wrong handler selected"
            );
        }
    }
}

#[tokio::test]
async fn unhandled_and_denied_are_distinct_failures() {
    let registry = registry_with(|builder| {
        builder.message(MessageSpec::new("restricted")).handler(
            HandlerDef::for_message("restricted")
                .states_from(["normal"])
                .guard(gearflow::PermissionChecker::restrict_to_all())
                .transitions_to("maximized"),
        )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    // Handlers exist but none authorizes the sender.
    let denied = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "restricted",
        json!({}),
    )
    .await;
    assert!(matches!(denied, Err(Error::PermissionDenied { .. })));

    // No handler registered for (minimized, minimize) at all.
    let store = seeded_store([Window::new("w2").in_state("minimized")]);
    let window = store.get(&"w2".into()).unwrap();
    let unhandled = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "minimize",
        json!({}),
    )
    .await;
    assert!(matches!(unhandled, Err(Error::UnhandledMessage { .. })));
}

// =============================================================================
// Handler outcomes
// =============================================================================

#[tokio::test]
async fn ignored_message_is_a_signal() {
    let registry = registry_with(|builder| {
        builder.message(MessageSpec::new("poke")).handler(
            HandlerDef::for_message("poke")
                .states_from(["normal"])
                .with(gearflow::IgnoreHandler),
        )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let result = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "poke",
        json!({}),
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::MessageIgnored { message_id, .. }) if message_id.as_str() == "poke"
    ));
    // Nothing moved.
    assert_eq!(store.get(&"w1".into()).unwrap().state().as_str(), "normal");
}

#[tokio::test]
async fn illegal_destination_states_are_rejected() {
    let registry = registry_with(|builder| {
        builder
            .message(MessageSpec::new("warp"))
            .message(MessageSpec::new("reset"))
            .handler(
                HandlerDef::for_message("warp").states_from(["normal"]).perform(
                    |_: &Window, _: &User, _: &Value| -> anyhow::Result<HandlerOutcome<Window, User>> {
                        Ok(HandlerOutcome::state("floating"))
                    },
                ),
            )
            .handler(
                HandlerDef::for_message("reset").states_from(["normal"]).perform(
                    |_: &Window, _: &User, _: &Value| -> anyhow::Result<HandlerOutcome<Window, User>> {
                        // The initial state is never a destination.
                        Ok(HandlerOutcome::state("init"))
                    },
                ),
            )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    for message in ["warp", "reset"] {
        let result = dispatch(
            &registry,
            &store,
            &window,
            User::named("alice"),
            message,
            json!({}),
        )
        .await;
        assert!(
            matches!(result, Err(Error::IllegalState(_))),
            "{message} should fail with IllegalState"
        );
    }
}

#[tokio::test]
async fn wrong_handler_result_from_dyn_adapter() {
    let registry = registry_with(|builder| {
        builder.message(MessageSpec::new("odd")).handler(
            HandlerDef::for_message("odd").states_from(["normal"]).with(
                DynHandler::new(|_: &Window, _: &User, _: &Value| -> anyhow::Result<Value> {
                    Ok(json!({ "unexpected": true }))
                }),
            ),
        )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let result = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "odd",
        json!({}),
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::WrongHandlerResult { message_id, .. }) if message_id.as_str() == "odd"
    ));
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Serialize, Deserialize)]
struct ClickParams {
    pos_x: i64,
    pos_y: i64,
}

#[tokio::test]
async fn validation_failure_carries_field_errors() {
    let registry = registry_with(|builder| {
        builder
            .message(MessageSpec::new("click").validator(TypedValidator::<ClickParams>::new()))
            .handler(
                HandlerDef::for_message("click")
                    .states_from(["normal"])
                    .transitions_to("maximized"),
            )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let invalid = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "click",
        json!({ "pos_x": 3 }),
    )
    .await;
    match invalid {
        Err(Error::MessageValidation(errors)) => {
            assert!(errors.fields().contains_key(ValidationErrors::NON_FIELD));
        }
        other => panic!("expected MessageValidation, got {:?}", other.map(|_| ())),
    }

    let valid = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "click",
        json!({ "pos_x": 3, "pos_y": 4 }),
    )
    .await
    .unwrap();
    assert_eq!(valid.entity.state().as_str(), "maximized");
}

// =============================================================================
// Message grouping
// =============================================================================

#[tokio::test]
async fn group_handler_accepts_all_concrete_ids() {
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_in_handler = handled.clone();
    let registry = registry_with(move |builder| {
        builder
            .message(MessageSpec::new("edit"))
            .message(MessageSpec::new("edit__title"))
            .message(MessageSpec::new("edit__resize"))
            .handler(HandlerDef::for_group("edit").states_from(["normal"]).perform(
                move |_: &Window, _: &User, _: &Value| -> anyhow::Result<HandlerOutcome<Window, User>> {
                    handled_in_handler.fetch_add(1, Ordering::SeqCst);
                    Ok(HandlerOutcome::state("normal"))
                },
            ))
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);

    for message in ["edit", "edit__title", "edit__resize"] {
        let window = store.get(&"w1".into()).unwrap();
        let outcome = dispatch(
            &registry,
            &store,
            &window,
            User::named("alice"),
            message,
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(outcome.entity.state().as_str(), "normal");
    }
    assert_eq!(handled.load(Ordering::SeqCst), 3);

    // A leaf that was never registered.
    let window = store.get(&"w1".into()).unwrap();
    let missing = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "edit__nonexistent",
        json!({}),
    )
    .await;
    assert!(matches!(missing, Err(Error::MessageSpecNotRegistered(_))));
}

// =============================================================================
// Sub-messages
// =============================================================================

#[tokio::test]
async fn submessages_transition_children_in_same_unit_of_work() {
    let counter = Arc::new(AtomicUsize::new(0));
    let child_a = Window::new("c1").in_state("normal");
    let child_b = Window::new("c2").in_state("normal");

    let handler_children = (child_a.clone(), child_b.clone());
    let registry = registry_with(move |builder| {
        builder
            .message(MessageSpec::new("minimize_all"))
            .effect(minimize_effect(counter.clone()))
            .handler(
                HandlerDef::for_message("minimize_all")
                    .states_from(["normal"])
                    .perform(
                        move |_: &Window,
                              actor: &User,
                              _: &Value|
                              -> anyhow::Result<HandlerOutcome<Window, User>> {
                            let (a, b) = handler_children.clone();
                            let actor = actor.clone();
                            Ok(HandlerOutcome::mutate(move |window: &mut Window| {
                                window.set_state(StateId::new("minimized"));
                                Ok(vec![
                                    TransitionOutcome::Value(json!({ "self": window.id.clone() })),
                                    TransitionOutcome::Submessage(Submessage::to(
                                        a,
                                        "minimize",
                                        actor.clone(),
                                    )),
                                    TransitionOutcome::Submessage(Submessage::to(
                                        b,
                                        "minimize",
                                        actor,
                                    )),
                                ])
                            }))
                        },
                    ),
            )
    });

    let store = seeded_store([
        Window::new("p").in_state("normal"),
        child_a.clone(),
        child_b.clone(),
    ]);
    let parent = store.get(&"p".into()).unwrap();

    let outcome = dispatch(
        &registry,
        &store,
        &parent,
        User::named("alice"),
        "minimize_all",
        json!({}),
    )
    .await
    .unwrap();

    // Self value plus the two child outcomes, in yield order.
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results[0].as_value().is_some());
    let first_child = outcome.results[1].as_submessage().unwrap();
    assert_eq!(first_child.entity.id, "c1");
    assert_eq!(first_child.entity.state().as_str(), "minimized");
    let second_child = outcome.results[2].as_submessage().unwrap();
    assert_eq!(second_child.entity.id, "c2");

    // All three transitions committed through the one unit of work.
    for id in ["p", "c1", "c2"] {
        assert_eq!(
            store.get(&id.into()).unwrap().state().as_str(),
            "minimized",
            "{id} should be minimized"
        );
    }

    // The children's deferrable effects ran with the parent's dispatch.
    assert_eq!(outcome.effects.applied.len(), 2);
}

#[tokio::test]
async fn recursive_submessage_reuses_parent_lock() {
    let registry = registry_with(|builder| {
        builder.message(MessageSpec::new("flash")).handler(
            HandlerDef::for_message("flash").states_from(["normal"]).perform(
                |_: &Window, actor: &User, _: &Value| -> anyhow::Result<HandlerOutcome<Window, User>> {
                    let actor = actor.clone();
                    Ok(HandlerOutcome::mutate(move |window: &mut Window| {
                        window.set_state(StateId::new("maximized"));
                        Ok(vec![TransitionOutcome::Submessage(Submessage::recursive(
                            "to_normal",
                            actor,
                        ))])
                    }))
                },
            ),
        )
    });
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let outcome = dispatch(
        &registry,
        &store,
        &window,
        User::named("alice"),
        "flash",
        json!({}),
    )
    .await
    .unwrap();

    let inner = outcome.results[0].as_submessage().unwrap();
    assert_eq!(inner.entity.state().as_str(), "normal");
    // The sub-message's write wins: it ran after the parent's within the
    // same unit of work.
    assert_eq!(store.get(&"w1".into()).unwrap().state().as_str(), "normal");
}

// =============================================================================
// Side-effect modes
// =============================================================================

#[tokio::test]
async fn deferred_side_effects_run_by_the_caller() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(|builder| builder.effect(minimize_effect(counter.clone())));
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let outcome = dispatch_message(
        &registry,
        &store,
        &window,
        Message::new(User::named("alice"), "minimize", json!({})),
        DispatchOptions {
            defer_side_effects: true,
            ..DispatchOptions::default()
        },
    )
    .await
    .unwrap();

    // Transition committed, effect not yet evaluated.
    assert_eq!(store.get(&"w1".into()).unwrap().state().as_str(), "minimized");
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let deferred = outcome.effects.deferred.unwrap();
    assert_eq!(deferred.len(), 1);
    let results = deferred.run().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn post_commit_side_effect_mode() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = registry_with(|builder| builder.effect(minimize_effect(counter.clone())));
    let store = seeded_store([Window::new("w1").in_state("normal")]);
    let window = store.get(&"w1".into()).unwrap();

    let outcome = dispatch_message(
        &registry,
        &store,
        &window,
        Message::new(User::named("alice"), "minimize", json!({})),
        DispatchOptions {
            transactional_side_effects: false,
            ..DispatchOptions::default()
        },
    )
    .await
    .unwrap();

    // Effects ran immediately after commit and their results came back.
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.effects.applied.len(), 1);
    assert!(outcome.effects.deferred.is_none());
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn create_then_start_workflow() {
    let registry = registry_with(|builder| {
        builder
            .create_validator(TypedValidator::<CreateParams>::new())
            .entity_factory(|_actor: &User, cleaned: &Value| {
                let params: CreateParams = serde_json::from_value(cleaned.clone())?;
                let mut window = Window::new(&params.id);
                window.title = params.title;
                window.width = params.width;
                window.height = params.height;
                Ok(window)
            })
    });
    let store = seeded_store([]);

    let invalid = create(
        &registry,
        &store,
        support::WORKFLOW_ID,
        &User::named("alice"),
        json!({}),
    )
    .await;
    assert!(matches!(invalid, Err(Error::CreateValidation(_))));

    let window = create(
        &registry,
        &store,
        support::WORKFLOW_ID,
        &User::named("alice"),
        json!({ "id": "main", "title": "Main window", "width": 500, "height": 300 }),
    )
    .await
    .unwrap();
    assert_eq!(window.state().as_str(), "init");
    assert!(store.get(&"main".into()).is_some());

    let outcome = start_workflow(&registry, &store, &window, User::named("alice"), json!({}))
        .await
        .unwrap();
    assert_eq!(outcome.entity.state().as_str(), "normal");
}

#[derive(Serialize, Deserialize)]
struct CreateParams {
    id: String,
    title: String,
    width: i64,
    height: i64,
}
