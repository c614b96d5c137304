//! Shared fixture: the window workflow.
//!
//! A `Window` entity with states `normal`, `maximized` and `minimized`,
//! driven by `start_workflow` / `minimize` / `maximize` / `to_normal`, with
//! helpers for seeding stores and recording observer notifications.

// Each test binary uses a different subset of the fixture.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use gearflow::store::MemoryStore;
use gearflow::{
    async_trait, effect_fn, EffectContext, EffectDef, EntityId, FnEffect, HandlerDef, MessageSpec,
    StateId, TransitionEvent, TransitionObserver, Workflow, WorkflowBuilder, WorkflowEntity,
    WorkflowRegistry,
};

pub const WORKFLOW_ID: &str = "simple";

#[derive(Clone, Debug)]
pub struct Window {
    pub id: String,
    pub title: String,
    pub width: i64,
    pub height: i64,
    pub open_status: StateId,
    pub revision: Option<u64>,
}

impl Window {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            title: format!("window {id}"),
            width: 640,
            height: 480,
            open_status: StateId::new("init"),
            revision: Some(0),
        }
    }

    /// A window without revision tracking, for state-based conflict tests.
    pub fn without_revision(id: &str) -> Self {
        Self {
            revision: None,
            ..Self::new(id)
        }
    }

    pub fn in_state(mut self, state: &str) -> Self {
        self.open_status = StateId::new(state);
        self
    }
}

impl WorkflowEntity for Window {
    fn entity_id(&self) -> EntityId {
        EntityId::new(&self.id)
    }

    fn workflow_type(&self) -> &str {
        WORKFLOW_ID
    }

    fn state(&self) -> StateId {
        self.open_status.clone()
    }

    fn set_state(&mut self, state: StateId) {
        self.open_status = state;
    }

    fn revision(&self) -> Option<u64> {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = Some(revision);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub admin: bool,
}

impl User {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            admin: false,
        }
    }

    pub fn admin(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            admin: true,
        }
    }
}

/// Observer that records `hook:message_id` lines.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransitionObserver<Window, User> for RecordingObserver {
    async fn transition_handled(
        &self,
        event: TransitionEvent<'_, Window, User>,
    ) -> anyhow::Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push(format!("transition_handled:{}", event.message_id));
        Ok(())
    }

    async fn message_handled(
        &self,
        event: TransitionEvent<'_, Window, User>,
    ) -> anyhow::Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push(format!("message_handled:{}", event.message_id));
        Ok(())
    }
}

/// Effect counting its executions, reporting the count as its value.
pub fn counting_effect(
    name: &str,
    counter: Arc<AtomicUsize>,
) -> FnEffect<impl Fn(&EffectContext<Window, User>) -> anyhow::Result<Value> + Send + Sync + 'static>
{
    effect_fn(name, move |ctx: &EffectContext<Window, User>| {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({
            "count": count,
            "entity": ctx.entity.id.clone(),
            "from": ctx.old_entity.state().as_str(),
            "to": ctx.entity.state().as_str(),
        }))
    })
}

/// The base window workflow: states, messages and the plain transitions.
pub fn workflow_builder() -> WorkflowBuilder<Window, User> {
    Workflow::builder(WORKFLOW_ID)
        .verbose_name("Just a simple workflow")
        .states(["normal", "maximized", "minimized"])
        .state_name("normal", "Normal")
        .message(MessageSpec::new("start_workflow").verb("create"))
        .message(MessageSpec::new("minimize").verb("Minimize window"))
        .message(MessageSpec::new("maximize"))
        .message(MessageSpec::new("to_normal"))
        .handler(
            HandlerDef::for_message("start_workflow")
                .states_from(["init"])
                .transitions_to("normal"),
        )
        .handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal", "maximized"])
                .transitions_to("minimized"),
        )
        .handler(
            HandlerDef::for_message("maximize")
                .states_from(["normal", "minimized"])
                .transitions_to("maximized"),
        )
        .handler(
            HandlerDef::for_message("to_normal")
                .states_from(["maximized", "minimized"])
                .transitions_to("normal"),
        )
}

/// Registry with the base workflow (optionally customized) registered.
pub fn registry_with(
    customize: impl FnOnce(WorkflowBuilder<Window, User>) -> WorkflowBuilder<Window, User>,
) -> WorkflowRegistry<Window, User> {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(customize(workflow_builder()).build().expect("workflow builds"))
        .expect("workflow registers");
    registry
}

/// Store seeded with the given windows.
pub fn seeded_store(windows: impl IntoIterator<Item = Window>) -> MemoryStore<Window> {
    let store = MemoryStore::new();
    for window in windows {
        store.seed(window);
    }
    store
}

/// Convenience: an `EffectDef` for minimize transitions into `minimized`.
pub fn minimize_effect(
    counter: Arc<AtomicUsize>,
) -> EffectDef<Window, User> {
    EffectDef::on_message("minimize")
        .states_from(["normal", "maximized"])
        .states_to(["minimized"])
        .with(counting_effect("on_minimize", counter))
}
