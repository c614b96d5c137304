//! Message-driven finite-state-machine dispatch engine.
//!
//! Gearflow routes an incoming *message* (an event with a typed id and
//! validated parameters) to a registered handler based on the current state
//! of a persisted entity, checks that the sender is permitted to send it,
//! performs the resulting state transition under a transactional lock, and
//! then runs the side effects keyed by `(from-state, to-state, message-id)`.
//!
//! - **Handlers are pure decisions** — they run on an optimistic read and
//!   return an outcome; all mutation happens in a mutator applied under the
//!   lock.
//! - **Registration is two-phase** — definitions accumulate in a builder
//!   and compile into an immutable lookup index, so registration order of
//!   messages versus group patterns cannot matter.
//! - **Conflicts are detected, not silently overwritten** — an
//!   optimistic-then-pessimistic revision check turns racing dispatches
//!   into typed errors the caller can retry.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        dispatch(entity, msg)                       │
//! │                                                                    │
//! │  1. Resolve workflow by the entity's workflow-type tag             │
//! │  2. Clean: validate + wrap parameters, canonicalize the id         │
//! │  3. First permitted handler for (state, message)                   │
//! │  4. handler.perform(...) → Ignore | State | Mutate                 │
//! │  5. Begin unit of work: lock row, re-verify revision, mutate,      │
//! │     save, dispatch sub-messages within the same unit of work       │
//! │  6. Side effects: transactional pre-commit, deferrable per options │
//! │  7. Commit, notify observers                                       │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gearflow::{
//!     dispatch, HandlerDef, MessageSpec, Workflow, WorkflowRegistry,
//! };
//!
//! let workflow = Workflow::builder("simple")
//!     .verbose_name("Just a simple workflow")
//!     .states(["normal", "maximized", "minimized"])
//!     .message(MessageSpec::new("start_workflow"))
//!     .message(MessageSpec::new("minimize").verb("Minimize window"))
//!     .handler(
//!         HandlerDef::for_message("start_workflow")
//!             .states_from(["init"])
//!             .transitions_to("normal"),
//!     )
//!     .handler(
//!         HandlerDef::for_message("minimize")
//!             .states_from(["normal", "maximized"])
//!             .transitions_to("minimized"),
//!     )
//!     .build()?;
//!
//! let mut registry = WorkflowRegistry::new();
//! registry.register(workflow)?;
//!
//! let outcome = dispatch(&registry, &store, &window, user, "minimize", json!({})).await?;
//! assert_eq!(outcome.entity.state().as_str(), "minimized");
//! ```
//!
//! # What stays outside
//!
//! Persistence (a real database store), request/form glue, and audit-log
//! storage are collaborators, not parts of the engine — the engine talks to
//! them through [`EntityStore`]/[`EntityTx`], [`Validator`] and
//! [`TransitionObserver`]. The in-memory [`store::MemoryStore`] exists for
//! tests.

mod allowed;
mod config;
pub mod creation;
mod dispatch;
mod effect;
mod entity;
mod error;
mod handler;
mod id;
mod library;
mod message;
mod observer;
mod permission;
mod resource;
pub mod store;
mod transition;
mod visualization;
mod workflow;

pub use allowed::{allowed, allowed_for_many, Allowed, AllowedMessage, AllowedResource};
pub use config::{DispatchOptions, DEFAULT_START_MESSAGE, GROUP_DELIMITER, INITIAL_STATE};
pub use creation::{create, start_workflow};
pub use dispatch::{dispatch, dispatch_message, Dispatcher, DispatchOutcome, TransitionValue};
pub use effect::{
    effect_fn, DeferredEffects, EffectContext, EffectResult, FnEffect, SideEffect,
    SideEffectResult,
};
pub use entity::WorkflowEntity;
pub use error::{Error, Result, ValidationErrors};
pub use handler::{
    DynHandler, FnHandler, Handler, HandlerOutcome, IgnoreHandler, Mutator, SimpleTransition,
    TransitionOutcome,
};
pub use id::{EntityId, MessageId, StateId};
pub use library::{EffectDef, HandlerDef, Library, LibraryBuilder, ResourceDef};
pub use message::{
    EmptyValidator, FnValidator, Message, MessageSpec, Submessage, SubmessageTarget,
    TypedValidator, Validator,
};
pub use observer::{TransitionEvent, TransitionObserver};
pub use permission::{AtomicCheck, CheckerKey, PermissionCache, PermissionChecker};
pub use resource::{ResourceHandler, WorkflowResource};
pub use store::{EntityStore, EntityTx};
pub use visualization::{StateMachineDefinition, TransitionDefinition};
pub use workflow::{EntityFactory, PostCreateHook, Workflow, WorkflowBuilder, WorkflowRegistry};

// Re-export commonly used external types.
pub use async_trait::async_trait;
