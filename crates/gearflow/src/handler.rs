//! Handlers: how a message becomes a state transition.
//!
//! A handler resolves a message in a given state to a
//! [`HandlerOutcome`]: ignore the message, name a destination state, or
//! supply a [`Mutator`] that is applied to the locked entity inside the
//! unit of work. Handler logic runs *before* any lock is taken, so it must
//! not touch persisted state — all mutation belongs in the mutator.

use serde_json::Value;

use crate::entity::WorkflowEntity;
use crate::error::Error;
use crate::id::StateId;
use crate::message::Submessage;

/// One step of a mutator's result sequence.
///
/// The ordered sequence replaces the original design's generator protocol:
/// plain values accumulate as the handler result, sub-messages dispatch
/// recursively within the same unit of work, in the order they appear.
pub enum TransitionOutcome<E, A> {
    /// An ordinary result value, accumulated into the dispatch outcome.
    Value(Value),
    /// A message to dispatch within the parent's unit of work.
    Submessage(Submessage<E, A>),
}

/// State-transition function applied to the locked entity.
///
/// Must confine itself to mutating the entity in memory; the engine
/// persists the result and drains the returned outcome sequence.
pub type Mutator<E, A> =
    Box<dyn FnOnce(&mut E) -> anyhow::Result<Vec<TransitionOutcome<E, A>>> + Send>;

/// What a handler decided to do with a message.
pub enum HandlerOutcome<E, A> {
    /// Decline to act. Dispatch surfaces this as
    /// [`Error::MessageIgnored`](crate::Error::MessageIgnored) — a signal,
    /// not a defect.
    Ignore,
    /// Move the entity to this state. Must be a declared, non-initial
    /// state; the engine synthesizes the trivial mutator.
    State(StateId),
    /// Run this mutator on the locked entity.
    Mutate(Mutator<E, A>),
}

impl<E, A> std::fmt::Debug for HandlerOutcome<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Ignore => f.write_str("Ignore"),
            HandlerOutcome::State(state) => f.debug_tuple("State").field(state).finish(),
            HandlerOutcome::Mutate(_) => f.debug_tuple("Mutate").finish_non_exhaustive(),
        }
    }
}

impl<E, A> HandlerOutcome<E, A> {
    /// Convenience constructor for a plain state transition.
    pub fn state(state: impl Into<StateId>) -> Self {
        Self::State(state.into())
    }

    /// Convenience constructor wrapping a mutator closure.
    pub fn mutate<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut E) -> anyhow::Result<Vec<TransitionOutcome<E, A>>> + Send + 'static,
    {
        Self::Mutate(Box::new(mutator))
    }
}

/// Resolves a message in a given state to a transition outcome.
///
/// Implementations must be side-effect-free with respect to persisted
/// state: `perform` runs on the optimistic (unlocked) read. Errors are
/// reported as `anyhow::Error` and surface as
/// [`Error::HandlerFailed`](crate::Error::HandlerFailed).
///
/// Plain functions participate via [`FnHandler`], usually through
/// [`HandlerDef::perform`](crate::library::HandlerDef::perform):
///
/// ```ignore
/// builder.handler(
///     HandlerDef::for_message("click")
///         .perform(|window: &Window, _actor: &User, params: &Value| {
///             if window.width == 0 {
///                 return Ok(HandlerOutcome::Ignore);
///             }
///             Ok(HandlerOutcome::state("normal"))
///         }),
/// );
/// ```
pub trait Handler<E, A>: Send + Sync + 'static {
    /// Decide what to do with a message. `params` is the cleaned, wrapped
    /// parameter value of the message spec.
    fn perform(&self, entity: &E, actor: &A, params: &Value)
        -> anyhow::Result<HandlerOutcome<E, A>>;
}

/// Adapter wrapping a plain function as a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, A, F> Handler<E, A> for FnHandler<F>
where
    F: Fn(&E, &A, &Value) -> anyhow::Result<HandlerOutcome<E, A>> + Send + Sync + 'static,
{
    fn perform(
        &self,
        entity: &E,
        actor: &A,
        params: &Value,
    ) -> anyhow::Result<HandlerOutcome<E, A>> {
        (self.f)(entity, actor, params)
    }
}

/// Handler that unconditionally moves the entity to one state.
///
/// Registered via
/// [`HandlerDef::transitions_to`](crate::library::HandlerDef::transitions_to),
/// which also records the destination annotation for introspection.
pub struct SimpleTransition {
    state_to: StateId,
}

impl SimpleTransition {
    /// Create a transition to `state_to`.
    pub fn new(state_to: impl Into<StateId>) -> Self {
        Self {
            state_to: state_to.into(),
        }
    }
}

impl<E, A> Handler<E, A> for SimpleTransition {
    fn perform(
        &self,
        _entity: &E,
        _actor: &A,
        _params: &Value,
    ) -> anyhow::Result<HandlerOutcome<E, A>> {
        Ok(HandlerOutcome::State(self.state_to.clone()))
    }
}

/// Adapter wrapping a function that reports its decision as JSON.
///
/// Interprets the returned value: `null` means ignore, a string names the
/// destination state, anything else is an unsupported result shape and
/// fails with [`Error::WrongHandlerResult`](crate::Error::WrongHandlerResult).
pub struct DynHandler<F> {
    f: F,
}

impl<F> DynHandler<F> {
    /// Wrap a JSON-returning function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, A, F> Handler<E, A> for DynHandler<F>
where
    F: Fn(&E, &A, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn perform(
        &self,
        entity: &E,
        actor: &A,
        params: &Value,
    ) -> anyhow::Result<HandlerOutcome<E, A>> {
        match (self.f)(entity, actor, params)? {
            Value::Null => Ok(HandlerOutcome::Ignore),
            Value::String(state) => Ok(HandlerOutcome::State(StateId::new(state))),
            other => Err(anyhow::Error::new(Error::WrongHandlerResult {
                message_id: crate::id::MessageId::new("<dynamic>"),
                detail: format!("expected null or a state name, got {}", kind_of(&other)),
            })),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Handler that ignores every message. Useful as a registered placeholder
/// while a transition is being designed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreHandler;

impl<E, A> Handler<E, A> for IgnoreHandler
where
    E: WorkflowEntity,
{
    fn perform(
        &self,
        entity: &E,
        _actor: &A,
        _params: &Value,
    ) -> anyhow::Result<HandlerOutcome<E, A>> {
        tracing::warn!(entity_id = %entity.entity_id(), "message ignored (by default)");
        Ok(HandlerOutcome::Ignore)
    }
}
