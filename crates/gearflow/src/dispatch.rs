//! Message dispatch: route a message to the first permitted handler and
//! drive the resulting transition.
//!
//! The algorithm, per message:
//!
//! 1. Resolve the workflow from the entity's workflow-type tag.
//! 2. Clean: resolve the spec, validate and wrap the parameters.
//! 3. Resolve the handler: ordered candidates for `(state, message)`,
//!    filtered by permission; the first permitted one wins.
//! 4. Invoke the handler on the optimistic read; interpret its outcome.
//! 5. Run the transactional transition (see [`crate::transition`]).
//! 6. Evaluate or package side effects according to [`DispatchOptions`].
//! 7. Notify observers.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;

use crate::config::DispatchOptions;
use crate::effect::SideEffectResult;
use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::handler::{HandlerOutcome, Mutator};
use crate::message::Message;
use crate::observer::TransitionEvent;
use crate::store::{EntityStore, EntityTx};
use crate::transition;
use crate::workflow::WorkflowRegistry;

/// One entry of a dispatch's accumulated handler result.
pub enum TransitionValue<E, A> {
    /// A plain value produced by the mutator.
    Value(Value),
    /// The outcome of a sub-message dispatched within the transition.
    Submessage(Box<DispatchOutcome<E, A>>),
}

impl<E, A> TransitionValue<E, A> {
    /// The plain value, if this entry is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Submessage(_) => None,
        }
    }

    /// The sub-message outcome, if this entry is one.
    pub fn as_submessage(&self) -> Option<&DispatchOutcome<E, A>> {
        match self {
            Self::Value(_) => None,
            Self::Submessage(outcome) => Some(outcome),
        }
    }
}

/// What a dispatch returned: the transitioned entity, the handler result
/// and the side-effect results.
pub struct DispatchOutcome<E, A> {
    /// The entity after the transition.
    pub entity: E,
    /// Accumulated handler results, including sub-message outcomes.
    pub results: Vec<TransitionValue<E, A>>,
    /// Side-effect results, applied and/or deferred.
    pub effects: SideEffectResult<E, A>,
}

/// Internal per-level dispatch result, before the commit decision.
pub(crate) struct DispatchCore<E, A> {
    pub(crate) old_entity: E,
    pub(crate) entity: E,
    pub(crate) message: Message<A>,
    pub(crate) results: Vec<TransitionValue<E, A>>,
    pub(crate) applied: Vec<crate::effect::EffectResult>,
    pub(crate) pending: crate::effect::DeferredEffects<E, A>,
}

/// Dispatch a message built from its parts, with default options.
///
/// See [`dispatch_message`] for the full contract.
pub async fn dispatch<E, A, S>(
    registry: &WorkflowRegistry<E, A>,
    store: &S,
    entity: &E,
    actor: A,
    message_id: &str,
    raw_params: Value,
) -> Result<DispatchOutcome<E, A>>
where
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    dispatch_message(
        registry,
        store,
        entity,
        Message::new(actor, message_id, raw_params),
        DispatchOptions::default(),
    )
    .await
}

/// Dispatch a message to a workflow-governed entity.
///
/// Opens a unit of work on `store`, runs the dispatch algorithm, commits,
/// and notifies observers. The returned
/// [`DispatchOutcome`] carries the transitioned entity, the accumulated
/// handler result, and the side-effect results — deferred instead of
/// applied when `options.defer_side_effects` is set.
///
/// Everything in the error taxonomy propagates to the caller; on a
/// conflict ([`Error::ConcurrentRevisionUpdate`] /
/// [`Error::OldStateInconsistence`]) re-read the entity and re-dispatch
/// from scratch.
pub async fn dispatch_message<E, A, S>(
    registry: &WorkflowRegistry<E, A>,
    store: &S,
    entity: &E,
    message: Message<A>,
    options: DispatchOptions,
) -> Result<DispatchOutcome<E, A>>
where
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    let mut tx = store.begin().await?;
    let core = dispatch_in::<E, A, S>(registry, &mut tx, entity.clone(), message, options.clone())
        .await?;

    let DispatchCore {
        old_entity,
        entity: new_entity,
        message,
        results,
        mut applied,
        pending,
    } = core;

    // Commit discipline: deferrable effects either run inside the unit of
    // work, run right after commit, or are handed to the caller.
    let deferred = if options.defer_side_effects {
        tx.commit().await?;
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    } else if options.transactional_side_effects {
        applied.extend(pending.run().await?);
        tx.commit().await?;
        None
    } else {
        tx.commit().await?;
        // Post-commit: a failure here can no longer undo the transition.
        applied.extend(pending.run().await?);
        None
    };

    let workflow = registry.by_entity(&old_entity)?;
    workflow
        .notify_message_handled(TransitionEvent {
            workflow_id: workflow.id(),
            message_id: &message.id,
            message_uid: message.unique_id,
            actor: &message.actor,
            old_entity: &old_entity,
            new_entity: &new_entity,
            new_revision: new_entity.revision(),
            dehydrated_params: message.dehydrated_params(),
            results: &results,
            applied_effects: &applied,
        })
        .await;

    Ok(DispatchOutcome {
        entity: new_entity,
        results,
        effects: SideEffectResult { applied, deferred },
    })
}

/// Dispatch within an already-open unit of work. Does not commit; the
/// caller owns the commit decision. Boxed for sub-message recursion.
pub(crate) fn dispatch_in<'t, 's, E, A, S>(
    registry: &'t WorkflowRegistry<E, A>,
    tx: &'t mut S::Tx<'s>,
    entity: E,
    mut message: Message<A>,
    options: DispatchOptions,
) -> Pin<Box<dyn Future<Output = Result<DispatchCore<E, A>>> + Send + 't>>
where
    's: 't,
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    Box::pin(async move {
        let workflow = registry.by_entity(&entity)?.clone();

        // Validate the parameters and canonicalize the id.
        message.clean(workflow.library())?;

        let state = entity.state();
        debug!(
            entity_id = %entity.entity_id(),
            state = %state,
            message_id = %message.id,
            "dispatching message"
        );

        // First permitted handler, in registration order. An empty
        // candidate list is UnhandledMessage; all-denied is
        // PermissionDenied.
        let handlers = workflow
            .library()
            .handlers(Some(&state), Some(&message.id))?;
        let handler = handlers
            .iter()
            .find(|entry| entry.checker.check(&entity, &message.actor))
            .ok_or_else(|| Error::PermissionDenied {
                entity_id: entity.entity_id(),
                message_id: message.id.clone(),
            })?;

        let outcome = handler
            .handler
            .perform(&entity, &message.actor, message.params())
            .map_err(|err| Error::from_handler(&message.id, err))?;

        let mutator: Mutator<E, A> = match outcome {
            HandlerOutcome::Ignore => {
                return Err(Error::MessageIgnored {
                    message_id: message.id.clone(),
                    params: message.params().clone(),
                });
            }
            HandlerOutcome::State(state_to) => {
                // The destination must be a declared state; the initial
                // state is never a destination.
                if !workflow.is_destination_state(&state_to) {
                    return Err(Error::IllegalState(state_to));
                }
                Box::new(move |entity: &mut E| {
                    entity.set_state(state_to);
                    Ok(Vec::new())
                })
            }
            HandlerOutcome::Mutate(mutator) => mutator,
        };

        let record = transition::run_in::<E, A, S>(
            registry, &workflow, tx, &entity, &message, mutator, &options,
        )
        .await?;

        Ok(DispatchCore {
            old_entity: entity,
            entity: record.entity,
            message,
            results: record.results,
            applied: record.applied,
            pending: record.pending,
        })
    })
}

/// Dispatcher bound to a registry, store, actor and options.
///
/// Convenience over [`dispatch_message`] when one sender issues several
/// messages:
///
/// ```ignore
/// let dispatcher = Dispatcher::new(&registry, &store, user);
/// let outcome = dispatcher.send(&window, "minimize", json!({})).await?;
/// let outcome = dispatcher.send(&outcome.entity, "maximize", json!({})).await?;
/// ```
pub struct Dispatcher<'a, E, A, S> {
    registry: &'a WorkflowRegistry<E, A>,
    store: &'a S,
    actor: A,
    options: DispatchOptions,
}

impl<'a, E, A, S> Dispatcher<'a, E, A, S>
where
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    /// Bind a dispatcher to a registry, store and actor.
    pub fn new(registry: &'a WorkflowRegistry<E, A>, store: &'a S, actor: A) -> Self {
        Self {
            registry,
            store,
            actor,
            options: DispatchOptions::default(),
        }
    }

    /// Replace the dispatch options used by this dispatcher.
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Send a message with raw parameters.
    pub async fn send(
        &self,
        entity: &E,
        message_id: &str,
        raw_params: Value,
    ) -> Result<DispatchOutcome<E, A>> {
        dispatch_message(
            self.registry,
            self.store,
            entity,
            Message::new(self.actor.clone(), message_id, raw_params),
            self.options.clone(),
        )
        .await
    }

    /// Send a message whose parameters are already validated, skipping the
    /// spec's validator.
    pub async fn send_pre_cleaned(
        &self,
        entity: &E,
        message_id: &str,
        params: Value,
    ) -> Result<DispatchOutcome<E, A>> {
        dispatch_message(
            self.registry,
            self.store,
            entity,
            Message::pre_cleaned(self.actor.clone(), message_id, params),
            self.options.clone(),
        )
        .await
    }
}
