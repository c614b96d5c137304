//! The transactional transition engine.
//!
//! Runs inside an open unit of work: lock the entity row, re-verify that
//! nothing slipped in between the optimistic read and the lock, apply the
//! mutator, persist, drain the outcome sequence (dispatching sub-messages
//! within the same unit of work), then evaluate transactional side effects
//! and package deferrable ones. Commit belongs to the outermost dispatch.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use crate::config::DispatchOptions;
use crate::dispatch::{dispatch_in, DispatchCore, DispatchOutcome, TransitionValue};
use crate::effect::{DeferredEffects, EffectContext, EffectResult, SideEffectResult};
use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::handler::{Mutator, TransitionOutcome};
use crate::message::Message;
use crate::observer::TransitionEvent;
use crate::store::{EntityStore, EntityTx};
use crate::workflow::{Workflow, WorkflowRegistry};

/// What one transition produced, before the commit decision.
pub(crate) struct TransitionRecord<E, A> {
    /// The mutated entity, as saved into the unit of work.
    pub(crate) entity: E,
    /// Accumulated handler results, in outcome order.
    pub(crate) results: Vec<TransitionValue<E, A>>,
    /// Results of transactional effects that already ran.
    pub(crate) applied: Vec<EffectResult>,
    /// Deferrable effects of this transition and all sub-messages.
    pub(crate) pending: DeferredEffects<E, A>,
}

/// Perform the state transition for `entity` within `tx`.
///
/// With `options.lock_entity` the entity row is locked and re-verified:
/// a diverged revision fails with [`Error::ConcurrentRevisionUpdate`]; a
/// diverged state (revision tracking disabled) with
/// [`Error::OldStateInconsistence`]. Without it the optimistic copy is
/// mutated directly and the caller is responsible for consistency.
pub(crate) async fn run_in<E, A, S>(
    registry: &WorkflowRegistry<E, A>,
    workflow: &Workflow<E, A>,
    tx: &mut <S as EntityStore<E>>::Tx<'_>,
    entity: &E,
    message: &Message<A>,
    mutator: Mutator<E, A>,
    options: &DispatchOptions,
) -> Result<TransitionRecord<E, A>>
where
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    let entity_id = entity.entity_id();
    let old_state = entity.state();
    let old_revision = entity.revision();

    // From this point on access to the entity is serialized: we are about
    // to change its state.
    let mut locked = if options.lock_entity {
        let locked = tx.load_locked(&entity_id).await?;
        match old_revision {
            Some(expected) => {
                // Revision is the primary conflict signal.
                if locked.revision() != Some(expected) {
                    return Err(Error::ConcurrentRevisionUpdate {
                        workflow_id: workflow.id().to_owned(),
                        entity_id,
                        state: old_state,
                    });
                }
            }
            None => {
                // State comparison only matters without revision tracking.
                let actual = locked.state();
                if actual != old_state {
                    return Err(Error::OldStateInconsistence {
                        entity_id,
                        expected: old_state,
                        actual,
                    });
                }
            }
        }
        locked
    } else {
        entity.clone()
    };

    let outcomes = mutator(&mut locked).map_err(|err| Error::from_handler(&message.id, err))?;
    if let Some(revision) = locked.revision() {
        locked.set_revision(revision + 1);
    }
    tx.save(&locked).await?;

    // Drain the outcome sequence in order: values accumulate, sub-messages
    // dispatch within this unit of work with their deferrable effects
    // deferred to the outermost dispatch.
    let mut results = Vec::new();
    let mut children_pending = DeferredEffects::new();
    for outcome in outcomes {
        match outcome {
            TransitionOutcome::Value(value) => results.push(TransitionValue::Value(value)),
            TransitionOutcome::Submessage(sub) => {
                let (child_entity, child_message, lock_child) = sub.resolve(&locked, message);
                let child_options = DispatchOptions {
                    transactional_side_effects: options.transactional_side_effects,
                    lock_entity: lock_child,
                    defer_side_effects: true,
                    extra: options.extra.clone(),
                };

                let child = dispatch_in::<E, A, S>(
                    registry,
                    &mut *tx,
                    child_entity,
                    child_message,
                    child_options,
                )
                .await?;

                let child_workflow = registry.by_entity(&child.old_entity)?;
                child_workflow
                    .notify_message_handled(TransitionEvent {
                        workflow_id: child_workflow.id(),
                        message_id: &child.message.id,
                        message_uid: child.message.unique_id,
                        actor: &child.message.actor,
                        old_entity: &child.old_entity,
                        new_entity: &child.entity,
                        new_revision: child.entity.revision(),
                        dehydrated_params: child.message.dehydrated_params(),
                        results: &child.results,
                        applied_effects: &child.applied,
                    })
                    .await;

                let DispatchCore {
                    entity: child_new,
                    results: child_results,
                    applied: child_applied,
                    pending: child_pending,
                    ..
                } = child;
                children_pending.extend(child_pending);
                results.push(TransitionValue::Submessage(Box::new(DispatchOutcome {
                    entity: child_new,
                    results: child_results,
                    effects: SideEffectResult {
                        applied: child_applied,
                        deferred: None,
                    },
                })));
            }
        }
    }

    workflow
        .notify_transition_handled(TransitionEvent {
            workflow_id: workflow.id(),
            message_id: &message.id,
            message_uid: message.unique_id,
            actor: &message.actor,
            old_entity: entity,
            new_entity: &locked,
            new_revision: locked.revision(),
            dehydrated_params: message.dehydrated_params(),
            results: &results,
            // Effects have not run yet at this point.
            applied_effects: &[],
        })
        .await;

    let new_state = locked.state();
    info!(
        entity_id = %entity_id,
        from = %old_state,
        to = %new_state,
        message_id = %message.id,
        "performed state transition"
    );

    // Side effects for the concrete (from, to, message) transition.
    let (transactional, deferrable) =
        workflow
            .library()
            .effects_for_transition(&old_state, &new_state, &message.id);
    if transactional.is_empty() && deferrable.is_empty() {
        info!(
            entity_id = %entity_id,
            from = %old_state,
            to = %new_state,
            "no side effect registered for transition"
        );
    }

    let spec = message
        .spec()
        .cloned()
        .ok_or_else(|| Error::MessageSpecNotRegistered(message.id.clone()))?;
    let ctx = Arc::new(EffectContext {
        old_entity: entity.clone(),
        entity: locked.clone(),
        actor: message.actor.clone(),
        params: message.params().clone(),
        message_id: message.id.clone(),
        message_uid: message.unique_id,
        spec,
        extra: options.extra.clone(),
        created_at: OffsetDateTime::now_utc(),
    });

    // Transactional effects run now, in registration order; a failure
    // propagates before commit and aborts the whole unit of work.
    let mut applied = Vec::new();
    for entry in transactional {
        let name = entry.name();
        let value = entry
            .effect
            .perform(&ctx)
            .await
            .map_err(|cause| Error::EffectFailed {
                name: name.clone(),
                cause,
            })?;
        applied.push(EffectResult { name, value });
    }

    // Deferrable effects: own ones first, then everything the sub-messages
    // deferred up.
    let mut pending = DeferredEffects::new();
    for entry in deferrable {
        pending.push(entry.effect.clone(), ctx.clone());
    }
    pending.extend(children_pending);

    Ok(TransitionRecord {
        entity: locked,
        results,
        applied,
        pending,
    })
}
