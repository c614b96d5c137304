//! Notification collaborator: fire-and-forget observers of transitions.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::TransitionValue;
use crate::effect::EffectResult;
use crate::entity::WorkflowEntity;
use crate::id::MessageId;

/// Snapshot of one handled message, passed to observers.
pub struct TransitionEvent<'a, E, A> {
    /// Id of the workflow that handled the message.
    pub workflow_id: &'a str,
    /// Canonical id of the handled message.
    pub message_id: &'a MessageId,
    /// Unique id of the message instance.
    pub message_uid: Uuid,
    /// Sender of the message.
    pub actor: &'a A,
    /// The entity as read before the transition.
    pub old_entity: &'a E,
    /// The entity after the transition.
    pub new_entity: &'a E,
    /// Revision after the transition, when tracking is enabled.
    pub new_revision: Option<u64>,
    /// Audit projection of the parameters, if the spec defines one.
    pub dehydrated_params: Option<&'a Value>,
    /// Accumulated handler results, including sub-message outcomes.
    pub results: &'a [TransitionValue<E, A>],
    /// Side-effect results evaluated so far. Empty for
    /// `transition_handled`, which fires before effects run.
    pub applied_effects: &'a [EffectResult],
}

/// Observer of workflow transitions.
///
/// This is a notification, not a participant: observer failures are logged
/// and never roll back or abort the transition. Both hooks default to
/// no-ops.
///
/// `transition_handled` fires inside the unit of work, right after the
/// mutation; `message_handled` fires once the dispatch has completed (after
/// commit for the outermost message).
#[async_trait]
pub trait TransitionObserver<E, A>: Send + Sync + 'static
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    /// Called inside the unit of work after the mutation ran.
    async fn transition_handled(&self, _event: TransitionEvent<'_, E, A>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the dispatch completed.
    async fn message_handled(&self, _event: TransitionEvent<'_, E, A>) -> anyhow::Result<()> {
        Ok(())
    }
}
