//! Messages dispatched from within a transition, sharing its unit of work.

use serde_json::Value;

use crate::entity::WorkflowEntity;
use crate::id::MessageId;
use crate::message::Message;

/// What a sub-message is addressed to.
pub enum SubmessageTarget<E> {
    /// A specific entity, usually a child of the one being transitioned.
    Entity(Box<E>),
    /// The entity being transitioned itself. Never re-locked — the parent
    /// transition already holds the lock.
    Parent,
}

/// A message dispatched recursively from a mutator.
///
/// Sub-messages run inside the parent's unit of work: their transitions
/// commit or roll back with the parent, and their deferrable side effects
/// are deferred to the outermost dispatch. Parameters are passed pre-cleaned
/// and skip validation.
///
/// # Example
///
/// ```ignore
/// HandlerOutcome::Mutate(Box::new(move |window: &mut Window| {
///     window.set_state("minimized".into());
///     Ok(vec![
///         TransitionOutcome::Value(json!({ "minimized": window.entity_id() })),
///         TransitionOutcome::Submessage(Submessage::to(child_a, "minimize", actor.clone())),
///         TransitionOutcome::Submessage(Submessage::to(child_b, "minimize", actor)),
///     ])
/// }))
/// ```
pub struct Submessage<E, A> {
    pub(crate) target: SubmessageTarget<E>,
    pub(crate) message_id: MessageId,
    pub(crate) actor: A,
    pub(crate) params: Value,
    pub(crate) lock_target: bool,
}

impl<E, A> Submessage<E, A>
where
    E: WorkflowEntity,
{
    /// Address a message to `target`. The target's row is locked within the
    /// parent's unit of work unless [`Self::without_lock`] is called.
    pub fn to(target: E, message_id: impl Into<MessageId>, actor: A) -> Self {
        Self {
            target: SubmessageTarget::Entity(Box::new(target)),
            message_id: message_id.into(),
            actor,
            params: Value::Object(serde_json::Map::new()),
            lock_target: true,
        }
    }

    /// Address a message to the entity being transitioned. The parent
    /// transition already holds its lock, so none is taken.
    pub fn recursive(message_id: impl Into<MessageId>, actor: A) -> Self {
        Self {
            target: SubmessageTarget::Parent,
            message_id: message_id.into(),
            actor,
            params: Value::Object(serde_json::Map::new()),
            lock_target: false,
        }
    }

    /// Attach pre-cleaned parameters. They skip the spec's validator but
    /// still pass through its params wrapper.
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Skip locking the target. Use when the target shares a lock with an
    /// ancestor in the same unit of work; the caller is then responsible
    /// for consistency.
    pub fn without_lock(mut self) -> Self {
        self.lock_target = false;
        self
    }

    /// Resolve into the concrete entity, message and lock flag, linking the
    /// message under the parent.
    pub(crate) fn resolve(self, parent_entity: &E, parent: &Message<A>) -> (E, Message<A>, bool) {
        let (entity, lock) = match self.target {
            SubmessageTarget::Entity(entity) => (*entity, self.lock_target),
            // The parent holds the lock already.
            SubmessageTarget::Parent => (parent_entity.clone(), false),
        };
        let message = Message::pre_cleaned(self.actor, self.message_id, self.params)
            .with_parent(parent.unique_id, parent.group_id);
        (entity, message, lock)
    }
}
