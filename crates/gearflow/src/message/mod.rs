//! Runtime messages and their specifications.

pub mod spec;
pub mod submessage;

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::library::Library;

pub use spec::{EmptyValidator, FnValidator, MessageSpec, TypedValidator, Validator};
pub use submessage::{Submessage, SubmessageTarget};

/// A message in flight: an actor, a message id and parameters.
///
/// Parameters exist in up to three forms: the raw input, the cleaned value
/// produced by the spec's validator, and the wrapped value the handler sees.
/// [`Message::clean`] moves a message through those forms and canonicalizes
/// the id against the registered spec.
pub struct Message<A> {
    /// Sender of the message.
    pub actor: A,
    /// Message id; canonicalized to the spec's id by `clean`.
    pub id: MessageId,
    /// Parameters exactly as received.
    pub raw_params: Value,
    /// Validator output, or pre-cleaned parameters for sub-messages.
    clean_params: Option<Value>,
    /// Wrapped parameters the handler sees; `Null` until cleaned.
    params: Value,
    /// Audit projection of the parameters, if the spec defines one.
    dehydrated_params: Option<Value>,
    /// Unique identifier of this message instance.
    pub unique_id: Uuid,
    /// Unique id of the message this one was spawned from, if any.
    pub parent_id: Option<Uuid>,
    /// Correlation id shared by a message and all its sub-messages.
    pub group_id: Uuid,
    spec: Option<Arc<MessageSpec>>,
}

impl<A> Message<A> {
    /// Create a message carrying raw, not-yet-validated parameters.
    pub fn new(actor: A, id: impl Into<MessageId>, raw_params: Value) -> Self {
        let unique_id = Uuid::new_v4();
        Self {
            actor,
            id: id.into(),
            raw_params,
            clean_params: None,
            params: Value::Null,
            dehydrated_params: None,
            unique_id,
            parent_id: None,
            group_id: unique_id,
            spec: None,
        }
    }

    /// Create a message whose parameters are already validated; `clean`
    /// will skip the validator but still apply the spec's params wrapper.
    pub fn pre_cleaned(actor: A, id: impl Into<MessageId>, clean_params: Value) -> Self {
        let mut message = Self::new(actor, id, Value::Null);
        message.clean_params = Some(clean_params);
        message
    }

    /// Link this message under a parent, inheriting its correlation group.
    pub fn with_parent(mut self, parent_uid: Uuid, parent_group: Uuid) -> Self {
        self.parent_id = Some(parent_uid);
        self.group_id = parent_group;
        self
    }

    /// The wrapped parameters the handler sees. `Null` before `clean`.
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// The audit projection recorded by `clean`, if the spec defines one.
    pub fn dehydrated_params(&self) -> Option<&Value> {
        self.dehydrated_params.as_ref()
    }

    /// The resolved spec. `None` before `clean`.
    pub fn spec(&self) -> Option<&Arc<MessageSpec>> {
        self.spec.as_ref()
    }

    /// Resolve the spec, validate and wrap the parameters, canonicalize the
    /// id, and record the audit projection.
    ///
    /// Fails with [`Error::MessageSpecNotRegistered`] for an unknown id and
    /// [`Error::MessageValidation`] when the validator rejects the raw
    /// parameters.
    pub(crate) fn clean<E: WorkflowEntity>(&mut self, library: &Library<E, A>) -> Result<()> {
        let spec = library.spec(&self.id)?.clone();

        let cleaned = match self.clean_params.take() {
            Some(cleaned) => cleaned,
            None => spec
                .clean_params(&self.raw_params)
                .map_err(Error::MessageValidation)?,
        };

        self.params = spec.wrap_params(cleaned.clone());
        self.clean_params = Some(cleaned);
        self.dehydrated_params = spec.dehydrated(&self.params);
        self.id = spec.id().clone();
        self.spec = Some(spec);
        Ok(())
    }
}
