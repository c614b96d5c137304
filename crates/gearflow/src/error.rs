//! Error types for gearflow.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::id::{EntityId, MessageId, StateId};

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Field-level validation failures reported by a message validator.
///
/// Errors that are not tied to a specific field are collected under the
/// `"__all__"` key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Key used for errors not attributable to a single field.
    pub const NON_FIELD: &'static str = "__all__";

    /// Create an empty error set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error set with a single non-field message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(Self::NON_FIELD, message);
        errors
    }

    /// Record an error against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Whether any error was recorded.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The recorded errors, keyed by field name.
    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

/// Errors that can occur in gearflow operations.
///
/// Everything propagates to the dispatch caller uncaught — there is no
/// retry or local recovery inside the engine. Conflict errors
/// ([`Error::ConcurrentRevisionUpdate`], [`Error::OldStateInconsistence`])
/// mean the caller should re-read the entity and re-dispatch from scratch.
#[derive(Debug, Error)]
pub enum Error {
    /// The entity's workflow-type tag has no registered workflow.
    #[error("no workflow registered for type '{0}'")]
    WorkflowNotLoaded(String),

    /// A workflow with the same id was registered twice.
    #[error("workflow '{0}' is already registered")]
    WorkflowAlreadyRegistered(String),

    /// No handler is registered for this `(state, message)` pair at all.
    ///
    /// Distinct from [`Error::PermissionDenied`], where handlers exist but
    /// none authorizes the sender.
    #[error("no handler registered for message '{message_id}' in state '{state}'")]
    UnhandledMessage {
        /// The entity's state at dispatch time.
        state: StateId,
        /// The message that had no handler.
        message_id: MessageId,
    },

    /// A handler or a registration pattern referenced a state outside the
    /// workflow's valid state set.
    #[error("state '{0}' is not part of the workflow state set")]
    IllegalState(StateId),

    /// Handlers exist for this `(state, message)` pair, but none accepted
    /// the sender.
    #[error("sender is not permitted to send message '{message_id}' to entity '{entity_id}'")]
    PermissionDenied {
        entity_id: EntityId,
        message_id: MessageId,
    },

    /// The resource's permission checker rejected the sender.
    #[error("sender is not permitted to use resource '{resource_id}' on entity '{entity_id}'")]
    ResourcePermissionDenied {
        entity_id: EntityId,
        resource_id: String,
    },

    /// Raw message parameters failed validation.
    #[error("message parameters failed validation: {0}")]
    MessageValidation(ValidationErrors),

    /// Raw creation parameters failed validation.
    #[error("creation parameters failed validation: {0}")]
    CreateValidation(ValidationErrors),

    /// The handler explicitly declined to act. A signal rather than a
    /// defect, but callers must handle it.
    #[error("message '{message_id}' was ignored by its handler")]
    MessageIgnored {
        message_id: MessageId,
        /// The cleaned parameters the handler saw.
        params: Value,
    },

    /// A dynamic handler returned a result shape the engine cannot
    /// interpret. This is an implementation defect, not a business outcome.
    #[error("handler for message '{message_id}' returned an unsupported result: {detail}")]
    WrongHandlerResult {
        message_id: MessageId,
        detail: String,
    },

    /// The entity's revision counter changed between the optimistic read and
    /// the locked re-read — another transition slipped in.
    #[error(
        "revision of entity '{entity_id}' changed concurrently \
         (workflow '{workflow_id}', read at state '{state}')"
    )]
    ConcurrentRevisionUpdate {
        workflow_id: String,
        entity_id: EntityId,
        state: StateId,
    },

    /// The entity's state changed between the optimistic read and the locked
    /// re-read. Only reported when revision tracking is disabled.
    #[error("state of entity '{entity_id}' changed concurrently: expected '{expected}', found '{actual}'")]
    OldStateInconsistence {
        entity_id: EntityId,
        expected: StateId,
        actual: StateId,
    },

    /// A group path names no registered messages.
    #[error("message group path '{0}' names no registered messages")]
    GroupPathEmpty(String),

    /// No message spec is registered with this id.
    #[error("no message spec registered with id '{0}'")]
    MessageSpecNotRegistered(MessageId),

    /// A message spec with this id (or this leaf within its group) was
    /// registered twice.
    #[error("message spec already registered for '{0}'")]
    DuplicateMessage(MessageId),

    /// A resource with this id was registered twice.
    #[error("resource '{0}' is already registered")]
    DuplicateResource(String),

    /// The workflow definition itself is unusable (empty state set, handler
    /// without a performer, missing entity factory, ...).
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    /// The store holds no entity with this id.
    #[error("entity '{0}' not found")]
    EntityNotFound(EntityId),

    /// Failed to serialize or deserialize message or result data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend failure (connection, poisoning, I/O). A system-level
    /// failure, not a concurrency conflict — treating them the same breaks
    /// retry policies.
    #[error("storage backend error: {0}")]
    Backend(anyhow::Error),

    /// A handler or mutator reported an application-level failure.
    #[error("handler failed for message '{message_id}': {cause}")]
    HandlerFailed {
        message_id: MessageId,
        cause: anyhow::Error,
    },

    /// A side effect reported an application-level failure.
    #[error("side effect '{name}' failed: {cause}")]
    EffectFailed { name: String, cause: anyhow::Error },
}

impl Error {
    /// Wrap a handler-reported error, preserving typed engine errors that
    /// handlers re-raise (e.g. [`Error::WrongHandlerResult`] from the JSON
    /// adapter).
    pub(crate) fn from_handler(message_id: &MessageId, err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            // Adapters cannot know the dispatched id; fill it in here.
            Ok(Error::WrongHandlerResult { detail, .. }) => Error::WrongHandlerResult {
                message_id: message_id.clone(),
                detail,
            },
            Ok(typed) => typed,
            Err(cause) => Error::HandlerFailed {
                message_id: message_id.clone(),
                cause,
            },
        }
    }
}
