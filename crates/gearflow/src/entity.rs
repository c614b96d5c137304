//! The contract workflow-aware entities implement.

use crate::id::{EntityId, StateId};

/// Typed accessor contract for entities governed by a workflow.
///
/// The engine never owns entity storage; it reads and writes entities through
/// this interface and hands persistence to the
/// [`EntityStore`](crate::store::EntityStore) collaborator.
///
/// # Revision tracking
///
/// `revision` is an optimistic-concurrency counter. Returning `Some` enables
/// revision-based conflict detection: the engine compares the counter under
/// the row lock and bumps it on every transition. Returning `None` (the
/// default) disables it; the engine then falls back to comparing states,
/// which cannot distinguish an A→B→A round-trip from no change.
///
/// # Example
///
/// ```ignore
/// impl WorkflowEntity for Window {
///     fn entity_id(&self) -> EntityId {
///         EntityId::new(&self.id)
///     }
///
///     fn workflow_type(&self) -> &str {
///         "simple"
///     }
///
///     fn state(&self) -> StateId {
///         self.open_status.clone()
///     }
///
///     fn set_state(&mut self, state: StateId) {
///         self.open_status = state;
///     }
///
///     fn revision(&self) -> Option<u64> {
///         Some(self.revision)
///     }
///
///     fn set_revision(&mut self, revision: u64) {
///         self.revision = revision;
///     }
/// }
/// ```
pub trait WorkflowEntity: Clone + Send + Sync + 'static {
    /// The entity's identifier in the store.
    fn entity_id(&self) -> EntityId;

    /// Tag selecting which registered workflow governs this entity.
    fn workflow_type(&self) -> &str;

    /// The entity's current state.
    fn state(&self) -> StateId;

    /// Overwrite the entity's current state.
    fn set_state(&mut self, state: StateId);

    /// Current revision counter, or `None` when revision tracking is
    /// disabled for this entity type.
    fn revision(&self) -> Option<u64> {
        None
    }

    /// Overwrite the revision counter. Only called when [`Self::revision`]
    /// returns `Some`.
    fn set_revision(&mut self, _revision: u64) {}
}
