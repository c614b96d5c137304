//! Projection of the messages and resources a sender may currently use.
//!
//! One shared permission cache is filled per entity — every atomic checker
//! relevant to the entity's current state is evaluated exactly once — and
//! every message/resource registered for that state is filtered against it.

use std::collections::HashMap;

use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::id::{MessageId, StateId};
use crate::permission::PermissionCache;
use crate::workflow::Workflow;

/// A message the sender is currently permitted to send.
#[derive(Debug, Clone)]
pub struct AllowedMessage {
    /// Canonical message id.
    pub id: MessageId,
    /// The spec's display label.
    pub title: String,
    /// The spec's sort priority.
    pub rank: i32,
}

/// A resource the sender may currently acquire.
#[derive(Debug, Clone)]
pub struct AllowedResource {
    /// Resource id.
    pub id: String,
    /// Optional description.
    pub description: Option<String>,
    /// Short name.
    pub slug: String,
}

/// Everything a sender may currently do with an entity.
///
/// Messages are sorted by rank, then id; resources by id.
#[derive(Debug, Clone, Default)]
pub struct Allowed {
    pub messages: Vec<AllowedMessage>,
    pub resources: Vec<AllowedResource>,
}

impl Allowed {
    /// Look up an allowed message by id.
    pub fn message(&self, id: &MessageId) -> Option<&AllowedMessage> {
        self.messages.iter().find(|message| &message.id == id)
    }

    /// Whether the message is allowed.
    pub fn is_message_allowed(&self, id: &MessageId) -> bool {
        self.message(id).is_some()
    }

    /// Look up an allowed resource by id.
    pub fn resource(&self, id: &str) -> Option<&AllowedResource> {
        self.resources.iter().find(|resource| resource.id == id)
    }
}

/// Compute the allowed messages and resources for `(actor, entity)`.
///
/// Fails with [`Error::IllegalState`] when the entity's state is not part
/// of the workflow's valid state set.
pub fn allowed<E, A>(workflow: &Workflow<E, A>, entity: &E, actor: &A) -> Result<Allowed>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    let state = entity.state();
    if !workflow.is_valid_state(&state) {
        return Err(Error::IllegalState(state));
    }

    let mut cache = PermissionCache::new();
    for atom in workflow.library().checkers_by_state(&state) {
        cache.prime(atom, entity, actor);
    }

    Ok(project(workflow, entity, actor, &state, &cache))
}

/// Batched variant of [`allowed`] for many entities and one sender.
///
/// Checker *sets* are computed once per distinct state and shared across
/// the batch (checkers deduplicate by identity); checker *results* depend
/// on the entity, so each entity gets its own cache. Results are in input
/// order.
pub fn allowed_for_many<E, A>(
    workflow: &Workflow<E, A>,
    entities: &[E],
    actor: &A,
) -> Result<Vec<Allowed>>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    let mut checkers_per_state = HashMap::new();

    let mut out = Vec::with_capacity(entities.len());
    for entity in entities {
        let state = entity.state();
        if !workflow.is_valid_state(&state) {
            return Err(Error::IllegalState(state));
        }

        let atoms = checkers_per_state
            .entry(state.clone())
            .or_insert_with(|| workflow.library().checkers_by_state(&state).collect::<Vec<_>>());

        let mut cache = PermissionCache::new();
        for atom in atoms.iter() {
            cache.prime(atom, entity, actor);
        }
        out.push(project(workflow, entity, actor, &state, &cache));
    }
    Ok(out)
}

fn project<E, A>(
    workflow: &Workflow<E, A>,
    entity: &E,
    actor: &A,
    state: &StateId,
    cache: &PermissionCache,
) -> Allowed
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    let library = workflow.library();

    let mut messages = Vec::new();
    if let Some(candidates) = library.message_candidates(state) {
        for (message_id, entries) in candidates {
            let permitted = entries
                .iter()
                .any(|entry| entry.checker.check_cached(entity, actor, cache));
            if !permitted {
                continue;
            }
            // Handlers may be registered for ids without a spec only in
            // group corner cases; skip those rather than fail projection.
            if let Ok(spec) = library.spec(message_id) {
                messages.push(AllowedMessage {
                    id: spec.id().clone(),
                    title: spec.verb_label().to_owned(),
                    rank: spec.rank_value(),
                });
            }
        }
    }
    messages.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));

    let mut resources = Vec::new();
    for resource in library.resources_in_state(state) {
        if resource.checker().check_cached(entity, actor, cache) {
            resources.push(AllowedResource {
                id: resource.id().to_owned(),
                description: resource.description().map(str::to_owned),
                slug: resource.slug().to_owned(),
            });
        }
    }
    resources.sort_by(|a, b| a.id.cmp(&b.id));

    Allowed {
        messages,
        resources,
    }
}
