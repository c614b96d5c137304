//! Entity creation and workflow start.

use serde_json::Value;

use crate::dispatch::{dispatch, DispatchOutcome};
use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::store::EntityStore;
use crate::workflow::WorkflowRegistry;

/// Create a workflow-governed entity from raw parameters.
///
/// Validates the parameters with the workflow's create-validator (failing
/// with [`Error::CreateValidation`]), builds the entity via the workflow's
/// registered entity factory, persists it, and runs the post-create hook.
/// The factory is responsible for stamping the workflow-type tag and the
/// initial state onto the entity.
pub async fn create<E, A, S>(
    registry: &WorkflowRegistry<E, A>,
    store: &S,
    workflow_type: &str,
    actor: &A,
    raw_params: Value,
) -> Result<E>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
    S: EntityStore<E>,
{
    let workflow = registry
        .get(workflow_type)
        .ok_or_else(|| Error::WorkflowNotLoaded(workflow_type.to_owned()))?;

    let cleaned = workflow
        .create_validator()
        .validate(&raw_params)
        .map_err(Error::CreateValidation)?;

    let factory = workflow.entity_factory().ok_or_else(|| {
        Error::InvalidWorkflow(format!("workflow '{}' has no entity factory", workflow.id()))
    })?;
    let entity = factory(actor, &cleaned).map_err(Error::Backend)?;
    let entity = store.insert(&entity).await?;

    if let Some(hook) = workflow.post_create() {
        hook(actor, &cleaned, &entity);
    }

    Ok(entity)
}

/// Send the workflow's configured start message to an entity sitting in
/// the initial state.
pub async fn start_workflow<E, A, S>(
    registry: &WorkflowRegistry<E, A>,
    store: &S,
    entity: &E,
    actor: A,
    start_params: Value,
) -> Result<DispatchOutcome<E, A>>
where
    E: WorkflowEntity,
    A: Clone + Send + Sync + 'static,
    S: EntityStore<E>,
{
    let workflow = registry.by_entity(entity)?;
    let start_message = workflow.start_message().as_str().to_owned();
    dispatch(registry, store, entity, actor, &start_message, start_params).await
}
