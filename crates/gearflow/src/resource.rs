//! Permission-gated capabilities exposed alongside messages.

use std::sync::Arc;

use serde_json::Value;

use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::permission::PermissionChecker;

/// Produces a resource's value for a permitted sender.
///
/// Plain closures implement the trait.
pub trait ResourceHandler<E, A>: Send + Sync + 'static {
    /// Produce the resource.
    fn perform(&self, entity: &E, actor: &A) -> anyhow::Result<Value>;
}

impl<E, A, F> ResourceHandler<E, A> for F
where
    F: Fn(&E, &A) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn perform(&self, entity: &E, actor: &A) -> anyhow::Result<Value> {
        self(entity, actor)
    }
}

/// A gated capability: available to a sender iff its checker passes.
///
/// Unlike messages, acquiring a resource never transitions state.
pub struct WorkflowResource<E, A> {
    id: String,
    description: Option<String>,
    slug: String,
    checker: PermissionChecker<E, A>,
    handler: Arc<dyn ResourceHandler<E, A>>,
}

impl<E, A> WorkflowResource<E, A>
where
    E: WorkflowEntity,
    A: 'static,
{
    pub(crate) fn new(
        id: String,
        description: Option<String>,
        slug: Option<String>,
        checker: PermissionChecker<E, A>,
        handler: Arc<dyn ResourceHandler<E, A>>,
    ) -> Self {
        let slug = slug.unwrap_or_else(|| id.clone());
        Self {
            id,
            description,
            slug,
            checker,
            handler,
        }
    }

    /// The resource id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Optional human-readable description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// URL-ish short name; defaults to the id.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The resource's permission checker.
    pub fn checker(&self) -> &PermissionChecker<E, A> {
        &self.checker
    }

    /// Check permission and produce the resource.
    ///
    /// Fails with [`Error::ResourcePermissionDenied`] when the checker
    /// rejects the sender.
    pub fn acquire(&self, entity: &E, actor: &A) -> Result<Value> {
        if !self.checker.check(entity, actor) {
            return Err(Error::ResourcePermissionDenied {
                entity_id: entity.entity_id(),
                resource_id: self.id.clone(),
            });
        }
        self.handler
            .perform(entity, actor)
            .map_err(|cause| Error::EffectFailed {
                name: self.id.clone(),
                cause,
            })
    }
}
