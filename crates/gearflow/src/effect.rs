//! Side effects: actions run after a transition completes.
//!
//! Effects are keyed by `(from-state, to-state, message-id)` and come in two
//! flavors. *Transactional* effects run inside the unit of work before
//! commit, in registration order; a failure aborts the whole transition.
//! *Deferrable* effects either run right after the transactional ones
//! (default), run immediately after commit, or are packaged as a
//! [`DeferredEffects`] value the caller invokes later — see
//! [`DispatchOptions`](crate::DispatchOptions).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::message::MessageSpec;

/// Context handed to a side effect.
///
/// Carries both images of the transitioned entity, the message that caused
/// the transition, and the extra context of the dispatch call.
pub struct EffectContext<E, A> {
    /// The entity as read before the transition (pre-image).
    pub old_entity: E,
    /// The entity after the transition (post-image).
    pub entity: E,
    /// Sender of the message.
    pub actor: A,
    /// Cleaned, wrapped message parameters.
    pub params: Value,
    /// Canonical id of the handled message.
    pub message_id: MessageId,
    /// Unique id of the handled message instance.
    pub message_uid: Uuid,
    /// Spec of the handled message.
    pub spec: Arc<MessageSpec>,
    /// Extra JSON context supplied by the dispatch call.
    pub extra: Value,
    /// When this context was created.
    pub created_at: OffsetDateTime,
}

/// An action run after a state transition.
///
/// # Example
///
/// ```ignore
/// struct NotifyOwner {
///     mailer: Mailer,
/// }
///
/// #[async_trait]
/// impl SideEffect<Window, User> for NotifyOwner {
///     async fn perform(&self, ctx: &EffectContext<Window, User>) -> anyhow::Result<Value> {
///         self.mailer
///             .send(&ctx.entity.owner_email, "window state changed")
///             .await?;
///         Ok(json!({ "notified": ctx.entity.owner_email }))
///     }
/// }
/// ```
#[async_trait]
pub trait SideEffect<E, A>: Send + Sync + 'static {
    /// Name used in logs, results and failure reports. Defaults to the
    /// implementing type's name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_owned()
    }

    /// Run the effect.
    async fn perform(&self, ctx: &EffectContext<E, A>) -> anyhow::Result<Value>;
}

/// Adapter wrapping a plain function as a named side effect.
pub struct FnEffect<F> {
    name: String,
    f: F,
}

/// Wrap a synchronous function as a [`SideEffect`].
pub fn effect_fn<E, A, F>(name: impl Into<String>, f: F) -> FnEffect<F>
where
    F: Fn(&EffectContext<E, A>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    FnEffect {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<E, A, F> SideEffect<E, A> for FnEffect<F>
where
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
    F: Fn(&EffectContext<E, A>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn perform(&self, ctx: &EffectContext<E, A>) -> anyhow::Result<Value> {
        (self.f)(ctx)
    }
}

/// Result of one executed side effect.
#[derive(Debug, Clone)]
pub struct EffectResult {
    /// The effect's name.
    pub name: String,
    /// The value it returned.
    pub value: Value,
}

/// Deferrable effects packaged for execution after commit.
///
/// Returned from a dispatch with
/// [`defer_side_effects`](crate::DispatchOptions::defer_side_effects) set.
/// Failures from [`run`](Self::run) surface *after* the transition has
/// committed; nothing compensates — an accepted best-effort boundary.
pub struct DeferredEffects<E, A> {
    jobs: Vec<DeferredJob<E, A>>,
}

struct DeferredJob<E, A> {
    effect: Arc<dyn SideEffect<E, A>>,
    ctx: Arc<EffectContext<E, A>>,
}

impl<E: 'static, A: 'static> DeferredEffects<E, A> {
    pub(crate) fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub(crate) fn push(&mut self, effect: Arc<dyn SideEffect<E, A>>, ctx: Arc<EffectContext<E, A>>) {
        self.jobs.push(DeferredJob { effect, ctx });
    }

    pub(crate) fn extend(&mut self, other: DeferredEffects<E, A>) {
        self.jobs.extend(other.jobs);
    }

    /// Number of pending effects.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether anything is pending.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run the pending effects in order, collecting their results.
    pub async fn run(self) -> Result<Vec<EffectResult>> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let name = job.effect.name();
            let value = job
                .effect
                .perform(&job.ctx)
                .await
                .map_err(|cause| Error::EffectFailed {
                    name: name.clone(),
                    cause,
                })?;
            results.push(EffectResult { name, value });
        }
        Ok(results)
    }
}

/// Side-effect results of one dispatch.
pub struct SideEffectResult<E, A> {
    /// Results of effects that already ran, in execution order.
    pub applied: Vec<EffectResult>,
    /// Effects deferred to the caller, present only when the dispatch was
    /// made with `defer_side_effects`.
    pub deferred: Option<DeferredEffects<E, A>>,
}

impl<E, A> SideEffectResult<E, A> {
    /// Result value of the effect with the given name, if it ran.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.applied
            .iter()
            .find(|result| result.name == name)
            .map(|result| &result.value)
    }
}
