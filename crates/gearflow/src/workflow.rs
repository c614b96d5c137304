//! The workflow facade and the process-lifetime registry.

use std::collections::HashMap;
use std::sync::Arc;

use nonempty::NonEmpty;
use serde_json::Value;
use tracing::warn;

use crate::config::{DEFAULT_START_MESSAGE, INITIAL_STATE};
use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::id::{MessageId, StateId};
use crate::library::{EffectDef, HandlerDef, Library, LibraryBuilder, ResourceDef};
use crate::message::{EmptyValidator, MessageSpec, Validator};
use crate::observer::{TransitionEvent, TransitionObserver};
use crate::permission::PermissionChecker;
use crate::visualization::{self, StateMachineDefinition};

/// Builds an entity from validated creation parameters.
pub type EntityFactory<E, A> = Arc<dyn Fn(&A, &Value) -> anyhow::Result<E> + Send + Sync>;

/// Hook run after an entity was created and persisted.
pub type PostCreateHook<E, A> = Arc<dyn Fn(&A, &Value, &E) + Send + Sync>;

/// One workflow: the states, messages, handlers, effects and resources
/// governing a class of entity.
///
/// Built once at process start via [`Workflow::builder`] and registered in a
/// [`WorkflowRegistry`]. Read-mostly afterwards.
pub struct Workflow<E, A> {
    id: String,
    verbose_name: String,
    rank: i32,
    initial_state: StateId,
    start_message: MessageId,
    states: NonEmpty<StateId>,
    state_names: HashMap<StateId, String>,
    library: Library<E, A>,
    observers: Vec<Arc<dyn TransitionObserver<E, A>>>,
    entity_factory: Option<EntityFactory<E, A>>,
    create_validator: Arc<dyn Validator>,
    post_create: Option<PostCreateHook<E, A>>,
}

impl<E, A> Workflow<E, A>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    /// Start building a workflow with the given id.
    pub fn builder(id: impl Into<String>) -> WorkflowBuilder<E, A> {
        WorkflowBuilder::new(id.into())
    }

    /// The workflow id (the value entities carry as their workflow-type
    /// tag).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name; defaults to the id.
    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    /// Sort priority among registered workflows.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// The distinguished initial state.
    pub fn initial_state(&self) -> &StateId {
        &self.initial_state
    }

    /// Message that moves entities out of the initial state.
    pub fn start_message(&self) -> &MessageId {
        &self.start_message
    }

    /// The declared states, not including the initial state.
    pub fn states(&self) -> &NonEmpty<StateId> {
        &self.states
    }

    /// Display name of a state, if one was declared.
    pub fn state_name(&self, state: &StateId) -> Option<&str> {
        self.state_names.get(state).map(String::as_str)
    }

    /// The compiled registration index.
    pub fn library(&self) -> &Library<E, A> {
        &self.library
    }

    /// Whether `state` is the initial state or a declared state.
    pub fn is_valid_state(&self, state: &StateId) -> bool {
        state == &self.initial_state || self.states.iter().any(|s| s == state)
    }

    /// Whether `state` is a legal transition destination. The initial state
    /// is never a destination.
    pub fn is_destination_state(&self, state: &StateId) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Whether any handler accepts `message_id` in `state`.
    pub fn is_valid_message(&self, state: &StateId, message_id: &MessageId) -> bool {
        self.library.is_valid_message(state, message_id)
    }

    /// States with at least one registered handler.
    pub fn nonfinal_states(&self) -> Vec<&StateId> {
        self.library.nonfinal_states()
    }

    /// Introspection projection of the compiled state machine.
    pub fn state_machine(&self) -> StateMachineDefinition {
        visualization::state_machine(self)
    }

    pub(crate) fn entity_factory(&self) -> Option<&EntityFactory<E, A>> {
        self.entity_factory.as_ref()
    }

    pub(crate) fn create_validator(&self) -> &Arc<dyn Validator> {
        &self.create_validator
    }

    pub(crate) fn post_create(&self) -> Option<&PostCreateHook<E, A>> {
        self.post_create.as_ref()
    }

    /// Notify observers of a mutation inside the unit of work. Failures are
    /// logged, never propagated.
    pub(crate) async fn notify_transition_handled(&self, event: TransitionEvent<'_, E, A>) {
        for observer in &self.observers {
            if let Err(err) = observer
                .transition_handled(reborrow_event(&event))
                .await
            {
                warn!(workflow_id = %self.id, error = %err, "transition observer failed");
            }
        }
    }

    /// Notify observers of a completed dispatch. Failures are logged, never
    /// propagated.
    pub(crate) async fn notify_message_handled(&self, event: TransitionEvent<'_, E, A>) {
        for observer in &self.observers {
            if let Err(err) = observer.message_handled(reborrow_event(&event)).await {
                warn!(workflow_id = %self.id, error = %err, "message observer failed");
            }
        }
    }
}

/// Events are consumed per observer; rebuild a borrowed copy for each.
fn reborrow_event<'a, E, A>(event: &'a TransitionEvent<'a, E, A>) -> TransitionEvent<'a, E, A> {
    TransitionEvent {
        workflow_id: event.workflow_id,
        message_id: event.message_id,
        message_uid: event.message_uid,
        actor: event.actor,
        old_entity: event.old_entity,
        new_entity: event.new_entity,
        new_revision: event.new_revision,
        dehydrated_params: event.dehydrated_params,
        results: event.results,
        applied_effects: event.applied_effects,
    }
}

/// Builder for a [`Workflow`].
///
/// Registration methods are chainable; the first defect (duplicate message,
/// unknown state in a pattern, missing performer, ...) is reported from
/// [`build`](Self::build).
pub struct WorkflowBuilder<E, A> {
    id: String,
    verbose_name: Option<String>,
    rank: i32,
    initial_state: StateId,
    start_message: MessageId,
    states: Vec<StateId>,
    state_names: HashMap<StateId, String>,
    default_checker: Option<PermissionChecker<E, A>>,
    library: LibraryBuilder<E, A>,
    observers: Vec<Arc<dyn TransitionObserver<E, A>>>,
    entity_factory: Option<EntityFactory<E, A>>,
    create_validator: Arc<dyn Validator>,
    post_create: Option<PostCreateHook<E, A>>,
}

impl<E, A> WorkflowBuilder<E, A>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    fn new(id: String) -> Self {
        Self {
            id,
            verbose_name: None,
            rank: 0,
            initial_state: StateId::new(INITIAL_STATE),
            start_message: MessageId::new(DEFAULT_START_MESSAGE),
            states: Vec::new(),
            state_names: HashMap::new(),
            default_checker: None,
            library: LibraryBuilder::new(),
            observers: Vec::new(),
            entity_factory: None,
            create_validator: Arc::new(EmptyValidator),
            post_create: None,
        }
    }

    /// Human-readable workflow name.
    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = Some(name.into());
        self
    }

    /// Sort priority among registered workflows.
    pub fn rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// Declare the workflow's states (not including the initial state).
    pub fn states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states.extend(states.into_iter().map(Into::into));
        self
    }

    /// Declare a display name for a state.
    pub fn state_name(mut self, state: impl Into<StateId>, name: impl Into<String>) -> Self {
        self.state_names.insert(state.into(), name.into());
        self
    }

    /// Override the initial state (default `init`).
    pub fn initial_state(mut self, state: impl Into<StateId>) -> Self {
        self.initial_state = state.into();
        self
    }

    /// Override the start message (default `start_workflow`).
    pub fn start_message(mut self, message_id: impl Into<MessageId>) -> Self {
        self.start_message = message_id.into();
        self
    }

    /// Checker applied to handlers and resources registered without one.
    /// Defaults to allow-to-all.
    pub fn default_permission_checker(mut self, checker: PermissionChecker<E, A>) -> Self {
        self.default_checker = Some(checker);
        self
    }

    /// Register a message spec.
    pub fn message(mut self, spec: MessageSpec) -> Self {
        self.library.message(spec);
        self
    }

    /// Register a handler.
    pub fn handler(mut self, def: HandlerDef<E, A>) -> Self {
        self.library.handler(def);
        self
    }

    /// Register a side effect.
    pub fn effect(mut self, def: EffectDef<E, A>) -> Self {
        self.library.effect(def);
        self
    }

    /// Register a resource.
    pub fn resource(mut self, def: ResourceDef<E, A>) -> Self {
        self.library.resource(def);
        self
    }

    /// Register a transition observer.
    pub fn observer(mut self, observer: impl TransitionObserver<E, A>) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Register the factory used by [`create`](crate::creation::create).
    pub fn entity_factory(
        mut self,
        factory: impl Fn(&A, &Value) -> anyhow::Result<E> + Send + Sync + 'static,
    ) -> Self {
        self.entity_factory = Some(Arc::new(factory));
        self
    }

    /// Validator for creation parameters. Defaults to the empty validator.
    pub fn create_validator(mut self, validator: impl Validator) -> Self {
        self.create_validator = Arc::new(validator);
        self
    }

    /// Hook run after an entity was created and persisted.
    pub fn post_create(mut self, hook: impl Fn(&A, &Value, &E) + Send + Sync + 'static) -> Self {
        self.post_create = Some(Arc::new(hook));
        self
    }

    /// Compile the workflow.
    pub fn build(self) -> Result<Workflow<E, A>> {
        let mut states = Vec::new();
        for state in self.states {
            if !states.contains(&state) {
                states.push(state);
            }
        }
        let states = NonEmpty::from_vec(states).ok_or_else(|| {
            Error::InvalidWorkflow(format!("workflow '{}' declares no states", self.id))
        })?;

        let default_checker = self
            .default_checker
            .unwrap_or_else(PermissionChecker::allow_to_all);

        let library = self
            .library
            .build(&states, &self.initial_state, &default_checker)?;

        Ok(Workflow {
            verbose_name: self.verbose_name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            rank: self.rank,
            initial_state: self.initial_state,
            start_message: self.start_message,
            states,
            state_names: self.state_names,
            library,
            observers: self.observers,
            entity_factory: self.entity_factory,
            create_validator: self.create_validator,
            post_create: self.post_create,
        })
    }
}

/// Process-lifetime registry of workflows for one entity family, keyed by
/// the workflow-type tag.
pub struct WorkflowRegistry<E, A> {
    workflows: HashMap<String, Arc<Workflow<E, A>>>,
}

impl<E, A> WorkflowRegistry<E, A>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    /// Register a workflow.
    ///
    /// Fails with [`Error::WorkflowAlreadyRegistered`] on an id collision.
    pub fn register(&mut self, workflow: Workflow<E, A>) -> Result<Arc<Workflow<E, A>>> {
        if self.workflows.contains_key(workflow.id()) {
            return Err(Error::WorkflowAlreadyRegistered(workflow.id().to_owned()));
        }
        let workflow = Arc::new(workflow);
        self.workflows
            .insert(workflow.id().to_owned(), workflow.clone());
        Ok(workflow)
    }

    /// Look up a workflow by id.
    pub fn get(&self, workflow_type: &str) -> Option<&Arc<Workflow<E, A>>> {
        self.workflows.get(workflow_type)
    }

    /// Resolve the workflow governing an entity via its workflow-type tag.
    ///
    /// Fails with [`Error::WorkflowNotLoaded`] when no workflow is
    /// registered under the tag.
    pub fn by_entity(&self, entity: &E) -> Result<&Arc<Workflow<E, A>>> {
        let workflow_type = entity.workflow_type();
        self.workflows
            .get(workflow_type)
            .ok_or_else(|| Error::WorkflowNotLoaded(workflow_type.to_owned()))
    }

    /// Registered workflows ordered by rank, then id.
    pub fn iter_by_rank(&self) -> Vec<&Arc<Workflow<E, A>>> {
        let mut workflows: Vec<_> = self.workflows.values().collect();
        workflows.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.id().cmp(b.id())));
        workflows
    }

    /// Number of registered workflows.
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl<E, A> Default for WorkflowRegistry<E, A>
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
