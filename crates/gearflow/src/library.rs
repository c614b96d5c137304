//! Registration definitions, the append-only builder, and the compiled
//! lookup index.
//!
//! Registration is two-phase. Definitions accumulate in a
//! [`LibraryBuilder`] as raw patterns — no group resolution, no per-state
//! fan-out. [`LibraryBuilder::build`] then derives every lookup table in one
//! deterministic pass. Because message groups expand at build time, a
//! handler registered against a group picks up messages registered into
//! that group afterwards; only the relative order of handlers for the same
//! `(state, message)` matters, and that is their registration order
//! ("first permitted handler wins").

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use nonempty::NonEmpty;
use tracing::warn;

use crate::config::GROUP_DELIMITER;
use crate::effect::SideEffect;
use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::handler::{FnHandler, Handler, SimpleTransition};
use crate::id::{MessageId, StateId};
use crate::message::MessageSpec;
use crate::permission::{AtomicCheck, PermissionChecker};
use crate::resource::{ResourceHandler, WorkflowResource};

// =============================================================================
// Registration definitions
// =============================================================================

/// Registration pattern for a handler.
pub struct HandlerDef<E, A> {
    message_ids: Vec<MessageId>,
    group: Option<String>,
    states_from: Option<Vec<StateId>>,
    states_to: Option<Vec<StateId>>,
    checker: Option<PermissionChecker<E, A>>,
    handler: Option<Arc<dyn Handler<E, A>>>,
}

impl<E, A> HandlerDef<E, A>
where
    E: WorkflowEntity,
{
    /// Handle one concrete message id.
    pub fn for_message(message_id: impl Into<MessageId>) -> Self {
        Self {
            message_ids: vec![message_id.into()],
            group: None,
            states_from: None,
            states_to: None,
            checker: None,
            handler: None,
        }
    }

    /// Handle several concrete message ids.
    pub fn for_messages<I, M>(message_ids: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MessageId>,
    {
        Self {
            message_ids: message_ids.into_iter().map(Into::into).collect(),
            group: None,
            states_from: None,
            states_to: None,
            checker: None,
            handler: None,
        }
    }

    /// Handle every message under a group path, including a message whose
    /// id equals the group itself. Expansion happens at build time.
    pub fn for_group(group: impl Into<String>) -> Self {
        Self {
            message_ids: Vec::new(),
            group: Some(group.into()),
            states_from: None,
            states_to: None,
            checker: None,
            handler: None,
        }
    }

    /// Restrict the handler to these origin states. Defaults to every
    /// declared state (the initial state must be named explicitly).
    pub fn states_from<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states_from = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Annotate the destination states for introspection. Purely
    /// descriptive — the handler's return value is the source of truth.
    pub fn states_to<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states_to = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Gate the handler behind a permission checker. Defaults to the
    /// workflow's default checker.
    pub fn guard(mut self, checker: PermissionChecker<E, A>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Set the handler implementation.
    pub fn with(mut self, handler: impl Handler<E, A>) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set a plain function as the handler.
    pub fn perform<F>(self, f: F) -> Self
    where
        F: Fn(&E, &A, &serde_json::Value) -> anyhow::Result<crate::handler::HandlerOutcome<E, A>>
            + Send
            + Sync
            + 'static,
    {
        self.with(FnHandler::new(f))
    }

    /// Set a shared handler implementation.
    pub fn with_arc(mut self, handler: Arc<dyn Handler<E, A>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Use a plain transition to `state_to`, annotating the destination for
    /// introspection.
    pub fn transitions_to(mut self, state_to: impl Into<StateId>) -> Self {
        let state_to = state_to.into();
        self.states_to = Some(vec![state_to.clone()]);
        self.handler = Some(Arc::new(SimpleTransition::new(state_to)));
        self
    }
}

/// Registration pattern for a side effect.
pub struct EffectDef<E, A> {
    message_ids: Vec<MessageId>,
    group: Option<String>,
    states_from: Option<Vec<StateId>>,
    states_to: Option<Vec<StateId>>,
    transactional: bool,
    effect: Option<Arc<dyn SideEffect<E, A>>>,
}

impl<E, A> EffectDef<E, A>
where
    E: WorkflowEntity,
{
    /// React to one concrete message id.
    pub fn on_message(message_id: impl Into<MessageId>) -> Self {
        Self {
            message_ids: vec![message_id.into()],
            group: None,
            states_from: None,
            states_to: None,
            transactional: false,
            effect: None,
        }
    }

    /// React to every message under a group path.
    pub fn on_group(group: impl Into<String>) -> Self {
        Self {
            message_ids: Vec::new(),
            group: Some(group.into()),
            states_from: None,
            states_to: None,
            transactional: false,
            effect: None,
        }
    }

    /// React to every registered message.
    pub fn on_any_message() -> Self {
        Self {
            message_ids: Vec::new(),
            group: None,
            states_from: None,
            states_to: None,
            transactional: false,
            effect: None,
        }
    }

    /// Restrict to transitions leaving these states. Omitted: any origin.
    pub fn states_from<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states_from = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to transitions entering these states. Omitted: any
    /// destination.
    pub fn states_to<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.states_to = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Run inside the unit of work, before commit. A failure then aborts
    /// the whole transition.
    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    /// Set the effect implementation.
    pub fn with(mut self, effect: impl SideEffect<E, A>) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }

    /// Set a shared effect implementation.
    pub fn with_arc(mut self, effect: Arc<dyn SideEffect<E, A>>) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Registration pattern for a workflow resource.
pub struct ResourceDef<E, A> {
    id: String,
    description: Option<String>,
    slug: Option<String>,
    available_in: Option<Vec<StateId>>,
    checker: Option<PermissionChecker<E, A>>,
    handler: Option<Arc<dyn ResourceHandler<E, A>>>,
}

impl<E, A> ResourceDef<E, A>
where
    E: WorkflowEntity,
{
    /// Declare a resource with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            slug: None,
            available_in: None,
            checker: None,
            handler: None,
        }
    }

    /// Human-readable description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Short name; defaults to the id.
    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// States in which the resource is offered. Defaults to every declared
    /// state.
    pub fn available_in<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        self.available_in = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Gate the resource behind a permission checker. Defaults to the
    /// workflow's default checker.
    pub fn guard(mut self, checker: PermissionChecker<E, A>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Set the resource handler.
    pub fn with(mut self, handler: impl ResourceHandler<E, A>) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

// =============================================================================
// Compiled entries
// =============================================================================

/// A handler with its compiled permission checker and annotations.
pub(crate) struct HandlerEntry<E, A> {
    pub(crate) handler: Arc<dyn Handler<E, A>>,
    pub(crate) checker: PermissionChecker<E, A>,
    pub(crate) states_to: Option<Vec<StateId>>,
}

/// A side effect with its transactionality flag.
pub(crate) struct EffectEntry<E, A> {
    pub(crate) effect: Arc<dyn SideEffect<E, A>>,
    pub(crate) transactional: bool,
}

impl<E: 'static, A: 'static> EffectEntry<E, A> {
    pub(crate) fn name(&self) -> String {
        self.effect.name()
    }
}

// =============================================================================
// Group tree
// =============================================================================

/// A node in the message-group tree. A name can simultaneously be a leaf
/// (`edit`) and a group (`edit__resize`), so nodes carry both.
#[derive(Default)]
struct GroupNode {
    spec: Option<Arc<MessageSpec>>,
    children: BTreeMap<String, GroupNode>,
}

impl GroupNode {
    fn insert(&mut self, path: &[&str], spec: Arc<MessageSpec>) -> Result<()> {
        match path {
            [] => {
                if self.spec.is_some() {
                    return Err(Error::DuplicateMessage(spec.id().clone()));
                }
                self.spec = Some(spec);
                Ok(())
            }
            [head, rest @ ..] => self
                .children
                .entry((*head).to_owned())
                .or_default()
                .insert(rest, spec),
        }
    }

    fn find(&self, path: &[&str]) -> Option<&GroupNode> {
        match path {
            [] => Some(self),
            [head, rest @ ..] => self.children.get(*head)?.find(rest),
        }
    }

    /// Collect this node's spec and every descendant leaf, in id order.
    fn collect(&self, out: &mut Vec<Arc<MessageSpec>>) {
        if let Some(spec) = &self.spec {
            out.push(spec.clone());
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Append-only collector of registration definitions.
///
/// Held by [`WorkflowBuilder`](crate::WorkflowBuilder); `build` compiles the
/// immutable [`Library`]. The first defect encountered during registration
/// or compilation is reported from `build`.
pub struct LibraryBuilder<E, A> {
    specs: Vec<MessageSpec>,
    handlers: Vec<HandlerDef<E, A>>,
    effects: Vec<EffectDef<E, A>>,
    resources: Vec<ResourceDef<E, A>>,
}

impl<E, A> LibraryBuilder<E, A>
where
    E: WorkflowEntity,
    A: 'static,
{
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            handlers: Vec::new(),
            effects: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Register a message spec.
    pub fn message(&mut self, spec: MessageSpec) {
        self.specs.push(spec);
    }

    /// Register a handler definition.
    pub fn handler(&mut self, def: HandlerDef<E, A>) {
        self.handlers.push(def);
    }

    /// Register a side-effect definition.
    pub fn effect(&mut self, def: EffectDef<E, A>) {
        self.effects.push(def);
    }

    /// Register a resource definition.
    pub fn resource(&mut self, def: ResourceDef<E, A>) {
        self.resources.push(def);
    }

    /// Compile the definitions into an immutable [`Library`].
    ///
    /// `states` is the workflow's declared state set (without the initial
    /// state); `initial` the distinguished initial state. Fan-out defaults
    /// and group expansion are resolved here, so registration order of
    /// messages versus group patterns does not matter.
    pub fn build(
        self,
        states: &NonEmpty<StateId>,
        initial: &StateId,
        default_checker: &PermissionChecker<E, A>,
    ) -> Result<Library<E, A>> {
        let declared: Vec<StateId> = states.iter().cloned().collect();
        let mut origin_states: Vec<StateId> = declared.clone();
        origin_states.push(initial.clone());

        let mut library = Library {
            specs: HashMap::new(),
            groups: GroupNode::default(),
            handlers_by_state: HashMap::new(),
            handlers_by_message: HashMap::new(),
            message_checkers_by_state: HashMap::new(),
            resource_checkers_by_state: HashMap::new(),
            transactional_effect_index: HashMap::new(),
            deferrable_effect_index: HashMap::new(),
            possible_effect_index: HashMap::new(),
            resources: HashMap::new(),
            resources_by_state: HashMap::new(),
        };

        // Messages: flat registry plus the group tree.
        for spec in self.specs {
            let spec = Arc::new(spec);
            if library.specs.contains_key(spec.id()) {
                return Err(Error::DuplicateMessage(spec.id().clone()));
            }
            let path = spec.id().group_path();
            library.groups.insert(&path, spec.clone())?;
            library.specs.insert(spec.id().clone(), spec);
        }

        // Handlers: expand groups, default the origin fan-out, index.
        for def in self.handlers {
            let handler = def
                .handler
                .ok_or_else(|| Error::InvalidWorkflow("handler definition has no performer".into()))?;

            let mut message_ids = def.message_ids;
            if let Some(group) = &def.group {
                let expanded = library.expand_group(group);
                if expanded.is_empty() {
                    warn!(group = %group, "handler group expands to no registered messages");
                }
                message_ids.extend(expanded);
            }

            let states_from = match def.states_from {
                Some(states) => states,
                None => declared.clone(),
            };
            check_states(&states_from, &origin_states)?;
            if let Some(states_to) = &def.states_to {
                check_states(states_to, &declared)?;
            }

            let entry = Arc::new(HandlerEntry {
                handler,
                checker: def.checker.unwrap_or_else(|| default_checker.clone()),
                states_to: def.states_to,
            });

            for message_id in &message_ids {
                library
                    .handlers_by_message
                    .entry(message_id.clone())
                    .or_default()
                    .push(entry.clone());
                for state in &states_from {
                    library
                        .handlers_by_state
                        .entry(state.clone())
                        .or_default()
                        .entry(message_id.clone())
                        .or_default()
                        .push(entry.clone());
                }
            }
            for state in &states_from {
                extend_checkers(
                    library.message_checkers_by_state.entry(state.clone()).or_default(),
                    &entry.checker,
                );
            }
        }

        // Effects: expand groups, default both fan-outs, split by
        // transactionality.
        for def in self.effects {
            let effect = def
                .effect
                .ok_or_else(|| Error::InvalidWorkflow("effect definition has no performer".into()))?;

            let mut message_ids = def.message_ids;
            if let Some(group) = &def.group {
                let expanded = library.expand_group(group);
                if expanded.is_empty() {
                    warn!(group = %group, "effect group expands to no registered messages");
                }
                message_ids.extend(expanded);
            } else if message_ids.is_empty() {
                // Neither ids nor group: react to every registered message.
                message_ids = library.specs.keys().cloned().collect();
                message_ids.sort();
            }

            let states_from = match def.states_from {
                Some(states) => states,
                None => origin_states.clone(),
            };
            let states_to = match def.states_to {
                Some(states) => states,
                None => declared.clone(),
            };
            check_states(&states_from, &origin_states)?;
            check_states(&states_to, &declared)?;

            let entry = Arc::new(EffectEntry {
                effect,
                transactional: def.transactional,
            });

            for message_id in &message_ids {
                for state_from in &states_from {
                    library
                        .possible_effect_index
                        .entry((state_from.clone(), message_id.clone()))
                        .or_default()
                        .push(entry.clone());
                    for state_to in &states_to {
                        let key = (state_from.clone(), state_to.clone(), message_id.clone());
                        let index = if entry.transactional {
                            &mut library.transactional_effect_index
                        } else {
                            &mut library.deferrable_effect_index
                        };
                        index.entry(key).or_default().push(entry.clone());
                    }
                }
            }
        }

        // Resources.
        for def in self.resources {
            let handler = def.handler.ok_or_else(|| {
                Error::InvalidWorkflow(format!("resource '{}' has no handler", def.id))
            })?;
            if library.resources.contains_key(&def.id) {
                return Err(Error::DuplicateResource(def.id));
            }

            let available_in = match def.available_in {
                Some(states) => states,
                None => declared.clone(),
            };
            if available_in.is_empty() {
                return Err(Error::InvalidWorkflow(format!(
                    "resource '{}' is available in no state",
                    def.id
                )));
            }
            check_states(&available_in, &origin_states)?;

            let resource = Arc::new(WorkflowResource::new(
                def.id.clone(),
                def.description,
                def.slug,
                def.checker.unwrap_or_else(|| default_checker.clone()),
                handler,
            ));

            for state in &available_in {
                library
                    .resources_by_state
                    .entry(state.clone())
                    .or_default()
                    .push(resource.clone());
                extend_checkers(
                    library.resource_checkers_by_state.entry(state.clone()).or_default(),
                    resource.checker(),
                );
            }
            library.resources.insert(def.id, resource);
        }

        Ok(library)
    }
}

impl<E, A> Default for LibraryBuilder<E, A>
where
    E: WorkflowEntity,
    A: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn check_states(states: &[StateId], valid: &[StateId]) -> Result<()> {
    for state in states {
        if !valid.contains(state) {
            return Err(Error::IllegalState(state.clone()));
        }
    }
    Ok(())
}

/// Append the checker's atoms, deduplicating by identity.
fn extend_checkers<E, A>(into: &mut Vec<AtomicCheck<E, A>>, checker: &PermissionChecker<E, A>) {
    let seen: HashSet<_> = into.iter().map(AtomicCheck::key).collect();
    for atom in checker.atoms() {
        if !seen.contains(&atom.key()) {
            into.push(atom.clone());
        }
    }
}

// =============================================================================
// Compiled library
// =============================================================================

/// The compiled, immutable registration index of one workflow.
///
/// All lookup tables described in the data model live here; they are derived
/// once by [`LibraryBuilder::build`] and never mutated afterwards.
pub struct Library<E, A> {
    specs: HashMap<MessageId, Arc<MessageSpec>>,
    groups: GroupNode,
    handlers_by_state: HashMap<StateId, HashMap<MessageId, Vec<Arc<HandlerEntry<E, A>>>>>,
    handlers_by_message: HashMap<MessageId, Vec<Arc<HandlerEntry<E, A>>>>,
    message_checkers_by_state: HashMap<StateId, Vec<AtomicCheck<E, A>>>,
    resource_checkers_by_state: HashMap<StateId, Vec<AtomicCheck<E, A>>>,
    transactional_effect_index: HashMap<(StateId, StateId, MessageId), Vec<Arc<EffectEntry<E, A>>>>,
    deferrable_effect_index: HashMap<(StateId, StateId, MessageId), Vec<Arc<EffectEntry<E, A>>>>,
    possible_effect_index: HashMap<(StateId, MessageId), Vec<Arc<EffectEntry<E, A>>>>,
    resources: HashMap<String, Arc<WorkflowResource<E, A>>>,
    resources_by_state: HashMap<StateId, Vec<Arc<WorkflowResource<E, A>>>>,
}

impl<E, A> Library<E, A>
where
    E: WorkflowEntity,
{
    /// Registered spec for a message id.
    ///
    /// Fails with [`Error::MessageSpecNotRegistered`] for an unknown id.
    pub fn spec(&self, message_id: &MessageId) -> Result<&Arc<MessageSpec>> {
        self.specs
            .get(message_id)
            .ok_or_else(|| Error::MessageSpecNotRegistered(message_id.clone()))
    }

    /// All registered message ids, sorted.
    pub fn message_ids(&self) -> Vec<&MessageId> {
        let mut ids: Vec<_> = self.specs.keys().collect();
        ids.sort();
        ids
    }

    /// Specs reachable under a group path: the group-named message itself
    /// (if registered) plus every descendant leaf.
    ///
    /// Fails with [`Error::GroupPathEmpty`] when the path names nothing.
    pub fn specs_in_group(&self, group: &str) -> Result<Vec<Arc<MessageSpec>>> {
        let path: Vec<&str> = group.split(GROUP_DELIMITER).collect();
        let mut out = Vec::new();
        if let Some(node) = self.groups.find(&path) {
            node.collect(&mut out);
        }
        if out.is_empty() {
            return Err(Error::GroupPathEmpty(group.to_owned()));
        }
        Ok(out)
    }

    fn expand_group(&self, group: &str) -> Vec<MessageId> {
        let path: Vec<&str> = group.split(GROUP_DELIMITER).collect();
        let mut specs = Vec::new();
        if let Some(node) = self.groups.find(&path) {
            node.collect(&mut specs);
        }
        specs.into_iter().map(|spec| spec.id().clone()).collect()
    }

    /// Handler lookup with the fallback protocol: exact `(state, message)`
    /// first; with no state, all handlers for the message; with no message,
    /// all handlers registered for the state.
    ///
    /// Fails with [`Error::UnhandledMessage`] only for an exact lookup that
    /// finds nothing.
    pub(crate) fn handlers(
        &self,
        state: Option<&StateId>,
        message_id: Option<&MessageId>,
    ) -> Result<Vec<Arc<HandlerEntry<E, A>>>> {
        match (state, message_id) {
            (Some(state), Some(message_id)) => {
                let found = self
                    .handlers_by_state
                    .get(state)
                    .and_then(|by_message| by_message.get(message_id));
                match found {
                    Some(entries) if !entries.is_empty() => Ok(entries.clone()),
                    _ => Err(Error::UnhandledMessage {
                        state: state.clone(),
                        message_id: message_id.clone(),
                    }),
                }
            }
            (None, Some(message_id)) => Ok(self
                .handlers_by_message
                .get(message_id)
                .cloned()
                .unwrap_or_default()),
            (Some(state), None) => {
                let mut out = Vec::new();
                if let Some(by_message) = self.handlers_by_state.get(state) {
                    let mut ids: Vec<_> = by_message.keys().collect();
                    ids.sort();
                    for id in ids {
                        out.extend(by_message[id].iter().cloned());
                    }
                }
                Ok(out)
            }
            (None, None) => Ok(Vec::new()),
        }
    }

    /// Message ids handled in a state, with their handler entries.
    pub(crate) fn message_candidates(
        &self,
        state: &StateId,
    ) -> Option<&HashMap<MessageId, Vec<Arc<HandlerEntry<E, A>>>>> {
        self.handlers_by_state.get(state)
    }

    /// Effects for a concrete transition, split into `(transactional,
    /// deferrable)` lists. Both may be empty; that is not an error.
    pub(crate) fn effects_for_transition(
        &self,
        from: &StateId,
        to: &StateId,
        message_id: &MessageId,
    ) -> (&[Arc<EffectEntry<E, A>>], &[Arc<EffectEntry<E, A>>]) {
        let key = (from.clone(), to.clone(), message_id.clone());
        let transactional = self
            .transactional_effect_index
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let deferrable = self
            .deferrable_effect_index
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        (transactional, deferrable)
    }

    /// Effects that may run for a message leaving a state, regardless of
    /// destination.
    pub(crate) fn possible_effects(
        &self,
        from: &StateId,
        message_id: &MessageId,
    ) -> &[Arc<EffectEntry<E, A>>] {
        self.possible_effect_index
            .get(&(from.clone(), message_id.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Atomic checkers relevant to messages and resources in a state. The
    /// projector pre-fills its cache from these.
    pub(crate) fn checkers_by_state<'l>(
        &'l self,
        state: &StateId,
    ) -> impl Iterator<Item = &'l AtomicCheck<E, A>> + 'l {
        let messages = self
            .message_checkers_by_state
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let resources = self
            .resource_checkers_by_state
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        messages.iter().chain(resources.iter())
    }

    /// A registered resource by id.
    pub fn resource(&self, resource_id: &str) -> Option<&Arc<WorkflowResource<E, A>>> {
        self.resources.get(resource_id)
    }

    /// Resources offered in a state.
    pub(crate) fn resources_in_state(&self, state: &StateId) -> &[Arc<WorkflowResource<E, A>>] {
        self.resources_by_state
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// States with at least one registered handler. Terminal states are
    /// simply the declared states absent from this set.
    pub fn nonfinal_states(&self) -> Vec<&StateId> {
        let mut states: Vec<_> = self.handlers_by_state.keys().collect();
        states.sort();
        states
    }

    /// Whether any handler accepts `message_id` in `state`.
    pub fn is_valid_message(&self, state: &StateId, message_id: &MessageId) -> bool {
        self.handlers(Some(state), Some(message_id)).is_ok()
    }

    /// Iterate every `(state, message, entry)` triple, sorted, for
    /// introspection.
    pub(crate) fn iter_handler_entries(
        &self,
    ) -> Vec<(&StateId, &MessageId, &Arc<HandlerEntry<E, A>>)> {
        let mut out = Vec::new();
        let mut states: Vec<_> = self.handlers_by_state.iter().collect();
        states.sort_by_key(|(state, _)| *state);
        for (state, by_message) in states {
            let mut messages: Vec<_> = by_message.iter().collect();
            messages.sort_by_key(|(message_id, _)| *message_id);
            for (message_id, entries) in messages {
                for entry in entries {
                    out.push((state, message_id, entry));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::handler::HandlerOutcome;
    use crate::id::EntityId;

    #[derive(Clone)]
    struct Probe {
        state: StateId,
    }

    impl WorkflowEntity for Probe {
        fn entity_id(&self) -> EntityId {
            EntityId::new("probe")
        }

        fn workflow_type(&self) -> &str {
            "probe"
        }

        fn state(&self) -> StateId {
            self.state.clone()
        }

        fn set_state(&mut self, state: StateId) {
            self.state = state;
        }
    }

    type Builder = LibraryBuilder<Probe, ()>;

    fn states() -> NonEmpty<StateId> {
        NonEmpty::from_vec(vec![
            StateId::new("normal"),
            StateId::new("maximized"),
            StateId::new("minimized"),
        ])
        .unwrap()
    }

    fn build(builder: Builder) -> Result<Library<Probe, ()>> {
        builder.build(
            &states(),
            &StateId::new("init"),
            &PermissionChecker::allow_to_all(),
        )
    }

    fn noop_effect() -> crate::effect::FnEffect<
        impl Fn(&crate::effect::EffectContext<Probe, ()>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    > {
        crate::effect::effect_fn("noop", |_| Ok(Value::Null))
    }

    // =========================================================================
    // Message registration
    // =========================================================================

    #[test]
    fn duplicate_message_is_rejected() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.message(MessageSpec::new("minimize"));

        assert!(matches!(build(builder), Err(Error::DuplicateMessage(_))));
    }

    #[test]
    fn group_round_trip() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("edit"));
        builder.message(MessageSpec::new("edit__title"));
        builder.message(MessageSpec::new("edit__resize"));
        let library = build(builder).unwrap();

        let specs = library.specs_in_group("edit").unwrap();
        let ids: Vec<_> = specs.iter().map(|s| s.id().as_str()).collect();
        assert_eq!(ids, vec!["edit", "edit__resize", "edit__title"]);

        assert!(matches!(
            library.specs_in_group("edit__nonexistent"),
            Err(Error::GroupPathEmpty(_))
        ));
    }

    #[test]
    fn group_handler_expands_to_registered_leaves() {
        let mut builder = Builder::new();
        // Handler registered before the grouped messages: expansion happens
        // at build time, so order cannot matter.
        builder.handler(
            HandlerDef::for_group("edit").states_from(["normal"]).perform(
                |_: &Probe, _: &(), _: &Value| -> anyhow::Result<HandlerOutcome<Probe, ()>> {
                    Ok(HandlerOutcome::state("normal"))
                },
            ),
        );
        builder.message(MessageSpec::new("edit"));
        builder.message(MessageSpec::new("edit__title"));
        builder.message(MessageSpec::new("edit__resize"));
        let library = build(builder).unwrap();

        for id in ["edit", "edit__title", "edit__resize"] {
            assert!(
                library.is_valid_message(&StateId::new("normal"), &MessageId::new(id)),
                "group handler should cover '{id}'"
            );
        }
        assert!(!library.is_valid_message(&StateId::new("minimized"), &MessageId::new("edit")));
    }

    // =========================================================================
    // Handler lookup protocol
    // =========================================================================

    #[test]
    fn exact_lookup_miss_is_unhandled_message() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal"])
                .transitions_to("minimized"),
        );
        let library = build(builder).unwrap();

        assert!(library
            .handlers(Some(&StateId::new("normal")), Some(&MessageId::new("minimize")))
            .is_ok());
        assert!(matches!(
            library.handlers(
                Some(&StateId::new("minimized")),
                Some(&MessageId::new("minimize"))
            ),
            Err(Error::UnhandledMessage { .. })
        ));
    }

    #[test]
    fn fallback_lookups() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.message(MessageSpec::new("maximize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal", "maximized"])
                .transitions_to("minimized"),
        );
        builder.handler(
            HandlerDef::for_message("maximize")
                .states_from(["normal"])
                .transitions_to("maximized"),
        );
        let library = build(builder).unwrap();

        // No state: every registration of the message, once per definition.
        let by_message = library
            .handlers(None, Some(&MessageId::new("minimize")))
            .unwrap();
        assert_eq!(by_message.len(), 1);

        // No message: every handler reachable from the state.
        let by_state = library.handlers(Some(&StateId::new("normal")), None).unwrap();
        assert_eq!(by_state.len(), 2);

        assert!(library.handlers(None, None).unwrap().is_empty());
    }

    #[test]
    fn registration_order_is_preserved_per_key() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal"])
                .transitions_to("minimized"),
        );
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal"])
                .transitions_to("maximized"),
        );
        let library = build(builder).unwrap();

        let entries = library
            .handlers(Some(&StateId::new("normal")), Some(&MessageId::new("minimize")))
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].states_to.as_deref(),
            Some(&[StateId::new("minimized")][..])
        );
        assert_eq!(
            entries[1].states_to.as_deref(),
            Some(&[StateId::new("maximized")][..])
        );
    }

    #[test]
    fn unknown_state_in_pattern_is_rejected() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["floating"])
                .transitions_to("minimized"),
        );

        assert!(matches!(build(builder), Err(Error::IllegalState(state)) if state.as_str() == "floating"));
    }

    #[test]
    fn handler_without_performer_is_rejected() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.handler(HandlerDef::for_message("minimize").states_from(["normal"]));

        assert!(matches!(build(builder), Err(Error::InvalidWorkflow(_))));
    }

    // =========================================================================
    // Effect indexing
    // =========================================================================

    #[test]
    fn effects_split_by_transactionality() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.effect(
            EffectDef::on_message("minimize")
                .states_from(["normal"])
                .states_to(["minimized"])
                .transactional()
                .with(noop_effect()),
        );
        builder.effect(
            EffectDef::on_message("minimize")
                .states_from(["normal"])
                .states_to(["minimized"])
                .with(noop_effect()),
        );
        let library = build(builder).unwrap();

        let (transactional, deferrable) = library.effects_for_transition(
            &StateId::new("normal"),
            &StateId::new("minimized"),
            &MessageId::new("minimize"),
        );
        assert_eq!(transactional.len(), 1);
        assert_eq!(deferrable.len(), 1);

        let (none_t, none_d) = library.effects_for_transition(
            &StateId::new("maximized"),
            &StateId::new("minimized"),
            &MessageId::new("minimize"),
        );
        assert!(none_t.is_empty());
        assert!(none_d.is_empty());
    }

    #[test]
    fn omitted_effect_states_cover_every_transition() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.effect(EffectDef::on_message("minimize").with(noop_effect()));
        let library = build(builder).unwrap();

        for from in ["init", "normal", "maximized", "minimized"] {
            for to in ["normal", "maximized", "minimized"] {
                let (_, deferrable) = library.effects_for_transition(
                    &StateId::new(from),
                    &StateId::new(to),
                    &MessageId::new("minimize"),
                );
                assert_eq!(deferrable.len(), 1, "missing effect for {from} -> {to}");
            }
        }

        assert_eq!(
            library
                .possible_effects(&StateId::new("normal"), &MessageId::new("minimize"))
                .len(),
            1
        );
    }

    #[test]
    fn any_message_effect_covers_all_registered_messages() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.message(MessageSpec::new("maximize"));
        builder.effect(EffectDef::on_any_message().states_to(["minimized"]).with(noop_effect()));
        let library = build(builder).unwrap();

        for message in ["minimize", "maximize"] {
            let (_, deferrable) = library.effects_for_transition(
                &StateId::new("normal"),
                &StateId::new("minimized"),
                &MessageId::new(message),
            );
            assert_eq!(deferrable.len(), 1);
        }
    }

    // =========================================================================
    // Checker indexing
    // =========================================================================

    #[test]
    fn checkers_by_state_deduplicate_by_identity() {
        let shared = PermissionChecker::<Probe, ()>::new(|_, _| true);

        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.message(MessageSpec::new("maximize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal"])
                .guard(shared.clone())
                .transitions_to("minimized"),
        );
        builder.handler(
            HandlerDef::for_message("maximize")
                .states_from(["normal"])
                .guard(shared.clone())
                .transitions_to("maximized"),
        );
        let library = build(builder).unwrap();

        let checkers: Vec<_> = library.checkers_by_state(&StateId::new("normal")).collect();
        assert_eq!(checkers.len(), 1);
    }

    // =========================================================================
    // Misc lookups
    // =========================================================================

    #[test]
    fn nonfinal_states_are_those_with_handlers() {
        let mut builder = Builder::new();
        builder.message(MessageSpec::new("minimize"));
        builder.handler(
            HandlerDef::for_message("minimize")
                .states_from(["normal", "maximized"])
                .transitions_to("minimized"),
        );
        let library = build(builder).unwrap();

        let nonfinal: Vec<_> = library
            .nonfinal_states()
            .into_iter()
            .map(StateId::as_str)
            .collect();
        assert_eq!(nonfinal, vec!["maximized", "normal"]);
    }

    #[test]
    fn duplicate_resource_is_rejected() {
        let export = |_: &Probe, _: &()| -> anyhow::Result<Value> { Ok(json!("csv")) };

        let mut builder = Builder::new();
        builder.resource(ResourceDef::new("export").with(export));
        builder.resource(ResourceDef::new("export").with(export));

        assert!(matches!(build(builder), Err(Error::DuplicateResource(_))));
    }
}
