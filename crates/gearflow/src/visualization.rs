//! State machine introspection for workflows.
//!
//! Destinations are handler-computed, not pre-declared, so the projection
//! is a hint: handlers registered with a `states_to` annotation contribute
//! concrete edges, unannotated ones contribute unknown-destination edges.
//! The handlers' return values remain the source of truth.

use crate::entity::WorkflowEntity;
use crate::id::{MessageId, StateId};
use crate::workflow::Workflow;

/// A static projection of one workflow's state machine.
#[derive(Debug, Clone)]
pub struct StateMachineDefinition {
    /// Declared states, sorted.
    pub states: Vec<StateId>,
    /// The distinguished initial state.
    pub initial: StateId,
    /// Known and unknown-destination transitions, sorted.
    pub transitions: Vec<TransitionDefinition>,
}

/// One edge of the projected state machine.
#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    /// Origin state.
    pub from: StateId,
    /// Destination state; `None` for handlers without an annotation.
    pub to: Option<StateId>,
    /// Message driving the transition.
    pub message_id: MessageId,
    /// Names of side effects registered for this edge.
    pub effects: Vec<String>,
}

impl StateMachineDefinition {
    /// Edges leaving a state.
    pub fn transitions_from(&self, state: &StateId) -> Vec<&TransitionDefinition> {
        self.transitions
            .iter()
            .filter(|transition| &transition.from == state)
            .collect()
    }
}

pub(crate) fn state_machine<E, A>(workflow: &Workflow<E, A>) -> StateMachineDefinition
where
    E: WorkflowEntity,
    A: Send + Sync + 'static,
{
    let library = workflow.library();

    let mut states: Vec<StateId> = workflow.states().iter().cloned().collect();
    states.sort();

    let mut transitions = Vec::new();
    for (state_from, message_id, entry) in library.iter_handler_entries() {
        match &entry.states_to {
            Some(annotated) => {
                for state_to in annotated {
                    let (transactional, deferrable) =
                        library.effects_for_transition(state_from, state_to, message_id);
                    let effects = transactional
                        .iter()
                        .chain(deferrable.iter())
                        .map(|effect| effect.name())
                        .collect();
                    transitions.push(TransitionDefinition {
                        from: state_from.clone(),
                        to: Some(state_to.clone()),
                        message_id: message_id.clone(),
                        effects,
                    });
                }
            }
            None => {
                // Unknown destination: attach the destination-agnostic
                // effect candidates instead.
                let effects = library
                    .possible_effects(state_from, message_id)
                    .iter()
                    .map(|effect| effect.name())
                    .collect();
                transitions.push(TransitionDefinition {
                    from: state_from.clone(),
                    to: None,
                    message_id: message_id.clone(),
                    effects,
                });
            }
        }
    }
    transitions.sort_by(|a, b| {
        (&a.from, &a.message_id, &a.to).cmp(&(&b.from, &b.message_id, &b.to))
    });

    StateMachineDefinition {
        states,
        initial: workflow.initial_state().clone(),
        transitions,
    }
}
