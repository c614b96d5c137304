//! Crate-wide defaults and per-dispatch options.

use serde_json::Value;

/// State every entity starts in, unless the workflow overrides it.
pub const INITIAL_STATE: &str = "init";

/// Message that moves an entity out of the initial state, unless the
/// workflow overrides it.
pub const DEFAULT_START_MESSAGE: &str = "start_workflow";

/// Delimiter that turns a message id into a group path (`edit__resize`).
pub const GROUP_DELIMITER: &str = "__";

/// Per-call knobs for [`dispatch_message`](crate::dispatch_message).
///
/// The defaults are the safe ones: the entity row is locked and re-verified,
/// and every side effect runs inside the unit of work before commit.
///
/// # Example
///
/// ```
/// use gearflow::DispatchOptions;
///
/// let options = DispatchOptions {
///     transactional_side_effects: false,
///     ..DispatchOptions::default()
/// };
/// assert!(options.lock_entity);
/// ```
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Run deferrable side effects inside the unit of work, right after the
    /// transactional ones. When `false` they run immediately after commit
    /// instead — a failure there can no longer roll the transition back.
    pub transactional_side_effects: bool,

    /// Acquire the row lock and re-verify revision/state before mutating.
    /// Disabled for sub-messages that operate on an already-locked ancestor;
    /// the caller is then responsible for consistency.
    pub lock_entity: bool,

    /// Do not evaluate deferrable side effects at all; package them as a
    /// [`DeferredEffects`](crate::DeferredEffects) value for the caller to
    /// run after commit.
    pub defer_side_effects: bool,

    /// Arbitrary JSON context made available to side effects.
    pub extra: Value,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            transactional_side_effects: true,
            lock_entity: true,
            defer_side_effects: false,
            extra: Value::Null,
        }
    }
}
