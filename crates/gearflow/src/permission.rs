//! Composable permission checkers over `(entity, actor)`.
//!
//! A checker is a boolean predicate deciding whether an actor may trigger a
//! handler or resource. Atomic checkers wrap plain closures; composites
//! combine them with `&`, `|` and `!`. Atomic checkers have *identity* (the
//! shared allocation behind them), which is what makes batch evaluation
//! cheap: a cache filled once per `(entity, actor)` pair answers every
//! composite that references the same leaves.
//!
//! # Algebra laws
//!
//! - `&` on an `And` (and `|` on an `Or`) appends to the existing child list
//!   instead of nesting a new node.
//! - `!!c` returns the original checker value, not a double wrapper.
//! - Combining a checker with itself leaves its atomic leaf *set* unchanged
//!   (leaves deduplicate by identity).
//!
//! # Example
//!
//! ```ignore
//! let is_owner = PermissionChecker::new(|w: &Window, a: &User| w.owner == a.id);
//! let is_admin = PermissionChecker::new(|_: &Window, a: &User| a.admin);
//!
//! let checker = is_owner | (is_admin & !suspended);
//! if checker.check(&window, &user) {
//!     // permitted
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use std::sync::Arc;

/// Identity of an atomic checker: the pointer of its shared closure.
///
/// Clones of a checker share the key; independently constructed checkers
/// never collide, even if behaviorally identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckerKey(usize);

/// An atomic (leaf) permission checker.
pub struct AtomicCheck<E, A> {
    check: Arc<dyn Fn(&E, &A) -> bool + Send + Sync>,
}

impl<E, A> AtomicCheck<E, A> {
    fn new(check: impl Fn(&E, &A) -> bool + Send + Sync + 'static) -> Self {
        Self {
            check: Arc::new(check),
        }
    }

    /// This checker's identity.
    pub fn key(&self) -> CheckerKey {
        CheckerKey(Arc::as_ptr(&self.check) as *const () as usize)
    }

    /// Evaluate the underlying predicate directly, bypassing any cache.
    pub fn run(&self, entity: &E, actor: &A) -> bool {
        (self.check)(entity, actor)
    }
}

impl<E, A> Clone for AtomicCheck<E, A> {
    fn clone(&self) -> Self {
        Self {
            check: Arc::clone(&self.check),
        }
    }
}

impl<E, A> std::fmt::Debug for AtomicCheck<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicCheck").field(&self.key()).finish()
    }
}

/// Shared evaluation cache for atomic checkers, valid for one
/// `(entity, actor)` pair.
#[derive(Debug, Default)]
pub struct PermissionCache {
    results: HashMap<CheckerKey, bool>,
}

impl PermissionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `atom` for `(entity, actor)` unless it is already cached.
    pub fn prime<E, A>(&mut self, atom: &AtomicCheck<E, A>, entity: &E, actor: &A) {
        self.results
            .entry(atom.key())
            .or_insert_with(|| atom.run(entity, actor));
    }

    /// Cached result for a checker identity, if present.
    pub fn get(&self, key: CheckerKey) -> Option<bool> {
        self.results.get(&key).copied()
    }

    /// Number of cached leaf results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// A composable permission checker.
///
/// See the [module docs](self) for the algebra; construction starts from
/// [`PermissionChecker::new`], [`allow_to_all`](PermissionChecker::allow_to_all)
/// or [`restrict_to_all`](PermissionChecker::restrict_to_all).
pub enum PermissionChecker<E, A> {
    /// A leaf predicate.
    Atom(AtomicCheck<E, A>),
    /// True iff every child is true.
    And(Vec<PermissionChecker<E, A>>),
    /// True iff at least one child is true.
    Or(Vec<PermissionChecker<E, A>>),
    /// Negation of the child.
    Not(Box<PermissionChecker<E, A>>),
}

impl<E, A> PermissionChecker<E, A> {
    /// Wrap a predicate into an atomic checker.
    pub fn new(check: impl Fn(&E, &A) -> bool + Send + Sync + 'static) -> Self {
        Self::Atom(AtomicCheck::new(check))
    }

    /// The identity element: permits every sender.
    ///
    /// Each call creates a checker with its own identity; share one value
    /// (clone it) where cache reuse matters.
    pub fn allow_to_all() -> Self {
        Self::new(|_, _| true)
    }

    /// The absorbing element: permits nobody.
    pub fn restrict_to_all() -> Self {
        Self::new(|_, _| false)
    }

    /// Evaluate against a fresh cache: every atomic leaf is evaluated
    /// exactly once, then the composite is combined from cached values.
    pub fn check(&self, entity: &E, actor: &A) -> bool {
        let cache = self.fill_cache(entity, actor);
        self.check_cached(entity, actor, &cache)
    }

    /// Evaluate consulting a shared cache. Atoms missing from the cache are
    /// evaluated directly (without being re-cached); composites recurse.
    pub fn check_cached(&self, entity: &E, actor: &A, cache: &PermissionCache) -> bool {
        match self {
            Self::Atom(atom) => cache
                .get(atom.key())
                .unwrap_or_else(|| atom.run(entity, actor)),
            Self::And(children) => children
                .iter()
                .all(|child| child.check_cached(entity, actor, cache)),
            Self::Or(children) => children
                .iter()
                .any(|child| child.check_cached(entity, actor, cache)),
            Self::Not(child) => !child.check_cached(entity, actor, cache),
        }
    }

    /// Build a cache by evaluating every atomic leaf of this checker once.
    pub fn fill_cache(&self, entity: &E, actor: &A) -> PermissionCache {
        let mut cache = PermissionCache::new();
        for atom in self.atoms() {
            cache.prime(atom, entity, actor);
        }
        cache
    }

    /// The flattened atomic leaf set, deduplicated by identity, in
    /// first-occurrence order.
    pub fn atoms(&self) -> Vec<&AtomicCheck<E, A>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_atoms(&mut out, &mut seen);
        out
    }

    fn collect_atoms<'a>(
        &'a self,
        out: &mut Vec<&'a AtomicCheck<E, A>>,
        seen: &mut HashSet<CheckerKey>,
    ) {
        match self {
            Self::Atom(atom) => {
                if seen.insert(atom.key()) {
                    out.push(atom);
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_atoms(out, seen);
                }
            }
            Self::Not(child) => child.collect_atoms(out, seen),
        }
    }
}

impl<E, A> Clone for PermissionChecker<E, A> {
    fn clone(&self) -> Self {
        match self {
            Self::Atom(atom) => Self::Atom(atom.clone()),
            Self::And(children) => Self::And(children.clone()),
            Self::Or(children) => Self::Or(children.clone()),
            Self::Not(child) => Self::Not(child.clone()),
        }
    }
}

impl<E, A> std::fmt::Debug for PermissionChecker<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atom(atom) => atom.fmt(f),
            Self::And(children) => f.debug_tuple("And").field(&children.len()).finish(),
            Self::Or(children) => f.debug_tuple("Or").field(&children.len()).finish(),
            Self::Not(child) => f.debug_tuple("Not").field(child).finish(),
        }
    }
}

impl<E, A> BitAnd for PermissionChecker<E, A> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(rhs);
                Self::And(children)
            }
            lhs => Self::And(vec![lhs, rhs]),
        }
    }
}

impl<E, A> BitOr for PermissionChecker<E, A> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(rhs);
                Self::Or(children)
            }
            lhs => Self::Or(vec![lhs, rhs]),
        }
    }
}

impl<E, A> BitAndAssign for PermissionChecker<E, A> {
    fn bitand_assign(&mut self, rhs: Self) {
        let lhs = std::mem::replace(self, Self::And(Vec::new()));
        *self = lhs & rhs;
    }
}

impl<E, A> BitOrAssign for PermissionChecker<E, A> {
    fn bitor_assign(&mut self, rhs: Self) {
        let lhs = std::mem::replace(self, Self::Or(Vec::new()));
        *self = lhs | rhs;
    }
}

impl<E, A> Not for PermissionChecker<E, A> {
    type Output = Self;

    /// Double negation is the identity: `!!c` gives back the original
    /// checker value, preserving leaf identities.
    fn not(self) -> Self {
        match self {
            Self::Not(child) => *child,
            other => Self::Not(Box::new(other)),
        }
    }
}
