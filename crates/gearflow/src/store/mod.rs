//! Persistence collaborator contract.
//!
//! The engine never owns entity storage. It drives a store through two
//! traits: [`EntityStore`] opens a transactional [`EntityTx`] unit of work;
//! the unit of work provides the locked re-read, staged writes, and an
//! all-or-nothing commit. Dropping a unit of work without committing rolls
//! everything back.
//!
//! A production implementation maps `load_locked` to a `SELECT ... FOR
//! UPDATE`-equivalent inside an open database transaction. The crate ships
//! only the in-memory [`MemoryStore`], intended for tests.

mod memory;

use std::future::Future;

use crate::entity::WorkflowEntity;
use crate::error::Result;
use crate::id::EntityId;

pub use memory::MemoryStore;

/// Storage backend for workflow entities.
///
/// `begin` opens a unit of work scoped to one ACID transaction; the
/// transition engine assumes that scope is active around the lock, the
/// mutation and the transactional side effects.
pub trait EntityStore<E>: Send + Sync
where
    E: WorkflowEntity,
{
    /// The unit-of-work type opened by this store.
    type Tx<'a>: EntityTx<E> + Send
    where
        Self: 'a;

    /// Open a unit of work.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx<'_>>> + Send;

    /// Unlocked read of an entity (the optimistic read).
    fn load(&self, id: &EntityId) -> impl Future<Output = Result<E>> + Send;

    /// Persist a newly created entity outside any dispatch.
    fn insert(&self, entity: &E) -> impl Future<Output = Result<E>> + Send;
}

/// A transactional unit of work over entity rows.
///
/// All reads and writes happen against the same underlying transaction.
/// Changes become visible only on [`commit`](Self::commit); dropping the
/// unit of work discards them.
pub trait EntityTx<E>: Send
where
    E: WorkflowEntity,
{
    /// Lock the entity's row and return a fresh read of it.
    ///
    /// Blocks until the lock is granted; timeout behavior belongs to the
    /// backing transactional layer.
    fn load_locked(&mut self, id: &EntityId) -> impl Future<Output = Result<E>> + Send;

    /// Stage a write of the entity.
    fn save(&mut self, entity: &E) -> impl Future<Output = Result<()>> + Send;

    /// Commit the unit of work, persisting all staged writes and releasing
    /// the locks.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}
