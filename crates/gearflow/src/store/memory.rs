//! In-memory entity store for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::entity::WorkflowEntity;
use crate::error::{Error, Result};
use crate::id::EntityId;
use crate::store::{EntityStore, EntityTx};

/// In-memory store backed by a `HashMap`.
///
/// Writes are staged in the unit of work and applied on commit; dropping an
/// uncommitted unit of work discards them, which gives tests the same
/// rollback observability as a real transactional backend. Row locking is
/// not simulated — tests drive dispatches sequentially.
pub struct MemoryStore<E> {
    entities: Arc<Mutex<HashMap<EntityId, E>>>,
}

impl<E> MemoryStore<E>
where
    E: WorkflowEntity,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entities: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Put an entity in place directly, bypassing any unit of work.
    pub fn seed(&self, entity: E) {
        let mut entities = self.entities.lock().expect("entity store mutex poisoned");
        entities.insert(entity.entity_id(), entity);
    }

    /// Snapshot of an entity, if present.
    pub fn get(&self, id: &EntityId) -> Option<E> {
        let entities = self.entities.lock().expect("entity store mutex poisoned");
        entities.get(id).cloned()
    }

    /// Mutate a stored entity in place, bypassing any unit of work. Used by
    /// tests to simulate a concurrent writer between the optimistic read
    /// and the lock acquisition.
    pub fn mutate(&self, id: &EntityId, f: impl FnOnce(&mut E)) {
        let mut entities = self.entities.lock().expect("entity store mutex poisoned");
        if let Some(entity) = entities.get_mut(id) {
            f(entity);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<EntityId, E>>> {
        self.entities
            .lock()
            .map_err(|_| Error::Backend(anyhow::anyhow!("entity store mutex poisoned")))
    }
}

impl<E> Default for MemoryStore<E>
where
    E: WorkflowEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for MemoryStore<E> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
        }
    }
}

impl<E> EntityStore<E> for MemoryStore<E>
where
    E: WorkflowEntity,
{
    type Tx<'a>
        = MemoryTx<'a, E>
    where
        Self: 'a;

    async fn begin(&self) -> Result<MemoryTx<'_, E>> {
        Ok(MemoryTx {
            store: self,
            staged: HashMap::new(),
        })
    }

    async fn load(&self, id: &EntityId) -> Result<E> {
        let entities = self.lock()?;
        entities
            .get(id)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(id.clone()))
    }

    async fn insert(&self, entity: &E) -> Result<E> {
        let mut entities = self.lock()?;
        entities.insert(entity.entity_id(), entity.clone());
        Ok(entity.clone())
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryTx<'a, E> {
    store: &'a MemoryStore<E>,
    staged: HashMap<EntityId, E>,
}

impl<E> EntityTx<E> for MemoryTx<'_, E>
where
    E: WorkflowEntity,
{
    async fn load_locked(&mut self, id: &EntityId) -> Result<E> {
        if let Some(staged) = self.staged.get(id) {
            return Ok(staged.clone());
        }
        let entities = self.store.lock()?;
        entities
            .get(id)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(id.clone()))
    }

    async fn save(&mut self, entity: &E) -> Result<()> {
        self.staged.insert(entity.entity_id(), entity.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut entities = self.store.lock()?;
        for (id, entity) in self.staged {
            entities.insert(id, entity);
        }
        Ok(())
    }
}
