use ahash::AHashMap;
use metarepo_model::{Entity, EntityId};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

use crate::{EntityListener, ListenersError};

type ListenerSet = Vec<Arc<dyn EntityListener>>;

/// Listeners of one repository, keyed by the entity id value they watch.
///
/// Structural changes take the write lock; dispatch only reads.
#[derive(Default)]
struct RepositoryListeners {
    by_entity: RwLock<AHashMap<EntityId, ListenerSet>>,
}

impl RepositoryListeners {
    /// Snapshot of the listeners for `id`, so hooks run without the lock held.
    fn listeners_for(&self, id: &EntityId) -> ListenerSet {
        self.by_entity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn notify(&self, repository: &str, entity: &Entity) -> Result<(), ListenersError> {
        let Some(id) = entity.id_value() else {
            return Ok(());
        };
        for listener in self.listeners_for(&id) {
            listener
                .post_update(entity)
                .map_err(|source| ListenersError::Listener {
                    repository: repository.to_string(),
                    entity_id: id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn same_listener(a: &Arc<dyn EntityListener>, b: &Arc<dyn EntityListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registry of entity listeners per fully qualified repository name.
///
/// A repository must be registered before listeners can be added to it or
/// updates dispatched through it. Repositories never share a lock.
#[derive(Default)]
pub struct EntityListenersService {
    repositories: RwLock<AHashMap<String, Arc<RepositoryListeners>>>,
}

impl EntityListenersService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository; registering it again leaves it untouched.
    pub fn register(&self, repository: &str) {
        let mut repositories = self
            .repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        repositories
            .entry(repository.to_string())
            .or_insert_with(|| Arc::new(RepositoryListeners::default()));
    }

    pub fn is_registered(&self, repository: &str) -> bool {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(repository)
    }

    fn registered(&self, repository: &str) -> Result<Arc<RepositoryListeners>, ListenersError> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)
            .cloned()
            .ok_or_else(|| {
                error!(
                    repository,
                    "Repository is not registered in the entity listeners service"
                );
                ListenersError::NotRegistered(repository.to_string())
            })
    }

    /// Subscribes `listener` to updates of the entity it watches. Adding the
    /// same listener twice for the same id keeps a single entry.
    pub fn add_entity_listener(
        &self,
        repository: &str,
        listener: Arc<dyn EntityListener>,
    ) -> Result<(), ListenersError> {
        let repo = self.registered(repository)?;
        let mut by_entity = repo
            .by_entity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let set = by_entity.entry(listener.entity_id().clone()).or_default();
        if !set.iter().any(|l| same_listener(l, &listener)) {
            set.push(listener);
        }
        Ok(())
    }

    /// Returns whether the listener was found and removed.
    pub fn remove_entity_listener(
        &self,
        repository: &str,
        listener: &Arc<dyn EntityListener>,
    ) -> Result<bool, ListenersError> {
        let repo = self.registered(repository)?;
        let mut by_entity = repo
            .by_entity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listener.entity_id();
        let Some(set) = by_entity.get_mut(id) else {
            return Ok(false);
        };
        let before = set.len();
        set.retain(|l| !same_listener(l, listener));
        let removed = set.len() != before;
        if set.is_empty() {
            by_entity.remove(id);
        }
        Ok(removed)
    }

    /// Runs the post-update hook of every listener watching this entity, in
    /// the calling thread. The first listener error is returned.
    pub fn update_entity(&self, repository: &str, entity: &Entity) -> Result<(), ListenersError> {
        self.registered(repository)?.notify(repository, entity)
    }

    /// Lazily dispatches updates for each entity as the returned iterator is
    /// consumed, yielding every entity unmodified and in input order.
    pub fn update_entities<I>(
        &self,
        repository: &str,
        entities: I,
    ) -> Result<impl Iterator<Item = Result<Entity, ListenersError>> + use<I>, ListenersError>
    where
        I: IntoIterator<Item = Entity>,
    {
        let repo = self.registered(repository)?;
        let repository = repository.to_string();
        Ok(entities.into_iter().map(move |entity| {
            repo.notify(&repository, &entity)?;
            Ok(entity)
        }))
    }

    /// Whether no listener is registered for the repository.
    pub fn is_empty(&self, repository: &str) -> Result<bool, ListenersError> {
        let repo = self.registered(repository)?;
        let by_entity = repo
            .by_entity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(by_entity.is_empty())
    }
}
