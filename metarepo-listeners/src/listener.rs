use metarepo_model::{Entity, EntityId};

/// Error returned by a listener hook; handed back to the caller untouched.
pub type ListenerFailure = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber for updates of one entity, identified by its id value.
pub trait EntityListener: Send + Sync {
    /// Id value of the entity this listener watches.
    fn entity_id(&self) -> &EntityId;

    /// Called synchronously after the watched entity was updated.
    fn post_update(&self, entity: &Entity) -> Result<(), ListenerFailure>;
}
