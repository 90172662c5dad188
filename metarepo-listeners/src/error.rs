use metarepo_model::EntityId;
use thiserror::Error as ThisError;

use crate::listener::ListenerFailure;

#[derive(Debug, ThisError)]
pub enum ListenersError {
    #[error("Repository [{0}] is not registered in the entity listeners service")]
    NotRegistered(String),

    #[error("Listener for {repository}/{entity_id} failed: {source}")]
    Listener {
        repository: String,
        entity_id: EntityId,
        #[source]
        source: ListenerFailure,
    },
}
