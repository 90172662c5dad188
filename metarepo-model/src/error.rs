use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ModelError {
    #[error("Invalid entity type {entity_type}: {reason}")]
    InvalidEntityType { entity_type: String, reason: String },

    #[error("Entity type {0} is part of an extends cycle")]
    ExtendsCycle(String),

    #[error("Package {0} is part of a parent cycle")]
    PackageCycle(String),

    #[error("Entity type {entity_type} extends unknown entity type {parent}")]
    UnknownParent { entity_type: String, parent: String },

    #[error("Unknown package: {0}")]
    UnknownPackage(String),
}

impl ModelError {
    pub(crate) fn invalid(entity_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEntityType {
            entity_type: entity_type.to_string(),
            reason: reason.into(),
        }
    }
}
