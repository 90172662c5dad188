use metarepo_listeners::ListenersError;
use metarepo_model::ModelError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, ThisError)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Listeners(#[from] ListenersError),

    #[error("Dependency cycle between entity types: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Attribute {entity}.{attribute} references unknown entity type {ref_entity}")]
    UnknownRefEntity {
        entity: String,
        attribute: String,
        ref_entity: String,
    },

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error("No repository collection registered for backend {0}")]
    UnknownBackend(String),

    #[error("Entity type {0} is abstract and has no backing table")]
    AbstractEntityType(String),

    #[error("Entity type {0} has no id attribute")]
    MissingIdAttribute(String),

    #[error("Entity type {entity_type} is still used by {used_by}")]
    EntityTypeInUse {
        entity_type: String,
        used_by: String,
    },

    #[error("Package {package} still holds {used_by}")]
    PackageInUse { package: String, used_by: String },

    #[error("Invalid {entity_type} entity: {reason}")]
    InvalidEntity { entity_type: String, reason: String },

    #[error("Duplicate declaration of {0}")]
    DuplicateDeclaration(String),

    #[error("Failed to load declarations from {}: {source}", .path.display())]
    DeclarationsFile {
        path: PathBuf,
        #[source]
        source: Box<MetadataError>,
    },
}

impl MetadataError {
    pub(crate) fn invalid_entity(entity_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEntity {
            entity_type: entity_type.to_string(),
            reason: reason.into(),
        }
    }

    /// Failures caused by the declarations themselves rather than storage.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Self::Model(_)
                | Self::DependencyCycle(_)
                | Self::UnknownRefEntity { .. }
                | Self::UnknownPackage(_)
                | Self::UnknownBackend(_)
                | Self::MissingIdAttribute(_)
                | Self::DuplicateDeclaration(_)
                | Self::DeclarationsFile { .. }
        )
    }
}
