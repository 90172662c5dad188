//! Metadata model shared by the schema synchronization engine and the
//! entity listener registry.
//!
//! - [`Package`], [`EntityType`], [`Attribute`]: the declared metadata
//! - [`Catalog`]: name-indexed view with inheritance-aware lookups
//! - [`Entity`]: a dynamic row of a concrete entity type
//! - [`meta`]: the entity types that describe the metadata tables themselves

pub mod attribute;
pub mod catalog;
pub mod entity;
pub mod entity_type;
pub mod error;
pub mod meta;
pub mod package;

pub use attribute::{Attribute, AttributeType};
pub use catalog::Catalog;
pub use entity::{Entity, EntityId};
pub use entity_type::EntityType;
pub use error::ModelError;
pub use package::Package;

/// Generates a fresh server-side identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
