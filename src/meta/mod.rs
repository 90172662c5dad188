//! Metadata management on top of the storage layer.
//!
//! - `resolver.rs`: dependency order of entity type batches
//! - `service.rs`: metadata reads, upserts and deletions with schema sync
//! - `system.rs`: snapshot of the code-declared packages and entity types
//! - `persister.rs`: reconciliation of that snapshot with persisted metadata

pub mod persister;
pub mod resolver;
pub mod service;
pub mod system;

pub use persister::{PersistSummary, SystemEntityTypePersister};
pub use resolver::{resolve, resolve_names};
pub use service::{EntityTypesUpserted, MetaDataService};
pub use system::{Declarations, SystemRegistry, SystemRegistryBuilder};

use metarepo_model::{EntityType, Package};

/// Copies the persisted package id onto a declaration with the same name.
/// Returns whether the id changed.
pub fn adopt_package_id(declared: &mut Package, persisted: &Package) -> bool {
    if declared.name != persisted.name || declared.id == persisted.id {
        return false;
    }
    declared.id.clone_from(&persisted.id);
    true
}

/// Copies persisted identifiers onto a declaration: the entity type id by
/// name and each attribute id by attribute name. Returns the number of ids
/// that changed.
pub fn adopt_persisted_ids(declared: &mut EntityType, persisted: &EntityType) -> usize {
    if declared.name != persisted.name {
        return 0;
    }
    let mut adopted = 0;
    if declared.id != persisted.id {
        declared.id.clone_from(&persisted.id);
        adopted += 1;
    }
    for attribute in &mut declared.attributes {
        if let Some(existing) = persisted.get_attribute(&attribute.name) {
            if attribute.id != existing.id {
                attribute.id.clone_from(&existing.id);
                adopted += 1;
            }
        }
    }
    adopted
}

#[cfg(test)]
mod tests {
    use super::*;
    use metarepo_model::{Attribute, AttributeType};

    #[test]
    fn adopts_entity_type_and_attribute_ids_by_name() {
        let persisted = EntityType::new("sys_Setting")
            .with_id("E1")
            .id_attribute(Attribute::new("key", AttributeType::String).with_id("A1"))
            .attribute(Attribute::new("value", AttributeType::Text).with_id("A2"));
        let mut declared = EntityType::new("sys_Setting")
            .id_attribute(Attribute::new("key", AttributeType::String))
            .attribute(Attribute::new("value", AttributeType::Text))
            .attribute(Attribute::new("scope", AttributeType::String));
        let fresh_scope_id = declared.get_attribute("scope").unwrap().id.clone();

        assert_eq!(adopt_persisted_ids(&mut declared, &persisted), 3);
        assert_eq!(declared.id, "E1");
        assert_eq!(declared.get_attribute("key").unwrap().id, "A1");
        assert_eq!(declared.get_attribute("value").unwrap().id, "A2");
        assert_eq!(declared.get_attribute("scope").unwrap().id, fresh_scope_id);

        assert_eq!(adopt_persisted_ids(&mut declared, &persisted), 0);
    }

    #[test]
    fn different_names_are_left_alone() {
        let persisted = Package::new("sys").with_id("P1");
        let mut declared = Package::new("sys_md");
        assert!(!adopt_package_id(&mut declared, &persisted));
        assert_ne!(declared.id, "P1");

        let mut same = Package::new("sys");
        assert!(adopt_package_id(&mut same, &persisted));
        assert_eq!(same.id, "P1");
    }
}
