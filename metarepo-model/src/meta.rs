//! Entity types describing the metadata tables themselves.
//!
//! The three metadata tables are created from these declarations through the
//! same DDL path as every other entity type, and their own rows end up in the
//! Attribute table once the system declarations are persisted.

use crate::{Attribute, AttributeType, EntityType, Package};

/// Reserved root of the system namespace.
pub const PACKAGE_SYSTEM: &str = "sys";
/// Package holding the metadata entity types.
pub const PACKAGE_META: &str = "sys_md";

pub const PACKAGE: &str = "sys_md_Package";
pub const ENTITY_TYPE: &str = "sys_md_EntityType";
pub const ATTRIBUTE: &str = "sys_md_Attribute";

/// Metadata entity types in creation order.
pub const META_ENTITY_TYPES: [&str; 3] = [PACKAGE, ENTITY_TYPE, ATTRIBUTE];

/// Attribute table columns introduced after the first release. Installations
/// created earlier lack them until the schema upgrade adds them.
pub const UPGRADABLE_ATTRIBUTE_COLUMNS: [&str; 7] = [
    attribute::AGGREGATEABLE,
    attribute::RANGE_MIN,
    attribute::RANGE_MAX,
    attribute::ENUM_OPTIONS,
    attribute::LABEL_ATTRIBUTE,
    attribute::READ_ONLY,
    attribute::UNIQUE,
];

pub mod package {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const LABEL: &str = "label";
    pub const DESCRIPTION: &str = "description";
    pub const PARENT: &str = "parent";
}

pub mod entity_type {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const LABEL: &str = "label";
    pub const LABEL_I18N: &str = "labelI18n";
    pub const DESCRIPTION: &str = "description";
    pub const DESCRIPTION_I18N: &str = "descriptionI18n";
    pub const ABSTRACT: &str = "abstract";
    pub const BACKEND: &str = "backend";
    pub const EXTENDS: &str = "extends";
    pub const PACKAGE: &str = "package";
    pub const TAGS: &str = "tags";
}

pub mod attribute {
    pub const ID: &str = "id";
    pub const ENTITY: &str = "entity";
    pub const NAME: &str = "name";
    pub const SEQUENCE_NR: &str = "sequenceNr";
    pub const DATA_TYPE: &str = "dataType";
    pub const REF_ENTITY: &str = "refEntity";
    pub const LABEL: &str = "label";
    pub const DESCRIPTION: &str = "description";
    pub const NILLABLE: &str = "nillable";
    pub const ID_ATTRIBUTE: &str = "idAttribute";
    pub const LOOKUP_ATTRIBUTE_INDEX: &str = "lookupAttributeIndex";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const AGGREGATEABLE: &str = "aggregateable";
    pub const RANGE_MIN: &str = "rangeMin";
    pub const RANGE_MAX: &str = "rangeMax";
    pub const ENUM_OPTIONS: &str = "enumOptions";
    pub const LABEL_ATTRIBUTE: &str = "labelAttribute";
    pub const READ_ONLY: &str = "readOnly";
    pub const UNIQUE: &str = "unique";
}

pub fn is_meta_entity_type(name: &str) -> bool {
    META_ENTITY_TYPES.contains(&name)
}

/// The `sys` root package and the `sys_md` metadata package.
pub fn system_packages() -> Vec<Package> {
    vec![
        Package::new(PACKAGE_SYSTEM)
            .label("System")
            .description("Entity types and packages declared by the system"),
        Package::new(PACKAGE_META)
            .parent(PACKAGE_SYSTEM)
            .label("Meta")
            .description("Entity types describing entity types"),
    ]
}

pub fn metadata_entity_types() -> Vec<EntityType> {
    vec![
        package_metadata(),
        entity_type_metadata(),
        attribute_metadata(),
    ]
}

fn flag(name: &str, default: bool) -> Attribute {
    Attribute::new(name, AttributeType::Bool)
        .nillable(false)
        .default_value(default.to_string())
}

pub fn package_metadata() -> EntityType {
    use package::*;

    EntityType::new(PACKAGE)
        .label("Package")
        .package(PACKAGE_META)
        .id_attribute(Attribute::new(ID, AttributeType::String))
        .attribute(
            Attribute::new(NAME, AttributeType::String)
                .nillable(false)
                .unique(true),
        )
        .attribute(Attribute::new(LABEL, AttributeType::String))
        .attribute(Attribute::new(DESCRIPTION, AttributeType::Text))
        .attribute(Attribute::xref(PARENT, crate::meta::PACKAGE))
        .label_attribute(NAME)
        .lookup_attribute(NAME)
}

pub fn entity_type_metadata() -> EntityType {
    use entity_type::*;

    EntityType::new(ENTITY_TYPE)
        .label("Entity type")
        .package(PACKAGE_META)
        .id_attribute(Attribute::new(ID, AttributeType::String))
        .attribute(
            Attribute::new(NAME, AttributeType::String)
                .nillable(false)
                .unique(true),
        )
        .attribute(Attribute::new(LABEL, AttributeType::String).nillable(false))
        .attribute(Attribute::new(LABEL_I18N, AttributeType::Text))
        .attribute(Attribute::new(DESCRIPTION, AttributeType::Text))
        .attribute(Attribute::new(DESCRIPTION_I18N, AttributeType::Text))
        .attribute(flag(ABSTRACT, false))
        .attribute(Attribute::new(BACKEND, AttributeType::String).nillable(false))
        .attribute(Attribute::xref(EXTENDS, crate::meta::ENTITY_TYPE))
        .attribute(Attribute::xref(PACKAGE, crate::meta::PACKAGE))
        .attribute(Attribute::new(TAGS, AttributeType::Text))
        .label_attribute(LABEL)
        .lookup_attribute(NAME)
}

pub fn attribute_metadata() -> EntityType {
    use attribute::*;

    let data_types = AttributeType::ALL.iter().map(AttributeType::as_str);

    EntityType::new(ATTRIBUTE)
        .label("Attribute")
        .package(PACKAGE_META)
        .id_attribute(Attribute::new(ID, AttributeType::String))
        .attribute(Attribute::xref(ENTITY, crate::meta::ENTITY_TYPE).nillable(false))
        .attribute(Attribute::new(NAME, AttributeType::String).nillable(false))
        .attribute(Attribute::new(SEQUENCE_NR, AttributeType::Int).nillable(false))
        .attribute(Attribute::enumeration(DATA_TYPE, data_types).nillable(false))
        .attribute(Attribute::xref(REF_ENTITY, crate::meta::ENTITY_TYPE))
        .attribute(Attribute::new(LABEL, AttributeType::String))
        .attribute(Attribute::new(DESCRIPTION, AttributeType::Text))
        .attribute(flag(NILLABLE, true))
        .attribute(flag(ID_ATTRIBUTE, false))
        .attribute(Attribute::new(LOOKUP_ATTRIBUTE_INDEX, AttributeType::Int))
        .attribute(Attribute::new(DEFAULT_VALUE, AttributeType::Text))
        .attribute(flag(AGGREGATEABLE, false))
        .attribute(Attribute::new(RANGE_MIN, AttributeType::Long))
        .attribute(Attribute::new(RANGE_MAX, AttributeType::Long))
        .attribute(Attribute::new(ENUM_OPTIONS, AttributeType::Text))
        .attribute(flag(LABEL_ATTRIBUTE, false))
        .attribute(flag(READ_ONLY, false))
        .attribute(flag(UNIQUE, false))
        .label_attribute(NAME)
        .lookup_attribute(NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_declarations_are_valid() {
        for et in metadata_entity_types() {
            assert_eq!(et.validate(), Ok(()), "{}", et.name);
            assert!(is_meta_entity_type(&et.name));
        }
    }

    #[test]
    fn upgradable_columns_are_declared_on_attribute_metadata() {
        let attribute = attribute_metadata();
        for column in UPGRADABLE_ATTRIBUTE_COLUMNS {
            assert!(attribute.get_attribute(column).is_some(), "{column}");
        }
    }

    #[test]
    fn metadata_package_lives_under_system_root() {
        let packages = system_packages();
        assert_eq!(packages[1].parent.as_deref(), Some(PACKAGE_SYSTEM));
    }
}
