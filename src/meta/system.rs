use ahash::AHashSet;
use metarepo_model::{Catalog, EntityType, Package, meta};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{MetadataError, MetadataResult};

/// A set of package and entity type declarations, as read from JSON:
/// `{ "packages": [...], "entityTypes": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declarations {
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

impl Declarations {
    pub fn from_json_str(json: &str) -> MetadataResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a declarations file; failures carry the path.
    pub async fn from_file(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        let loaded = match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json_str(&json),
            Err(err) => Err(err.into()),
        };
        loaded.map_err(|source| MetadataError::DeclarationsFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }
}

/// Immutable snapshot of the packages and entity types declared in code.
///
/// Always holds the metadata declarations themselves. Built once at startup
/// and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct SystemRegistry {
    packages: Vec<Package>,
    entity_types: Vec<EntityType>,
    package_names: AHashSet<String>,
    entity_type_names: AHashSet<String>,
}

impl SystemRegistry {
    /// A builder preloaded with the `sys` packages and metadata entity types.
    pub fn builder() -> SystemRegistryBuilder {
        SystemRegistryBuilder {
            declarations: Declarations {
                packages: meta::system_packages(),
                entity_types: meta::metadata_entity_types(),
            },
        }
    }

    /// Packages in declaration order.
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Entity types in declaration order.
    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    pub fn contains_package(&self, name: &str) -> bool {
        self.package_names.contains(name)
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.entity_type_names.contains(name)
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|e| e.name == name)
    }

    /// The `sys_md_*` entity types.
    pub fn metadata_entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types
            .iter()
            .filter(|e| meta::is_meta_entity_type(&e.name))
    }
}

pub struct SystemRegistryBuilder {
    declarations: Declarations,
}

impl SystemRegistryBuilder {
    #[must_use]
    pub fn package(mut self, package: Package) -> Self {
        self.declarations.packages.push(package);
        self
    }

    #[must_use]
    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.declarations.entity_types.push(entity_type);
        self
    }

    #[must_use]
    pub fn declarations(mut self, declarations: Declarations) -> Self {
        self.declarations.packages.extend(declarations.packages);
        self.declarations
            .entity_types
            .extend(declarations.entity_types);
        self
    }

    /// Validates every declaration and freezes the snapshot.
    ///
    /// Names must be unique, the package tree and extends chains must be
    /// closed over the declarations. References to entity types are checked
    /// later against persisted metadata as well.
    pub fn build(self) -> MetadataResult<Arc<SystemRegistry>> {
        let Declarations {
            packages,
            entity_types,
        } = self.declarations;

        let mut package_names = AHashSet::with_capacity(packages.len());
        for package in &packages {
            if !package_names.insert(package.name.clone()) {
                return Err(MetadataError::DuplicateDeclaration(package.name.clone()));
            }
        }
        let mut entity_type_names = AHashSet::with_capacity(entity_types.len());
        for entity_type in &entity_types {
            entity_type.validate()?;
            if !entity_type_names.insert(entity_type.name.clone()) {
                return Err(MetadataError::DuplicateDeclaration(
                    entity_type.name.clone(),
                ));
            }
        }

        let catalog = Catalog::from_parts(packages.iter().cloned(), entity_types.iter().cloned());
        for package in &packages {
            catalog.root_package(&package.name)?;
        }
        for entity_type in &entity_types {
            if let Some(package) = entity_type.package.as_deref() {
                if !package_names.contains(package) {
                    return Err(MetadataError::UnknownPackage(package.to_string()));
                }
            }
            catalog.ancestors(entity_type)?;
        }

        Ok(Arc::new(SystemRegistry {
            packages,
            entity_types,
            package_names,
            entity_type_names,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metarepo_model::{Attribute, AttributeType, ModelError};

    fn setting() -> EntityType {
        EntityType::new("sys_set_Setting")
            .package("sys_set")
            .id_attribute(Attribute::new("key", AttributeType::String))
            .attribute(Attribute::new("value", AttributeType::Text))
    }

    #[test]
    fn always_contains_metadata_declarations() {
        let registry = SystemRegistry::builder().build().unwrap();
        assert!(registry.contains_package(meta::PACKAGE_SYSTEM));
        assert!(registry.contains_package(meta::PACKAGE_META));
        for name in meta::META_ENTITY_TYPES {
            assert!(registry.has_entity_type(name));
        }
        assert_eq!(registry.metadata_entity_types().count(), 3);
    }

    #[test]
    fn declarations_extend_the_snapshot() {
        let json = r#"{
            "packages": [{"name": "sys_set", "parent": "sys"}],
            "entityTypes": [{
                "name": "sys_set_Setting",
                "package": "sys_set",
                "idAttribute": "key",
                "attributes": [
                    {"name": "key", "dataType": "string", "nillable": false},
                    {"name": "value", "dataType": "text"}
                ]
            }]
        }"#;
        let registry = SystemRegistry::builder()
            .declarations(Declarations::from_json_str(json).unwrap())
            .build()
            .unwrap();
        assert!(registry.contains_package("sys_set"));
        assert!(registry.has_entity_type("sys_set_Setting"));
        assert!(!registry.has_entity_type("app_Person"));
    }

    #[tokio::test]
    async fn unreadable_declarations_name_their_file() {
        let path = std::env::temp_dir().join("metarepo_missing_declarations.json");
        let err = Declarations::from_file(&path).await.unwrap_err();
        assert!(err.is_declaration_error());
        match err {
            MetadataError::DeclarationsFile { path: failed, source } => {
                assert_eq!(failed, path);
                assert!(matches!(*source, MetadataError::IoError(_)));
            }
            other => panic!("expected a declarations file error, got {other:?}"),
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = SystemRegistry::builder()
            .package(Package::new("sys_set").parent("sys"))
            .entity_type(setting())
            .entity_type(setting())
            .build()
            .unwrap_err();
        assert!(matches!(err, MetadataError::DuplicateDeclaration(name) if name == "sys_set_Setting"));
    }

    #[test]
    fn undeclared_package_is_rejected() {
        let err = SystemRegistry::builder()
            .entity_type(setting())
            .build()
            .unwrap_err();
        assert!(matches!(err, MetadataError::UnknownPackage(name) if name == "sys_set"));
    }

    #[test]
    fn invalid_declaration_is_rejected() {
        let err = SystemRegistry::builder()
            .package(Package::new("sys_set").parent("sys"))
            .entity_type(setting().lookup_attribute("missing"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Model(ModelError::InvalidEntityType { .. })
        ));
    }
}
