use std::collections::{BTreeMap, HashSet};

use crate::{Attribute, EntityType, ModelError, Package};

/// Name-indexed view over packages and entity types.
///
/// Entity types added later replace earlier ones with the same name, which
/// lets callers overlay a batch of declarations on top of persisted state.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: BTreeMap<String, Package>,
    entity_types: BTreeMap<String, EntityType>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts<P, E>(packages: P, entity_types: E) -> Self
    where
        P: IntoIterator<Item = Package>,
        E: IntoIterator<Item = EntityType>,
    {
        let mut catalog = Self::new();
        catalog.extend_packages(packages);
        catalog.extend_entity_types(entity_types);
        catalog
    }

    pub fn extend_packages<P: IntoIterator<Item = Package>>(&mut self, packages: P) {
        for package in packages {
            self.packages.insert(package.name.clone(), package);
        }
    }

    pub fn extend_entity_types<E: IntoIterator<Item = EntityType>>(&mut self, entity_types: E) {
        for entity_type in entity_types {
            self.entity_types
                .insert(entity_type.name.clone(), entity_type);
        }
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }

    pub fn contains_entity_type(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
    }

    /// Ancestors of `entity_type`, root first, excluding itself.
    pub fn ancestors<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> Result<Vec<&'a EntityType>, ModelError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([entity_type.name.as_str()]);
        let mut current = entity_type;

        while let Some(parent_name) = current.extends.as_deref() {
            if !visited.insert(parent_name) {
                return Err(ModelError::ExtendsCycle(entity_type.name.clone()));
            }
            let parent = self
                .entity_type(parent_name)
                .ok_or_else(|| ModelError::UnknownParent {
                    entity_type: current.name.clone(),
                    parent: parent_name.to_string(),
                })?;
            chain.push(parent);
            current = parent;
        }

        chain.reverse();
        Ok(chain)
    }

    /// All attributes including inherited ones, ancestors first.
    pub fn all_attributes<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> Result<Vec<&'a Attribute>, ModelError> {
        let ancestors = self.ancestors(entity_type)?;
        Ok(ancestors
            .into_iter()
            .chain(std::iter::once(entity_type))
            .flat_map(|et| et.attributes.iter())
            .collect())
    }

    /// The effective id attribute: the nearest one declared along the
    /// extends chain.
    pub fn id_attribute<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> Result<Option<&'a Attribute>, ModelError> {
        self.inherited_role(entity_type, |et| et.id_attribute.as_deref())
    }

    /// The effective label attribute, falling back to the id attribute.
    pub fn label_attribute<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> Result<Option<&'a Attribute>, ModelError> {
        match self.inherited_role(entity_type, |et| et.label_attribute.as_deref())? {
            Some(attr) => Ok(Some(attr)),
            None => self.id_attribute(entity_type),
        }
    }

    fn inherited_role<'a>(
        &'a self,
        entity_type: &'a EntityType,
        role: impl Fn(&EntityType) -> Option<&str>,
    ) -> Result<Option<&'a Attribute>, ModelError> {
        let mut chain = self.ancestors(entity_type)?;
        chain.push(entity_type);

        let Some(name) = chain.iter().rev().copied().find_map(&role) else {
            return Ok(None);
        };
        let attr = chain
            .iter()
            .copied()
            .flat_map(|et| et.attributes.iter())
            .find(|a| a.name == name)
            .ok_or_else(|| {
                ModelError::invalid(
                    &entity_type.name,
                    format!("attribute {name} is neither declared nor inherited"),
                )
            })?;
        Ok(Some(attr))
    }

    /// Entity types that directly or transitively extend `name`.
    pub fn descendants(&self, name: &str) -> Vec<&EntityType> {
        self.entity_types
            .values()
            .filter(|et| et.name != name)
            .filter(|et| {
                self.ancestors(et)
                    .map(|chain| chain.iter().any(|a| a.name == name))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// The terminus of the parent chain of the package named `name`.
    pub fn root_package(&self, name: &str) -> Result<&Package, ModelError> {
        let mut current = self
            .package(name)
            .ok_or_else(|| ModelError::UnknownPackage(name.to_string()))?;
        let mut visited = HashSet::from([current.name.as_str()]);

        while let Some(parent_name) = current.parent.as_deref() {
            if !visited.insert(parent_name) {
                return Err(ModelError::PackageCycle(name.to_string()));
            }
            current = self
                .package(parent_name)
                .ok_or_else(|| ModelError::UnknownPackage(parent_name.to_string()))?;
        }
        Ok(current)
    }

    /// Whether the package is `root` itself or one of its descendants.
    pub fn is_in_namespace(&self, package: &str, root: &str) -> Result<bool, ModelError> {
        if package == root {
            return Ok(true);
        }
        Ok(self.root_package(package)?.name == root)
    }

    /// Number of ancestors of a package; parents sort before children by it.
    pub fn package_depth(&self, name: &str) -> Result<usize, ModelError> {
        let mut depth = 0;
        let mut current = self
            .package(name)
            .ok_or_else(|| ModelError::UnknownPackage(name.to_string()))?;
        while let Some(parent_name) = current.parent.as_deref() {
            depth += 1;
            if depth > self.packages.len() {
                return Err(ModelError::PackageCycle(name.to_string()));
            }
            current = self
                .package(parent_name)
                .ok_or_else(|| ModelError::UnknownPackage(parent_name.to_string()))?;
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttributeType;

    fn catalog() -> Catalog {
        Catalog::from_parts(
            [
                Package::new("sys"),
                Package::new("sys_md").parent("sys"),
                Package::new("sys_md_deep").parent("sys_md"),
                Package::new("shop"),
            ],
            [
                EntityType::new("Agent")
                    .abstract_()
                    .id_attribute(Attribute::new("id", AttributeType::String))
                    .attribute(Attribute::new("name", AttributeType::String)),
                EntityType::new("Person")
                    .extends("Agent")
                    .attribute(Attribute::new("age", AttributeType::Int))
                    .label_attribute("name"),
                EntityType::new("Employee")
                    .extends("Person")
                    .attribute(Attribute::new("salary", AttributeType::Decimal)),
            ],
        )
    }

    #[test]
    fn ancestors_are_root_first() {
        let catalog = catalog();
        let employee = catalog.entity_type("Employee").unwrap();
        let names: Vec<&str> = catalog
            .ancestors(employee)
            .unwrap()
            .iter()
            .map(|et| et.name.as_str())
            .collect();
        assert_eq!(names, vec!["Agent", "Person"]);
    }

    #[test]
    fn all_attributes_include_inherited_first() {
        let catalog = catalog();
        let employee = catalog.entity_type("Employee").unwrap();
        let names: Vec<&str> = catalog
            .all_attributes(employee)
            .unwrap()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "name", "age", "salary"]);
    }

    #[test]
    fn id_and_label_attributes_are_inherited() {
        let catalog = catalog();
        let employee = catalog.entity_type("Employee").unwrap();
        assert_eq!(catalog.id_attribute(employee).unwrap().unwrap().name, "id");
        assert_eq!(
            catalog.label_attribute(employee).unwrap().unwrap().name,
            "name"
        );
    }

    #[test]
    fn missing_parent_is_reported() {
        let catalog = catalog();
        let orphan = EntityType::new("Robot").extends("Machine");
        assert_eq!(
            catalog.ancestors(&orphan).unwrap_err(),
            ModelError::UnknownParent {
                entity_type: "Robot".to_string(),
                parent: "Machine".to_string()
            }
        );
    }

    #[test]
    fn extends_cycle_is_reported() {
        let catalog = Catalog::from_parts(
            [],
            [
                EntityType::new("A").extends("B"),
                EntityType::new("B").extends("A"),
            ],
        );
        let a = catalog.entity_type("A").unwrap();
        assert_eq!(
            catalog.ancestors(a).unwrap_err(),
            ModelError::ExtendsCycle("A".to_string())
        );
    }

    #[test]
    fn descendants_are_transitive() {
        let catalog = catalog();
        let mut names: Vec<&str> = catalog
            .descendants("Agent")
            .iter()
            .map(|et| et.name.as_str())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Employee", "Person"]);
    }

    #[test]
    fn namespace_membership_follows_parent_chain() {
        let catalog = catalog();
        assert!(catalog.is_in_namespace("sys", "sys").unwrap());
        assert!(catalog.is_in_namespace("sys_md_deep", "sys").unwrap());
        assert!(!catalog.is_in_namespace("shop", "sys").unwrap());
        assert_eq!(catalog.package_depth("sys_md_deep").unwrap(), 2);
    }

    #[test]
    fn package_cycle_is_reported() {
        let catalog = Catalog::from_parts(
            [Package::new("a").parent("b"), Package::new("b").parent("a")],
            [],
        );
        assert!(matches!(
            catalog.root_package("a"),
            Err(ModelError::PackageCycle(_))
        ));
    }
}
