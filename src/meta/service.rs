use ahash::{AHashMap, AHashSet};
use metarepo_listeners::EntityListenersService;
use metarepo_model::{Catalog, EntityType, ModelError, Package};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MetadataConfig;
use crate::db::{
    EntityRepository, MetaDataRepositories, MetadataTables, RepositoryCollection, TableSpec,
};
use crate::error::{MetadataError, MetadataResult};
use crate::meta::{adopt_package_id, adopt_persisted_ids, resolver};

/// What [`MetaDataService::upsert_entity_types`] did, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityTypesUpserted {
    /// Entity types written, dependencies first.
    pub order: Vec<String>,
    /// Backing tables created.
    pub created: Vec<String>,
    /// Existing backing tables that gained columns.
    pub upgraded: Vec<String>,
    /// Identifiers copied from persisted metadata.
    pub preserved_ids: usize,
}

/// Entry point for metadata reads and writes.
///
/// Every write keeps the physical schema in step: entity types are written
/// in dependency order and their backing tables created or extended in the
/// backend they name.
pub struct MetaDataService {
    repositories: MetaDataRepositories,
    backends: AHashMap<String, Arc<dyn RepositoryCollection>>,
    default_backend: String,
}

impl MetaDataService {
    pub fn new(pool: SqlitePool, config: &MetadataConfig) -> Self {
        let repositories = MetaDataRepositories::new(pool, config.reset_on_empty_attributes);
        let sqlite: Arc<dyn RepositoryCollection> = repositories.collection().clone();
        let mut backends = AHashMap::new();
        backends.insert(sqlite.backend().to_string(), sqlite);
        Self {
            repositories,
            backends,
            default_backend: config.default_backend.clone(),
        }
    }

    /// Registers an additional backend, replacing one with the same tag.
    #[must_use]
    pub fn with_backend(mut self, collection: Arc<dyn RepositoryCollection>) -> Self {
        self.backends
            .insert(collection.backend().to_string(), collection);
        self
    }

    pub fn metadata_repositories(&self) -> &MetaDataRepositories {
        &self.repositories
    }

    pub fn backend(&self, entity_type: &EntityType) -> MetadataResult<&Arc<dyn RepositoryCollection>> {
        let tag = if entity_type.backend.is_empty() {
            self.default_backend.as_str()
        } else {
            entity_type.backend.as_str()
        };
        self.backends
            .get(tag)
            .ok_or_else(|| MetadataError::UnknownBackend(tag.to_string()))
    }

    /// Bootstraps the metadata tables and applies the additive upgrade.
    pub async fn create_and_upgrade_metadata_tables(
        &self,
    ) -> MetadataResult<(MetadataTables, Vec<String>)> {
        let tables = self.repositories.ensure_metadata_tables_exist().await?;
        let added = self.repositories.upgrade_schema().await?;
        Ok((tables, added))
    }

    /// Persisted packages and entity types.
    pub async fn catalog(&self) -> MetadataResult<Catalog> {
        Ok(Catalog::from_parts(
            self.get_packages().await?,
            self.get_entity_types().await?,
        ))
    }

    pub async fn get_packages(&self) -> MetadataResult<Vec<Package>> {
        self.repositories.find_packages().await
    }

    pub async fn get_entity_types(&self) -> MetadataResult<Vec<EntityType>> {
        self.repositories.find_entity_types().await
    }

    pub async fn get_entity_type(&self, name: &str) -> MetadataResult<Option<EntityType>> {
        Ok(self
            .get_entity_types()
            .await?
            .into_iter()
            .find(|e| e.name == name))
    }

    /// Writes packages parents first. Persisted ids are kept for names that
    /// already exist.
    pub async fn upsert_packages(&self, packages: Vec<Package>) -> MetadataResult<()> {
        let mut catalog = self.catalog().await?;
        let mut batch = packages;
        for package in &mut batch {
            if let Some(existing) = catalog.package(&package.name) {
                adopt_package_id(package, existing);
            }
        }
        catalog.extend_packages(batch.iter().cloned());

        let mut ordered = Vec::with_capacity(batch.len());
        for package in batch {
            if let Some(parent) = package.parent.as_deref() {
                if catalog.package(parent).is_none() {
                    return Err(MetadataError::UnknownPackage(parent.to_string()));
                }
            }
            ordered.push((catalog.package_depth(&package.name)?, package));
        }
        ordered.sort_by_key(|(depth, _)| *depth);

        for (_, package) in &ordered {
            self.repositories.upsert_package(package).await?;
        }
        Ok(())
    }

    fn check_declaration(&self, catalog: &Catalog, entity_type: &EntityType) -> MetadataResult<()> {
        self.backend(entity_type)?;
        if let Some(package) = entity_type.package.as_deref() {
            if catalog.package(package).is_none() {
                return Err(MetadataError::UnknownPackage(package.to_string()));
            }
        }
        let mut names = AHashSet::new();
        for attribute in catalog.all_attributes(entity_type)? {
            if !names.insert(attribute.name.as_str()) {
                return Err(ModelError::InvalidEntityType {
                    entity_type: entity_type.name.clone(),
                    reason: format!("attribute {} is already inherited", attribute.name),
                }
                .into());
            }
        }
        for attribute in &entity_type.attributes {
            if let Some(ref_entity) = attribute.ref_entity.as_deref() {
                if !catalog.contains_entity_type(ref_entity) {
                    return Err(MetadataError::UnknownRefEntity {
                        entity: entity_type.name.clone(),
                        attribute: attribute.name.clone(),
                        ref_entity: ref_entity.to_string(),
                    });
                }
            }
        }
        if !entity_type.is_abstract && catalog.id_attribute(entity_type)?.is_none() {
            return Err(MetadataError::MissingIdAttribute(entity_type.name.clone()));
        }
        catalog.label_attribute(entity_type)?;
        Ok(())
    }

    /// Validates, orders and writes a batch of entity types, then creates or
    /// extends their backing tables.
    ///
    /// References may point into the batch or at persisted entity types.
    /// Persisted descendants of changed entity types gain inherited columns
    /// too.
    pub async fn upsert_entity_types(
        &self,
        entity_types: Vec<EntityType>,
    ) -> MetadataResult<EntityTypesUpserted> {
        for entity_type in &entity_types {
            entity_type.validate()?;
        }

        let mut catalog = self.catalog().await?;
        let mut outcome = EntityTypesUpserted::default();
        let mut batch = entity_types;
        for entity_type in &mut batch {
            if let Some(persisted) = catalog.entity_type(&entity_type.name) {
                outcome.preserved_ids += adopt_persisted_ids(entity_type, persisted);
            }
        }

        let ordered = resolver::resolve(batch)?;
        let fresh: Vec<String> = ordered
            .iter()
            .filter(|e| !catalog.contains_entity_type(&e.name))
            .map(|e| e.name.clone())
            .collect();
        catalog.extend_entity_types(ordered.iter().cloned());
        for entity_type in &ordered {
            self.check_declaration(&catalog, entity_type)?;
        }
        for entity_type in ordered.iter().filter(|e| !e.is_abstract) {
            TableSpec::derive(&catalog, entity_type)?;
        }
        outcome.order = ordered.iter().map(|e| e.name.clone()).collect();
        debug!(order = ?outcome.order, "Resolved entity type order");

        for entity_type in &ordered {
            if let Err(err) = self.repositories.upsert_entity_type(entity_type).await {
                self.discard(&catalog, &fresh, &[]).await;
                return Err(err);
            }
        }

        let in_batch: AHashSet<&str> = ordered.iter().map(|e| e.name.as_str()).collect();
        let mut synced: AHashSet<String> = AHashSet::new();
        for entity_type in &ordered {
            if entity_type.is_abstract {
                continue;
            }
            let backend = self.backend(entity_type)?;
            if backend.has_repository(entity_type).await? {
                if !backend
                    .add_missing_columns(&catalog, entity_type)
                    .await?
                    .is_empty()
                {
                    outcome.upgraded.push(entity_type.name.clone());
                }
            } else if let Err(err) = backend.create_repository(&catalog, entity_type).await {
                self.discard(&catalog, &fresh, &outcome.created).await;
                return Err(err);
            } else {
                outcome.created.push(entity_type.name.clone());
            }
            synced.insert(entity_type.name.clone());
        }

        for entity_type in &ordered {
            for descendant in catalog.descendants(&entity_type.name) {
                if descendant.is_abstract
                    || in_batch.contains(descendant.name.as_str())
                    || !synced.insert(descendant.name.clone())
                {
                    continue;
                }
                let backend = self.backend(descendant)?;
                if !backend.has_repository(descendant).await? {
                    continue;
                }
                if !backend
                    .add_missing_columns(&catalog, descendant)
                    .await?
                    .is_empty()
                {
                    outcome.upgraded.push(descendant.name.clone());
                }
            }
        }

        info!(
            entity_types = outcome.order.len(),
            created = outcome.created.len(),
            upgraded = outcome.upgraded.len(),
            "Upserted entity types"
        );
        Ok(outcome)
    }

    /// Undoes a failed upsert: drops the tables it created and the metadata
    /// rows of the entity types it introduced. `fresh` is in dependency order.
    async fn discard(&self, catalog: &Catalog, fresh: &[String], created: &[String]) {
        for name in created.iter().rev() {
            let Some(entity_type) = catalog.entity_type(name) else {
                continue;
            };
            let Ok(backend) = self.backend(entity_type) else {
                continue;
            };
            if let Err(err) = backend.delete_repository(catalog, entity_type).await {
                warn!(entity_type = %name, error = %err, "Failed to drop table of discarded entity type");
            }
        }
        let names: Vec<String> = fresh.iter().rev().cloned().collect();
        match self.repositories.drop_entity_types(&names).await {
            Ok(removed) => {
                warn!(entity_types = ?names, removed, "Discarded entity types of a failed upsert");
            }
            Err(err) => {
                warn!(entity_types = ?names, error = %err, "Failed to discard entity type metadata");
            }
        }
    }

    /// Deletes entity types with their backing tables, dependents first.
    ///
    /// Refuses when an entity type outside the set still extends or
    /// references one inside it. Returns the names in deletion order.
    pub async fn delete_entity_types<I, S>(&self, names: I) -> MetadataResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = self.catalog().await?;
        let doomed: BTreeSet<String> = names.into_iter().map(Into::into).collect();

        let mut targets = Vec::with_capacity(doomed.len());
        for name in &doomed {
            let entity_type = catalog
                .entity_type(name)
                .ok_or_else(|| MetadataError::UnknownEntityType(name.clone()))?;
            targets.push(entity_type.clone());
        }
        for survivor in catalog.entity_types().filter(|e| !doomed.contains(&e.name)) {
            if let Some(used) = survivor.dependencies().find(|d| doomed.contains(*d)) {
                return Err(MetadataError::EntityTypeInUse {
                    entity_type: used.to_string(),
                    used_by: survivor.name.clone(),
                });
            }
        }

        let mut ordered = resolver::resolve(targets)?;
        ordered.reverse();

        for entity_type in &ordered {
            if entity_type.is_abstract {
                continue;
            }
            let backend = self.backend(entity_type)?;
            if backend.has_repository(entity_type).await? {
                backend.delete_repository(&catalog, entity_type).await?;
            }
        }
        let names: Vec<String> = ordered.into_iter().map(|e| e.name).collect();
        self.repositories.drop_entity_types(&names).await?;

        info!(entity_types = ?names, "Deleted entity types");
        Ok(names)
    }

    /// Deletes packages, deepest first. Refuses packages that still hold
    /// entity types or packages outside the set.
    pub async fn delete_packages<I, S>(&self, names: I) -> MetadataResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = self.catalog().await?;
        let doomed: BTreeSet<String> = names.into_iter().map(Into::into).collect();

        let mut ordered = Vec::with_capacity(doomed.len());
        for name in &doomed {
            if catalog.package(name).is_none() {
                return Err(MetadataError::UnknownPackage(name.clone()));
            }
            if let Some(member) = catalog
                .entity_types()
                .find(|e| e.package.as_deref() == Some(name.as_str()))
            {
                return Err(MetadataError::PackageInUse {
                    package: name.clone(),
                    used_by: member.name.clone(),
                });
            }
            if let Some(child) = catalog.packages().find(|p| {
                p.parent.as_deref() == Some(name.as_str()) && !doomed.contains(&p.name)
            }) {
                return Err(MetadataError::PackageInUse {
                    package: name.clone(),
                    used_by: child.name.clone(),
                });
            }
            ordered.push((catalog.package_depth(name)?, name.clone()));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        let mut deleted = Vec::with_capacity(ordered.len());
        for (_, name) in ordered {
            if self.repositories.delete_package(&name).await? {
                deleted.push(name);
            }
        }
        info!(packages = ?deleted, "Deleted packages");
        Ok(deleted)
    }

    /// Row access to a concrete persisted entity type.
    pub async fn repository(
        &self,
        name: &str,
        listeners: Arc<EntityListenersService>,
    ) -> MetadataResult<Box<dyn EntityRepository>> {
        let catalog = self.catalog().await?;
        let entity_type = catalog
            .entity_type(name)
            .ok_or_else(|| MetadataError::UnknownEntityType(name.to_string()))?;
        if entity_type.is_abstract {
            return Err(MetadataError::AbstractEntityType(name.to_string()));
        }
        self.backend(entity_type)?
            .repository(&catalog, entity_type, listeners)
    }
}
