use metarepo_model::{Catalog, meta};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{MetadataError, MetadataResult};
use crate::meta::{
    MetaDataService, SystemRegistry, adopt_package_id, adopt_persisted_ids, resolver,
};
use crate::utils::logging::with_pretty_json_debug;

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub packages: usize,
    pub entity_types: usize,
    /// Persisted identifiers carried over onto the declarations.
    pub preserved_ids: usize,
    pub created_repositories: Vec<String>,
    pub upgraded_repositories: Vec<String>,
    pub removed_entity_types: Vec<String>,
    pub removed_packages: Vec<String>,
    /// Orphaned system packages kept because something still lives in them.
    pub kept_packages: Vec<String>,
}

/// Brings persisted metadata in line with the system registry.
///
/// Declared packages and entity types are written with their persisted
/// identifiers; system entity types and packages that are no longer declared
/// are removed. Nothing outside the `sys` package namespace is touched.
pub struct SystemEntityTypePersister {
    service: Arc<MetaDataService>,
    registry: Arc<SystemRegistry>,
}

fn in_system_namespace(catalog: &Catalog, package: Option<&str>) -> MetadataResult<bool> {
    match package {
        Some(package) => Ok(catalog.is_in_namespace(package, meta::PACKAGE_SYSTEM)?),
        None => Ok(false),
    }
}

impl SystemEntityTypePersister {
    pub fn new(service: Arc<MetaDataService>, registry: Arc<SystemRegistry>) -> Self {
        Self { service, registry }
    }

    pub async fn persist(&self) -> MetadataResult<PersistSummary> {
        let mut summary = PersistSummary::default();
        with_pretty_json_debug(self.registry.entity_types(), |json| {
            debug!(declarations = %json, "System entity types");
        });

        // Metadata tables first; everything else is described by their rows.
        let meta_catalog = self.service.metadata_repositories().metadata_catalog();
        let meta_types = resolver::resolve(
            self.registry
                .metadata_entity_types()
                .cloned()
                .collect(),
        )?;
        for entity_type in &meta_types {
            let backend = self.service.backend(entity_type)?;
            if !backend.has_repository(entity_type).await? {
                backend.create_repository(meta_catalog, entity_type).await?;
                summary.created_repositories.push(entity_type.name.clone());
            }
        }

        // A cycle among the declarations aborts before anything is written.
        resolver::resolve_names(self.registry.entity_types())?;
        let persisted = self.service.catalog().await?;

        let mut packages = self.registry.packages().to_vec();
        for package in &mut packages {
            if let Some(existing) = persisted.package(&package.name) {
                if adopt_package_id(package, existing) {
                    summary.preserved_ids += 1;
                }
            }
        }
        summary.packages = packages.len();
        self.service.upsert_packages(packages).await?;

        let mut entity_types = self.registry.entity_types().to_vec();
        for entity_type in &mut entity_types {
            if let Some(existing) = persisted.entity_type(&entity_type.name) {
                summary.preserved_ids += adopt_persisted_ids(entity_type, existing);
            }
        }
        summary.entity_types = entity_types.len();
        let upserted = self.service.upsert_entity_types(entity_types).await?;
        summary.created_repositories.extend(upserted.created);
        summary.upgraded_repositories = upserted.upgraded;

        summary.removed_entity_types = self.remove_non_existing_system_entity_types().await?;
        let (removed, kept) = self.remove_non_existing_system_packages().await?;
        summary.removed_packages = removed;
        summary.kept_packages = kept;

        info!(
            packages = summary.packages,
            entity_types = summary.entity_types,
            preserved_ids = summary.preserved_ids,
            created = summary.created_repositories.len(),
            upgraded = summary.upgraded_repositories.len(),
            removed_entity_types = summary.removed_entity_types.len(),
            removed_packages = summary.removed_packages.len(),
            "Persisted system metadata"
        );
        with_pretty_json_debug(&summary, |json| {
            debug!(summary = %json, "Persist summary");
        });
        Ok(summary)
    }

    /// Deletes persisted entity types in the `sys` namespace that the
    /// registry no longer declares, backing tables included. Returns their
    /// names.
    pub async fn remove_non_existing_system_entity_types(&self) -> MetadataResult<Vec<String>> {
        let catalog = self.service.catalog().await?;
        let mut orphans = Vec::new();
        for entity_type in catalog.entity_types() {
            if self.registry.has_entity_type(&entity_type.name) {
                continue;
            }
            if in_system_namespace(&catalog, entity_type.package.as_deref())? {
                orphans.push(entity_type.name.clone());
            }
        }
        if orphans.is_empty() {
            return Ok(orphans);
        }

        let removed = self.service.delete_entity_types(orphans).await?;
        info!(entity_types = ?removed, "Removed orphaned system entity types");
        Ok(removed)
    }

    /// Deletes persisted `sys` packages the registry no longer declares,
    /// deepest first. Packages that still hold entity types or surviving
    /// child packages are kept. Returns `(removed, kept)`.
    pub async fn remove_non_existing_system_packages(
        &self,
    ) -> MetadataResult<(Vec<String>, Vec<String>)> {
        let catalog = self.service.catalog().await?;
        let mut candidates = Vec::new();
        for package in catalog.packages() {
            if self.registry.contains_package(&package.name) {
                continue;
            }
            if in_system_namespace(&catalog, Some(package.name.as_str()))? {
                candidates.push((catalog.package_depth(&package.name)?, package.name.clone()));
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed: Vec<String> = Vec::new();
        let mut kept = Vec::new();
        for (_, name) in candidates {
            let holds_entity_types = catalog
                .entity_types()
                .any(|e| e.package.as_deref() == Some(name.as_str()));
            let holds_packages = catalog.packages().any(|p| {
                p.parent.as_deref() == Some(name.as_str()) && !removed.contains(&p.name)
            });
            if holds_entity_types || holds_packages {
                warn!(package = %name, "Keeping orphaned system package that is not empty");
                kept.push(name);
                continue;
            }
            match self.service.delete_packages([name.as_str()]).await {
                Ok(_) => removed.push(name),
                Err(MetadataError::PackageInUse { package, used_by }) => {
                    warn!(%package, %used_by, "Keeping orphaned system package that is not empty");
                    kept.push(package);
                }
                Err(err) => return Err(err),
            }
        }
        if !removed.is_empty() {
            info!(packages = ?removed, "Removed orphaned system packages");
        }
        Ok((removed, kept))
    }
}
