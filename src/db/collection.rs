use async_trait::async_trait;
use metarepo_listeners::EntityListenersService;
use metarepo_model::{Catalog, EntityType, entity_type::DEFAULT_BACKEND};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::ddl::{TableSpec, quote_ident};
use crate::db::entity_repo::{EntityRepository, SqliteRepository};
use crate::error::MetadataResult;

/// Physical schema operations of one storage backend.
///
/// Entity types name the backend they live in; the metadata service routes
/// each entity type to the collection registered under that tag.
#[async_trait]
pub trait RepositoryCollection: Send + Sync {
    /// Backend tag this collection serves.
    fn backend(&self) -> &str;

    async fn table_exists(&self, table: &str) -> MetadataResult<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> MetadataResult<bool>;

    /// Number of rows in `table`.
    async fn count(&self, table: &str) -> MetadataResult<i64>;

    async fn has_repository(&self, entity_type: &EntityType) -> MetadataResult<bool> {
        self.table_exists(&entity_type.name).await
    }

    /// Creates the backing table (and junction tables) of a concrete entity type.
    async fn create_repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<()>;

    /// Adds the columns and junction tables that the declaration has and the
    /// physical table lacks. Never drops or alters existing columns.
    async fn add_missing_columns(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<Vec<String>>;

    /// Drops the backing table and its junction tables.
    async fn delete_repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<()>;

    /// Row access to the backing table of a concrete entity type.
    fn repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
        listeners: Arc<EntityListenersService>,
    ) -> MetadataResult<Box<dyn EntityRepository>>;
}

/// [`RepositoryCollection`] over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteRepositoryCollection {
    pool: SqlitePool,
}

impl SqliteRepositoryCollection {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RepositoryCollection for SqliteRepositoryCollection {
    fn backend(&self) -> &str {
        DEFAULT_BACKEND
    }

    async fn table_exists(&self, table: &str) -> MetadataResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> MetadataResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ? COLLATE NOCASE",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count(&self, table: &str) -> MetadataResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn create_repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<()> {
        let spec = TableSpec::derive(catalog, entity_type)?;

        let mut tx = self.pool.begin().await?;
        let create = spec.create_sql();
        debug!(sql = %create, "Creating table");
        sqlx::query(&create).execute(&mut *tx).await?;
        for junction in &spec.junctions {
            sqlx::query(&junction.create_sql()).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(
            table = %spec.name,
            columns = spec.columns.len(),
            junctions = spec.junctions.len(),
            "Created repository"
        );
        Ok(())
    }

    async fn add_missing_columns(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<Vec<String>> {
        let spec = TableSpec::derive(catalog, entity_type)?;
        let mut added = Vec::new();

        for column in &spec.columns {
            if self.column_exists(&spec.name, &column.name).await? {
                continue;
            }
            sqlx::query(&column.add_column_sql(&spec.name))
                .execute(&self.pool)
                .await?;
            info!(table = %spec.name, column = %column.name, "Added column");
            added.push(column.name.clone());
        }
        for junction in &spec.junctions {
            if self.table_exists(&junction.table).await? {
                continue;
            }
            sqlx::query(&junction.create_sql())
                .execute(&self.pool)
                .await?;
            info!(table = %spec.name, junction = %junction.table, "Added junction table");
            added.push(junction.attribute.clone());
        }
        Ok(added)
    }

    async fn delete_repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
    ) -> MetadataResult<()> {
        let spec = TableSpec::derive(catalog, entity_type)?;

        let mut tx = self.pool.begin().await?;
        for junction in &spec.junctions {
            sqlx::query(&junction.drop_sql()).execute(&mut *tx).await?;
        }
        sqlx::query(&spec.drop_sql()).execute(&mut *tx).await?;
        tx.commit().await?;

        info!(table = %spec.name, "Dropped repository");
        Ok(())
    }

    fn repository(
        &self,
        catalog: &Catalog,
        entity_type: &EntityType,
        listeners: Arc<EntityListenersService>,
    ) -> MetadataResult<Box<dyn EntityRepository>> {
        let spec = TableSpec::derive(catalog, entity_type)?;
        Ok(Box::new(SqliteRepository::new(
            self.pool.clone(),
            spec,
            listeners,
        )))
    }
}
