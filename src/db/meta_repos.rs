use metarepo_model::meta::{self, attribute as attr, entity_type as et, package as pkg};
use metarepo_model::{Catalog, EntityType, Package};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::collection::{RepositoryCollection, SqliteRepositoryCollection};
use crate::db::ddl::{TableSpec, quote_ident};
use crate::db::models::{DbAttribute, DbEntityType, DbPackage, assemble_entity_types, to_json_text};
use crate::error::{MetadataError, MetadataResult};

/// Outcome of the metadata table bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataTables {
    /// Fresh installation: the three tables were created.
    Created,
    /// The tables existed without a single attribute row and were rebuilt.
    Recreated,
    /// The tables were already in use.
    Existing,
}

/// Storage of the metadata tables `sys_md_Package`, `sys_md_EntityType`
/// and `sys_md_Attribute`.
///
/// The tables are derived from the metadata declarations in
/// [`metarepo_model::meta`], so bootstrap and upgrade go through the same
/// DDL path as every user table.
pub struct MetaDataRepositories {
    pool: SqlitePool,
    collection: Arc<SqliteRepositoryCollection>,
    catalog: Catalog,
    reset_on_empty_attributes: bool,
}

fn select_packages() -> String {
    format!(
        r#"SELECT p.{id} AS id, p.{name} AS name, p.{label} AS label,
       p.{description} AS description, parent.{name} AS parent
FROM {table} p
LEFT JOIN {table} parent ON parent.{id} = p.{parent}
ORDER BY p.rowid"#,
        id = quote_ident(pkg::ID),
        name = quote_ident(pkg::NAME),
        label = quote_ident(pkg::LABEL),
        description = quote_ident(pkg::DESCRIPTION),
        parent = quote_ident(pkg::PARENT),
        table = quote_ident(meta::PACKAGE),
    )
}

fn select_entity_types() -> String {
    format!(
        r#"SELECT e.{id} AS id, e.{name} AS name, e.{label} AS label,
       e.{label_i18n} AS label_i18n, e.{description} AS description,
       e.{description_i18n} AS description_i18n, COALESCE(e.{is_abstract}, 0) AS is_abstract,
       e.{backend} AS backend, parent.{name} AS extends, p.{package_name} AS package,
       e.{tags} AS tags
FROM {table} e
LEFT JOIN {table} parent ON parent.{id} = e.{extends}
LEFT JOIN {packages} p ON p.{package_id} = e.{package}
ORDER BY e.rowid"#,
        id = quote_ident(et::ID),
        name = quote_ident(et::NAME),
        label = quote_ident(et::LABEL),
        label_i18n = quote_ident(et::LABEL_I18N),
        description = quote_ident(et::DESCRIPTION),
        description_i18n = quote_ident(et::DESCRIPTION_I18N),
        is_abstract = quote_ident(et::ABSTRACT),
        backend = quote_ident(et::BACKEND),
        extends = quote_ident(et::EXTENDS),
        package = quote_ident(et::PACKAGE),
        tags = quote_ident(et::TAGS),
        table = quote_ident(meta::ENTITY_TYPE),
        packages = quote_ident(meta::PACKAGE),
        package_id = quote_ident(pkg::ID),
        package_name = quote_ident(pkg::NAME),
    )
}

fn select_attributes() -> String {
    let q = quote_ident;
    format!(
        r#"SELECT a.{id} AS id, owner.{et_name} AS entity, a.{name} AS name,
       a.{sequence_nr} AS sequence_nr, a.{data_type} AS data_type, target.{et_name} AS ref_entity,
       a.{label} AS label, a.{description} AS description,
       COALESCE(a.{nillable}, 1) AS nillable, COALESCE(a.{id_attribute}, 0) AS id_attribute,
       a.{lookup} AS lookup_attribute_index, a.{default_value} AS default_value,
       COALESCE(a.{aggregateable}, 0) AS aggregateable, a.{range_min} AS range_min,
       a.{range_max} AS range_max, a.{enum_options} AS enum_options,
       COALESCE(a.{label_attribute}, 0) AS label_attribute,
       COALESCE(a.{read_only}, 0) AS read_only, COALESCE(a.{unique}, 0) AS "unique"
FROM {table} a
JOIN {entity_types} owner ON owner.{et_id} = a.{entity}
LEFT JOIN {entity_types} target ON target.{et_id} = a.{ref_entity}
ORDER BY owner.rowid, a.{sequence_nr}"#,
        id = q(attr::ID),
        entity = q(attr::ENTITY),
        name = q(attr::NAME),
        sequence_nr = q(attr::SEQUENCE_NR),
        data_type = q(attr::DATA_TYPE),
        ref_entity = q(attr::REF_ENTITY),
        label = q(attr::LABEL),
        description = q(attr::DESCRIPTION),
        nillable = q(attr::NILLABLE),
        id_attribute = q(attr::ID_ATTRIBUTE),
        lookup = q(attr::LOOKUP_ATTRIBUTE_INDEX),
        default_value = q(attr::DEFAULT_VALUE),
        aggregateable = q(attr::AGGREGATEABLE),
        range_min = q(attr::RANGE_MIN),
        range_max = q(attr::RANGE_MAX),
        enum_options = q(attr::ENUM_OPTIONS),
        label_attribute = q(attr::LABEL_ATTRIBUTE),
        read_only = q(attr::READ_ONLY),
        unique = q(attr::UNIQUE),
        table = q(meta::ATTRIBUTE),
        entity_types = q(meta::ENTITY_TYPE),
        et_id = q(et::ID),
        et_name = q(et::NAME),
    )
}

/// `(SELECT "id" FROM "<table>" WHERE "name" = ?)`
fn id_by_name(table: &str) -> String {
    format!(
        "(SELECT {} FROM {} WHERE {} = ?)",
        quote_ident("id"),
        quote_ident(table),
        quote_ident("name")
    )
}

/// `INSERT ... ON CONFLICT(id) DO UPDATE` over the given columns; `values`
/// holds one SQL expression per column.
fn upsert_sql(table: &str, columns: &[&str], values: &[String]) -> String {
    let names = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>();
    let updates = names
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        quote_ident(table),
        names.join(", "),
        values.join(", "),
        names[0],
        updates
    )
}

impl MetaDataRepositories {
    pub fn new(pool: SqlitePool, reset_on_empty_attributes: bool) -> Self {
        Self {
            collection: Arc::new(SqliteRepositoryCollection::new(pool.clone())),
            pool,
            catalog: Catalog::from_parts(meta::system_packages(), meta::metadata_entity_types()),
            reset_on_empty_attributes,
        }
    }

    pub fn collection(&self) -> &Arc<SqliteRepositoryCollection> {
        &self.collection
    }

    /// Catalog holding only the metadata declarations.
    pub fn metadata_catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn metadata_entity_type(&self, name: &str) -> MetadataResult<&EntityType> {
        self.catalog
            .entity_type(name)
            .ok_or_else(|| MetadataError::UnknownEntityType(name.to_string()))
    }

    async fn create_metadata_tables(&self) -> MetadataResult<()> {
        for name in meta::META_ENTITY_TYPES {
            let entity_type = self.metadata_entity_type(name)?;
            self.collection
                .create_repository(&self.catalog, entity_type)
                .await?;
        }
        Ok(())
    }

    /// Creates the metadata tables in order Package, EntityType, Attribute.
    ///
    /// Tables that exist without a single attribute row are left over from an
    /// interrupted bootstrap or an incompatible install; they are dropped and
    /// rebuilt unless the reset is disabled.
    pub async fn ensure_metadata_tables_exist(&self) -> MetadataResult<MetadataTables> {
        if !self.collection.table_exists(meta::PACKAGE).await? {
            self.create_metadata_tables().await?;
            info!("Created metadata tables");
            return Ok(MetadataTables::Created);
        }

        let attribute_rows = if self.collection.table_exists(meta::ATTRIBUTE).await? {
            self.collection.count(meta::ATTRIBUTE).await?
        } else {
            0
        };
        if attribute_rows > 0 {
            return Ok(MetadataTables::Existing);
        }

        if self.reset_on_empty_attributes {
            self.recreate_metadata_tables().await?;
            info!("Attribute table was empty; recreated metadata tables");
            Ok(MetadataTables::Recreated)
        } else {
            warn!("Attribute table is empty but metadata reset is disabled");
            self.create_metadata_tables().await?;
            Ok(MetadataTables::Existing)
        }
    }

    /// Drops the three metadata tables (dependents first) and creates them again.
    pub async fn recreate_metadata_tables(&self) -> MetadataResult<()> {
        for name in meta::META_ENTITY_TYPES.iter().rev() {
            let entity_type = self.metadata_entity_type(name)?;
            self.collection
                .delete_repository(&self.catalog, entity_type)
                .await?;
        }
        self.create_metadata_tables().await
    }

    /// Adds the Attribute columns introduced after the first release that the
    /// physical table still lacks. Returns the added column names.
    pub async fn upgrade_schema(&self) -> MetadataResult<Vec<String>> {
        let attribute = self.metadata_entity_type(meta::ATTRIBUTE)?;
        let spec = TableSpec::derive(&self.catalog, attribute)?;
        let mut added = Vec::new();

        for name in meta::UPGRADABLE_ATTRIBUTE_COLUMNS {
            if self.collection.column_exists(meta::ATTRIBUTE, name).await? {
                continue;
            }
            let column = spec.column(name).ok_or_else(|| {
                MetadataError::invalid_entity(meta::ATTRIBUTE, format!("no column {name}"))
            })?;
            sqlx::query(&column.add_column_sql(meta::ATTRIBUTE))
                .execute(&self.pool)
                .await?;
            info!(column = name, "Upgraded metadata schema");
            added.push(name.to_string());
        }
        Ok(added)
    }

    pub async fn find_packages(&self) -> MetadataResult<Vec<Package>> {
        let rows: Vec<DbPackage> = sqlx::query_as(&select_packages())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Package::from).collect())
    }

    pub async fn find_entity_types(&self) -> MetadataResult<Vec<EntityType>> {
        let rows: Vec<DbEntityType> = sqlx::query_as(&select_entity_types())
            .fetch_all(&self.pool)
            .await?;
        let attributes: Vec<DbAttribute> = sqlx::query_as(&select_attributes())
            .fetch_all(&self.pool)
            .await?;
        assemble_entity_types(rows, attributes)
    }

    pub async fn attribute_count(&self) -> MetadataResult<i64> {
        self.collection.count(meta::ATTRIBUTE).await
    }

    /// Inserts or updates a package row by id; the parent is resolved by name.
    pub async fn upsert_package(&self, package: &Package) -> MetadataResult<()> {
        let sql = upsert_sql(
            meta::PACKAGE,
            &[pkg::ID, pkg::NAME, pkg::LABEL, pkg::DESCRIPTION, pkg::PARENT],
            &[
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                id_by_name(meta::PACKAGE),
            ],
        );
        sqlx::query(&sql)
            .bind(&package.id)
            .bind(&package.name)
            .bind(&package.label)
            .bind(&package.description)
            .bind(&package.parent)
            .execute(&self.pool)
            .await?;
        debug!(package = %package.name, id = %package.id, "Upserted package");
        Ok(())
    }

    pub async fn delete_package(&self, name: &str) -> MetadataResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(meta::PACKAGE),
            quote_ident(pkg::NAME)
        );
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Writes the entity type row and its attribute rows in one transaction.
    ///
    /// `extends`, `package` and `refEntity` are resolved from names, so the
    /// rows they point at must already be persisted. Attribute rows of the
    /// entity type that are no longer declared are removed; backing table
    /// columns are never dropped.
    pub async fn upsert_entity_type(&self, entity_type: &EntityType) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        let sql = upsert_sql(
            meta::ENTITY_TYPE,
            &[
                et::ID,
                et::NAME,
                et::LABEL,
                et::LABEL_I18N,
                et::DESCRIPTION,
                et::DESCRIPTION_I18N,
                et::ABSTRACT,
                et::BACKEND,
                et::EXTENDS,
                et::PACKAGE,
                et::TAGS,
            ],
            &[
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                "?".into(),
                id_by_name(meta::ENTITY_TYPE),
                id_by_name(meta::PACKAGE),
                "?".into(),
            ],
        );
        sqlx::query(&sql)
            .bind(&entity_type.id)
            .bind(&entity_type.name)
            .bind(&entity_type.label)
            .bind(to_json_text(
                &entity_type.label_i18n,
                entity_type.label_i18n.is_empty(),
            )?)
            .bind(&entity_type.description)
            .bind(to_json_text(
                &entity_type.description_i18n,
                entity_type.description_i18n.is_empty(),
            )?)
            .bind(entity_type.is_abstract)
            .bind(&entity_type.backend)
            .bind(&entity_type.extends)
            .bind(&entity_type.package)
            .bind(to_json_text(&entity_type.tags, entity_type.tags.is_empty())?)
            .execute(&mut *tx)
            .await?;

        let attribute_sql = upsert_sql(
            meta::ATTRIBUTE,
            &[
                attr::ID,
                attr::ENTITY,
                attr::NAME,
                attr::SEQUENCE_NR,
                attr::DATA_TYPE,
                attr::REF_ENTITY,
                attr::LABEL,
                attr::DESCRIPTION,
                attr::NILLABLE,
                attr::ID_ATTRIBUTE,
                attr::LOOKUP_ATTRIBUTE_INDEX,
                attr::DEFAULT_VALUE,
                attr::AGGREGATEABLE,
                attr::RANGE_MIN,
                attr::RANGE_MAX,
                attr::ENUM_OPTIONS,
                attr::LABEL_ATTRIBUTE,
                attr::READ_ONLY,
                attr::UNIQUE,
            ],
            &std::iter::repeat_n("?".to_string(), 5)
                .chain(std::iter::once(id_by_name(meta::ENTITY_TYPE)))
                .chain(std::iter::repeat_n("?".to_string(), 13))
                .collect::<Vec<_>>(),
        );
        for attribute in &entity_type.attributes {
            let lookup_index = entity_type
                .lookup_attributes
                .iter()
                .position(|l| *l == attribute.name)
                .and_then(|i| i64::try_from(i).ok());
            let is_id = entity_type.id_attribute.as_deref() == Some(attribute.name.as_str());
            let is_label =
                entity_type.label_attribute.as_deref() == Some(attribute.name.as_str());

            sqlx::query(&attribute_sql)
                .bind(&attribute.id)
                .bind(&entity_type.id)
                .bind(&attribute.name)
                .bind(attribute.sequence_nr)
                .bind(attribute.data_type.as_str())
                .bind(&attribute.ref_entity)
                .bind(&attribute.label)
                .bind(&attribute.description)
                .bind(attribute.nillable)
                .bind(is_id)
                .bind(lookup_index)
                .bind(&attribute.default_value)
                .bind(attribute.aggregateable)
                .bind(attribute.range_min)
                .bind(attribute.range_max)
                .bind(to_json_text(
                    &attribute.enum_options,
                    attribute.enum_options.is_empty(),
                )?)
                .bind(is_label)
                .bind(attribute.read_only)
                .bind(attribute.unique)
                .execute(&mut *tx)
                .await?;
        }

        let select_ids = format!(
            "SELECT {}, {} FROM {} WHERE {} = ?",
            quote_ident(attr::ID),
            quote_ident(attr::NAME),
            quote_ident(meta::ATTRIBUTE),
            quote_ident(attr::ENTITY)
        );
        let persisted: Vec<(String, String)> = sqlx::query_as(&select_ids)
            .bind(&entity_type.id)
            .fetch_all(&mut *tx)
            .await?;
        let delete = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(meta::ATTRIBUTE),
            quote_ident(attr::ID)
        );
        for (id, name) in persisted {
            if entity_type.attributes.iter().any(|a| a.id == id) {
                continue;
            }
            sqlx::query(&delete).bind(&id).execute(&mut *tx).await?;
            info!(entity_type = %entity_type.name, attribute = %name, "Removed attribute metadata");
        }

        tx.commit().await?;
        debug!(
            entity_type = %entity_type.name,
            id = %entity_type.id,
            attributes = entity_type.attributes.len(),
            "Upserted entity type"
        );
        Ok(())
    }

    /// Removes the entity type row and its attribute rows. The backing table
    /// is left alone.
    pub async fn drop_entity_type(&self, name: &str) -> MetadataResult<bool> {
        Ok(self.drop_entity_types(&[name.to_string()]).await? > 0)
    }

    /// Removes the rows of several entity types in one transaction. Attribute
    /// rows go first so references between the removed entity types never
    /// dangle; entity type rows are removed in the given order, which must
    /// put children before their parents. Returns the number of entity type
    /// rows removed.
    pub async fn drop_entity_types(&self, names: &[String]) -> MetadataResult<u64> {
        let delete_attributes = format!(
            "DELETE FROM {} WHERE {} = {}",
            quote_ident(meta::ATTRIBUTE),
            quote_ident(attr::ENTITY),
            id_by_name(meta::ENTITY_TYPE)
        );
        let delete_entity_type = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(meta::ENTITY_TYPE),
            quote_ident(et::NAME)
        );

        let mut tx = self.pool.begin().await?;
        for name in names {
            sqlx::query(&delete_attributes)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        let mut removed = 0;
        for name in names {
            removed += sqlx::query(&delete_entity_type)
                .bind(name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        debug!(entity_types = ?names, removed, "Dropped entity type metadata");
        Ok(removed)
    }

    /// Removes one attribute row. The backing column is left alone.
    pub async fn drop_attribute(&self, entity_type: &str, attribute: &str) -> MetadataResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = ?",
            quote_ident(meta::ATTRIBUTE),
            quote_ident(attr::ENTITY),
            id_by_name(meta::ENTITY_TYPE),
            quote_ident(attr::NAME)
        );
        let result = sqlx::query(&sql)
            .bind(entity_type)
            .bind(attribute)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
