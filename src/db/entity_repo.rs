use async_trait::async_trait;
use metarepo_listeners::EntityListenersService;
use metarepo_model::{Entity, EntityId};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use crate::db::ddl::{ColumnSpec, JunctionSpec, TableSpec, ValueKind, quote_ident};
use crate::error::{MetadataError, MetadataResult};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Row-level access to the backing table of one concrete entity type.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Fully qualified entity type name, also the listener repository name.
    fn name(&self) -> &str;

    async fn add(&self, entity: &Entity) -> MetadataResult<()>;

    /// Writes the entity, then notifies its listeners.
    async fn update(&self, entity: &Entity) -> MetadataResult<()>;

    /// Writes all entities in one transaction, then notifies listeners per
    /// entity in input order. Returns the number of entities written.
    async fn update_all(&self, entities: Vec<Entity>) -> MetadataResult<usize>;

    async fn find_one(&self, id: &EntityId) -> MetadataResult<Option<Entity>>;

    async fn find_all(&self) -> MetadataResult<Vec<Entity>>;

    async fn count(&self) -> MetadataResult<i64>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: &EntityId) -> MetadataResult<bool>;
}

pub struct SqliteRepository {
    pool: SqlitePool,
    spec: TableSpec,
    listeners: Arc<EntityListenersService>,
}

fn bind_json<'q>(
    query: SqliteQuery<'q>,
    entity_type: &str,
    name: &str,
    kind: ValueKind,
    value: &Value,
) -> MetadataResult<SqliteQuery<'q>> {
    let mismatch = || {
        MetadataError::invalid_entity(
            entity_type,
            format!("value {value} does not fit attribute {name}"),
        )
    };
    Ok(match (kind, value) {
        (_, Value::Null) => query.bind(Option::<String>::None),
        (ValueKind::Bool, Value::Bool(b)) => query.bind(*b),
        (ValueKind::Int, Value::Number(n)) => query.bind(n.as_i64().ok_or_else(mismatch)?),
        (ValueKind::Float, Value::Number(n)) => query.bind(n.as_f64().ok_or_else(mismatch)?),
        (ValueKind::Text, Value::String(s)) => query.bind(s.clone()),
        (ValueKind::Text, Value::Number(_) | Value::Bool(_)) => query.bind(value.to_string()),
        _ => return Err(mismatch()),
    })
}

fn bind_id<'q>(query: SqliteQuery<'q>, id: &EntityId) -> SqliteQuery<'q> {
    match id {
        EntityId::Int(i) => query.bind(*i),
        EntityId::Text(s) => query.bind(s.clone()),
    }
}

fn read_value(row: &SqliteRow, column: &str, kind: ValueKind) -> MetadataResult<Value> {
    let value = match kind {
        ValueKind::Bool => row.try_get::<Option<bool>, _>(column)?.map(Value::from),
        ValueKind::Int => row.try_get::<Option<i64>, _>(column)?.map(Value::from),
        ValueKind::Float => row.try_get::<Option<f64>, _>(column)?.map(Value::from),
        ValueKind::Text => row.try_get::<Option<String>, _>(column)?.map(Value::from),
    };
    Ok(value.unwrap_or(Value::Null))
}

impl SqliteRepository {
    /// Registers the repository with the listener service on construction.
    pub fn new(pool: SqlitePool, spec: TableSpec, listeners: Arc<EntityListenersService>) -> Self {
        listeners.register(&spec.name);
        Self {
            pool,
            spec,
            listeners,
        }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn check(&self, entity: &Entity) -> MetadataResult<EntityId> {
        if entity.entity_type != self.spec.name {
            return Err(MetadataError::invalid_entity(
                &self.spec.name,
                format!("got an entity of type {}", entity.entity_type),
            ));
        }
        if let Some(unknown) = entity
            .values
            .keys()
            .find(|k| self.spec.column(k).is_none() && self.spec.junction(k).is_none())
        {
            return Err(MetadataError::invalid_entity(
                &self.spec.name,
                format!("unknown attribute {unknown}"),
            ));
        }
        entity.id_value().ok_or_else(|| {
            MetadataError::invalid_entity(&self.spec.name, "missing id value")
        })
    }

    fn present_columns<'a>(&'a self, entity: &Entity) -> Vec<&'a ColumnSpec> {
        self.spec
            .columns
            .iter()
            .filter(|c| entity.values.contains_key(&c.name))
            .collect()
    }

    async fn insert(&self, conn: &mut SqliteConnection, entity: &Entity) -> MetadataResult<()> {
        let id = self.check(entity)?;
        let columns = self.present_columns(entity);
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.spec.name),
            columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for column in &columns {
            let value = entity.get(&column.name).unwrap_or(&Value::Null);
            query = bind_json(query, &self.spec.name, &column.name, column.kind, value)?;
        }
        query.execute(&mut *conn).await?;
        self.write_junctions(conn, entity, &id).await
    }

    async fn write(&self, conn: &mut SqliteConnection, entity: &Entity) -> MetadataResult<()> {
        let id = self.check(entity)?;
        let columns: Vec<&ColumnSpec> = self
            .present_columns(entity)
            .into_iter()
            .filter(|c| c.name != self.spec.id_column)
            .collect();

        if columns.is_empty() {
            if self.find_row(conn, &id).await?.is_none() {
                return Err(self.no_row(&id));
            }
        } else {
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(&self.spec.name),
                columns
                    .iter()
                    .map(|c| format!("{} = ?", quote_ident(&c.name)))
                    .collect::<Vec<_>>()
                    .join(", "),
                quote_ident(&self.spec.id_column)
            );
            let mut query = sqlx::query(&sql);
            for column in &columns {
                let value = entity.get(&column.name).unwrap_or(&Value::Null);
                query = bind_json(query, &self.spec.name, &column.name, column.kind, value)?;
            }
            let result = bind_id(query, &id).execute(&mut *conn).await?;
            if result.rows_affected() == 0 {
                return Err(self.no_row(&id));
            }
        }
        self.write_junctions(conn, entity, &id).await
    }

    fn no_row(&self, id: &EntityId) -> MetadataError {
        MetadataError::invalid_entity(&self.spec.name, format!("no row with id {id}"))
    }

    /// Replaces the junction rows of every multi-reference value present on
    /// the entity, keeping the array order.
    async fn write_junctions(
        &self,
        conn: &mut SqliteConnection,
        entity: &Entity,
        id: &EntityId,
    ) -> MetadataResult<()> {
        for junction in &self.spec.junctions {
            let Some(value) = entity.get(&junction.attribute) else {
                continue;
            };
            let refs: &[Value] = match value {
                Value::Null => &[],
                Value::Array(items) => items,
                _ => {
                    return Err(MetadataError::invalid_entity(
                        &self.spec.name,
                        format!("{} expects a list of ids", junction.attribute),
                    ));
                }
            };

            let delete = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(&junction.table),
                quote_ident(&junction.owner_column)
            );
            bind_id(sqlx::query(&delete), id)
                .execute(&mut *conn)
                .await?;

            let insert = format!(
                "INSERT INTO {} (\"order\", {}, {}) VALUES (?, ?, ?)",
                quote_ident(&junction.table),
                quote_ident(&junction.owner_column),
                quote_ident(&junction.attribute)
            );
            for (order, item) in refs.iter().enumerate() {
                let query = sqlx::query(&insert).bind(i64::try_from(order).unwrap_or(i64::MAX));
                let query = bind_id(query, id);
                bind_json(
                    query,
                    &self.spec.name,
                    &junction.attribute,
                    junction.ref_kind,
                    item,
                )?
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    async fn find_row(
        &self,
        conn: &mut SqliteConnection,
        id: &EntityId,
    ) -> MetadataResult<Option<SqliteRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(&self.spec.name),
            quote_ident(&self.spec.id_column)
        );
        Ok(bind_id(sqlx::query(&sql), id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    async fn read_junction(
        &self,
        conn: &mut SqliteConnection,
        junction: &JunctionSpec,
        id: &EntityId,
    ) -> MetadataResult<Value> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY \"order\"",
            quote_ident(&junction.attribute),
            quote_ident(&junction.table),
            quote_ident(&junction.owner_column)
        );
        let rows = bind_id(sqlx::query(&sql), id)
            .fetch_all(&mut *conn)
            .await?;
        let items = rows
            .iter()
            .map(|row| read_value(row, &junction.attribute, junction.ref_kind))
            .collect::<MetadataResult<Vec<_>>>()?;
        Ok(Value::Array(items))
    }

    async fn to_entity(&self, conn: &mut SqliteConnection, row: &SqliteRow) -> MetadataResult<Entity> {
        let mut entity = Entity::new(self.spec.name.clone(), self.spec.id_column.clone());
        for column in &self.spec.columns {
            entity.set(column.name.clone(), read_value(row, &column.name, column.kind)?);
        }
        if !self.spec.junctions.is_empty() {
            let id = entity
                .id_value()
                .ok_or_else(|| MetadataError::invalid_entity(&self.spec.name, "row without id"))?;
            for junction in &self.spec.junctions {
                let refs = self.read_junction(conn, junction, &id).await?;
                entity.set(junction.attribute.clone(), refs);
            }
        }
        Ok(entity)
    }
}

#[async_trait]
impl EntityRepository for SqliteRepository {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn add(&self, entity: &Entity) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        self.insert(&mut tx, entity).await?;
        tx.commit().await?;
        debug!(table = %self.spec.name, id = ?entity.id_value(), "Added entity");
        Ok(())
    }

    async fn update(&self, entity: &Entity) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        self.write(&mut tx, entity).await?;
        tx.commit().await?;
        debug!(table = %self.spec.name, id = ?entity.id_value(), "Updated entity");

        self.listeners.update_entity(&self.spec.name, entity)?;
        Ok(())
    }

    async fn update_all(&self, entities: Vec<Entity>) -> MetadataResult<usize> {
        let mut tx = self.pool.begin().await?;
        for entity in &entities {
            self.write(&mut tx, entity).await?;
        }
        tx.commit().await?;

        let mut notified = 0;
        for entity in self.listeners.update_entities(&self.spec.name, entities)? {
            entity?;
            notified += 1;
        }
        debug!(table = %self.spec.name, count = notified, "Updated entities");
        Ok(notified)
    }

    async fn find_one(&self, id: &EntityId) -> MetadataResult<Option<Entity>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = self.find_row(&mut conn, id).await? else {
            return Ok(None);
        };
        Ok(Some(self.to_entity(&mut conn, &row).await?))
    }

    async fn find_all(&self) -> MetadataResult<Vec<Entity>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(&self.spec.name));
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(self.to_entity(&mut conn, row).await?);
        }
        Ok(entities)
    }

    async fn count(&self) -> MetadataResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.spec.name));
        Ok(sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn delete(&self, id: &EntityId) -> MetadataResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&self.spec.name),
            quote_ident(&self.spec.id_column)
        );
        let result = bind_id(sqlx::query(&sql), id)
            .execute(&self.pool)
            .await?;
        debug!(table = %self.spec.name, %id, "Deleted entity");
        Ok(result.rows_affected() > 0)
    }
}
