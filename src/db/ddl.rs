//! SQL DDL derived from entity type declarations (SQLite dialect).
//!
//! Every backing table, the metadata tables included, is described by a
//! [`TableSpec`] built from an [`EntityType`] resolved through a [`Catalog`].

use metarepo_model::{Attribute, AttributeType, Catalog, EntityType};

use crate::error::{MetadataError, MetadataResult};

/// How values of a column travel between JSON and SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_type(data_type: AttributeType) -> (&'static str, ValueKind) {
    use AttributeType as T;
    match data_type {
        T::Bool => ("BOOLEAN", ValueKind::Bool),
        T::Int => ("INTEGER", ValueKind::Int),
        T::Long => ("BIGINT", ValueKind::Int),
        T::Decimal => ("DOUBLE", ValueKind::Float),
        T::String | T::Email | T::Hyperlink | T::Enum => ("VARCHAR(255)", ValueKind::Text),
        T::Text | T::Html | T::Script => ("TEXT", ValueKind::Text),
        T::Date => ("DATE", ValueKind::Text),
        T::DateTime => ("DATETIME", ValueKind::Text),
        // Reference columns take the type of the referenced id; compound has
        // no column at all.
        T::Xref | T::Categorical | T::File | T::Mref | T::CategoricalMref | T::Compound => {
            ("VARCHAR(255)", ValueKind::Text)
        }
    }
}

fn default_literal(kind: ValueKind, value: &str) -> String {
    match kind {
        ValueKind::Bool => match value.trim() {
            "true" | "1" => "1".to_string(),
            "false" | "0" => "0".to_string(),
            other => quote_literal(other),
        },
        ValueKind::Int if value.trim().parse::<i64>().is_ok() => value.trim().to_string(),
        ValueKind::Float if value.trim().parse::<f64>().is_ok() => value.trim().to_string(),
        _ => quote_literal(value),
    }
}

/// A single physical column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: &'static str,
    pub kind: ValueKind,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    /// Rendered SQL literal.
    pub default: Option<String>,
    /// Referenced `(table, id column)`.
    pub references: Option<(String, String)>,
}

impl ColumnSpec {
    /// Column definition as used inside `CREATE TABLE`.
    pub fn definition(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some((table, column)) = &self.references {
            sql.push_str(&format!(
                " REFERENCES {}({})",
                quote_ident(table),
                quote_ident(column)
            ));
        }
        sql
    }

    /// `ALTER TABLE ... ADD COLUMN` for this column.
    ///
    /// SQLite cannot add UNIQUE or PRIMARY KEY columns, refuses NOT NULL
    /// without a default and refuses a foreign key with a non-null default.
    pub fn add_column_sql(&self, table: &str) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(&self.name),
            self.sql_type
        );
        match (&self.default, &self.references) {
            (Some(default), _) => {
                if self.not_null {
                    sql.push_str(" NOT NULL");
                }
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
            (None, Some((ref_table, ref_column))) => {
                sql.push_str(&format!(
                    " REFERENCES {}({})",
                    quote_ident(ref_table),
                    quote_ident(ref_column)
                ));
            }
            (None, None) => {}
        }
        sql
    }
}

/// Junction table holding the ordered values of a multi-reference attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionSpec {
    pub table: String,
    pub attribute: String,
    pub owner_table: String,
    pub owner_column: String,
    pub owner_type: &'static str,
    pub owner_kind: ValueKind,
    pub ref_table: String,
    pub ref_column: String,
    pub ref_type: &'static str,
    pub ref_kind: ValueKind,
}

impl JunctionSpec {
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \"order\" INTEGER NOT NULL,\n    {owner} {owner_type} NOT NULL REFERENCES {owner_table}({owner_id}) ON DELETE CASCADE,\n    {attr} {ref_type} NOT NULL REFERENCES {ref_table}({ref_id}),\n    PRIMARY KEY ({owner}, \"order\")\n)",
            table = quote_ident(&self.table),
            owner = quote_ident(&self.owner_column),
            owner_type = self.owner_type,
            owner_table = quote_ident(&self.owner_table),
            owner_id = quote_ident(&self.owner_column),
            attr = quote_ident(&self.attribute),
            ref_type = self.ref_type,
            ref_table = quote_ident(&self.ref_table),
            ref_id = quote_ident(&self.ref_column),
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.table))
    }
}

/// Physical layout of the backing table of one concrete entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub id_column: String,
    pub columns: Vec<ColumnSpec>,
    pub junctions: Vec<JunctionSpec>,
}

impl TableSpec {
    /// Derives the table of `entity_type`, inherited attributes included.
    pub fn derive(catalog: &Catalog, entity_type: &EntityType) -> MetadataResult<Self> {
        if entity_type.is_abstract {
            return Err(MetadataError::AbstractEntityType(entity_type.name.clone()));
        }
        let id_attribute = catalog
            .id_attribute(entity_type)?
            .ok_or_else(|| MetadataError::MissingIdAttribute(entity_type.name.clone()))?;
        let (id_type, id_kind) = sql_type(id_attribute.data_type);

        let mut spec = Self {
            name: entity_type.name.clone(),
            id_column: id_attribute.name.clone(),
            columns: Vec::new(),
            junctions: Vec::new(),
        };

        for attr in catalog.all_attributes(entity_type)? {
            if attr.data_type == AttributeType::Compound {
                continue;
            }
            if !attr.data_type.is_reference() {
                let (sql_type, kind) = sql_type(attr.data_type);
                spec.columns.push(ColumnSpec {
                    name: attr.name.clone(),
                    sql_type,
                    kind,
                    not_null: !attr.nillable || attr.name == id_attribute.name,
                    unique: attr.unique,
                    primary_key: attr.name == id_attribute.name,
                    default: attr
                        .default_value
                        .as_deref()
                        .map(|value| default_literal(kind, value)),
                    references: None,
                });
                continue;
            }

            let (ref_table, ref_column, ref_type, ref_kind) =
                Self::reference_target(catalog, entity_type, attr)?;
            if attr.data_type.is_multiple_reference() {
                spec.junctions.push(JunctionSpec {
                    table: format!("{}_{}", entity_type.name, attr.name),
                    attribute: attr.name.clone(),
                    owner_table: entity_type.name.clone(),
                    owner_column: id_attribute.name.clone(),
                    owner_type: id_type,
                    owner_kind: id_kind,
                    ref_table,
                    ref_column,
                    ref_type,
                    ref_kind,
                });
            } else {
                spec.columns.push(ColumnSpec {
                    name: attr.name.clone(),
                    sql_type: ref_type,
                    kind: ref_kind,
                    not_null: !attr.nillable,
                    unique: attr.unique,
                    primary_key: attr.name == id_attribute.name,
                    default: None,
                    references: Some((ref_table, ref_column)),
                });
            }
        }
        Ok(spec)
    }

    fn reference_target(
        catalog: &Catalog,
        entity_type: &EntityType,
        attr: &Attribute,
    ) -> MetadataResult<(String, String, &'static str, ValueKind)> {
        let ref_name = attr.ref_entity.as_deref().unwrap_or_default();
        let unknown = || MetadataError::UnknownRefEntity {
            entity: entity_type.name.clone(),
            attribute: attr.name.clone(),
            ref_entity: ref_name.to_string(),
        };
        let ref_type = if ref_name == entity_type.name {
            entity_type
        } else {
            catalog.entity_type(ref_name).ok_or_else(unknown)?
        };
        let ref_id = catalog
            .id_attribute(ref_type)?
            .ok_or_else(|| MetadataError::MissingIdAttribute(ref_type.name.clone()))?;
        let (sql_type, kind) = sql_type(ref_id.data_type);
        Ok((ref_type.name.clone(), ref_id.name.clone(), sql_type, kind))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn id(&self) -> Option<&ColumnSpec> {
        self.column(&self.id_column)
    }

    pub fn junction(&self, attribute: &str) -> Option<&JunctionSpec> {
        self.junctions.iter().find(|j| j.attribute == attribute)
    }

    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.definition()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(&self.name),
            columns
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }
}
