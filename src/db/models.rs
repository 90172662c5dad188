use ahash::AHashMap;
use metarepo_model::{Attribute, AttributeType, EntityType, ModelError, Package};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use crate::error::MetadataResult;

/// Row of `sys_md_Package` with the parent resolved to its name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbPackage {
    pub id: String,
    pub name: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub parent: Option<String>,
}

impl From<DbPackage> for Package {
    fn from(row: DbPackage) -> Self {
        Self {
            id: row.id,
            name: row.name,
            label: row.label,
            description: row.description,
            parent: row.parent,
        }
    }
}

/// Row of `sys_md_EntityType` with `extends` and `package` resolved to names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbEntityType {
    pub id: String,
    pub name: String,
    pub label: String,
    pub label_i18n: Option<String>,
    pub description: Option<String>,
    pub description_i18n: Option<String>,
    pub is_abstract: bool,
    pub backend: String,
    pub extends: Option<String>,
    pub package: Option<String>,
    pub tags: Option<String>,
}

/// Row of `sys_md_Attribute` with `entity` and `refEntity` resolved to names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbAttribute {
    pub id: String,
    pub entity: String,
    pub name: String,
    pub sequence_nr: i64,
    pub data_type: String,
    pub ref_entity: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub nillable: bool,
    pub id_attribute: bool,
    pub lookup_attribute_index: Option<i64>,
    pub default_value: Option<String>,
    pub aggregateable: bool,
    pub range_min: Option<i64>,
    pub range_max: Option<i64>,
    pub enum_options: Option<String>,
    pub label_attribute: bool,
    pub read_only: bool,
    pub unique: bool,
}

fn from_json_text<T>(text: Option<&str>) -> MetadataResult<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    match text.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}

/// Serializes an i18n map, tag list or option list; empty collections are stored as NULL.
pub(crate) fn to_json_text<T>(value: &T, is_empty: bool) -> MetadataResult<Option<String>>
where
    T: Serialize,
{
    if is_empty {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(value)?))
}

impl DbAttribute {
    fn into_attribute(self) -> MetadataResult<Attribute> {
        let data_type: AttributeType =
            self.data_type
                .parse()
                .map_err(|reason| ModelError::InvalidEntityType {
                    entity_type: self.entity.clone(),
                    reason,
                })?;
        Ok(Attribute {
            enum_options: from_json_text(self.enum_options.as_deref())?,
            id: self.id,
            name: self.name,
            label: self.label,
            description: self.description,
            data_type,
            ref_entity: self.ref_entity,
            sequence_nr: self.sequence_nr,
            nillable: self.nillable,
            aggregateable: self.aggregateable,
            read_only: self.read_only,
            unique: self.unique,
            range_min: self.range_min,
            range_max: self.range_max,
            default_value: self.default_value,
        })
    }
}

/// Joins entity type rows with their attribute rows.
///
/// Attribute rows must arrive ordered by sequence number; the id, label and
/// lookup roles are rebuilt from the per-attribute flags.
pub fn assemble_entity_types(
    rows: Vec<DbEntityType>,
    attributes: Vec<DbAttribute>,
) -> MetadataResult<Vec<EntityType>> {
    let mut by_entity: AHashMap<String, Vec<DbAttribute>> = AHashMap::new();
    for attr in attributes {
        by_entity.entry(attr.entity.clone()).or_default().push(attr);
    }

    rows.into_iter()
        .map(|row| {
            let mut entity_type = EntityType {
                id: row.id,
                label: row.label,
                label_i18n: from_json_text::<BTreeMap<String, String>>(row.label_i18n.as_deref())?,
                description: row.description,
                description_i18n: from_json_text(row.description_i18n.as_deref())?,
                is_abstract: row.is_abstract,
                backend: row.backend,
                extends: row.extends,
                package: row.package,
                attributes: Vec::new(),
                id_attribute: None,
                label_attribute: None,
                lookup_attributes: Vec::new(),
                tags: from_json_text(row.tags.as_deref())?,
                name: row.name,
            };

            let mut lookups = Vec::new();
            for attr in by_entity.remove(&entity_type.name).unwrap_or_default() {
                if attr.id_attribute {
                    entity_type.id_attribute = Some(attr.name.clone());
                }
                if attr.label_attribute {
                    entity_type.label_attribute = Some(attr.name.clone());
                }
                if let Some(index) = attr.lookup_attribute_index {
                    lookups.push((index, attr.name.clone()));
                }
                entity_type.attributes.push(attr.into_attribute()?);
            }
            lookups.sort_by_key(|(index, _)| *index);
            entity_type.lookup_attributes = lookups.into_iter().map(|(_, name)| name).collect();
            Ok(entity_type)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_row(name: &str) -> DbEntityType {
        DbEntityType {
            id: format!("{name}-id"),
            name: name.to_string(),
            label: name.to_string(),
            label_i18n: Some(r#"{"nl":"Persoon"}"#.to_string()),
            description: None,
            description_i18n: None,
            is_abstract: false,
            backend: "sqlite".to_string(),
            extends: None,
            package: Some("app".to_string()),
            tags: None,
        }
    }

    fn attribute_row(name: &str, data_type: &str, sequence_nr: i64) -> DbAttribute {
        DbAttribute {
            id: format!("{name}-id"),
            entity: "app_Person".to_string(),
            name: name.to_string(),
            sequence_nr,
            data_type: data_type.to_string(),
            ref_entity: None,
            label: None,
            description: None,
            nillable: true,
            id_attribute: false,
            lookup_attribute_index: None,
            default_value: None,
            aggregateable: false,
            range_min: None,
            range_max: None,
            enum_options: None,
            label_attribute: false,
            read_only: false,
            unique: false,
        }
    }

    #[test]
    fn assembles_roles_from_attribute_flags() {
        let mut id = attribute_row("id", "string", 0);
        id.id_attribute = true;
        id.lookup_attribute_index = Some(1);
        let mut name = attribute_row("name", "string", 1);
        name.label_attribute = true;
        name.lookup_attribute_index = Some(0);
        let mut status = attribute_row("status", "enum", 2);
        status.enum_options = Some(r#"["alive","dead"]"#.to_string());

        let types = assemble_entity_types(vec![entity_row("app_Person")], vec![id, name, status])
            .unwrap();
        let person = &types[0];

        assert_eq!(person.id_attribute.as_deref(), Some("id"));
        assert_eq!(person.label_attribute.as_deref(), Some("name"));
        assert_eq!(person.lookup_attributes, vec!["name", "id"]);
        assert_eq!(person.label_i18n.get("nl").map(String::as_str), Some("Persoon"));
        assert_eq!(
            person.get_attribute("status").unwrap().enum_options,
            vec!["alive", "dead"]
        );
    }

    #[test]
    fn unknown_data_type_is_rejected() {
        let err = assemble_entity_types(
            vec![entity_row("app_Person")],
            vec![attribute_row("id", "uuid", 0)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::MetadataError::Model(ModelError::InvalidEntityType { .. })
        ));
    }
}
