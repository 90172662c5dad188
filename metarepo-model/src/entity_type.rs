use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::{Attribute, ModelError, generate_id};

pub const DEFAULT_BACKEND: &str = "sqlite";

/// A table-like schema definition.
///
/// `name` is fully qualified (package prefix included) and unique; it also
/// names the backing table. References to other entity types (`extends`,
/// `Attribute::ref_entity`) and to packages are by name, so a declaration
/// stays valid when persisted identifiers are injected into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    #[serde(default = "generate_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_i18n: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub description_i18n: BTreeMap<String, String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lookup_attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: generate_id(),
            label: name.clone(),
            name,
            label_i18n: BTreeMap::new(),
            description: None,
            description_i18n: BTreeMap::new(),
            is_abstract: false,
            backend: default_backend(),
            extends: None,
            package: None,
            attributes: Vec::new(),
            id_attribute: None,
            label_attribute: None,
            lookup_attributes: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn label_i18n(mut self, language: impl Into<String>, label: impl Into<String>) -> Self {
        self.label_i18n.insert(language.into(), label.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn description_i18n(
        mut self,
        language: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.description_i18n
            .insert(language.into(), description.into());
        self
    }

    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Appends an attribute; its sequence number becomes its position.
    #[must_use]
    pub fn attribute(mut self, mut attribute: Attribute) -> Self {
        attribute.sequence_nr = i64::try_from(self.attributes.len()).unwrap_or(i64::MAX);
        self.attributes.push(attribute);
        self
    }

    /// Appends the id attribute: non-nillable, unique, read-only.
    #[must_use]
    pub fn id_attribute(self, attribute: Attribute) -> Self {
        let name = attribute.name.clone();
        let mut this = self.attribute(attribute.nillable(false).unique(true).read_only(true));
        this.id_attribute = Some(name);
        this
    }

    #[must_use]
    pub fn label_attribute(mut self, name: impl Into<String>) -> Self {
        self.label_attribute = Some(name.into());
        self
    }

    #[must_use]
    pub fn lookup_attribute(mut self, name: impl Into<String>) -> Self {
        self.lookup_attributes.push(name.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name == name)
    }

    /// Names of the entity types this one depends on: its parent and every
    /// referenced entity type, self references excluded.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.extends
            .as_deref()
            .into_iter()
            .chain(
                self.attributes
                    .iter()
                    .filter_map(|a| a.ref_entity.as_deref()),
            )
            .filter(move |dep| *dep != self.name)
    }

    /// Checks the rules that can be verified without the rest of the
    /// model. Inherited id and label attributes are checked by the catalog.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::invalid(&self.name, "empty name"));
        }
        if self.extends.as_deref() == Some(self.name.as_str()) {
            return Err(ModelError::ExtendsCycle(self.name.clone()));
        }

        let mut seen = HashSet::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            attr.validate(&self.name)?;
            if !seen.insert(attr.name.as_str()) {
                return Err(ModelError::invalid(
                    &self.name,
                    format!("duplicate attribute {}", attr.name),
                ));
            }
        }

        for lookup in &self.lookup_attributes {
            if !seen.contains(lookup.as_str()) {
                return Err(ModelError::invalid(
                    &self.name,
                    format!("lookup attribute {lookup} is not one of its attributes"),
                ));
            }
        }

        // Without a parent there is nowhere else these could come from.
        if self.extends.is_none() {
            for (role, name) in [
                ("id", self.id_attribute.as_deref()),
                ("label", self.label_attribute.as_deref()),
            ] {
                if let Some(name) = name {
                    if !seen.contains(name) {
                        return Err(ModelError::invalid(
                            &self.name,
                            format!("{role} attribute {name} is not one of its attributes"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
