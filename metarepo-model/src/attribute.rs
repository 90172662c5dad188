use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::generate_id;

/// Data type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Bool,
    Int,
    Long,
    Decimal,
    String,
    Text,
    Html,
    Script,
    Email,
    Hyperlink,
    Enum,
    Date,
    DateTime,
    Xref,
    Categorical,
    File,
    Mref,
    CategoricalMref,
    Compound,
}

impl AttributeType {
    pub const ALL: [AttributeType; 19] = [
        Self::Bool,
        Self::Int,
        Self::Long,
        Self::Decimal,
        Self::String,
        Self::Text,
        Self::Html,
        Self::Script,
        Self::Email,
        Self::Hyperlink,
        Self::Enum,
        Self::Date,
        Self::DateTime,
        Self::Xref,
        Self::Categorical,
        Self::File,
        Self::Mref,
        Self::CategoricalMref,
        Self::Compound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Text => "text",
            Self::Html => "html",
            Self::Script => "script",
            Self::Email => "email",
            Self::Hyperlink => "hyperlink",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Xref => "xref",
            Self::Categorical => "categorical",
            Self::File => "file",
            Self::Mref => "mref",
            Self::CategoricalMref => "categorical_mref",
            Self::Compound => "compound",
        }
    }

    /// Types whose values point at rows of another entity type.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Xref | Self::Categorical | Self::File | Self::Mref | Self::CategoricalMref
        )
    }

    /// Reference types stored outside the owning table, in a junction table.
    pub fn is_multiple_reference(&self) -> bool {
        matches!(self, Self::Mref | Self::CategoricalMref)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown attribute type '{s}'"))
    }
}

/// An attribute owned by an entity type.
///
/// The identifier must survive redeploys: other rows reference attributes by
/// `id`, never by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[serde(default = "generate_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_type: AttributeType,
    /// Name of the referenced entity type, for reference types only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_entity: Option<String>,
    #[serde(default)]
    pub sequence_nr: i64,
    #[serde(default = "default_true")]
    pub nillable: bool,
    #[serde(default)]
    pub aggregateable: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_max: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: AttributeType) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            label: None,
            description: None,
            data_type,
            ref_entity: None,
            sequence_nr: 0,
            nillable: true,
            aggregateable: false,
            read_only: false,
            unique: false,
            range_min: None,
            range_max: None,
            enum_options: Vec::new(),
            default_value: None,
        }
    }

    /// Shorthand for a single reference to another entity type.
    pub fn xref(name: impl Into<String>, ref_entity: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Xref).ref_entity(ref_entity)
    }

    /// Shorthand for a multiple reference to another entity type.
    pub fn mref(name: impl Into<String>, ref_entity: impl Into<String>) -> Self {
        Self::new(name, AttributeType::Mref).ref_entity(ref_entity)
    }

    /// Shorthand for an enum with fixed options.
    pub fn enumeration<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attr = Self::new(name, AttributeType::Enum);
        attr.enum_options = options.into_iter().map(Into::into).collect();
        attr
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn ref_entity(mut self, ref_entity: impl Into<String>) -> Self {
        self.ref_entity = Some(ref_entity.into());
        self
    }

    #[must_use]
    pub fn nillable(mut self, nillable: bool) -> Self {
        self.nillable = nillable;
        self
    }

    #[must_use]
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn aggregateable(mut self, aggregateable: bool) -> Self {
        self.aggregateable = aggregateable;
        self
    }

    #[must_use]
    pub fn range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.range_min = min;
        self.range_max = max;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Checks the attribute on its own; `owner` is only used in messages.
    pub(crate) fn validate(&self, owner: &str) -> Result<(), crate::ModelError> {
        let fail = |reason: String| Err(crate::ModelError::invalid(owner, reason));

        if self.name.trim().is_empty() {
            return fail("attribute with empty name".to_string());
        }
        match (self.data_type.is_reference(), self.ref_entity.is_some()) {
            (true, false) => {
                return fail(format!("attribute {} requires a refEntity", self.name));
            }
            (false, true) => {
                return fail(format!(
                    "attribute {} of type {} cannot have a refEntity",
                    self.name, self.data_type
                ));
            }
            _ => {}
        }
        if self.data_type == AttributeType::Enum && self.enum_options.is_empty() {
            return fail(format!("enum attribute {} has no options", self.name));
        }
        if let (Some(min), Some(max)) = (self.range_min, self.range_max) {
            if min > max {
                return fail(format!(
                    "attribute {} has rangeMin {min} above rangeMax {max}",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_type_round_trips_through_str() {
        for t in AttributeType::ALL {
            assert_eq!(t.as_str().parse::<AttributeType>(), Ok(t));
        }
        assert!("varchar".parse::<AttributeType>().is_err());
    }

    #[test]
    fn reference_attribute_requires_ref_entity() {
        let attr = Attribute::new("owner", AttributeType::Xref);
        assert!(attr.validate("Pet").is_err());

        let attr = Attribute::xref("owner", "Person");
        assert!(attr.validate("Pet").is_ok());
    }

    #[test]
    fn plain_attribute_rejects_ref_entity() {
        let attr = Attribute::new("age", AttributeType::Int).ref_entity("Person");
        assert!(attr.validate("Pet").is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let attr = Attribute::new("age", AttributeType::Int).range(Some(10), Some(1));
        assert!(attr.validate("Person").is_err());
    }

    #[test]
    fn enum_without_options_is_rejected() {
        let attr = Attribute::new("kind", AttributeType::Enum);
        assert!(attr.validate("Pet").is_err());

        let attr = Attribute::enumeration("kind", ["cat", "dog"]);
        assert!(attr.validate("Pet").is_ok());
    }

    #[test]
    fn deserialized_attribute_gets_fresh_id_and_defaults() {
        let attr: Attribute =
            serde_json::from_str(r#"{"name":"age","dataType":"int"}"#).unwrap();
        assert_eq!(attr.data_type, AttributeType::Int);
        assert!(attr.nillable);
        assert!(!attr.id.is_empty());
    }
}
