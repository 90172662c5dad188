use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity value of an entity row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    /// Integers and strings identify rows; anything else does not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A dynamic row of a concrete entity type, values keyed by attribute name.
///
/// Multiple references are held as JSON arrays of referenced ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_type: String,
    pub id_attribute: String,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id_attribute: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id_attribute: id_attribute.into(),
            values: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(attribute.into(), value.into());
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }

    pub fn get_i64(&self, attribute: &str) -> Option<i64> {
        self.get(attribute).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, attribute: &str) -> Option<bool> {
        self.get(attribute).and_then(Value::as_bool)
    }

    pub fn id_value(&self) -> Option<EntityId> {
        self.get(&self.id_attribute).and_then(EntityId::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_value_reads_the_id_attribute() {
        let person = Entity::new("Person", "id").with("id", 42).with("name", "Ada");
        assert_eq!(person.id_value(), Some(EntityId::Int(42)));
        assert_eq!(person.get_str("name"), Some("Ada"));

        let tag = Entity::new("Tag", "key").with("key", "red");
        assert_eq!(tag.id_value(), Some(EntityId::from("red")));
    }

    #[test]
    fn missing_or_structured_id_yields_none() {
        assert_eq!(Entity::new("Person", "id").id_value(), None);
        let odd = Entity::new("Person", "id").with("id", json!({"a": 1}));
        assert_eq!(odd.id_value(), None);
    }

    #[test]
    fn entity_id_converts_back_to_json() {
        assert_eq!(EntityId::Int(7).to_value(), json!(7));
        assert_eq!(EntityId::from("x").to_value(), json!("x"));
        assert_eq!(EntityId::Int(7).to_string(), "7");
    }
}
