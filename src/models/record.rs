use crate::models::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Generic representation of one entity row, as it flows between the local
/// store, outbox payloads and the remote client.
///
/// The typed domain models convert to and from this. Timestamps are
/// server-maintained; locally created rows carry none until their insert
/// has synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: EntityId, fields: Map<String, Value>) -> Self {
        Self {
            id,
            created_at: None,
            updated_at: None,
            fields,
        }
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn field_i64(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(|v| v.as_i64())
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(|v| v.as_f64())
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(|v| v.as_bool())
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_accessors() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Spätburgunder"));
        fields.insert("vintage".to_string(), json!(2019));
        fields.insert("consumed".to_string(), json!(false));
        let record = Record::new(EntityId::parse("srv-1"), fields);

        assert_eq!(record.field_str("name"), Some("Spätburgunder"));
        assert_eq!(record.field_i64("vintage"), Some(2019));
        assert_eq!(record.field_bool("consumed"), Some(false));
        assert_eq!(record.field_str("missing"), None);
    }

    #[test]
    fn test_set_field_overwrites() {
        let mut record = Record::new(EntityId::parse("srv-1"), Map::new());
        record.set_field("rating", json!(3));
        record.set_field("rating", json!(5));
        assert_eq!(record.field_i64("rating"), Some(5));
    }
}
