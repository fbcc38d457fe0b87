use crate::error::SyncError;
use crate::models::{EntityId, Record};
use serde::{Deserialize, Serialize};

/// A catalog entry: one wine as listed, independent of physical bottles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wine {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub vintage: Option<i32>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub grape_variety: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_path: Option<String>,
}

impl Wine {
    /// Creates a new wine with a locally minted temporary id.
    pub fn new(name: String) -> Self {
        Self {
            id: EntityId::mint_temporary(),
            name,
            producer: None,
            vintage: None,
            region: None,
            grape_variety: None,
            notes: None,
            photo_path: None,
        }
    }

    /// Validates all fields of the wine
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("Name must not be empty".to_string()));
        }

        if self.name.len() > 200 {
            return Err(SyncError::Validation(
                "Name must not exceed 200 characters".to_string(),
            ));
        }

        if let Some(vintage) = self.vintage {
            if !(1800..=2100).contains(&vintage) {
                return Err(SyncError::Validation(
                    "Vintage must be a plausible year".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn to_record(&self) -> Result<Record, SyncError> {
        crate::models::to_record_impl(self)
    }

    pub fn from_record(record: &Record) -> Result<Self, SyncError> {
        crate::models::from_record_impl(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wine() {
        let wine = Wine::new("Riesling Kabinett".to_string());
        assert_eq!(wine.name, "Riesling Kabinett");
        assert!(wine.id.is_temporary());
        assert!(wine.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_name() {
        let mut wine = Wine::new("x".to_string());
        wine.name = "   ".to_string();
        assert!(wine.validate().is_err());
    }

    #[test]
    fn test_validate_vintage_range() {
        let mut wine = Wine::new("Barolo".to_string());
        wine.vintage = Some(2016);
        assert!(wine.validate().is_ok());
        wine.vintage = Some(123);
        assert!(wine.validate().is_err());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut wine = Wine::new("Chablis".to_string());
        wine.producer = Some("Domaine Test".to_string());
        wine.vintage = Some(2020);

        let record = wine.to_record().unwrap();
        assert_eq!(record.id, wine.id);
        assert_eq!(record.field_str("name"), Some("Chablis"));
        assert!(!record.fields.contains_key("id"));

        let back = Wine::from_record(&record).unwrap();
        assert_eq!(back, wine);
    }
}
