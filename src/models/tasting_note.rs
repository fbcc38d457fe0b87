use crate::error::SyncError;
use crate::models::{EntityId, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One tasting record for a wine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TastingNote {
    pub id: EntityId,
    pub wine_id: EntityId,
    pub tasted_at: NaiveDate,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TastingNote {
    pub fn new(wine_id: EntityId, tasted_at: NaiveDate) -> Self {
        Self {
            id: EntityId::mint_temporary(),
            wine_id,
            tasted_at,
            rating: None,
            notes: None,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if let Some(rating) = self.rating {
            if !(0..=100).contains(&rating) {
                return Err(SyncError::Validation(
                    "Rating must be between 0 and 100".to_string(),
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
    fn test_validate_rating() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let mut note = TastingNote::new(EntityId::parse("srv-3"), date);
        note.rating = Some(92);
        assert!(note.validate().is_ok());
        note.rating = Some(101);
        assert!(note.validate().is_err());
    }

    #[test]
    fn test_record_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let mut note = TastingNote::new(EntityId::parse("srv-3"), date);
        note.notes = Some("Dark cherry, firm tannin".to_string());

        let record = note.to_record().unwrap();
        assert_eq!(record.field_str("tasted_at"), Some("2026-02-14"));

        let back = TastingNote::from_record(&record).unwrap();
        assert_eq!(back, note);
    }
}
