use crate::error::SyncError;
use crate::models::{EntityId, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A physical bottle in the cellar, referencing its catalog wine and
/// optionally the storage location it sits in.
///
/// Both references may still be temporary ids when the bottle was created
/// offline; the drain rewrites them once the referenced inserts sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bottle {
    pub id: EntityId,
    pub wine_id: EntityId,
    #[serde(default)]
    pub location_id: Option<EntityId>,
    #[serde(default)]
    pub size_ml: Option<i64>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default)]
    pub photo_path: Option<String>,
}

impl Bottle {
    /// Creates a new bottle of the given wine with a temporary id.
    pub fn new(wine_id: EntityId) -> Self {
        Self {
            id: EntityId::mint_temporary(),
            wine_id,
            location_id: None,
            size_ml: Some(750),
            purchase_date: None,
            purchase_price: None,
            consumed: false,
            photo_path: None,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if let Some(size) = self.size_ml {
            if size <= 0 {
                return Err(SyncError::Validation(
                    "Bottle size must be positive".to_string(),
                ));
            }
        }

        if let Some(price) = self.purchase_price {
            if price < 0.0 {
                return Err(SyncError::Validation(
                    "Purchase price must not be negative".to_string(),
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
