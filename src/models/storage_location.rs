use crate::error::SyncError;
use crate::models::{EntityId, Record};
use serde::{Deserialize, Serialize};

/// A place bottles are stored in (rack, shelf, crate, cellar section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageLocation {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capacity: Option<i64>,
}

impl StorageLocation {
    pub fn new(name: String) -> Self {
        Self {
            id: EntityId::mint_temporary(),
            name,
            description: None,
            capacity: None,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("Name must not be empty".to_string()));
        }

        if let Some(capacity) = self.capacity {
            if capacity < 0 {
                return Err(SyncError::Validation(
                    "Capacity must not be negative".to_string(),
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
