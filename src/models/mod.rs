pub mod bottle;
pub mod entity_id;
pub mod outbox;
pub mod record;
pub mod storage_location;
pub mod sync_settings;
pub mod tasting_note;
pub mod wine;

pub use bottle::Bottle;
pub use entity_id::{EntityId, EntityKind, TEMP_ID_PREFIX};
pub use outbox::{MutationEntry, MutationKind, MutationStatus, PhotoEntry, PhotoStatus};
pub use record::Record;
pub use storage_location::StorageLocation;
pub use sync_settings::SyncSettings;
pub use tasting_note::TastingNote;
pub use wine::Wine;

use crate::error::SyncError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Converts a typed model into the generic [`Record`] form. The `id` field
/// moves out of the field map into the record key.
pub(crate) fn to_record_impl<T: Serialize>(model: &T) -> Result<Record, SyncError> {
    let value = serde_json::to_value(model)?;
    let Value::Object(mut map) = value else {
        return Err(SyncError::Serialization(
            "model did not serialize to an object".to_string(),
        ));
    };
    let id_value = map.remove("id").ok_or_else(|| {
        SyncError::Serialization("model is missing an id field".to_string())
    })?;
    let id_str = id_value
        .as_str()
        .ok_or_else(|| SyncError::Serialization("model id is not a string".to_string()))?;
    Ok(Record::new(EntityId::parse(id_str), map))
}

/// Builds a typed model back out of a [`Record`].
pub(crate) fn from_record_impl<T: DeserializeOwned>(record: &Record) -> Result<T, SyncError> {
    let mut map = record.fields.clone();
    map.insert(
        "id".to_string(),
        Value::String(record.id.as_str().to_string()),
    );
    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Validates an insert payload against the typed model for its kind.
///
/// Runs before a row is accepted optimistically into the local store, so an
/// offline insert cannot park in the outbox with data the server would
/// reject on every replay.
pub fn validate_insert(kind: EntityKind, record: &Record) -> Result<(), SyncError> {
    let result = match kind {
        EntityKind::Wine => Wine::from_record(record).and_then(|m| m.validate()),
        EntityKind::Bottle => Bottle::from_record(record).and_then(|m| m.validate()),
        EntityKind::TastingNote => TastingNote::from_record(record).and_then(|m| m.validate()),
        EntityKind::StorageLocation => {
            StorageLocation::from_record(record).and_then(|m| m.validate())
        }
    };
    // A payload that cannot even be deserialized is a caller mistake, not a
    // storage problem.
    result.map_err(|e| match e {
        SyncError::Serialization(msg) => SyncError::Validation(msg),
        other => other,
    })
}
