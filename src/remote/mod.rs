pub mod http;

#[cfg(test)]
pub mod mock;

pub use http::HttpRemote;

use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// The only component that performs network I/O.
///
/// Structured operations distinguish the `Unreachable` failure class
/// (transport never reached the server — triggers outbox fallback and
/// bounded retries) from `Rejected` (the server declined — propagated to
/// the caller, never queued) and `Conflict` (target no longer exists —
/// resolved locally). Server-generated primary keys and timestamps come
/// back in the returned [`Record`].
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a record; the server assigns id and timestamps. The
    /// operation id is an idempotency key the server may use to de-dupe a
    /// replayed create.
    async fn create(
        &self,
        entity_type: EntityKind,
        fields: &Map<String, Value>,
        operation_id: &str,
    ) -> Result<Record, SyncError>;

    async fn update(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
        fields: &Map<String, Value>,
    ) -> Result<Record, SyncError>;

    async fn delete(&self, entity_type: EntityKind, id: &EntityId) -> Result<(), SyncError>;

    /// Reads one record back, for opportunistic refresh of the local store.
    async fn fetch(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
    ) -> Result<Option<Record>, SyncError>;

    async fn list(&self, entity_type: EntityKind) -> Result<Vec<Record>, SyncError>;

    /// Uploads a binary under the given storage path and returns the stable
    /// path reference.
    async fn upload_binary(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, SyncError>;

    /// Resolves a storage path to a publicly served URL.
    async fn resolve_public_reference(&self, bucket: &str, path: &str)
        -> Result<String, SyncError>;

    /// Cheap reachability probe for the connectivity fallback timer.
    async fn ping(&self) -> Result<(), SyncError>;
}

/// Builds a [`Record`] from a JSON row as the backend returns it: `id`,
/// `created_at` and `updated_at` move out of the field map.
pub(crate) fn record_from_row(value: Value) -> Result<Record, SyncError> {
    let Value::Object(mut map) = value else {
        return Err(SyncError::Rejected(
            "server returned a non-object row".to_string(),
        ));
    };

    let id_value = map
        .remove("id")
        .ok_or_else(|| SyncError::Rejected("server row is missing an id".to_string()))?;
    let id_str = id_value
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| id_value.to_string());

    let created_at = map
        .remove("created_at")
        .and_then(|v| v.as_str().map(|s| s.to_string()));
    let updated_at = map
        .remove("updated_at")
        .and_then(|v| v.as_str().map(|s| s.to_string()));

    Ok(Record {
        id: EntityId::parse(&id_str),
        created_at,
        updated_at,
        fields: map,
    })
}
