use crate::models::{EntityId, EntityKind};
use serde_json::{Map, Value};

/// Write operation kinds recorded in the mutation outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(MutationKind::Insert),
            "update" => Some(MutationKind::Update),
            "delete" => Some(MutationKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    InFlight,
    Synced,
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InFlight => "in_flight",
            MutationStatus::Synced => "synced",
            MutationStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MutationStatus::Pending),
            "in_flight" => Some(MutationStatus::InFlight),
            "synced" => Some(MutationStatus::Synced),
            "failed" => Some(MutationStatus::Failed),
            _ => None,
        }
    }
}

/// One pending write operation, as stored in the `mutation_outbox` table.
///
/// The sequence is store-assigned and strictly monotonic; replaying in
/// sequence order is what keeps an update from ever running before its own
/// insert. The operation id is a client-generated idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEntry {
    pub sequence: i64,
    pub operation_id: String,
    pub kind: MutationKind,
    pub entity_type: EntityKind,
    pub entity_id: EntityId,
    pub payload: Map<String, Value>,
    pub timestamp: String,
    pub status: MutationStatus,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Uploading => "uploading",
            PhotoStatus::Uploaded => "uploaded",
            PhotoStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhotoStatus::Pending),
            "uploading" => Some(PhotoStatus::Uploading),
            "uploaded" => Some(PhotoStatus::Uploaded),
            "failed" => Some(PhotoStatus::Failed),
            _ => None,
        }
    }
}

/// One pending binary attachment, as stored in the `photo_outbox` table.
///
/// Binaries live in their own queue: they are large, retry on different
/// timescales, and must never block structured field mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoEntry {
    pub sequence: i64,
    pub operation_id: String,
    pub owner_entity_type: EntityKind,
    pub owner_entity_id: EntityId,
    pub binary_payload: Vec<u8>,
    pub mime_type: String,
    pub destination_bucket: String,
    pub timestamp: String,
    pub status: PhotoStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub resolved_remote_path: Option<String>,
}
