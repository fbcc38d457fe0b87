use crate::error::SyncError;
use crate::models::{EntityId, EntityKind};
use crate::remote::RemoteApi;
use crate::services::local_store::LocalStore;
use crate::services::mutation_outbox::RETRY_CEILING;
use crate::services::photo_outbox::PhotoOutbox;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoDrainStats {
    pub uploaded: usize,
    pub failed: usize,
}

/// Uploads pending binaries and propagates the resulting permanent
/// reference into the local store and, for owners that already carry a
/// server id, into the remote record.
///
/// Owners still under a temporary id need no remote patch: the photo path
/// is written into the local row, and the owning insert sends the current
/// row when it drains.
pub struct PhotoDrain {
    store: LocalStore,
    outbox: PhotoOutbox,
    remote: Arc<dyn RemoteApi>,
}

impl PhotoDrain {
    pub fn new(store: LocalStore, outbox: PhotoOutbox, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            outbox,
            remote,
        }
    }

    pub async fn run_pass(&self) -> Result<PhotoDrainStats, SyncError> {
        let sequences = self.outbox.list_pending()?;
        let mut stats = PhotoDrainStats::default();
        if sequences.is_empty() {
            return Ok(stats);
        }
        log::info!("Draining {} pending photos", sequences.len());

        for sequence in sequences {
            // Re-read fresh: a mutation drain may have reconciled the owner
            // id since the pass started.
            let entry = match self.outbox.get(sequence) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(SyncError::LocalCorruption(msg)) => {
                    log::error!("Photo entry {} unreadable: {}", sequence, msg);
                    self.outbox.park(sequence, &msg)?;
                    stats.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.outbox.mark_uploading(sequence)?;
            let result = upload_and_backfill(
                &self.store,
                self.remote.as_ref(),
                entry.owner_entity_type,
                &entry.owner_entity_id,
                &entry.binary_payload,
                &entry.mime_type,
                &entry.destination_bucket,
            )
            .await;

            match result {
                Ok(path) => {
                    self.outbox.mark_uploaded(sequence, &path)?;
                    self.outbox.remove(sequence)?;
                    stats.uploaded += 1;
                }
                Err(SyncError::Rejected(msg)) => {
                    log::error!("Photo {} rejected by server: {}", sequence, msg);
                    self.outbox.park(sequence, &msg)?;
                    stats.failed += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    let count = self.outbox.mark_failure(sequence, &message)?;
                    if count >= RETRY_CEILING {
                        log::error!(
                            "Photo {} parked after {} attempts: {}",
                            sequence,
                            count,
                            message
                        );
                    } else {
                        log::warn!(
                            "Photo {} failed (attempt {}/{}): {}",
                            sequence,
                            count,
                            RETRY_CEILING,
                            message
                        );
                    }
                    stats.failed += 1;
                }
            }
        }

        let cleaned = self.outbox.cleanup_uploaded()?;
        if cleaned > 0 {
            log::debug!("Removed {} stale uploaded entries", cleaned);
        }

        Ok(stats)
    }
}

/// Uploads one binary and back-fills the reference. Shared between the
/// drain and the direct-write path in the engine.
pub(crate) async fn upload_and_backfill(
    store: &LocalStore,
    remote: &dyn RemoteApi,
    owner_type: EntityKind,
    owner_id: &EntityId,
    bytes: &[u8],
    mime_type: &str,
    bucket: &str,
) -> Result<String, SyncError> {
    let field = owner_type.photo_field().ok_or_else(|| {
        SyncError::Validation(format!("{} records carry no photo", owner_type.as_str()))
    })?;

    let path = storage_path(owner_type, bytes, mime_type);
    let stored = remote.upload_binary(bucket, &path, bytes, mime_type).await?;
    log::info!("Uploaded photo for {} {} to {}", owner_type.as_str(), owner_id, stored);

    store.set_photo_reference(owner_type, owner_id, &stored)?;

    if owner_id.is_temporary() {
        // The owning insert sends the current local row, photo path included
        log::debug!(
            "Owner {} still temporary; photo path rides along with its insert",
            owner_id
        );
    } else {
        // A single idempotent field patch; no need to go through the outbox
        let mut fields = Map::new();
        fields.insert(field.to_string(), Value::String(stored.clone()));
        match remote.update(owner_type, owner_id, &fields).await {
            Ok(record) => store.put(owner_type, &record)?,
            Err(SyncError::Conflict(msg)) => {
                log::debug!("Photo owner gone remotely: {}", msg);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(stored)
}

/// Content-addressed storage path: replaying a crashed upload lands on the
/// same object instead of minting an orphan.
fn storage_path(owner_type: EntityKind, bytes: &[u8], mime_type: &str) -> String {
    let digest = Sha256::digest(bytes);
    let hash: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
    format!("{}/{}.{}", owner_type.table(), hash, extension_for(mime_type))
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}
