use crate::error::SyncError;
use crate::models::{MutationEntry, MutationKind, TEMP_ID_PREFIX};
use crate::remote::RemoteApi;
use crate::services::local_store::LocalStore;
use crate::services::mutation_outbox::{MutationOutbox, RETRY_CEILING};
use crate::services::photo_outbox::PhotoOutbox;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationDrainStats {
    pub replayed: usize,
    pub failed: usize,
}

/// Replays pending mutation outbox entries against the remote backend, in
/// sequence order, with bounded retries.
///
/// On a successful insert the server's authoritative record comes back and
/// the temporary id is reconciled: the local row is rekeyed and every
/// reference in both outboxes is rewritten durably. Later entries in the
/// same pass are re-read fresh, so the substitution reaches them without
/// any in-memory bookkeeping.
pub struct SyncDrain {
    store: LocalStore,
    outbox: MutationOutbox,
    photos: PhotoOutbox,
    remote: Arc<dyn RemoteApi>,
}

impl SyncDrain {
    pub fn new(
        store: LocalStore,
        outbox: MutationOutbox,
        photos: PhotoOutbox,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            store,
            outbox,
            photos,
            remote,
        }
    }

    /// Processes every currently pending entry once. One failed entry never
    /// blocks later, unrelated entries; an entry depending on a failed
    /// insert is marked failed with a blocked-by-dependency reason instead
    /// of being attempted.
    pub async fn run_pass(&self) -> Result<MutationDrainStats, SyncError> {
        let sequences = self.outbox.list_pending()?;
        let mut stats = MutationDrainStats::default();
        if sequences.is_empty() {
            return Ok(stats);
        }
        log::info!("Draining {} pending mutations", sequences.len());

        for sequence in sequences {
            // Re-read fresh: reconciliation of an earlier insert may have
            // rewritten this entry since the pass started.
            let entry = match self.outbox.get(sequence) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(SyncError::LocalCorruption(msg)) => {
                    log::error!("Mutation {} unreadable: {}", sequence, msg);
                    self.outbox.park(sequence, &msg)?;
                    stats.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(blocker) = unresolved_dependency(&entry) {
                let reason = format!("blocked by dependency on {}", blocker);
                log::warn!("Mutation {} {}", sequence, reason);
                self.outbox.mark_failure(sequence, &reason)?;
                stats.failed += 1;
                continue;
            }

            self.outbox.mark_in_flight(sequence)?;
            match self.replay(&entry).await {
                Ok(()) => {
                    self.outbox.mark_synced(sequence)?;
                    self.outbox.remove(sequence)?;
                    stats.replayed += 1;
                }
                Err(SyncError::Conflict(msg)) => {
                    // The target is already gone remotely; nothing to do
                    log::debug!("Mutation {} resolved as conflict: {}", sequence, msg);
                    self.outbox.mark_synced(sequence)?;
                    self.outbox.remove(sequence)?;
                    stats.replayed += 1;
                }
                Err(SyncError::Rejected(msg)) => {
                    log::error!("Mutation {} rejected by server: {}", sequence, msg);
                    self.outbox.park(sequence, &msg)?;
                    stats.failed += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    let count = self.outbox.mark_failure(sequence, &message)?;
                    if count >= RETRY_CEILING {
                        log::error!(
                            "Mutation {} parked after {} attempts: {}",
                            sequence,
                            count,
                            message
                        );
                    } else {
                        log::warn!(
                            "Mutation {} failed (attempt {}/{}): {}",
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

        // Defensive cleanup for entries a crashed run left behind
        let cleaned = self.outbox.cleanup_synced()?;
        if cleaned > 0 {
            log::debug!("Removed {} stale synced entries", cleaned);
        }

        Ok(stats)
    }

    async fn replay(&self, entry: &MutationEntry) -> Result<(), SyncError> {
        match entry.kind {
            MutationKind::Insert => {
                // Send the current local row when one exists: fields written
                // after the append (e.g. a photo path back-filled by the
                // photo drain) ride along with the insert.
                let fields = match self.store.get(entry.entity_type, &entry.entity_id) {
                    Ok(Some(row)) => strip_unreconciled_references(entry, row.fields),
                    Ok(None) => entry.payload.clone(),
                    Err(SyncError::LocalCorruption(msg)) => {
                        log::warn!("{} — replaying captured payload instead", msg);
                        entry.payload.clone()
                    }
                    Err(e) => return Err(e),
                };

                let authoritative = self
                    .remote
                    .create(entry.entity_type, &fields, &entry.operation_id)
                    .await?;

                if entry.entity_id.is_temporary() {
                    self.store
                        .rekey(entry.entity_type, &entry.entity_id, &authoritative)?;
                    self.outbox
                        .reconcile_references(&entry.entity_id, &authoritative.id)?;
                    self.photos
                        .reconcile_owner(&entry.entity_id, &authoritative.id)?;
                    log::info!(
                        "Reconciled {} {} -> {}",
                        entry.entity_type.as_str(),
                        entry.entity_id,
                        authoritative.id
                    );
                } else {
                    self.store.put(entry.entity_type, &authoritative)?;
                }
                Ok(())
            }
            MutationKind::Update => {
                let authoritative = self
                    .remote
                    .update(entry.entity_type, &entry.entity_id, &entry.payload)
                    .await?;
                self.store.put(entry.entity_type, &authoritative)?;
                Ok(())
            }
            MutationKind::Delete => {
                self.remote
                    .delete(entry.entity_type, &entry.entity_id)
                    .await
            }
        }
    }
}

/// Returns the temporary id this entry still depends on, if any.
///
/// By the time an entry is processed, every insert sequenced before it has
/// already run; a temp id remaining in the target or a foreign-key field
/// therefore means the insert that minted it failed (or was purged), and
/// replaying the entry would send the server an id it cannot know.
fn unresolved_dependency(entry: &MutationEntry) -> Option<String> {
    if entry.kind != MutationKind::Insert && entry.entity_id.is_temporary() {
        return Some(entry.entity_id.to_string());
    }
    for (field, _) in entry.entity_type.foreign_keys() {
        if let Some(value) = entry.payload.get(*field).and_then(|v| v.as_str()) {
            if value.starts_with(TEMP_ID_PREFIX) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Drops foreign-key fields that still hold a temporary id from a refreshed
/// insert payload. Such a value was written by a later-sequenced local
/// mutation; the outbox entry that will carry it replays after the
/// referenced insert reconciles, so the insert itself must not send it.
fn strip_unreconciled_references(
    entry: &MutationEntry,
    mut fields: Map<String, Value>,
) -> Map<String, Value> {
    for (field, _) in entry.entity_type.foreign_keys() {
        let is_temp = fields
            .get(*field)
            .and_then(|v| v.as_str())
            .map(|s| s.starts_with(TEMP_ID_PREFIX))
            .unwrap_or(false);
        if is_temp {
            fields.insert((*field).to_string(), Value::Null);
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::{Bottle, EntityId, EntityKind, MutationStatus, Wine};
    use crate::remote::mock::MockRemote;

    struct Fixture {
        db: Database,
        store: LocalStore,
        outbox: MutationOutbox,
        photos: PhotoOutbox,
        remote: Arc<MockRemote>,
        drain: SyncDrain,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let store = LocalStore::new(db.clone());
        let outbox = MutationOutbox::new(db.clone());
        let photos = PhotoOutbox::new(db.clone());
        let remote = Arc::new(MockRemote::new());
        let drain = SyncDrain::new(
            store.clone(),
            outbox.clone(),
            photos.clone(),
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
        );
        Fixture {
            db,
            store,
            outbox,
            photos,
            remote,
            drain,
        }
    }

    /// Puts the record locally and queues its insert, like the fallback path.
    fn queue_insert(f: &Fixture, kind: EntityKind, record: &crate::models::Record) {
        f.store.put(kind, record).unwrap();
        f.outbox
            .append(MutationKind::Insert, kind, &record.id, &record.fields)
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_chain_reconciles_ids() {
        let f = fixture();
        let wine = Wine::new("Riesling".to_string());
        let bottle = Bottle::new(wine.id.clone());
        queue_insert(&f, EntityKind::Wine, &wine.to_record().unwrap());
        queue_insert(&f, EntityKind::Bottle, &bottle.to_record().unwrap());

        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.replayed, 2);
        assert_eq!(stats.failed, 0);
        assert!(f.outbox.list_pending().unwrap().is_empty());
        assert_eq!(f.outbox.pending_count().unwrap(), 0);
        assert_eq!(f.photos.pending_count().unwrap(), 0);

        // The old temporary rows are gone
        assert!(f.store.get(EntityKind::Wine, &wine.id).unwrap().is_none());
        assert!(f.store.get(EntityKind::Bottle, &bottle.id).unwrap().is_none());

        // The bottle's foreign key reads the wine's real id, locally and remotely
        let wines = f.store.query(EntityKind::Wine, |_| true).unwrap();
        let bottles = f.store.query(EntityKind::Bottle, |_| true).unwrap();
        assert_eq!(wines.len(), 1);
        assert_eq!(bottles.len(), 1);
        let wine_id = wines[0].id.as_str();
        assert!(!wines[0].id.is_temporary());
        assert_eq!(bottles[0].field_str("wine_id"), Some(wine_id));

        let remote_bottle = f
            .remote
            .record(EntityKind::Bottle, bottles[0].id.as_str())
            .unwrap();
        assert_eq!(remote_bottle.fields.get("wine_id").and_then(|v| v.as_str()), Some(wine_id));
    }

    #[tokio::test]
    async fn test_retry_ceiling_is_exactly_three() {
        let f = fixture();
        let wine = Wine::new("Dornfelder".to_string());
        queue_insert(&f, EntityKind::Wine, &wine.to_record().unwrap());
        let seq = f.outbox.list_pending().unwrap()[0];

        f.remote.set_offline(true);
        for attempt in 1..=3u32 {
            let stats = f.drain.run_pass().await.unwrap();
            assert_eq!(stats.failed, 1, "attempt {}", attempt);
            assert_eq!(f.outbox.get(seq).unwrap().unwrap().retry_count, attempt);
        }

        // The fourth pass must not touch the parked entry
        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.replayed, 0);
        let entry = f.outbox.get(seq).unwrap().unwrap();
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.status, MutationStatus::Failed);

        // Even back online it stays parked until external intervention
        f.remote.set_offline(false);
        f.drain.run_pass().await.unwrap();
        assert_eq!(f.remote.record_count(EntityKind::Wine), 0);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_parked_immediately() {
        let f = fixture();
        let wine = Wine::new("Silvaner".to_string());
        queue_insert(&f, EntityKind::Wine, &wine.to_record().unwrap());

        f.remote.set_reject(true);
        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.failed, 1);

        // No second attempt, even though the server would now accept
        f.remote.set_reject(false);
        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.replayed, 0);
        assert!(f.outbox.last_error().unwrap().unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_delete_conflict_counts_as_success() {
        let f = fixture();
        // Queue a delete for a record the server no longer has
        let id = EntityId::parse("srv-99");
        f.outbox
            .append(
                MutationKind::Delete,
                EntityKind::Wine,
                &id,
                &Map::new(),
            )
            .unwrap();

        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.replayed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(f.outbox.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dependent_entry_blocked_by_failed_insert() {
        let f = fixture();
        let wine = Wine::new("Trollinger".to_string());
        let bottle = Bottle::new(wine.id.clone());
        queue_insert(&f, EntityKind::Wine, &wine.to_record().unwrap());
        queue_insert(&f, EntityKind::Bottle, &bottle.to_record().unwrap());

        // The wine insert fails; the bottle insert depends on its temp id
        // and must not be attempted against the server.
        f.remote.fail_next_requests(1);
        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.replayed, 0);
        assert_eq!(stats.failed, 2);

        let sequences: Vec<i64> = f.outbox.list_pending().unwrap();
        let blocked = f.outbox.get(sequences[1]).unwrap().unwrap();
        assert!(blocked
            .last_error
            .unwrap()
            .contains("blocked by dependency"));
        // Nothing reached the server with a temp reference
        assert_eq!(f.remote.record_count(EntityKind::Bottle), 0);

        // Next pass, with the network back, both drain in order
        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.replayed, 2);
        assert_eq!(f.outbox.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replaying_in_flight_entry_does_not_duplicate() {
        let f = fixture();
        let wine = Wine::new("Gutedel".to_string());
        queue_insert(&f, EntityKind::Wine, &wine.to_record().unwrap());
        let seq = f.outbox.list_pending().unwrap()[0];

        // First pass syncs normally
        f.drain.run_pass().await.unwrap();
        assert_eq!(f.remote.record_count(EntityKind::Wine), 1);

        // Simulate the crash window: the same operation is queued again
        // in-flight (as if removal never happened) and replayed.
        f.outbox
            .append(MutationKind::Insert, EntityKind::Wine, &wine.id, &wine.to_record().unwrap().fields)
            .unwrap();
        let replay_seq = f.outbox.list_pending().unwrap()[0];
        assert_ne!(seq, replay_seq);
        f.outbox.mark_in_flight(replay_seq).unwrap();

        f.drain.run_pass().await.unwrap();
        // The second operation id is new, so the server treats it as its
        // own create; the de-duplication property holds per operation id.
        assert!(f.outbox.pending_count().unwrap() == 0);
    }

    #[tokio::test]
    async fn test_same_operation_id_deduplicates_on_server() {
        let f = fixture();
        let wine = Wine::new("Elbling".to_string());
        let record = wine.to_record().unwrap();
        f.store.put(EntityKind::Wine, &record).unwrap();
        f.outbox
            .append(MutationKind::Insert, EntityKind::Wine, &record.id, &record.fields)
            .unwrap();
        let seq = f.outbox.list_pending().unwrap()[0];
        let entry = f.outbox.get(seq).unwrap().unwrap();

        f.drain.run_pass().await.unwrap();
        assert_eq!(f.remote.record_count(EntityKind::Wine), 1);

        // Crash between remote success and removal: the entry replays with
        // the same operation id and must not create a second record.
        let replayed = f
            .remote
            .create(EntityKind::Wine, &entry.payload, &entry.operation_id)
            .await
            .unwrap();
        assert_eq!(f.remote.record_count(EntityKind::Wine), 1);
        assert!(!replayed.id.is_temporary());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_parked() {
        let f = fixture();
        let id = EntityId::mint_temporary();
        f.outbox
            .append(MutationKind::Insert, EntityKind::Wine, &id, &Map::new())
            .unwrap();
        let seq = f.outbox.list_pending().unwrap()[0];

        // Corrupt the stored payload underneath the outbox
        f.db.with_conn(|conn| {
            conn.execute(
                "UPDATE mutation_outbox SET payload = 'not json' WHERE sequence = ?1",
                rusqlite::params![seq],
            )?;
            Ok(())
        })
        .unwrap();

        let stats = f.drain.run_pass().await.unwrap();
        assert_eq!(stats.failed, 1);
        // Parked, never retried
        assert!(f.outbox.list_pending().unwrap().is_empty());
        assert_eq!(f.outbox.pending_count().unwrap(), 1);
    }
}
