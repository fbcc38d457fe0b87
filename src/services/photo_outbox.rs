use crate::database::Database;
use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, PhotoEntry, PhotoStatus};
use crate::services::mutation_outbox::RETRY_CEILING;
use rusqlite::params;

/// Durable log of binary attachments awaiting upload.
///
/// Kept apart from the mutation outbox: payloads are large, retry on
/// different timescales, and a stuck upload must never block field
/// mutations (or the other way around).
#[derive(Clone)]
pub struct PhotoOutbox {
    db: Database,
}

impl PhotoOutbox {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a binary for later upload and returns its operation id.
    pub fn append(
        &self,
        owner_entity_type: EntityKind,
        owner_entity_id: &EntityId,
        binary_payload: &[u8],
        mime_type: &str,
        destination_bucket: &str,
    ) -> Result<String, SyncError> {
        let operation_id = ulid::Ulid::new().to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO photo_outbox
                 (operation_id, owner_entity_type, owner_entity_id, binary_payload, mime_type, destination_bucket)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    operation_id,
                    owner_entity_type.as_str(),
                    owner_entity_id.as_str(),
                    binary_payload,
                    mime_type,
                    destination_bucket
                ],
            )?;
            Ok(())
        })?;
        log::debug!(
            "Queued photo ({} bytes) for {} {} (op {})",
            binary_payload.len(),
            owner_entity_type.as_str(),
            owner_entity_id,
            operation_id
        );
        Ok(operation_id)
    }

    /// Sequences the next photo drain pass should process, ascending.
    pub fn list_pending(&self) -> Result<Vec<i64>, SyncError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence FROM photo_outbox
                 WHERE status IN ('pending', 'uploading')
                    OR (status = 'failed' AND retry_count < ?1)
                 ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map(params![RETRY_CEILING], |row| row.get(0))?;
            let mut out = Vec::new();
            for seq in rows {
                out.push(seq?);
            }
            Ok(out)
        })
    }

    pub fn get(&self, sequence: i64) -> Result<Option<PhotoEntry>, SyncError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence, operation_id, owner_entity_type, owner_entity_id,
                        binary_payload, mime_type, destination_bucket, timestamp,
                        status, retry_count, last_error, resolved_remote_path
                 FROM photo_outbox WHERE sequence = ?1",
            )?;
            let mut rows = stmt.query(params![sequence])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let owner_type_str: String = row.get(2)?;
            let owner_id_str: String = row.get(3)?;
            let status_str: String = row.get(8)?;

            let owner_entity_type = EntityKind::from_str(&owner_type_str).ok_or_else(|| {
                SyncError::LocalCorruption(format!("unknown entity type '{}'", owner_type_str))
            })?;
            let status = PhotoStatus::from_str(&status_str).ok_or_else(|| {
                SyncError::LocalCorruption(format!("unknown status '{}'", status_str))
            })?;

            Ok(Some(PhotoEntry {
                sequence: row.get(0)?,
                operation_id: row.get(1)?,
                owner_entity_type,
                owner_entity_id: EntityId::parse(&owner_id_str),
                binary_payload: row.get(4)?,
                mime_type: row.get(5)?,
                destination_bucket: row.get(6)?,
                timestamp: row.get(7)?,
                status,
                retry_count: row.get(9)?,
                last_error: row.get(10)?,
                resolved_remote_path: row.get(11)?,
            }))
        })
    }

    pub fn mark_uploading(&self, sequence: i64) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE photo_outbox SET status = 'uploading' WHERE sequence = ?1",
                params![sequence],
            )?;
            Ok(())
        })
    }

    /// Records the permanent remote reference after a successful upload.
    pub fn mark_uploaded(&self, sequence: i64, resolved_path: &str) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE photo_outbox
                 SET status = 'uploaded', resolved_remote_path = ?1, last_error = NULL
                 WHERE sequence = ?2",
                params![resolved_path, sequence],
            )?;
            Ok(())
        })
    }

    /// Records a failed attempt and returns the new retry count.
    pub fn mark_failure(&self, sequence: i64, error: &str) -> Result<u32, SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE photo_outbox
                 SET status = 'failed', retry_count = retry_count + 1, last_error = ?1
                 WHERE sequence = ?2",
                params![error, sequence],
            )?;
            let count: u32 = conn.query_row(
                "SELECT retry_count FROM photo_outbox WHERE sequence = ?1",
                params![sequence],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Parks an entry terminally (server rejected the upload).
    pub fn park(&self, sequence: i64, error: &str) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE photo_outbox
                 SET status = 'failed', retry_count = MAX(retry_count, ?1), last_error = ?2
                 WHERE sequence = ?3",
                params![RETRY_CEILING, error, sequence],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, sequence: i64) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM photo_outbox WHERE sequence = ?1",
                params![sequence],
            )?;
            Ok(())
        })
    }

    /// Defensive cleanup of entries left in `uploaded` by a crashed pass.
    pub fn cleanup_uploaded(&self) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM photo_outbox WHERE status = 'uploaded'", [])?;
            Ok(removed)
        })
    }

    /// Rewrites the owner id of all pending entries once the owning insert
    /// has been reconciled.
    pub fn reconcile_owner(&self, old_id: &EntityId, new_id: &EntityId) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE photo_outbox SET owner_entity_id = ?1
                 WHERE owner_entity_id = ?2 AND status != 'uploaded'",
                params![new_id.as_str(), old_id.as_str()],
            )?;
            Ok(changed)
        })
    }

    /// Drops all entries owned by the given entity (the owner was deleted
    /// before its insert ever synced).
    pub fn purge_owner(&self, owner_entity_id: &EntityId) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM photo_outbox WHERE owner_entity_id = ?1",
                params![owner_entity_id.as_str()],
            )?;
            Ok(removed)
        })
    }

    pub fn pending_count(&self) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM photo_outbox WHERE status != 'uploaded'",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn last_error(&self) -> Result<Option<String>, SyncError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT last_error FROM photo_outbox
                 WHERE status = 'failed' AND last_error IS NOT NULL
                 ORDER BY sequence DESC LIMIT 1",
                [],
                |row| row.get(0),
            );
            match result {
                Ok(error) => Ok(Some(error)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(SyncError::Database(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> PhotoOutbox {
        PhotoOutbox::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_append_and_get_binary() {
        let outbox = outbox();
        let owner = EntityId::mint_temporary();
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];

        outbox
            .append(EntityKind::Bottle, &owner, &bytes, "image/jpeg", "photos")
            .unwrap();
        let seq = outbox.list_pending().unwrap()[0];
        let entry = outbox.get(seq).unwrap().unwrap();

        assert_eq!(entry.binary_payload, bytes);
        assert_eq!(entry.mime_type, "image/jpeg");
        assert_eq!(entry.destination_bucket, "photos");
        assert_eq!(entry.owner_entity_id, owner);
        assert_eq!(entry.status, PhotoStatus::Pending);
        assert!(entry.resolved_remote_path.is_none());
    }

    #[test]
    fn test_reconcile_owner() {
        let outbox = outbox();
        let temp = EntityId::mint_temporary();
        outbox
            .append(EntityKind::Wine, &temp, &[1, 2, 3], "image/jpeg", "photos")
            .unwrap();

        let real = EntityId::parse("srv-5");
        assert_eq!(outbox.reconcile_owner(&temp, &real).unwrap(), 1);

        let seq = outbox.list_pending().unwrap()[0];
        let entry = outbox.get(seq).unwrap().unwrap();
        assert_eq!(entry.owner_entity_id, real);
        assert!(!entry.owner_entity_id.is_temporary());
    }

    #[test]
    fn test_retry_ceiling_excludes_entry() {
        let outbox = outbox();
        let owner = EntityId::parse("srv-5");
        outbox
            .append(EntityKind::Wine, &owner, &[1], "image/jpeg", "photos")
            .unwrap();
        let seq = outbox.list_pending().unwrap()[0];

        for _ in 0..RETRY_CEILING {
            outbox.mark_failure(seq, "upload timeout").unwrap();
        }
        assert!(outbox.list_pending().unwrap().is_empty());
        assert_eq!(outbox.pending_count().unwrap(), 1);
        assert!(outbox.last_error().unwrap().is_some());
    }

    #[test]
    fn test_mark_uploaded_records_path() {
        let outbox = outbox();
        let owner = EntityId::parse("srv-5");
        outbox
            .append(EntityKind::Wine, &owner, &[1], "image/jpeg", "photos")
            .unwrap();
        let seq = outbox.list_pending().unwrap()[0];

        outbox.mark_uploaded(seq, "wines/abc.jpg").unwrap();
        let entry = outbox.get(seq).unwrap().unwrap();
        assert_eq!(entry.status, PhotoStatus::Uploaded);
        assert_eq!(entry.resolved_remote_path.as_deref(), Some("wines/abc.jpg"));

        assert_eq!(outbox.cleanup_uploaded().unwrap(), 1);
    }

    #[test]
    fn test_purge_owner() {
        let outbox = outbox();
        let owner = EntityId::mint_temporary();
        outbox
            .append(EntityKind::Bottle, &owner, &[1], "image/jpeg", "photos")
            .unwrap();
        outbox
            .append(EntityKind::Bottle, &owner, &[2], "image/png", "photos")
            .unwrap();

        assert_eq!(outbox.purge_owner(&owner).unwrap(), 2);
        assert!(outbox.list_pending().unwrap().is_empty());
    }
}
