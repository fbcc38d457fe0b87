use crate::database::Database;
use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, MutationEntry, MutationKind, MutationStatus};
use rusqlite::params;
use serde_json::{Map, Value};

/// After this many failed attempts an entry is parked in `failed` and never
/// retried automatically.
pub const RETRY_CEILING: u32 = 3;

/// Append-only durable log of pending write operations, keyed by a
/// store-assigned monotonic sequence.
///
/// No other component touches the `mutation_outbox` table; entries are
/// created by the direct-write fallback, change status only inside the
/// drain, and are removed only after syncing (or when a never-synced
/// insert is deleted again).
#[derive(Clone)]
pub struct MutationOutbox {
    db: Database,
}

impl MutationOutbox {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends an operation and returns its client-generated operation id.
    /// The sequence is assigned by the store under the connection mutex, so
    /// concurrent callers can never receive the same one.
    pub fn append(
        &self,
        kind: MutationKind,
        entity_type: EntityKind,
        entity_id: &EntityId,
        payload: &Map<String, Value>,
    ) -> Result<String, SyncError> {
        let operation_id = ulid::Ulid::new().to_string();
        let payload_json = serde_json::to_string(payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mutation_outbox (operation_id, kind, entity_type, entity_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    operation_id,
                    kind.as_str(),
                    entity_type.as_str(),
                    entity_id.as_str(),
                    payload_json
                ],
            )?;
            Ok(())
        })?;
        log::debug!(
            "Queued {} {} for {} (op {})",
            kind.as_str(),
            entity_type.as_str(),
            entity_id,
            operation_id
        );
        Ok(operation_id)
    }

    /// Sequences of all entries the next drain pass should process, in
    /// ascending order. Includes `in_flight` leftovers from a crashed run
    /// and failed entries still below the retry ceiling.
    pub fn list_pending(&self) -> Result<Vec<i64>, SyncError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence FROM mutation_outbox
                 WHERE status IN ('pending', 'in_flight')
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

    /// Loads one entry fresh. Entries must be re-read by sequence at
    /// processing time because reconciliation of an earlier insert may have
    /// rewritten them since the pass started.
    pub fn get(&self, sequence: i64) -> Result<Option<MutationEntry>, SyncError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence, operation_id, kind, entity_type, entity_id, payload,
                        timestamp, status, last_error, retry_count
                 FROM mutation_outbox WHERE sequence = ?1",
            )?;
            let mut rows = stmt.query(params![sequence])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let kind_str: String = row.get(2)?;
            let entity_type_str: String = row.get(3)?;
            let entity_id_str: String = row.get(4)?;
            let payload_json: String = row.get(5)?;
            let status_str: String = row.get(7)?;

            let kind = MutationKind::from_str(&kind_str).ok_or_else(|| {
                SyncError::LocalCorruption(format!("unknown mutation kind '{}'", kind_str))
            })?;
            let entity_type = EntityKind::from_str(&entity_type_str).ok_or_else(|| {
                SyncError::LocalCorruption(format!("unknown entity type '{}'", entity_type_str))
            })?;
            let status = MutationStatus::from_str(&status_str).ok_or_else(|| {
                SyncError::LocalCorruption(format!("unknown status '{}'", status_str))
            })?;
            let payload: Map<String, Value> =
                serde_json::from_str(&payload_json).map_err(|e| {
                    SyncError::LocalCorruption(format!(
                        "outbox payload for sequence {}: {}",
                        sequence, e
                    ))
                })?;

            Ok(Some(MutationEntry {
                sequence: row.get(0)?,
                operation_id: row.get(1)?,
                kind,
                entity_type,
                entity_id: EntityId::parse(&entity_id_str),
                payload,
                timestamp: row.get(6)?,
                status,
                last_error: row.get(8)?,
                retry_count: row.get(9)?,
            }))
        })
    }

    pub fn mark_in_flight(&self, sequence: i64) -> Result<(), SyncError> {
        self.set_status(sequence, MutationStatus::InFlight)
    }

    pub fn mark_synced(&self, sequence: i64) -> Result<(), SyncError> {
        self.set_status(sequence, MutationStatus::Synced)
    }

    fn set_status(&self, sequence: i64, status: MutationStatus) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE mutation_outbox SET status = ?1 WHERE sequence = ?2",
                params![status.as_str(), sequence],
            )?;
            Ok(())
        })
    }

    /// Records a failed attempt and returns the new retry count. The count
    /// is persisted in the entry, so retries survive process restarts.
    pub fn mark_failure(&self, sequence: i64, error: &str) -> Result<u32, SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE mutation_outbox
                 SET status = 'failed', retry_count = retry_count + 1, last_error = ?1
                 WHERE sequence = ?2",
                params![error, sequence],
            )?;
            let count: u32 = conn.query_row(
                "SELECT retry_count FROM mutation_outbox WHERE sequence = ?1",
                params![sequence],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Parks an entry terminally (used for server rejections, which must
    /// never be retried automatically).
    pub fn park(&self, sequence: i64, error: &str) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE mutation_outbox
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
                "DELETE FROM mutation_outbox WHERE sequence = ?1",
                params![sequence],
            )?;
            Ok(())
        })
    }

    /// Defensive cleanup: removes entries a crashed pass left in `synced`
    /// after the remote call succeeded but before per-entry removal ran.
    pub fn cleanup_synced(&self) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM mutation_outbox WHERE status = 'synced'", [])?;
            Ok(removed)
        })
    }

    /// Rewrites a reconciled id in every unsynced entry: the target entity
    /// id of updates/deletes, and any payload field referencing it as a
    /// foreign key. Runs in one transaction.
    pub fn reconcile_references(
        &self,
        old_id: &EntityId,
        new_id: &EntityId,
    ) -> Result<usize, SyncError> {
        self.db.with_tx(|tx| {
            let mut changed = tx.execute(
                "UPDATE mutation_outbox SET entity_id = ?1
                 WHERE entity_id = ?2 AND status != 'synced'",
                params![new_id.as_str(), old_id.as_str()],
            )?;

            let mut stmt = tx.prepare(
                "SELECT sequence, payload FROM mutation_outbox
                 WHERE status != 'synced' AND payload LIKE ?1",
            )?;
            let pattern = format!("%{}%", old_id.as_str());
            let rows: Vec<(i64, String)> = stmt
                .query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;
            drop(stmt);

            for (sequence, payload_json) in rows {
                let mut payload: Map<String, Value> = serde_json::from_str(&payload_json)
                    .map_err(|e| {
                        SyncError::LocalCorruption(format!(
                            "outbox payload for sequence {}: {}",
                            sequence, e
                        ))
                    })?;
                let mut touched = false;
                for value in payload.values_mut() {
                    if value.as_str() == Some(old_id.as_str()) {
                        *value = Value::String(new_id.as_str().to_string());
                        touched = true;
                    }
                }
                if touched {
                    tx.execute(
                        "UPDATE mutation_outbox SET payload = ?1 WHERE sequence = ?2",
                        params![serde_json::to_string(&payload)?, sequence],
                    )?;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    /// Drops every entry targeting the given entity. Used when an entity
    /// whose insert never synced is deleted again: from the server's point
    /// of view it never existed.
    pub fn purge_entity(&self, entity_id: &EntityId) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM mutation_outbox WHERE entity_id = ?1",
                params![entity_id.as_str()],
            )?;
            Ok(removed)
        })
    }

    /// Count of all entries not yet synced, for the connectivity indicator.
    pub fn pending_count(&self) -> Result<usize, SyncError> {
        self.db.with_conn(|conn| {
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM mutation_outbox WHERE status != 'synced'",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Latest recorded failure, if any.
    pub fn last_error(&self) -> Result<Option<String>, SyncError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT last_error FROM mutation_outbox
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
