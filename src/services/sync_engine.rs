use crate::database::Database;
use crate::error::SyncError;
use crate::models::{self, EntityId, EntityKind, MutationKind, Record, TEMP_ID_PREFIX};
use crate::remote::{HttpRemote, RemoteApi};
use crate::services::connectivity::SyncStatus;
use crate::services::local_store::LocalStore;
use crate::services::mutation_outbox::MutationOutbox;
use crate::services::photo_drain::{self, PhotoDrain};
use crate::services::photo_outbox::PhotoOutbox;
use crate::services::settings_service;
use crate::services::sync_drain::SyncDrain;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Which outbox a pending count or error query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxKind {
    Mutation,
    Photo,
}

/// Result of one coalesced sync run (all passes it performed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub mutations_replayed: usize,
    pub photos_uploaded: usize,
    pub failures: usize,
}

/// The facade the UI layer talks to.
///
/// Reads always serve local store content. Mutations attempt the remote
/// backend first and fall back to the local store plus the matching outbox
/// when it is unreachable; the caller's action succeeds either way. Drains
/// are coalesced: at most one runs at a time, and a trigger arriving
/// mid-run schedules one follow-up pass instead of racing it.
pub struct SyncEngine {
    db: Database,
    store: LocalStore,
    mutations: MutationOutbox,
    photos: PhotoOutbox,
    remote: Arc<dyn RemoteApi>,
    bucket: String,
    drain_lock: tokio::sync::Mutex<()>,
    rerun: AtomicBool,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(db: Database, remote: Arc<dyn RemoteApi>, bucket: String) -> Arc<Self> {
        let (status_tx, _) = watch::channel(SyncStatus::Online);
        Arc::new(Self {
            store: LocalStore::new(db.clone()),
            mutations: MutationOutbox::new(db.clone()),
            photos: PhotoOutbox::new(db.clone()),
            db,
            remote,
            bucket,
            drain_lock: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
            status_tx,
        })
    }

    /// Builds the engine from the persisted sync settings, with the HTTP
    /// remote client the settings describe.
    pub fn from_settings(db: Database) -> Result<Arc<Self>, SyncError> {
        let settings = settings_service::load_sync_settings(&db)?
            .ok_or_else(|| SyncError::Validation("Sync not configured".to_string()))?;
        let device_id = settings_service::get_device_id(&db)?;
        let remote = Arc::new(HttpRemote::new(&settings)?);
        log::info!(
            "Sync engine ready for {} (device {})",
            settings.server_url,
            device_id
        );
        Ok(Self::new(db, remote, settings.bucket))
    }

    // ---- status signaling ----

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status_tx.borrow()
    }

    pub(crate) fn set_status(&self, status: SyncStatus) {
        if self.status() != status {
            log::debug!("Sync status: {:?}", status);
        }
        self.status_tx.send_replace(status);
    }

    // ---- read side ----

    /// Serves the local store, refreshed opportunistically from the remote
    /// when it is believed reachable. A corrupt local row is treated as a
    /// cache miss and forces a remote refetch.
    pub async fn read(
        &self,
        kind: EntityKind,
        id: &EntityId,
    ) -> Result<Option<Record>, SyncError> {
        match self.store.get(kind, id) {
            Ok(local) => {
                if id.is_temporary() || self.status() == SyncStatus::Offline {
                    return Ok(local);
                }
                match self.remote.fetch(kind, id).await {
                    Ok(Some(fresh)) => {
                        self.store.put(kind, &fresh)?;
                        Ok(Some(fresh))
                    }
                    Ok(None) => {
                        // The backend is authoritative: a synced id it does
                        // not know was deleted elsewhere.
                        if local.is_some() {
                            self.store.delete(kind, id)?;
                        }
                        Ok(None)
                    }
                    Err(e) if e.is_unreachable() => {
                        self.set_status(SyncStatus::Offline);
                        Ok(local)
                    }
                    Err(e) => {
                        log::debug!("Opportunistic refresh failed: {}", e);
                        Ok(local)
                    }
                }
            }
            Err(SyncError::LocalCorruption(msg)) => {
                log::warn!("{} — forcing remote refetch", msg);
                match self.remote.fetch(kind, id).await {
                    Ok(Some(fresh)) => {
                        self.store.put(kind, &fresh)?;
                        Ok(Some(fresh))
                    }
                    Ok(None) => {
                        self.store.delete(kind, id)?;
                        Ok(None)
                    }
                    Err(_) => Err(SyncError::LocalCorruption(msg)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Local-only predicate query over one entity kind.
    pub fn query(
        &self,
        kind: EntityKind,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>, SyncError> {
        self.store.query(kind, predicate)
    }

    /// Pulls the full remote collection into the local store. Returns the
    /// number of refreshed rows.
    pub async fn refresh(&self, kind: EntityKind) -> Result<usize, SyncError> {
        let rows = self.remote.list(kind).await?;
        let count = rows.len();
        for row in &rows {
            self.store.put(kind, row)?;
        }
        log::debug!("Refreshed {} {} rows", count, kind.as_str());
        Ok(count)
    }

    /// Resolves a stored photo path to a publicly served URL.
    pub async fn resolve_photo_url(&self, path: &str) -> Result<String, SyncError> {
        self.remote
            .resolve_public_reference(&self.bucket, path)
            .await
    }

    // ---- write side ----

    /// Applies a mutation: remote first, outbox fallback on `Unreachable`.
    /// A server rejection propagates to the caller and is never queued.
    /// For update/delete the payload must carry the target `id`.
    pub async fn mutate(
        &self,
        kind: MutationKind,
        entity_type: EntityKind,
        payload: Map<String, Value>,
    ) -> Result<Record, SyncError> {
        match kind {
            MutationKind::Insert => self.insert(entity_type, payload).await,
            MutationKind::Update => self.update(entity_type, payload).await,
            MutationKind::Delete => self.delete(entity_type, payload).await,
        }
    }

    async fn insert(
        &self,
        entity_type: EntityKind,
        mut payload: Map<String, Value>,
    ) -> Result<Record, SyncError> {
        payload.remove("id");
        let record = Record::new(EntityId::mint_temporary(), payload);
        models::validate_insert(entity_type, &record)?;

        // A payload referencing a not-yet-synced entity cannot go direct;
        // it queues behind the pending insert that minted the reference.
        if !has_temporary_reference(entity_type, &record.fields) {
            let operation_id = ulid::Ulid::new().to_string();
            match self
                .remote
                .create(entity_type, &record.fields, &operation_id)
                .await
            {
                Ok(authoritative) => {
                    self.store.put(entity_type, &authoritative)?;
                    return Ok(authoritative);
                }
                Err(e) if e.is_unreachable() => {
                    log::info!(
                        "Remote unreachable, storing {} locally as {}",
                        entity_type.as_str(),
                        record.id
                    );
                    self.set_status(SyncStatus::Offline);
                }
                Err(e) => return Err(e),
            }
        }

        self.store.put(entity_type, &record)?;
        self.mutations
            .append(MutationKind::Insert, entity_type, &record.id, &record.fields)?;
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: EntityKind,
        mut payload: Map<String, Value>,
    ) -> Result<Record, SyncError> {
        let id = take_target_id(&mut payload)?;

        if !id.is_temporary() && !has_temporary_reference(entity_type, &payload) {
            match self.remote.update(entity_type, &id, &payload).await {
                Ok(authoritative) => {
                    self.store.put(entity_type, &authoritative)?;
                    return Ok(authoritative);
                }
                Err(e) if e.is_unreachable() => {
                    self.set_status(SyncStatus::Offline);
                }
                Err(e) => return Err(e),
            }
        }

        // Merge into the local row; the queued entry carries only the
        // changed fields.
        let merged = match self.store.get(entity_type, &id) {
            Ok(Some(mut existing)) => {
                for (name, value) in &payload {
                    existing.fields.insert(name.clone(), value.clone());
                }
                existing
            }
            Ok(None) => Record::new(id.clone(), payload.clone()),
            Err(SyncError::LocalCorruption(msg)) => {
                log::warn!("{} — rebuilding row from update payload", msg);
                Record::new(id.clone(), payload.clone())
            }
            Err(e) => return Err(e),
        };
        self.store.put(entity_type, &merged)?;
        self.mutations
            .append(MutationKind::Update, entity_type, &id, &payload)?;
        Ok(merged)
    }

    async fn delete(
        &self,
        entity_type: EntityKind,
        mut payload: Map<String, Value>,
    ) -> Result<Record, SyncError> {
        let id = take_target_id(&mut payload)?;
        let last_known = self.store.get(entity_type, &id).ok().flatten();

        if id.is_temporary() {
            // The insert never synced: from the server's point of view the
            // record never existed. Drop everything queued for it.
            let purged = self.mutations.purge_entity(&id)?;
            let photos = self.photos.purge_owner(&id)?;
            self.store.delete(entity_type, &id)?;
            log::info!(
                "Deleted unsynced {} {} ({} queued ops, {} queued photos dropped)",
                entity_type.as_str(),
                id,
                purged,
                photos
            );
            return Ok(last_known.unwrap_or_else(|| Record::new(id, Map::new())));
        }

        match self.remote.delete(entity_type, &id).await {
            Ok(()) | Err(SyncError::Conflict(_)) => {
                self.store.delete(entity_type, &id)?;
            }
            Err(e) if e.is_unreachable() => {
                self.set_status(SyncStatus::Offline);
                self.store.delete(entity_type, &id)?;
                self.mutations
                    .append(MutationKind::Delete, entity_type, &id, &Map::new())?;
            }
            Err(e) => return Err(e),
        }
        Ok(last_known.unwrap_or_else(|| Record::new(id, Map::new())))
    }

    /// Attaches a photo to a wine or bottle: uploads directly when the
    /// owner already has a server id and the network cooperates, otherwise
    /// queues the binary in the photo outbox.
    pub async fn attach_photo(
        &self,
        owner_type: EntityKind,
        owner_id: &EntityId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<(), SyncError> {
        if owner_type.photo_field().is_none() {
            return Err(SyncError::Validation(format!(
                "{} records carry no photo",
                owner_type.as_str()
            )));
        }

        if !owner_id.is_temporary() {
            match photo_drain::upload_and_backfill(
                &self.store,
                self.remote.as_ref(),
                owner_type,
                owner_id,
                bytes,
                mime_type,
                &self.bucket,
            )
            .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_unreachable() => {
                    self.set_status(SyncStatus::Offline);
                }
                Err(e) => return Err(e),
            }
        }

        self.photos
            .append(owner_type, owner_id, bytes, mime_type, &self.bucket)?;
        Ok(())
    }

    // ---- indicator surface ----

    /// Count of not-yet-confirmed entries, for the connectivity indicator.
    pub fn pending_count(&self, outbox: OutboxKind) -> Result<usize, SyncError> {
        match outbox {
            OutboxKind::Mutation => self.mutations.pending_count(),
            OutboxKind::Photo => self.photos.pending_count(),
        }
    }

    pub fn last_sync_error(&self, outbox: OutboxKind) -> Result<Option<String>, SyncError> {
        match outbox {
            OutboxKind::Mutation => self.mutations.last_error(),
            OutboxKind::Photo => self.photos.last_error(),
        }
    }

    fn pending_total(&self) -> Result<usize, SyncError> {
        Ok(self.mutations.pending_count()? + self.photos.pending_count()?)
    }

    /// Entries the next drain would actually touch (parked ones excluded).
    pub(crate) fn drainable_total(&self) -> Result<usize, SyncError> {
        Ok(self.mutations.list_pending()?.len() + self.photos.list_pending()?.len())
    }

    pub(crate) async fn ping_remote(&self) -> Result<(), SyncError> {
        self.remote.ping().await
    }

    // ---- drains ----

    /// Runs one mutation drain pass followed by one photo drain pass,
    /// repeating while triggers arrived mid-run. If a run is already in
    /// progress this only sets the run-again flag.
    pub async fn sync_now(&self) -> Result<SyncStats, SyncError> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            self.rerun.store(true, Ordering::SeqCst);
            log::debug!("Drain already running, coalescing trigger");
            return Ok(SyncStats::default());
        };

        self.set_status(SyncStatus::Syncing);
        let mut stats = SyncStats::default();
        let result = loop {
            let mutation_drain = SyncDrain::new(
                self.store.clone(),
                self.mutations.clone(),
                self.photos.clone(),
                Arc::clone(&self.remote),
            );
            let photo_drain = PhotoDrain::new(
                self.store.clone(),
                self.photos.clone(),
                Arc::clone(&self.remote),
            );

            let mutations = match mutation_drain.run_pass().await {
                Ok(s) => s,
                Err(e) => break Err(e),
            };
            let photos = match photo_drain.run_pass().await {
                Ok(s) => s,
                Err(e) => break Err(e),
            };
            stats.mutations_replayed += mutations.replayed;
            stats.photos_uploaded += photos.uploaded;
            stats.failures += mutations.failed + photos.failed;

            if !self.rerun.swap(false, Ordering::SeqCst) {
                break Ok(());
            }
            log::debug!("Coalesced trigger arrived mid-run, draining again");
        };

        match result {
            Ok(()) => {
                if stats.mutations_replayed + stats.photos_uploaded > 0 {
                    settings_service::update_last_sync(&self.db)?;
                }
                let status = if self.pending_total()? == 0 {
                    SyncStatus::Synced
                } else {
                    SyncStatus::Online
                };
                self.set_status(status);
                log::info!("Sync completed: {:?}", stats);
                Ok(stats)
            }
            Err(e) => {
                self.set_status(SyncStatus::Online);
                Err(e)
            }
        }
    }

    /// Fire-and-forget drain trigger for event handlers.
    pub fn trigger_sync(engine: &Arc<SyncEngine>) {
        let engine = Arc::clone(engine);
        tokio::spawn(async move {
            if let Err(e) = engine.sync_now().await {
                log::error!("Background sync error: {}", e);
            }
        });
    }
}

fn take_target_id(payload: &mut Map<String, Value>) -> Result<EntityId, SyncError> {
    let id_value = payload
        .remove("id")
        .ok_or_else(|| SyncError::Validation("payload is missing the target id".to_string()))?;
    let id_str = id_value
        .as_str()
        .ok_or_else(|| SyncError::Validation("target id must be a string".to_string()))?;
    Ok(EntityId::parse(id_str))
}

fn has_temporary_reference(entity_type: EntityKind, fields: &Map<String, Value>) -> bool {
    entity_type.foreign_keys().iter().any(|(field, _)| {
        fields
            .get(*field)
            .and_then(|v| v.as_str())
            .map(|s| s.starts_with(TEMP_ID_PREFIX))
            .unwrap_or(false)
    })
}
