//! In-memory remote backend for tests: mints server ids, de-duplicates by
//! operation id, and injects failures of each error class.

use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, Record, TEMP_ID_PREFIX};
use crate::remote::RemoteApi;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

const MOCK_TIMESTAMP: &str = "2026-01-15T12:00:00Z";

#[derive(Default)]
struct MockState {
    tables: HashMap<EntityKind, BTreeMap<String, Record>>,
    applied_ops: HashMap<String, Record>,
    next_id: u64,
    fail_requests: u32,
    fail_uploads: u32,
    reject_structured: bool,
    uploads: HashMap<String, Vec<u8>>,
    create_calls: u32,
}

pub struct MockRemote {
    state: Mutex<MockState>,
    offline: AtomicBool,
    delay_ms: AtomicU64,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            offline: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fails the next `n` structured requests with `Unreachable`.
    pub fn fail_next_requests(&self, n: u32) {
        self.state.lock().unwrap().fail_requests = n;
    }

    /// Fails the next `n` binary uploads with `Unreachable`.
    pub fn fail_next_uploads(&self, n: u32) {
        self.state.lock().unwrap().fail_uploads = n;
    }

    /// Makes the server decline all structured operations.
    pub fn set_reject(&self, reject: bool) {
        self.state.lock().unwrap().reject_structured = reject;
    }

    /// Adds artificial latency to every call, for coalescing tests.
    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn record(&self, kind: EntityKind, id: &str) -> Option<Record> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&kind)
            .and_then(|t| t.get(id).cloned())
    }

    pub fn record_count(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&kind)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn upload(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(&format!("{}/{}", bucket, path))
            .cloned()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    async fn simulate_latency(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }

    fn check_structured(&self, state: &mut MockState) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unreachable("mock is offline".to_string()));
        }
        if state.fail_requests > 0 {
            state.fail_requests -= 1;
            return Err(SyncError::Unreachable(
                "simulated network failure".to_string(),
            ));
        }
        if state.reject_structured {
            return Err(SyncError::Rejected("rejected by server".to_string()));
        }
        Ok(())
    }

    /// A real backend would reject foreign keys it has never seen; any
    /// temp-prefixed reference reaching the server is a reconciliation bug.
    fn check_references(fields: &Map<String, Value>) -> Result<(), SyncError> {
        for (name, value) in fields {
            if let Some(s) = value.as_str() {
                if s.starts_with(TEMP_ID_PREFIX) {
                    return Err(SyncError::Rejected(format!(
                        "field {} references unknown id {}",
                        name, s
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create(
        &self,
        entity_type: EntityKind,
        fields: &Map<String, Value>,
        operation_id: &str,
    ) -> Result<Record, SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        self.check_structured(&mut state)?;
        Self::check_references(fields)?;
        state.create_calls += 1;

        // Idempotent replay: a known operation id returns the original row
        if let Some(existing) = state.applied_ops.get(operation_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = Record {
            id: EntityId::parse(&format!("srv-{}", state.next_id)),
            created_at: Some(MOCK_TIMESTAMP.to_string()),
            updated_at: Some(MOCK_TIMESTAMP.to_string()),
            fields: fields.clone(),
        };
        state
            .tables
            .entry(entity_type)
            .or_default()
            .insert(record.id.as_str().to_string(), record.clone());
        state
            .applied_ops
            .insert(operation_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
        fields: &Map<String, Value>,
    ) -> Result<Record, SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        self.check_structured(&mut state)?;
        Self::check_references(fields)?;

        let table = state.tables.entry(entity_type).or_default();
        let Some(record) = table.get_mut(id.as_str()) else {
            return Err(SyncError::Conflict(format!(
                "{} {} no longer exists",
                entity_type.as_str(),
                id
            )));
        };
        for (name, value) in fields {
            record.fields.insert(name.clone(), value.clone());
        }
        record.updated_at = Some(MOCK_TIMESTAMP.to_string());
        Ok(record.clone())
    }

    async fn delete(&self, entity_type: EntityKind, id: &EntityId) -> Result<(), SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        self.check_structured(&mut state)?;

        let table = state.tables.entry(entity_type).or_default();
        if table.remove(id.as_str()).is_none() {
            return Err(SyncError::Conflict(format!(
                "{} {} already deleted",
                entity_type.as_str(),
                id
            )));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
    ) -> Result<Option<Record>, SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        self.check_structured(&mut state)?;
        Ok(state
            .tables
            .get(&entity_type)
            .and_then(|t| t.get(id.as_str()).cloned()))
    }

    async fn list(&self, entity_type: EntityKind) -> Result<Vec<Record>, SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        self.check_structured(&mut state)?;
        Ok(state
            .tables
            .get(&entity_type)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upload_binary(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _mime_type: &str,
    ) -> Result<String, SyncError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unreachable("mock is offline".to_string()));
        }
        if state.fail_uploads > 0 {
            state.fail_uploads -= 1;
            return Err(SyncError::Unreachable(
                "simulated upload failure".to_string(),
            ));
        }
        state
            .uploads
            .insert(format!("{}/{}", bucket, path), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn resolve_public_reference(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<String, SyncError> {
        Ok(format!("mock://{}/{}", bucket, path))
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.simulate_latency().await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unreachable("mock is offline".to_string()));
        }
        Ok(())
    }
}
