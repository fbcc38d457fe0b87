use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, Record, SyncSettings};
use crate::remote::{record_from_row, RemoteApi};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Request timeout; the drain relies on remote calls failing within a
/// bounded time instead of hanging a pass.
const REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Remote API client over the backend's REST + object storage surface.
///
/// Rows live under `/rest/v1/<table>`, binaries under
/// `/storage/v1/object/<bucket>/<path>`. Transport failures and 5xx map to
/// `Unreachable`, 4xx to `Rejected`, 404/409 on a targeted row to
/// `Conflict`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemote {
    pub fn new(settings: &SyncSettings) -> Result<Self, SyncError> {
        Self::with_base_url(&settings.server_url, &settings.api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| SyncError::Validation(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn rest_url(&self, entity_type: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, entity_type.table())
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Maps a non-success response to the error taxonomy. `targeted` marks
    /// operations addressing one existing row, where 404/409 mean the
    /// target is gone rather than a plain rejection.
    async fn response_error(resp: reqwest::Response, targeted: bool) -> SyncError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if targeted
            && (status == reqwest::StatusCode::NOT_FOUND
                || status == reqwest::StatusCode::CONFLICT)
        {
            SyncError::Conflict(format!("{}: {}", status, body))
        } else if status.is_client_error() {
            SyncError::Rejected(format!("{}: {}", status, body))
        } else {
            // 5xx and anything else: the operation may not have been
            // applied; treat like a transport failure and retry.
            SyncError::Unreachable(format!("{}: {}", status, body))
        }
    }

    async fn rows_from_response(resp: reqwest::Response) -> Result<Vec<Record>, SyncError> {
        let value: Value = resp
            .json()
            .await
            .map_err(|e| SyncError::Rejected(format!("malformed server response: {}", e)))?;
        match value {
            Value::Array(items) => items.into_iter().map(record_from_row).collect(),
            other => Ok(vec![record_from_row(other)?]),
        }
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    SyncError::Unreachable(e.to_string())
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(
        &self,
        entity_type: EntityKind,
        fields: &Map<String, Value>,
        operation_id: &str,
    ) -> Result<Record, SyncError> {
        let request = self
            .apply_auth(self.client.post(self.rest_url(entity_type)))
            .header("Prefer", "return=representation")
            .header("Idempotency-Key", operation_id)
            .json(&Value::Object(fields.clone()));

        let resp = request.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, false).await);
        }

        let rows = Self::rows_from_response(resp).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SyncError::Rejected("server returned no created row".to_string()))
    }

    async fn update(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
        fields: &Map<String, Value>,
    ) -> Result<Record, SyncError> {
        let url = format!("{}?id=eq.{}", self.rest_url(entity_type), id);
        let request = self
            .apply_auth(self.client.patch(url))
            .header("Prefer", "return=representation")
            .json(&Value::Object(fields.clone()));

        let resp = request.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, true).await);
        }

        let rows = Self::rows_from_response(resp).await?;
        rows.into_iter()
            .next()
            // An empty result set means the filter matched nothing
            .ok_or_else(|| SyncError::Conflict(format!("{} {} no longer exists", entity_type.as_str(), id)))
    }

    async fn delete(&self, entity_type: EntityKind, id: &EntityId) -> Result<(), SyncError> {
        let url = format!("{}?id=eq.{}", self.rest_url(entity_type), id);
        let resp = self
            .apply_auth(self.client.delete(url))
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, true).await);
        }
        Ok(())
    }

    async fn fetch(
        &self,
        entity_type: EntityKind,
        id: &EntityId,
    ) -> Result<Option<Record>, SyncError> {
        let url = format!("{}?id=eq.{}&limit=1", self.rest_url(entity_type), id);
        let resp = self
            .apply_auth(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, false).await);
        }
        let rows = Self::rows_from_response(resp).await?;
        Ok(rows.into_iter().next())
    }

    async fn list(&self, entity_type: EntityKind) -> Result<Vec<Record>, SyncError> {
        let resp = self
            .apply_auth(self.client.get(self.rest_url(entity_type)))
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, false).await);
        }
        Self::rows_from_response(resp).await
    }

    async fn upload_binary(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, SyncError> {
        let request = self
            .apply_auth(self.client.post(self.storage_url(bucket, path)))
            .header("Content-Type", mime_type)
            // Re-uploading the same content-addressed path must not fail
            .header("x-upsert", "true")
            .body(bytes.to_vec());

        let resp = request.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::response_error(resp, false).await);
        }
        Ok(path.to_string())
    }

    async fn resolve_public_reference(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<String, SyncError> {
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        ))
    }

    async fn ping(&self) -> Result<(), SyncError> {
        // Any HTTP response at all counts as reachable
        self.apply_auth(self.client.head(&self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}
