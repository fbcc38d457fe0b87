use serde::{Deserialize, Serialize};

/// Connection settings for the remote backend, persisted in the
/// `sync_settings` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    pub id: i64,
    pub server_url: String,
    pub api_key: String,
    pub bucket: String,
    pub enabled: bool,
    pub last_sync: Option<String>,
    pub device_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl SyncSettings {
    pub fn new(server_url: String, api_key: String) -> Self {
        Self {
            id: 0,
            server_url,
            api_key,
            bucket: "photos".to_string(),
            enabled: true,
            last_sync: None,
            device_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}
