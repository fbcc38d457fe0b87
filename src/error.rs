use std::fmt;

/// Central error types for the sync engine
#[derive(Debug)]
pub enum SyncError {
    /// Network or transport failure — the remote was never reached.
    /// Triggers outbox fallback and bounded retries.
    Unreachable(String),
    /// The server declined the operation. Never retried automatically.
    Rejected(String),
    /// The server reports the target no longer exists (e.g. delete after
    /// delete). Resolved locally without user involvement.
    Conflict(String),
    /// Retry ceiling reached; the entry is parked and needs attention.
    Exhausted(String),
    /// Local store or outbox row is malformed. Treated as a cache miss.
    LocalCorruption(String),
    /// Database error (rusqlite)
    Database(rusqlite::Error),
    /// Filesystem error
    Filesystem(std::io::Error),
    /// Payload serialization error
    Serialization(String),
    /// Validation error (e.g. invalid inputs)
    Validation(String),
    /// Resource not found
    NotFound(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::Unreachable(msg) => write!(f, "Remote unreachable: {}", msg),
            SyncError::Rejected(msg) => write!(f, "Rejected by server: {}", msg),
            SyncError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            SyncError::Exhausted(msg) => write!(f, "Retries exhausted: {}", msg),
            SyncError::LocalCorruption(msg) => write!(f, "Corrupt local data: {}", msg),
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Filesystem(e) => write!(f, "Filesystem error: {}", e),
            SyncError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            SyncError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SyncError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

// Conversions from other error types
impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Filesystem(e)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl SyncError {
    /// True for the failure class that triggers outbox fallback and retries.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SyncError::Unreachable(_))
    }

    /// User-friendly error messages for UI (can be translated via i18n)
    #[allow(dead_code)]
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Unreachable(_) => {
                "No connection. Your changes are saved and will sync later.".to_string()
            }
            SyncError::Rejected(msg) => msg.clone(),
            SyncError::Conflict(_) => "The record was already changed elsewhere.".to_string(),
            SyncError::Exhausted(_) => {
                "Some changes could not be synchronized. Please check the sync status.".to_string()
            }
            SyncError::LocalCorruption(_) => "Local data could not be read.".to_string(),
            SyncError::Database(_) => "A database error occurred. Please try again.".to_string(),
            SyncError::Filesystem(_) => {
                "Error accessing files. Please check app permissions.".to_string()
            }
            SyncError::Serialization(_) => "Data could not be processed.".to_string(),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::NotFound(msg) => format!("{} was not found.", msg),
        }
    }
}
