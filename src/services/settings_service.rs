use crate::database::Database;
use crate::error::SyncError;
use crate::models::SyncSettings;
use rusqlite::params;

/// Loads the synchronization settings from the database
pub fn load_sync_settings(db: &Database) -> Result<Option<SyncSettings>, SyncError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, server_url, api_key, bucket, enabled, last_sync, device_id, created_at, updated_at
             FROM sync_settings
             ORDER BY id DESC
             LIMIT 1",
        )?;

        let result = stmt.query_row([], |row| {
            Ok(SyncSettings {
                id: row.get(0)?,
                server_url: row.get(1)?,
                api_key: row.get(2)?,
                bucket: row.get(3)?,
                enabled: row.get(4)?,
                last_sync: row.get(5)?,
                device_id: row.get(6)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            })
        });

        match result {
            Ok(settings) => Ok(Some(settings)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SyncError::Database(e)),
        }
    })
}

/// Saves or updates the synchronization settings
pub fn save_sync_settings(db: &Database, settings: &SyncSettings) -> Result<i64, SyncError> {
    let existing = load_sync_settings(db)?;

    db.with_conn(|conn| {
        if let Some(existing) = existing {
            conn.execute(
                "UPDATE sync_settings
                 SET server_url = ?1, api_key = ?2, bucket = ?3, enabled = ?4, device_id = ?5
                 WHERE id = ?6",
                params![
                    &settings.server_url,
                    &settings.api_key,
                    &settings.bucket,
                    settings.enabled,
                    &settings.device_id,
                    existing.id,
                ],
            )?;
            Ok(existing.id)
        } else {
            conn.execute(
                "INSERT INTO sync_settings (server_url, api_key, bucket, enabled, device_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &settings.server_url,
                    &settings.api_key,
                    &settings.bucket,
                    settings.enabled,
                    &settings.device_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    })
}

/// Updates the timestamp of the last synchronization
pub fn update_last_sync(db: &Database) -> Result<(), SyncError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_settings SET last_sync = CURRENT_TIMESTAMP WHERE id = (SELECT MAX(id) FROM sync_settings)",
            [],
        )?;
        Ok(())
    })
}

/// Enables or disables synchronization
pub fn set_sync_enabled(db: &Database, enabled: bool) -> Result<(), SyncError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_settings SET enabled = ?1 WHERE id = (SELECT MAX(id) FROM sync_settings)",
            [enabled],
        )?;
        Ok(())
    })
}

/// Liefert stabile device_id (erzeugt & speichert falls fehlend)
pub fn get_device_id(db: &Database) -> Result<String, SyncError> {
    if let Some(mut settings) = load_sync_settings(db)? {
        if let Some(id) = &settings.device_id {
            return Ok(id.clone());
        }
        let new_id = uuid::Uuid::new_v4().to_string();
        settings.device_id = Some(new_id.clone());
        save_sync_settings(db, &settings)?;
        Ok(new_id)
    } else {
        // Fallback: ephemeral ID (settings not yet configured)
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert!(load_sync_settings(&db).unwrap().is_none());

        let settings = SyncSettings::new(
            "https://api.example.org".to_string(),
            "secret".to_string(),
        );
        let id = save_sync_settings(&db, &settings).unwrap();
        assert!(id > 0);

        let loaded = load_sync_settings(&db).unwrap().unwrap();
        assert_eq!(loaded.server_url, "https://api.example.org");
        assert_eq!(loaded.bucket, "photos");
        assert!(loaded.enabled);

        set_sync_enabled(&db, false).unwrap();
        assert!(!load_sync_settings(&db).unwrap().unwrap().enabled);
    }

    #[test]
    fn test_device_id_is_stable_once_configured() {
        let db = Database::open_in_memory().unwrap();
        let settings = SyncSettings::new("https://x".to_string(), "k".to_string());
        save_sync_settings(&db, &settings).unwrap();

        let first = get_device_id(&db).unwrap();
        let second = get_device_id(&db).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_update_last_sync() {
        let db = Database::open_in_memory().unwrap();
        let settings = SyncSettings::new("https://x".to_string(), "k".to_string());
        save_sync_settings(&db, &settings).unwrap();

        update_last_sync(&db).unwrap();
        assert!(load_sync_settings(&db).unwrap().unwrap().last_sync.is_some());
    }
}
