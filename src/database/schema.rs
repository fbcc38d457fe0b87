use rusqlite::{Connection, Result};

/// Initialisiert das vollständige Schema für den lokalen Spiegel und die
/// beiden Outbox-Tabellen.
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Enable foreign keys
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Schema version table for future migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Check if schema already exists
    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_schema(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Create the complete schema (version 1).
///
/// The four entity tables mirror the remote schema and are keyed by the id
/// as a plain string — either a server id or a `tmp-` prefixed local one.
/// Timestamps on entity rows are server-maintained and therefore nullable;
/// the local side never invents them.
fn create_schema(conn: &Connection) -> Result<()> {
    // Table: wines (catalog entries)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS wines (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            producer TEXT,
            vintage INTEGER,
            region TEXT,
            grape_variety TEXT,
            notes TEXT,
            photo_path TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wines_name ON wines(name)",
        [],
    )?;

    // Table: bottles (physical units)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bottles (
            id TEXT PRIMARY KEY,
            wine_id TEXT NOT NULL,
            location_id TEXT,
            size_ml INTEGER,
            purchase_date TEXT,
            purchase_price REAL,
            consumed INTEGER NOT NULL DEFAULT 0 CHECK(consumed IN (0,1)),
            photo_path TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bottles_wine ON bottles(wine_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bottles_location ON bottles(location_id)",
        [],
    )?;

    // Table: tasting_notes
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasting_notes (
            id TEXT PRIMARY KEY,
            wine_id TEXT NOT NULL,
            tasted_at TEXT NOT NULL,
            rating INTEGER,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasting_notes_wine ON tasting_notes(wine_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasting_notes_date ON tasting_notes(tasted_at DESC)",
        [],
    )?;

    // Table: storage_locations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS storage_locations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            capacity INTEGER,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    // Table: mutation_outbox (pending structured write operations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mutation_outbox (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            operation_id TEXT NOT NULL UNIQUE,
            kind TEXT CHECK(kind IN ('insert', 'update', 'delete')) NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            status TEXT CHECK(status IN ('pending', 'in_flight', 'synced', 'failed')) NOT NULL DEFAULT 'pending',
            last_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mutation_outbox_status ON mutation_outbox(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mutation_outbox_entity_type ON mutation_outbox(entity_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mutation_outbox_entity ON mutation_outbox(entity_id)",
        [],
    )?;

    // Trigger for updated_at in mutation_outbox
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_mutation_outbox_timestamp
         AFTER UPDATE ON mutation_outbox
         BEGIN
            UPDATE mutation_outbox SET updated_at = CURRENT_TIMESTAMP WHERE sequence = NEW.sequence;
         END",
        [],
    )?;

    // Table: photo_outbox (pending binary uploads)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photo_outbox (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            operation_id TEXT NOT NULL UNIQUE,
            owner_entity_type TEXT NOT NULL,
            owner_entity_id TEXT NOT NULL,
            binary_payload BLOB NOT NULL,
            mime_type TEXT NOT NULL,
            destination_bucket TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            status TEXT CHECK(status IN ('pending', 'uploading', 'uploaded', 'failed')) NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            resolved_remote_path TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_outbox_status ON photo_outbox(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_outbox_owner ON photo_outbox(owner_entity_id)",
        [],
    )?;

    // Trigger for updated_at in photo_outbox
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_photo_outbox_timestamp
         AFTER UPDATE ON photo_outbox
         BEGIN
            UPDATE photo_outbox SET updated_at = CURRENT_TIMESTAMP WHERE sequence = NEW.sequence;
         END",
        [],
    )?;

    // Table: sync_settings (remote backend connection settings)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            bucket TEXT NOT NULL DEFAULT 'photos',
            enabled INTEGER NOT NULL DEFAULT 1 CHECK(enabled IN (0,1)),
            last_sync TEXT,
            device_id TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Trigger for updated_at in sync_settings
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_sync_settings_timestamp
         AFTER UPDATE ON sync_settings
         BEGIN
            UPDATE sync_settings SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END",
        [],
    )?;

    Ok(())
}
