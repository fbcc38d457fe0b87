use crate::database::Database;
use crate::error::SyncError;
use crate::models::{EntityId, EntityKind, Record};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Row};
use serde_json::Value;

/// Storage class of a mirrored column, used to map between SQLite values
/// and JSON field values (SQLite has no boolean type).
#[derive(Clone, Copy)]
enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
}

/// Domain columns per entity table, in declaration order. The id and the
/// two server timestamps are handled separately.
fn columns(kind: EntityKind) -> &'static [(&'static str, ColumnType)] {
    use ColumnType::*;
    match kind {
        EntityKind::Wine => &[
            ("name", Text),
            ("producer", Text),
            ("vintage", Integer),
            ("region", Text),
            ("grape_variety", Text),
            ("notes", Text),
            ("photo_path", Text),
        ],
        EntityKind::Bottle => &[
            ("wine_id", Text),
            ("location_id", Text),
            ("size_ml", Integer),
            ("purchase_date", Text),
            ("purchase_price", Real),
            ("consumed", Boolean),
            ("photo_path", Text),
        ],
        EntityKind::TastingNote => &[
            ("wine_id", Text),
            ("tasted_at", Text),
            ("rating", Integer),
            ("notes", Text),
        ],
        EntityKind::StorageLocation => &[
            ("name", Text),
            ("description", Text),
            ("capacity", Integer),
        ],
    }
}

/// Tables holding a foreign key onto `target`, with the column name.
/// Identifier reconciliation rewrites these alongside the row itself.
fn referencing_columns(target: EntityKind) -> Vec<(EntityKind, &'static str)> {
    let mut refs = Vec::new();
    for kind in EntityKind::all() {
        for (field, referenced) in kind.foreign_keys() {
            if *referenced == target {
                refs.push((*kind, *field));
            }
        }
    }
    refs
}

fn json_to_sql(value: Option<&Value>, ty: ColumnType) -> SqlValue {
    let Some(value) = value else {
        // Absent booleans take the column default
        return match ty {
            ColumnType::Boolean => SqlValue::Integer(0),
            _ => SqlValue::Null,
        };
    };
    match (value, ty) {
        (Value::Null, ColumnType::Boolean) => SqlValue::Integer(0),
        (Value::Null, _) => SqlValue::Null,
        (Value::Bool(b), _) => SqlValue::Integer(*b as i64),
        (Value::Number(n), ColumnType::Real) => {
            SqlValue::Real(n.as_f64().unwrap_or(0.0))
        }
        (Value::Number(n), _) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        (Value::String(s), _) => SqlValue::Text(s.clone()),
        (other, _) => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: SqlValue, ty: ColumnType) -> Result<Value, String> {
    match (value, ty) {
        (SqlValue::Null, _) => Ok(Value::Null),
        (SqlValue::Integer(i), ColumnType::Boolean) => Ok(Value::Bool(i != 0)),
        (SqlValue::Integer(i), _) => Ok(Value::from(i)),
        (SqlValue::Real(f), _) => Ok(Value::from(f)),
        (SqlValue::Text(s), _) => Ok(Value::String(s)),
        (SqlValue::Blob(_), _) => Err("unexpected blob value".to_string()),
    }
}

fn insert_sql(kind: EntityKind) -> String {
    let cols = columns(kind);
    let names: Vec<&str> = cols.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = (1..=cols.len() + 3).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT OR REPLACE INTO {} (id, {}, created_at, updated_at) VALUES ({})",
        kind.table(),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn select_sql(kind: EntityKind) -> String {
    let names: Vec<&str> = columns(kind).iter().map(|(name, _)| *name).collect();
    format!(
        "SELECT id, {}, created_at, updated_at FROM {}",
        names.join(", "),
        kind.table()
    )
}

fn record_params(kind: EntityKind, record: &Record) -> Vec<SqlValue> {
    let cols = columns(kind);
    let mut values = Vec::with_capacity(cols.len() + 3);
    values.push(SqlValue::Text(record.id.as_str().to_string()));
    for (name, ty) in cols {
        values.push(json_to_sql(record.fields.get(*name), *ty));
    }
    values.push(match &record.created_at {
        Some(ts) => SqlValue::Text(ts.clone()),
        None => SqlValue::Null,
    });
    values.push(match &record.updated_at {
        Some(ts) => SqlValue::Text(ts.clone()),
        None => SqlValue::Null,
    });
    values
}

fn row_to_record(kind: EntityKind, row: &Row) -> Result<Record, String> {
    let cols = columns(kind);
    let raw_id: String = row.get(0).map_err(|e| e.to_string())?;
    let mut fields = serde_json::Map::new();
    for (i, (name, ty)) in cols.iter().enumerate() {
        let value: SqlValue = row.get(1 + i).map_err(|e| e.to_string())?;
        fields.insert((*name).to_string(), sql_to_json(value, *ty)?);
    }
    let created_at: Option<String> = row.get(1 + cols.len()).map_err(|e| e.to_string())?;
    let updated_at: Option<String> = row.get(2 + cols.len()).map_err(|e| e.to_string())?;

    Ok(Record {
        id: EntityId::parse(&raw_id),
        created_at,
        updated_at,
        fields,
    })
}

/// Persistent, typed, per-entity-kind mirror of the remote schema.
///
/// Serves all reads while the network is unavailable. Writes are idempotent
/// under the `(kind, id)` key; `rekey` swaps a temporary id for the server
/// id atomically from a reader's perspective.
#[derive(Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>, SyncError> {
        self.db.with_conn(|conn| {
            let sql = format!("{} WHERE id = ?1", select_sql(kind));
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id.as_str()])?;
            match rows.next()? {
                Some(row) => match row_to_record(kind, row) {
                    Ok(record) => Ok(Some(record)),
                    Err(e) => Err(SyncError::LocalCorruption(format!(
                        "{} row {}: {}",
                        kind.as_str(),
                        id,
                        e
                    ))),
                },
                None => Ok(None),
            }
        })
    }

    /// Inserts or replaces the row. A repeated put with identical content
    /// is a no-op in effect.
    pub fn put(&self, kind: EntityKind, record: &Record) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                &insert_sql(kind),
                params_from_iter(record_params(kind, record)),
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, kind: EntityKind, id: &EntityId) -> Result<(), SyncError> {
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                params![id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Loads all rows of a kind and filters them with the predicate.
    /// Corrupt rows are logged and skipped, as a cache miss would be.
    pub fn query(
        &self,
        kind: EntityKind,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>, SyncError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&select_sql(kind))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_record(kind, row) {
                    Ok(record) => {
                        if predicate(&record) {
                            out.push(record);
                        }
                    }
                    Err(e) => log::warn!("Skipping corrupt {} row: {}", kind.as_str(), e),
                }
            }
            Ok(out)
        })
    }

    /// Replaces the row stored under `old_id` with the authoritative record
    /// (carrying the server id) and rewrites every foreign-key column that
    /// referenced the old id. Runs in one transaction, so a concurrent
    /// reader observes either the old row or the new one, never neither.
    pub fn rekey(
        &self,
        kind: EntityKind,
        old_id: &EntityId,
        authoritative: &Record,
    ) -> Result<(), SyncError> {
        self.db.with_tx(|tx| {
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                params![old_id.as_str()],
            )?;
            tx.execute(
                &insert_sql(kind),
                params_from_iter(record_params(kind, authoritative)),
            )?;
            for (ref_kind, column) in referencing_columns(kind) {
                tx.execute(
                    &format!(
                        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                        ref_kind.table(),
                        column,
                        column
                    ),
                    params![authoritative.id.as_str(), old_id.as_str()],
                )?;
            }
            Ok(())
        })
    }

    /// Writes a photo reference into the owning record's photo field.
    pub fn set_photo_reference(
        &self,
        kind: EntityKind,
        id: &EntityId,
        path: &str,
    ) -> Result<(), SyncError> {
        let field = kind.photo_field().ok_or_else(|| {
            SyncError::Validation(format!("{} records carry no photo", kind.as_str()))
        })?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE {} SET {} = ?1 WHERE id = ?2", kind.table(), field),
                params![path, id.as_str()],
            )?;
            Ok(())
        })
    }
}
