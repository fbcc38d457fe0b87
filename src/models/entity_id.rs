use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Reserved prefix for locally minted identifiers. Server-assigned ids are
/// never permitted to collide with this prefix space.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Identifier of a record, tagged once at creation time.
///
/// `Temporary` ids are minted locally (ULID under the reserved prefix) while
/// the server is unreachable and stand in for a not-yet-assigned server id.
/// `Remote` ids came from the backend. The tag is decided at the single
/// parse boundary; no other code inspects id strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    Temporary(String),
    Remote(String),
}

impl EntityId {
    /// Mints a fresh temporary id.
    pub fn mint_temporary() -> Self {
        EntityId::Temporary(format!("{}{}", TEMP_ID_PREFIX, ulid::Ulid::new()))
    }

    /// Tags a raw id string. Anything under the reserved prefix is temporary.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with(TEMP_ID_PREFIX) {
            EntityId::Temporary(raw.to_string())
        } else {
            EntityId::Remote(raw.to_string())
        }
    }

    /// The storage form, as written to SQLite and into payload field maps.
    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Temporary(s) | EntityId::Remote(s) => s,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, EntityId::Temporary(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EntityId::parse(&raw))
    }
}

/// The four mirrored entity kinds of the wine collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Wine,
    Bottle,
    TastingNote,
    StorageLocation,
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Wine => "wine",
            EntityKind::Bottle => "bottle",
            EntityKind::TastingNote => "tasting_note",
            EntityKind::StorageLocation => "storage_location",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wine" => Some(EntityKind::Wine),
            "bottle" => Some(EntityKind::Bottle),
            "tasting_note" => Some(EntityKind::TastingNote),
            "storage_location" => Some(EntityKind::StorageLocation),
            _ => None,
        }
    }

    /// Local table name; also the collection name on the remote side.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Wine => "wines",
            EntityKind::Bottle => "bottles",
            EntityKind::TastingNote => "tasting_notes",
            EntityKind::StorageLocation => "storage_locations",
        }
    }

    pub fn all() -> &'static [EntityKind] {
        static ALL: [EntityKind; 4] = [
            EntityKind::Wine,
            EntityKind::Bottle,
            EntityKind::TastingNote,
            EntityKind::StorageLocation,
        ];
        &ALL
    }

    /// Foreign-key fields this kind carries, with the kind they reference.
    /// These are the fields identifier reconciliation rewrites.
    pub fn foreign_keys(&self) -> &'static [(&'static str, EntityKind)] {
        match self {
            EntityKind::Bottle => &[
                ("wine_id", EntityKind::Wine),
                ("location_id", EntityKind::StorageLocation),
            ],
            EntityKind::TastingNote => &[("wine_id", EntityKind::Wine)],
            _ => &[],
        }
    }

    /// The field holding a photo reference, for kinds that carry one.
    pub fn photo_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Wine | EntityKind::Bottle => Some("photo_path"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_temporary_is_prefixed() {
        let id = EntityId::mint_temporary();
        assert!(id.is_temporary());
        assert!(id.as_str().starts_with(TEMP_ID_PREFIX));
    }

    #[test]
    fn test_parse_tags_by_prefix() {
        assert!(EntityId::parse("tmp-01ABC").is_temporary());
        assert!(!EntityId::parse("srv-42").is_temporary());
        assert!(!EntityId::parse("01ABC").is_temporary());
    }

    #[test]
    fn test_storage_roundtrip() {
        let id = EntityId::mint_temporary();
        assert_eq!(EntityId::parse(id.as_str()), id);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id = EntityId::parse("srv-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"srv-42\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::from_str(kind.as_str()), Some(*kind));
        }
        assert_eq!(EntityKind::from_str("cork"), None);
    }
}
