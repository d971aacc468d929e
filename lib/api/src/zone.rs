use serde::{Deserialize, Serialize};

/// Zones form a tree; a zone can never become its own ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub parent_zone_id: Option<i64>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub sort_order: i64,
}

/// Fields for a zone that does not have an id yet.
#[derive(Debug, Clone, Default)]
pub struct NewZone {
    pub name: String,
    pub parent_zone_id: Option<i64>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub sort_order: i64,
}

/// What happens to the children of a deleted zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneDeleteMode {
    /// Children move up to the deleted zone's parent (or become roots).
    ReparentToGrandparent,
    /// Children become roots regardless of the deleted zone's parent.
    PromoteToRoot,
}
