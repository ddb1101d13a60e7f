use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mapscan_core::{ContentHash, ReleaseId, TileCoord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: i64,
    pub version: String,
    pub first_seen: DateTime<Utc>,
}

impl BuildRow {
    pub fn release(&self) -> ReleaseId {
        ReleaseId::from_raw(self.id as u64)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i32,
    pub release: i64,
    pub product_name: String,
    pub regions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductSourceRow {
    pub product_id: i32,
    pub config_build: String,
    pub config_cdn: String,
    pub config_product: String,
    pub regions: Vec<String>,
    pub first_seen: DateTime<Utc>,
}

/// Mirrors [`mapscan_core::ScanOutcome`] but flattened into columns, the
/// way it is actually stored (spec.md §3 scan row).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanRow {
    pub product_id: i32,
    pub state: String,
    pub last_scanned: Option<DateTime<Utc>>,
    pub scan_time: Option<f64>,
    pub exception: Option<String>,
    pub encrypted_key: Option<String>,
    pub encrypted_maps: Option<serde_json::Value>,
}

/// A small typed façade over the row-shaped map catalogue record
/// (spec.md §9 first bullet / REDESIGN FLAG): only the fields the
/// pipeline actually reasons about get named accessors, everything else
/// rides along verbatim in `json`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MapRow {
    pub id: i32,
    pub json: serde_json::Value,
    pub directory: String,
    pub name: String,
    pub name_history: serde_json::Value,
    pub first_version: i64,
    pub last_version: i64,
    pub parent: Option<i32>,
}

impl MapRow {
    pub fn wdt_file_id_column(&self) -> Option<i64> {
        self.json.get("WdtFileDataID").and_then(|v| v.as_i64()).filter(|id| *id != 0)
    }

    pub fn name_history_map(&self) -> BTreeMap<u64, String> {
        self.name_history
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| {
                        let release: u64 = k.parse().ok()?;
                        let name = v.as_str()?.to_string();
                        Some((release, name))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One row per map seen in a given release (spec.md §3 build-map
/// binding). `composition_hash` is `None` when the map had no tile data
/// in that release's filesystem (spec.md §4.3 step 8, §9(c)).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildMapRow {
    pub release: i64,
    pub map_id: i32,
    pub tiles: Option<i16>,
    pub composition_hash: Option<Vec<u8>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TileRow {
    pub hash: Vec<u8>,
    pub tile_size: i16,
    pub first_seen: DateTime<Utc>,
}

impl TileRow {
    pub fn content_hash(&self) -> Option<ContentHash> {
        let bytes: [u8; 16] = self.hash.clone().try_into().ok()?;
        Some(ContentHash::from_bytes(bytes))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompositionRow {
    pub hash: Vec<u8>,
    pub composition: serde_json::Value,
    pub tiles: i16,
    pub extents: Option<serde_json::Value>,
}

/// The in-memory composition model (spec.md §3 "Composition invariants"):
/// a map of LOD level to a map of tile coordinate to content hash, plus
/// the set of coordinates known to be missing imagery at level 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub levels: BTreeMap<u8, BTreeMap<TileCoord, ContentHash>>,
    pub missing: std::collections::BTreeSet<TileCoord>,
    pub tile_size: Option<i16>,
}

impl Composition {
    pub fn tile_count(&self) -> usize {
        self.levels.values().map(|level| level.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extents {
    pub min: (i16, i16),
    pub max: (i16, i16),
}
