use mapscan_core::ReleaseId;
use serde_json::json;
use sqlx::PgConnection;

use crate::models::MapRow;
use crate::Result;

/// Upsert a map catalogue row under the "last writer wins by release"
/// policy (spec.md §3, §9 REDESIGN FLAG): `json`/`directory`/`name` are
/// replaced only if this release is newer than what's on file;
/// `name_history` always accumulates; `first_version`/`last_version` take
/// MIN/MAX. Implemented as a single conditional `ON CONFLICT` update so
/// concurrent scanners racing on the same map id never interleave a
/// partial write (spec.md §9).
pub async fn upsert_map(
    tx: &mut PgConnection,
    map_id: i32,
    json: serde_json::Value,
    directory: &str,
    name: &str,
    release: ReleaseId,
) -> Result<()> {
    let name_history = json!({ release.as_u64().to_string(): name });
    let release_i64 = release.as_u64() as i64;

    sqlx::query(
        "INSERT INTO maps (id, json, directory, name, name_history, first_version, last_version) \
         VALUES ($1, $2, $3, $4, $5, $6, $6) \
         ON CONFLICT (id) DO UPDATE SET \
           json = CASE WHEN EXCLUDED.last_version > maps.last_version THEN EXCLUDED.json ELSE maps.json END, \
           directory = CASE WHEN EXCLUDED.last_version > maps.last_version THEN EXCLUDED.directory ELSE maps.directory END, \
           name = CASE WHEN EXCLUDED.last_version > maps.last_version THEN EXCLUDED.name ELSE maps.name END, \
           name_history = maps.name_history || EXCLUDED.name_history, \
           first_version = LEAST(maps.first_version, EXCLUDED.first_version), \
           last_version = GREATEST(maps.last_version, EXCLUDED.last_version)",
    )
    .bind(map_id)
    .bind(json)
    .bind(directory)
    .bind(name)
    .bind(name_history)
    .bind(release_i64)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

pub async fn list_all_maps(tx: &mut PgConnection) -> Result<Vec<MapRow>> {
    let rows = sqlx::query_as::<_, MapRow>(
        "SELECT id, json, directory, name, name_history, first_version, last_version, parent FROM maps ORDER BY id ASC",
    )
    .fetch_all(&mut *tx)
    .await?;
    Ok(rows)
}

pub async fn get_map(tx: &mut PgConnection, map_id: i32) -> Result<Option<MapRow>> {
    let row = sqlx::query_as::<_, MapRow>(
        "SELECT id, json, directory, name, name_history, first_version, last_version, parent FROM maps WHERE id = $1",
    )
    .bind(map_id)
    .fetch_optional(&mut *tx)
    .await?;
    Ok(row)
}

/// Upsert `(release, map_id, tiles_count, composition_hash)` into
/// `build_maps` (spec.md §4.3 step 8). Maps with no tile data get
/// `tiles = NULL, composition_hash = NULL` — "presence without imagery"
/// (spec.md §9(c)).
pub async fn upsert_build_map(
    tx: &mut PgConnection,
    release: ReleaseId,
    map_id: i32,
    tiles: Option<i16>,
    composition_hash: Option<&[u8; 16]>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO build_maps (release, map_id, tiles, composition_hash) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (release, map_id) DO UPDATE SET tiles = EXCLUDED.tiles, composition_hash = EXCLUDED.composition_hash",
    )
    .bind(release.as_u64() as i64)
    .bind(map_id)
    .bind(tiles)
    .bind(composition_hash.map(|h| h.to_vec()))
    .execute(&mut *tx)
    .await?;
    Ok(())
}
