use std::collections::{HashMap, HashSet};

use mapscan_core::ContentHash;
use sqlx::PgConnection;

use crate::Result;

/// The delta query of spec.md §4.3 step 5: given every hash a scan's
/// per-map extraction touched (base-level and synthesised LOD), return
/// which are already stored along with their recorded `tile_size`. The
/// caller computes the missing set as a plain set difference.
pub async fn fetch_known(tx: &mut PgConnection, hashes: &[ContentHash]) -> Result<HashMap<ContentHash, i16>> {
    if hashes.is_empty() {
        return Ok(HashMap::new());
    }
    let keys: Vec<Vec<u8>> = hashes.iter().map(|h| h.as_bytes().to_vec()).collect();
    let rows: Vec<(Vec<u8>, i16)> =
        sqlx::query_as("SELECT hash, tile_size FROM tiles WHERE hash = ANY($1)").bind(&keys).fetch_all(&mut *tx).await?;
    Ok(rows
        .into_iter()
        .filter_map(|(hash, size)| {
            let bytes: [u8; 16] = hash.try_into().ok()?;
            Some((ContentHash::from_bytes(bytes), size))
        })
        .collect())
}

pub fn missing(all: &HashSet<ContentHash>, known: &HashMap<ContentHash, i16>) -> Vec<ContentHash> {
    all.iter().filter(|h| !known.contains_key(*h)).copied().collect()
}

/// The tile-write consumer's batched insert (spec.md §5: "drains in
/// batches of 50 and is the only writer to the `tiles` table for the
/// duration of a scan"). A primary-key conflict silently coalesces
/// concurrent writers (spec.md §3 "Ownership").
pub async fn insert_batch(tx: &mut PgConnection, batch: &[(ContentHash, i16)]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let hashes: Vec<Vec<u8>> = batch.iter().map(|(h, _)| h.as_bytes().to_vec()).collect();
    let sizes: Vec<i16> = batch.iter().map(|(_, s)| *s).collect();
    sqlx::query(
        "INSERT INTO tiles (hash, tile_size) SELECT * FROM UNNEST($1::bytea[], $2::smallint[]) \
         ON CONFLICT (hash) DO NOTHING",
    )
    .bind(&hashes)
    .bind(&sizes)
    .execute(&mut *tx)
    .await?;
    Ok(())
}
