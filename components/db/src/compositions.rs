use mapscan_core::ContentHash;
use sqlx::PgConnection;

use crate::models::{Composition, Extents};
use crate::Result;

/// A fully built per-map composition, ready to publish (spec.md §4.3
/// step 8): the deterministic hash (§4.3.2), the model itself, the tile
/// count and optional extents (§4.3.3).
pub struct PublishedComposition {
    pub hash: ContentHash,
    pub composition: Composition,
    pub extents: Option<Extents>,
}

/// Insert into `compositions` keyed by hash (ignore on conflict — two
/// maps, or two releases of the same map, that produce byte-identical
/// tile layouts collapse onto one row, spec.md §8 "Dedup property").
pub async fn insert_composition(tx: &mut PgConnection, published: &PublishedComposition) -> Result<()> {
    let tiles = published.composition.tile_count() as i16;
    sqlx::query(
        "INSERT INTO compositions (hash, composition, tiles, extents) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (hash) DO NOTHING",
    )
    .bind(published.hash.as_bytes().as_slice())
    .bind(serde_json::to_value(&published.composition).expect("Composition serializes"))
    .bind(tiles)
    .bind(published.extents.map(|e| serde_json::to_value(e).expect("Extents serializes")))
    .execute(&mut *tx)
    .await?;
    Ok(())
}

pub async fn link_product(tx: &mut PgConnection, hash: &ContentHash, product_id: i32) -> Result<()> {
    sqlx::query(
        "INSERT INTO composition_products (composition_hash, product_id) VALUES ($1, $2) \
         ON CONFLICT (composition_hash, product_id) DO NOTHING",
    )
    .bind(hash.as_bytes().as_slice())
    .bind(product_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}
