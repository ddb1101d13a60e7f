use chrono::Utc;
use mapscan_core::ReleaseId;
use sqlx::PgConnection;

use crate::models::{ProductRow, ProductSourceRow};
use crate::Result;

/// Locate-or-insert the `products` row under `FOR UPDATE` (spec.md §4.1
/// step 2). If new, records the union of `regions`; if existing, appends
/// any newly seen regions preserving prior order. Returns the row and
/// whether it was newly inserted (for the poller's "new product
/// discovered" event).
/// `(row, newly_inserted, newly_observed_regions)` — the last lets the
/// poller distinguish "brand new product" from "known product, new
/// region" without a second query (spec.md §4.1 step 2 events).
pub async fn upsert_product(
    tx: &mut PgConnection,
    release: ReleaseId,
    product_name: &str,
    regions: &[String],
) -> Result<(ProductRow, bool, Vec<String>)> {
    let existing = sqlx::query_as::<_, ProductRow>(
        "SELECT id, release, product_name, regions, created_at FROM products \
         WHERE release = $1 AND product_name = $2 FOR UPDATE",
    )
    .bind(release.as_u64() as i64)
    .bind(product_name)
    .fetch_optional(&mut *tx)
    .await?;

    match existing {
        Some(mut row) => {
            let mut newly_observed = Vec::new();
            for region in regions {
                if !row.regions.contains(region) {
                    row.regions.push(region.clone());
                    newly_observed.push(region.clone());
                }
            }
            if !newly_observed.is_empty() {
                sqlx::query("UPDATE products SET regions = $1 WHERE id = $2")
                    .bind(&row.regions)
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
            }
            Ok((row, false, newly_observed))
        }
        None => {
            let row = sqlx::query_as::<_, ProductRow>(
                "INSERT INTO products (release, product_name, regions) VALUES ($1, $2, $3) \
                 RETURNING id, release, product_name, regions, created_at",
            )
            .bind(release.as_u64() as i64)
            .bind(product_name)
            .bind(regions)
            .fetch_one(&mut *tx)
            .await?;
            Ok((row, true, Vec::new()))
        }
    }
}

/// Upsert a config-triple into `product_sources` with `first_seen = now`
/// only on first insert (spec.md §4.1 step 3).
pub async fn upsert_product_source(
    tx: &mut PgConnection,
    product_id: i32,
    config_build: &str,
    config_cdn: &str,
    config_product: &str,
    regions: &[String],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO product_sources (product_id, config_build, config_cdn, config_product, regions, first_seen) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (product_id, config_build, config_cdn, config_product) DO NOTHING",
    )
    .bind(product_id)
    .bind(config_build)
    .bind(config_cdn)
    .bind(config_product)
    .bind(regions)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// Fetch a single `products` row by id, for the dispatcher turning a
/// claimed `(product_id, release)` pair back into a full [`ProductRow`].
pub async fn get_product<'e, E>(executor: E, product_id: i32) -> Result<Option<ProductRow>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let row = sqlx::query_as::<_, ProductRow>(
        "SELECT id, release, product_name, regions, created_at FROM products WHERE id = $1",
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// All source configs observed for a product, ordered by first sighting
/// so the build scanner's "pick the first" policy (spec.md §9 Open
/// Question (a)) is well defined and deterministic.
pub async fn list_product_sources(tx: &mut PgConnection, product_id: i32) -> Result<Vec<ProductSourceRow>> {
    let rows = sqlx::query_as::<_, ProductSourceRow>(
        "SELECT product_id, config_build, config_cdn, config_product, regions, first_seen \
         FROM product_sources WHERE product_id = $1 ORDER BY first_seen ASC",
    )
    .bind(product_id)
    .fetch_all(&mut *tx)
    .await?;
    Ok(rows)
}
