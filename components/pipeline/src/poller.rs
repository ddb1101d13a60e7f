//! Build/Product Poller (C1, spec.md §4.1): polls the version oracle on
//! an interval, and for every product whose glob matches (and exclude
//! glob doesn't), upserts the build/product/source/pending-scan rows for
//! every version row discovered this tick. All of it runs inside a
//! single transaction per tick, so a crash mid-tick leaves no product
//! half-upserted.

use std::sync::Arc;

use mapscan_core::{ReleaseId, ScanError, Settings};
use mapscan_db::Db;
use mapscan_resolver::{ResolverError, VersionOracle};
use tokio::sync::Mutex;
use wildmatch::WildMatch;

use crate::events::{Event, EventLog};

pub struct PollDeps {
    pub db: Db,
    pub oracle: VersionOracle,
    pub events: Arc<EventLog>,
    pub settings: Settings,
    /// The oracle's advertised sequence number as of the last tick that
    /// actually did work (spec.md §4.1 "short-circuit when the sequence
    /// number hasn't advanced"). `None` before the first tick.
    last_sequence: Mutex<Option<u64>>,
}

impl PollDeps {
    pub fn new(db: Db, oracle: VersionOracle, events: Arc<EventLog>, settings: Settings) -> Self {
        PollDeps { db, oracle, events, settings, last_sequence: Mutex::new(None) }
    }
}

/// Run one poll tick. Returns the number of product/region rows that
/// were upserted (`0` both when the oracle is unreachable-but-tolerated
/// and when the sequence number short-circuits the tick).
pub async fn poll_once(deps: &PollDeps) -> Result<usize, ScanError> {
    let summary = deps.oracle.summary().await.map_err(|e| ScanError::Fatal(format!("version oracle: {e}")))?;

    {
        let mut last = deps.last_sequence.lock().await;
        if *last == Some(summary.sequence_number) {
            return Ok(0);
        }
    }

    let includes: Vec<WildMatch> = deps.settings.product_globs.iter().map(|g| WildMatch::new(g)).collect();
    let excludes: Vec<WildMatch> = deps.settings.product_excludes.iter().map(|g| WildMatch::new(g)).collect();

    let mut upserted = 0usize;
    let mut tx = deps.db.pool().begin().await.map_err(|e| ScanError::Database(e.to_string()))?;

    for product in &summary.products {
        if !includes.iter().any(|m| m.matches(product)) {
            continue;
        }
        if excludes.iter().any(|m| m.matches(product)) {
            continue;
        }

        let versions = match deps.oracle.versions(product).await {
            Ok(versions) => versions,
            Err(ResolverError::NotFound) => {
                deps.events.emit(Event::ProductNotFound { product_name: product.to_string() });
                continue;
            }
            Err(e) => return Err(ScanError::Fatal(format!("version oracle versions({product}): {e}"))),
        };

        for version in &versions {
            let release = version
                .release_id(deps.settings.release_epoch)
                .map_err(|e| ScanError::Fatal(format!("bad version row for {product}: {e}")))?;
            upsert_one(deps, &mut tx, release, product, version).await?;
            upserted += 1;
        }
    }

    tx.commit().await.map_err(|e| ScanError::Database(e.to_string()))?;
    *deps.last_sequence.lock().await = Some(summary.sequence_number);
    Ok(upserted)
}

async fn upsert_one(
    deps: &PollDeps,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    release: ReleaseId,
    product: &str,
    version: &mapscan_resolver::VersionRow,
) -> Result<(), ScanError> {
    let is_new_build = mapscan_db::builds::ensure_build(&mut **tx, release).await.map_err(|e| ScanError::Database(e.to_string()))?;
    if is_new_build {
        deps.events.emit(Event::NewBuildDiscovered { release: release.to_string() });
    }

    let regions = vec![version.region.clone()];
    let (product_row, is_new_product, newly_observed_regions) =
        mapscan_db::products::upsert_product(tx, release, product, &regions)
            .await
            .map_err(|e| ScanError::Database(e.to_string()))?;

    if is_new_product {
        deps.events.emit(Event::NewProductDiscovered { release: release.to_string(), product_name: product.to_string() });
    } else if !newly_observed_regions.is_empty() {
        deps.events.emit(Event::NewRegionsObserved {
            release: release.to_string(),
            product_name: product.to_string(),
            regions: newly_observed_regions,
        });
    }

    mapscan_db::products::upsert_product_source(
        tx,
        product_row.id,
        &version.build_config,
        &version.cdn_config,
        &version.product_config,
        &regions,
    )
    .await
    .map_err(|e| ScanError::Database(e.to_string()))?;

    mapscan_db::scans::ensure_pending(tx, product_row.id).await.map_err(|e| ScanError::Database(e.to_string()))?;

    Ok(())
}
