//! Claim Dispatcher (C2, spec.md §4.2): repeatedly claims one pending
//! scan under `SELECT ... FOR UPDATE SKIP LOCKED`, runs the build scanner
//! against it, and records the outcome. The claim's transaction stays
//! open for the duration of the scan — the row lock, not a separate
//! flag, is what keeps two workers from picking up the same product
//! (spec.md §4.2, §5 "cancellation mid-scan aborts the transaction,
//! releasing the claim").

use std::time::Instant;

use mapscan_core::{ScanError, ScanOutcome};
use mapscan_db::products;

use crate::scanner::{run_scan, ScanDeps, ScanInputs};

/// Attempt one claim-and-scan cycle. Returns `true` if a pending scan was
/// claimed (whether or not it ultimately succeeded), `false` if the
/// queue was empty.
pub async fn run_once(deps: &ScanDeps) -> Result<bool, ScanError> {
    let Some(claimed) = mapscan_db::scans::claim_pending(deps.db.pool())
        .await
        .map_err(|e| ScanError::Database(e.to_string()))?
    else {
        return Ok(false);
    };

    let mut claimed = claimed;
    let product = products::get_product(&mut *claimed.tx, claimed.product_id)
        .await
        .map_err(|e| ScanError::Database(e.to_string()))?;
    let Some(product) = product else {
        // The product row disappeared between the join in claim_pending
        // and this lookup — nothing sane to scan; release the claim so
        // another worker (or a future poll) can reconcile the row.
        claimed.release().await.map_err(|e| ScanError::Database(e.to_string()))?;
        return Ok(true);
    };
    let sources = products::list_product_sources(&mut *claimed.tx, claimed.product_id)
        .await
        .map_err(|e| ScanError::Database(e.to_string()))?;

    let started = Instant::now();
    let result = run_scan(deps, ScanInputs { product, sources }).await;

    match result {
        Ok(outcome) => {
            claimed.commit(&outcome, started.elapsed().as_secs_f64()).await.map_err(|e| ScanError::Database(e.to_string()))?;
        }
        Err(e) if deps.settings.catch_scan_exceptions => {
            let outcome = ScanOutcome::Exception { message: e.to_string() };
            claimed.commit(&outcome, started.elapsed().as_secs_f64()).await.map_err(|e| ScanError::Database(e.to_string()))?;
        }
        Err(e) => {
            claimed.release().await.map_err(|e2| ScanError::Database(e2.to_string()))?;
            return Err(e);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    // `run_once` requires a live Postgres connection pool (the claim
    // protocol, the `scans`/`products` joins, and the commit path are all
    // exercised against the real schema in components/pipeline's
    // integration tests, which run against a test database). Nothing in
    // this module's logic is testable in isolation from that.
}
