use mapscan_core::ScanOutcome;
use sqlx::{PgConnection, Postgres, Transaction};

use crate::models::ScanRow;
use crate::Result;

/// Insert a `pending` scan row if absent (spec.md §4.1 step 4).
pub async fn ensure_pending(tx: &mut PgConnection, product_id: i32) -> Result<()> {
    sqlx::query("INSERT INTO scans (product_id, state) VALUES ($1, 'pending') ON CONFLICT (product_id) DO NOTHING")
        .bind(product_id)
        .execute(&mut *tx)
        .await?;
    Ok(())
}

/// Explicitly reset a scan back to `pending` (spec.md §3 "a re-queued
/// scan explicitly resets to pending").
pub async fn requeue(tx: &mut PgConnection, product_id: i32) -> Result<()> {
    sqlx::query(
        "UPDATE scans SET state = 'pending', exception = NULL, encrypted_key = NULL, encrypted_maps = NULL \
         WHERE product_id = $1",
    )
    .bind(product_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// A single claimed scan, carrying the open transaction that holds its
/// row lock. Dropping without calling [`ClaimedScan::commit`] rolls the
/// transaction back and releases the claim (spec.md §5 "cancellation
/// mid-scan aborts the transaction, releasing the claim").
pub struct ClaimedScan<'a> {
    pub tx: Transaction<'a, Postgres>,
    pub product_id: i32,
    pub release: i64,
}

/// The claim protocol (spec.md §4.2): `SELECT ... FOR UPDATE SKIP LOCKED
/// LIMIT 1` against `pending` scans, ordered by release ascending (oldest
/// first). `None` if no pending scan is claimable right now.
pub async fn claim_pending<'a>(pool: &'a sqlx::PgPool) -> Result<Option<ClaimedScan<'a>>> {
    let mut tx = pool.begin().await?;
    let row: Option<(i32, i64)> = sqlx::query_as(
        "SELECT s.product_id, p.release FROM scans s \
         JOIN products p ON p.id = s.product_id \
         WHERE s.state = 'pending' \
         ORDER BY p.release ASC \
         FOR UPDATE OF s SKIP LOCKED \
         LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;

    match row {
        Some((product_id, release)) => Ok(Some(ClaimedScan { tx, product_id, release })),
        None => {
            tx.rollback().await?;
            Ok(None)
        }
    }
}

impl<'a> ClaimedScan<'a> {
    /// Record the outcome and commit, releasing the claim (spec.md §4.2).
    pub async fn commit(mut self, outcome: &ScanOutcome, scan_time_secs: f64) -> Result<()> {
        let (encrypted_key, encrypted_maps, exception) = match outcome {
            ScanOutcome::FullDecrypt => (None, None, None),
            ScanOutcome::EncryptedBuild { key_name } => (Some(key_name.clone()), None, None),
            ScanOutcome::EncryptedMapDatabase { key_name } => (Some(key_name.clone()), None, None),
            ScanOutcome::PartialDecrypt { encrypted_maps } => {
                (None, Some(serde_json::to_value(encrypted_maps).unwrap()), None)
            }
            ScanOutcome::Exception { message } => (None, None, Some(message.clone())),
        };

        sqlx::query(
            "UPDATE scans SET state = $1, last_scanned = now(), scan_time = $2, \
             exception = $3, encrypted_key = $4, encrypted_maps = $5 \
             WHERE product_id = $6",
        )
        .bind(outcome.state_name())
        .bind(scan_time_secs)
        .bind(exception)
        .bind(encrypted_key)
        .bind(encrypted_maps)
        .bind(self.product_id)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }

    /// Abort without recording an outcome; the transaction rolls back and
    /// the scan returns to `pending` for another worker to claim.
    pub async fn release(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

pub async fn get_scan<'e, E>(executor: E, product_id: i32) -> Result<Option<ScanRow>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, ScanRow>(
        "SELECT product_id, state, last_scanned, scan_time, exception, encrypted_key, encrypted_maps \
         FROM scans WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}
