use mapscan_core::ReleaseId;
use sqlx::{Executor, Postgres};

use crate::models::BuildRow;
use crate::Result;

/// Insert-if-absent on R (spec.md §4.1 step 1). Returns `true` if this
/// call inserted a new row (used by the poller to decide whether to emit
/// a "new build discovered" event).
pub async fn ensure_build<'e, E>(executor: E, release: ReleaseId) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "INSERT INTO builds (id, version) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(release.as_u64() as i64)
    .bind(release.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_build<'e, E>(executor: E, release: ReleaseId) -> Result<Option<BuildRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, BuildRow>("SELECT id, version, first_seen FROM builds WHERE id = $1")
        .bind(release.as_u64() as i64)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}
