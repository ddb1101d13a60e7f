//! Relational store access (spec.md §3, §6). Grounded in *shape* on the
//! teacher's `components/store` crate (a thin wrapper around a
//! connection/pool exposing typed operations per entity) but backed by
//! Postgres via `sqlx` rather than RocksDB, since spec.md §4.2's claim
//! protocol depends on `SELECT ... FOR UPDATE SKIP LOCKED` — a relational
//! transaction primitive the teacher's KV store has no counterpart for.

pub mod builds;
pub mod compositions;
pub mod maps;
pub mod models;
pub mod products;
pub mod scans;
pub mod tiles;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Each worker process owns its own pool (spec.md §5 "pooled
        // connections with one connection per worker" — read as: no
        // pool sharing across worker processes, not a pool of size one).
        let pool = PgPoolOptions::new().max_connections(5).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Db { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wrap an already-migrated pool, for `#[sqlx::test]` harnesses that
    /// provision and migrate their own throwaway database per test.
    pub fn from_pool(pool: PgPool) -> Self {
        Db { pool }
    }
}
