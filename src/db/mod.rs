//! Postgres pool setup and schema migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// The worker touches the database in short bursts: a handful of record
/// updates per job plus one progress write per assembled chunk. A small
/// pool with a tight acquire timeout surfaces contention as an error
/// instead of silently queueing work behind it.
const MAX_CONNECTIONS: u32 = 8;
const MIN_CONNECTIONS: u32 = 1;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Recycle idle connections inside common pooler/LB idle cutoffs.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(MIN_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Apply everything under `migrations/`. The worker owns the schema; it
/// migrates on startup before polling begins.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
