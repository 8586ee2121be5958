//! Postgres connection pool construction.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect a pool with the same defaults across every binary that opens one.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
