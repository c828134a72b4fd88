use crate::error::DbError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Establishes a connection pool to the indexer's PostgreSQL database.
///
/// The pool is shared by every session handshake; the change stream opens
/// its own dedicated connection via [`crate::ChangeStream::connect`].
pub async fn connect(database_url: &str) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}
