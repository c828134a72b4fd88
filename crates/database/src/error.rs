use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("The requested data was not found in the database.")]
    NotFound,
}
