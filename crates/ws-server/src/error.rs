use crate::jobs::JobError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Event serialization error: {0}")]
    Events(#[from] events::EventsError),

    #[error("Fossil job error: {0}")]
    Job(#[from] JobError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Write deadline of {}s exceeded", crate::handlers::WRITE_TIMEOUT.as_secs())]
    WriteTimeout,

    #[error("WebSocket transport error: {0}")]
    Socket(#[from] axum::Error),
}
