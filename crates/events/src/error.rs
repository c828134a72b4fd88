use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Failed to serialize event message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to decode change payload on channel '{channel}': {source}")]
    Decode {
        channel: String,
        source: serde_json::Error,
    },

    #[error("Received a notification on unknown channel '{0}'")]
    UnknownChannel(String),
}
