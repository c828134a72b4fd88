use crate::error::DbError;
use events::CHANGE_CHANNELS;
use sqlx::postgres::PgListener;

/// A live stream of change notifications from the indexer's triggers.
///
/// Wraps a dedicated `LISTEN` connection subscribed to every channel in
/// [`events::CHANGE_CHANNELS`]. The dispatcher owns the single instance and
/// decodes each `(channel, payload)` pair into a typed change event.
pub struct ChangeStream {
    listener: PgListener,
}

impl ChangeStream {
    /// Opens the listening connection and subscribes to the change channels.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let mut listener = PgListener::connect(database_url).await?;
        listener.listen_all(CHANGE_CHANNELS).await?;
        tracing::info!(channels = ?CHANGE_CHANNELS, "listening for change notifications");
        Ok(Self { listener })
    }

    /// Waits for the next notification.
    ///
    /// `PgListener` reconnects transparently after a dropped connection, so
    /// an `Err` here is a fatal transport failure, not a transient blip.
    pub async fn recv(&mut self) -> Result<(String, String), DbError> {
        let notification = self.listener.recv().await?;
        Ok((
            notification.channel().to_string(),
            notification.payload().to_string(),
        ))
    }
}
