use crate::client::ClientConfig;
use crate::event::TraceTelemetry;
use std::fmt::Debug;
use thiserror::Error;

/// Errors reported by a [`Transport`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Writing the batch failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Encoding the batch failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// The transport was used after shutdown.
    #[error("transport is already shut down")]
    AlreadyShutdown,
}

/// Delivers batches of telemetry items for a [`BatchClient`].
///
/// Transports are owned by the client's dispatch thread, so they are only
/// ever called from one thread at a time.
///
/// [`BatchClient`]: crate::batch::BatchClient
pub trait Transport: Send + Debug + 'static {
    /// Delivers one batch. Never called with an empty batch.
    fn send(&mut self, config: &ClientConfig, batch: &[TraceTelemetry])
        -> Result<(), TransportError>;

    /// Releases the transport's resources. Called once, after the last batch.
    fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
