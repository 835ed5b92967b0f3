//! The boundary between the handler and whatever delivers telemetry.
//!
//! The handler only needs two things from a client: accept an item without
//! blocking ([`TelemetryClient::track`]), and flush everything it holds when
//! the application shuts down ([`TelemetryClient::close`]). Batching, retry
//! and the wire format are the client's business.

use crate::event::TraceTelemetry;
use std::fmt::Debug;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Path of the ingestion endpoint that accepts telemetry items.
pub const TRACK_PATH: &str = "/v2/track";

/// Everything a client needs to know to deliver telemetry, derived from the
/// connection string and the handler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Instrumentation key stamped on every item.
    pub instrumentation_key: String,
    /// Full URL items are submitted to.
    pub endpoint_url: Url,
    /// Maximum number of items submitted in one request.
    pub max_batch_size: usize,
    /// Maximum time an item waits before its batch is submitted.
    pub max_batch_interval: Duration,
}

/// Accepts telemetry items and delivers them in the background.
pub trait TelemetryClient: Send + Sync + Debug {
    /// Queues an item for delivery.
    ///
    /// Must not block beyond local buffering and must not fail; delivery
    /// problems are the client's to report.
    fn track(&self, item: TraceTelemetry);

    /// Starts flushing every buffered item and stops accepting new ones.
    ///
    /// The client should give up delivering after `timeout`. The returned
    /// signal completes when the client is done, reporting whether every
    /// item was delivered.
    fn close(&self, timeout: Duration) -> CloseSignal;
}

/// Errors that can occur while building a client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientBuildError {
    /// Spawning the dispatch thread failed.
    #[error("spawning the dispatch thread failed: {0}")]
    ThreadSpawnFailed(#[source] std::io::Error),

    /// Invalid configuration.
    #[error("{name}: {reason}")]
    InvalidConfig {
        /// The configuration name.
        name: &'static str,
        /// The reason the configuration is invalid.
        reason: String,
    },
}

/// Creates the client a handler submits its items to.
///
/// The builder carries whatever transport options the client needs; the
/// handler contributes the [`ClientConfig`].
pub trait ClientBuilder {
    /// The client being built.
    type Client: TelemetryClient + 'static;

    /// Builds the client.
    fn build(self, config: ClientConfig) -> Result<Self::Client, ClientBuildError>;
}

/// Completes when a client has finished closing.
#[derive(Debug)]
pub struct CloseSignal {
    receiver: Receiver<bool>,
}

/// The sending half of a [`CloseSignal`], held by the closing client.
#[derive(Debug)]
pub struct CloseNotifier {
    sender: SyncSender<bool>,
}

impl CloseSignal {
    /// Creates a pending signal and the notifier completing it.
    pub fn channel() -> (CloseNotifier, CloseSignal) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (CloseNotifier { sender }, CloseSignal { receiver })
    }

    /// Creates an already completed signal.
    pub fn ready(delivered: bool) -> Self {
        let (notifier, signal) = CloseSignal::channel();
        notifier.notify(delivered);
        signal
    }

    /// Waits at most `timeout` for the client to finish.
    ///
    /// Returns `true` only if the client finished in time and reported that
    /// everything was delivered. A notifier dropped without notifying counts
    /// as a failed delivery.
    pub fn wait(self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(delivered) => delivered,
            Err(RecvTimeoutError::Timeout) => {
                ai_warn!(
                    name: "CloseSignal.Wait.Timeout",
                    timeout_in_millisecs = timeout.as_millis(),
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl CloseNotifier {
    /// Completes the signal.
    pub fn notify(self, delivered: bool) {
        let _ = self.sender.send(delivered);
    }
}
