use crate::client::{ClientBuildError, ClientBuilder, ClientConfig, CloseSignal, TelemetryClient};
use crate::event::TraceTelemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A telemetry client that keeps tracked items in memory.
///
/// Useful for testing and debugging. The client is its own
/// [`ClientBuilder`]: clones share the same storage, so a clone handed to
/// [`Handler::new`] can be inspected afterwards through the original.
///
/// # Example
/// ```
/// use slogan_appinsights::{Attr, Handler, HandlerOptions, InMemoryClient, Level, Record};
///
/// let client = InMemoryClient::default();
/// let handler = Handler::new(
///     "InstrumentationKey=key1;IngestionEndpoint=https://example.org/",
///     HandlerOptions::default(),
///     client.clone(),
/// )
/// .unwrap();
///
/// handler.handle(&Record::new(Level::INFO, "hello").with_attrs([Attr::int("x", 1)]));
///
/// let items = client.get_tracked_items();
/// assert_eq!(items[0].message, "hello");
/// assert_eq!(items[0].properties["x"], "1");
/// ```
///
/// [`Handler::new`]: crate::Handler::new
#[derive(Clone, Debug)]
pub struct InMemoryClient {
    items: Arc<Mutex<Vec<TraceTelemetry>>>,
    config: Arc<Mutex<Option<ClientConfig>>>,
    is_closed: Arc<AtomicBool>,
    close_result: bool,
}

impl Default for InMemoryClient {
    fn default() -> Self {
        InMemoryClient {
            items: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(Mutex::new(None)),
            is_closed: Arc::new(AtomicBool::new(false)),
            close_result: true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryClient {
    /// Sets what closing the client reports, `true` unless changed.
    pub fn with_close_result(mut self, delivered: bool) -> Self {
        self.close_result = delivered;
        self
    }

    /// Returns the items tracked so far, in tracking order.
    pub fn get_tracked_items(&self) -> Vec<TraceTelemetry> {
        lock(&self.items).clone()
    }

    /// Returns the configuration the client was built with, if it was built.
    pub fn config(&self) -> Option<ClientConfig> {
        lock(&self.config).clone()
    }

    /// Returns `true` once the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Forgets every tracked item.
    pub fn reset(&self) {
        lock(&self.items).clear();
    }
}

impl TelemetryClient for InMemoryClient {
    fn track(&self, item: TraceTelemetry) {
        if self.is_closed() {
            ai_debug!(name: "InMemoryClient.Track.AfterClose");
            return;
        }
        lock(&self.items).push(item);
    }

    fn close(&self, _timeout: Duration) -> CloseSignal {
        self.is_closed.store(true, Ordering::SeqCst);
        CloseSignal::ready(self.close_result)
    }
}

impl ClientBuilder for InMemoryClient {
    type Client = InMemoryClient;

    fn build(self, config: ClientConfig) -> Result<InMemoryClient, ClientBuildError> {
        *lock(&self.config) = Some(config);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::SeverityLevel;

    fn config() -> ClientConfig {
        ClientConfig {
            instrumentation_key: "key1".into(),
            endpoint_url: "https://example.org/v2/track".parse().unwrap(),
            max_batch_size: 10,
            max_batch_interval: Duration::from_secs(1),
        }
    }

    #[test]
    fn clones_share_storage() {
        let client = InMemoryClient::default();
        let built = client.clone().build(config()).unwrap();

        built.track(TraceTelemetry::new("a", SeverityLevel::Information));

        assert_eq!(client.get_tracked_items().len(), 1);
        assert_eq!(client.config(), Some(config()));

        client.reset();
        assert!(built.get_tracked_items().is_empty());
    }

    #[test]
    fn close_reports_configured_result() {
        let client = InMemoryClient::default();
        assert!(client.close(Duration::ZERO).wait(Duration::ZERO));
        assert!(client.is_closed());

        client.track(TraceTelemetry::new("late", SeverityLevel::Error));
        assert!(client.get_tracked_items().is_empty());

        let failing = InMemoryClient::default().with_close_result(false);
        assert!(!failing.close(Duration::ZERO).wait(Duration::ZERO));
    }
}
