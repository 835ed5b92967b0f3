//! # Batch Client
//!
//! The `BatchClient` is the reference [`TelemetryClient`]. It buffers items
//! in a bounded queue and hands them to a [`Transport`] in batches, from a
//! dedicated background thread, so that logging never waits on I/O.
//!
//! ```ascii
//!   +---------------+   +-----------------------+   +-------------+
//!   |               |   |                       |   |             |
//!   | Handler       +---> BatchClient.track()   +---> Transport   |
//!   |               |   |   (dispatch thread)   |   |             |
//!   +---------------+   +-----------------------+   +-------------+
//! ```
//!
//! A batch is sent when `max_batch_size` items are waiting, or when
//! `max_batch_interval` has passed since the previous send.

use crate::client::{
    ClientBuildError, ClientBuilder, ClientConfig, CloseNotifier, CloseSignal, TelemetryClient,
};
use crate::event::TraceTelemetry;
use crate::transport::Transport;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default maximum number of items waiting in the queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2_048;

/// Messages sent between the application threads and the dispatch thread.
#[derive(Debug)]
enum BatchMessage {
    /// Sent ONLY when the number of queued items has reached `max_batch_size`.
    SendBatch(Arc<AtomicBool>),
    /// Sends everything queued so far.
    Flush(mpsc::SyncSender<bool>),
    /// Sends everything queued so far, shuts the transport down and stops
    /// the dispatch thread.
    Close {
        deadline: Option<Instant>,
        notifier: CloseNotifier,
    },
}

/// A [`TelemetryClient`] that sends items in batches from a background
/// thread.
///
/// Items tracked after the queue is full are dropped; the count of dropped
/// items is reported when the client is closed.
///
/// ### Using a BatchClient:
///
/// ```rust
/// use slogan_appinsights::{BatchClient, Handler, HandlerOptions, StdoutTransport};
///
/// let client = BatchClient::builder(StdoutTransport::default()).with_max_queue_size(4096);
/// let handler = Handler::new(
///     "InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://example.org/",
///     HandlerOptions::default(),
///     client,
/// )
/// .unwrap();
/// handler.close();
/// ```
pub struct BatchClient {
    items_sender: SyncSender<TraceTelemetry>,
    message_sender: SyncSender<BatchMessage>,
    send_message_sent: Arc<AtomicBool>,
    current_batch_size: Arc<AtomicUsize>,
    max_batch_size: usize,
    dropped_items_count: Arc<AtomicUsize>,
    max_queue_size: usize,
    is_closed: AtomicBool,
}

impl Debug for BatchClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchClient")
            .field("max_batch_size", &self.max_batch_size)
            .field("max_queue_size", &self.max_queue_size)
            .finish()
    }
}

impl TelemetryClient for BatchClient {
    fn track(&self, item: TraceTelemetry) {
        match self.items_sender.try_send(item) {
            Ok(_) => {
                // Ask the dispatch thread for a send once a full batch is
                // waiting, unless such a request is already pending.
                if self.current_batch_size.fetch_add(1, Ordering::Relaxed) + 1
                    >= self.max_batch_size
                    && !self.send_message_sent.load(Ordering::Relaxed)
                    && !self.send_message_sent.swap(true, Ordering::Relaxed)
                {
                    if let Err(_err) = self
                        .message_sender
                        .try_send(BatchMessage::SendBatch(self.send_message_sent.clone()))
                    {
                        self.send_message_sent.store(false, Ordering::Relaxed);
                    }
                }
            }
            Err(TrySendError::Full(_)) => {
                // Only the first drop is reported here, the total is
                // reported on close.
                if self.dropped_items_count.fetch_add(1, Ordering::Relaxed) == 0 {
                    ai_warn!(
                        name: "BatchClient.ItemDroppingStarted",
                        max_queue_size = self.max_queue_size,
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                ai_warn!(name: "BatchClient.Track.AfterClose");
            }
        }
    }

    fn close(&self, timeout: Duration) -> CloseSignal {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            ai_debug!(name: "BatchClient.Close.AlreadyClosed");
            return CloseSignal::ready(false);
        }

        let dropped_items = self.dropped_items_count.load(Ordering::Relaxed);
        if dropped_items > 0 {
            ai_warn!(
                name: "BatchClient.ItemsDropped",
                dropped_items_count = dropped_items,
                max_queue_size = self.max_queue_size,
            );
        }

        let (notifier, signal) = CloseSignal::channel();
        let message = BatchMessage::Close {
            deadline: Instant::now().checked_add(timeout),
            notifier,
        };
        if let Err(err) = self.message_sender.try_send(message) {
            // The notifier is dropped with the message, which completes the
            // signal as undelivered.
            match err {
                TrySendError::Full(_) => {
                    ai_debug!(name: "BatchClient.Close.ControlChannelFull");
                }
                TrySendError::Disconnected(_) => {
                    ai_debug!(name: "BatchClient.Close.DispatchThreadGone");
                }
            }
        }
        signal
    }
}

impl BatchClient {
    /// Creates a builder sending batches through `transport`.
    pub fn builder<T: Transport>(transport: T) -> BatchClientBuilder<T> {
        BatchClientBuilder {
            transport,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    fn new<T: Transport>(
        mut transport: T,
        config: ClientConfig,
        max_queue_size: usize,
    ) -> Result<Self, ClientBuildError> {
        if config.max_batch_size == 0 {
            return Err(ClientBuildError::InvalidConfig {
                name: "max_batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        if config.max_batch_interval.is_zero() {
            return Err(ClientBuildError::InvalidConfig {
                name: "max_batch_interval",
                reason: "must be greater than zero".into(),
            });
        }

        let max_batch_size = config.max_batch_size;
        let max_queue_size = max_queue_size.max(max_batch_size);
        let (items_sender, items_receiver) = mpsc::sync_channel::<TraceTelemetry>(max_queue_size);
        let (message_sender, message_receiver) = mpsc::sync_channel::<BatchMessage>(64);
        let current_batch_size = Arc::new(AtomicUsize::new(0));
        let current_batch_size_for_thread = current_batch_size.clone();
        let dropped_items_count = Arc::new(AtomicUsize::new(0));
        let dropped_items_count_for_thread = dropped_items_count.clone();

        thread::Builder::new()
            .name("AppInsights.BatchClient".to_string())
            .spawn(move || {
                ai_debug!(
                    name: "BatchClient.ThreadStarted",
                    interval_in_millisecs = config.max_batch_interval.as_millis(),
                    max_batch_size = config.max_batch_size,
                    max_queue_size = max_queue_size,
                );
                let mut dispatcher = Dispatcher {
                    items_receiver,
                    transport: &mut transport,
                    config: &config,
                    batch: Vec::with_capacity(config.max_batch_size),
                    last_send_time: Instant::now(),
                    current_batch_size: current_batch_size_for_thread,
                };

                loop {
                    let remaining_time = config
                        .max_batch_interval
                        .checked_sub(dispatcher.last_send_time.elapsed())
                        .unwrap_or(Duration::ZERO);

                    match message_receiver.recv_timeout(remaining_time) {
                        Ok(BatchMessage::SendBatch(send_message_sent)) => {
                            // The request is handled, a new one may be sent.
                            send_message_sent.store(false, Ordering::Relaxed);
                            ai_debug!(name: "BatchClient.SendingDueToBatchSize");
                            dispatcher.send_queued(None);
                        }
                        Ok(BatchMessage::Flush(sender)) => {
                            ai_debug!(name: "BatchClient.SendingDueToFlush");
                            let delivered = dispatcher.send_queued(None);
                            let _ = sender.send(delivered);
                        }
                        Ok(BatchMessage::Close { deadline, notifier }) => {
                            ai_debug!(name: "BatchClient.SendingDueToClose");
                            let mut delivered = dispatcher.send_queued(deadline);
                            if dropped_items_count_for_thread.load(Ordering::Relaxed) > 0 {
                                delivered = false;
                            }
                            if let Err(err) = dispatcher.transport.shutdown() {
                                ai_error!(
                                    name: "BatchClient.TransportShutdownFailed",
                                    error = format!("{err}"),
                                );
                                delivered = false;
                            }
                            notifier.notify(delivered);

                            ai_debug!(
                                name: "BatchClient.ThreadExiting",
                                reason = "CloseRequested"
                            );
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            ai_debug!(name: "BatchClient.SendingDueToTimer");
                            dispatcher.send_queued(None);
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The client was dropped without being closed.
                            ai_debug!(
                                name: "BatchClient.ThreadExiting",
                                reason = "MessageSenderDisconnected"
                            );
                            break;
                        }
                    }
                }
                ai_debug!(name: "BatchClient.ThreadStopped");
            })
            .map_err(ClientBuildError::ThreadSpawnFailed)?;

        Ok(BatchClient {
            items_sender,
            message_sender,
            send_message_sent: Arc::new(AtomicBool::new(false)),
            current_batch_size,
            max_batch_size,
            dropped_items_count,
            max_queue_size,
            is_closed: AtomicBool::new(false),
        })
    }

    /// Sends every queued item and waits at most `timeout` for it to be
    /// delivered. Returns `true` if everything was delivered in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::Flush(sender)) {
            Ok(_) => receiver.recv_timeout(timeout).unwrap_or(false),
            Err(TrySendError::Full(_)) => {
                ai_debug!(name: "BatchClient.Flush.ControlChannelFull");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                ai_debug!(name: "BatchClient.Flush.AlreadyClosed");
                false
            }
        }
    }
}

/// State owned by the dispatch thread.
struct Dispatcher<'a, T: Transport> {
    items_receiver: mpsc::Receiver<TraceTelemetry>,
    transport: &'a mut T,
    config: &'a ClientConfig,
    batch: Vec<TraceTelemetry>,
    last_send_time: Instant,
    current_batch_size: Arc<AtomicUsize>,
}

impl<T: Transport> Dispatcher<'_, T> {
    /// Sends the items queued when called, in batches of at most
    /// `max_batch_size`, stopping early once `deadline` has passed.
    /// Returns `true` if every batch was delivered.
    fn send_queued(&mut self, deadline: Option<Instant>) -> bool {
        let target = self.current_batch_size.load(Ordering::Relaxed);
        let mut delivered = true;
        let mut total_sent: usize = 0;

        while total_sent < target {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                ai_warn!(
                    name: "BatchClient.DeadlineExceeded",
                    unsent_items_count = target - total_sent,
                );
                delivered = false;
                break;
            }

            while let Ok(item) = self.items_receiver.try_recv() {
                self.batch.push(item);
                if self.batch.len() == self.config.max_batch_size {
                    break;
                }
            }

            let count = self.batch.len();
            if count == 0 {
                break;
            }
            total_sent += count;
            delivered &= self.send_batch();
            self.current_batch_size.fetch_sub(count, Ordering::Relaxed);
        }

        self.last_send_time = Instant::now();
        delivered
    }

    fn send_batch(&mut self) -> bool {
        let result = self.transport.send(self.config, &self.batch);
        let count = self.batch.len();
        self.batch.clear();

        match result {
            Ok(()) => true,
            Err(err) => {
                ai_warn!(
                    name: "BatchClient.SendFailed",
                    item_count = count,
                    error = format!("{err}"),
                );
                false
            }
        }
    }
}

/// A builder for [`BatchClient`]. The transport it holds is the "transport
/// options" part of the handler configuration.
#[derive(Debug)]
pub struct BatchClientBuilder<T> {
    transport: T,
    max_queue_size: usize,
}

impl<T: Transport> BatchClientBuilder<T> {
    /// Sets the maximum number of items waiting in the queue. Values below
    /// the batch size are raised to the batch size.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }
}

impl<T: Transport> ClientBuilder for BatchClientBuilder<T> {
    type Client = BatchClient;

    fn build(self, config: ClientConfig) -> Result<BatchClient, ClientBuildError> {
        BatchClient::new(self.transport, config, self.max_queue_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::SeverityLevel;
    use crate::transport::TransportError;
    use std::sync::mpsc::{Receiver, Sender};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct TestTransport {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
        is_shutdown: Arc<AtomicBool>,
        fail: bool,
    }

    impl TestTransport {
        fn failing() -> Self {
            TestTransport {
                fail: true,
                ..Default::default()
            }
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl Transport for TestTransport {
        fn send(
            &mut self,
            _config: &ClientConfig,
            batch: &[TraceTelemetry],
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Io(std::io::Error::other("unreachable")));
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|item| item.message.clone()).collect());
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), TransportError> {
            self.is_shutdown.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Signals each send on `entered`, then waits for a token on `release`.
    /// Dropping the release sender lets every send through.
    #[derive(Debug)]
    struct BlockingTransport {
        entered: SyncSender<()>,
        release: Receiver<()>,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for BlockingTransport {
        fn send(
            &mut self,
            _config: &ClientConfig,
            batch: &[TraceTelemetry],
        ) -> Result<(), TransportError> {
            let _ = self.entered.try_send(());
            let _ = self.release.recv();
            self.delivered
                .lock()
                .unwrap()
                .extend(batch.iter().map(|item| item.message.clone()));
            Ok(())
        }
    }

    fn blocking_transport() -> (
        BlockingTransport,
        Receiver<()>,
        Sender<()>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let (entered_sender, entered) = mpsc::sync_channel(64);
        let (release, release_receiver) = mpsc::channel();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let transport = BlockingTransport {
            entered: entered_sender,
            release: release_receiver,
            delivered: delivered.clone(),
        };
        (transport, entered, release, delivered)
    }

    fn config(max_batch_size: usize, max_batch_interval: Duration) -> ClientConfig {
        ClientConfig {
            instrumentation_key: "key1".into(),
            endpoint_url: "https://example.org/v2/track".parse().unwrap(),
            max_batch_size,
            max_batch_interval,
        }
    }

    fn item(message: &str) -> TraceTelemetry {
        TraceTelemetry::new(message, SeverityLevel::Information)
    }

    #[test]
    fn close_sends_everything_in_batches() {
        let transport = TestTransport::default();
        let client = BatchClient::builder(transport.clone())
            .build(config(2, Duration::from_secs(3600)))
            .unwrap();

        for message in ["a", "b", "c", "d", "e"] {
            client.track(item(message));
        }

        assert!(client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));

        let batches = transport.batches();
        assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= 2));
        assert_eq!(batches.concat(), vec!["a", "b", "c", "d", "e"]);
        assert!(transport.is_shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn interval_triggers_send() {
        let transport = TestTransport::default();
        let client = BatchClient::builder(transport.clone())
            .build(config(100, Duration::from_millis(20)))
            .unwrap();

        client.track(item("a"));

        let started = Instant::now();
        while transport.batches().is_empty() && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(transport.batches(), vec![vec!["a".to_string()]]);
        assert!(client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
    }

    #[test]
    fn flush_sends_queued_items() {
        let transport = TestTransport::default();
        let client = BatchClient::builder(transport.clone())
            .build(config(100, Duration::from_secs(3600)))
            .unwrap();

        client.track(item("a"));
        client.track(item("b"));

        assert!(client.flush(Duration::from_secs(5)));
        assert_eq!(transport.batches().concat(), vec!["a", "b"]);
    }

    #[test]
    fn close_twice_reports_failure() {
        let client = BatchClient::builder(TestTransport::default())
            .build(config(10, Duration::from_secs(3600)))
            .unwrap();

        assert!(client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
        assert!(!client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
    }

    #[test]
    fn track_after_close_is_ignored() {
        let transport = TestTransport::default();
        let client = BatchClient::builder(transport.clone())
            .build(config(10, Duration::from_secs(3600)))
            .unwrap();

        assert!(client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
        client.track(item("late"));

        assert!(transport.batches().is_empty());
    }

    #[test]
    fn failing_transport_reports_undelivered() {
        let client = BatchClient::builder(TestTransport::failing())
            .build(config(10, Duration::from_secs(3600)))
            .unwrap();

        client.track(item("a"));

        assert!(!client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = BatchClient::builder(TestTransport::default())
            .build(config(0, Duration::from_secs(1)));
        assert!(matches!(
            result,
            Err(ClientBuildError::InvalidConfig { name: "max_batch_size", .. })
        ));

        let result =
            BatchClient::builder(TestTransport::default()).build(config(1, Duration::ZERO));
        assert!(matches!(
            result,
            Err(ClientBuildError::InvalidConfig { name: "max_batch_interval", .. })
        ));
    }

    #[test]
    fn queue_size_is_at_least_batch_size() {
        let client = BatchClient::builder(TestTransport::default())
            .with_max_queue_size(1)
            .build(config(16, Duration::from_secs(3600)))
            .unwrap();

        assert_eq!(client.max_queue_size, 16);
        assert!(client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
    }

    #[test]
    fn full_queue_drops_items() {
        let (transport, entered, release, delivered) = blocking_transport();
        let client = BatchClient::builder(transport)
            .with_max_queue_size(2)
            .build(config(1, Duration::from_secs(3600)))
            .unwrap();

        // The dispatch thread is now stuck sending the first item.
        client.track(item("first"));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        for i in 0..10 {
            client.track(item(&format!("queued {i}")));
        }
        assert_eq!(client.dropped_items_count.load(Ordering::Relaxed), 8);

        drop(release);
        assert!(!client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
        assert_eq!(
            *delivered.lock().unwrap(),
            vec!["first", "queued 0", "queued 1"]
        );
    }

    #[test]
    fn close_gives_up_after_deadline() {
        let (transport, entered, release, delivered) = blocking_transport();
        let client = BatchClient::builder(transport)
            .build(config(100, Duration::from_secs(3600)))
            .unwrap();

        thread::scope(|scope| {
            client.track(item("flushed"));
            let flush = scope.spawn(|| client.flush(Duration::from_secs(10)));

            // The dispatch thread is busy flushing while the deadline passes.
            entered.recv_timeout(Duration::from_secs(5)).unwrap();
            client.track(item("late 1"));
            client.track(item("late 2"));
            let signal = client.close(Duration::from_millis(10));
            thread::sleep(Duration::from_millis(100));

            drop(release);
            assert!(flush.join().unwrap());
            assert!(!signal.wait(Duration::from_secs(10)));
        });

        assert_eq!(*delivered.lock().unwrap(), vec!["flushed"]);
    }

    #[derive(Debug)]
    struct ShutdownFailingTransport;

    impl Transport for ShutdownFailingTransport {
        fn send(
            &mut self,
            _config: &ClientConfig,
            _batch: &[TraceTelemetry],
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), TransportError> {
            Err(TransportError::AlreadyShutdown)
        }
    }

    #[test]
    fn failing_shutdown_reports_undelivered() {
        let client = BatchClient::builder(ShutdownFailingTransport)
            .build(config(10, Duration::from_secs(3600)))
            .unwrap();

        client.track(item("a"));

        assert!(!client.close(Duration::from_secs(5)).wait(Duration::from_secs(10)));
    }
}
