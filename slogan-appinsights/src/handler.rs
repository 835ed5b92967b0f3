//! # Handler
//!
//! The [`Handler`] turns log records into trace telemetry items and hands
//! them to a [`TelemetryClient`].
//!
//! A handler is immutable. [`Handler::with_attrs`] and
//! [`Handler::with_group`] return new handlers sharing the same client,
//! which makes it cheap to pass a handler around with some context
//! attached:
//!
//! ```rust
//! use slogan_appinsights::{Attr, Handler, HandlerOptions, InMemoryClient, Level, Record};
//!
//! let client = InMemoryClient::default();
//! let handler = Handler::new(
//!     "InstrumentationKey=key1;IngestionEndpoint=https://example.org/",
//!     HandlerOptions::new(Level::DEBUG),
//!     client.clone(),
//! )
//! .unwrap();
//!
//! let request = handler
//!     .with_attrs(&[Attr::string("service", "billing")])
//!     .with_group("request");
//! request.handle(&Record::new(Level::INFO, "done").with_attrs([Attr::int("status", 200)]));
//!
//! let item = &client.get_tracked_items()[0];
//! assert_eq!(item.properties["service"], "billing");
//! assert_eq!(item.properties["request.status"], "200");
//! ```

use crate::attribute::{flatten_attr, Attr};
use crate::client::{ClientBuildError, ClientBuilder, ClientConfig, TelemetryClient, TRACK_PATH};
use crate::connection_string::{ConnectionString, ConnectionStringError};
use crate::event::{Properties, TraceTelemetry};
use crate::level::{Level, SeverityLevel};
use std::env;
use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Default maximum number of items in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1024;
/// Default maximum time an item waits before its batch is sent.
pub const DEFAULT_MAX_BATCH_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum level of records the handler accepts.
pub const APPLICATIONINSIGHTS_LOG_LEVEL: &str = "APPLICATIONINSIGHTS_LOG_LEVEL";
/// Maximum number of items in one batch.
pub const APPLICATIONINSIGHTS_MAX_BATCH_SIZE: &str = "APPLICATIONINSIGHTS_MAX_BATCH_SIZE";
/// Maximum time in milliseconds an item waits before its batch is sent.
pub const APPLICATIONINSIGHTS_MAX_BATCH_INTERVAL: &str = "APPLICATIONINSIGHTS_MAX_BATCH_INTERVAL";

// Time given to the client to deliver what it holds, and the time `close`
// waits for the client to report back.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while creating a [`Handler`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    /// The telemetry client could not be built.
    #[error("failed to build the telemetry client: {0}")]
    ClientBuild(#[from] ClientBuildError),
}

/// Options applied when creating a [`Handler`].
///
/// The batch settings are not used by the handler itself; they are passed
/// on to the client in its [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    level: Level,
    max_batch_size: usize,
    max_batch_interval: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        HandlerOptions {
            level: Level::INFO,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_interval: DEFAULT_MAX_BATCH_INTERVAL,
        }
    }
}

impl HandlerOptions {
    /// Default options accepting records at `level` and above.
    pub fn new(level: Level) -> Self {
        HandlerOptions {
            level,
            ..Default::default()
        }
    }

    /// Default options overridden by the `APPLICATIONINSIGHTS_LOG_LEVEL`,
    /// `APPLICATIONINSIGHTS_MAX_BATCH_SIZE` and
    /// `APPLICATIONINSIGHTS_MAX_BATCH_INTERVAL` environment variables.
    ///
    /// Values that cannot be parsed, or that are zero, are ignored.
    pub fn from_env() -> Self {
        let mut options = HandlerOptions::default();

        if let Some(level) = parse_env::<Level>(APPLICATIONINSIGHTS_LOG_LEVEL, |_| true) {
            options.level = level;
        }
        if let Some(size) = parse_env::<usize>(APPLICATIONINSIGHTS_MAX_BATCH_SIZE, |size| *size > 0)
        {
            options.max_batch_size = size;
        }
        if let Some(millis) =
            parse_env::<u64>(APPLICATIONINSIGHTS_MAX_BATCH_INTERVAL, |millis| *millis > 0)
        {
            options.max_batch_interval = Duration::from_millis(millis);
        }

        options
    }

    /// Sets the minimum level of accepted records.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the maximum number of items in one batch.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the maximum time an item waits before its batch is sent.
    pub fn with_max_batch_interval(mut self, max_batch_interval: Duration) -> Self {
        self.max_batch_interval = max_batch_interval;
        self
    }

    /// The minimum level of accepted records.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The maximum number of items in one batch.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// The maximum time an item waits before its batch is sent.
    pub fn max_batch_interval(&self) -> Duration {
        self.max_batch_interval
    }
}

fn parse_env<T: FromStr>(name: &'static str, is_valid: impl Fn(&T) -> bool) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) if is_valid(&parsed) => Some(parsed),
        _ => {
            ai_warn!(
                name: "HandlerOptions.InvalidEnvValue",
                variable = name,
                value = value.clone(),
            );
            None
        }
    }
}

/// A log record: what the application passes to [`Handler::handle`].
#[derive(Debug, Clone)]
pub struct Record {
    /// When the record was created. `None` lets the transport stamp the
    /// item instead.
    pub time: Option<SystemTime>,
    /// The record level.
    pub level: Level,
    /// The log message.
    pub message: String,
    attrs: Vec<Attr>,
}

impl Record {
    /// Creates a record stamped with the current time.
    pub fn new<M: Into<String>>(level: Level, message: M) -> Self {
        Record {
            time: Some(SystemTime::now()),
            level,
            message: message.into(),
            attrs: Vec::new(),
        }
    }

    /// Replaces the record time.
    pub fn with_time(mut self, time: Option<SystemTime>) -> Self {
        self.time = time;
        self
    }

    /// Adds attributes to the record.
    pub fn with_attrs<I: IntoIterator<Item = Attr>>(mut self, attrs: I) -> Self {
        self.add_attrs(attrs);
        self
    }

    /// Adds attributes to the record.
    pub fn add_attrs<I: IntoIterator<Item = Attr>>(&mut self, attrs: I) {
        self.attrs.extend(attrs);
    }

    /// The record attributes, in the order they were added.
    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }
}

struct HandlerState {
    client: Arc<dyn TelemetryClient>,
    level: Level,
    // Empty, or ends with a period.
    key_prefix: String,
    attributes: Properties,
}

/// Converts log records into trace telemetry items.
///
/// Cloning a handler is cheap; clones share everything, including identity
/// as reported by [`Handler::ptr_eq`].
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerState>,
}

impl Debug for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("level", &self.inner.level)
            .field("key_prefix", &self.inner.key_prefix)
            .field("attributes", &self.inner.attributes)
            .field("client", &self.inner.client)
            .finish()
    }
}

impl Handler {
    /// Creates a handler sending to the endpoint named by
    /// `connection_string`, through the client built by `client_builder`.
    pub fn new<B: ClientBuilder>(
        connection_string: &str,
        options: HandlerOptions,
        client_builder: B,
    ) -> Result<Self, HandlerError> {
        let connection_string = ConnectionString::parse(connection_string)?;

        let config = ClientConfig {
            instrumentation_key: connection_string.instrumentation_key().to_string(),
            endpoint_url: connection_string.submission_url(TRACK_PATH),
            max_batch_size: options.max_batch_size,
            max_batch_interval: options.max_batch_interval,
        };
        ai_debug!(
            name: "Handler.BuildingClient",
            endpoint_url = config.endpoint_url.as_str().to_string(),
            max_batch_size = config.max_batch_size,
            interval_in_millisecs = config.max_batch_interval.as_millis(),
        );
        let client = client_builder.build(config)?;

        Ok(Handler {
            inner: Arc::new(HandlerState {
                client: Arc::new(client),
                level: options.level,
                key_prefix: String::new(),
                attributes: Properties::new(),
            }),
        })
    }

    /// Returns `true` if records at `level` are handled.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.inner.level
    }

    /// Converts `record` into a trace telemetry item and submits it.
    ///
    /// Records below the handler level are ignored. Never fails: values
    /// that cannot be formatted are degraded to a descriptive string, and
    /// delivery problems are the client's to report.
    pub fn handle(&self, record: &Record) {
        if !self.enabled(record.level) {
            return;
        }

        let state = &self.inner;
        let mut item = TraceTelemetry::new(
            record.message.as_str(),
            SeverityLevel::from_level(record.level),
        );
        item.timestamp = record.time;
        item.properties = state.attributes.clone();
        for attr in record.attrs() {
            flatten_attr(&mut item.properties, &state.key_prefix, attr);
        }

        state.client.track(item);
    }

    /// Returns a handler whose items also carry `attrs`, qualified by the
    /// current group. Returns this handler when `attrs` is empty.
    pub fn with_attrs(&self, attrs: &[Attr]) -> Handler {
        if attrs.is_empty() {
            return self.clone();
        }

        let state = &self.inner;
        let mut attributes = state.attributes.clone();
        for attr in attrs {
            flatten_attr(&mut attributes, &state.key_prefix, attr);
        }

        Handler {
            inner: Arc::new(HandlerState {
                client: state.client.clone(),
                level: state.level,
                key_prefix: state.key_prefix.clone(),
                attributes,
            }),
        }
    }

    /// Returns a handler qualifying the keys of attributes added from now
    /// on with `name`. Returns this handler when `name` is empty.
    pub fn with_group(&self, name: &str) -> Handler {
        if name.is_empty() {
            return self.clone();
        }

        let state = &self.inner;
        Handler {
            inner: Arc::new(HandlerState {
                client: state.client.clone(),
                level: state.level,
                key_prefix: format!("{}{name}.", state.key_prefix),
                attributes: state.attributes.clone(),
            }),
        }
    }

    /// Closes the client, waiting for buffered items to be delivered.
    ///
    /// The client gets 10 seconds to deliver, and the call returns after
    /// 30 seconds at the latest. Items not delivered by then are lost.
    /// Returns `true` when everything was delivered.
    ///
    /// Closing affects every handler derived from the same root.
    pub fn close(&self) -> bool {
        let signal = self.inner.client.close(CLOSE_FLUSH_TIMEOUT);
        let delivered = signal.wait(CLOSE_WAIT_TIMEOUT);
        if !delivered {
            ai_warn!(name: "Handler.Close.Incomplete");
        }
        delivered
    }

    /// Returns `true` if both handlers are the same instance.
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
