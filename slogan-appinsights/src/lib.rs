//! Structured logging for Azure Application Insights.
//!
//! This crate converts log records into Application Insights trace
//! telemetry. A [`Handler`] takes records made of a message, a [`Level`]
//! and structured [`Attr`]ibutes, flattens nested attribute groups into
//! dotted property keys, maps the level onto a [`SeverityLevel`] and hands
//! the resulting [`TraceTelemetry`] to a [`TelemetryClient`].
//!
//! # Getting Started
//!
//! ```no_run
//! use slogan_appinsights::{
//!     Attr, BatchClient, ConnectionString, Handler, HandlerOptions, Level, Record,
//!     StdoutTransport, APPLICATIONINSIGHTS_CONNECTION_STRING,
//! };
//!
//! let connection_string = std::env::var(APPLICATIONINSIGHTS_CONNECTION_STRING).unwrap();
//! let handler = Handler::new(
//!     &connection_string,
//!     HandlerOptions::from_env(),
//!     BatchClient::builder(StdoutTransport::default()),
//! )
//! .unwrap();
//!
//! let handler = handler.with_group("http");
//! handler.handle(
//!     &Record::new(Level::INFO, "request served").with_attrs([
//!         Attr::string("method", "GET"),
//!         Attr::group("response", [Attr::int("status", 200), Attr::int("bytes", 512)]),
//!     ]),
//! );
//! // Properties: http.method=GET, http.response.status=200, http.response.bytes=512
//!
//! handler.close();
//! ```
//!
//! # Clients
//!
//! The handler does not deliver anything itself. Clients are created by a
//! [`ClientBuilder`] from a [`ClientConfig`] derived from the connection
//! string and the [`HandlerOptions`]:
//!
//! - [`BatchClient`] queues items and sends them in batches through a
//!   [`Transport`] from a background thread.
//! - [`InMemoryClient`] keeps items in memory, for tests.
//!
//! # The `log` crate
//!
//! [`LogBridge`] implements [`log::Log`] on top of a handler.
//!
//! # Diagnostics
//!
//! With the default `internal-logs` feature, the crate reports dropped
//! items, transport failures and close timeouts as `tracing` events.
//! Call `enable_diagnostics` to print them.

#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

#[macro_use]
mod diagnostics;

mod attribute;
mod batch;
mod bridge;
mod client;
mod connection_string;
mod event;
mod handler;
mod in_memory;
mod level;
mod stdout;
mod transport;

pub use attribute::{flatten_attr, Attr, LogValuer, Value};
pub use batch::{BatchClient, BatchClientBuilder, DEFAULT_MAX_QUEUE_SIZE};
pub use bridge::LogBridge;
pub use client::{
    ClientBuildError, ClientBuilder, ClientConfig, CloseNotifier, CloseSignal, TelemetryClient,
    TRACK_PATH,
};
pub use connection_string::{
    ConnectionString, ConnectionStringError, APPLICATIONINSIGHTS_CONNECTION_STRING,
};
#[cfg(feature = "internal-logs")]
pub use diagnostics::enable_diagnostics;
pub use event::{Properties, TraceTelemetry};
pub use handler::{
    Handler, HandlerError, HandlerOptions, Record, APPLICATIONINSIGHTS_LOG_LEVEL,
    APPLICATIONINSIGHTS_MAX_BATCH_INTERVAL, APPLICATIONINSIGHTS_MAX_BATCH_SIZE,
    DEFAULT_MAX_BATCH_INTERVAL, DEFAULT_MAX_BATCH_SIZE,
};
pub use in_memory::InMemoryClient;
pub use level::{Level, ParseLevelError, SeverityLevel};
pub use stdout::StdoutTransport;
pub use transport::{Transport, TransportError};
