//! A transport that writes telemetry envelopes as JSON lines.
//!
//! Useful for debugging, and as the transport of the command line tool.
//! Each item is written as one envelope shaped like the ones the ingestion
//! endpoint accepts.

use crate::attribute::format_time;
use crate::client::ClientConfig;
use crate::event::{Properties, TraceTelemetry};
use crate::level::SeverityLevel;
use crate::transport::{Transport, TransportError};
use serde::Serialize;
use std::fmt::{self, Debug, Formatter};
use std::io::{self, Write};
use std::time::SystemTime;

const ENVELOPE_NAME: &str = "Microsoft.ApplicationInsights.Message";
const BASE_TYPE: &str = "MessageData";
const DATA_VERSION: u8 = 2;

/// Writes every item of a batch as a JSON envelope to a writer, stdout by
/// default.
pub struct StdoutTransport<W: Write = io::Stdout> {
    writer: W,
    pretty_print: bool,
    is_shutdown: bool,
}

impl Default for StdoutTransport {
    fn default() -> Self {
        StdoutTransport::with_writer(io::stdout())
    }
}

impl<W: Write> StdoutTransport<W> {
    /// Creates a transport writing to `writer`.
    pub fn with_writer(writer: W) -> Self {
        StdoutTransport {
            writer,
            pretty_print: false,
            is_shutdown: false,
        }
    }

    /// Writes indented JSON instead of one line per item.
    pub fn with_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    /// Returns the writer, consuming the transport.
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<W: Write> Debug for StdoutTransport<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutTransport")
            .field("pretty_print", &self.pretty_print)
            .finish()
    }
}

impl<W: Write + Send + 'static> Transport for StdoutTransport<W> {
    fn send(
        &mut self,
        config: &ClientConfig,
        batch: &[TraceTelemetry],
    ) -> Result<(), TransportError> {
        if self.is_shutdown {
            return Err(TransportError::AlreadyShutdown);
        }

        let now = SystemTime::now();
        for item in batch {
            let envelope = Envelope::new(config, item, now);
            if self.pretty_print {
                serde_json::to_writer_pretty(&mut self.writer, &envelope)?;
            } else {
                serde_json::to_writer(&mut self.writer, &envelope)?;
            }
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.is_shutdown = true;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    name: &'static str,
    time: String,
    #[serde(rename = "iKey")]
    instrumentation_key: &'a str,
    data: Data<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Data<'a> {
    base_type: &'static str,
    base_data: MessageData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageData<'a> {
    ver: u8,
    message: &'a str,
    severity_level: SeverityLevel,
    #[serde(skip_serializing_if = "Properties::is_empty")]
    properties: &'a Properties,
}

impl<'a> Envelope<'a> {
    fn new(config: &'a ClientConfig, item: &'a TraceTelemetry, now: SystemTime) -> Self {
        Envelope {
            name: ENVELOPE_NAME,
            time: format_time(item.timestamp.unwrap_or(now)),
            instrumentation_key: &config.instrumentation_key,
            data: Data {
                base_type: BASE_TYPE,
                base_data: MessageData {
                    ver: DATA_VERSION,
                    message: &item.message,
                    severity_level: item.severity_level,
                    properties: &item.properties,
                },
            },
        }
    }
}
