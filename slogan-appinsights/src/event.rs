use crate::level::SeverityLevel;
use indexmap::IndexMap;
use std::time::SystemTime;

/// Flattened custom properties of a telemetry item, in insertion order.
pub type Properties = IndexMap<String, String>;

/// A trace telemetry item built from one log record.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTelemetry {
    /// The log message.
    pub message: String,
    /// The severity mapped from the record level.
    pub severity_level: SeverityLevel,
    /// When the record was created. Left empty when the record carries no
    /// time, in which case the transport stamps the item when sending it.
    pub timestamp: Option<SystemTime>,
    /// Handler and record attributes, flattened into dotted keys.
    pub properties: Properties,
}

impl TraceTelemetry {
    /// Creates an item with no timestamp and no properties.
    pub fn new<T: Into<String>>(message: T, severity_level: SeverityLevel) -> Self {
        TraceTelemetry {
            message: message.into(),
            severity_level,
            timestamp: None,
            properties: Properties::new(),
        }
    }
}
