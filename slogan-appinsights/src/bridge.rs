use crate::attribute::{Attr, Value};
use crate::handler::{Handler, Record};
use crate::level::Level;
use log::kv::{self, VisitSource};
use log::Metadata;

/// Routes records of the [`log`] crate to a [`Handler`].
///
/// Key-values attached to a record become attributes; booleans, integers,
/// floats and strings keep their type, anything else is formatted.
///
/// ```no_run
/// use slogan_appinsights::{BatchClient, Handler, HandlerOptions, LogBridge, StdoutTransport};
///
/// let handler = Handler::new(
///     "InstrumentationKey=key1;IngestionEndpoint=https://example.org/",
///     HandlerOptions::from_env(),
///     BatchClient::builder(StdoutTransport::default()),
/// )
/// .unwrap();
///
/// log::set_boxed_logger(Box::new(LogBridge::new(handler.clone()))).unwrap();
/// log::set_max_level(log::LevelFilter::Trace);
///
/// log::info!(user = "alice", attempt = 3; "signed in");
/// handler.close();
/// ```
#[derive(Debug, Clone)]
pub struct LogBridge {
    handler: Handler,
}

impl LogBridge {
    /// Creates a bridge handing records to `handler`.
    pub fn new(handler: Handler) -> Self {
        LogBridge { handler }
    }

    /// The handler records are handed to.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.handler.enabled(Level::from(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut visitor = AttrVisitor(Vec::new());
        if let Err(err) = record.key_values().visit(&mut visitor) {
            ai_debug!(name: "LogBridge.KeyValues.Incomplete", error = format!("{err}"));
        }

        self.handler.handle(
            &Record::new(Level::from(record.level()), record.args().to_string())
                .with_attrs(visitor.0),
        );
    }

    fn flush(&self) {}
}

struct AttrVisitor(Vec<Attr>);

impl<'kvs> VisitSource<'kvs> for AttrVisitor {
    fn visit_pair(&mut self, key: kv::Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        self.0.push(Attr::new(key.as_str(), to_value(&value)));
        Ok(())
    }
}

fn to_value(value: &kv::Value<'_>) -> Value {
    if let Some(b) = value.to_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.to_i64() {
        Value::Int(i)
    } else if let Some(u) = value.to_u64() {
        Value::Uint(u)
    } else if let Some(f) = value.to_f64() {
        Value::Float(f)
    } else if let Some(s) = value.to_borrowed_str() {
        Value::from(s.to_string())
    } else {
        Value::from(value.to_string())
    }
}
