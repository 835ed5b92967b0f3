//! Structured attributes and their flattening into telemetry properties.
//!
//! Application Insights only stores flat string properties, so nested
//! groups are flattened into dotted keys: a group `request` holding
//! `method = "GET"` becomes the property `request.method = GET`.

use crate::event::Properties;
use chrono::{DateTime, SecondsFormat, Utc};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How many times a lazy value is resolved before giving up.
const MAX_RESOLVE_DEPTH: usize = 100;

/// A value computed only when a record is actually handled.
pub trait LogValuer: Send + Sync {
    /// Computes the value. The result may itself be lazy.
    fn log_value(&self) -> Value;
}

impl<F> LogValuer for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn log_value(&self) -> Value {
        self()
    }
}

/// The value of an [`Attr`].
#[derive(Clone, Default)]
#[non_exhaustive]
pub enum Value {
    /// No value. Formats as the empty string and is therefore never stored.
    #[default]
    Empty,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(Cow<'static, str>),
    /// A duration, formatted like `1.5s`.
    Duration(Duration),
    /// A point in time, formatted as RFC 3339 in UTC.
    Time(SystemTime),
    /// Nested attributes, flattened under the attribute's key.
    Group(Vec<Attr>),
    /// Anything else that can be displayed.
    Any(Arc<dyn fmt::Display + Send + Sync>),
    /// A value resolved when the record is handled.
    Lazy(Arc<dyn LogValuer>),
}

impl Value {
    /// Wraps any displayable value.
    pub fn any<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Value::Any(Arc::new(value))
    }

    /// Wraps a lazily computed value.
    pub fn lazy<T>(valuer: T) -> Self
    where
        T: LogValuer + 'static,
    {
        Value::Lazy(Arc::new(valuer))
    }

    /// Creates a group value.
    pub fn group<I>(attrs: I) -> Self
    where
        I: IntoIterator<Item = Attr>,
    {
        Value::Group(attrs.into_iter().collect())
    }

    /// Returns `true` for [`Value::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Resolves lazy values until a concrete one is produced.
    ///
    /// A valuer that panics, or that keeps producing lazy values, resolves
    /// to a string describing the problem rather than failing.
    pub fn resolve(&self) -> Cow<'_, Value> {
        let Value::Lazy(valuer) = self else {
            return Cow::Borrowed(self);
        };

        let mut value = call_log_value(valuer.as_ref());
        for _ in 1..MAX_RESOLVE_DEPTH {
            let next = match &value {
                Value::Lazy(valuer) => call_log_value(valuer.as_ref()),
                _ => return Cow::Owned(value),
            };
            value = next;
        }

        match value {
            Value::Lazy(_) => Cow::Owned(Value::Str(Cow::Owned(format!(
                "LogValue called too many times ({MAX_RESOLVE_DEPTH}) without producing a value"
            )))),
            value => Cow::Owned(value),
        }
    }
}

fn call_log_value(valuer: &dyn LogValuer) -> Value {
    match panic::catch_unwind(AssertUnwindSafe(|| valuer.log_value())) {
        Ok(value) => value,
        Err(payload) => Value::Str(Cow::Owned(format!(
            "LogValue panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string payload"
    }
}

/// Formats a time as RFC 3339 in UTC with as many fractional digits as
/// needed, down to nanoseconds. Times outside the range of
/// [`DateTime`] are formatted with `Debug`.
pub(crate) fn format_time(time: SystemTime) -> String {
    let Some(datetime) = to_datetime(time) else {
        return format!("{time:?}");
    };
    let formatted = datetime.to_rfc3339_opts(SecondsFormat::Nanos, true);

    match formatted.split_once('.') {
        Some((seconds, fraction)) => {
            let digits = fraction.trim_end_matches('Z').trim_end_matches('0');
            if digits.is_empty() {
                format!("{seconds}Z")
            } else {
                format!("{seconds}.{digits}Z")
            }
        }
        None => formatted,
    }
}

fn to_datetime(time: SystemTime) -> Option<DateTime<Utc>> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => {
            DateTime::from_timestamp(i64::try_from(after.as_secs()).ok()?, after.subsec_nanos())
        }
        Err(err) => {
            let before = err.duration();
            let secs = -i64::try_from(before.as_secs()).ok()?;
            match before.subsec_nanos() {
                0 => DateTime::from_timestamp(secs, 0),
                nanos => DateTime::from_timestamp(secs.checked_sub(1)?, 1_000_000_000 - nanos),
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Duration(d) => write!(f, "{d:?}"),
            Value::Time(t) => f.write_str(&format_time(*t)),
            Value::Group(attrs) => {
                f.write_str("[")?;
                for (i, attr) in attrs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}={}", attr.key, attr.value)?;
                }
                f.write_str("]")
            }
            Value::Any(value) => write!(f, "{value}"),
            Value::Lazy(_) => write!(f, "{}", self.resolve()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("Empty"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Uint(u) => f.debug_tuple("Uint").field(u).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Duration(d) => f.debug_tuple("Duration").field(d).finish(),
            Value::Time(t) => f.debug_tuple("Time").field(t).finish(),
            Value::Group(attrs) => f.debug_tuple("Group").field(attrs).finish(),
            Value::Any(value) => f.debug_tuple("Any").field(&value.to_string()).finish(),
            Value::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

macro_rules! impl_trivial_from {
    ($t:ty, $variant:path) => {
        impl From<$t> for Value {
            fn from(val: $t) -> Value {
                $variant(val.into())
            }
        }
    };
}

impl_trivial_from!(bool, Value::Bool);

impl_trivial_from!(i8, Value::Int);
impl_trivial_from!(i16, Value::Int);
impl_trivial_from!(i32, Value::Int);
impl_trivial_from!(i64, Value::Int);

impl_trivial_from!(u8, Value::Uint);
impl_trivial_from!(u16, Value::Uint);
impl_trivial_from!(u32, Value::Uint);
impl_trivial_from!(u64, Value::Uint);

impl_trivial_from!(f32, Value::Float);
impl_trivial_from!(f64, Value::Float);

impl_trivial_from!(String, Value::Str);
impl_trivial_from!(&'static str, Value::Str);
impl_trivial_from!(Cow<'static, str>, Value::Str);

impl_trivial_from!(Duration, Value::Duration);
impl_trivial_from!(SystemTime, Value::Time);
impl_trivial_from!(Vec<Attr>, Value::Group);

impl From<isize> for Value {
    fn from(val: isize) -> Value {
        Value::Int(val as i64)
    }
}

impl From<usize> for Value {
    fn from(val: usize) -> Value {
        Value::Uint(val as u64)
    }
}

/// A key/value pair attached to a record or a handler.
#[derive(Debug, Clone, Default)]
pub struct Attr {
    /// The key. May be empty for groups whose members should not be
    /// namespaced.
    pub key: String,
    /// The value.
    pub value: Value,
}

impl Attr {
    /// Creates an attribute from anything convertible into a [`Value`].
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Attr {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A string attribute.
    pub fn string<K: Into<String>, V: Into<Cow<'static, str>>>(key: K, value: V) -> Self {
        Attr::new(key, Value::Str(value.into()))
    }

    /// A signed integer attribute.
    pub fn int<K: Into<String>>(key: K, value: i64) -> Self {
        Attr::new(key, Value::Int(value))
    }

    /// An unsigned integer attribute.
    pub fn uint<K: Into<String>>(key: K, value: u64) -> Self {
        Attr::new(key, Value::Uint(value))
    }

    /// A floating point attribute.
    pub fn float<K: Into<String>>(key: K, value: f64) -> Self {
        Attr::new(key, Value::Float(value))
    }

    /// A boolean attribute.
    pub fn bool<K: Into<String>>(key: K, value: bool) -> Self {
        Attr::new(key, Value::Bool(value))
    }

    /// A duration attribute.
    pub fn duration<K: Into<String>>(key: K, value: Duration) -> Self {
        Attr::new(key, Value::Duration(value))
    }

    /// A time attribute.
    pub fn time<K: Into<String>>(key: K, value: SystemTime) -> Self {
        Attr::new(key, Value::Time(value))
    }

    /// A group of attributes.
    pub fn group<K, I>(key: K, attrs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = Attr>,
    {
        Attr::new(key, Value::group(attrs))
    }

    /// An attribute holding any displayable value.
    pub fn any<K, T>(key: K, value: T) -> Self
    where
        K: Into<String>,
        T: fmt::Display + Send + Sync + 'static,
    {
        Attr::new(key, Value::any(value))
    }

    /// An attribute whose value is computed only when a record is handled.
    pub fn lazy<K, T>(key: K, valuer: T) -> Self
    where
        K: Into<String>,
        T: LogValuer + 'static,
    {
        Attr::new(key, Value::lazy(valuer))
    }

    /// Returns `true` when both key and value are empty. Such attributes
    /// are ignored.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty() && self.value.is_empty()
    }
}

/// Flattens `attr` into `properties`, prefixing every key with `key_prefix`.
///
/// Scalars are stored under `key_prefix + key`. Groups recurse with the
/// group name and a period appended to the prefix, or with the prefix
/// unchanged when the group name is empty. Values formatting to the empty
/// string are not stored. An existing property with the same key is
/// overwritten.
pub fn flatten_attr(properties: &mut Properties, key_prefix: &str, attr: &Attr) {
    if attr.is_empty() {
        return;
    }

    match attr.value.resolve().as_ref() {
        Value::Group(attrs) => flatten_group(properties, key_prefix, &attr.key, attrs),
        value => {
            let formatted = value.to_string();
            if !formatted.is_empty() {
                properties.insert(format!("{key_prefix}{}", attr.key), formatted);
            }
        }
    }
}

fn flatten_group(properties: &mut Properties, key_prefix: &str, name: &str, attrs: &[Attr]) {
    if attrs.is_empty() {
        return;
    }

    let key_prefix: Cow<'_, str> = if name.is_empty() {
        Cow::Borrowed(key_prefix)
    } else {
        Cow::Owned(format!("{key_prefix}{name}."))
    };

    for attr in attrs {
        flatten_attr(properties, &key_prefix, attr);
    }
}
