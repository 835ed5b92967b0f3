use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The importance of a log record.
///
/// Levels are plain signed integers so that applications can define their
/// own levels between the named ones. The named levels are four apart,
/// leaving room for three custom levels between each pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(i32);

impl Level {
    /// Debug level.
    pub const DEBUG: Level = Level(-4);
    /// Info level. The default minimum level of a handler.
    pub const INFO: Level = Level(0);
    /// Warn level.
    pub const WARN: Level = Level(4);
    /// Error level.
    pub const ERROR: Level = Level(8);
    /// The level corresponding to [`SeverityLevel::Critical`].
    pub const CRITICAL: Level = Level(12);
    /// Alias of [`Level::CRITICAL`].
    pub const FATAL: Level = Level::CRITICAL;

    /// Creates a level from its numeric value.
    pub const fn new(value: i32) -> Self {
        Level(value)
    }

    /// The numeric value of the level.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns the level `delta` steps above (or below, if negative) this one.
    pub const fn offset(self, delta: i32) -> Self {
        Level(self.0.saturating_add(delta))
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::INFO
    }
}

impl From<i32> for Level {
    fn from(value: i32) -> Self {
        Level(value)
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Level::ERROR,
            log::Level::Warn => Level::WARN,
            log::Level::Info => Level::INFO,
            log::Level::Debug => Level::DEBUG,
            log::Level::Trace => Level::DEBUG.offset(-4),
        }
    }
}

impl fmt::Display for Level {
    /// Formats the level by name, with a signed offset from the nearest
    /// named level below it, e.g. `INFO`, `WARN+2`, `DEBUG-4`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, base) = if self.0 < Level::INFO.0 {
            ("DEBUG", Level::DEBUG)
        } else if self.0 < Level::WARN.0 {
            ("INFO", Level::INFO)
        } else if self.0 < Level::ERROR.0 {
            ("WARN", Level::WARN)
        } else if self.0 < Level::CRITICAL.0 {
            ("ERROR", Level::ERROR)
        } else {
            ("CRITICAL", Level::CRITICAL)
        };

        let delta = i64::from(self.0) - i64::from(base.0);
        if delta == 0 {
            f.write_str(name)
        } else {
            write!(f, "{name}{delta:+}")
        }
    }
}

/// Error returned when a level name cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown level name {0:?}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, optionally followed by a signed offset.
    /// Names are case-insensitive; `FATAL` is accepted as `CRITICAL`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLevelError(s.to_string());

        let (name, delta) = match s.find(['+', '-']) {
            Some(i) => {
                let delta: i32 = s[i..].parse().map_err(|_| err())?;
                (&s[..i], delta)
            }
            None => (s, 0),
        };

        let base = match name.to_ascii_uppercase().as_str() {
            "DEBUG" => Level::DEBUG,
            "INFO" => Level::INFO,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            "CRITICAL" | "FATAL" => Level::CRITICAL,
            _ => return Err(err()),
        };

        Ok(base.offset(delta))
    }
}

/// The severity of a trace telemetry item, as understood by
/// Application Insights.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SeverityLevel {
    /// Verbose
    Verbose = 0,
    /// Information
    Information = 1,
    /// Warning
    Warning = 2,
    /// Error
    Error = 3,
    /// Critical
    Critical = 4,
}

impl SeverityLevel {
    /// Maps a log level onto a severity level.
    ///
    /// Anything at or below [`Level::DEBUG`] is verbose. Above that, each
    /// severity covers the levels from its own threshold up to the next one,
    /// with [`Level::CRITICAL`] and everything above it being critical.
    pub fn from_level(level: Level) -> Self {
        match level {
            l if l <= Level::DEBUG => SeverityLevel::Verbose,
            l if l >= Level::CRITICAL => SeverityLevel::Critical,
            l if l >= Level::ERROR => SeverityLevel::Error,
            l if l >= Level::WARN => SeverityLevel::Warning,
            _ => SeverityLevel::Information,
        }
    }

    /// The numeric value sent to the backend.
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl From<Level> for SeverityLevel {
    fn from(level: Level) -> Self {
        SeverityLevel::from_level(level)
    }
}

impl Serialize for SeverityLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Level::DEBUG, SeverityLevel::Verbose)]
    #[case(Level::INFO, SeverityLevel::Information)]
    #[case(Level::WARN, SeverityLevel::Warning)]
    #[case(Level::ERROR, SeverityLevel::Error)]
    #[case(Level::CRITICAL, SeverityLevel::Critical)]
    #[case(Level::FATAL, SeverityLevel::Critical)]
    #[case(Level::new(-100), SeverityLevel::Verbose)]
    #[case(Level::new(-3), SeverityLevel::Information)]
    #[case(Level::new(3), SeverityLevel::Information)]
    #[case(Level::new(7), SeverityLevel::Warning)]
    #[case(Level::new(11), SeverityLevel::Error)]
    #[case(Level::new(100), SeverityLevel::Critical)]
    fn map_level(#[case] level: Level, #[case] expected: SeverityLevel) {
        assert_eq!(SeverityLevel::from_level(level), expected);
    }

    #[test]
    fn map_level_is_monotonic() {
        let mut previous = SeverityLevel::from_level(Level::new(-20));
        for value in -20..=20 {
            let current = SeverityLevel::from_level(Level::new(value));
            assert!(
                previous <= current,
                "level {value} mapped to {current:?} after {previous:?}"
            );
            previous = current;
        }
    }

    #[test]
    fn severity_values() {
        assert_eq!(SeverityLevel::Verbose.value(), 0);
        assert_eq!(SeverityLevel::Information.value(), 1);
        assert_eq!(SeverityLevel::Warning.value(), 2);
        assert_eq!(SeverityLevel::Error.value(), 3);
        assert_eq!(SeverityLevel::Critical.value(), 4);
        assert_eq!(
            serde_json::to_string(&SeverityLevel::Warning).unwrap(),
            "2"
        );
    }

    #[test]
    fn fatal_is_critical() {
        assert_eq!(Level::FATAL, Level::CRITICAL);
        assert!(Level::CRITICAL > Level::ERROR);
    }

    #[test]
    fn display_and_parse() {
        let test_cases = vec![
            // Format: (level, text)
            (Level::DEBUG, "DEBUG"),
            (Level::DEBUG.offset(-4), "DEBUG-4"),
            (Level::INFO, "INFO"),
            (Level::INFO.offset(2), "INFO+2"),
            (Level::WARN, "WARN"),
            (Level::ERROR.offset(1), "ERROR+1"),
            (Level::CRITICAL, "CRITICAL"),
            (Level::CRITICAL.offset(3), "CRITICAL+3"),
        ];

        for (level, text) in test_cases {
            assert_eq!(level.to_string(), text);
            assert_eq!(text.parse::<Level>(), Ok(level));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("warn".parse::<Level>(), Ok(Level::WARN));
        assert_eq!("Fatal".parse::<Level>(), Ok(Level::CRITICAL));
        assert_eq!("info-1".parse::<Level>(), Ok(Level::new(-1)));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        for input in ["", "VERBOSE", "INFO+", "WARN+x", "+2"] {
            assert!(input.parse::<Level>().is_err(), "{input:?} was accepted");
        }
    }

    #[test]
    fn from_log_level() {
        assert_eq!(Level::from(log::Level::Error), Level::ERROR);
        assert_eq!(Level::from(log::Level::Warn), Level::WARN);
        assert_eq!(Level::from(log::Level::Info), Level::INFO);
        assert_eq!(Level::from(log::Level::Debug), Level::DEBUG);
        assert_eq!(Level::from(log::Level::Trace), Level::new(-8));
    }
}
