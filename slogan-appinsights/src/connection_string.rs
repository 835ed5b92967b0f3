//! Application Insights connection strings.
//!
//! A connection string is a list of `Key=Value` pairs separated by `;`, as
//! given by the Application Insights resource, e.g.
//! `InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://example.in.applicationinsights.azure.com/`.
//! Only the instrumentation key and the ingestion endpoint are used, other
//! keys are ignored.

use thiserror::Error;
use url::Url;

/// Environment variable conventionally holding the connection string.
pub const APPLICATIONINSIGHTS_CONNECTION_STRING: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";

const INSTRUMENTATION_KEY: &str = "InstrumentationKey";
const INGESTION_ENDPOINT: &str = "IngestionEndpoint";

/// Errors that can occur while parsing a connection string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStringError {
    /// Nothing but whitespace was given.
    #[error("connection string is empty")]
    Empty,

    /// No non-empty `InstrumentationKey` entry.
    #[error("instrumentation key is missing")]
    MissingInstrumentationKey,

    /// No non-empty `IngestionEndpoint` entry.
    #[error("ingestion endpoint is missing")]
    MissingIngestionEndpoint,

    /// The `IngestionEndpoint` entry is not an absolute URL.
    #[error("ingestion endpoint is not a valid URL: {endpoint}: {source}")]
    InvalidEndpointUrl {
        /// The rejected endpoint value.
        endpoint: String,
        /// The reason the endpoint was rejected.
        #[source]
        source: url::ParseError,
    },
}

/// The parts of a connection string needed to submit telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    instrumentation_key: String,
    ingestion_endpoint: Url,
}

impl ConnectionString {
    /// Parses a connection string.
    ///
    /// Surrounding whitespace is ignored. Segments without `=` are skipped,
    /// and when a key is repeated the last occurrence wins.
    pub fn parse(connection_string: &str) -> Result<Self, ConnectionStringError> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut instrumentation_key = "";
        let mut ingestion_endpoint = "";

        for (key, value) in connection_string
            .split(';')
            .filter_map(|segment| segment.split_once('='))
        {
            match key {
                INSTRUMENTATION_KEY => instrumentation_key = value,
                INGESTION_ENDPOINT => ingestion_endpoint = value,
                _ => {}
            }
        }

        if instrumentation_key.is_empty() {
            return Err(ConnectionStringError::MissingInstrumentationKey);
        }

        if ingestion_endpoint.is_empty() {
            return Err(ConnectionStringError::MissingIngestionEndpoint);
        }

        let ingestion_endpoint = Url::parse(ingestion_endpoint).map_err(|source| {
            ConnectionStringError::InvalidEndpointUrl {
                endpoint: ingestion_endpoint.to_string(),
                source,
            }
        })?;

        Ok(ConnectionString {
            instrumentation_key: instrumentation_key.to_string(),
            ingestion_endpoint,
        })
    }

    /// Reads and parses [`APPLICATIONINSIGHTS_CONNECTION_STRING`].
    ///
    /// An unset or non-unicode variable is reported as [`ConnectionStringError::Empty`].
    pub fn from_env() -> Result<Self, ConnectionStringError> {
        match std::env::var(APPLICATIONINSIGHTS_CONNECTION_STRING) {
            Ok(value) => Self::parse(&value),
            Err(_) => Err(ConnectionStringError::Empty),
        }
    }

    /// The instrumentation key identifying the target resource.
    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    /// The ingestion endpoint, exactly as given.
    pub fn ingestion_endpoint(&self) -> &Url {
        &self.ingestion_endpoint
    }

    /// The URL events are submitted to: the ingestion endpoint with its
    /// path replaced by `path`.
    pub(crate) fn submission_url(&self, path: &str) -> Url {
        let mut url = self.ingestion_endpoint.clone();
        url.set_path(path);
        url
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionString::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const KEY: &str = "f81d4fae-7dec-11d0-a765-00a0c91e6bf6";

    #[test]
    fn parse_valid_connection_string() {
        let connection_string = "InstrumentationKey=f81d4fae-7dec-11d0-a765-00a0c91e6bf6;IngestionEndpoint=https://southcentralus.in.applicationinsights.azure.com/";

        let parsed = ConnectionString::parse(connection_string).unwrap();

        assert_eq!(parsed.instrumentation_key(), KEY);
        assert_eq!(
            parsed.ingestion_endpoint().as_str(),
            "https://southcentralus.in.applicationinsights.azure.com/"
        );
    }

    #[rstest]
    #[case::reversed_order(
        "IngestionEndpoint=https://example.org/;InstrumentationKey=key1",
        "key1",
        "https://example.org/"
    )]
    #[case::unknown_keys(
        "Foo=bar;InstrumentationKey=key1;LiveEndpoint=https://live.example.org/;IngestionEndpoint=https://example.org/;ApplicationId=app",
        "key1",
        "https://example.org/"
    )]
    #[case::trailing_separator(
        "InstrumentationKey=key1;IngestionEndpoint=https://example.org/;",
        "key1",
        "https://example.org/"
    )]
    #[case::surrounding_whitespace(
        "  \tInstrumentationKey=key1;IngestionEndpoint=https://example.org/\n",
        "key1",
        "https://example.org/"
    )]
    #[case::last_occurrence_wins(
        "InstrumentationKey=key1;IngestionEndpoint=https://a.example.org/;InstrumentationKey=key2;IngestionEndpoint=https://b.example.org/",
        "key2",
        "https://b.example.org/"
    )]
    #[case::segments_without_separator(
        "garbage;InstrumentationKey=key1;;IngestionEndpoint=https://example.org/",
        "key1",
        "https://example.org/"
    )]
    #[case::value_containing_separator(
        "InstrumentationKey=a=b;IngestionEndpoint=https://example.org/?x=1",
        "a=b",
        "https://example.org/?x=1"
    )]
    fn parse_picks_required_keys(
        #[case] input: &str,
        #[case] expected_key: &str,
        #[case] expected_endpoint: &str,
    ) {
        let parsed = ConnectionString::parse(input).unwrap();

        assert_eq!(parsed.instrumentation_key(), expected_key);
        assert_eq!(parsed.ingestion_endpoint().as_str(), expected_endpoint);
    }

    #[test]
    fn parse_invalid_connection_strings() {
        let test_cases = vec![
            // Format: (input, expected message prefix)
            ("", "connection string is empty"),
            ("   ", "connection string is empty"),
            (
                "IngestionEndpoint=https://example.org/",
                "instrumentation key is missing",
            ),
            (
                "InstrumentationKey=;IngestionEndpoint=https://example.org/",
                "instrumentation key is missing",
            ),
            (
                "InstrumentationKey=f81d4fae-7dec-11d0-a765-00a0c91e6bf6",
                "ingestion endpoint is missing",
            ),
            (
                "InstrumentationKey=f81d4fae-7dec-11d0-a765-00a0c91e6bf6;IngestionEndpoint=://example.org",
                "ingestion endpoint is not a valid URL",
            ),
            (
                "InstrumentationKey=f81d4fae-7dec-11d0-a765-00a0c91e6bf6;IngestionEndpoint=example.org/path",
                "ingestion endpoint is not a valid URL",
            ),
        ];

        for (input, message) in test_cases {
            let err = ConnectionString::parse(input).unwrap_err();
            assert!(
                err.to_string().starts_with(message),
                "wrong error message for {input:?}: {err}"
            );
        }
    }

    #[test]
    fn parse_reports_distinct_error_kinds() {
        assert_eq!(
            ConnectionString::parse(""),
            Err(ConnectionStringError::Empty)
        );
        assert_eq!(
            ConnectionString::parse("IngestionEndpoint=https://example.org/"),
            Err(ConnectionStringError::MissingInstrumentationKey)
        );
        assert_eq!(
            ConnectionString::parse("InstrumentationKey=key1"),
            Err(ConnectionStringError::MissingIngestionEndpoint)
        );
        assert!(matches!(
            ConnectionString::parse("InstrumentationKey=key1;IngestionEndpoint=://example.org"),
            Err(ConnectionStringError::InvalidEndpointUrl { endpoint, .. }) if endpoint == "://example.org"
        ));
    }

    #[test]
    fn submission_url_replaces_path() {
        let parsed = ConnectionString::parse(
            "InstrumentationKey=key1;IngestionEndpoint=https://example.org/some/base/",
        )
        .unwrap();

        assert_eq!(
            parsed.submission_url("/v2/track").as_str(),
            "https://example.org/v2/track"
        );
    }

    #[test]
    fn from_env_reads_variable() {
        temp_env::with_var(
            APPLICATIONINSIGHTS_CONNECTION_STRING,
            Some("InstrumentationKey=key1;IngestionEndpoint=https://example.org/"),
            || {
                let parsed = ConnectionString::from_env().unwrap();
                assert_eq!(parsed.instrumentation_key(), "key1");
            },
        );

        temp_env::with_var_unset(APPLICATIONINSIGHTS_CONNECTION_STRING, || {
            assert_eq!(
                ConnectionString::from_env(),
                Err(ConnectionStringError::Empty)
            );
        });
    }
}
