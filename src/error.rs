use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The six optional per-stop timestamps, named the way they appear in the
/// normalized model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampField {
    ArrivalActual,
    ArrivalEstimated,
    ArrivalScheduled,
    DepartureActual,
    DepartureEstimated,
    DepartureScheduled,
}

impl TimestampField {
    pub const ALL: [TimestampField; 6] = [
        TimestampField::ArrivalActual,
        TimestampField::ArrivalEstimated,
        TimestampField::ArrivalScheduled,
        TimestampField::DepartureActual,
        TimestampField::DepartureEstimated,
        TimestampField::DepartureScheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampField::ArrivalActual => "arrivalActual",
            TimestampField::ArrivalEstimated => "arrivalEstimated",
            TimestampField::ArrivalScheduled => "arrivalScheduled",
            TimestampField::DepartureActual => "departureActual",
            TimestampField::DepartureEstimated => "departureEstimated",
            TimestampField::DepartureScheduled => "departureScheduled",
        }
    }
}

impl fmt::Display for TimestampField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("payload could not be decrypted: {0}")]
    Decode(String),
    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),
    #[error("decrypted payload is not valid structured data: {0}")]
    MalformedPayload(String),
    #[error("upstream reported an error: {0}")]
    Upstream(String),
    #[error("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp { field: TimestampField, value: String },
    #[error("gave up after {0:?}")]
    Timeout(std::time::Duration),
    #[error("fetch of '{url}' failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Only stale key material is worth another attempt, and only after the
    /// material has been fetched again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::KeyUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedPayload(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_key_errors_are_retryable() {
        assert!(Error::KeyUnavailable("rotated".into()).is_retryable());
        assert!(!Error::Decode("bad padding".into()).is_retryable());
        assert!(!Error::Upstream("down".into()).is_retryable());
    }

    #[test]
    fn invalid_timestamp_names_the_field() {
        let e = Error::InvalidTimestamp {
            field: TimestampField::DepartureEstimated,
            value: "soon".into(),
        };
        assert_eq!(e.to_string(), "invalid timestamp in departureEstimated: \"soon\"");
    }
}
