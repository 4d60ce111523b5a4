//! Error types for exchange and market-overview access.
//!
//! Every variant is a soft failure: callers fall back to the next exchange
//! or skip the asset for the current cycle.

use thiserror::Error;

/// Errors that can occur when fetching market data.
#[derive(Debug, Error)]
pub enum DataError {
    /// Request did not complete in time.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Non-success HTTP status.
    #[error("HTTP error: {status} - {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or API message.
        message: String,
    },

    /// Transport-level failure.
    #[error("request error: {0}")]
    Request(String),

    /// Response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Candle series is empty or contains non-finite values.
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    /// Exchange does not list the instrument.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Result alias for data access.
pub type DataResult<T> = std::result::Result<T, DataError>;
