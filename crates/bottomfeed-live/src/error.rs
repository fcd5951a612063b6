//! Error handling for the live feed connection.

use std::time::Duration;

use thiserror::Error;

/// The result type used throughout the crate.
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors produced by the live feed transport, configuration and fallback
/// polling.
///
/// Only configuration errors are ever returned from
/// [`mount`](crate::LiveFeedBuilder::mount). Everything else is routed into the
/// reconnect state machine as a transport failure, or logged by the poller.
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request errors (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint URL could not be composed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Payload deserialization errors
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The stream endpoint answered with a non-2xx status
    #[error("Stream endpoint returned status {status}")]
    InvalidStatus {
        /// Status returned by the server.
        status: http::StatusCode,
    },

    /// The stream endpoint did not answer with `text/event-stream`
    #[error("Unexpected content type: {content_type}")]
    InvalidContentType {
        /// Content type returned by the server.
        content_type: String,
    },

    /// The server closed the event stream
    #[error("Event stream ended")]
    StreamEnded,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Elapsed limit.
        duration: Duration,
    },

    /// Fallback poll errors reported by the host callback
    #[error("Poll error: {message}")]
    Poll {
        /// Reason given by the host.
        message: String,
    },
}

impl FeedError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a poll error.
    pub fn poll(message: impl Into<String>) -> Self {
        Self::Poll {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: http::StatusCode) -> Self {
        Self::InvalidStatus { status }
    }

    /// Create an invalid-content-type error.
    pub fn invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Returns `true` for errors raised by the transport itself, as opposed to
    /// configuration or host callbacks.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::InvalidStatus { .. }
                | Self::InvalidContentType { .. }
                | Self::StreamEnded
                | Self::Timeout { .. }
        )
    }
}
