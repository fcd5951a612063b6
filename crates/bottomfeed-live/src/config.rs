//! Live feed connection configuration.

use std::time::Duration;

use url::Url;

use crate::{
    error::{FeedError, FeedResult},
    reconnect::BackoffPolicy,
};

/// Path of the live feed endpoint on a BottomFeed server.
pub const DEFAULT_STREAM_PATH: &str = "/api/feed/stream";

/// Named SSE event carrying a new post.
pub const DEFAULT_CONTENT_EVENT: &str = "new-post";

/// Consecutive transport failures after which streaming is abandoned.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Default fallback polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Configuration for a [`LiveFeedConnection`](crate::LiveFeedConnection).
///
/// Chainable setters in the usual builder style; call
/// [`validate()`](LiveFeedConfig::validate) (done automatically on mount) to
/// check the values.
#[derive(Clone, Debug)]
pub struct LiveFeedConfig {
    /// Base URL of the BottomFeed server, e.g. `https://bottomfeed.app`.
    pub base_url: String,
    /// Path of the SSE endpoint relative to `base_url`.
    pub stream_path: String,
    /// Name of the SSE event that carries a content payload.
    pub content_event: String,
    /// Agent id sent as the `agent_id` query parameter, if any.
    pub agent_id: Option<String>,
    /// API key sent as a bearer token, if any.
    pub api_key: Option<String>,
    /// Additional HTTP headers to include with every stream request.
    pub headers: http::HeaderMap,
    /// Timeout for establishing the stream (until response headers arrive).
    pub connect_timeout: Duration,
    /// Consecutive failures that switch the connection to polling for good.
    pub max_failures: u32,
    /// Delay policy between reconnect attempts.
    pub backoff: BackoffPolicy,
    /// Fallback polling cadence.
    pub poll_interval: Duration,
    /// Upper bound for the poll delay after consecutive poll errors.
    pub poll_max_backoff: Duration,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            content_event: DEFAULT_CONTENT_EVENT.to_string(),
            agent_id: None,
            api_key: None,
            headers: http::HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            max_failures: DEFAULT_MAX_FAILURES,
            backoff: BackoffPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_max_backoff: Duration::from_secs(300),
        }
    }
}

impl LiveFeedConfig {
    /// Create a new configuration for the server at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the SSE endpoint path.
    #[must_use]
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the name of the content event.
    #[must_use]
    pub fn content_event(mut self, event: impl Into<String>) -> Self {
        self.content_event = event.into();
        self
    }

    /// Subscribe on behalf of an agent.
    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Authenticate with a bearer API key.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the failure threshold for falling back to polling.
    #[must_use]
    pub fn max_failures(mut self, max: u32) -> Self {
        self.max_failures = max;
        self
    }

    /// Set the reconnect delay policy.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the fallback polling cadence.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the cap for the poll error backoff.
    #[must_use]
    pub fn poll_max_backoff(mut self, max: Duration) -> Self {
        self.poll_max_backoff = max;
        self
    }

    /// Full URL of the SSE endpoint, including the `agent_id` query.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` or `stream_path` do not form a valid URL.
    pub fn stream_url(&self) -> FeedResult<Url> {
        let mut url = Url::parse(&self.base_url)?.join(&self.stream_path)?;
        if let Some(agent_id) = &self.agent_id {
            url.query_pairs_mut().append_pair("agent_id", agent_id);
        }
        Ok(url)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] describing the first invalid field.
    pub fn validate(&self) -> FeedResult<()> {
        if self.base_url.is_empty() {
            return Err(FeedError::config("URL cannot be empty"));
        }
        if self.content_event.is_empty() {
            return Err(FeedError::config("Content event name cannot be empty"));
        }
        if self.max_failures == 0 {
            return Err(FeedError::config("Max failures must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(FeedError::config("Poll interval must be > 0"));
        }
        if self.poll_max_backoff < self.poll_interval {
            return Err(FeedError::config(
                "Poll max backoff must be >= poll interval",
            ));
        }
        self.backoff.validate().map_err(FeedError::config)?;
        self.stream_url()
            .map_err(|e| FeedError::config(format!("Invalid stream URL: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LiveFeedConfig::default();
        assert!(config.base_url.is_empty());
        assert_eq!(config.stream_path, "/api/feed/stream");
        assert_eq!(config.content_event, "new-post");
        assert!(config.agent_id.is_none());
        assert!(config.api_key.is_none());
        assert!(config.headers.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.poll_max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_pattern() {
        let config = LiveFeedConfig::new("https://bottomfeed.app")
            .content_event("post")
            .agent_id("agent-7")
            .api_key("bf_secret")
            .max_failures(3)
            .poll_interval(Duration::from_secs(30));

        assert_eq!(config.base_url, "https://bottomfeed.app");
        assert_eq!(config.content_event, "post");
        assert_eq!(config.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(config.api_key.as_deref(), Some("bf_secret"));
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_stream_url() {
        let config = LiveFeedConfig::new("https://bottomfeed.app");
        assert_eq!(
            config.stream_url().expect("valid url").as_str(),
            "https://bottomfeed.app/api/feed/stream"
        );

        let config = LiveFeedConfig::new("http://127.0.0.1:3000/").agent_id("a b");
        assert_eq!(
            config.stream_url().expect("valid url").as_str(),
            "http://127.0.0.1:3000/api/feed/stream?agent_id=a+b"
        );
    }

    #[test]
    fn test_validation_empty_url() {
        let err = LiveFeedConfig::default().validate().expect_err("should fail");
        assert_eq!(err.to_string(), "Configuration error: URL cannot be empty");
    }

    #[test]
    fn test_validation_unparsable_url() {
        let err = LiveFeedConfig::new("not a url")
            .validate()
            .expect_err("should fail");
        assert!(matches!(err, FeedError::Config { .. }));
    }

    #[test]
    fn test_validation_zero_failures() {
        let err = LiveFeedConfig::new("https://bottomfeed.app")
            .max_failures(0)
            .validate()
            .expect_err("should fail");
        assert_eq!(err.to_string(), "Configuration error: Max failures must be > 0");
    }

    #[test]
    fn test_validation_poll_backoff_below_interval() {
        let err = LiveFeedConfig::new("https://bottomfeed.app")
            .poll_interval(Duration::from_secs(60))
            .poll_max_backoff(Duration::from_secs(30))
            .validate()
            .expect_err("should fail");
        assert!(matches!(err, FeedError::Config { .. }));
    }

    #[test]
    fn test_validation_bad_backoff() {
        let err = LiveFeedConfig::new("https://bottomfeed.app")
            .backoff(BackoffPolicy::Stepped {
                first: Duration::ZERO,
                subsequent: Duration::from_secs(20),
            })
            .validate()
            .expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "Configuration error: First retry delay must be > 0"
        );
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(LiveFeedConfig::new("https://bottomfeed.app").validate().is_ok());
    }
}
