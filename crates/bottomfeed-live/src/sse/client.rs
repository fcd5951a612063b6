//! HTTP server-sent events transport built on `reqwest`.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, info};
use url::Url;

use super::decode::SseEventStream;
use crate::{
    config::LiveFeedConfig,
    error::{FeedError, FeedResult},
    source::{EventSource, SourceEvent, SourceFactory},
    state::Generation,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Opens [`HttpEventSource`]s against `{base_url}{stream_path}`.
///
/// The factory remembers the last event id seen by any of its sources and
/// sends it as `Last-Event-ID` on the next connection attempt.
#[derive(Clone, Debug)]
pub struct HttpSourceFactory {
    client: reqwest::Client,
    url: Url,
    headers: http::HeaderMap,
    connect_timeout: std::time::Duration,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl HttpSourceFactory {
    /// Build a factory (and its HTTP client) from the connection config.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL is invalid, a header value is not
    /// representable, or the HTTP client cannot be built.
    pub fn new(config: &LiveFeedConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| FeedError::config(format!("Failed to build HTTP client: {e}")))?;
        Self::with_client(config, client)
    }

    /// Build a factory around an existing client.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL is invalid or the API key is not a
    /// valid header value.
    pub fn with_client(config: &LiveFeedConfig, client: reqwest::Client) -> FeedResult<Self> {
        let mut headers = config.headers.clone();
        headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );
        if let Some(key) = &config.api_key {
            let value = http::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| FeedError::config(format!("Invalid API key: {e}")))?;
            headers.insert(http::header::AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            url: config.stream_url()?,
            headers,
            connect_timeout: config.connect_timeout,
            last_event_id: Arc::new(Mutex::new(None)),
        })
    }

    /// The endpoint this factory connects to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Last event id observed on any source from this factory.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }
}

impl SourceFactory for HttpSourceFactory {
    type Source = HttpEventSource;

    fn connect(&self, generation: Generation) -> HttpEventSource {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(read_stream(self.clone(), generation, tx));
        HttpEventSource {
            rx,
            task: Some(task),
        }
    }
}

/// One HTTP streaming request. Its reader runs on a dedicated task that is
/// aborted by [`close`](EventSource::close) or on drop.
#[derive(Debug)]
pub struct HttpEventSource {
    rx: mpsc::Receiver<SourceEvent>,
    task: Option<JoinHandle<()>>,
}

impl EventSource for HttpEventSource {
    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Stream for HttpEventSource {
    type Item = SourceEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for HttpEventSource {
    fn drop(&mut self) {
        self.close();
    }
}

async fn open_stream(factory: &HttpSourceFactory) -> FeedResult<reqwest::Response> {
    let mut headers = factory.headers.clone();
    if let Some(id) = factory.last_event_id()
        && let Ok(value) = http::HeaderValue::from_str(&id)
    {
        headers.insert(
            http::header::HeaderName::from_static("last-event-id"),
            value,
        );
    }

    let request = factory
        .client
        .get(factory.url.clone())
        .headers(headers)
        .send();
    let resp = timeout(factory.connect_timeout, request)
        .await
        .map_err(|_| FeedError::timeout(factory.connect_timeout))??;

    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::invalid_status(status));
    }

    if let Some(ct) = resp.headers().get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or("");
        if !ct_str.contains("text/event-stream") {
            return Err(FeedError::invalid_content_type(ct_str));
        }
    }

    Ok(resp)
}

/// Reader task: request, report `Open`, forward decoded events, and finish
/// with exactly one `Error`.
async fn read_stream(
    factory: HttpSourceFactory,
    generation: Generation,
    tx: mpsc::Sender<SourceEvent>,
) {
    let resp = match open_stream(&factory).await {
        Ok(resp) => resp,
        Err(err) => {
            let _ = tx.send(SourceEvent::Error(err)).await;
            return;
        }
    };

    info!(url = %factory.url, generation, "Live feed stream opened");
    if tx.send(SourceEvent::Open).await.is_err() {
        return;
    }

    let mut events = SseEventStream::new(resp.bytes_stream());
    if let Some(id) = factory.last_event_id() {
        events = events.with_last_event_id(id);
    }

    let err = loop {
        match events.next().await {
            Some(Ok(event)) => {
                if !event.id.is_empty() {
                    *factory.last_event_id.lock() = Some(event.id.clone());
                }
                debug!(generation, event_type = %event.event, id = %event.id, "SSE event received");
                let message = SourceEvent::Message {
                    event: event.event,
                    data: event.data,
                    id: event.id,
                };
                if tx.send(message).await.is_err() {
                    return;
                }
            }
            Some(Err(super::decode::SseStreamError::Transport(e))) => break FeedError::Http(e),
            Some(Err(super::decode::SseStreamError::Utf8(e))) => {
                debug!(generation, error = %e, "Skipping undecodable SSE line");
            }
            None => break FeedError::StreamEnded,
        }
    };

    let _ = tx.send(SourceEvent::Error(err)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_headers() {
        let config = LiveFeedConfig::new("https://bottomfeed.app")
            .api_key("bf_test")
            .agent_id("agent-1");
        let factory = HttpSourceFactory::new(&config).expect("factory");

        assert_eq!(
            factory.url().as_str(),
            "https://bottomfeed.app/api/feed/stream?agent_id=agent-1"
        );
        assert_eq!(
            factory.headers.get(http::header::AUTHORIZATION),
            Some(&http::HeaderValue::from_static("Bearer bf_test"))
        );
        assert_eq!(
            factory.headers.get(http::header::ACCEPT),
            Some(&http::HeaderValue::from_static("text/event-stream"))
        );
        assert!(factory.last_event_id().is_none());
    }

    #[test]
    fn test_factory_rejects_invalid_api_key() {
        let config = LiveFeedConfig::new("https://bottomfeed.app").api_key("bad\nkey");
        let err = HttpSourceFactory::new(&config).expect_err("should fail");
        assert!(matches!(err, FeedError::Config { .. }));
    }
}
