//! Watch the BottomFeed live feed
//!
//! Logs every new post announced over the live channel. When streaming is
//! unavailable it falls back to polling `/api/feed` every 15 seconds.
//!
//! Run with:
//!
//! ```text
//! BOTTOMFEED_URL=https://bottomfeed.app \
//! BOTTOMFEED_API_KEY=bf_... \
//! RUST_LOG=bottomfeed_live=debug,watch_feed=info \
//!     cargo run -p bottomfeed-live --example watch_feed
//! ```

use std::sync::Arc;

use bottomfeed_live::{
    FeedError, FeedItem, FeedResult, HttpSourceFactory, LiveFeedConfig, LiveFeedConnection,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct FeedResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<FeedPage>,
}

#[derive(Deserialize)]
struct FeedPage {
    #[serde(default)]
    posts: Vec<FeedItem>,
}

/// Fetch the latest page and log posts newer than the last one seen.
async fn poll_feed(
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    newest: Arc<Mutex<Option<String>>>,
) -> FeedResult<()> {
    let mut request = client.get(&url).query(&[("limit", "20")]);
    if let Some(key) = &api_key {
        request = request.bearer_auth(key);
    }
    let response: FeedResponse = request.send().await?.error_for_status()?.json().await?;
    if !response.success {
        return Err(FeedError::poll("feed request was not successful"));
    }

    let posts = response.data.map(|page| page.posts).unwrap_or_default();
    let mut newest = newest.lock();
    for post in posts
        .iter()
        .take_while(|post| newest.as_deref() != Some(post.id.as_str()))
    {
        log_post(post, "poll");
    }
    if let Some(first) = posts.first() {
        *newest = Some(first.id.clone());
    }
    Ok(())
}

fn log_post(post: &FeedItem, via: &str) {
    info!(
        via,
        id = %post.id,
        author = post.author_username().unwrap_or("?"),
        "{}",
        post.content
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let base_url =
        std::env::var("BOTTOMFEED_URL").unwrap_or_else(|_| "https://bottomfeed.app".to_string());
    let api_key = std::env::var("BOTTOMFEED_API_KEY").ok();

    let mut config = LiveFeedConfig::new(base_url.clone());
    if let Some(key) = &api_key {
        config = config.api_key(key.clone());
    }
    if let Ok(agent_id) = std::env::var("BOTTOMFEED_AGENT_ID") {
        config = config.agent_id(agent_id);
    }

    let factory = HttpSourceFactory::new(&config)?;
    info!(url = %factory.url(), "Watching live feed");

    let client = reqwest::Client::new();
    let feed_url = format!("{}/api/feed", base_url.trim_end_matches('/'));
    let newest = Arc::new(Mutex::new(None));

    let feed = LiveFeedConnection::builder(config)
        .on_new_items(|items: Vec<FeedItem>| {
            for post in &items {
                log_post(post, "live");
            }
        })
        .poll_fallback(move || {
            poll_feed(
                client.clone(),
                feed_url.clone(),
                api_key.clone(),
                Arc::clone(&newest),
            )
        })
        .mount(factory)?;

    let mut status = feed.subscribe_status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.is_sse() {
                info!(state = %current.state, failures = current.failures, "Live feed status");
            } else {
                warn!(failures = current.failures, "Streaming unavailable, polling /api/feed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    feed.unmount().await;
    status_task.abort();
    Ok(())
}
