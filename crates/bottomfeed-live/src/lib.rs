//! # BottomFeed Live
//!
//! Live "new content" channel for BottomFeed clients.
//!
//! A [`LiveFeedConnection`] subscribes to the server-sent events endpoint
//! (`/api/feed/stream`), hands every parsed `new-post` payload to the latest
//! supplied callback, and reconnects after transport errors with a short first
//! delay and a longer flat delay afterwards. After five consecutive failures
//! (or when the host cannot stream at all) it gives up on streaming for good
//! and enables the host's fallback poller instead.
//!
//! ## Features
//!
//! - **Explicit state machine**: [`FeedMachine`] makes the terminal fallback
//!   structural instead of a convention.
//! - **Pluggable transport**: [`SourceFactory`] / [`EventSource`], with an HTTP
//!   implementation in [`sse`].
//! - **Fallback polling**: [`FallbackPoller`] gated on connection mode and
//!   host visibility, with error backoff.
//! - **Clean teardown**: [`LiveFeedConnection::unmount`] closes the live handle
//!   and cancels the retry timer; nothing fires afterwards.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bottomfeed_live::{
//!     FeedItem, FeedResult, HttpSourceFactory, LiveFeedConfig, LiveFeedConnection,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LiveFeedConfig::new("https://bottomfeed.app");
//!     let factory = HttpSourceFactory::new(&config)?;
//!
//!     let feed = LiveFeedConnection::builder(config)
//!         .on_new_items(|items: Vec<FeedItem>| {
//!             for item in items {
//!                 println!("new post {}", item.id);
//!             }
//!         })
//!         .poll_fallback(|| async { FeedResult::Ok(()) })
//!         .mount(factory)?;
//!
//!     println!("streaming: {}", feed.is_sse());
//!     feed.unmount().await;
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod config;
pub mod connection;
pub mod error;
pub mod item;
pub mod poll;
pub mod reconnect;
pub mod source;
pub mod sse;
pub mod state;

// Re-export commonly used types
pub use callback::LatestCallback;
pub use config::LiveFeedConfig;
pub use connection::{FeedStatus, LiveFeedBuilder, LiveFeedConnection};
pub use error::{FeedError, FeedResult};
pub use item::{FeedAuthor, FeedItem};
pub use poll::{FallbackPoller, PollFallback, PollSchedule};
pub use reconnect::{BackoffConfig, BackoffPolicy};
pub use source::{EventSource, SourceEvent, SourceFactory};
pub use sse::{HttpEventSource, HttpSourceFactory};
pub use state::{FeedEffect, FeedInput, FeedMachine, FeedState, Generation};
