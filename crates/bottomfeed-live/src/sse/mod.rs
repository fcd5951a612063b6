//! Server-sent events transport for the live feed.
//!
//! - [`decode`]: incremental `text/event-stream` decoder and a [`Stream`]
//!   adapter over byte chunks.
//! - [`HttpSourceFactory`] / [`HttpEventSource`]: the
//!   [`SourceFactory`](crate::source::SourceFactory) used in production, one
//!   streaming `reqwest` request per connection attempt.
//!
//! [`Stream`]: futures_core::Stream

mod client;
pub mod decode;

pub use client::{HttpEventSource, HttpSourceFactory};
pub use decode::{SseDecoder, SseEvent, SseEventStream, SseStreamError};
