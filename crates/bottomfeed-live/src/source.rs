//! Transport abstraction for the live feed.
//!
//! A [`SourceFactory`] opens one [`EventSource`] per connection attempt. The
//! driver in [`connection`](crate::connection) owns at most one source at a
//! time and closes it before it asks the factory for the next one.

use futures_core::Stream;

use crate::{error::FeedError, state::Generation};

/// Something a transport handle reports.
#[derive(Debug)]
pub enum SourceEvent {
    /// The connection is established.
    Open,
    /// A server-sent event arrived.
    Message {
        /// Event type (`message` for unnamed events).
        event: String,
        /// Raw data payload.
        data: String,
        /// Event id, empty when the server never sent one.
        id: String,
    },
    /// The connection failed or was dropped.
    Error(FeedError),
}

impl SourceEvent {
    /// Convenience constructor for a named message.
    pub fn message(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Message {
            event: event.into(),
            data: data.into(),
            id: String::new(),
        }
    }
}

/// One live connection attempt.
///
/// The stream ending (yielding `None`) is treated like
/// [`SourceEvent::Error`] with [`FeedError::StreamEnded`].
pub trait EventSource: Stream<Item = SourceEvent> + Unpin + Send + 'static {
    /// Close the connection. Must be idempotent: closing an already closed
    /// source is a no-op.
    fn close(&mut self);
}

/// Opens [`EventSource`]s against the live feed endpoint.
pub trait SourceFactory: Send + Sync + 'static {
    /// The handle type produced by [`connect`](SourceFactory::connect).
    type Source: EventSource;

    /// Whether this environment can stream at all. When `false` the
    /// connection starts directly in polling mode and `connect` is never
    /// called.
    fn is_supported(&self) -> bool {
        true
    }

    /// Start a new connection attempt. Connection failures are reported
    /// through the returned source, not here.
    fn connect(&self, generation: Generation) -> Self::Source;
}
