//! Fallback polling while the live channel is unavailable.
//!
//! [`FallbackPoller`] runs alongside the connection driver. It is enabled
//! exactly when the connection status is not in streaming mode, and it only
//! fires while the host reports itself visible.

use std::{future::Future, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{connection::FeedStatus, error::FeedResult};

/// Host-supplied refresh used while streaming is unavailable.
///
/// Implemented for any `Fn() -> impl Future<Output = FeedResult<()>>`.
pub trait PollFallback: Send + Sync + 'static {
    /// Fetch whatever the live channel would have announced.
    fn poll(&self) -> impl Future<Output = FeedResult<()>> + Send;
}

impl<F, Fut> PollFallback for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FeedResult<()>> + Send,
{
    fn poll(&self) -> impl Future<Output = FeedResult<()>> + Send {
        self()
    }
}

/// Cadence settings for [`FallbackPoller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between polls while healthy.
    pub interval: Duration,
    /// Cap for the delay after consecutive poll errors.
    pub max_backoff: Duration,
}

impl PollSchedule {
    /// Delay before the next poll after `consecutive_errors` failed polls:
    /// `min(interval * 2^errors, max_backoff)`.
    pub fn delay(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors == 0 {
            return self.interval;
        }
        let factor = 2u32.saturating_pow(consecutive_errors.min(16));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Periodic poller gated on connection mode and host visibility.
pub struct FallbackPoller<P> {
    fallback: P,
    schedule: PollSchedule,
    status: watch::Receiver<FeedStatus>,
    visible: watch::Receiver<bool>,
    stop: watch::Receiver<bool>,
}

impl<P: PollFallback> FallbackPoller<P> {
    /// Create a poller. It does nothing until [`run`](Self::run) is awaited.
    pub fn new(
        fallback: P,
        schedule: PollSchedule,
        status: watch::Receiver<FeedStatus>,
        visible: watch::Receiver<bool>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            fallback,
            schedule,
            status,
            visible,
            stop,
        }
    }

    fn is_enabled(&self) -> bool {
        !self.status.borrow().is_sse()
    }

    fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Run until the stop signal is raised.
    pub async fn run(mut self) {
        let mut consecutive_errors: u32 = 0;
        let mut poll_now = false;

        loop {
            if self.is_stopped() {
                debug!("Fallback poller stopped");
                return;
            }

            if !self.is_enabled() || !self.is_visible() {
                let was_hidden = !self.is_visible();
                tokio::select! {
                    _ = changed(&mut self.stop) => {}
                    _ = changed(&mut self.status) => {}
                    _ = changed(&mut self.visible) => {
                        // Regaining visibility refreshes right away.
                        poll_now = was_hidden && self.is_visible();
                    }
                }
                continue;
            }

            if !poll_now {
                let delay = self.schedule.delay(consecutive_errors);
                tokio::select! {
                    _ = changed(&mut self.stop) => continue,
                    _ = changed(&mut self.visible) => continue,
                    () = sleep(delay) => {}
                }
            }
            poll_now = false;

            if self.is_stopped() || !self.is_visible() {
                continue;
            }

            match self.fallback.poll().await {
                Ok(()) => {
                    if consecutive_errors > 0 {
                        info!(after_errors = consecutive_errors, "Fallback poll recovered");
                    }
                    consecutive_errors = 0;
                }
                Err(err) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    warn!(
                        error = %err,
                        consecutive_errors,
                        backoff_ms = self.schedule.delay(consecutive_errors).as_millis() as u64,
                        "Fallback poll failed"
                    );
                }
            }
        }
    }
}

/// Resolves when the watched value changes; never resolves once the sender
/// is gone, so a finished publisher does not spin the select loop.
async fn changed<T>(rx: &mut watch::Receiver<T>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
