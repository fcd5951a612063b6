//! Live feed connection driver.
//!
//! Provides [`LiveFeedConnection`] and its [`LiveFeedBuilder`]. Mounting a
//! connection spawns a background driver that owns the transport handle and
//! the single retry timer, feeds transport events through the
//! [`FeedMachine`], and publishes a [`FeedStatus`] on a watch channel.
//!
//! # Architecture
//!
//! ```text
//! LiveFeedBuilder::mount(factory)
//!   ├─ spawns ──► FeedDriver::run        (transport + retry timer + FeedMachine)
//!   │               │  status ──► watch<FeedStatus> ──► LiveFeedConnection::is_sse
//!   │               └─ payloads ──► LatestCallback ──► on_new_items
//!   └─ spawns ──► FallbackPoller::run    (enabled while !is_sse, optional)
//!
//! LiveFeedConnection::unmount / Drop ──► watch<bool> stop ──► driver + poller
//! ```

use std::{pin::Pin, time::Duration};

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Sleep, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    callback::LatestCallback,
    config::LiveFeedConfig,
    error::{FeedError, FeedResult},
    poll::{FallbackPoller, PollFallback, PollSchedule},
    source::{EventSource, SourceEvent, SourceFactory},
    state::{FeedEffect, FeedInput, FeedMachine, FeedState, Generation},
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot of the connection published after every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedStatus {
    /// Current state of the reconnect machine.
    pub state: FeedState,
    /// Consecutive transport failures since the last sign of health.
    pub failures: u32,
}

impl FeedStatus {
    fn of(machine: &FeedMachine) -> Self {
        Self {
            state: machine.state().clone(),
            failures: machine.failures(),
        }
    }

    /// `true` while the live channel is in use or being retried, `false`
    /// once the connection has fallen back to polling.
    pub fn is_sse(&self) -> bool {
        self.state.is_streaming_mode()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

type SpawnPoller = Box<
    dyn FnOnce(
            PollSchedule,
            watch::Receiver<FeedStatus>,
            watch::Receiver<bool>,
            watch::Receiver<bool>,
        ) -> JoinHandle<()>
        + Send,
>;

/// Builder returned by [`LiveFeedConnection::builder`].
pub struct LiveFeedBuilder<T> {
    config: LiveFeedConfig,
    callback: LatestCallback<T>,
    spawn_poller: Option<SpawnPoller>,
    visibility: Option<watch::Receiver<bool>>,
}

impl<T> LiveFeedBuilder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Callback invoked with a one-element list for every accepted payload.
    #[must_use]
    pub fn on_new_items<F>(self, callback: F) -> Self
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        self.callback.replace(callback);
        self
    }

    /// Refresh to run every `poll_interval` once streaming has been given up.
    #[must_use]
    pub fn poll_fallback<P: PollFallback>(mut self, fallback: P) -> Self {
        self.spawn_poller = Some(Box::new(move |schedule, status, visible, stop| {
            tokio::spawn(FallbackPoller::new(fallback, schedule, status, visible, stop).run())
        }));
        self
    }

    /// Host visibility signal gating the fallback poller. Without one the host
    /// is treated as always visible.
    #[must_use]
    pub fn visibility(mut self, visible: watch::Receiver<bool>) -> Self {
        self.visibility = Some(visible);
        self
    }

    /// Validate the configuration and start the connection.
    ///
    /// Must be called from within a tokio runtime. If `factory` reports no
    /// transport support the connection starts in polling mode and never
    /// opens a source.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the configuration is invalid.
    pub fn mount<F: SourceFactory>(self, factory: F) -> FeedResult<LiveFeedConnection<T>> {
        self.config.validate()?;

        let mut machine = FeedMachine::new(self.config.max_failures, self.config.backoff);
        let effect = machine.start(factory.is_supported());
        let (status_tx, status_rx) = watch::channel(FeedStatus::of(&machine));
        let (stop_tx, stop_rx) = watch::channel(false);

        let driver = if effect == FeedEffect::Fallback {
            info!("Live feed transport unsupported, polling only");
            None
        } else {
            let driver = FeedDriver {
                factory,
                machine,
                content_event: self.config.content_event.clone(),
                callback: self.callback.clone(),
                status: status_tx,
                stop: stop_rx.clone(),
                source: None,
                retry: None,
            };
            Some(tokio::spawn(driver.run(effect)))
        };

        let poller = self.spawn_poller.map(|spawn| {
            let schedule = PollSchedule {
                interval: self.config.poll_interval,
                max_backoff: self.config.poll_max_backoff,
            };
            let visible = self.visibility.unwrap_or_else(|| watch::channel(true).1);
            spawn(schedule, status_rx.clone(), visible, stop_rx)
        });

        Ok(LiveFeedConnection {
            callback: self.callback,
            status: status_rx,
            stop: stop_tx,
            driver,
            poller,
        })
    }
}

// ---------------------------------------------------------------------------
// LiveFeedConnection
// ---------------------------------------------------------------------------

/// A mounted live feed connection.
///
/// Dropping the connection raises the stop signal; the driver closes the
/// current transport handle the next time it runs. Use
/// [`unmount`](Self::unmount) to wait for that teardown to finish.
pub struct LiveFeedConnection<T> {
    callback: LatestCallback<T>,
    status: watch::Receiver<FeedStatus>,
    stop: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

impl<T> LiveFeedConnection<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Start building a connection with the given configuration.
    pub fn builder(config: LiveFeedConfig) -> LiveFeedBuilder<T> {
        LiveFeedBuilder {
            config,
            callback: LatestCallback::noop(),
            spawn_poller: None,
            visibility: None,
        }
    }
}

impl<T> LiveFeedConnection<T> {
    /// `true` while streaming or retrying below the failure threshold.
    pub fn is_sse(&self) -> bool {
        self.status.borrow().is_sse()
    }

    /// Current status snapshot.
    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Receiver for status updates.
    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Replace the new-items callback. The transport is left untouched.
    pub fn set_on_new_items<F>(&self, callback: F)
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        self.callback.replace(callback);
    }

    /// Stop the connection and wait until the transport handle is closed and
    /// the background tasks have exited.
    pub async fn unmount(mut self) {
        self.stop.send_replace(true);
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        if let Some(poller) = self.poller.take() {
            poller.abort();
            let _ = poller.await;
        }
        info!("Live feed unmounted");
    }
}

impl<T> Drop for LiveFeedConnection<T> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

struct FeedDriver<F: SourceFactory, T> {
    factory: F,
    machine: FeedMachine,
    content_event: String,
    callback: LatestCallback<T>,
    status: watch::Sender<FeedStatus>,
    stop: watch::Receiver<bool>,
    /// At most one live handle, tagged with its generation.
    source: Option<(Generation, F::Source)>,
    /// At most one pending reconnect.
    retry: Option<Pin<Box<Sleep>>>,
}

impl<F, T> FeedDriver<F, T>
where
    F: SourceFactory,
    T: DeserializeOwned + Send + 'static,
{
    async fn run(mut self, mut effect: FeedEffect) {
        loop {
            if !self.apply(effect) {
                return;
            }

            let input = tokio::select! {
                biased;

                _ = self.stop.changed() => None,
                () = wait_retry(&mut self.retry) => Some(FeedInput::RetryElapsed),
                (generation, event) = next_event(&mut self.source) => {
                    self.on_event(generation, event)
                }
            };

            if self.is_stopped() {
                self.close_source();
                self.retry = None;
                debug!("Live feed driver stopped");
                return;
            }

            effect = match input {
                Some(input) => self.machine.handle(input),
                None => FeedEffect::Nothing,
            };
            self.publish();
        }
    }

    /// Carry out an effect. Returns `false` once the driver has nothing left
    /// to do.
    fn apply(&mut self, effect: FeedEffect) -> bool {
        match effect {
            FeedEffect::Connect { generation } => {
                self.retry = None;
                self.close_source();
                info!(generation, "Live feed connecting");
                self.source = Some((generation, self.factory.connect(generation)));
            }
            FeedEffect::Retry { delay } => {
                self.close_source();
                warn!(
                    failures = self.machine.failures(),
                    delay_ms = duration_ms(delay),
                    "Live feed reconnecting after backoff"
                );
                self.retry = Some(Box::pin(sleep(delay)));
            }
            FeedEffect::Fallback => {
                self.close_source();
                self.retry = None;
                info!(
                    failures = self.machine.failures(),
                    "Live feed unhealthy, falling back to polling"
                );
                return false;
            }
            FeedEffect::Nothing => {}
        }
        true
    }

    fn on_event(&self, generation: Generation, event: Option<SourceEvent>) -> Option<FeedInput> {
        match event {
            Some(SourceEvent::Open) => {
                debug!(generation, "Live feed open");
                Some(FeedInput::Opened(generation))
            }
            Some(SourceEvent::Message { event, data, .. }) => {
                if event != self.content_event {
                    debug!(generation, event_type = %event, "Ignoring live feed event");
                    return None;
                }
                let item = match serde_json::from_str::<T>(&data) {
                    Ok(item) => item,
                    Err(err) => {
                        debug!(generation, error = %FeedError::from(err), "Dropping malformed payload");
                        return None;
                    }
                };
                if self.is_stopped() {
                    return None;
                }
                self.callback.invoke(vec![item]);
                Some(FeedInput::PayloadAccepted(generation))
            }
            Some(SourceEvent::Error(err)) => {
                warn!(generation, error = %err, "Live feed transport error");
                Some(FeedInput::Failed(generation))
            }
            None => {
                warn!(generation, error = %FeedError::StreamEnded, "Live feed transport error");
                Some(FeedInput::Failed(generation))
            }
        }
    }

    fn close_source(&mut self) {
        if let Some((generation, mut source)) = self.source.take() {
            source.close();
            debug!(generation, "Live feed source closed");
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn publish(&self) {
        let next = FeedStatus::of(&self.machine);
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl<F: SourceFactory, T> Drop for FeedDriver<F, T> {
    fn drop(&mut self) {
        if let Some((_, mut source)) = self.source.take() {
            source.close();
        }
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
    *retry = None;
}

async fn next_event<S: EventSource>(
    source: &mut Option<(Generation, S)>,
) -> (Generation, Option<SourceEvent>) {
    match source {
        Some((generation, source)) => (*generation, source.next().await),
        None => std::future::pending().await,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
