//! # Reconnect Supervisor
//!
//! Keeps the hub stream alive for the lifetime of the process.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (stream ends) -> Disconnected -> Connecting ...
//!                     |
//!                     +-> (attempt fails) -> Backoff -> Connecting ...
//! ```
//!
//! A connection attempt is negotiate + connect + subscribe. Failed attempts
//! sleep for the current backoff delay, which then grows by the configured
//! factor up to the ceiling. A successful attempt resets the delay, opens a
//! new `ConnectionEpoch` and streams items into the sink until the
//! connection ends, after which the supervisor reconnects straight away.
//! Only cancellation, through `SupervisorHandle::close`, stops the loop.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::{BackoffConfig, HubConfig};
use super::demux::{FrameDemultiplexer, ItemStream};
use super::epoch::ConnectionEpoch;
use super::error::{ConnectError, TransportError};
use super::filter::ItemSink;
use super::negotiate::{HttpNegotiator, Negotiate};
use super::subscribe::subscribe;
use super::transport::{Connect, Connection, WsConnector};

/// Where the supervisor is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No connection; initial and final state.
    Disconnected,
    /// Negotiating, connecting or subscribing.
    Connecting,
    /// Streaming items.
    Connected,
    /// Waiting before the next attempt.
    Backoff,
}

/// Exponential delay between failed connection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    /// Starts at the floor. Factors below 1 and ceilings below the floor are raised.
    pub fn new(config: &BackoffConfig) -> Self {
        let factor = if config.factor.is_finite() {
            config.factor.max(1.0)
        } else {
            1.0
        };
        Self {
            floor: config.floor,
            ceiling: config.ceiling.max(config.floor),
            factor,
            current: config.floor,
        }
    }

    /// Returns the delay to use now and grows the next one, capped at the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
            .unwrap_or(self.ceiling)
            .min(self.ceiling);
        delay
    }

    /// Back to the floor, after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// External control over a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SupervisorState>,
}

impl SupervisorHandle {
    /// Stops the client: the active connection (if any) is closed and the
    /// supervisor returns. Safe to call any number of times, from any task.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::info!("Closing live timing client.");
        self.cancel.cancel();
    }

    /// Whether `close` was called (or the shared token fired).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The supervisor's current state.
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Waits until the supervisor reaches `target`. Returns `false` if the
    /// supervisor was dropped first.
    pub async fn wait_for(&mut self, target: SupervisorState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}

enum StreamEnd {
    Cancelled,
    Closed { frames: u64 },
    Failed(TransportError),
}

/// Drives negotiate, connect and subscribe, then streams items into the sink.
pub struct ReconnectSupervisor<N, C, S> {
    negotiator: N,
    connector: C,
    sink: S,
    demux: FrameDemultiplexer,
    hub_name: String,
    topic: String,
    startup_grace: Duration,
    inactivity_timeout: Option<Duration>,
    backoff: Backoff,
    epochs: u64,
    state: watch::Sender<SupervisorState>,
    cancel: CancellationToken,
}

impl<S: ItemSink> ReconnectSupervisor<HttpNegotiator, WsConnector, S> {
    /// Supervisor for the real hub endpoints in `config`.
    pub fn from_config(config: &HubConfig, sink: S) -> Result<(Self, SupervisorHandle), ConnectError> {
        let negotiator = HttpNegotiator::new(config)?;
        let connector = WsConnector::new(config)?;
        Ok(Self::new(config, negotiator, connector, sink))
    }
}

impl<N, C, S> ReconnectSupervisor<N, C, S>
where
    N: Negotiate,
    C: Connect,
    S: ItemSink,
{
    /// Supervisor with its own cancellation token.
    pub fn new(config: &HubConfig, negotiator: N, connector: C, sink: S) -> (Self, SupervisorHandle) {
        Self::with_cancellation(config, negotiator, connector, sink, CancellationToken::new())
    }

    /// Like `new`, but stops when `cancel` (for example a host shutdown token) fires.
    pub fn with_cancellation(
        config: &HubConfig,
        negotiator: N,
        connector: C,
        sink: S,
        cancel: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (state, state_rx) = watch::channel(SupervisorState::Disconnected);
        let handle = SupervisorHandle {
            cancel: cancel.clone(),
            state: state_rx,
        };

        let supervisor = Self {
            negotiator,
            connector,
            sink,
            demux: FrameDemultiplexer::from_config(config),
            hub_name: config.hub_name.clone(),
            topic: config.topic.clone(),
            startup_grace: config.startup_grace,
            inactivity_timeout: config.inactivity_timeout,
            backoff: Backoff::new(&config.backoff),
            epochs: 0,
            state,
            cancel,
        };

        (supervisor, handle)
    }

    /// Runs until cancelled.
    pub async fn run(mut self) {
        log::info!("Live timing supervisor started for {}.", self.topic);

        while !self.cancel.is_cancelled() {
            self.set_state(SupervisorState::Connecting);

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                attempt = self.establish() => attempt,
            };

            match attempt {
                Ok(mut connection) => {
                    self.backoff.reset();
                    self.epochs += 1;
                    let epoch = ConnectionEpoch::begin(self.epochs, Utc::now(), self.startup_grace);
                    log::info!(
                        "Hub connection established (epoch {}), ignoring items before {}.",
                        epoch.sequence(),
                        epoch.startup_cutoff()
                    );
                    self.set_state(SupervisorState::Connected);

                    let end = self.consume(&mut connection, &epoch).await;
                    connection.close().await;
                    self.set_state(SupervisorState::Disconnected);

                    match end {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Closed { frames } => {
                            log::warn!("Hub stream closed after {} frames. Reconnecting...", frames);
                        }
                        StreamEnd::Failed(e) => {
                            log::warn!("Hub stream failed: {}. Reconnecting...", e);
                        }
                    }
                }
                Err(e) => {
                    self.set_state(SupervisorState::Backoff);
                    let delay = self.backoff.next_delay();
                    log::warn!(
                        "Hub reconnect failed ({}). Retrying in {:.1}s ...",
                        e,
                        delay.as_secs_f64()
                    );

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(SupervisorState::Disconnected);
        log::info!("Live timing supervisor stopped.");
    }

    async fn establish(&self) -> Result<C::Connection, ConnectError> {
        let credentials = self.negotiator.negotiate().await?;
        let mut connection = self.connector.connect(credentials).await?;

        if let Err(e) = subscribe(&mut connection, &self.hub_name, &self.topic).await {
            connection.close().await;
            return Err(e.into());
        }
        Ok(connection)
    }

    async fn consume(&self, connection: &mut C::Connection, epoch: &ConnectionEpoch) -> StreamEnd {
        let mut items = ItemStream::new(connection, &self.demux, self.inactivity_timeout);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                next = items.next_item() => next,
            };

            match next {
                Ok(Some(item)) => self.sink.handle(item, epoch).await,
                Ok(None) => {
                    return StreamEnd::Closed {
                        frames: items.frames_read(),
                    }
                }
                Err(e) => return StreamEnd::Failed(e),
            }
        }
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Supervisor state {:?} -> {:?}", previous, next);
        }
    }
}
