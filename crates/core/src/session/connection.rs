//! Lifecycle of the single transport to the agent endpoint.
//!
//! `SessionConnection` owns the live [`TransportHandle`], the keepalive
//! timer and the reconnect timer. It never runs anything on its own: the
//! session loop awaits [`SessionConnection::next_activity`] and feeds the
//! results back through the `on_*` methods. Replacing the transport drops
//! the old handle and both timers, so nothing stale reaches the session.
//! A connect in flight is held here too and polled from `next_activity`,
//! so the session keeps serving commands while it resolves.

use crate::session::transport::{OutboundFrame, TransportEvent, TransportHandle};
use anyhow::anyhow;
use serde::Serialize;
use std::future::{Future, pending};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};
use tracing::{debug, error, info, warn};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(6);

/// How long a credential fetch plus handshake may take before the attempt
/// counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A transport being opened: credential fetch and handshake.
pub type ConnectFuture = Pin<Box<dyn Future<Output = anyhow::Result<TransportHandle>> + Send>>;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    #[default]
    Unstarted,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Exponential backoff with a ceiling on both delay and attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Attempts allowed in total, counting the first connect.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What observers see of the connection.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionSnapshot {
    pub state: SocketState,
    pub reconnect_attempts: u32,
    pub rate_limited: bool,
}

/// What happened after a transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// `connect(attempt)` is scheduled after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Retries are exhausted. Reported once; no further attempts are made.
    RateLimited,
    /// Nothing to do: already rate limited or already closed.
    Ignored,
}

/// Something the session loop has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionActivity {
    Transport(TransportEvent),
    KeepaliveDue,
    /// The backoff elapsed; connect with this attempt number.
    ReconnectDue(u32),
    /// The connect in flight failed or timed out and was handled like a close.
    ConnectFailed(CloseOutcome),
}

pub struct SessionConnection {
    policy: ReconnectPolicy,
    keepalive_interval: Duration,
    connect_timeout: Duration,
    state: SocketState,
    attempt: u32,
    rate_limited: bool,
    connecting: Option<ConnectFuture>,
    transport: Option<TransportHandle>,
    keepalive: Option<Interval>,
    reconnect: Option<(Pin<Box<Sleep>>, u32)>,
}

impl SessionConnection {
    pub fn new(policy: ReconnectPolicy, keepalive_interval: Duration) -> Self {
        Self {
            policy,
            keepalive_interval,
            connect_timeout: CONNECT_TIMEOUT,
            state: SocketState::Unstarted,
            attempt: 0,
            rate_limited: false,
            connecting: None,
            transport: None,
            keepalive: None,
            reconnect: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SocketState::Connected
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            reconnect_attempts: self.attempt,
            rate_limited: self.rate_limited,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Prepares connection attempt `attempt`: the previous transport and
    /// both timers are torn down first. Returns false once rate limited.
    pub fn begin_attempt(&mut self, attempt: u32) -> bool {
        if self.rate_limited {
            warn!(attempt, "Refusing to connect, retries are exhausted");
            return false;
        }
        self.teardown();
        self.attempt = attempt;
        self.state = SocketState::Connecting;
        true
    }

    /// Hands over the connect for the current attempt. It resolves inside
    /// [`SessionConnection::next_activity`]; a failure or a connect that
    /// outlives the timeout goes down the close path.
    pub fn start_connect<F>(&mut self, connect: F)
    where
        F: Future<Output = anyhow::Result<TransportHandle>> + Send + 'static,
    {
        let limit = self.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            match timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("connect timed out after {} ms", limit.as_millis())),
            }
        }));
    }

    /// Whether a connect is in flight.
    pub fn is_connecting(&self) -> bool {
        self.connecting.is_some()
    }

    /// Adopts the transport produced for the current attempt.
    pub fn attach(&mut self, transport: TransportHandle) {
        self.transport = Some(transport);
    }

    pub fn on_open(&mut self) {
        self.state = SocketState::Connected;
        let mut keepalive = interval_at(
            Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(keepalive);
        info!(attempt = self.attempt, "Connected to agent");
    }

    pub fn on_error(&mut self, message: &str) {
        warn!(attempt = self.attempt, error = %message, "Transport error");
        self.state = SocketState::Failed;
    }

    /// The transport closed. Schedules the next attempt or gives up.
    pub fn on_close(&mut self) -> CloseOutcome {
        if self.transport.is_none() && self.state != SocketState::Connecting {
            return CloseOutcome::Ignored;
        }
        self.transport = None;
        self.keepalive = None;
        if self.state != SocketState::Failed {
            self.state = SocketState::Closed;
        }
        self.schedule_retry()
    }

    /// The transport could not be built at all (credential fetch or
    /// connector failure). Treated exactly like a close.
    pub fn on_connect_failed(&mut self, error: &anyhow::Error) -> CloseOutcome {
        warn!(attempt = self.attempt, error = %error, "Could not open transport");
        self.connecting = None;
        self.transport = None;
        self.keepalive = None;
        self.state = SocketState::Failed;
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> CloseOutcome {
        if self.rate_limited {
            return CloseOutcome::Ignored;
        }
        let next = self.attempt + 1;
        if next >= self.policy.max_attempts {
            self.rate_limited = true;
            self.reconnect = None;
            error!(
                attempts = next,
                "Giving up on the agent connection, retries exhausted"
            );
            return CloseOutcome::RateLimited;
        }
        let delay = self.policy.delay(self.attempt);
        info!(attempt = next, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.reconnect = Some((Box::pin(sleep(delay)), next));
        CloseOutcome::Retry {
            attempt: next,
            delay,
        }
    }

    /// Writes a frame if and only if the transport is open. Nothing is queued.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.state != SocketState::Connected {
            return false;
        }
        match &self.transport {
            Some(transport) => transport.try_send(frame),
            None => false,
        }
    }

    /// Deterministic teardown. Safe to call any number of times.
    pub fn close(&mut self) {
        self.teardown();
        if self.state != SocketState::Unstarted {
            self.state = SocketState::Closed;
        }
    }

    fn teardown(&mut self) {
        if self.connecting.take().is_some() {
            debug!("Abandoned connect in flight");
        }
        if self.transport.take().is_some() {
            debug!("Dropped previous transport");
        }
        self.keepalive = None;
        self.reconnect = None;
    }

    /// Waits for the next transport event, timer or connect result. Pends
    /// forever when nothing is live. Cancel safe: everything it polls is
    /// owned by `self`.
    pub async fn next_activity(&mut self) -> ConnectionActivity {
        loop {
            let connected = {
                let Self {
                    connecting,
                    transport,
                    keepalive,
                    reconnect,
                    ..
                } = &mut *self;

                tokio::select! {
                    result = async {
                        match connecting.as_mut() {
                            Some(connect) => connect.as_mut().await,
                            None => pending().await,
                        }
                    } => {
                        *connecting = None;
                        result
                    }
                    event = async {
                        match transport.as_mut() {
                            Some(transport) => transport.recv().await,
                            None => pending().await,
                        }
                    } => return ConnectionActivity::Transport(event.unwrap_or(TransportEvent::Closed)),
                    _ = async {
                        match keepalive.as_mut() {
                            Some(keepalive) => {
                                keepalive.tick().await;
                            }
                            None => pending::<()>().await,
                        }
                    } => return ConnectionActivity::KeepaliveDue,
                    attempt = async {
                        match reconnect.as_mut() {
                            Some((timer, attempt)) => {
                                timer.as_mut().await;
                                *attempt
                            }
                            None => pending().await,
                        }
                    } => {
                        *reconnect = None;
                        return ConnectionActivity::ReconnectDue(attempt);
                    }
                }
            };

            match connected {
                // The pump reports `Opened` through the transport next.
                Ok(transport) => self.attach(transport),
                Err(e) => return ConnectionActivity::ConnectFailed(self.on_connect_failed(&e)),
            }
        }
    }
}
