//! Client side lifecycle of a component connection.
//!
//! A [`ComponentConnector`] locates a component's socket, connects with
//! exponential backoff and keeps the connection alive: when the protocol
//! reports a disconnection that was not requested, it reconnects with the
//! same policy and fires `<name>-reconnect` on the event bus.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use harbor_core::{Config, ConnectOptions};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::protocol::ComponentProtocol;
use crate::remote::{Link, RemoteComponent};
use crate::retry::{RetryScheduler, DEFAULT_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
use crate::transport::UnixTransport;

/// Bound on a single socket connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Idle => "idle",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Connected => "connected",
            ConnectorState::Reconnecting => "reconnecting",
            ConnectorState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

struct Control {
    state: ConnectorState,
    cancel: CancellationToken,
}

struct Inner {
    name: String,
    socket_path: PathBuf,
    events: EventBus,
    link: Arc<Link>,
    control: Mutex<Control>,
    attempts: AtomicU32,
    initial_delay: Duration,
    max_delay: Duration,
}

/// Connects to a published component and keeps the connection alive
pub struct ComponentConnector {
    inner: Arc<Inner>,
}

impl ComponentConnector {
    /// Create a connector for the component `name`, endpoint taken from `config`
    pub fn new(name: &str, config: &Config, events: EventBus) -> Self {
        Self::with_socket_path(name, config.socket_path(name), events)
    }

    /// Create a connector for a component listening on `socket_path`
    pub fn with_socket_path(name: &str, socket_path: impl Into<PathBuf>, events: EventBus) -> Self {
        Self::build(
            name,
            socket_path.into(),
            events,
            DEFAULT_INITIAL_DELAY,
            DEFAULT_MAX_DELAY,
        )
    }

    /// Override the first retry delay and the delay ceiling
    ///
    /// Only takes effect on a connector that has not connected yet.
    pub fn with_retry_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.initial_delay = initial_delay;
            inner.max_delay = max_delay;
        }
        self
    }

    fn build(
        name: &str,
        socket_path: PathBuf,
        events: EventBus,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                socket_path,
                events,
                link: Arc::new(Link::new(name)),
                control: Mutex::new(Control {
                    state: ConnectorState::Idle,
                    cancel: CancellationToken::new(),
                }),
                attempts: AtomicU32::new(0),
                initial_delay,
                max_delay,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    pub fn state(&self) -> ConnectorState {
        self.inner.control().state
    }

    /// Connect attempts made by the current connect or reconnect cycle
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Event fired on the bus after every successful reconnection
    pub fn reconnect_event(&self) -> String {
        self.inner.reconnect_event()
    }

    /// Event fired when reconnecting is abandoned
    pub fn give_up_event(&self) -> String {
        self.inner.give_up_event()
    }

    /// Connect to the component
    ///
    /// Resolves with a proxy once a socket connection is made, or fails with
    /// [`Error::Connect`] when the retry ceiling in `options` is reached.
    pub async fn connect(&self, options: ConnectOptions) -> Result<RemoteComponent> {
        let token = {
            let mut control = self.inner.control();
            match control.state {
                ConnectorState::Idle | ConnectorState::Disconnected => {}
                _ => return Err(Error::AlreadyConnected(self.inner.name.clone())),
            }
            control.state = ConnectorState::Connecting;
            control.cancel = CancellationToken::new();
            control.cancel.clone()
        };

        self.inner
            .link
            .set_factor(options.factor.unwrap_or(DEFAULT_FACTOR));
        let mut scheduler = RetryScheduler::new(options.max_retries)
            .with_delays(self.inner.initial_delay, self.inner.max_delay);

        // Leaves the connector disconnected when this future is dropped early
        let pending = PendingConnect {
            inner: &self.inner,
            token: &token,
            armed: true,
        };

        let protocol = self.inner.establish(&mut scheduler, &options, &token).await?;

        if !self.inner.connected(&token, &protocol) {
            protocol.close();
            return Err(Error::Disconnected);
        }
        pending.disarm();
        scheduler.reset();
        tracing::debug!("Connected to {}", self.inner.name);

        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            protocol,
            scheduler,
            options,
            token,
        ));

        Ok(RemoteComponent::new(Arc::clone(&self.inner.link)))
    }

    /// Tear the connection down
    ///
    /// Cancels a pending connect or retry timer, closes the live connection
    /// (failing its pending calls with [`Error::ConnectionLost`]) and leaves
    /// the connector `disconnected`. Safe to call in any state, any number
    /// of times.
    pub fn disconnect(&self) {
        let mut control = self.inner.control();
        control.cancel.cancel();
        control.state = ConnectorState::Disconnected;
        if let Some(protocol) = self.inner.link.take_protocol() {
            protocol.close();
        }
    }
}

impl Drop for ComponentConnector {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ComponentConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentConnector")
            .field("name", &self.inner.name)
            .field("socket_path", &self.inner.socket_path)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnect_event(&self) -> String {
        format!("{}-reconnect", self.name)
    }

    fn give_up_event(&self) -> String {
        format!("{}-give-up", self.name)
    }

    /// Move to `state` unless the cycle owning `token` was torn down
    fn settle(&self, token: &CancellationToken, state: ConnectorState) -> bool {
        let mut control = self.control();
        if token.is_cancelled() {
            return false;
        }
        control.state = state;
        true
    }

    /// Publish a fresh connection unless the cycle was torn down
    fn connected(&self, token: &CancellationToken, protocol: &ComponentProtocol) -> bool {
        let mut control = self.control();
        if token.is_cancelled() {
            return false;
        }
        self.link.set_protocol(protocol.clone());
        control.state = ConnectorState::Connected;
        true
    }

    /// Attempt socket connections until one succeeds or the budget runs out
    async fn establish(
        &self,
        scheduler: &mut RetryScheduler,
        options: &ConnectOptions,
        token: &CancellationToken,
    ) -> Result<ComponentProtocol> {
        self.attempts.store(0, Ordering::Release);
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
            let result = tokio::select! {
                _ = token.cancelled() => return Err(Error::Disconnected),
                result = UnixTransport::connect_timeout(&self.socket_path, CONNECT_TIMEOUT) => result,
            };

            let err = match result {
                Ok(transport) => return Ok(ComponentProtocol::client(transport)),
                Err(err) => err,
            };

            if !options.quiet {
                tracing::error!("Error while connecting to {}: {}", self.name, err);
            }
            if scheduler.exhausted() {
                return Err(Error::Connect {
                    component: self.name.clone(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            // Pick up factor changes made through the live link
            scheduler.set_factor(self.link.factor());
            let delay = scheduler.next_delay();
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Disconnected),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Connect cycle that has not produced a connection yet
struct PendingConnect<'a> {
    inner: &'a Inner,
    token: &'a CancellationToken,
    armed: bool,
}

impl PendingConnect<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle(self.token, ConnectorState::Disconnected);
            self.token.cancel();
        }
    }
}

/// Watch the live connection and reconnect when it drops
async fn supervise(
    inner: Arc<Inner>,
    mut protocol: ComponentProtocol,
    mut scheduler: RetryScheduler,
    options: ConnectOptions,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = protocol.closed() => {}
        }
        if !inner.settle(&token, ConnectorState::Reconnecting) {
            return;
        }
        inner.link.take_protocol();

        let reason = protocol
            .disconnect_reason()
            .map(|r| r.to_string())
            .unwrap_or_default();
        tracing::info!("Lost connection to {} ({}), reconnecting", inner.name, reason);

        match inner.establish(&mut scheduler, &options, &token).await {
            Ok(fresh) => {
                if !inner.connected(&token, &fresh) {
                    fresh.close();
                    return;
                }
                scheduler.reset();
                protocol = fresh;
                tracing::info!("Reconnected to {}", inner.name);
                if let Err(err) = inner.events.fire(&inner.reconnect_event()) {
                    tracing::warn!("{}", err);
                }
            }
            Err(Error::Disconnected) => return,
            Err(err) => {
                if !options.quiet {
                    tracing::error!("Giving up reconnecting to {}: {}", inner.name, err);
                }
                if inner.settle(&token, ConnectorState::Disconnected) {
                    if let Err(err) = inner.events.fire(&inner.give_up_event()) {
                        tracing::warn!("{}", err);
                    }
                }
                return;
            }
        }
    }
}
