//! Box-level request/response semantics for one connection.
//!
//! Each [`ComponentProtocol`] owns a reader task, a writer task and the
//! table of calls awaiting an answer. In server role incoming commands are
//! dispatched to the bound component; in client role answers and errors
//! complete the matching pending call. Responses may arrive in any order,
//! the correlation id pairs them with their request.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::{framing, AmpBox, BoxCodec, Value};
use crate::component::{Dispatch, METHOD_CALL_ERROR};
use crate::error::{Error, Result};
use crate::message::{Arguments, Message, ANSWER, ASK};
use crate::transport::UnixTransport;

/// Which side of the connection a protocol instance plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Why a connection stopped producing boxes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed from this side
    Closed,
    /// The peer closed the stream
    PeerClosed,
    /// The peer sent a malformed frame
    Framing(String),
    /// Reading or writing the socket failed
    Io(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed locally"),
            DisconnectReason::PeerClosed => write!(f, "closed by peer"),
            DisconnectReason::Framing(msg) => write!(f, "framing error: {}", msg),
            DisconnectReason::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

type Reply = oneshot::Sender<Result<Value>>;

/// Calls sent and not yet answered, `None` once the connection is gone
struct PendingCalls {
    calls: Mutex<Option<HashMap<u64, Reply>>>,
}

impl PendingCalls {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Some(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<u64, Reply>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut guard = self.lock();
        let calls = guard.as_mut().ok_or(Error::ConnectionLost)?;
        let (tx, rx) = oneshot::channel();
        calls.insert(id, tx);
        Ok(rx)
    }

    fn resolve(&self, id: u64, result: Result<Value>) {
        let reply = self.lock().as_mut().and_then(|calls| calls.remove(&id));
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => tracing::warn!("dropping response for unknown call {}", id),
        }
    }

    fn remove(&self, id: u64) {
        if let Some(calls) = self.lock().as_mut() {
            calls.remove(&id);
        }
    }

    fn fail_all(&self) {
        let calls = self.lock().take();
        for (_, reply) in calls.into_iter().flatten() {
            let _ = reply.send(Err(Error::ConnectionLost));
        }
    }

    fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }
}

/// Drops the pending entry of a call whose caller went away
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

struct Shared {
    role: Role,
    outgoing: mpsc::UnboundedSender<AmpBox>,
    pending: PendingCalls,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    closed: CancellationToken,
    reason: OnceLock<DisconnectReason>,
}

impl Shared {
    fn handle(&self, ampbox: AmpBox, dispatcher: Option<&Arc<dyn Dispatch>>) {
        let message = match Message::from_box(&ampbox) {
            Ok(message) => message,
            Err(err) => return self.handle_undecodable(&ampbox, err),
        };

        match message {
            Message::Command { id, name, args } => match dispatcher {
                Some(dispatcher) => {
                    let dispatcher = Arc::clone(dispatcher);
                    let outgoing = self.outgoing.clone();
                    tokio::spawn(async move {
                        let reply = match dispatcher.dispatch(&name, args).await {
                            Ok(value) => Message::Answer { id, value },
                            Err(err) => Message::Error {
                                id,
                                class: err.class,
                                message: err.message,
                            },
                        };
                        send_reply(&outgoing, reply);
                    });
                }
                None => send_reply(
                    &self.outgoing,
                    Message::Error {
                        id,
                        class: METHOD_CALL_ERROR.to_string(),
                        message: format!("No component published for '{}'", name),
                    },
                ),
            },
            Message::Answer { id, value } => self.pending.resolve(id, Ok(value)),
            Message::Error { id, class, message } => {
                self.pending.resolve(id, Err(Error::Remote { class, message }))
            }
        }
    }

    /// Fail the request or call a broken box belongs to, when it can be told
    fn handle_undecodable(&self, ampbox: &AmpBox, err: Error) {
        let id_of = |key: &str| ampbox.get_str(key).and_then(|s| s.parse::<u64>().ok());
        if let Some(id) = id_of(ASK) {
            send_reply(
                &self.outgoing,
                Message::Error {
                    id,
                    class: err.class_name(),
                    message: err.to_string(),
                },
            );
        } else if let Some(id) = id_of(ANSWER) {
            self.pending.resolve(id, Err(err));
        } else {
            tracing::warn!("{} ignoring unexpected box: {}", self.role, err);
        }
    }

    fn finish(&self, reason: DisconnectReason) {
        let _ = self.reason.set(reason);
        self.shutdown.cancel();
        self.pending.fail_all();
        if let Some(reason) = self.reason.get() {
            tracing::debug!("{} connection {}", self.role, reason);
        }
        self.closed.cancel();
    }
}

fn send_reply(outgoing: &mpsc::UnboundedSender<AmpBox>, reply: Message) {
    let id = reply.id();
    let encoded = reply
        .into_box()
        .and_then(|ampbox| framing::validate(&ampbox).map(|_| ampbox))
        .or_else(|err| {
            Message::Error {
                id,
                class: err.class_name(),
                message: err.to_string(),
            }
            .into_box()
        });
    match encoded {
        Ok(ampbox) => {
            let _ = outgoing.send(ampbox);
        }
        Err(err) => tracing::warn!("cannot encode reply to call {}: {}", id, err),
    }
}

/// One connection speaking the box protocol
#[derive(Clone)]
pub struct ComponentProtocol {
    shared: Arc<Shared>,
}

impl ComponentProtocol {
    /// Wrap a connected transport in client role
    pub fn client(transport: UnixTransport) -> Self {
        Self::spawn(transport, None, CancellationToken::new())
    }

    /// Wrap an accepted transport in server role
    ///
    /// Cancelling `shutdown` closes the connection.
    pub fn server(
        transport: UnixTransport,
        dispatcher: Arc<dyn Dispatch>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::spawn(transport, Some(dispatcher), shutdown)
    }

    fn spawn(
        transport: UnixTransport,
        dispatcher: Option<Arc<dyn Dispatch>>,
        shutdown: CancellationToken,
    ) -> Self {
        let role = if dispatcher.is_some() {
            Role::Server
        } else {
            Role::Client
        };
        let (reader, writer) = transport.into_split();
        let (outgoing, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            role,
            outgoing,
            pending: PendingCalls::new(),
            next_id: AtomicU64::new(1),
            shutdown,
            closed: CancellationToken::new(),
            reason: OnceLock::new(),
        });

        tokio::spawn(write_loop(writer, rx, Arc::clone(&shared)));
        tokio::spawn(read_loop(reader, dispatcher, Arc::clone(&shared)));

        Self { shared }
    }

    /// Call `command` on the peer and wait for its answer
    ///
    /// Fails with [`Error::Remote`] when the peer's method failed and with
    /// [`Error::ConnectionLost`] when the connection goes away first.
    pub async fn call(&self, command: &str, args: Arguments) -> Result<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Message::Command {
            id,
            name: command.to_string(),
            args,
        }
        .into_box()?;
        framing::validate(&request)?;

        let response = self.shared.pending.register(id)?;
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };
        if self.shared.outgoing.send(request).is_err() {
            return Err(Error::ConnectionLost);
        }
        response.await.unwrap_or(Err(Error::ConnectionLost))
    }

    /// Close the connection, failing every pending call
    pub fn close(&self) {
        let _ = self.shared.reason.set(DisconnectReason::Closed);
        self.shared.shutdown.cancel();
        self.shared.pending.fail_all();
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Run `callback` once, when the connection closes
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: FnOnce(DisconnectReason) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.closed.cancelled().await;
            let reason = shared
                .reason
                .get()
                .cloned()
                .unwrap_or(DisconnectReason::Closed);
            callback(reason);
        });
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.reason.get().cloned()
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Number of calls awaiting an answer
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }
}

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, BoxCodec>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    shared: Arc<Shared>,
) {
    let reason = loop {
        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => break DisconnectReason::Closed,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(ampbox)) => shared.handle(ampbox, dispatcher.as_ref()),
            Some(Err(Error::Framing(msg))) => {
                tracing::warn!("{} dropping connection: {}", shared.role, msg);
                break DisconnectReason::Framing(msg);
            }
            Some(Err(err)) => break DisconnectReason::Io(err.to_string()),
            None => break DisconnectReason::PeerClosed,
        }
    };
    shared.finish(reason);
}

async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, BoxCodec>,
    mut rx: mpsc::UnboundedReceiver<AmpBox>,
    shared: Arc<Shared>,
) {
    loop {
        let ampbox = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(ampbox) => ampbox,
                None => break,
            },
        };
        if let Err(err) = writer.send(ampbox).await {
            tracing::warn!("{} failed to write box: {}", shared.role, err);
            let _ = shared.reason.set(DisconnectReason::Io(err.to_string()));
            shared.shutdown.cancel();
            break;
        }
    }
}
