use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::codec::Value;
use crate::component::{EXIT, PING};
use crate::error::{Error, Result};
use crate::message::Arguments;
use crate::protocol::ComponentProtocol;
use crate::retry::{effective_factor, DEFAULT_FACTOR};

/// State a connector shares with the proxies it hands out
pub(crate) struct Link {
    name: String,
    protocol: RwLock<Option<ComponentProtocol>>,
    factor: AtomicU64,
}

impl Link {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol: RwLock::new(None),
            factor: AtomicU64::new(DEFAULT_FACTOR.to_bits()),
        }
    }

    pub(crate) fn protocol(&self) -> Option<ComponentProtocol> {
        self.protocol
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_protocol(&self, protocol: ComponentProtocol) {
        *self.protocol.write().unwrap_or_else(PoisonError::into_inner) = Some(protocol);
    }

    pub(crate) fn take_protocol(&self) -> Option<ComponentProtocol> {
        self.protocol
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn factor(&self) -> f64 {
        f64::from_bits(self.factor.load(Ordering::Acquire))
    }

    pub(crate) fn set_factor(&self, factor: f64) {
        let factor = effective_factor(factor);
        self.factor.store(factor.to_bits(), Ordering::Release);
    }
}

/// Client-side stand-in for a published component
///
/// Any method name can be called; the call is forwarded over whatever
/// connection the owning connector currently holds. Calls made while the
/// connector is reconnecting fail with [`Error::ConnectionLost`].
#[derive(Clone)]
pub struct RemoteComponent {
    link: Arc<Link>,
}

impl RemoteComponent {
    pub(crate) fn new(link: Arc<Link>) -> Self {
        Self { link }
    }

    /// Name of the remote component
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Call `method` on the remote component
    pub async fn call(&self, method: &str, args: Arguments) -> Result<Value> {
        let protocol = self.link.protocol().ok_or(Error::ConnectionLost)?;
        protocol.call(method, args).await
    }

    /// Call `method` and convert its answer
    pub async fn call_as<T>(&self, method: &str, args: Arguments) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        T::try_from(self.call(method, args).await?)
    }

    /// Check the link to the component is alive
    pub async fn ping(&self) -> Result<bool> {
        self.call_as(PING, Arguments::new()).await
    }

    /// Ask the remote process to shut its component down
    pub async fn exit(&self) -> Result<()> {
        self.call(EXIT, Arguments::new()).await.map(|_| ())
    }

    /// Backoff factor used by the owning connector
    pub fn factor(&self) -> f64 {
        self.link.factor()
    }

    /// Whether a connection is currently held
    pub fn is_connected(&self) -> bool {
        self.link.protocol().is_some_and(|p| !p.is_closed())
    }
}

impl std::fmt::Debug for RemoteComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteComponent")
            .field("name", &self.link.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
