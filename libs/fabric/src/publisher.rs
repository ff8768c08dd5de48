use std::path::{Path, PathBuf};
use std::sync::Arc;

use harbor_core::Config;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::component::{Component, Dispatch, Dispatcher};
use crate::error::Result;
use crate::protocol::ComponentProtocol;
use crate::transport::UnixTransportListener;

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Exposes a component's methods on its socket endpoint
///
/// Every accepted connection gets its own protocol bound to the same
/// component instance, so methods may run concurrently for several peers.
pub struct ComponentPublisher<C: Component> {
    component: Arc<C>,
    socket_path: PathBuf,
    running: Option<Running>,
}

impl<C: Component> ComponentPublisher<C> {
    /// Create a publisher for `component`, endpoint taken from `config`
    pub fn new(component: Arc<C>, config: &Config) -> Self {
        let socket_path = config.socket_path(component.name());
        Self::with_socket_path(component, socket_path)
    }

    /// Create a publisher listening on `socket_path`
    pub fn with_socket_path(component: Arc<C>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            component,
            socket_path: socket_path.into(),
            running: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the endpoint and start accepting connections
    ///
    /// Fails with [`crate::Error::Bind`] when another listener serves the
    /// endpoint or the socket cannot be created. Starting a running
    /// publisher does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let listener = UnixTransportListener::bind(&self.socket_path).await?;
        let dispatcher = Dispatcher::new(Arc::clone(&self.component));
        let shutdown = CancellationToken::new();
        let name = self.component.name().to_string();

        let mut methods: Vec<&str> = dispatcher.methods().names().collect();
        methods.sort_unstable();
        tracing::info!(
            "Publishing {} on {} (methods: {})",
            name,
            self.socket_path.display(),
            methods.join(", ")
        );

        let dispatcher: Arc<dyn Dispatch> = Arc::new(dispatcher);
        let task = tokio::spawn(accept_loop(listener, dispatcher, shutdown.clone(), name));
        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Stop accepting, close the endpoint and every open connection
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            if let Err(err) = running.task.await {
                tracing::warn!("accept loop of {} ended abnormally: {}", self.component.name(), err);
            }
            tracing::info!("Stopped publishing {}", self.component.name());
        }
    }
}

impl<C: Component> Drop for ComponentPublisher<C> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
        }
    }
}

async fn accept_loop(
    listener: UnixTransportListener,
    dispatcher: Arc<dyn Dispatch>,
    shutdown: CancellationToken,
    name: String,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(transport) => {
                tracing::debug!("Accepted connection for {}", name);
                // Closed along with the publisher through the child token
                ComponentProtocol::server(transport, Arc::clone(&dispatcher), shutdown.child_token());
            }
            Err(err) => tracing::warn!("failed to accept connection for {}: {}", name, err),
        }
    }
}
