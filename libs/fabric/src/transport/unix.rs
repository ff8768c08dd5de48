use std::fs::{DirBuilder, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::BoxCodec;
use crate::error::{Error, Result};

/// Mode of the sockets directory when it has to be created
const SOCKETS_DIR_MODE: u32 = 0o750;

/// Mode of a bound socket file, restricted to the running user and group
const SOCKET_MODE: u32 = 0o660;

/// Unix domain socket transport carrying boxes
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    /// Connect to a Unix socket with no timeout
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).connect().await
    }

    /// Connect with a connect timeout
    pub async fn connect_timeout(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        Self::builder()
            .path(path)
            .connect_timeout(timeout)
            .connect()
            .await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> UnixTransportBuilder {
        UnixTransportBuilder::new()
    }

    /// Create from an existing UnixStream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Split into a box reader and a box writer
    pub fn into_split(
        self,
    ) -> (
        FramedRead<OwnedReadHalf, BoxCodec>,
        FramedWrite<OwnedWriteHalf, BoxCodec>,
    ) {
        let (read, write) = self.stream.into_split();
        (
            FramedRead::new(read, BoxCodec::new()),
            FramedWrite::new(write, BoxCodec::new()),
        )
    }
}

/// Unix socket listener for accepting incoming connections
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path
    ///
    /// A socket file left behind by a dead listener is removed first. A path
    /// with a live listener behind it is refused with [`Error::Bind`].
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_error = |source| Error::Bind {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let is_socket = std::fs::symlink_metadata(&path)
                .map_err(bind_error)?
                .file_type()
                .is_socket();
            if !is_socket {
                return Err(bind_error(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )));
            }
            if UnixStream::connect(&path).await.is_ok() {
                return Err(bind_error(std::io::Error::new(
                    ErrorKind::AddrInUse,
                    "another listener is serving this socket",
                )));
            }
            tracing::debug!("removing stale socket {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(bind_error(e)),
            }
        }

        if let Some(parent) = path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(SOCKETS_DIR_MODE)
                .create(parent)
                .map_err(bind_error)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        std::fs::set_permissions(&path, Permissions::from_mode(SOCKET_MODE)).map_err(bind_error)?;
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UnixTransport::from_stream(stream))
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Builder for configuring Unix socket transport
#[derive(Default)]
pub struct UnixTransportBuilder {
    path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
}

impl UnixTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to connect to
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<UnixTransport> {
        let path = self
            .path
            .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::InvalidInput, "Path not set")))?;

        let connect_op = UnixStream::connect(path);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| std::io::Error::new(ErrorKind::TimedOut, "Connect timeout exceeded"))??
        } else {
            connect_op.await?
        };

        Ok(UnixTransport { stream })
    }
}
