//! Harbor Fabric - Inter-process call layer for the harbor client
//!
//! Lets the cooperating local processes (broker, manager, monitor) call into
//! each other's components over Unix domain sockets. A
//! [`ComponentPublisher`] exposes a local [`Component`]; a
//! [`ComponentConnector`] finds, connects and transparently reconnects to
//! it, handing out a [`RemoteComponent`] whose calls travel as length
//! prefixed boxes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harbor_core::{Config, ConnectOptions};
//! use harbor_fabric::{Component, ComponentConnector, ComponentPublisher, EventBus};
//!
//! struct Monitor;
//!
//! impl Component for Monitor {
//!     fn name(&self) -> &str {
//!         "monitor"
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::with_data_path("/var/lib/harbor");
//!
//! // Hosting process
//! let mut publisher = ComponentPublisher::new(Arc::new(Monitor), &config);
//! publisher.start().await?;
//!
//! // Another process
//! let connector = ComponentConnector::new("monitor", &config, EventBus::new());
//! let remote = connector.connect(ConnectOptions::new().max_retries(3)).await?;
//! assert!(remote.ping().await?);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod component;
pub mod connector;
pub mod error;
pub mod events;
pub mod message;
pub mod protocol;
pub mod publisher;
pub mod remote;
pub mod retry;
pub mod transport;

// Re-exports for convenience
pub use codec::{AmpBox, Value};
pub use component::{Component, MethodError, MethodResult, Methods};
pub use connector::{ComponentConnector, ConnectorState};
pub use error::{Error, Result};
pub use events::EventBus;
pub use harbor_core::ConnectOptions;
pub use message::Arguments;
pub use protocol::{ComponentProtocol, DisconnectReason};
pub use publisher::ComponentPublisher;
pub use remote::RemoteComponent;
pub use retry::RetryScheduler;
