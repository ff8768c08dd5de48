//! Harbor Core - Shared configuration for the harbor client processes
//!
//! Holds the settings every hosting process reads (data directory, log
//! level, connect options) and the derivation of per-component socket
//! endpoints from them.

pub mod config;
pub mod error;

pub use config::{Config, ConnectOptions};
pub use error::{Error, Result};
