use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Directory under the data path holding component sockets
pub const SOCKETS_DIR: &str = "sockets";

/// Process-wide settings shared by every hosting process
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base data directory
    pub data_path: PathBuf,

    /// Default tracing filter directive
    pub log_level: String,

    /// Options used when connecting to other components
    pub connect: ConnectOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/var/lib/harbor"),
            log_level: "info".to_string(),
            connect: ConnectOptions::default(),
        }
    }
}

impl Config {
    /// Create a config rooted at the given data directory
    pub fn with_data_path(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a config from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Directory holding the component sockets
    pub fn sockets_path(&self) -> PathBuf {
        self.data_path.join(SOCKETS_DIR)
    }

    /// Socket endpoint of the named component
    ///
    /// One endpoint per component name per host.
    pub fn socket_path(&self, component: &str) -> PathBuf {
        self.sockets_path().join(format!("{component}.sock"))
    }
}

/// Options recognized by a component connect
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Retry ceiling, `None` retries forever
    pub max_retries: Option<u32>,

    /// Suppress logging of failed attempts
    pub quiet: bool,

    /// Backoff growth multiplier, `None` keeps the scheduler default
    pub factor: Option<f64>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }
}
