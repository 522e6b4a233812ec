//! Configuration loading.
//!
//! Settings come from an optional YAML file named by `CONDUIT_CONFIG`; the
//! `LISTEN` environment variable overrides the listen address. Every key is
//! optional and falls back to its default.
//!
//! ```yaml
//! listenAddr: "0.0.0.0:8080"
//! connector:
//!   maxThreads: 20
//!   controllerSleepTimeMs: 50
//!   tracing: true
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default size of each connection's inbound and outbound buffer.
pub const BUFFER_SIZE: usize = 8192;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub listen_addr: String,
    pub connector: ConnectorConfig,
}

/// Tuning of a connector helper: worker pool, controller and connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorConfig {
    /// Core threads, always alive
    pub min_threads: usize,
    /// Upper bound of concurrently running read, write and handler tasks
    pub max_threads: usize,
    /// Time an idle worker thread is kept before it exits
    pub thread_max_idle_time_ms: u64,
    /// Pause between two controller ticks
    pub controller_sleep_time_ms: u64,
    /// Whether the controller may be abandoned when the helper is dropped
    pub controller_daemon: bool,
    pub inbound_buffer_size: usize,
    pub outbound_buffer_size: usize,
    /// Keep connections open across exchanges
    pub persisting_connections: bool,
    /// Allow several requests in flight on one connection
    pub pipelining_connections: bool,
    /// -1 for no limit
    pub max_connections_per_host: i32,
    /// -1 for no limit
    pub max_total_connections: i32,
    /// Log every head line read or written
    pub tracing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            connector: ConnectorConfig::default(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 10,
            thread_max_idle_time_ms: 60_000,
            controller_sleep_time_ms: 100,
            controller_daemon: true,
            inbound_buffer_size: BUFFER_SIZE,
            outbound_buffer_size: BUFFER_SIZE,
            persisting_connections: true,
            pipelining_connections: false,
            max_connections_per_host: -1,
            max_total_connections: -1,
            tracing: false,
        }
    }
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::Config("maxThreads must be at least 1".into()));
        }
        if self.min_threads > self.max_threads {
            return Err(Error::Config(format!(
                "minThreads ({}) exceeds maxThreads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if self.inbound_buffer_size == 0 || self.outbound_buffer_size == 0 {
            return Err(Error::Config("buffer sizes must be positive".into()));
        }
        if self.controller_sleep_time_ms == 0 {
            return Err(Error::Config("controllerSleepTimeMs must be positive".into()));
        }
        Ok(())
    }

    pub fn controller_sleep_time(&self) -> Duration {
        Duration::from_millis(self.controller_sleep_time_ms)
    }

    pub fn thread_max_idle_time(&self) -> Duration {
        Duration::from_millis(self.thread_max_idle_time_ms)
    }
}

impl Config {
    /// Loads the configuration file named by `CONDUIT_CONFIG`, if any, then
    /// applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("CONDUIT_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.connector.validate()?;
        Ok(cfg)
    }
}
