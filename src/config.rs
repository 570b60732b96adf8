//! Bootstrap configuration
//!
//! Loaded once at startup from a TOML file; every field has a default so
//! an empty (or absent) file yields a runnable configuration. CLI flags
//! and environment variables override individual fields after loading.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,
    /// Concurrent session cap across all communities
    pub max_sessions: usize,
    /// Request intake window per session, in seconds
    pub intake_window_secs: u64,
    /// Base URL of the platform gateway API
    pub gateway_url: String,
    /// Search provider endpoint for free-text track resolution
    pub search_url: String,
    /// Event bus buffer size (events held per slow subscriber)
    pub event_buffer: usize,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5750,
            max_sessions: 10,
            intake_window_secs: 300,
            gateway_url: "http://127.0.0.1:8600".to_string(),
            search_url: "http://127.0.0.1:8601/search".to_string(),
            event_buffer: 256,
            log_filter: "jamroom=info".to_string(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn intake_window(&self) -> Duration {
        Duration::from_secs(self.intake_window_secs)
    }
}
