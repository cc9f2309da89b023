//! Runtime configuration
//!
//! Values come from the environment (`POLICY_*`, `DATABASE_URL`); binaries
//! may override individual fields from their command line.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PolicyError, Result};
use crate::extraction::DEFAULT_MAX_PAGES;

pub const DEFAULT_ANALYSIS_URL: &str = "http://127.0.0.1:8000/api/analyze";
pub const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:8000/api/chat";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Endpoint of the remote analysis service
    pub analysis_url: String,
    /// Endpoint of the remote chat service
    pub chat_url: String,
    /// SQLite URL for analysis history
    pub database_url: String,
    /// Per-request timeout for analysis and chat calls
    pub request_timeout_ms: u64,
    /// Cap on PDF pages processed per document
    pub max_pages: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            analysis_url: DEFAULT_ANALYSIS_URL.to_string(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            database_url: default_database_url(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl PolicyConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("POLICY_ANALYSIS_URL") {
            config.analysis_url = url;
        }
        if let Some(url) = lookup("POLICY_CHAT_URL") {
            config.chat_url = url;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(raw) = lookup("POLICY_TIMEOUT_MS") {
            config.request_timeout_ms = raw.trim().parse().map_err(|_| {
                PolicyError::Validation(format!("POLICY_TIMEOUT_MS must be an integer, got '{}'", raw))
            })?;
        }
        if let Some(raw) = lookup("POLICY_MAX_PAGES") {
            config.max_pages = raw.trim().parse().map_err(|_| {
                PolicyError::Validation(format!("POLICY_MAX_PAGES must be an integer, got '{}'", raw))
            })?;
        }

        if config.max_pages == 0 {
            return Err(PolicyError::Validation(
                "max_pages must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// SQLite file under the platform data directory
fn default_database_url() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("policy-lens");
    format!("sqlite:{}/history.db?mode=rwc", data_dir.display())
}
