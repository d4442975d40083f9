//! Collector configuration
//!
//! The embedding page only supplies the customer API key. The remaining knobs
//! exist for embedders and tests and default to the production values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::ProtocolVariant;

/// Collection server used when none is configured
pub const DEFAULT_SERVER_URL: &str = "https://collect.pagetrail.dev";

/// Minutes without interaction before a session is considered inactive
pub const DEFAULT_IDLE_MINUTES: u32 = 10;

/// Delay between a fresh session starting and its first announce
pub const INITIAL_FLUSH_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub api_key: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub variant: ProtocolVariant,
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: u32,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_idle_minutes() -> u32 {
    DEFAULT_IDLE_MINUTES
}

impl CollectorConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            server_url: default_server_url(),
            variant: ProtocolVariant::default(),
            idle_minutes: DEFAULT_IDLE_MINUTES,
        }
    }

    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Idle threshold in minutes (at least one)
    pub fn with_idle_minutes(mut self, minutes: u32) -> Self {
        self.idle_minutes = minutes.max(1);
        self
    }

    /// Full collection endpoint for the configured protocol variant
    pub fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.server_url.trim_end_matches('/'),
            self.variant.endpoint_path()
        )
    }
}
