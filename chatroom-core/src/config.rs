//! Router config loaded from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{Result, RouterError};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 16;
pub const DEFAULT_LOG_FILE: &str = "logs/chatroom.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// ROUTER_VERDICT_TIMEOUT_MS; `None` waits for a verdict forever.
    pub verdict_timeout: Option<Duration>,
    /// ROUTER_OUTBOUND_CAPACITY
    pub outbound_capacity: usize,
    /// LOG_FILE
    pub log_file: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            verdict_timeout: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl RouterConfig {
    /// Load from environment variables; unset or unparsable values fall back to defaults.
    pub fn load() -> Result<Self> {
        let verdict_timeout = env::var("ROUTER_VERDICT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let outbound_capacity = match env::var("ROUTER_OUTBOUND_CAPACITY") {
            Ok(s) => s.trim().parse().map_err(|_| {
                RouterError::Config(format!("ROUTER_OUTBOUND_CAPACITY is not a number: {}", s))
            })?,
            Err(_) => DEFAULT_OUTBOUND_CAPACITY,
        };
        let log_file = env::var("LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());

        Ok(Self {
            verdict_timeout,
            outbound_capacity,
            log_file,
        })
    }

    /// Call after load() to fail fast before the router is built.
    pub fn validate(&self) -> Result<()> {
        if self.outbound_capacity == 0 {
            return Err(RouterError::Config(
                "ROUTER_OUTBOUND_CAPACITY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
