use std::time::Duration;

use crate::config::{limits, paths, timeouts};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub static APP_NAME: &str = "miniapp-sandbox";

/// Tracing target shared by every module in the crate.
pub const LOG_TARGET: &str = "miniapp";

// ----------------------------------------------------------------------------
// Sandbox configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub frame_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    pub max_document_bytes: usize,
    pub max_console_entries: usize,
    pub http_origin: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: limits::DEFAULT_FRAME_INTERVAL_MS,
            fetch_timeout_ms: timeouts::DEFAULT_FETCH_TIMEOUT_MS,
            connect_timeout_ms: timeouts::DEFAULT_CONNECT_TIMEOUT_MS,
            loop_iteration_limit: limits::DEFAULT_LOOP_ITERATION_LIMIT,
            recursion_limit: limits::DEFAULT_RECURSION_LIMIT,
            max_document_bytes: limits::DEFAULT_MAX_DOCUMENT_BYTES,
            max_console_entries: limits::DEFAULT_MAX_CONSOLE_ENTRIES,
            http_origin: paths::DEFAULT_HTTP_ORIGIN.to_string(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - MINIAPP_FRAME_INTERVAL_MS: Animation frame cadence on the virtual clock (default: 16)
    /// - MINIAPP_FETCH_TIMEOUT_MS: HTTP request timeout (default: 15000)
    /// - MINIAPP_CONNECT_TIMEOUT_MS: HTTP connect timeout (default: 5000)
    /// - MINIAPP_JS_LOOP_LIMIT: Loop iterations a single script may run (default: 50000000)
    /// - MINIAPP_JS_RECURSION_LIMIT: Maximum JS call depth (default: 1024)
    /// - MINIAPP_MAX_DOCUMENT_BYTES: Largest accepted entry document (default: 4 MiB)
    /// - MINIAPP_MAX_CONSOLE_ENTRIES: Console lines kept per mounted mini-app (default: 512)
    /// - MINIAPP_HTTP_ORIGIN: Origin relative URLs are fetched from (default: http://127.0.0.1:5173/)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            frame_interval_ms: env_parse("MINIAPP_FRAME_INTERVAL_MS")
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.frame_interval_ms),
            fetch_timeout_ms: env_parse("MINIAPP_FETCH_TIMEOUT_MS")
                .unwrap_or(defaults.fetch_timeout_ms),
            connect_timeout_ms: env_parse("MINIAPP_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            loop_iteration_limit: env_parse("MINIAPP_JS_LOOP_LIMIT")
                .unwrap_or(defaults.loop_iteration_limit),
            recursion_limit: env_parse("MINIAPP_JS_RECURSION_LIMIT")
                .unwrap_or(defaults.recursion_limit),
            max_document_bytes: env_parse("MINIAPP_MAX_DOCUMENT_BYTES")
                .unwrap_or(defaults.max_document_bytes),
            max_console_entries: env_parse("MINIAPP_MAX_CONSOLE_ENTRIES")
                .unwrap_or(defaults.max_console_entries),
            http_origin: std::env::var("MINIAPP_HTTP_ORIGIN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.http_origin),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
