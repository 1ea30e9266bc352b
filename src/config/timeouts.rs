//! Timeout configuration

/// HTTP fetch timeout for entry documents and external scripts.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;

/// HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
