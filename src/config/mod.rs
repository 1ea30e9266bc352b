//! Configuration constants for the mini-app sandbox
//!
//! This module centralizes the fixed values the loader, executor and fetchers
//! share. Runtime-tunable values are read by [`crate::core::SandboxConfig`].

pub mod errors;
pub mod limits;
pub mod paths;
pub mod timeouts;
