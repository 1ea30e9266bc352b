//! Sandboxed loading and execution of self-contained HTML+JS mini-apps.
//!
//! A [`MiniAppLoader`] fetches a mini-app's entry document through an
//! [`AssetFetcher`], rewrites it into an [`IsolatedRoot`], and runs its
//! scripts in a fresh JS realm whose timers, frames, listeners and observers
//! are all recorded in a per-mount [`ResourceLedger`]. Switching mini-apps
//! drains that ledger, so nothing from the previous one keeps running.

pub mod catalog;
pub mod config;
pub mod core;
pub mod dom;
pub mod dpr;
pub mod events;
pub mod executor;
pub mod fetch;
pub mod host;
pub mod initialization;
pub mod ledger;
pub mod loader;
pub mod resolver;
pub mod root;
pub mod scope;
pub mod ticket;
pub mod transform;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use crate::core::{SandboxConfig, APP_NAME, LOG_TARGET};
pub use events::{
    emit_or_log, ChannelSink, LifecycleEvent, LifecycleKind, LifecycleSink, MemorySink,
    TracingSink, EVENT_MINIAPP_ERROR, EVENT_MINIAPP_LOADED, EVENT_MINIAPP_LOADING,
};
pub use executor::{ConsoleEntry, ConsoleLevel, DriveReport, ExecutionReport, ScriptRealm};
pub use fetch::{
    AssetFetcher, DirectoryFetcher, FetchError, FetchMode, FetchResponse, HttpFetcher,
    MemoryFetcher,
};
pub use host::{EventTarget, HostWindow};
pub use initialization::init_tracing_subsystem;
pub use ledger::{DrainReport, ResourceKey, ResourceLedger};
pub use loader::{LoadError, LoadPhase, MiniAppDescriptor, MiniAppLoader};
pub use resolver::{resolve, resolve_srcset, ResolveError};
pub use root::IsolatedRoot;
pub use ticket::{LoadTicket, TicketCounter, TicketGuard};
pub use transform::{transform, FetchContext, ScriptUnit, TransformedDocument};
