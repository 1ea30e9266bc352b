//! Lifecycle events the loader reports to its host.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{core::LOG_TARGET, ticket::LoadTicket};

pub const EVENT_MINIAPP_LOADING: &str = "miniapp-loading";
pub const EVENT_MINIAPP_LOADED: &str = "miniapp-loaded";
pub const EVENT_MINIAPP_ERROR: &str = "miniapp-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Loading,
    Loaded,
    Error,
}

impl LifecycleKind {
    pub fn channel(self) -> &'static str {
        match self {
            LifecycleKind::Loading => EVENT_MINIAPP_LOADING,
            LifecycleKind::Loaded => EVENT_MINIAPP_LOADED,
            LifecycleKind::Error => EVENT_MINIAPP_ERROR,
        }
    }
}

/// Every event names the request it belongs to so hosts can drop stale ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub slug: String,
    pub entry_point: String,
    pub ticket: LoadTicket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, slug: &str, entry_point: &str, ticket: LoadTicket) -> Self {
        Self {
            kind,
            slug: slug.to_string(),
            entry_point: entry_point.to_string(),
            ticket,
            error: None,
            empty: false,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_empty(mut self) -> Self {
        self.empty = true;
        self
    }
}

pub trait LifecycleSink {
    fn emit(&self, channel: &str, event: &LifecycleEvent) -> anyhow::Result<()>;
}

/// Deliver `event` on its channel; a failing sink is logged, never propagated.
pub fn emit_or_log(sink: &dyn LifecycleSink, event: &LifecycleEvent) {
    let channel = event.kind.channel();
    if let Err(err) = sink.emit(channel, event) {
        tracing::warn!(
            target: LOG_TARGET,
            channel,
            ticket = event.ticket,
            error = %err,
            "failed to emit lifecycle event"
        );
    }
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Records events in order; clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<LifecycleKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn last(&self) -> Option<LifecycleEvent> {
        self.events.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LifecycleSink for MemorySink {
    fn emit(&self, _channel: &str, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleSink for ChannelSink {
    fn emit(&self, channel: &str, event: &LifecycleEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("receiver for {channel} is gone"))
    }
}

/// Logs each event as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LifecycleSink for TracingSink {
    fn emit(&self, channel: &str, event: &LifecycleEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: LOG_TARGET, channel, %payload, "lifecycle");
        Ok(())
    }
}
