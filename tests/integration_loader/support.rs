//! Shared fixtures for loader tests.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use miniapp_sandbox::{
    AssetFetcher, FetchError, FetchMode, FetchResponse, MemoryFetcher, MemorySink, MiniAppDescriptor,
    MiniAppLoader, SandboxConfig,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Memory fetcher whose responses for selected paths wait for `release`.
#[derive(Default)]
pub struct GatedFetcher {
    inner: MemoryFetcher,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl GatedFetcher {
    pub fn new(inner: MemoryFetcher) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn gate(&self, path: &str) {
        self.gates
            .lock()
            .insert(path.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.gates.lock().get(path) {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl AssetFetcher for GatedFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let gate = self.gates.lock().get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.inner.fetch(url, mode).await
    }
}

pub fn descriptor(slug: &str) -> MiniAppDescriptor {
    MiniAppDescriptor::new(slug, format!("/projects/{slug}/index.html"))
}

pub fn page(body: &str) -> String {
    format!("<!doctype html><html><head><title>t</title></head><body>{body}</body></html>")
}

pub fn loader_over<F: AssetFetcher + 'static>(fetcher: Arc<F>) -> (MiniAppLoader, MemorySink) {
    let sink = MemorySink::new();
    let loader = MiniAppLoader::new(fetcher, Box::new(sink.clone()), SandboxConfig::default());
    (loader, sink)
}
