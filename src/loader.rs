//! The loader: selects a mini-app, fetches and transforms its entry document,
//! mounts it into the isolated root and executes its scripts.
//!
//! Loads are re-entrant. Each selection mints a ticket and signals the
//! previous load to stop; a superseded load never touches the root again and
//! never reports anything.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    config::errors::{
        ERR_DOCUMENT_TOO_LARGE, ERR_FETCH_STATUS, ERR_MISSING_SLUG, ERR_SCRIPT_DATA_URI,
        ERR_SCRIPT_FETCH,
    },
    core::{SandboxConfig, LOG_TARGET},
    events::{emit_or_log, LifecycleEvent, LifecycleKind, LifecycleSink},
    executor::{ConsoleEntry, DriveReport, ExecutionReport, JsCallback, ScriptRealm},
    fetch::{fetch_or_cancel, AssetFetcher, FetchError, FetchMode},
    host::{EventTarget, HostWindow},
    resolver::{base_url_of, ResolveError},
    root::IsolatedRoot,
    scope::{SharedHost, SharedRoot},
    ticket::{LoadTicket, TicketCounter, TicketGuard},
    transform::{transform, FetchContext},
};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{}: missing slug", ERR_MISSING_SLUG)]
    MissingSlug,
    #[error("{}: fetching '{url}' returned HTTP {status}", ERR_FETCH_STATUS)]
    FetchStatus { url: String, status: u16 },
    #[error("{}: script '{url}' returned HTTP {status}", ERR_SCRIPT_FETCH)]
    ScriptStatus { url: String, status: u16 },
    #[error("{}: undecodable data: script source: {reason}", ERR_SCRIPT_DATA_URI)]
    DataUri { reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{}: '{url}' is {size} bytes, limit is {limit}", ERR_DOCUMENT_TOO_LARGE)]
    DocumentTooLarge {
        url: String,
        size: usize,
        limit: usize,
    },
    #[error("{0}")]
    Realm(String),
    #[error("load cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniAppDescriptor {
    pub slug: String,
    pub entry_point: String,
}

impl MiniAppDescriptor {
    pub fn new(slug: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Idle,
    Loading,
    Loaded,
    Error,
}

pub struct MiniAppLoader {
    fetcher: Arc<dyn AssetFetcher>,
    sink: Box<dyn LifecycleSink>,
    config: SandboxConfig,
    tickets: TicketCounter,
    cancel: RefCell<watch::Sender<bool>>,
    active: RefCell<Option<MiniAppDescriptor>>,
    root: SharedRoot,
    host: SharedHost<JsCallback>,
    realm: RefCell<Option<ScriptRealm>>,
    phase: Cell<LoadPhase>,
    last_report: Cell<Option<ExecutionReport>>,
}

impl MiniAppLoader {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        sink: Box<dyn LifecycleSink>,
        config: SandboxConfig,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        let host = Rc::new(RefCell::new(HostWindow::new(config.frame_interval_ms)));
        Self {
            fetcher,
            sink,
            config,
            tickets: TicketCounter::new(),
            cancel: RefCell::new(cancel),
            active: RefCell::new(None),
            root: Rc::new(RefCell::new(IsolatedRoot::new())),
            host,
            realm: RefCell::new(None),
            phase: Cell::new(LoadPhase::Idle),
            last_report: Cell::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Load `descriptor`, superseding any load in flight.
    pub async fn select(&self, descriptor: MiniAppDescriptor) {
        if self.active.borrow().as_ref() == Some(&descriptor) {
            tracing::debug!(target: LOG_TARGET, slug = %descriptor.slug, "already active");
            return;
        }

        let guard = self.tickets.mint();
        let cancel = self.restart_cancellation();
        *self.active.borrow_mut() = Some(descriptor.clone());
        let ticket = guard.ticket();

        if descriptor.slug.trim().is_empty() {
            self.phase.set(LoadPhase::Error);
            let message = LoadError::MissingSlug.to_string();
            tracing::warn!(target: LOG_TARGET, ticket, entry_point = %descriptor.entry_point, "{message}");
            self.emit(
                LifecycleEvent::new(LifecycleKind::Error, &descriptor.slug, &descriptor.entry_point, ticket)
                    .with_error(message),
            );
            return;
        }

        if descriptor.entry_point.trim().is_empty() {
            self.teardown();
            self.phase.set(LoadPhase::Loaded);
            tracing::info!(target: LOG_TARGET, ticket, slug = %descriptor.slug, "mini-app has no entry point");
            self.emit(
                LifecycleEvent::new(LifecycleKind::Loaded, &descriptor.slug, "", ticket).with_empty(),
            );
            return;
        }

        self.phase.set(LoadPhase::Loading);
        self.emit(LifecycleEvent::new(
            LifecycleKind::Loading,
            &descriptor.slug,
            &descriptor.entry_point,
            ticket,
        ));

        match self.load(&descriptor, &guard, cancel).await {
            Ok(report) => {
                self.phase.set(LoadPhase::Loaded);
                self.last_report.set(Some(report));
                tracing::info!(
                    target: LOG_TARGET,
                    ticket,
                    slug = %descriptor.slug,
                    executed = report.executed,
                    failed = report.failed,
                    "mini-app loaded"
                );
                self.emit(LifecycleEvent::new(
                    LifecycleKind::Loaded,
                    &descriptor.slug,
                    &descriptor.entry_point,
                    ticket,
                ));
            }
            Err(LoadError::Cancelled) => {
                tracing::debug!(target: LOG_TARGET, ticket, slug = %descriptor.slug, "load superseded");
            }
            Err(_) if guard.is_stale() => {
                tracing::debug!(target: LOG_TARGET, ticket, slug = %descriptor.slug, "stale load failed quietly");
            }
            Err(err) => {
                self.teardown();
                self.phase.set(LoadPhase::Error);
                let message = err.to_string();
                tracing::warn!(target: LOG_TARGET, ticket, slug = %descriptor.slug, error = %message, "mini-app failed to load");
                self.emit(
                    LifecycleEvent::new(
                        LifecycleKind::Error,
                        &descriptor.slug,
                        &descriptor.entry_point,
                        ticket,
                    )
                    .with_error(message),
                );
            }
        }
    }

    async fn load(
        &self,
        descriptor: &MiniAppDescriptor,
        guard: &TicketGuard,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionReport, LoadError> {
        let url = descriptor.entry_point.trim();
        let response = fetch_or_cancel(self.fetcher.as_ref(), url, FetchMode::NoCache, &mut cancel)
            .await
            .ok_or(LoadError::Cancelled)??;
        if guard.is_stale() {
            return Err(LoadError::Cancelled);
        }
        if !response.is_success() {
            return Err(LoadError::FetchStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        if response.body.len() > self.config.max_document_bytes {
            return Err(LoadError::DocumentTooLarge {
                url: url.to_string(),
                size: response.body.len(),
                limit: self.config.max_document_bytes,
            });
        }

        let base_url = base_url_of(url)?;
        let mut ctx = FetchContext {
            fetcher: self.fetcher.as_ref(),
            cancel,
            guard: guard.clone(),
        };
        let document = transform(&response.body, &base_url, &mut ctx).await?;
        if guard.is_stale() {
            return Err(LoadError::Cancelled);
        }

        // Nothing below suspends: the swap from old to new content is atomic
        // with respect to other loads.
        *self.realm.borrow_mut() = None;
        let ledger = self.root.borrow_mut().mount(document.nodes);
        tracing::debug!(target: LOG_TARGET, ticket = guard.ticket(), generation = ledger.generation(), "content mounted");

        let mut realm = ScriptRealm::new(self.root.clone(), self.host.clone(), &self.config)?;
        let report = realm.run(&document.scripts, guard);
        self.root.borrow_mut().reapply_sizer();
        *self.realm.borrow_mut() = Some(realm);
        if report.cancelled {
            return Err(LoadError::Cancelled);
        }
        Ok(report)
    }

    fn restart_cancellation(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let previous = self.cancel.replace(tx);
        previous.send_replace(true);
        rx
    }

    fn emit(&self, event: LifecycleEvent) {
        emit_or_log(self.sink.as_ref(), &event);
    }

    fn teardown(&self) {
        let report = self.root.borrow_mut().teardown();
        *self.realm.borrow_mut() = None;
        self.last_report.set(None);
        if report.failed > 0 {
            tracing::warn!(
                target: LOG_TARGET,
                released = report.released,
                failed = report.failed,
                "some resources failed to release"
            );
        }
    }

    /// Stop everything: supersede in-flight work and clear the root.
    pub fn dispose(&self) {
        self.tickets.mint();
        self.restart_cancellation();
        self.teardown();
        *self.active.borrow_mut() = None;
        self.phase.set(LoadPhase::Idle);
    }

    // ------------------------------------------------------------------
    // Driving the mounted mini-app
    // ------------------------------------------------------------------

    pub fn advance(&self, ms: u64) -> DriveReport {
        match self.realm.borrow_mut().as_mut() {
            Some(realm) => realm.advance(ms),
            None => {
                let mut host = self.host.borrow_mut();
                let until = host.now_ms().saturating_add(ms);
                host.finish(until);
                DriveReport::default()
            }
        }
    }

    pub fn dispatch_event(&self, target: EventTarget, event_type: &str) -> DriveReport {
        self.realm
            .borrow_mut()
            .as_mut()
            .map(|realm| realm.dispatch_event(target, event_type))
            .unwrap_or_default()
    }

    pub fn resize(&self, width: u32, height: u32) -> DriveReport {
        match self.realm.borrow_mut().as_mut() {
            Some(realm) => realm.resize(width, height),
            None => {
                self.host.borrow_mut().set_viewport(width, height);
                DriveReport::default()
            }
        }
    }

    /// `Some(ratio)` scales every canvas to the viewport at that pixel ratio;
    /// `None` restores their original sizes.
    pub fn set_fullscreen(&self, ratio: Option<f64>) {
        self.root.borrow_mut().set_fullscreen(ratio);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn phase(&self) -> LoadPhase {
        self.phase.get()
    }

    pub fn current_ticket(&self) -> LoadTicket {
        self.tickets.current()
    }

    pub fn active(&self) -> Option<MiniAppDescriptor> {
        self.active.borrow().clone()
    }

    pub fn root_html(&self) -> String {
        self.root.borrow().to_html()
    }

    pub fn root(&self) -> SharedRoot {
        self.root.clone()
    }

    pub fn console(&self) -> Vec<ConsoleEntry> {
        self.realm
            .borrow()
            .as_ref()
            .map(ScriptRealm::console)
            .unwrap_or_default()
    }

    pub fn ledger_len(&self) -> usize {
        self.root.borrow().ledger().len()
    }

    pub fn last_report(&self) -> Option<ExecutionReport> {
        self.last_report.get()
    }

    pub fn active_timers(&self) -> usize {
        self.host.borrow().active_timers()
    }

    pub fn listener_count(&self) -> usize {
        self.host.borrow().listener_count()
    }

    pub fn observer_count(&self) -> usize {
        self.host.borrow().observer_count()
    }

    pub fn pending_frames(&self) -> usize {
        self.host.borrow().pending_frames()
    }
}

impl Drop for MiniAppLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}
