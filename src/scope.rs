//! Instrumented window/document facades.
//!
//! Each facade exposes the resource-creating operations a mini-app uses
//! (timers, animation frames, event listeners, resize observers) plus
//! pass-through accessors. Creating a resource registers it on the shared
//! host and appends the matching release action to the mount's ledger, so
//! teardown never depends on the mini-app cleaning up after itself.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{
    core::LOG_TARGET,
    dom::NodeKey,
    host::{DueKind, EventTarget, HostWindow},
    ledger::{ResourceKey, ResourceLedger},
    root::IsolatedRoot,
};

pub type SharedHost<F> = Rc<RefCell<HostWindow<Guarded<F>>>>;
pub type SharedRoot = Rc<RefCell<IsolatedRoot>>;

/// A callback bound to the ledger of the mount that registered it.
#[derive(Debug, Clone)]
pub struct Guarded<F> {
    callback: F,
    ledger: ResourceLedger,
}

impl<F> Guarded<F> {
    pub fn new(callback: F, ledger: ResourceLedger) -> Self {
        Self { callback, ledger }
    }

    /// The callback, or `None` once its mount has been disposed.
    pub fn live(&self) -> Option<&F> {
        if self.ledger.is_disposed() {
            None
        } else {
            Some(&self.callback)
        }
    }

    /// The wrapped callback regardless of liveness; used for identity matching.
    pub fn inner(&self) -> &F {
        &self.callback
    }

    pub fn generation(&self) -> u64 {
        self.ledger.generation()
    }
}

struct ScopeCore<F> {
    host: SharedHost<F>,
    root: SharedRoot,
    ledger: ResourceLedger,
}

impl<F: 'static> ScopeCore<F> {
    fn guard(&self, callback: F) -> Guarded<F> {
        Guarded::new(callback, self.ledger.clone())
    }

    fn weak_host(&self) -> Weak<RefCell<HostWindow<Guarded<F>>>> {
        Rc::downgrade(&self.host)
    }

    /// Append a release action that runs `op` against the host if it is still alive.
    fn record_release<R>(&self, key: ResourceKey, op: R)
    where
        R: FnOnce(&mut HostWindow<Guarded<F>>) -> bool + 'static,
    {
        if self.ledger.is_disposed() {
            tracing::debug!(
                target: LOG_TARGET,
                resource = ?key,
                "resource registered after disposal; released at once"
            );
        }
        let host = self.weak_host();
        self.ledger.record(key, move || {
            let Some(host) = host.upgrade() else {
                return Ok(());
            };
            let mut host = host
                .try_borrow_mut()
                .map_err(|err| anyhow::anyhow!("host busy while releasing {key:?}: {err}"))?;
            op(&mut *host);
            Ok(())
        });
    }

    fn listen(&self, target: EventTarget, event_type: &str, callback: F) -> u32 {
        let guarded = self.guard(callback);
        let id = self
            .host
            .borrow_mut()
            .add_listener(target, event_type, guarded);
        self.record_release(ResourceKey::Listener(id), move |host| host.remove_listener(id));
        id
    }

    fn unlisten<P>(&self, target: EventTarget, event_type: &str, mut matches: P) -> bool
    where
        P: FnMut(&F) -> bool,
    {
        let generation = self.ledger.generation();
        let mut host = self.host.borrow_mut();
        let found = host.find_listener(target, event_type, |g| {
            g.generation() == generation && matches(g.inner())
        });
        match found {
            Some(id) => {
                host.remove_listener(id);
                drop(host);
                self.ledger.forget(ResourceKey::Listener(id));
                true
            }
            None => false,
        }
    }
}

/// Everything a mounted mini-app gets to touch.
pub struct Instrumented<F> {
    pub window: InstrumentedWindow<F>,
    pub document: InstrumentedDocument<F>,
    pub ledger: ResourceLedger,
}

/// Wrap `host` and `root` for the mount generation currently owning `root`.
pub fn instrument<F: 'static>(root: SharedRoot, host: SharedHost<F>) -> Instrumented<F> {
    let ledger = root.borrow().ledger();
    let core = Rc::new(ScopeCore {
        host,
        root,
        ledger: ledger.clone(),
    });
    Instrumented {
        window: InstrumentedWindow { core: core.clone() },
        document: InstrumentedDocument { core },
        ledger,
    }
}

// ----------------------------------------------------------------------------
// Window facade
// ----------------------------------------------------------------------------

pub struct InstrumentedWindow<F> {
    core: Rc<ScopeCore<F>>,
}

impl<F> Clone for InstrumentedWindow<F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<F: 'static> InstrumentedWindow<F> {
    pub fn ledger(&self) -> &ResourceLedger {
        &self.core.ledger
    }

    fn schedule(&self, callback: F, delay_ms: u64, repeat: bool) -> u32 {
        let guarded = self.core.guard(callback);
        let handle = self
            .core
            .host
            .borrow_mut()
            .set_timer(guarded, delay_ms, repeat);
        self.core
            .record_release(ResourceKey::Timer(handle), move |host| host.clear_timer(handle));
        handle
    }

    pub fn set_timeout(&self, callback: F, delay_ms: u64) -> u32 {
        self.schedule(callback, delay_ms, false)
    }

    pub fn set_interval(&self, callback: F, delay_ms: u64) -> u32 {
        self.schedule(callback, delay_ms, true)
    }

    /// Serves both `clearTimeout` and `clearInterval`.
    pub fn clear_timer(&self, handle: u32) -> bool {
        if !self.core.ledger.contains(ResourceKey::Timer(handle)) {
            return false;
        }
        let cleared = self.core.host.borrow_mut().clear_timer(handle);
        self.core.ledger.forget(ResourceKey::Timer(handle));
        cleared
    }

    pub fn request_animation_frame(&self, callback: F) -> u32 {
        let guarded = self.core.guard(callback);
        let handle = self.core.host.borrow_mut().request_frame(guarded);
        self.core
            .record_release(ResourceKey::Frame(handle), move |host| host.cancel_frame(handle));
        handle
    }

    pub fn cancel_animation_frame(&self, handle: u32) -> bool {
        if !self.core.ledger.contains(ResourceKey::Frame(handle)) {
            return false;
        }
        let cancelled = self.core.host.borrow_mut().cancel_frame(handle);
        self.core.ledger.forget(ResourceKey::Frame(handle));
        cancelled
    }

    pub fn add_event_listener(&self, event_type: &str, callback: F) -> u32 {
        self.core.listen(EventTarget::Window, event_type, callback)
    }

    pub fn remove_event_listener<P>(&self, event_type: &str, matches: P) -> bool
    where
        P: FnMut(&F) -> bool,
    {
        self.core.unlisten(EventTarget::Window, event_type, matches)
    }

    pub fn create_resize_observer(&self, callback: F) -> u32 {
        let guarded = self.core.guard(callback);
        let id = self.core.host.borrow_mut().create_observer(guarded);
        self.core
            .record_release(ResourceKey::Observer(id), move |host| host.disconnect(id));
        id
    }

    pub fn observe(&self, observer: u32, key: NodeKey) -> bool {
        self.core.ledger.contains(ResourceKey::Observer(observer))
            && self.core.host.borrow_mut().observe(observer, key)
    }

    pub fn unobserve(&self, observer: u32, key: NodeKey) {
        if self.core.ledger.contains(ResourceKey::Observer(observer)) {
            self.core.host.borrow_mut().unobserve(observer, key);
        }
    }

    pub fn disconnect_observer(&self, observer: u32) -> bool {
        if !self.core.ledger.contains(ResourceKey::Observer(observer)) {
            return false;
        }
        let disconnected = self.core.host.borrow_mut().disconnect(observer);
        self.core.ledger.forget(ResourceKey::Observer(observer));
        disconnected
    }

    /// Drop the release action of a one-shot resource that has just fired.
    pub fn settle(&self, kind: DueKind) {
        match kind {
            DueKind::Timer {
                handle,
                repeating: false,
            } => self.core.ledger.forget(ResourceKey::Timer(handle)),
            DueKind::Frame { handle } => self.core.ledger.forget(ResourceKey::Frame(handle)),
            DueKind::Timer { repeating: true, .. } => {}
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.core.host.borrow().now_ms()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.core.host.borrow().viewport()
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.core.root.borrow().sizer().ratio().unwrap_or(1.0)
    }
}

// ----------------------------------------------------------------------------
// Document facade
// ----------------------------------------------------------------------------

pub struct InstrumentedDocument<F> {
    core: Rc<ScopeCore<F>>,
}

impl<F> Clone for InstrumentedDocument<F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<F: 'static> InstrumentedDocument<F> {
    pub fn root_key(&self) -> NodeKey {
        self.core.root.borrow().key()
    }

    /// Listener on the document itself.
    pub fn add_event_listener(&self, event_type: &str, callback: F) -> u32 {
        self.core.listen(EventTarget::Document, event_type, callback)
    }

    pub fn remove_event_listener<P>(&self, event_type: &str, matches: P) -> bool
    where
        P: FnMut(&F) -> bool,
    {
        self.core.unlisten(EventTarget::Document, event_type, matches)
    }

    /// Listener on one element of the mounted tree.
    pub fn add_element_listener(&self, key: NodeKey, event_type: &str, callback: F) -> u32 {
        self.core.listen(EventTarget::Element(key), event_type, callback)
    }

    pub fn remove_element_listener<P>(&self, key: NodeKey, event_type: &str, matches: P) -> bool
    where
        P: FnMut(&F) -> bool,
    {
        self.core.unlisten(EventTarget::Element(key), event_type, matches)
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeKey> {
        self.core.root.borrow().find_by_id(id)
    }

    pub fn create_element(&self, tag: &str) -> NodeKey {
        self.core.root.borrow_mut().create_element(tag)
    }

    pub fn tag_name(&self, key: NodeKey) -> Option<String> {
        self.core.root.borrow().tag_of(key)
    }

    pub fn text_content(&self, key: NodeKey) -> Option<String> {
        self.core.root.borrow().text_of(key)
    }

    pub fn set_text_content(&self, key: NodeKey, text: &str) -> bool {
        self.core.root.borrow_mut().set_text(key, text)
    }

    pub fn get_attribute(&self, key: NodeKey, name: &str) -> Option<String> {
        self.core.root.borrow().attr_of(key, name)
    }

    pub fn set_attribute(&self, key: NodeKey, name: &str, value: &str) -> bool {
        self.core.root.borrow_mut().set_attr(key, name, value)
    }

    pub fn append_child(&self, parent: NodeKey, child: NodeKey) -> bool {
        self.core.root.borrow_mut().append_child(parent, child)
    }

    pub fn remove(&self, key: NodeKey) -> bool {
        self.core.root.borrow_mut().remove(key)
    }

    pub fn is_connected(&self, key: NodeKey) -> bool {
        self.core.root.borrow().contains(key)
    }

    /// Keys of elements the root discarded since the last call.
    pub fn take_dropped(&self) -> Vec<NodeKey> {
        self.core.root.borrow_mut().take_dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Element, Node};

    fn setup() -> (SharedRoot, SharedHost<&'static str>, Instrumented<&'static str>) {
        let root = Rc::new(RefCell::new(IsolatedRoot::new()));
        let mut app = Element::new("div");
        app.set_attr("id", "app");
        root.borrow_mut().mount(vec![Node::Element(app)]);
        let host: SharedHost<&'static str> = Rc::new(RefCell::new(HostWindow::new(16)));
        let scope = instrument(root.clone(), host.clone());
        (root, host, scope)
    }

    #[test]
    fn every_created_resource_is_recorded_and_released() {
        let (root, host, scope) = setup();
        let app = scope.document.get_element_by_id("app").expect("app");
        scope.window.set_interval("tick", 10);
        scope.window.set_timeout("once", 50);
        scope.window.request_animation_frame("frame");
        scope.window.add_event_listener("resize", "on-resize");
        scope.document.add_element_listener(app, "click", "on-click");
        let obs = scope.window.create_resize_observer("observer");
        assert!(scope.window.observe(obs, app));
        assert_eq!(scope.ledger.len(), 6);

        let report = root.borrow_mut().teardown();
        assert_eq!(report.released, 6);
        let host = host.borrow();
        assert_eq!(host.active_timers(), 0);
        assert_eq!(host.pending_frames(), 0);
        assert_eq!(host.listener_count(), 0);
        assert_eq!(host.observer_count(), 0);
    }

    #[test]
    fn explicit_release_is_forgotten() {
        let (_root, host, scope) = setup();
        let t = scope.window.set_interval("tick", 10);
        let f = scope.window.request_animation_frame("frame");
        scope.window.add_event_listener("resize", "handler");
        assert!(scope.window.clear_timer(t));
        assert!(scope.window.cancel_animation_frame(f));
        assert!(scope.window.remove_event_listener("resize", |cb| *cb == "handler"));
        assert!(!scope.window.remove_event_listener("resize", |cb| *cb == "handler"));
        assert!(scope.ledger.is_empty());
        assert_eq!(host.borrow().listener_count(), 0);
    }

    #[test]
    fn callbacks_go_inert_once_disposed() {
        let (root, host, scope) = setup();
        scope.window.set_timeout("late", 5);
        let ledger = scope.ledger.clone();
        ledger.dispose();
        // Registered after disposal: released at once, never queued.
        scope.window.set_timeout("racing", 1);
        assert_eq!(host.borrow().active_timers(), 1);
        let due = host.borrow_mut().next_due(10).expect("timer due");
        assert!(due.callback.live().is_none());
        root.borrow_mut().teardown();
        assert_eq!(host.borrow().active_timers(), 0);
    }

    #[test]
    fn one_shot_timers_are_settled_after_firing() {
        let (_root, host, scope) = setup();
        scope.window.set_timeout("once", 5);
        let due = host.borrow_mut().next_due(10).expect("due");
        assert_eq!(due.callback.live(), Some(&"once"));
        scope.window.settle(due.kind);
        assert!(scope.ledger.is_empty());
    }

    #[test]
    fn document_passes_through_to_root() {
        let (root, _host, scope) = setup();
        let app = scope.document.get_element_by_id("app").expect("app");
        let p = scope.document.create_element("p");
        assert!(scope.document.set_text_content(p, "hi"));
        assert!(scope.document.set_attribute(p, "class", "note"));
        assert!(scope.document.append_child(app, p));
        assert!(scope.document.is_connected(p));
        assert_eq!(
            root.borrow().to_html(),
            "<div id=\"app\"><p class=\"note\">hi</p></div>"
        );
        assert_eq!(scope.document.tag_name(p).as_deref(), Some("p"));
    }
}
