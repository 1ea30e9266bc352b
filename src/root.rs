//! The container a mini-app renders into.
//!
//! An `IsolatedRoot` owns the mounted nodes, a pool of elements that exist but
//! are not attached (created by script or removed from the tree), the ledger
//! of the current mount generation and the fullscreen DPR sizer.
//!
//! The pool is bounded: past `MAX_DETACHED_ELEMENTS` the oldest unattached
//! elements are dropped, and their keys are reported through
//! [`IsolatedRoot::take_dropped`] so script-side handles can be released.

use crate::{
    config::limits::MAX_DETACHED_ELEMENTS,
    core::LOG_TARGET,
    dom::{self, Element, Node, NodeKey},
    dpr::DprSizer,
    ledger::{DrainReport, ResourceLedger},
};

#[derive(Debug)]
pub struct IsolatedRoot {
    key: NodeKey,
    children: Vec<Node>,
    detached: Vec<Element>,
    /// Keys of elements discarded since the last `take_dropped`.
    dropped: Vec<NodeKey>,
    ledger: ResourceLedger,
    generation: u64,
    sizer: DprSizer,
}

impl Default for IsolatedRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolatedRoot {
    pub fn new() -> Self {
        Self {
            key: NodeKey::fresh(),
            children: Vec::new(),
            detached: Vec::new(),
            dropped: Vec::new(),
            ledger: ResourceLedger::new(0),
            generation: 0,
            sizer: DprSizer::default(),
        }
    }

    /// Identity of the root itself; scripts see it as the root element.
    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn ledger(&self) -> ResourceLedger {
        self.ledger.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn to_html(&self) -> String {
        dom::to_html(&self.children)
    }

    // ------------------------------------------------------------------
    // Mount lifecycle
    // ------------------------------------------------------------------

    /// Dispose and drain the current ledger, clear all content, and start a
    /// fresh ledger generation.
    pub fn teardown(&mut self) -> DrainReport {
        self.ledger.dispose();
        let report = self.ledger.drain();
        self.children.clear();
        self.detached.clear();
        self.dropped.clear();
        self.sizer.forget_all();
        self.generation += 1;
        self.ledger = ResourceLedger::new(self.generation);
        report
    }

    /// Replace all content with `nodes`. The previous generation is fully
    /// drained before anything attaches; the returned ledger belongs to the
    /// new content.
    pub fn mount(&mut self, nodes: Vec<Node>) -> ResourceLedger {
        self.teardown();
        // INVARIANT: the ledger handed out here is empty and not disposed.
        debug_assert!(self.ledger.is_empty() && !self.ledger.is_disposed());
        self.children = nodes;
        self.sizer.apply(&mut self.children);
        self.ledger.clone()
    }

    // ------------------------------------------------------------------
    // Fullscreen sizing
    // ------------------------------------------------------------------

    pub fn set_fullscreen(&mut self, ratio: Option<f64>) {
        match ratio {
            Some(r) => self.sizer.enable(&mut self.children, r),
            None => self.sizer.disable(&mut self.children),
        }
    }

    pub fn sizer(&self) -> &DprSizer {
        &self.sizer
    }

    /// Re-scale canvases added since the last pass while fullscreen is on.
    pub fn reapply_sizer(&mut self) {
        if self.sizer.is_enabled() {
            self.after_structure_change();
        }
    }

    fn after_structure_change(&mut self) {
        self.sizer.prune(&self.children);
        self.sizer.apply(&mut self.children);
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    pub fn contains(&self, key: NodeKey) -> bool {
        key == self.key || dom::find_by_key(&self.children, key).is_some()
    }

    /// The root plus every attached element.
    pub fn attached_keys(&self) -> Vec<NodeKey> {
        let mut keys = vec![self.key];
        keys.extend(dom::element_keys(&self.children));
        keys
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeKey> {
        dom::find_by_id(&self.children, id)
    }

    pub fn element(&self, key: NodeKey) -> Option<&Element> {
        dom::find_by_key(&self.children, key).or_else(|| {
            self.detached.iter().find_map(|el| {
                if el.key == key {
                    Some(el)
                } else {
                    dom::find_by_key(&el.children, key)
                }
            })
        })
    }

    fn element_mut(&mut self, key: NodeKey) -> Option<&mut Element> {
        if dom::find_by_key(&self.children, key).is_some() {
            return dom::find_by_key_mut(&mut self.children, key);
        }
        for el in self.detached.iter_mut() {
            if el.key == key {
                return Some(el);
            }
            if let Some(found) = dom::find_by_key_mut(&mut el.children, key) {
                return Some(found);
            }
        }
        None
    }

    pub fn tag_of(&self, key: NodeKey) -> Option<String> {
        if key == self.key {
            return Some("#root".to_string());
        }
        self.element(key).map(|el| el.tag.clone())
    }

    pub fn text_of(&self, key: NodeKey) -> Option<String> {
        if key == self.key {
            return Some(dom::text_of(&self.children));
        }
        self.element(key).map(Element::text_content)
    }

    pub fn set_text(&mut self, key: NodeKey, text: &str) -> bool {
        if key == self.key {
            self.dropped.extend(dom::element_keys(&self.children));
            self.children.clear();
            if !text.is_empty() {
                self.children.push(Node::Text(text.to_string()));
            }
            self.sizer.prune(&self.children);
            return true;
        }
        let discarded = match self.element_mut(key) {
            Some(el) => {
                let keys = dom::element_keys(&el.children);
                el.set_text_content(text);
                keys
            }
            None => return false,
        };
        self.dropped.extend(discarded);
        self.sizer.prune(&self.children);
        true
    }

    pub fn attr_of(&self, key: NodeKey, name: &str) -> Option<String> {
        self.element(key)
            .and_then(|el| el.attr(name))
            .map(str::to_string)
    }

    pub fn set_attr(&mut self, key: NodeKey, name: &str, value: &str) -> bool {
        match self.element_mut(key) {
            Some(el) => {
                el.set_attr(name, value);
                true
            }
            None => false,
        }
    }

    /// Create an element that exists but is not attached yet.
    pub fn create_element(&mut self, tag: &str) -> NodeKey {
        let el = Element::new(tag);
        let key = el.key;
        self.park(el);
        key
    }

    /// Keys of elements discarded from the unattached pool or by text
    /// replacement since the last call.
    pub fn take_dropped(&mut self) -> Vec<NodeKey> {
        std::mem::take(&mut self.dropped)
    }

    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }

    /// Add `el` to the unattached pool, discarding the oldest entries past the cap.
    fn park(&mut self, el: Element) {
        self.detached.push(el);
        let excess = self.detached.len().saturating_sub(MAX_DETACHED_ELEMENTS);
        if excess == 0 {
            return;
        }
        for old in self.detached.drain(..excess) {
            self.dropped.push(old.key);
            self.dropped.extend(dom::element_keys(&old.children));
        }
        tracing::warn!(
            target: LOG_TARGET,
            generation = self.generation,
            discarded = excess,
            limit = MAX_DETACHED_ELEMENTS,
            "unattached element pool full; discarded oldest elements"
        );
    }

    /// Take `key` out of wherever it lives, keeping its subtree.
    fn take(&mut self, key: NodeKey) -> Option<Element> {
        if let Some(idx) = self.detached.iter().position(|el| el.key == key) {
            return Some(self.detached.remove(idx));
        }
        if let Some(el) = dom::detach(&mut self.children, key) {
            return Some(el);
        }
        for el in self.detached.iter_mut() {
            if let Some(found) = dom::detach(&mut el.children, key) {
                return Some(found);
            }
        }
        None
    }

    /// Move `child` (attached or not) to the end of `parent`'s children.
    ///
    /// Rejected when `parent` lies inside `child`'s subtree or either key is unknown.
    pub fn append_child(&mut self, parent: NodeKey, child: NodeKey) -> bool {
        if child == self.key || parent == child {
            return false;
        }
        let Some(child_el) = self.element(child) else {
            return false;
        };
        if dom::find_by_key(&child_el.children, parent).is_some() {
            return false;
        }
        if parent != self.key && self.element(parent).is_none() {
            return false;
        }
        let into_tree = parent == self.key || dom::find_by_key(&self.children, parent).is_some();
        let Some(mut moved) = self.take(child) else {
            return false;
        };
        if !into_tree {
            self.sizer.release(&mut moved);
        }
        if parent == self.key {
            self.children.push(Node::Element(moved));
        } else if let Some(parent_el) = self.element_mut(parent) {
            parent_el.children.push(Node::Element(moved));
        }
        self.after_structure_change();
        true
    }

    /// Detach `key` from the tree; the element stays reachable for re-append.
    pub fn remove(&mut self, key: NodeKey) -> bool {
        if key == self.key {
            return false;
        }
        match dom::detach(&mut self.children, key) {
            Some(mut el) => {
                self.sizer.release(&mut el);
                self.park(el);
                self.after_structure_change();
                true
            }
            None => false,
        }
    }
}
