//! Device-pixel-ratio sizing for canvases while a mini-app is fullscreen.
//!
//! Enabling scales every canvas backing store by the ratio and pins its CSS
//! size to the declared one; disabling restores the declared attributes.
//! A canvas that leaves the tree gets its declared attributes back, so a
//! later re-append scales it from the declared size again.

use std::collections::HashMap;

use crate::{
    config::limits::{CANVAS_DEFAULT_HEIGHT, CANVAS_DEFAULT_WIDTH},
    dom::{element_keys, Element, Node, NodeKey},
};

#[derive(Debug, Clone, PartialEq)]
struct CanvasOriginal {
    width: Option<String>,
    height: Option<String>,
    style: Option<String>,
}

#[derive(Debug, Default)]
pub struct DprSizer {
    ratio: Option<f64>,
    tracked: HashMap<NodeKey, CanvasOriginal>,
}

fn visit_canvases(nodes: &mut [Node], f: &mut dyn FnMut(&mut Element)) {
    for node in nodes.iter_mut() {
        if let Node::Element(el) = node {
            if el.tag == "canvas" {
                f(el);
            }
            visit_canvases(&mut el.children, f);
        }
    }
}

fn put_back(canvas: &mut Element, original: CanvasOriginal) {
    for (name, value) in [
        ("width", original.width),
        ("height", original.height),
        ("style", original.style),
    ] {
        match value {
            Some(v) => canvas.set_attr(name, v),
            None => {
                canvas.remove_attr(name);
            }
        }
    }
}

fn declared(value: Option<&str>, fallback: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(fallback)
}

impl DprSizer {
    pub fn is_enabled(&self) -> bool {
        self.ratio.is_some()
    }

    pub fn ratio(&self) -> Option<f64> {
        self.ratio
    }

    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_tracking(&self, key: NodeKey) -> bool {
        self.tracked.contains_key(&key)
    }

    /// Turn scaling on (or change the ratio) and scale every canvas in `nodes`.
    pub fn enable(&mut self, nodes: &mut [Node], ratio: f64) {
        let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 };
        if self.ratio.is_some() {
            self.restore(nodes);
        }
        self.ratio = Some(ratio);
        self.apply(nodes);
    }

    /// Scale canvases not tracked yet. No-op while disabled.
    pub fn apply(&mut self, nodes: &mut [Node]) {
        let Some(ratio) = self.ratio else {
            return;
        };
        let tracked = &mut self.tracked;
        visit_canvases(nodes, &mut |canvas| {
            if tracked.contains_key(&canvas.key) {
                return;
            }
            let original = CanvasOriginal {
                width: canvas.attr("width").map(str::to_string),
                height: canvas.attr("height").map(str::to_string),
                style: canvas.attr("style").map(str::to_string),
            };
            let css_w = declared(original.width.as_deref(), CANVAS_DEFAULT_WIDTH);
            let css_h = declared(original.height.as_deref(), CANVAS_DEFAULT_HEIGHT);
            canvas.set_attr("width", ((css_w as f64) * ratio).round().to_string());
            canvas.set_attr("height", ((css_h as f64) * ratio).round().to_string());
            let mut style = original
                .style
                .as_deref()
                .map(|s| s.trim().trim_end_matches(';').to_string())
                .filter(|s| !s.is_empty())
                .map(|s| format!("{s};"))
                .unwrap_or_default();
            style.push_str(&format!("width:{css_w}px;height:{css_h}px"));
            canvas.set_attr("style", style);
            tracked.insert(canvas.key, original);
        });
    }

    /// Turn scaling off and restore every tracked canvas still in `nodes`.
    pub fn disable(&mut self, nodes: &mut [Node]) {
        self.restore(nodes);
        self.ratio = None;
    }

    fn restore(&mut self, nodes: &mut [Node]) {
        let tracked = &mut self.tracked;
        visit_canvases(nodes, &mut |canvas| {
            if let Some(original) = tracked.remove(&canvas.key) {
                put_back(canvas, original);
            }
        });
        self.tracked.clear();
    }

    /// Restore and stop tracking every canvas in a subtree leaving the tree.
    pub fn release(&mut self, subtree: &mut Element) {
        if self.tracked.is_empty() {
            return;
        }
        let tracked = &mut self.tracked;
        let mut restore_one = |canvas: &mut Element| {
            if let Some(original) = tracked.remove(&canvas.key) {
                put_back(canvas, original);
            }
        };
        if subtree.tag == "canvas" {
            restore_one(subtree);
        }
        visit_canvases(&mut subtree.children, &mut restore_one);
    }

    /// Drop entries whose canvas no longer exists anywhere in `nodes`.
    pub fn prune(&mut self, nodes: &[Node]) {
        if self.tracked.is_empty() {
            return;
        }
        let live = element_keys(nodes);
        self.tracked.retain(|key, _| live.contains(key));
    }

    pub fn forget_all(&mut self) {
        self.tracked.clear();
    }
}
