//! Owned element tree the sandbox renders into.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static NEXT_NODE_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique element identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeKey(pub u64);

impl NodeKey {
    pub fn fresh() -> Self {
        NodeKey(NEXT_NODE_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Void elements never carry children and serialize without a closing tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_node(self, &mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub key: NodeKey,
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            key: NodeKey::fresh(),
            tag: tag.into().to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Insert or overwrite, keeping first-seen attribute order.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self
            .attrs
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(idx).1)
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn set_text_content(&mut self, text: impl Into<String>) {
        self.children.clear();
        let text = text.into();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }

    pub fn is_void(&self) -> bool {
        VOID_TAGS.contains(&self.tag.as_str())
    }
}

/// Concatenated text of a forest, in document order.
pub fn text_of(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => collect_text(&el.children, out),
        }
    }
}

// ----------------------------------------------------------------------------
// Tree queries over a forest of nodes
// ----------------------------------------------------------------------------

pub fn find_by_key(nodes: &[Node], key: NodeKey) -> Option<&Element> {
    let mut stack: Vec<&Node> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Node::Element(el) = node {
            if el.key == key {
                return Some(el);
            }
            stack.extend(el.children.iter().rev());
        }
    }
    None
}

pub fn find_by_key_mut(nodes: &mut [Node], key: NodeKey) -> Option<&mut Element> {
    for node in nodes.iter_mut() {
        if let Node::Element(el) = node {
            if el.key == key {
                return Some(el);
            }
            if let Some(found) = find_by_key_mut(&mut el.children, key) {
                return Some(found);
            }
        }
    }
    None
}

/// First element in document order whose `id` attribute equals `id`.
pub fn find_by_id(nodes: &[Node], id: &str) -> Option<NodeKey> {
    let mut stack: Vec<&Node> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Node::Element(el) = node {
            if el.attr("id") == Some(id) {
                return Some(el.key);
            }
            stack.extend(el.children.iter().rev());
        }
    }
    None
}

/// Detach the element with `key`, returning it with its subtree.
pub fn detach(nodes: &mut Vec<Node>, key: NodeKey) -> Option<Element> {
    if let Some(idx) = nodes
        .iter()
        .position(|n| matches!(n, Node::Element(el) if el.key == key))
    {
        return match nodes.remove(idx) {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        };
    }
    for node in nodes.iter_mut() {
        if let Node::Element(el) = node {
            if let Some(found) = detach(&mut el.children, key) {
                return Some(found);
            }
        }
    }
    None
}

/// Keys of every element in the forest, in document order.
pub fn element_keys(nodes: &[Node]) -> Vec<NodeKey> {
    let mut keys = Vec::new();
    let mut stack: Vec<&Node> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Node::Element(el) = node {
            keys.push(el.key);
            stack.extend(el.children.iter().rev());
        }
    }
    keys
}

pub fn elements_by_tag<'a>(nodes: &'a [Node], tag: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    let mut stack: Vec<&Node> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Node::Element(el) = node {
            if el.tag.eq_ignore_ascii_case(tag) {
                found.push(el);
            }
            stack.extend(el.children.iter().rev());
        }
    }
    found
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

pub fn to_html(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, &mut out);
    }
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => escape_into(text, false, out),
        Node::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (name, value) in el.attrs() {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            out.push('>');
            if el.is_void() {
                return;
            }
            let raw_text = matches!(el.tag.as_str(), "style" | "script");
            for child in &el.children {
                match child {
                    Node::Text(t) if raw_text => out.push_str(t),
                    other => write_node(other, out),
                }
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}
