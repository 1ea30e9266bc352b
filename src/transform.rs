//! Rebuilds a fetched HTML document into the sandbox's own tree.
//!
//! Traversal is an explicit depth-first worklist over the parsed document.
//! URL-bearing attributes are rewritten against the load's base URL, scripts
//! are pulled out in encounter order (fetching external sources), and script
//! elements never reach the output tree.

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use boa_engine::object::builtins::JsFunction;
use once_cell::unsync::OnceCell;
use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html};
use tokio::sync::watch;

use crate::{
    core::LOG_TARGET,
    dom::{Element, Node},
    fetch::{fetch_or_cancel, AssetFetcher, FetchMode},
    loader::LoadError,
    resolver::{resolve, resolve_srcset, ResolveError},
    ticket::TicketGuard,
};

/// Attributes never copied verbatim; the tag table decides whether they are rewritten.
const URL_ATTRS: &[&str] = &["src", "href", "xlink:href", "srcset"];

/// Script `type` values that still execute. Empty means "no type given".
const EXECUTABLE_TYPES: &[&str] = &["", "text/javascript", "application/javascript"];

fn rewritable_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "img" | "source" => &["src", "srcset"],
        "script" | "audio" => &["src"],
        "link" | "a" => &["href"],
        "use" => &["href", "xlink:href"],
        "video" => &["poster"],
        _ => &[],
    }
}

// ----------------------------------------------------------------------------
// Output types
// ----------------------------------------------------------------------------

/// One extracted script, compiled at most once per load.
#[derive(Debug)]
pub struct ScriptUnit {
    source: String,
    src: Option<String>,
    compiled: OnceCell<JsFunction>,
}

impl ScriptUnit {
    pub fn inline(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            src: None,
            compiled: OnceCell::new(),
        }
    }

    pub fn external(source: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            src: Some(src.into()),
            compiled: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolved URL the source came from, if external.
    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    pub(crate) fn compiled(&self) -> &OnceCell<JsFunction> {
        &self.compiled
    }
}

#[derive(Debug, Default)]
pub struct TransformedDocument {
    pub nodes: Vec<Node>,
    pub scripts: Vec<ScriptUnit>,
}

/// What a transform needs to fetch external scripts for one load.
pub struct FetchContext<'a> {
    pub fetcher: &'a dyn AssetFetcher,
    pub cancel: watch::Receiver<bool>,
    pub guard: TicketGuard,
}

impl FetchContext<'_> {
    fn ensure_current(&self) -> Result<(), LoadError> {
        if self.guard.is_stale() || *self.cancel.borrow() {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Attribute transfer
// ----------------------------------------------------------------------------

/// Copy all non-URL attributes, then rewrite the URL attributes the tag table names.
fn transfer_attrs(
    source: &scraper::node::Element,
    target: &mut Element,
    base_url: &str,
) -> Result<(), ResolveError> {
    for (name, value) in source.attrs() {
        if !URL_ATTRS.iter().any(|u| u.eq_ignore_ascii_case(name)) {
            target.set_attr(name, value);
        }
    }
    for &name in rewritable_attrs(&target.tag) {
        let Some(value) = source.attr(name).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let rewritten = if name == "srcset" {
            resolve_srcset(value, base_url)?
        } else {
            resolve(value, base_url)?
        };
        target.set_attr(name, rewritten);
    }
    Ok(())
}

fn is_stylesheet_link(el: &scraper::node::Element) -> bool {
    el.name().eq_ignore_ascii_case("link")
        && el.attr("rel").is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
}

/// Payload of a `data:` script source, or `None` for any other URL.
fn data_script(src: &str) -> Option<Result<String, LoadError>> {
    let src = src.trim();
    if !src.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:")) {
        return None;
    }
    let bad = |reason: String| LoadError::DataUri { reason };
    let Some((meta, body)) = src[5..].split_once(',') else {
        return Some(Err(bad("missing comma separator".to_string())));
    };
    let is_base64 = meta
        .split(';')
        .any(|param| param.trim().eq_ignore_ascii_case("base64"));
    let decoded = if is_base64 {
        BASE64_ENGINE
            .decode(body.trim())
            .map_err(|err| bad(format!("base64 decode failed: {err}")))
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|err| bad(format!("payload is not utf-8: {err}")))
            })
    } else {
        percent_decode_str(body)
            .decode_utf8()
            .map(|text| text.into_owned())
            .map_err(|err| bad(format!("percent-decoding failed: {err}")))
    };
    Some(decoded)
}

fn script_is_executable(el: &scraper::node::Element) -> bool {
    let kind = el.attr("type").unwrap_or("").trim().to_ascii_lowercase();
    EXECUTABLE_TYPES.contains(&kind.as_str())
}

// ----------------------------------------------------------------------------
// Traversal
// ----------------------------------------------------------------------------

enum Work<N> {
    Visit(N),
    /// Close the innermost open element and attach it to its parent.
    Close,
}

fn child_element<'a>(parent: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name().eq_ignore_ascii_case(tag))
}

fn head_keeps(el: &scraper::node::Element) -> bool {
    el.name() == "style" || el.name() == "script" || is_stylesheet_link(el)
}

fn attach(open: &mut [Element], output: &mut Vec<Node>, node: Node) {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None => output.push(node),
    }
}

/// Parse `html` and rebuild it relative to `base_url`.
///
/// Suspends only to fetch external scripts and to yield between top-level
/// nodes. Returns `LoadError::Cancelled` as soon as the load is superseded.
pub async fn transform(
    html: &str,
    base_url: &str,
    ctx: &mut FetchContext<'_>,
) -> Result<TransformedDocument, LoadError> {
    ctx.ensure_current()?;
    let doc = Html::parse_document(html);
    let mut out = TransformedDocument::default();

    // Stylesheet and script children of <head>, then every child of <body>.
    let document = doc.root_element();
    let mut tops = Vec::new();
    if let Some(head) = child_element(document, "head") {
        tops.extend(
            head.children()
                .filter(|child| child.value().as_element().is_some_and(head_keeps)),
        );
    }
    if let Some(body) = child_element(document, "body") {
        tops.extend(body.children());
    }

    for top in tops {
        let mut open: Vec<Element> = Vec::new();
        let mut work = vec![Work::Visit(top)];

        while let Some(item) = work.pop() {
            let node = match item {
                Work::Visit(node) => node,
                Work::Close => {
                    if let Some(done) = open.pop() {
                        attach(&mut open, &mut out.nodes, Node::Element(done));
                    }
                    continue;
                }
            };

            match node.value() {
                scraper::Node::Text(text) => {
                    attach(&mut open, &mut out.nodes, Node::Text(String::from(&**text)));
                }
                scraper::Node::Element(el) if el.name().eq_ignore_ascii_case("script") => {
                    if !script_is_executable(el) {
                        tracing::debug!(
                            target: LOG_TARGET,
                            script_type = el.attr("type").unwrap_or(""),
                            "dropping non-executable script"
                        );
                        continue;
                    }
                    let src = el.attr("src").filter(|s| !s.trim().is_empty());
                    let unit = match src.map(|src| (src, data_script(src))) {
                        Some((_, Some(decoded))) => ScriptUnit::inline(decoded?),
                        Some((src, None)) => {
                            let url = resolve(src, base_url)?;
                            let fetched =
                                fetch_or_cancel(ctx.fetcher, &url, FetchMode::Default, &mut ctx.cancel)
                                    .await
                                    .ok_or(LoadError::Cancelled)?;
                            ctx.ensure_current()?;
                            let response = fetched?;
                            if !response.is_success() {
                                return Err(LoadError::ScriptStatus {
                                    url,
                                    status: response.status,
                                });
                            }
                            ScriptUnit::external(response.body, url)
                        }
                        None => {
                            let inline: String = ElementRef::wrap(node)
                                .map(|script| script.text().collect())
                                .unwrap_or_default();
                            ScriptUnit::inline(inline)
                        }
                    };
                    out.scripts.push(unit);
                }
                scraper::Node::Element(el) if is_stylesheet_link(el) => {
                    let mut link = Element::new("link");
                    transfer_attrs(el, &mut link, base_url)?;
                    link.set_attr("rel", "stylesheet");
                    attach(&mut open, &mut out.nodes, Node::Element(link));
                }
                scraper::Node::Element(el) => {
                    let mut element = Element::new(el.name());
                    transfer_attrs(el, &mut element, base_url)?;
                    open.push(element);
                    work.push(Work::Close);
                    let children: Vec<_> = node.children().collect();
                    for child in children.into_iter().rev() {
                        work.push(Work::Visit(child));
                    }
                }
                // Comments, doctypes, processing instructions.
                _ => {}
            }
        }

        ctx.ensure_current()?;
        tokio::task::yield_now().await;
        ctx.ensure_current()?;
    }

    tracing::debug!(
        target: LOG_TARGET,
        ticket = ctx.guard.ticket(),
        nodes = out.nodes.len(),
        scripts = out.scripts.len(),
        "document transformed"
    );
    Ok(out)
}
