//! Asset reference rewriting against a mini-app's base URL.
//!
//! Relative references become origin-relative paths (`/projects/demo/a.png`);
//! anything that already names a scheme, a protocol-relative host, or only a
//! fragment is left untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::{errors::ERR_RESOLVE, paths::SYNTHETIC_ORIGIN};

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("scheme regex compiles")
});

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{}: invalid base url '{base}': {reason}", ERR_RESOLVE)]
    InvalidBase { base: String, reason: String },
    #[error("{}: cannot resolve '{value}' against '{base}': {reason}", ERR_RESOLVE)]
    InvalidReference {
        value: String,
        base: String,
        reason: String,
    },
}

/// True when the value must pass through untouched.
pub fn is_external(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("//")
        || SCHEME_RE.is_match(trimmed)
}

fn parse_base(base_url: &str) -> Result<Url, ResolveError> {
    let invalid = |err: url::ParseError| ResolveError::InvalidBase {
        base: base_url.to_string(),
        reason: err.to_string(),
    };
    if SCHEME_RE.is_match(base_url.trim()) {
        return Url::parse(base_url.trim()).map_err(invalid);
    }
    let origin = Url::parse(SYNTHETIC_ORIGIN).map_err(invalid)?;
    origin.join(base_url.trim()).map_err(invalid)
}

fn path_query_fragment(url: &Url) -> String {
    let mut out = url.path().to_string();
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Resolve one attribute value against `base_url`.
pub fn resolve(value: &str, base_url: &str) -> Result<String, ResolveError> {
    if is_external(value) {
        return Ok(value.to_string());
    }
    let base = parse_base(base_url)?;
    let joined = base
        .join(value.trim())
        .map_err(|err| ResolveError::InvalidReference {
            value: value.to_string(),
            base: base_url.to_string(),
            reason: err.to_string(),
        })?;
    Ok(path_query_fragment(&joined))
}

/// Resolve every candidate of a `srcset` list, keeping width/density descriptors.
pub fn resolve_srcset(value: &str, base_url: &str) -> Result<String, ResolveError> {
    let mut candidates = Vec::new();
    for candidate in value.split(',') {
        let candidate = candidate.trim();
        let (url_part, descriptor) = match candidate.find(char::is_whitespace) {
            Some(idx) => (&candidate[..idx], candidate[idx..].trim()),
            None => (candidate, ""),
        };
        if url_part.is_empty() {
            continue;
        }
        let resolved = resolve(url_part, base_url)?;
        if descriptor.is_empty() {
            candidates.push(resolved);
        } else {
            candidates.push(format!("{resolved} {descriptor}"));
        }
    }
    Ok(candidates.join(", "))
}

/// Directory of an entry document; the base every asset of that load resolves against.
pub fn base_url_of(entry_point: &str) -> Result<String, ResolveError> {
    let trimmed = entry_point.trim();
    let dir = parse_base(trimmed)?
        .join("./")
        .map_err(|err| ResolveError::InvalidBase {
            base: entry_point.to_string(),
            reason: err.to_string(),
        })?;
    if SCHEME_RE.is_match(trimmed) {
        Ok(dir.to_string())
    } else {
        Ok(dir.path().to_string())
    }
}
