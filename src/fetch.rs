//! Asset fetchers: the seam through which the loader reads entry documents
//! and external scripts.
//!
//! Non-success statuses are ordinary responses; only failures to produce a
//! response at all are `FetchError`s. The loader decides what a status means.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use percent_encoding::percent_decode_str;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use tokio::sync::watch;
use url::Url;

use crate::{
    config::{
        errors::{ERR_FETCH_BAD_URL, ERR_FETCH_FORBIDDEN_PATH, ERR_FETCH_TRANSPORT},
        paths::DEFAULT_MOUNT_PREFIX,
    },
    core::{SandboxConfig, LOG_TARGET},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Default,
    /// Bypass any intermediate cache; entry documents always load fresh.
    NoCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{}: invalid url '{url}': {reason}", ERR_FETCH_BAD_URL)]
    BadUrl { url: String, reason: String },
    #[error("{}: request to '{url}' failed: {reason}", ERR_FETCH_TRANSPORT)]
    Transport { url: String, reason: String },
    #[error("{}: reading '{}' failed: {source}", ERR_FETCH_TRANSPORT, .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: http client setup failed: {0}", ERR_FETCH_TRANSPORT)]
    Client(String),
}

/// Read raw files by URL.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchResponse, FetchError>;
}

/// Run `fetch` unless the load's cancellation signal fires first.
///
/// Returns `None` when cancelled; the in-flight request future is dropped.
pub async fn fetch_or_cancel(
    fetcher: &dyn AssetFetcher,
    url: &str,
    mode: FetchMode,
    cancel: &mut watch::Receiver<bool>,
) -> Option<Result<FetchResponse, FetchError>> {
    if *cancel.borrow() {
        return None;
    }
    let cancelled = async {
        // A dropped sender never cancels.
        if cancel.wait_for(|flag| *flag).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        biased;
        _ = cancelled => None,
        result = fetcher.fetch(url, mode) => Some(result),
    }
}

/// Origin-relative path of `url` without query or fragment.
///
/// `None` for absolute and protocol-relative URLs: local fetchers only serve
/// their own mount and never rebase another host's path onto it.
fn local_path(url: &str) -> Option<&str> {
    let trimmed = url.trim();
    if trimmed.starts_with("//") || Url::parse(trimmed).is_ok() {
        return None;
    }
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    Some(&trimmed[..end])
}

// ----------------------------------------------------------------------------
// HTTP
// ----------------------------------------------------------------------------

/// reqwest-backed fetcher. Origin-relative URLs are joined to `origin`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(config: &SandboxConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        let origin = Url::parse(&config.http_origin).map_err(|err| FetchError::BadUrl {
            url: config.http_origin.clone(),
            reason: err.to_string(),
        })?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn absolute(&self, url: &str) -> Result<Url, FetchError> {
        let bad = |err: url::ParseError| FetchError::BadUrl {
            url: url.to_string(),
            reason: err.to_string(),
        };
        match Url::parse(url) {
            Ok(parsed) => Ok(parsed),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.origin.join(url).map_err(bad),
            Err(err) => Err(bad(err)),
        }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let target = self.absolute(url)?;
        let mut request = self.client.get(target.clone());
        if mode == FetchMode::NoCache {
            request = request
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: target.to_string(),
            reason: err.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        tracing::debug!(target: LOG_TARGET, url = %target, status, bytes = body.len(), "fetched");
        Ok(FetchResponse { status, body })
    }
}

// ----------------------------------------------------------------------------
// Static directory
// ----------------------------------------------------------------------------

/// Serves files under `mount_prefix` from `root` by exact relative path.
///
/// Unknown paths and directories answer 404; anything resolving outside the
/// directory (parent segments, paths outside the prefix, symlink escapes)
/// answers 403.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
    mount_prefix: String,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_prefix(root, DEFAULT_MOUNT_PREFIX)
    }

    pub fn with_prefix(root: impl Into<PathBuf>, mount_prefix: &str) -> Self {
        let mut mount_prefix = mount_prefix.trim().to_string();
        if !mount_prefix.starts_with('/') {
            mount_prefix.insert(0, '/');
        }
        if !mount_prefix.ends_with('/') {
            mount_prefix.push('/');
        }
        Self {
            root: root.into(),
            mount_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount_prefix(&self) -> &str {
        &self.mount_prefix
    }

    /// Relative file path for `path`, or `None` when it escapes the mount.
    ///
    /// Segments are percent-decoded before they are checked, so `%2e%2e`
    /// and an encoded separator are rejected like their literal forms.
    fn relative(&self, path: &str) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.mount_prefix)?;
        let mut relative = PathBuf::new();
        for raw in rest.split('/') {
            let segment = percent_decode_str(raw).decode_utf8().ok()?;
            match segment.as_ref() {
                "" | "." => continue,
                ".." => return None,
                s if s.contains(['/', '\\', ':', '\0']) => return None,
                s => relative.push(s),
            }
        }
        Some(relative)
    }

    fn forbidden(&self, url: &str) -> FetchResponse {
        tracing::warn!(
            target: LOG_TARGET,
            code = ERR_FETCH_FORBIDDEN_PATH,
            url,
            "rejected path outside the mount"
        );
        FetchResponse::status(403)
    }
}

#[async_trait]
impl AssetFetcher for DirectoryFetcher {
    async fn fetch(&self, url: &str, _mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let Some(path) = local_path(url) else {
            tracing::debug!(target: LOG_TARGET, url, "absolute url is not served from a directory");
            return Ok(FetchResponse::status(404));
        };
        let Some(relative) = self.relative(path) else {
            return Ok(self.forbidden(url));
        };
        let candidate = self.root.join(&relative);
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(p) => p,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FetchResponse::status(404))
            }
            Err(source) => {
                return Err(FetchError::Io {
                    path: candidate,
                    source,
                })
            }
        };
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|source| FetchError::Io {
                path: self.root.clone(),
                source,
            })?;
        if !resolved.starts_with(&root) {
            return Ok(self.forbidden(url));
        }
        if resolved.is_dir() {
            return Ok(FetchResponse::status(404));
        }
        let body = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|source| FetchError::Io {
                path: resolved.clone(),
                source,
            })?;
        Ok(FetchResponse::ok(body))
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// Bundled mini-apps keyed by path. Records every request it receives.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: RwLock<HashMap<String, FetchResponse>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, body: impl Into<String>) -> Self {
        self.insert(path, body);
        self
    }

    pub fn insert(&self, path: &str, body: impl Into<String>) {
        self.files
            .write()
            .insert(path.to_string(), FetchResponse::ok(body));
    }

    /// Answer `path` with a fixed status and empty body.
    pub fn insert_status(&self, path: &str, status: u16) {
        self.files
            .write()
            .insert(path.to_string(), FetchResponse::status(status));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, _mode: FetchMode) -> Result<FetchResponse, FetchError> {
        let Some(path) = local_path(url) else {
            self.requests.lock().push(url.trim().to_string());
            return Ok(FetchResponse::status(404));
        };
        self.requests.lock().push(path.to_string());
        Ok(self
            .files
            .read()
            .get(path)
            .cloned()
            .unwrap_or_else(|| FetchResponse::status(404)))
    }
}
