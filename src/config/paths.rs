//! Path and URL configuration

/// Mount prefix under which mini-app files are served.
pub const DEFAULT_MOUNT_PREFIX: &str = "/projects/";

/// File names
pub const DEFAULT_ENTRY_FILE: &str = "index.html";
pub const CATALOG_FILE: &str = "manifest.json";
pub const MINIAPP_META_FILE: &str = "miniapp.json";

/// Origin used to anchor origin-relative base paths during resolution.
/// It never leaves the resolver: results are re-serialized as path+query+fragment.
pub const SYNTHETIC_ORIGIN: &str = "http://miniapp.invalid/";

/// Default origin for the HTTP fetcher.
pub const DEFAULT_HTTP_ORIGIN: &str = "http://127.0.0.1:5173/";
