//! Mini-app catalog: the manifest a host browses and selects from.

use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::{
    config::{
        errors::{ERR_CATALOG_IO, ERR_CATALOG_PARSE},
        paths::{DEFAULT_ENTRY_FILE, DEFAULT_MOUNT_PREFIX, MINIAPP_META_FILE},
    },
    core::LOG_TARGET,
    loader::MiniAppDescriptor,
    resolver::is_external,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogEntry {
    pub slug: String,
    pub name: String,
    pub summary: String,
    pub agents: Vec<String>,
    pub entry_point: String,
    pub status: String,
    pub tags: Vec<String>,
    /// Entries without an order sort after every ordered entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

impl CatalogEntry {
    pub fn descriptor(&self) -> MiniAppDescriptor {
        MiniAppDescriptor::new(self.slug.clone(), self.entry_point.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{}: malformed catalog: {0}", ERR_CATALOG_PARSE)]
    Parse(#[from] serde_json::Error),
    #[error("{}: reading '{}' failed: {source}", ERR_CATALOG_IO, .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Wrapped { projects: Vec<CatalogEntry> },
    Bare(Vec<CatalogEntry>),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse a manifest; `base_path` scopes default entry points (`{base}{slug}/index.html`).
    pub fn from_json(text: &str, base_path: &str) -> Result<Self, CatalogError> {
        let entries = match serde_json::from_str::<Manifest>(text)? {
            Manifest::Wrapped { projects } => projects,
            Manifest::Bare(entries) => entries,
        };
        Ok(Self::from_entries(entries, base_path))
    }

    /// Read a manifest file, using the default mount prefix as base path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, DEFAULT_MOUNT_PREFIX)
    }

    /// Build a catalog from a directory holding one folder per mini-app.
    ///
    /// A folder counts when it has an `index.html`; an optional
    /// `miniapp.json` supplies the remaining fields.
    pub fn discover(dir: impl AsRef<Path>, base_path: &str) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CatalogError::Io {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        let base = normalize_base(base_path);
        let mut entries = Vec::new();
        for item in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .flatten()
        {
            if !item.file_type().is_dir() {
                continue;
            }
            let folder = item.file_name().to_string_lossy().into_owned();
            if folder.starts_with('.') || !item.path().join(DEFAULT_ENTRY_FILE).is_file() {
                continue;
            }
            let meta_path = item.path().join(MINIAPP_META_FILE);
            let mut entry = if meta_path.is_file() {
                let text = fs::read_to_string(&meta_path).map_err(|source| CatalogError::Io {
                    path: meta_path.clone(),
                    source,
                })?;
                match serde_json::from_str::<CatalogEntry>(&text) {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            code = ERR_CATALOG_PARSE,
                            path = %meta_path.display(),
                            error = %err,
                            "ignoring malformed mini-app metadata"
                        );
                        CatalogEntry::default()
                    }
                }
            } else {
                CatalogEntry::default()
            };
            if entry.slug.trim().is_empty() {
                entry.slug = folder.clone();
            }
            let entry_point = entry.entry_point.trim();
            entry.entry_point = if entry_point.is_empty() {
                format!("{base}{folder}/{DEFAULT_ENTRY_FILE}")
            } else if entry_point.starts_with('/') || is_external(entry_point) {
                entry_point.to_string()
            } else {
                format!("{base}{folder}/{entry_point}")
            };
            entries.push(entry);
        }
        Ok(Self::from_entries(entries, &base))
    }

    fn from_entries(entries: Vec<CatalogEntry>, base_path: &str) -> Self {
        let base = normalize_base(base_path);
        let mut entries: Vec<CatalogEntry> = entries
            .into_iter()
            .filter_map(|entry| fill_defaults(entry, &base))
            .collect();
        entries.sort_by(compare_entries);
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slug: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.slug == slug)
    }

    pub fn descriptor(&self, slug: &str) -> Option<MiniAppDescriptor> {
        self.get(slug).map(CatalogEntry::descriptor)
    }
}

fn normalize_base(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Name of the directory holding `entry_point`'s file.
fn slug_from_entry(entry_point: &str) -> Option<String> {
    let path = entry_point.split(['?', '#']).next().unwrap_or_default();
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop()?;
    segments.pop().map(str::to_string)
}

fn fill_defaults(mut entry: CatalogEntry, base: &str) -> Option<CatalogEntry> {
    entry.slug = entry.slug.trim().to_string();
    entry.entry_point = entry.entry_point.trim().to_string();
    if entry.slug.is_empty() {
        entry.slug = slug_from_entry(&entry.entry_point).unwrap_or_default();
    }
    if entry.slug.is_empty() {
        tracing::warn!(
            target: LOG_TARGET,
            code = ERR_CATALOG_PARSE,
            entry_point = %entry.entry_point,
            "dropping catalog entry without a slug"
        );
        return None;
    }
    if entry.entry_point.is_empty() {
        entry.entry_point = format!("{base}{}/{DEFAULT_ENTRY_FILE}", entry.slug);
    }
    if entry.name.trim().is_empty() {
        entry.name = entry.slug.clone();
    }
    Some(entry)
}

fn compare_entries(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    let by_order = match (a.order, b.order) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_order.then_with(|| a.name.cmp(&b.name))
}
