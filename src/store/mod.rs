//! Per-tenant flat key/value persistence.
//!
//! One JSON file per tenant under the data directory; writes are synchronous
//! and best-effort (a failed flush is logged, the in-memory state stands).
//! Tests use the memory-only mode.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Factory for tenant-scoped stores, rooted at one data directory.
#[derive(Debug, Clone)]
pub struct StoreBackend {
    dir: Option<PathBuf>,
}

impl StoreBackend {
    /// File-backed stores under `dir` (created if absent).
    pub fn file(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        Ok(Self { dir: Some(dir) })
    }

    /// Memory-only stores; nothing survives the process.
    pub fn memory() -> Self {
        Self { dir: None }
    }

    /// Open the store for one tenant, loading any persisted entries.
    pub fn open(&self, app_id: &str) -> TenantStore {
        let path = self.dir.as_ref().map(|d| d.join(format!("{app_id}.json")));

        let entries = match &path {
            Some(p) if p.exists() => match load_entries(p) {
                Ok(map) => map,
                Err(err) => {
                    warn!(app_id, path = %p.display(), %err, "unreadable store file, starting empty");
                    HashMap::new()
                }
            },
            _ => HashMap::new(),
        };

        TenantStore {
            app_id: app_id.to_owned(),
            path,
            entries: Arc::new(Mutex::new(entries)),
            disk: Arc::new(Mutex::new(())),
        }
    }

    /// Tenant ids with a persisted store file, for startup recovery.
    pub fn list(&self) -> Vec<String> {
        let dir = match &self.dir {
            Some(dir) => dir,
            None => return Vec::new(),
        };

        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot scan data directory");
                return Vec::new();
            }
        };

        let mut ids: Vec<String> = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        ids
    }
}

fn load_entries(path: &PathBuf) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Flat string key/value store scoped to one tenant.
#[derive(Debug, Clone)]
pub struct TenantStore {
    app_id: String,
    path: Option<PathBuf>,
    entries: Arc<Mutex<HashMap<String, String>>>,
    disk: Arc<Mutex<()>>,
}

impl TenantStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }

    /// Upsert one pair and flush. A flush failure is logged and swallowed;
    /// the in-memory value is kept either way.
    ///
    /// The snapshot is taken under the entries lock but written under the
    /// disk lock, so readers never wait on the filesystem. Taking the disk
    /// lock before releasing the entries lock keeps flushes in insertion
    /// order.
    pub fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.insert(key.to_owned(), value.to_owned());

        let path = match &self.path {
            Some(path) => path,
            None => return,
        };

        let raw = match serde_json::to_string_pretty(&*entries) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(app_id = %self.app_id, key, %err, "encoding store file failed");
                return;
            }
        };

        let _disk = self.disk.lock().expect("store lock poisoned");
        drop(entries);

        if let Err(err) = fs::write(path, raw) {
            warn!(app_id = %self.app_id, key, %err, "persisting store entry failed");
        } else {
            debug!(app_id = %self.app_id, key, "store entry persisted");
        }
    }
}

/// De-duplicate a comma-joined list, keeping first-seen order.
pub fn distinct_join(list: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for item in list.split(',') {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen.join(",")
}
