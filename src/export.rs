//! Derived-export cache.
//!
//! Exports (workbook/CSV byte buffers) are computed lazily on first
//! request and cached by content identity: a digest over the project's
//! ledger state and the export parameters. A mutation changes the
//! ledger, so stale entries can never be served; the engine also drops
//! a project's entries on mutation to bound memory. Nothing is
//! pre-generated in the background.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Content-identity digest over the ordered parts.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Default)]
pub struct ExportCache {
    entries: RwLock<HashMap<(String, String), Arc<Vec<u8>>>>,
}

impl ExportCache {
    pub fn new() -> Self {
        ExportCache::default()
    }

    /// Return the cached bytes for (project, digest), computing and
    /// storing them on first request.
    pub fn get_or_build<F>(&self, project: &str, digest: &str, build: F) -> Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        {
            let entries = self.entries.read().expect("export cache lock poisoned");
            if let Some(bytes) = entries.get(&(project.to_string(), digest.to_string())) {
                return Ok(Arc::clone(bytes));
            }
        }
        let bytes = Arc::new(build()?);
        let mut entries = self.entries.write().expect("export cache lock poisoned");
        entries.insert(
            (project.to_string(), digest.to_string()),
            Arc::clone(&bytes),
        );
        Ok(bytes)
    }

    /// Drop every cached export for a project (called after mutations).
    pub fn invalidate_project(&self, project: &str) {
        let mut entries = self.entries.write().expect("export cache lock poisoned");
        entries.retain(|(p, _), _| p != project);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("export cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
