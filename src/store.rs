//! Per-project persisted storage.
//!
//! Layout under the store root, one directory per project:
//!
//! ```text
//! <root>/<project>/data.bin        canonical table (bincode)
//! <root>/<project>/settings.json   designated date column + top-N columns
//! <root>/<project>/uploads.json    append-only upload ledger
//! <root>/<project>/audit.json      append-only action log (last 500 kept)
//! ```
//!
//! Each file is independently loadable. Audit-log writes are best-effort:
//! a failed append is logged and never aborts the calling operation.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{EngineError, Result},
    table::Table,
};

const TABLE_FILE: &str = "data.bin";
const SETTINGS_FILE: &str = "settings.json";
const LEDGER_FILE: &str = "uploads.json";
const AUDIT_FILE: &str = "audit.json";
const AUDIT_CAP: usize = 500;

/// One column configured for top-N dashboard display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopColumn {
    pub column: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSettings {
    #[serde(default)]
    pub date_column: String,
    #[serde(default)]
    pub top_columns: Vec<TopColumn>,
}

/// One ingestion event. `row_start` and `rows` identify the contiguous
/// canonical row range this upload contributed; undo removes exactly
/// that range and shifts later records down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: Uuid,
    pub original_name: String,
    pub uploaded_at: String,
    pub rows: usize,
    pub row_start: usize,
    #[serde(default)]
    pub mapped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: String,
    pub action: String,
    pub details: String,
}

pub fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Keep project directory names filesystem-safe. Dot-only names would
/// escape the store root, so they are rewritten.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "project".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| EngineError::storage(format!("creating store root {root:?}"), e))?;
        Ok(ProjectStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(sanitize_name(project))
    }

    fn project_file(&self, project: &str, file: &str) -> PathBuf {
        self.project_dir(project).join(file)
    }

    pub fn exists(&self, project: &str) -> bool {
        self.project_dir(project).is_dir()
    }

    pub fn ensure_project(&self, project: &str) -> Result<()> {
        if self.exists(project) {
            Ok(())
        } else {
            Err(EngineError::not_found(format!("project '{project}'")))
        }
    }

    pub fn create_project(&self, project: &str) -> Result<()> {
        let dir = self.project_dir(project);
        if dir.exists() {
            return Err(EngineError::Storage(format!(
                "project '{project}' already exists"
            )));
        }
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::storage(format!("creating project dir {dir:?}"), e))?;
        self.save_settings(project, &ProjectSettings::default())?;
        Ok(())
    }

    pub fn delete_project(&self, project: &str) -> Result<()> {
        self.ensure_project(project)?;
        let dir = self.project_dir(project);
        fs::remove_dir_all(&dir)
            .map_err(|e| EngineError::storage(format!("removing project dir {dir:?}"), e))
    }

    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut projects = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|e| EngineError::storage(format!("listing {:?}", self.root), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::storage("reading store entry", e))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                projects.push(name.to_string());
            }
        }
        projects.sort();
        Ok(projects)
    }

    // ── Canonical table ─────────────────────────────────────────────

    pub fn table_exists(&self, project: &str) -> bool {
        self.project_file(project, TABLE_FILE).is_file()
    }

    pub fn load_table(&self, project: &str) -> Result<Option<Table>> {
        let path = self.project_file(project, TABLE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .map_err(|e| EngineError::storage(format!("reading table file {path:?}"), e))?;
        let (table, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| EngineError::storage(format!("decoding table file {path:?}"), e))?;
        Ok(Some(table))
    }

    /// Written to a temp file and renamed into place so a reader never
    /// observes a torn table file.
    pub fn save_table(&self, project: &str, table: &Table) -> Result<()> {
        self.ensure_project(project)?;
        let path = self.project_file(project, TABLE_FILE);
        let bytes = bincode::serde::encode_to_vec(table, bincode::config::standard())
            .map_err(|e| EngineError::storage("encoding table", e))?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes)
            .map_err(|e| EngineError::storage(format!("writing table file {tmp:?}"), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| EngineError::storage(format!("replacing table file {path:?}"), e))
    }

    pub fn delete_table(&self, project: &str) -> Result<()> {
        let path = self.project_file(project, TABLE_FILE);
        if path.is_file() {
            fs::remove_file(&path)
                .map_err(|e| EngineError::storage(format!("removing table file {path:?}"), e))?;
        }
        Ok(())
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn load_settings(&self, project: &str) -> Result<ProjectSettings> {
        let path = self.project_file(project, SETTINGS_FILE);
        if !path.is_file() {
            return Ok(ProjectSettings::default());
        }
        let file = fs::File::open(&path)
            .map_err(|e| EngineError::storage(format!("opening settings {path:?}"), e))?;
        serde_json::from_reader(file)
            .map_err(|e| EngineError::storage(format!("parsing settings {path:?}"), e))
    }

    pub fn save_settings(&self, project: &str, settings: &ProjectSettings) -> Result<()> {
        let path = self.project_file(project, SETTINGS_FILE);
        let file = fs::File::create(&path)
            .map_err(|e| EngineError::storage(format!("creating settings {path:?}"), e))?;
        serde_json::to_writer_pretty(file, settings)
            .map_err(|e| EngineError::storage(format!("writing settings {path:?}"), e))
    }

    // ── Upload ledger ───────────────────────────────────────────────

    pub fn load_ledger(&self, project: &str) -> Result<Vec<UploadRecord>> {
        let path = self.project_file(project, LEDGER_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)
            .map_err(|e| EngineError::storage(format!("opening ledger {path:?}"), e))?;
        serde_json::from_reader(file)
            .map_err(|e| EngineError::storage(format!("parsing ledger {path:?}"), e))
    }

    pub fn save_ledger(&self, project: &str, ledger: &[UploadRecord]) -> Result<()> {
        let path = self.project_file(project, LEDGER_FILE);
        let file = fs::File::create(&path)
            .map_err(|e| EngineError::storage(format!("creating ledger {path:?}"), e))?;
        serde_json::to_writer_pretty(file, ledger)
            .map_err(|e| EngineError::storage(format!("writing ledger {path:?}"), e))
    }

    pub fn delete_ledger(&self, project: &str) -> Result<()> {
        let path = self.project_file(project, LEDGER_FILE);
        if path.is_file() {
            fs::remove_file(&path)
                .map_err(|e| EngineError::storage(format!("removing ledger {path:?}"), e))?;
        }
        Ok(())
    }

    // ── Audit log ───────────────────────────────────────────────────

    /// Losing an audit entry is strictly less bad than failing the
    /// operation that produced it, so this swallows and logs errors.
    pub fn append_audit(&self, project: &str, action: &str, details: impl Into<String>) {
        let entry = AuditEntry {
            timestamp: now_stamp(),
            action: action.to_string(),
            details: details.into(),
        };
        if let Err(e) = self.append_audit_inner(project, entry) {
            warn!("audit log write failed for project '{project}': {e}");
        }
    }

    fn append_audit_inner(&self, project: &str, entry: AuditEntry) -> Result<()> {
        let mut log = self.read_audit(project)?;
        log.push(entry);
        if log.len() > AUDIT_CAP {
            log.drain(..log.len() - AUDIT_CAP);
        }
        let path = self.project_file(project, AUDIT_FILE);
        let file = fs::File::create(&path)
            .map_err(|e| EngineError::storage(format!("creating audit log {path:?}"), e))?;
        serde_json::to_writer_pretty(file, &log)
            .map_err(|e| EngineError::storage(format!("writing audit log {path:?}"), e))
    }

    pub fn read_audit(&self, project: &str) -> Result<Vec<AuditEntry>> {
        let path = self.project_file(project, AUDIT_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)
            .map_err(|e| EngineError::storage(format!("opening audit log {path:?}"), e))?;
        serde_json::from_reader(file)
            .map_err(|e| EngineError::storage(format!("parsing audit log {path:?}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_keeps_safe_characters() {
        assert_eq!(sanitize_name("Fleet Ops 2024"), "Fleet_Ops_2024");
        assert_eq!(sanitize_name("../escape"), ".._escape");
    }
}
