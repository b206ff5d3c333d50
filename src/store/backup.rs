use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::model::{display_timestamp, HistoryItem, Project};

use super::HistoryStore;

pub const BACKUP_VERSION: u64 = 1;

/// Version tag embedded in export files. Written as a number; documents
/// carrying a string version (or none at all) are still accepted on
/// import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackupVersion {
    Number(serde_json::Number),
    Text(String),
}

impl Default for BackupVersion {
    fn default() -> Self {
        BackupVersion::Number(BACKUP_VERSION.into())
    }
}

/// Self-contained snapshot of everything the store owns. Written as a
/// single JSON document so a backup survives independently of the
/// database file and its schema. Only `history` and `projects` are
/// required on import; everything else defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub history: Vec<HistoryItem>,
    pub projects: Vec<Project>,
    #[serde(default)]
    pub global_tags: IndexSet<String>,
    #[serde(default)]
    pub version: BackupVersion,
    #[serde(default)]
    pub date: String,
}

/// Why an import was refused. A refused import leaves the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("backup is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("backup field '{0}' must be an array")]
    NotAnArray(&'static str),
}

impl HistoryStore {
    pub fn export_backup(&self) -> BackupDocument {
        BackupDocument {
            history: self.history.clone(),
            projects: self.projects.clone(),
            global_tags: self.global_tags.clone(),
            version: BackupVersion::default(),
            date: display_timestamp(),
        }
    }

    pub fn export_backup_to_path(&self, path: &Path) -> Result<()> {
        let document = self.export_backup();
        let raw = serde_json::to_string_pretty(&document).context("serialising backup")?;
        fs::write(path, raw).with_context(|| format!("writing backup {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            items = document.history.len(),
            projects = document.projects.len(),
            "backup exported"
        );
        Ok(())
    }

    /// Replace the entire store state with a backup document. Validation
    /// happens before any field is touched: either every section is
    /// swapped in, or nothing changes.
    pub fn import_backup(&mut self, raw: &str) -> Result<BackupDocument, BackupError> {
        let document = parse_backup(raw)?;

        self.history = document.history.clone();
        self.history.truncate(self.max_items);
        self.projects = document.projects.clone();
        if self.projects.is_empty() {
            self.projects.push(Project::new(super::DEFAULT_PROJECT_NAME));
        }
        self.global_tags = document.global_tags.clone();

        self.schedule_history();
        self.schedule_projects();
        self.schedule_tags();
        Ok(document)
    }

    pub fn import_backup_from_path(&mut self, path: &Path) -> Result<BackupDocument> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading backup {}", path.display()))?;
        let document = self
            .import_backup(&raw)
            .with_context(|| format!("importing backup {}", path.display()))?;
        Ok(document)
    }
}

/// Validate the document shape before deserialising it. `history` and
/// `projects` must be present and array-typed; other fields are tolerated
/// loosely so older backups stay importable.
fn parse_backup(raw: &str) -> Result<BackupDocument, BackupError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    for field in ["history", "projects"] {
        match value.get(field) {
            None => return Err(BackupError::MissingField(field)),
            Some(section) if !section.is_array() => {
                return Err(BackupError::NotAnArray(field));
            }
            Some(_) => {}
        }
    }
    Ok(serde_json::from_value(value)?)
}
