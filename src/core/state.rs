//! Per-project pending-update state with an append-only history.
//!
//! One JSON file per project holds `{ pending, history }`. Every mutation is
//! a locked read-modify-write followed by an atomic replace, so concurrent
//! hook processes never lose history entries and readers never see a torn
//! file. An unreadable file is reported, treated as "nothing pending", and
//! moved aside before the next write rather than overwritten.

use crate::core::error::DocHookError;
use crate::core::fsio;
use crate::core::output;
use crate::core::rules::LayerName;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";
const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub layers: BTreeSet<LayerName>,
    pub reason: String,
    /// Commit hash, or `manual`.
    pub triggered_by: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
    pub commit_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub update: PendingUpdate,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub pending: Option<PendingUpdate>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct StateEvent<'a> {
    ts: String,
    event_id: String,
    op: &'a str,
    layers: Vec<String>,
}

/// Project listing row for `dochook projects`.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub key: String,
    pub path: PathBuf,
    pub pending: PendingUpdate,
}

pub struct StateStore {
    store: Store,
}

impl StateStore {
    pub fn new(store: Store) -> Self {
        StateStore { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state_path(&self) -> PathBuf {
        self.store.root.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.store.root.join(LOCK_FILE)
    }

    /// Parse the state file. `Err(StateCorrupt)` means the file exists but is unreadable.
    fn read_strict(&self) -> Result<ProjectState, DocHookError> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProjectState::default());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Err(DocHookError::StateCorrupt {
                path,
                reason: "empty file".to_string(),
            });
        }
        serde_json::from_str(&raw).map_err(|e| DocHookError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Read for display: corruption is logged and treated as empty state.
    fn read_lenient(&self) -> Result<ProjectState, DocHookError> {
        match self.read_strict() {
            Err(DocHookError::StateCorrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "state file unreadable; treating as no pending update");
                Ok(ProjectState::default())
            }
            other => other,
        }
    }

    /// Surface corruption to callers that want to report it.
    pub fn health(&self) -> Result<(), DocHookError> {
        self.read_strict().map(|_| ())
    }

    /// Locked read-modify-write. A corrupt file is quarantined, then the
    /// mutation proceeds from empty state.
    fn mutate<F, R>(&self, op: &str, f: F) -> Result<R, DocHookError>
    where
        F: FnOnce(&mut ProjectState) -> R,
    {
        fsio::with_lock(&self.lock_path(), || {
            let mut state = match self.read_strict() {
                Ok(state) => state,
                Err(DocHookError::StateCorrupt { path, reason }) => {
                    let aside = quarantine(&path)?;
                    warn!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        %reason,
                        "corrupt state file preserved; starting fresh"
                    );
                    ProjectState::default()
                }
                Err(e) => return Err(e),
            };
            let out = f(&mut state);
            fsio::write_json_atomic(&self.state_path(), &state)?;
            let layers = state
                .pending
                .as_ref()
                .map(|p| p.layers.iter().cloned().collect())
                .unwrap_or_default();
            self.log_event(op, layers);
            Ok(out)
        })
    }

    /// The state file is already replaced when this runs, so a failed audit
    /// append is logged rather than reported as a failed mutation.
    fn log_event(&self, op: &str, layers: Vec<String>) {
        let ev = StateEvent {
            ts: time::now().to_rfc3339(),
            event_id: time::new_id(),
            op,
            layers,
        };
        if let Err(e) = fsio::append_line(&self.store.root.join(EVENTS_FILE), &ev) {
            warn!(op, error = %e, "failed to append state audit event");
        }
    }

    /// Record a pending update. Layers accumulate as a union with any update
    /// already pending; every other field takes this call's value.
    pub fn set_pending(
        &self,
        layers: &BTreeSet<LayerName>,
        reason: &str,
        triggered_by: &str,
        files: &[String],
        commit_message: &str,
    ) -> Result<PendingUpdate, DocHookError> {
        let update = self.mutate("state.set_pending", |state| {
            let mut merged = layers.clone();
            if let Some(existing) = &state.pending {
                merged.extend(existing.layers.iter().cloned());
            }
            let update = PendingUpdate {
                layers: merged,
                reason: reason.to_string(),
                triggered_by: triggered_by.to_string(),
                timestamp: time::now(),
                files: files.to_vec(),
                commit_message: commit_message.to_string(),
            };
            state.pending = Some(update.clone());
            update
        })?;
        debug!(
            project = self.store.project_key().unwrap_or_default(),
            layers = ?update.layers,
            "pending update recorded"
        );
        Ok(update)
    }

    pub fn get_pending(&self) -> Result<Option<PendingUpdate>, DocHookError> {
        Ok(self.read_lenient()?.pending)
    }

    pub fn is_pending(&self) -> Result<bool, DocHookError> {
        Ok(self.get_pending()?.is_some())
    }

    /// Move the pending update (if any) onto the end of history.
    pub fn clear_pending(&self) -> Result<Option<PendingUpdate>, DocHookError> {
        if !self.is_pending()? {
            return Ok(None);
        }
        self.mutate("state.clear_pending", |state| {
            let cleared = state.pending.take();
            if let Some(update) = &cleared {
                state.history.push(HistoryEntry {
                    update: update.clone(),
                    completed_at: time::now(),
                });
            }
            cleared
        })
    }

    /// Drop finished layers from the pending update. When none remain the
    /// update is cleared into history. Returns what is still pending.
    pub fn resolve_layers(
        &self,
        done: &BTreeSet<LayerName>,
    ) -> Result<Option<PendingUpdate>, DocHookError> {
        if done.is_empty() || !self.is_pending()? {
            return self.get_pending();
        }
        self.mutate("state.resolve_layers", |state| {
            let Some(mut update) = state.pending.take() else {
                return None;
            };
            update.layers.retain(|l| !done.contains(l));
            if update.layers.is_empty() {
                state.history.push(HistoryEntry {
                    update,
                    completed_at: time::now(),
                });
                None
            } else {
                state.pending = Some(update.clone());
                Some(update)
            }
        })
    }

    /// Full history, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, DocHookError> {
        Ok(self.read_lenient()?.history)
    }

    /// Most recent `limit` history entries, newest first.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, DocHookError> {
        Ok(self.history()?.into_iter().rev().take(limit).collect())
    }

    pub fn summary(&self) -> Result<String, DocHookError> {
        let Some(pending) = self.get_pending()? else {
            return Ok("No pending updates".to_string());
        };
        Ok(render_summary(&pending))
    }
}

pub fn render_summary(pending: &PendingUpdate) -> String {
    let mut lines = vec![
        format!(
            "Pending update (since {}):",
            pending.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!(
            "  Layers: {}",
            output::join_layers(&pending.layers, ", ")
        ),
        format!("  Reason: {}", pending.reason),
        format!("  Triggered by: {}", pending.triggered_by),
        format!("  Files: {}", pending.files.len()),
    ];
    if !pending.commit_message.is_empty() {
        lines.push(format!(
            "  Commit: {}",
            output::compact_line(&pending.commit_message, 60)
        ));
    }
    lines.join("\n")
}

fn quarantine(path: &Path) -> Result<PathBuf, DocHookError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| STATE_FILE.to_string());
    let aside = path.with_file_name(format!("{}.corrupt-{}", name, time::new_id()));
    fs::rename(path, &aside)?;
    Ok(aside)
}

/// Every project under `state_root` that currently has a pending update.
pub fn list_projects(state_root: &Path) -> Result<Vec<ProjectSummary>, DocHookError> {
    let projects_dir = state_root.join("projects");
    if !projects_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&projects_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let key = entry.file_name().to_string_lossy().to_string();
        let state = StateStore::new(Store::project(state_root, &key));
        if let Some(pending) = state.get_pending()? {
            out.push(ProjectSummary {
                key,
                path: entry.path(),
                pending,
            });
        }
    }
    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}
