//! Store abstraction for dochook's on-disk state.
//!
//! Two store kinds live under one state root (default `~/.dochook/`):
//! a per-project store holding the pending update and its history, and a
//! host store holding the knowledge sync queue shared by every project.

use crate::core::error::DocHookError;
use std::path::{Path, PathBuf};

/// Store type discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Project store: `<state_root>/projects/<project_key>/`
    Project(String),
    /// Host store: `<state_root>/`
    Host,
}

/// Store handle representing one state directory.
#[derive(Debug, Clone)]
pub struct Store {
    pub kind: StoreKind,
    /// Absolute path to the store directory
    pub root: PathBuf,
}

impl Store {
    pub fn project(state_root: &Path, project_key: &str) -> Self {
        let key = sanitize_key(project_key);
        Store {
            root: state_root.join("projects").join(&key),
            kind: StoreKind::Project(key),
        }
    }

    pub fn host(state_root: &Path) -> Self {
        Store {
            kind: StoreKind::Host,
            root: state_root.to_path_buf(),
        }
    }

    pub fn project_key(&self) -> Option<&str> {
        match &self.kind {
            StoreKind::Project(key) => Some(key),
            StoreKind::Host => None,
        }
    }
}

/// Resolve the state root: `DOCHOOK_HOME` wins, then the configured dir with
/// `~` expanded from `HOME`.
pub fn resolve_state_root(configured: &str) -> Result<PathBuf, DocHookError> {
    if let Ok(home) = std::env::var("DOCHOOK_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    expand_home(configured)
}

pub fn expand_home(raw: &str) -> Result<PathBuf, DocHookError> {
    if raw == "~" {
        return Ok(PathBuf::from(std::env::var("HOME")?));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return Ok(PathBuf::from(std::env::var("HOME")?).join(rest));
    }
    Ok(PathBuf::from(raw))
}

/// Project keys become directory names; keep them to a portable alphabet.
pub fn sanitize_key(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
