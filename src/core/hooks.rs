//! Git hook scripts that call back into the `dochook` binary.

use crate::core::error::DocHookError;
use crate::core::git;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const MARKER: &str = "# installed by dochook";

pub const HOOKS: [&str; 2] = ["pre-push", "post-commit"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Installed(PathBuf),
    Removed(PathBuf),
    /// A hook we did not write is in the way.
    SkippedForeign(PathBuf),
    Absent(PathBuf),
}

pub fn hook_script(hook: &str, command: &str) -> String {
    let args = if hook == "pre-push" { " \"$@\"" } else { "" };
    format!(
        "#!/bin/sh\n{}\n# Checks whether this change obliges documentation updates.\nexec \"{}\" hook {}{}\n",
        MARKER, command, hook, args
    )
}

fn is_ours(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|s| s.contains(MARKER))
        .unwrap_or(false)
}

/// Path of the running binary, falling back to `dochook` on `PATH`.
pub fn self_command() -> String {
    std::env::current_exe()
        .ok()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "dochook".to_string())
}

pub fn install(repo_root: &Path, command: &str, force: bool) -> Result<Vec<HookOutcome>, DocHookError> {
    install_into(&git::hooks_dir(repo_root)?, command, force)
}

pub fn install_into(hooks_dir: &Path, command: &str, force: bool) -> Result<Vec<HookOutcome>, DocHookError> {
    fs::create_dir_all(hooks_dir)?;
    let mut outcomes = Vec::new();
    for hook in HOOKS {
        let path = hooks_dir.join(hook);
        if path.exists() && !force && !is_ours(&path) {
            outcomes.push(HookOutcome::SkippedForeign(path));
            continue;
        }
        fs::write(&path, hook_script(hook, command))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
        }
        info!(hook, path = %path.display(), "hook installed");
        outcomes.push(HookOutcome::Installed(path));
    }
    Ok(outcomes)
}

pub fn uninstall(repo_root: &Path) -> Result<Vec<HookOutcome>, DocHookError> {
    uninstall_from(&git::hooks_dir(repo_root)?)
}

/// Remove only hooks carrying our marker.
pub fn uninstall_from(hooks_dir: &Path) -> Result<Vec<HookOutcome>, DocHookError> {
    let mut outcomes = Vec::new();
    for hook in HOOKS {
        let path = hooks_dir.join(hook);
        if !path.exists() {
            outcomes.push(HookOutcome::Absent(path));
        } else if is_ours(&path) {
            fs::remove_file(&path)?;
            outcomes.push(HookOutcome::Removed(path));
        } else {
            outcomes.push(HookOutcome::SkippedForeign(path));
        }
    }
    Ok(outcomes)
}
