//! Diff source: turns git revisions into the changed paths and commit text
//! the rule engine consumes.

use crate::core::error::DocHookError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// `git hash-object -t tree /dev/null`
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
const ZERO_SHA: &str = "0000000000000000000000000000000000000000";
/// Cap on commit messages collected for a push of a brand-new branch.
const NEW_BRANCH_LOG_LIMIT: &str = "50";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub files: BTreeSet<String>,
    pub commit_message: String,
    /// Commit hash, or `manual`.
    pub triggered_by: String,
}

impl ChangeSet {
    pub fn manual(files: impl IntoIterator<Item = String>, commit_message: &str) -> Self {
        ChangeSet {
            files: files.into_iter().collect(),
            commit_message: commit_message.to_string(),
            triggered_by: "manual".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One line of pre-push stdin: `<local ref> <local sha> <remote ref> <remote sha>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRef {
    pub local_ref: String,
    pub local_sha: String,
    pub remote_ref: String,
    pub remote_sha: String,
}

impl PushRef {
    pub fn is_delete(&self) -> bool {
        is_zero(&self.local_sha)
    }

    pub fn is_new_branch(&self) -> bool {
        is_zero(&self.remote_sha)
    }
}

fn is_zero(sha: &str) -> bool {
    !sha.is_empty() && sha.chars().all(|c| c == '0')
}

pub fn parse_pre_push(input: &str) -> Vec<PushRef> {
    input
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [local_ref, local_sha, remote_ref, remote_sha] => Some(PushRef {
                    local_ref: local_ref.to_string(),
                    local_sha: local_sha.to_string(),
                    remote_ref: remote_ref.to_string(),
                    remote_sha: remote_sha.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, DocHookError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(args)
        .output()
        .map_err(|e| DocHookError::GitError(format!("failed to run git: {}", e)))?;
    if !output.status.success() {
        return Err(DocHookError::GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn lines_to_set(out: &str) -> BTreeSet<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn repo_root(start: &Path) -> Result<PathBuf, DocHookError> {
    Ok(PathBuf::from(run_git(start, &["rev-parse", "--show-toplevel"])?))
}

/// Hooks directory, honoring `core.hooksPath`.
pub fn hooks_dir(repo_root: &Path) -> Result<PathBuf, DocHookError> {
    let raw = PathBuf::from(run_git(repo_root, &["rev-parse", "--git-path", "hooks"])?);
    Ok(if raw.is_absolute() {
        raw
    } else {
        repo_root.join(raw)
    })
}

fn rev_exists(repo_root: &Path, rev: &str) -> bool {
    run_git(repo_root, &["rev-parse", "--verify", "--quiet", rev]).is_ok()
}

pub fn head_sha(repo_root: &Path) -> Result<String, DocHookError> {
    run_git(repo_root, &["rev-parse", "HEAD"])
}

/// Files touched and messages written between `base` and `head`.
pub fn changes_in_range(repo_root: &Path, base: &str, head: &str) -> Result<ChangeSet, DocHookError> {
    let files = lines_to_set(&run_git(repo_root, &["diff", "--name-only", base, head])?);
    let range = format!("{}..{}", base, head);
    let commit_message = run_git(repo_root, &["log", "--format=%B", &range])?;
    Ok(ChangeSet {
        files,
        commit_message,
        triggered_by: run_git(repo_root, &["rev-parse", head])?,
    })
}

/// The commit just made, for the post-commit hook.
pub fn head_change(repo_root: &Path) -> Result<ChangeSet, DocHookError> {
    let files = lines_to_set(&run_git(
        repo_root,
        &["diff-tree", "--no-commit-id", "--name-only", "-r", "--root", "HEAD"],
    )?);
    Ok(ChangeSet {
        files,
        commit_message: run_git(repo_root, &["log", "-1", "--format=%B", "HEAD"])?,
        triggered_by: head_sha(repo_root)?,
    })
}

/// Everything about to be pushed. New branches diff against `<remote>/HEAD`
/// when it exists, else against the empty tree.
pub fn changes_for_push(
    repo_root: &Path,
    remote: &str,
    refs: &[PushRef],
) -> Result<ChangeSet, DocHookError> {
    let mut changes = ChangeSet {
        triggered_by: "manual".to_string(),
        ..ChangeSet::default()
    };
    let mut messages = Vec::new();
    for push in refs.iter().filter(|r| !r.is_delete()) {
        let remote_head = format!("{}/HEAD", remote);
        let (base, log_args): (String, Vec<String>) = if !push.is_new_branch() {
            (
                push.remote_sha.clone(),
                vec![format!("{}..{}", push.remote_sha, push.local_sha)],
            )
        } else if rev_exists(repo_root, &remote_head) {
            (
                remote_head.clone(),
                vec![format!("{}..{}", remote_head, push.local_sha)],
            )
        } else {
            (
                EMPTY_TREE.to_string(),
                vec![
                    "-n".to_string(),
                    NEW_BRANCH_LOG_LIMIT.to_string(),
                    push.local_sha.clone(),
                ],
            )
        };
        debug!(local_ref = %push.local_ref, %base, "collecting pushed changes");
        changes.files.extend(lines_to_set(&run_git(
            repo_root,
            &["diff", "--name-only", &base, &push.local_sha],
        )?));
        let mut args = vec!["log", "--format=%B"];
        args.extend(log_args.iter().map(String::as_str));
        let msg = run_git(repo_root, &args)?;
        if !msg.is_empty() {
            messages.push(msg);
        }
        if changes.triggered_by == "manual" {
            changes.triggered_by = push.local_sha.clone();
        }
    }
    changes.commit_message = messages.join("\n\n");
    Ok(changes)
}

/// Stage `paths` and commit them with `message`.
pub fn commit_paths(repo_root: &Path, paths: &[String], message: &str) -> Result<String, DocHookError> {
    if paths.is_empty() {
        return Err(DocHookError::ValidationError("nothing to commit".into()));
    }
    let mut add = vec!["add", "--"];
    add.extend(paths.iter().map(String::as_str));
    run_git(repo_root, &add)?;
    let mut commit = vec!["commit", "-m", message, "--"];
    commit.extend(paths.iter().map(String::as_str));
    run_git(repo_root, &commit)?;
    head_sha(repo_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-q"]).unwrap();
        run_git(dir, &["config", "user.email", "dev@example.com"]).unwrap();
        run_git(dir, &["config", "user.name", "Dev"]).unwrap();
        run_git(dir, &["config", "commit.gpgsign", "false"]).unwrap();
    }

    fn commit_file(dir: &Path, path: &str, body: &str, message: &str) -> String {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, body).unwrap();
        run_git(dir, &["add", path]).unwrap();
        run_git(dir, &["commit", "-q", "-m", message]).unwrap();
        head_sha(dir).unwrap()
    }

    #[test]
    fn test_parse_pre_push_lines() {
        let input = format!(
            "refs/heads/main abc123 refs/heads/main {}\nbogus line\n",
            ZERO_SHA
        );
        let refs = parse_pre_push(&input);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].local_sha, "abc123");
        assert!(refs[0].is_new_branch());
        assert!(!refs[0].is_delete());
    }

    #[test]
    fn test_head_change_and_range() {
        if !git_available() {
            return;
        }
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        let first = commit_file(tmp.path(), "README.md", "# x\n", "initial");
        let second = commit_file(tmp.path(), "services/auth.py", "pass\n", "fix: auth bug");

        let head = head_change(tmp.path()).unwrap();
        assert_eq!(head.triggered_by, second);
        assert_eq!(
            head.files.iter().cloned().collect::<Vec<_>>(),
            vec!["services/auth.py".to_string()]
        );
        assert!(head.commit_message.contains("fix: auth bug"));

        let range = changes_in_range(tmp.path(), &first, &second).unwrap();
        assert_eq!(range.files, head.files);

        let refs = vec![PushRef {
            local_ref: "refs/heads/main".into(),
            local_sha: second.clone(),
            remote_ref: "refs/heads/main".into(),
            remote_sha: ZERO_SHA.into(),
        }];
        let pushed = changes_for_push(tmp.path(), "origin", &refs).unwrap();
        assert!(pushed.files.contains("README.md"));
        assert!(pushed.files.contains("services/auth.py"));
        assert!(pushed.commit_message.contains("initial"));
        assert_eq!(pushed.triggered_by, second);
    }
}
