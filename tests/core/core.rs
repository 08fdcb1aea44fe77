use dochook::core::config::{self, Config};
use dochook::core::git::{self, PushRef};
use dochook::core::hooks::{self, HookOutcome};
use dochook::core::orchestrator::{ApplyOptions, Orchestrator};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn init_repo(dir: &Path) {
    git::run_git(dir, &["init", "-q"]).unwrap();
    git::run_git(dir, &["config", "user.email", "dev@example.com"]).unwrap();
    git::run_git(dir, &["config", "user.name", "Dev"]).unwrap();
    git::run_git(dir, &["config", "commit.gpgsign", "false"]).unwrap();
}

fn commit_all(dir: &Path, message: &str) -> String {
    git::run_git(dir, &["add", "-A"]).unwrap();
    git::run_git(dir, &["commit", "-q", "-m", message]).unwrap();
    git::head_sha(dir).unwrap()
}

#[test]
fn commit_to_documented_commit_round_trip() {
    if !git_available() {
        return;
    }
    let repo = tempdir().unwrap();
    let state_root = tempdir().unwrap();
    init_repo(repo.path());
    fs::write(
        repo.path().join(config::CONFIG_FILE),
        "[state]\nproject_key = \"shop\"\n\n[updaters]\nbackup = false\n",
    )
    .unwrap();
    fs::write(repo.path().join("README.md"), "# Shop\n\n## Services\n").unwrap();
    commit_all(repo.path(), "initial");

    fs::create_dir_all(repo.path().join("services")).unwrap();
    fs::write(repo.path().join("services/payments.py"), "def charge():\n    pass\n").unwrap();
    let sha = commit_all(repo.path(), "add payments service");

    let config = Config::load(repo.path()).unwrap();
    let orch = Orchestrator::new(config, repo.path(), state_root.path(), None);
    let changes = git::head_change(repo.path()).unwrap();
    assert_eq!(changes.triggered_by, sha);
    assert!(changes.files.contains("services/payments.py"));

    let checked = orch.check(&changes).unwrap();
    assert!(checked.pending.is_some());

    let report = orch
        .apply(
            &BTreeSet::new(),
            ApplyOptions {
                dry_run: false,
                commit: true,
            },
        )
        .unwrap();
    assert!(report.commit_error.is_none(), "{:?}", report.commit_error);
    let doc_commit = report.commit.unwrap();
    assert_ne!(doc_commit, sha);

    let message = git::run_git(repo.path(), &["log", "-1", "--format=%s"]).unwrap();
    assert!(message.starts_with("docs(auto): update config,traditional"));
    let readme = fs::read_to_string(repo.path().join("README.md")).unwrap();
    assert!(readme.contains("| payments.py | services/payments.py | Service |"));
    let status = git::run_git(repo.path(), &["status", "--porcelain"]).unwrap();
    assert!(status.is_empty(), "uncommitted: {}", status);
}

#[test]
fn push_range_collects_every_pushed_commit() {
    if !git_available() {
        return;
    }
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    fs::write(repo.path().join("a.py"), "a = 1\n").unwrap();
    let base = commit_all(repo.path(), "first");
    fs::write(repo.path().join("b.py"), "b = 1\n").unwrap();
    commit_all(repo.path(), "fix: second");
    fs::write(repo.path().join("c.py"), "c = 1\n").unwrap();
    let head = commit_all(repo.path(), "third");

    let refs = vec![PushRef {
        local_ref: "refs/heads/main".to_string(),
        local_sha: head.clone(),
        remote_ref: "refs/heads/main".to_string(),
        remote_sha: base,
    }];
    let changes = git::changes_for_push(repo.path(), "origin", &refs).unwrap();
    let files: Vec<&str> = changes.files.iter().map(String::as_str).collect();
    assert_eq!(files, vec!["b.py", "c.py"]);
    assert!(changes.commit_message.contains("fix: second"));
    assert!(changes.commit_message.contains("third"));
    assert_eq!(changes.triggered_by, head);
}

#[test]
fn hooks_install_into_a_real_repository_and_respect_foreign_hooks() {
    if !git_available() {
        return;
    }
    let repo = tempdir().unwrap();
    init_repo(repo.path());
    let dir = git::hooks_dir(repo.path()).unwrap();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("post-commit"), "#!/bin/sh\necho mine\n").unwrap();

    let outcomes = hooks::install(repo.path(), "/usr/local/bin/dochook", false).unwrap();
    assert!(outcomes.contains(&HookOutcome::Installed(dir.join("pre-push"))));
    assert!(outcomes.contains(&HookOutcome::SkippedForeign(dir.join("post-commit"))));
    let script = fs::read_to_string(dir.join("pre-push")).unwrap();
    assert!(script.contains("exec \"/usr/local/bin/dochook\" hook pre-push \"$@\""));

    let removed = hooks::uninstall(repo.path()).unwrap();
    assert!(removed.contains(&HookOutcome::Removed(dir.join("pre-push"))));
    assert_eq!(
        fs::read_to_string(dir.join("post-commit")).unwrap(),
        "#!/bin/sh\necho mine\n"
    );
}
