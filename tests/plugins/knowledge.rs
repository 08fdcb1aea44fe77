use dochook::core::config::Config;
use dochook::core::git::ChangeSet;
use dochook::core::orchestrator::{ApplyOptions, Orchestrator};
use dochook::core::store::Store;
use dochook::core::sync::SyncQueue;
use dochook::plugins::knowledge::{Keywords, KnowledgeRecord, RecordKind};
use std::collections::BTreeSet;
use std::fs;
use tempfile::tempdir;

const KNOWLEDGE_ON: &str = "\
[state]
project_key = \"shop\"

[knowledge]
enabled = true

[updaters]
backup = false
";

#[test]
fn troubleshooting_commit_queues_a_record_through_the_update_flow() {
    let repo = tempdir().unwrap();
    let state_root = tempdir().unwrap();
    fs::write(repo.path().join(".dochook.toml"), KNOWLEDGE_ON).unwrap();
    let config = Config::load(repo.path()).unwrap();
    let orch = Orchestrator::new(config, repo.path(), state_root.path(), None);

    let changes = ChangeSet {
        files: ["lib/cart.py".to_string()].into_iter().collect(),
        commit_message: "Fix rounding bug in cart totals".to_string(),
        triggered_by: "0123456789abcdef".to_string(),
    };
    let checked = orch.check(&changes).unwrap();
    assert_eq!(checked.knowledge_kind, Some(RecordKind::Troubleshooting));
    assert!(checked.layers.contains("memo"));

    let memo: BTreeSet<String> = ["memo".to_string()].into_iter().collect();
    let report = orch.apply(&memo, ApplyOptions::default()).unwrap();
    let id = report.queued_record.clone().unwrap();
    assert_eq!(report.resolved, memo);

    // The queue is shared host-wide, outside the project directory.
    let queue = SyncQueue::new(Store::host(state_root.path()), None);
    let entries = queue.list().unwrap();
    assert_eq!(entries.len(), 1);
    let record = &entries[0].record;
    assert_eq!(record.id, id);
    assert_eq!(record.kind, RecordKind::Troubleshooting);
    assert_eq!(record.project, "shop");
    assert_eq!(record.source_commit, "0123456789abcdef");
    assert!(record.content.contains("Issue fixed in: Fix rounding bug in cart totals"));
    assert_eq!(record.title(), "Troubleshooting Record");
}

#[test]
fn general_commits_do_not_oblige_the_knowledge_layer() {
    let repo = tempdir().unwrap();
    let state_root = tempdir().unwrap();
    fs::write(repo.path().join(".dochook.toml"), KNOWLEDGE_ON).unwrap();
    let config = Config::load(repo.path()).unwrap();
    let orch = Orchestrator::new(config, repo.path(), state_root.path(), None);

    let checked = orch
        .check(&ChangeSet::manual(["notes/todo.txt".to_string()], "add notes"))
        .unwrap();
    assert_eq!(checked.knowledge_kind, Some(RecordKind::General));
    assert!(checked.layers.is_empty());
    assert!(checked.pending.is_none());
}

#[test]
fn custom_keywords_reclassify_commits() {
    let keywords = Keywords {
        troubleshooting: vec!["hotfix".to_string()],
        decisions: vec![],
        practices: vec![],
        security: vec![],
    };
    let record = KnowledgeRecord::from_commit(
        "HOTFIX: restore checkout",
        &["shop/checkout.py".to_string()],
        "abc",
        "shop",
        &keywords,
    );
    assert_eq!(record.kind, RecordKind::Troubleshooting);
    assert!(record.content.contains("Files: shop/checkout.py"));

    let plain = KnowledgeRecord::from_commit("fix typo", &[], "abc", "shop", &keywords);
    assert_eq!(plain.kind, RecordKind::General);
}
