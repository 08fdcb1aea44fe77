use dochook::core::matcher;
use dochook::core::rules::{Action, ActionKind, Rule, Trigger};
use dochook::plugins::analyzer::{self, FileType};
use std::collections::BTreeSet;
use std::fs;
use tempfile::tempdir;

const BRANCHY_PY: &str = "\
def route(req, user, flags):
    if req.method == 'GET' and user:
        for f in flags:
            if f.enabled or f.forced:
                while f.pending:
                    if f.retry:
                        f.step()
    elif req.method == 'POST':
        return None
    return req
";

fn set(paths: &[&str]) -> BTreeSet<String> {
    paths.iter().map(|s| s.to_string()).collect()
}

#[test]
fn changed_files_are_analyzed_and_missing_ones_skipped() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("services")).unwrap();
    fs::create_dir_all(tmp.path().join("web")).unwrap();
    fs::write(tmp.path().join("services/router.py"), BRANCHY_PY).unwrap();
    fs::write(tmp.path().join("web/app.js"), "const a = (x) => x;\n").unwrap();

    let result = analyzer::analyze_changes(
        tmp.path(),
        &set(&["services/router.py", "web/app.js", "services/deleted.py"]),
    );
    assert_eq!(result.analyses.len(), 2);
    assert!(!result.complexity.contains_key("services/deleted.py"));

    let router = result
        .analyses
        .iter()
        .find(|a| a.path == "services/router.py")
        .unwrap();
    assert_eq!(router.language, "python");
    assert_eq!(router.file_type, FileType::Service);
    assert!(router.metrics.nesting_depth >= 4);
    assert_eq!(result.layers, set(&["traditional"]));
}

#[test]
fn complexity_scores_drive_the_complexity_trigger() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("services")).unwrap();
    fs::write(tmp.path().join("services/router.py"), BRANCHY_PY).unwrap();
    fs::write(tmp.path().join("services/plain.py"), "def ok():\n    return 1\n").unwrap();

    let rule = Rule::new("services/*.py", &["traditional"])
        .unwrap()
        .with_triggers(vec![Trigger::ComplexityHigh(5.0)])
        .with_action(Action::new("docs/hotspots.md", ActionKind::RecordAppend));

    let busy = set(&["services/router.py"]);
    let analysis = analyzer::analyze_changes(tmp.path(), &busy);
    let fired = matcher::resolve(&[rule.clone()], &busy, "", Some(&analysis.complexity));
    assert_eq!(fired.layers, set(&["traditional"]));

    let quiet = set(&["services/plain.py"]);
    let analysis = analyzer::analyze_changes(tmp.path(), &quiet);
    let fired = matcher::resolve(&[rule], &quiet, "", Some(&analysis.complexity));
    assert!(fired.is_empty());
}

#[test]
fn test_files_do_not_hint_traditional_docs() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("tests")).unwrap();
    fs::write(tmp.path().join("tests/test_router.py"), "def test_ok():\n    assert True\n").unwrap();
    let result = analyzer::analyze_changes(tmp.path(), &set(&["tests/test_router.py"]));
    assert_eq!(result.analyses[0].file_type, FileType::Test);
    assert!(result.layers.is_empty());
}
