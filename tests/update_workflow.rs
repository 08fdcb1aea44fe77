use dochook::core::config::{CONFIG_FILE, Config};
use dochook::core::git::ChangeSet;
use dochook::core::orchestrator::{ApplyOptions, Orchestrator, OutcomeStatus};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

const README: &str = "\
# Project

## Services

| Name | Path | Type |
|------|------|------|
| billing.py | services/billing.py | Service |

## License

MIT
";

const README_WITH_AUTH: &str = "\
# Project

## Services

| Name | Path | Type |
|------|------|------|
| billing.py | services/billing.py | Service |
| auth.py | services/auth.py | Service |

## License

MIT
";

struct Fixture {
    repo: TempDir,
    state: TempDir,
}

impl Fixture {
    fn new(project_config: &str) -> Self {
        let repo = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(repo.path().join(CONFIG_FILE), project_config).unwrap();
        fs::write(repo.path().join("README.md"), README).unwrap();
        fs::create_dir_all(repo.path().join("services")).unwrap();
        fs::write(
            repo.path().join("services/auth.py"),
            "def login(user):\n    return user\n",
        )
        .unwrap();
        Fixture { repo, state }
    }

    fn orchestrator(&self) -> Orchestrator {
        let config = Config::load(self.repo.path()).unwrap();
        Orchestrator::new(config, self.repo.path(), self.state.path(), None)
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.repo.path().join(rel)).unwrap()
    }
}

const BASE_CONFIG: &str = "\
[state]
project_key = \"demo\"

[updaters]
backup = false
";

fn auth_change() -> ChangeSet {
    ChangeSet::manual(["services/auth.py".to_string()], "add auth service")
}

#[test]
fn new_service_lands_in_readme_table_and_clears_state() {
    let fx = Fixture::new(BASE_CONFIG);
    let orch = fx.orchestrator();

    let checked = orch.check(&auth_change()).unwrap();
    let expected: BTreeSet<String> = ["config", "traditional"].iter().map(|s| s.to_string()).collect();
    assert_eq!(checked.layers, expected);
    assert_eq!(checked.pending.unwrap().files, vec!["services/auth.py".to_string()]);

    let report = orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    assert_eq!(report.failed(), 0);
    assert_eq!(report.resolved, expected);
    assert!(report.remaining.is_none());
    assert_eq!(fx.read("README.md"), README_WITH_AUTH);
    assert_eq!(
        fx.read(".clinerules"),
        "## Service Layer\n\nWhen working with service layer, follow the project conventions.\n"
    );
    assert_eq!(
        fx.read(".cursorrules"),
        "- Follow Service Layer conventions when working with related code\n"
    );
    assert!(!fx.repo.path().join("README.md.bak").exists());

    assert!(orch.state().get_pending().unwrap().is_none());
    assert_eq!(orch.state().history().unwrap().len(), 1);
}

#[test]
fn repeating_the_update_leaves_every_document_alone() {
    let fx = Fixture::new(BASE_CONFIG);
    let orch = fx.orchestrator();
    orch.check(&auth_change()).unwrap();
    orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    let clinerules = fx.read(".clinerules");
    let cursorrules = fx.read(".cursorrules");

    orch.check(&auth_change()).unwrap();
    let report = orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    assert_eq!(report.changed(), 0);
    assert_eq!(fx.read("README.md"), README_WITH_AUTH);
    assert_eq!(fx.read(".clinerules"), clinerules);
    assert_eq!(fx.read(".cursorrules"), cursorrules);
    assert_eq!(orch.state().history().unwrap().len(), 2);
}

#[test]
fn config_rules_gain_only_newly_seen_patterns() {
    let fx = Fixture::new(BASE_CONFIG);
    fs::write(
        fx.repo.path().join(".clinerules"),
        "# Team rules\n\n## Service Layer\n\nServices never touch the database directly.\n",
    )
    .unwrap();
    fs::write(
        fx.repo.path().join("services/orders.py"),
        "import json\n\nclass OrderError(Exception):\n    pass\n",
    )
    .unwrap();
    let orch = fx.orchestrator();
    let change = ChangeSet::manual(["services/orders.py".to_string()], "add orders service");
    orch.check(&change).unwrap();

    let only_config: BTreeSet<String> = ["config".to_string()].into_iter().collect();
    orch.apply(&only_config, ApplyOptions::default()).unwrap();
    assert_eq!(
        fx.read(".clinerules"),
        "# Team rules\n\n## Service Layer\n\nServices never touch the database directly.\n\n\
## Dependencies\n\nWhen working with dependencies, follow the project conventions.\n\n\
## Error Handling\n\nWhen working with error handling, follow the project conventions.\n"
    );
    assert_eq!(
        fx.read(".cursorrules"),
        "- Follow Dependencies conventions when working with related code\n\
- Follow Error Handling conventions when working with related code\n\
- Follow Service Layer conventions when working with related code\n"
    );
    assert_eq!(fx.read("README.md"), README);
}

#[test]
fn dry_run_writes_nothing_and_keeps_pending() {
    let fx = Fixture::new(BASE_CONFIG);
    let orch = fx.orchestrator();
    orch.check(&auth_change()).unwrap();

    let report = orch
        .apply(
            &BTreeSet::new(),
            ApplyOptions {
                dry_run: true,
                commit: false,
            },
        )
        .unwrap();
    assert!(report.dry_run);
    assert!(report.changed() >= 1);
    assert_eq!(fx.read("README.md"), README);
    assert!(!fx.repo.path().join(".clinerules").exists());
    assert!(orch.state().is_pending().unwrap());
}

#[test]
fn missing_section_fails_alone_and_keeps_its_layer() {
    let config = format!(
        "{}\n{}",
        BASE_CONFIG,
        "\
[[rules]]
pattern = \"services/**/*.py\"
layers = [\"traditional\"]

[[rules.actions]]
target = \"README.md\"
section = \"Architecture\"
action = \"update_section\"

[[rules]]
pattern = \"services/**/*.py\"
layers = [\"config\"]

[[rules.actions]]
target = \".clinerules\"
action = \"append_record\"
template = \"@clinerules\"
"
    );
    let fx = Fixture::new(&config);
    let orch = fx.orchestrator();
    orch.check(&auth_change()).unwrap();

    let report = orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    let failed: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].section.as_deref(), Some("Architecture"));
    assert!(failed[0].error.as_deref().unwrap_or("").contains("Architecture"));

    assert_eq!(fx.read("README.md"), README);
    assert!(Path::new(&fx.repo.path().join(".clinerules")).exists());

    let remaining = report.remaining.unwrap();
    assert_eq!(
        remaining.layers,
        ["traditional".to_string()].into_iter().collect::<BTreeSet<_>>()
    );
}

#[test]
fn applying_one_layer_leaves_the_other_pending() {
    let fx = Fixture::new(BASE_CONFIG);
    let orch = fx.orchestrator();
    orch.check(&auth_change()).unwrap();

    let only_config: BTreeSet<String> = ["config".to_string()].into_iter().collect();
    let report = orch.apply(&only_config, ApplyOptions::default()).unwrap();
    assert_eq!(report.resolved, only_config);
    assert_eq!(fx.read("README.md"), README);
    let remaining = report.remaining.unwrap();
    assert!(remaining.layers.contains("traditional"));
    assert!(!remaining.layers.contains("config"));
}

#[test]
fn services_table_is_created_once_under_its_heading() {
    let config = format!(
        "{}\n{}",
        BASE_CONFIG,
        "\
[[rules]]
pattern = \"services/**/*.py\"
layers = [\"traditional\"]
when = [\"file_exists\"]

[[rules.actions]]
target = \"README.md\"
section = \"Services\"
action = \"append_table_row\"
headers = [\"Name\", \"Path\", \"Type\"]
row_mapping = { Name = \"{file}\", Path = \"{path}\", Type = \"py\" }
"
    );
    let fx = Fixture::new(&config);
    fs::write(fx.repo.path().join("README.md"), "# Project\n\n## Services\n\nNothing yet.\n").unwrap();
    let orch = fx.orchestrator();

    orch.check(&auth_change()).unwrap();
    orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    let after_first = fx.read("README.md");
    assert_eq!(
        after_first,
        "# Project\n\n## Services\n\nNothing yet.\n\n| Name | Path | Type |\n| --- | --- | --- |\n| auth.py | services/auth.py | py |\n"
    );

    orch.check(&auth_change()).unwrap();
    let report = orch.apply(&BTreeSet::new(), ApplyOptions::default()).unwrap();
    assert_eq!(report.changed(), 0);
    assert_eq!(fx.read("README.md"), after_first);
}
