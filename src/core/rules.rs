//! Declarative rule model: which changed paths oblige which document edits.

use crate::core::error::DocHookError;
use crate::core::glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type LayerName = String;

/// A rule fires only when every trigger holds for the change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The rule's own pattern matched at least one changed file.
    FileExists,
    /// The commit message contains any keyword, case-insensitively.
    CommitContains(Vec<String>),
    /// A matched file's complexity score exceeds the threshold.
    ComplexityHigh(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "append_table_row")]
    TableRowAppend,
    #[serde(rename = "append_record")]
    RecordAppend,
    #[serde(rename = "update_section")]
    SectionUpdate,
    #[serde(rename = "prepend_content")]
    PrependContent,
    /// One rendered block per detected code pattern, skipping patterns the
    /// document already carries.
    #[serde(rename = "merge_patterns")]
    PatternMerge,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::TableRowAppend => "append_table_row",
            ActionKind::RecordAppend => "append_record",
            ActionKind::SectionUpdate => "update_section",
            ActionKind::PrependContent => "prepend_content",
            ActionKind::PatternMerge => "merge_patterns",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_mapping: Option<BTreeMap<String, String>>,
    #[serde(
        default,
        rename = "template",
        alias = "content_template",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_template: Option<String>,
}

impl Action {
    pub fn new(target: &str, kind: ActionKind) -> Self {
        Action {
            target: target.to_string(),
            section: None,
            kind,
            headers: None,
            row_mapping: None,
            content_template: None,
        }
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.section = Some(section.to_string());
        self
    }

    pub fn with_table(mut self, headers: &[&str], mapping: &[(&str, &str)]) -> Self {
        self.headers = Some(headers.iter().map(|h| h.to_string()).collect());
        self.row_mapping = Some(
            mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.content_template = Some(template.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: Pattern,
    pub layers: BTreeSet<LayerName>,
    #[serde(rename = "when", default = "default_triggers")]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_triggers() -> Vec<Trigger> {
    vec![Trigger::FileExists]
}

impl Rule {
    pub fn new(pattern: &str, layers: &[&str]) -> Result<Self, DocHookError> {
        Ok(Rule {
            pattern: Pattern::new(pattern)?,
            layers: layers.iter().map(|l| l.to_string()).collect(),
            triggers: default_triggers(),
            actions: Vec::new(),
        })
    }

    pub fn with_triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Structural problems with this rule; empty means valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.layers.is_empty() {
            problems.push(format!("rule '{}' declares no layers", self.pattern.as_str()));
        }
        if self.triggers.is_empty() {
            problems.push(format!(
                "rule '{}' declares no triggers",
                self.pattern.as_str()
            ));
        }
        for trigger in &self.triggers {
            if let Trigger::CommitContains(keywords) = trigger {
                if keywords.iter().all(|k| k.trim().is_empty()) {
                    problems.push(format!(
                        "rule '{}' has a commit_contains trigger without keywords",
                        self.pattern.as_str()
                    ));
                }
            }
        }
        for action in &self.actions {
            if action.target.trim().is_empty() {
                problems.push(format!(
                    "rule '{}' has an action without a target",
                    self.pattern.as_str()
                ));
            }
            if action.kind == ActionKind::SectionUpdate && action.section.is_none() {
                problems.push(format!(
                    "rule '{}': update_section on '{}' requires a section",
                    self.pattern.as_str(),
                    action.target
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        rules: Vec<Rule>,
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let doc: Doc = toml::from_str(
            r#"
            [[rules]]
            pattern = "services/**/*.py"
            layers = ["traditional"]
            when = ["file_exists", { commit_contains = ["fix", "bug"] }, { complexity_high = 10.0 }]

            [[rules.actions]]
            target = "README.md"
            section = "Services"
            action = "append_table_row"
            headers = ["Name", "Path", "Type"]
            row_mapping = { Name = "{file}", Path = "{path}", Type = "py" }
            "#,
        )
        .unwrap();
        let rule = &doc.rules[0];
        assert_eq!(rule.triggers.len(), 3);
        assert_eq!(
            rule.triggers[1],
            Trigger::CommitContains(vec!["fix".into(), "bug".into()])
        );
        assert_eq!(rule.triggers[2], Trigger::ComplexityHigh(10.0));
        assert_eq!(rule.actions[0].kind, ActionKind::TableRowAppend);
        assert!(rule.problems().is_empty());
    }

    #[test]
    fn test_invalid_glob_rejected_at_load() {
        let result: Result<Doc, _> = toml::from_str(
            r#"
            [[rules]]
            pattern = "src/[oops"
            layers = ["traditional"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_problems_reported() {
        let rule = Rule::new("**/*.md", &[])
            .unwrap()
            .with_triggers(vec![])
            .with_action(Action::new("README.md", ActionKind::SectionUpdate));
        let problems = rule.problems();
        assert_eq!(problems.len(), 3);
    }
}
