//! Rule evaluation: changed paths + commit message -> layer/action obligations.
//!
//! Evaluation is pure and deterministic. Rules are folded in declaration
//! order, so the resulting layer set and action list are reproducible for a
//! fixed input.

use crate::core::rules::{Action, LayerName, Rule, Trigger};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Externally supplied per-file complexity scores, keyed by repo-relative path.
pub type ComplexityMap = BTreeMap<String, f64>;

/// One action a fired rule requires, with the files that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionObligation {
    pub action: Action,
    /// Layers of the rule that produced this action.
    pub layers: BTreeSet<LayerName>,
    /// Changed files matched by the rule, sorted.
    pub files: Vec<String>,
    /// Index of the producing rule in declaration order.
    pub rule_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Obligation {
    pub layers: BTreeSet<LayerName>,
    pub actions: Vec<ActionObligation>,
}

impl Obligation {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.actions.is_empty()
    }

    /// Fold another obligation in: union layers, concatenate actions.
    pub fn merge(&mut self, other: Obligation) {
        self.layers.extend(other.layers);
        self.actions.extend(other.actions);
    }

    /// Actions that belong to at least one of `layers`.
    pub fn actions_for<'a>(
        &'a self,
        layers: &'a BTreeSet<LayerName>,
    ) -> impl Iterator<Item = &'a ActionObligation> + 'a {
        self.actions
            .iter()
            .filter(move |a| !a.layers.is_disjoint(layers))
    }
}

fn trigger_holds(
    trigger: &Trigger,
    matched: &[String],
    commit_message: &str,
    metrics: Option<&ComplexityMap>,
) -> bool {
    match trigger {
        Trigger::FileExists => !matched.is_empty(),
        Trigger::CommitContains(keywords) => {
            let msg = commit_message.to_lowercase();
            keywords
                .iter()
                .filter(|k| !k.is_empty())
                .any(|k| msg.contains(&k.to_lowercase()))
        }
        // No metrics means the trigger cannot be shown to hold.
        Trigger::ComplexityHigh(threshold) => match metrics {
            Some(map) => matched
                .iter()
                .filter_map(|f| map.get(f))
                .any(|score| score > threshold),
            None => false,
        },
    }
}

/// Evaluate one rule. Returns `None` when the rule does not fire.
pub fn evaluate(
    rule: &Rule,
    changed_files: &BTreeSet<String>,
    commit_message: &str,
    metrics: Option<&ComplexityMap>,
) -> Option<Obligation> {
    evaluate_indexed(0, rule, changed_files, commit_message, metrics)
}

fn evaluate_indexed(
    rule_index: usize,
    rule: &Rule,
    changed_files: &BTreeSet<String>,
    commit_message: &str,
    metrics: Option<&ComplexityMap>,
) -> Option<Obligation> {
    let matched: Vec<String> = changed_files
        .iter()
        .filter(|f| rule.pattern.matches(f))
        .cloned()
        .collect();
    if matched.is_empty() {
        return None;
    }
    if !rule
        .triggers
        .iter()
        .all(|t| trigger_holds(t, &matched, commit_message, metrics))
    {
        return None;
    }

    let actions = rule
        .actions
        .iter()
        .map(|action| ActionObligation {
            action: action.clone(),
            layers: rule.layers.clone(),
            files: matched.clone(),
            rule_index,
        })
        .collect();
    Some(Obligation {
        layers: rule.layers.clone(),
        actions,
    })
}

/// Evaluate all rules in declaration order and fold the fired ones.
pub fn resolve(
    rules: &[Rule],
    changed_files: &BTreeSet<String>,
    commit_message: &str,
    metrics: Option<&ComplexityMap>,
) -> Obligation {
    rules
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| evaluate_indexed(i, rule, changed_files, commit_message, metrics))
        .fold(Obligation::default(), |mut acc, next| {
            acc.merge(next);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::ActionKind;

    fn files(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn services_rule() -> Rule {
        Rule::new("services/**/*.py", &["traditional"])
            .unwrap()
            .with_action(
                Action::new("README.md", ActionKind::TableRowAppend).with_section("Services"),
            )
    }

    #[test]
    fn test_file_exists_fires_on_match() {
        let ob = evaluate(&services_rule(), &files(&["services/auth.py"]), "", None).unwrap();
        assert!(ob.layers.contains("traditional"));
        assert_eq!(ob.actions.len(), 1);
        assert_eq!(ob.actions[0].files, vec!["services/auth.py".to_string()]);
    }

    #[test]
    fn test_no_match_no_fire() {
        assert!(evaluate(&services_rule(), &files(&["lib/auth.py"]), "fix", None).is_none());
    }

    #[test]
    fn test_commit_contains_is_case_insensitive_substring() {
        let rule = Rule::new("**/*.py", &["memo"])
            .unwrap()
            .with_triggers(vec![Trigger::CommitContains(vec!["fix".into()])]);
        let changed = files(&["a.py"]);
        assert!(evaluate(&rule, &changed, "Hotfix: FIXED login", None).is_some());
        // Mid-word matches count.
        assert!(evaluate(&rule, &changed, "prefixed names", None).is_some());
        assert!(evaluate(&rule, &changed, "add feature", None).is_none());
    }

    #[test]
    fn test_complexity_high_fails_closed_without_metrics() {
        let rule = Rule::new("**/*.py", &["memo"])
            .unwrap()
            .with_triggers(vec![Trigger::ComplexityHigh(10.0)]);
        let changed = files(&["a.py", "b.py"]);
        assert!(evaluate(&rule, &changed, "", None).is_none());

        let mut metrics = ComplexityMap::new();
        metrics.insert("a.py".into(), 3.0);
        assert!(evaluate(&rule, &changed, "", Some(&metrics)).is_none());
        metrics.insert("b.py".into(), 10.5);
        assert!(evaluate(&rule, &changed, "", Some(&metrics)).is_some());
    }

    #[test]
    fn test_all_triggers_must_hold() {
        let rule = Rule::new("**/*.py", &["memo"]).unwrap().with_triggers(vec![
            Trigger::FileExists,
            Trigger::CommitContains(vec!["bug".into()]),
        ]);
        let changed = files(&["x.py"]);
        assert!(evaluate(&rule, &changed, "bug in parser", None).is_some());
        assert!(evaluate(&rule, &changed, "docs", None).is_none());
    }

    #[test]
    fn test_resolve_folds_in_declaration_order_and_keeps_duplicates() {
        let a = services_rule();
        let b = Rule::new("**/*.py", &["config", "traditional"])
            .unwrap()
            .with_action(
                Action::new("README.md", ActionKind::TableRowAppend).with_section("Services"),
            )
            .with_action(Action::new("CHANGELOG.md", ActionKind::PrependContent));
        let ob = resolve(&[a, b], &files(&["services/auth.py"]), "", None);
        assert_eq!(
            ob.layers.iter().cloned().collect::<Vec<_>>(),
            vec!["config".to_string(), "traditional".to_string()]
        );
        assert_eq!(ob.actions.len(), 3);
        assert_eq!(ob.actions[0].rule_index, 0);
        assert_eq!(ob.actions[1].rule_index, 1);
        assert_eq!(ob.actions[0].action, ob.actions[1].action);
        assert_eq!(ob.actions[2].action.target, "CHANGELOG.md");

        let again = resolve(
            &[services_rule(), services_rule()],
            &files(&["services/auth.py"]),
            "",
            None,
        );
        assert_eq!(again.actions.len(), 2);
    }

    #[test]
    fn test_actions_for_filters_by_layer() {
        let a = services_rule();
        let b = Rule::new("**/*.py", &["memo"])
            .unwrap()
            .with_action(Action::new("docs/troubleshooting.md", ActionKind::RecordAppend));
        let ob = resolve(&[a, b], &files(&["services/auth.py"]), "", None);
        let wanted: BTreeSet<String> = ["memo".to_string()].into_iter().collect();
        let targets: Vec<_> = ob.actions_for(&wanted).map(|a| a.action.target.clone()).collect();
        assert_eq!(targets, vec!["docs/troubleshooting.md".to_string()]);
    }
}
