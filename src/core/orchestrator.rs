//! Drives a change set through rules, state, documents and the sync queue.
//!
//! `check` records what a change obliges; `apply` carries the obligation
//! out for a chosen set of layers. Actions run independently: one failing
//! action is reported in the batch and keeps its layers pending, it never
//! stops the rest.

use crate::core::assets;
use crate::core::config::Config;
use crate::core::error::DocHookError;
use crate::core::fsio;
use crate::core::git::{self, ChangeSet};
use crate::core::glob::Pattern;
use crate::core::matcher::{self, ActionObligation, Obligation};
use crate::core::mutator::{self, Context};
use crate::core::output;
use crate::core::rules::{Action, ActionKind, LayerName};
use crate::core::state::{PendingUpdate, StateStore};
use crate::core::store::Store;
use crate::core::sync::{CommandSink, KnowledgeSink, SyncQueue};
use crate::core::time;
use crate::plugins::analyzer::{self, ChangeAnalysis, FileType};
use crate::plugins::knowledge::{self, KnowledgeRecord, RecordKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Text content of documents addressed by repository-relative path.
pub trait DocumentStore {
    /// Current content; an absent document reads as empty.
    fn read(&self, target: &str) -> Result<String, DocHookError>;
    /// Replace the whole document.
    fn write(&self, target: &str, content: &str) -> Result<(), DocHookError>;
}

/// Documents on disk under a repository root, written atomically.
pub struct FsDocuments {
    root: PathBuf,
    backup: bool,
}

impl FsDocuments {
    pub fn new(root: &Path, backup: bool) -> Self {
        FsDocuments {
            root: root.to_path_buf(),
            backup,
        }
    }

    fn resolve(&self, target: &str) -> Result<PathBuf, DocHookError> {
        let rel = Path::new(target);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if target.trim().is_empty() || escapes {
            return Err(DocHookError::ValidationError(format!(
                "document target '{}' must be a relative path inside the repository",
                target
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl DocumentStore for FsDocuments {
    fn read(&self, target: &str) -> Result<String, DocHookError> {
        let path = self.resolve(target)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, target: &str, content: &str) -> Result<(), DocHookError> {
        let path = self.resolve(target)?;
        if self.backup && path.exists() {
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".bak");
            fs::copy(&path, path.with_file_name(name))?;
        }
        fsio::write_atomic(&path, content.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Changed,
    Unchanged,
    Queued,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub target: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub layers: BTreeSet<LayerName>,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub requested: BTreeSet<LayerName>,
    pub outcomes: Vec<ActionOutcome>,
    /// Layers whose every action succeeded.
    pub resolved: BTreeSet<LayerName>,
    pub remaining: Option<PendingUpdate>,
    pub changed_targets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_error: Option<String>,
    pub dry_run: bool,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count()
    }

    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Changed)
            .count()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckOutcome {
    pub files: usize,
    pub layers: BTreeSet<LayerName>,
    pub obligation: Obligation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_kind: Option<RecordKind>,
    pub pending: Option<PendingUpdate>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub commit: bool,
}

pub struct Orchestrator {
    config: Config,
    repo_root: PathBuf,
    state: StateStore,
    queue: SyncQueue,
    documents: Box<dyn DocumentStore>,
}

/// Delivery capability from `[knowledge]`: a configured command, or none.
pub fn sink_from_config(config: &Config) -> Option<Box<dyn KnowledgeSink>> {
    let k = &config.knowledge;
    let sink = CommandSink::new(k.command.clone(), k.timeout())?
        .with_env("DOCHOOK_PROJECT", config.project_key());
    let sink = if k.cube_id.is_empty() {
        sink
    } else {
        sink.with_env("DOCHOOK_CUBE_ID", &k.cube_id)
    };
    Some(Box::new(sink))
}

impl Orchestrator {
    pub fn new(
        config: Config,
        repo_root: &Path,
        state_root: &Path,
        sink: Option<Box<dyn KnowledgeSink>>,
    ) -> Self {
        let state = StateStore::new(Store::project(state_root, config.project_key()));
        let queue = SyncQueue::new(Store::host(state_root), sink);
        let documents = Box::new(FsDocuments::new(repo_root, config.updaters.backup));
        Orchestrator {
            config,
            repo_root: repo_root.to_path_buf(),
            state,
            queue,
            documents,
        }
    }

    /// State root and delivery capability taken from the config itself.
    pub fn from_config(config: Config, repo_root: &Path) -> Result<Self, DocHookError> {
        let state_root = config.state_root()?;
        let sink = sink_from_config(&config);
        Ok(Orchestrator::new(config, repo_root, &state_root, sink))
    }

    pub fn with_documents(mut self, documents: Box<dyn DocumentStore>) -> Self {
        self.documents = documents;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    fn obligation_for(&self, files: &BTreeSet<String>, message: &str) -> (Obligation, ChangeAnalysis) {
        let analysis = analyzer::analyze_changes(&self.repo_root, files);
        let obligation =
            matcher::resolve(&self.config.rules, files, message, Some(&analysis.complexity));
        (obligation, analysis)
    }

    /// Resolve a change set and record the layers it obliges as pending.
    pub fn check(&self, changes: &ChangeSet) -> Result<CheckOutcome, DocHookError> {
        let mut outcome = CheckOutcome {
            files: changes.files.len(),
            ..CheckOutcome::default()
        };
        if changes.is_empty() {
            return Ok(outcome);
        }

        let (obligation, analysis) = self.obligation_for(&changes.files, &changes.commit_message);
        let mut layers = obligation.layers.clone();
        if self.config.analysis.contribute_layers {
            layers.extend(analysis.layers.into_iter().filter(|l| self.config.is_declared(l)));
        }
        if self.config.knowledge.enabled {
            let kind = knowledge::classify(&changes.commit_message, &self.config.keywords);
            if kind != RecordKind::General {
                layers.insert(self.config.knowledge.layer.clone());
            }
            outcome.knowledge_kind = Some(kind);
        }
        outcome.obligation = obligation;
        outcome.layers = layers;

        if outcome.layers.is_empty() {
            debug!(files = changes.files.len(), "no rule fired");
            return Ok(outcome);
        }
        let files: Vec<String> = changes.files.iter().cloned().collect();
        let reason = format!("Changes detected in {} file(s)", files.len());
        let pending = self.state.set_pending(
            &outcome.layers,
            &reason,
            &changes.triggered_by,
            &files,
            &changes.commit_message,
        )?;
        info!(layers = ?pending.layers, "documentation update pending");
        outcome.pending = Some(pending);
        Ok(outcome)
    }

    fn base_context(&self, pending: &PendingUpdate) -> Context {
        let mut ctx = Context::new();
        let commit: String = if pending.triggered_by == "manual" {
            pending.triggered_by.clone()
        } else {
            pending.triggered_by.chars().take(7).collect()
        };
        let message = pending
            .commit_message
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        ctx.insert("files".into(), pending.files.join(", "));
        ctx.insert("commit".into(), commit);
        ctx.insert("message".into(), message);
        ctx.insert("reason".into(), pending.reason.clone());
        ctx.insert("date".into(), time::today());
        ctx.insert("project".into(), self.config.project_key().to_string());
        ctx.insert(
            "layers".into(),
            output::join_layers(&pending.layers, ","),
        );
        ctx
    }

    /// Apply pending obligations for `requested` layers (all pending layers
    /// when empty).
    pub fn apply(
        &self,
        requested: &BTreeSet<LayerName>,
        opts: ApplyOptions,
    ) -> Result<BatchReport, DocHookError> {
        let pending = self
            .state
            .get_pending()?
            .ok_or_else(|| DocHookError::NotFound("no pending update".into()))?;
        let requested = if requested.is_empty() {
            pending.layers.clone()
        } else {
            requested.clone()
        };
        let not_pending: Vec<&String> = requested.difference(&pending.layers).collect();
        if !not_pending.is_empty() {
            return Err(DocHookError::ValidationError(format!(
                "layer(s) not pending: {}",
                not_pending
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let files: BTreeSet<String> = pending.files.iter().cloned().collect();
        let (obligation, analysis) = self.obligation_for(&files, &pending.commit_message);
        let mut base = self.base_context(&pending);
        base.insert(
            mutator::PATTERNS_KEY.into(),
            analysis.patterns.into_iter().collect::<Vec<_>>().join("\n"),
        );
        let mut report = BatchReport {
            requested: requested.clone(),
            dry_run: opts.dry_run,
            ..BatchReport::default()
        };
        let mut failed_layers: BTreeSet<LayerName> = BTreeSet::new();
        let mut overlay: BTreeMap<String, String> = BTreeMap::new();

        for ob in &obligation.actions {
            let layers = self.action_layers(ob);
            if layers.is_disjoint(&requested) {
                continue;
            }
            let runs: Vec<(Option<String>, Context)> = if ob.action.kind == ActionKind::TableRowAppend {
                ob.files
                    .iter()
                    .map(|f| (Some(f.clone()), file_context(&base, f)))
                    .collect()
            } else {
                vec![(None, base.clone())]
            };
            for (file, ctx) in runs {
                let outcome = self.run_action(&ob.action, &layers, file, &ctx, &mut overlay, opts.dry_run);
                if outcome.status == OutcomeStatus::Failed {
                    failed_layers.extend(layers.intersection(&requested).cloned());
                } else if outcome.status == OutcomeStatus::Changed
                    && !report.changed_targets.contains(&outcome.target)
                {
                    report.changed_targets.push(outcome.target.clone());
                }
                report.outcomes.push(outcome);
            }
        }

        let knowledge_layer = &self.config.knowledge.layer;
        if self.config.knowledge.enabled && requested.contains(knowledge_layer) {
            let record = KnowledgeRecord::from_commit(
                &pending.commit_message,
                &pending.files,
                &pending.triggered_by,
                self.config.project_key(),
                &self.config.keywords,
            );
            let mut outcome = ActionOutcome {
                target: "sync queue".to_string(),
                action: format!("record:{}", record.kind),
                section: None,
                file: None,
                layers: BTreeSet::from([knowledge_layer.clone()]),
                status: OutcomeStatus::Queued,
                error: None,
            };
            if !opts.dry_run {
                let id = record.id.clone();
                match self.queue.enqueue(record) {
                    Ok(()) => report.queued_record = Some(id),
                    Err(e) => {
                        error!(error = %e, "failed to queue knowledge record");
                        outcome.status = OutcomeStatus::Failed;
                        outcome.error = Some(e.to_string());
                        failed_layers.insert(knowledge_layer.clone());
                    }
                }
            }
            report.outcomes.push(outcome);
        }

        report.resolved = requested.difference(&failed_layers).cloned().collect();
        if opts.dry_run {
            report.remaining = Some(pending);
            return Ok(report);
        }
        report.remaining = self.state.resolve_layers(&report.resolved)?;

        if opts.commit && !report.changed_targets.is_empty() {
            let mut ctx = base;
            ctx.insert(
                "layers".into(),
                output::join_layers(&report.resolved, ","),
            );
            let message = mutator::render(&self.config.commit.message_template, &ctx);
            match git::commit_paths(&self.repo_root, &report.changed_targets, &message) {
                Ok(sha) => report.commit = Some(sha),
                Err(e) => {
                    warn!(error = %e, "documentation commit failed");
                    report.commit_error = Some(e.to_string());
                }
            }
        }
        Ok(report)
    }

    /// Layers an action answers to: those of its rule whose declared docs
    /// cover the target, or every rule layer when none do.
    pub fn action_layers(&self, ob: &ActionObligation) -> BTreeSet<LayerName> {
        let covering: BTreeSet<LayerName> = ob
            .layers
            .iter()
            .filter(|layer| {
                self.config.layers.get(layer.as_str()).is_some_and(|decl| {
                    decl.docs
                        .iter()
                        .filter_map(|g| Pattern::new(g).ok())
                        .any(|p| p.matches(&ob.action.target))
                })
            })
            .cloned()
            .collect();
        if covering.is_empty() {
            ob.layers.clone()
        } else {
            covering
        }
    }

    fn run_action(
        &self,
        action: &Action,
        layers: &BTreeSet<LayerName>,
        file: Option<String>,
        ctx: &Context,
        overlay: &mut BTreeMap<String, String>,
        dry_run: bool,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome {
            target: action.target.clone(),
            action: action.kind.as_str().to_string(),
            section: action.section.clone(),
            file,
            layers: layers.clone(),
            status: OutcomeStatus::Unchanged,
            error: None,
        };
        match self.mutate(action, ctx, overlay, dry_run) {
            Ok(true) => outcome.status = OutcomeStatus::Changed,
            Ok(false) => {}
            Err(e) => {
                if e.is_document_error() {
                    warn!(target = %action.target, error = %e, "action left document unchanged");
                } else {
                    error!(target = %action.target, error = %e, "action failed");
                }
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    fn mutate(
        &self,
        action: &Action,
        ctx: &Context,
        overlay: &mut BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<bool, DocHookError> {
        let resolved = resolve_action_template(action)?;
        let current = match overlay.get(&action.target) {
            Some(content) => content.clone(),
            None => self.documents.read(&action.target)?,
        };
        let result = mutator::apply(&resolved, &current, ctx)?;
        if !result.changed {
            return Ok(false);
        }
        if dry_run {
            info!(target = %action.target, "dry run: document would change");
        } else {
            self.documents.write(&action.target, &result.new_content)?;
        }
        overlay.insert(action.target.clone(), result.new_content);
        Ok(true)
    }
}

/// Swap an `@name` template for the embedded template body.
fn resolve_action_template(action: &Action) -> Result<Action, DocHookError> {
    let mut resolved = action.clone();
    if let Some(raw) = &action.content_template {
        let body = assets::resolve_template(raw)
            .ok_or_else(|| DocHookError::NotFound(format!("template '{}'", raw.trim())))?;
        resolved.content_template = Some(body.trim_end().to_string());
    }
    Ok(resolved)
}

/// Per-file keys layered over the batch context.
pub fn file_context(base: &Context, path: &str) -> Context {
    let mut ctx = base.clone();
    let p = Path::new(path);
    let name = p
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let dir = p
        .parent()
        .map(|d| d.to_string_lossy().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| ".".to_string());
    ctx.insert("file".into(), name);
    ctx.insert("path".into(), path.to_string());
    ctx.insert("type".into(), FileType::of(path).as_str().to_string());
    ctx.insert("dir".into(), dir);
    ctx.insert("ext".into(), analyzer::extension(path));
    ctx
}
