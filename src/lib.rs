//! dochook: rule-driven documentation upkeep from git changes.
//!
//! A project declares, in `.dochook.toml`, which documents must change when
//! which files change. Git hooks feed each commit or push through the rules;
//! whatever they oblige is recorded as a pending update, and `dochook update`
//! carries it out against the Markdown documents in the repository.
//!
//! # Architecture
//!
//! - **Rules**: glob pattern, triggers, layers and document actions
//!   ([`core::rules`], [`core::glob`], [`core::matcher`]).
//! - **Mutations**: side-effect-free Markdown edits ([`core::mutator`]).
//! - **State**: one pending update plus append-only history per project,
//!   kept outside the repository under `~/.dochook/projects/<key>/`
//!   ([`core::state`]).
//! - **Knowledge sync**: records classified from commit messages wait in a
//!   durable queue until an external command accepts them ([`core::sync`],
//!   [`plugins::knowledge`]).
//! - **Orchestration**: [`core::orchestrator`] ties a change set to all of
//!   the above.
//!
//! # Examples
//!
//! ```bash
//! # Write .dochook.toml with the default rules
//! dochook init
//!
//! # Install pre-push and post-commit hooks
//! dochook setup hook
//!
//! # See what the last commit obliges, then do it
//! dochook check
//! dochook update --commit
//! ```

pub mod core;
pub mod plugins;

use core::{
    config::{self, Config},
    error::DocHookError,
    git::{self, ChangeSet},
    hooks::{self, HookOutcome},
    orchestrator::{ApplyOptions, BatchReport, CheckOutcome, Orchestrator, OutcomeStatus},
    output, state, time,
};
use plugins::knowledge::{self, SyncCli};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[clap(
    name = "dochook",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep documentation in step with code, one commit at a time"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default .dochook.toml into the repository.
    Init {
        /// Overwrite an existing config.
        #[clap(long)]
        force: bool,
    },
    /// Wire dochook into the repository.
    Setup {
        #[clap(subcommand)]
        command: SetupCommand,
    },
    /// Evaluate changes against the rules and record what they oblige.
    Check {
        /// Base revision; with --head, checks every change in base..head.
        #[clap(long)]
        base: Option<String>,
        #[clap(long, default_value = "HEAD")]
        head: String,
        /// Check these paths instead of reading git.
        #[clap(long, num_args = 1..)]
        files: Vec<String>,
        /// Commit message to evaluate alongside --files.
        #[clap(long, default_value = "")]
        message: String,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Show the pending update for this project.
    Status {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Show completed updates, most recent first.
    History {
        #[clap(long, default_value_t = 10)]
        limit: usize,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// List every project with a pending update.
    Projects {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Apply pending documentation updates.
    Update {
        /// Layers to apply (comma-separated); all pending layers when omitted.
        #[clap(value_delimiter = ',')]
        layers: Vec<String>,
        /// Commit changed documents afterwards.
        #[clap(long)]
        commit: bool,
        /// Report what would change without writing anything.
        #[clap(long)]
        dry_run: bool,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Discard the pending update without applying it.
    Clear {
        #[clap(long)]
        yes: bool,
    },
    /// Deliver queued knowledge records.
    Sync(SyncCli),
    /// Inspect the effective configuration.
    Config {
        #[clap(subcommand)]
        command: ConfigCommand,
    },
    /// Entry points for installed git hooks.
    #[clap(hide = true)]
    Hook {
        #[clap(subcommand)]
        hook: HookCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand, Debug)]
enum SetupCommand {
    /// Install (or remove) the pre-push and post-commit hooks.
    Hook {
        #[clap(long)]
        uninstall: bool,
        /// Replace hooks that dochook did not write.
        #[clap(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the merged config (defaults plus .dochook.toml).
    Show,
    /// Report every problem in the config.
    Validate,
}

#[derive(Subcommand, Debug)]
enum HookCommand {
    /// Reads `<local ref> <local sha> <remote ref> <remote sha>` lines on stdin.
    PrePush {
        #[clap(default_value = "origin")]
        remote: String,
        url: Option<String>,
    },
    PostCommit,
}

/// Repository root for the current directory, or the directory itself
/// outside a git checkout.
fn project_root() -> Result<PathBuf, DocHookError> {
    let cwd = std::env::current_dir()?;
    match git::repo_root(&cwd) {
        Ok(root) => Ok(root),
        Err(e) => {
            debug!(error = %e, "not inside a git repository");
            Ok(cwd)
        }
    }
}

fn open(root: &Path) -> Result<Orchestrator, DocHookError> {
    Orchestrator::from_config(Config::load(root)?, root)
}

fn print_json(cmd: &str, value: serde_json::Value) -> Result<(), DocHookError> {
    println!(
        "{}",
        serde_json::to_string_pretty(&time::command_envelope(cmd, "ok", value))?
    );
    Ok(())
}

pub fn run() -> Result<ExitCode, DocHookError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
        }
        Command::Init { force } => {
            let root = project_root()?;
            let path = config::write_default(&root, force)?;
            println!("{} Wrote {}", "✓".green(), path.display());
            println!("  Next: {} to install the git hooks", "dochook setup hook".cyan());
        }
        Command::Setup {
            command: SetupCommand::Hook { uninstall, force },
        } => {
            let root = git::repo_root(&std::env::current_dir()?)?;
            let outcomes = if uninstall {
                hooks::uninstall(&root)?
            } else {
                hooks::install(&root, &hooks::self_command(), force)?
            };
            print_hook_outcomes(&outcomes);
        }
        Command::Check {
            base,
            head,
            files,
            message,
            format,
        } => {
            let root = project_root()?;
            let orch = open(&root)?;
            let changes = if !files.is_empty() {
                ChangeSet::manual(files, &message)
            } else if let Some(base) = base {
                git::changes_in_range(&root, &base, &head)?
            } else {
                git::head_change(&root)?
            };
            let outcome = orch.check(&changes)?;
            if format == "json" {
                print_json("check", serde_json::to_value(&outcome)?)?;
            } else {
                print_check(&outcome);
            }
        }
        Command::Status { format } => {
            let root = project_root()?;
            let orch = open(&root)?;
            let pending = orch.state().get_pending()?;
            if format == "json" {
                print_json(
                    "status",
                    serde_json::json!({
                        "project": orch.config().project_key(),
                        "pending": pending,
                        "queued_records": orch.queue().len()?,
                    }),
                )?;
            } else {
                match &pending {
                    Some(p) => println!("{}", state::render_summary(p)),
                    None => println!("{} Documentation is up to date", "✓".green()),
                }
                let queued = orch.queue().len()?;
                if queued > 0 {
                    println!("  {} knowledge record(s) waiting for sync", queued);
                }
            }
        }
        Command::History { limit, format } => {
            let root = project_root()?;
            let orch = open(&root)?;
            let entries = orch.state().recent_history(limit)?;
            if format == "json" {
                print_json("history", serde_json::to_value(&entries)?)?;
            } else if entries.is_empty() {
                println!("No completed updates yet");
            } else {
                for entry in &entries {
                    println!(
                        "{}  {:<24} {}",
                        entry.completed_at.format("%Y-%m-%d %H:%M").to_string().bold(),
                        entry
                            .update
                            .layers
                            .iter()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(","),
                        output::compact_line(&entry.update.reason, 60)
                    );
                }
            }
        }
        Command::Projects { format } => {
            let root = project_root()?;
            let cfg = Config::load_unchecked(&root)?;
            let projects = state::list_projects(&cfg.state_root()?)?;
            if format == "json" {
                print_json("projects", serde_json::to_value(&projects)?)?;
            } else if projects.is_empty() {
                println!("No project has a pending update");
            } else {
                for p in &projects {
                    println!(
                        "{}  {}  ({} file(s))",
                        p.key.bold(),
                        output::join_layers(&p.pending.layers, ","),
                        p.pending.files.len()
                    );
                }
            }
        }
        Command::Update {
            layers,
            commit,
            dry_run,
            format,
        } => {
            let root = project_root()?;
            let orch = open(&root)?;
            let requested: BTreeSet<String> = layers
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            let opts = ApplyOptions {
                dry_run: dry_run || orch.config().updaters.dry_run,
                commit,
            };
            let report = orch.apply(&requested, opts)?;
            if format == "json" {
                print_json("update", serde_json::to_value(&report)?)?;
            } else {
                print_batch(&report);
            }
        }
        Command::Clear { yes } => {
            let root = project_root()?;
            let orch = open(&root)?;
            if !yes {
                match orch.state().get_pending()? {
                    Some(p) => {
                        println!("{}", state::render_summary(&p));
                        println!("Re-run with {} to discard it", "--yes".cyan());
                    }
                    None => println!("Nothing pending"),
                }
                return Ok(ExitCode::SUCCESS);
            }
            match orch.state().clear_pending()? {
                Some(p) => println!(
                    "{} Cleared pending update for {}",
                    "✓".green(),
                    output::join_layers(&p.layers, ",")
                ),
                None => println!("Nothing pending"),
            }
        }
        Command::Sync(sync_cli) => {
            let root = project_root()?;
            let orch = open(&root)?;
            knowledge::run_sync_cli(orch.queue(), sync_cli)?;
        }
        Command::Config { command } => {
            let root = project_root()?;
            match command {
                ConfigCommand::Show => {
                    print!("{}", Config::load_unchecked(&root)?.to_toml_string()?);
                }
                ConfigCommand::Validate => {
                    let problems = Config::load_unchecked(&root)?.validate();
                    if problems.is_empty() {
                        println!("{} {} is valid", "✓".green(), config::CONFIG_FILE);
                    } else {
                        for p in &problems {
                            println!("{} {}", "✗".red(), p);
                        }
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
        }
        Command::Hook { hook } => return run_hook(hook),
    }
    Ok(ExitCode::SUCCESS)
}

/// Hooks never fail the git operation on their own errors; only a pending
/// update with `hooks.block_push` stops a push.
fn run_hook(hook: HookCommand) -> Result<ExitCode, DocHookError> {
    let root = project_root()?;
    let orch = match open(&root) {
        Ok(orch) => orch,
        Err(e) => {
            warn!(error = %e, "dochook hook skipped");
            return Ok(ExitCode::SUCCESS);
        }
    };
    match hook {
        HookCommand::PostCommit => {
            let outcome = git::head_change(&root).and_then(|c| orch.check(&c));
            match outcome {
                Ok(outcome) => {
                    if let Some(p) = &outcome.pending {
                        eprintln!(
                            "dochook: documentation update pending for {} (run `dochook update`)",
                            output::join_layers(&p.layers, ",")
                        );
                    }
                }
                Err(e) => warn!(error = %e, "post-commit check failed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        HookCommand::PrePush { remote, url } => {
            debug!(%remote, url = url.as_deref().unwrap_or(""), "pre-push");
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            let refs = git::parse_pre_push(&input);
            if let Err(e) = git::changes_for_push(&root, &remote, &refs).and_then(|c| orch.check(&c)) {
                warn!(error = %e, "pre-push check failed");
                return Ok(ExitCode::SUCCESS);
            }
            let pending = match orch.state().get_pending() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "could not read pending state");
                    return Ok(ExitCode::SUCCESS);
                }
            };
            match pending {
                Some(p) if orch.config().hooks.block_push => {
                    eprintln!("{}", state::render_summary(&p));
                    eprintln!(
                        "{} Push blocked: run `dochook update` (or `dochook clear --yes`), then push again",
                        "✗".red()
                    );
                    Ok(ExitCode::FAILURE)
                }
                Some(p) => {
                    eprintln!(
                        "dochook: documentation update pending for {}",
                        output::join_layers(&p.layers, ",")
                    );
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

fn print_hook_outcomes(outcomes: &[HookOutcome]) {
    for outcome in outcomes {
        match outcome {
            HookOutcome::Installed(p) => println!("{} Installed {}", "✓".green(), p.display()),
            HookOutcome::Removed(p) => println!("{} Removed {}", "✓".green(), p.display()),
            HookOutcome::SkippedForeign(p) => println!(
                "{} Left {} alone (not written by dochook; use --force)",
                "!".yellow(),
                p.display()
            ),
            HookOutcome::Absent(p) => println!("  No hook at {}", p.display()),
        }
    }
}

fn print_check(outcome: &CheckOutcome) {
    match &outcome.pending {
        None => println!(
            "{} {} file(s) checked; no documentation update needed",
            "✓".green(),
            outcome.files
        ),
        Some(p) => {
            println!(
                "{} {} file(s) oblige updates to: {}",
                "!".yellow(),
                outcome.files,
                output::join_layers(&outcome.layers, ", ")
            );
            for ob in &outcome.obligation.actions {
                println!(
                    "  - {} {}{}",
                    ob.action.kind.as_str(),
                    ob.action.target,
                    ob.action
                        .section
                        .as_deref()
                        .map(|s| format!(" #{}", s))
                        .unwrap_or_default()
                );
            }
            if let Some(kind) = outcome.knowledge_kind {
                println!("  knowledge: {}", kind);
            }
            println!("  Pending layers now: {}", output::join_layers(&p.layers, ", "));
        }
    }
}

fn print_batch(report: &BatchReport) {
    if report.dry_run {
        println!("{}", "Dry run: nothing written".dimmed());
    }
    for o in &report.outcomes {
        let mark = match o.status {
            OutcomeStatus::Changed => "✓".green(),
            OutcomeStatus::Unchanged => "=".normal(),
            OutcomeStatus::Queued => "→".cyan(),
            OutcomeStatus::Failed => "✗".red(),
        };
        let mut line = format!("{} {} {}", mark, o.action, o.target);
        if let Some(s) = &o.section {
            line.push_str(&format!(" #{}", s));
        }
        if let Some(f) = &o.file {
            line.push_str(&format!(" ({})", f));
        }
        if let Some(e) = &o.error {
            line.push_str(&format!(": {}", output::compact_line(e, 80)));
        }
        println!("{}", line);
    }
    println!(
        "{} changed, {} failed; resolved: {}",
        report.changed(),
        report.failed(),
        if report.resolved.is_empty() {
            "none".to_string()
        } else {
            output::join_layers(&report.resolved, ", ")
        }
    );
    if let Some(id) = &report.queued_record {
        println!("  queued knowledge record {}", id);
    }
    if let Some(sha) = &report.commit {
        println!("  committed {}", sha.chars().take(7).collect::<String>());
    }
    if let Some(e) = &report.commit_error {
        println!("{} commit failed: {}", "!".yellow(), e);
    }
    if let Some(p) = &report.remaining {
        if !report.dry_run {
            println!(
                "  still pending: {}",
                output::join_layers(&p.layers, ", ")
            );
        }
    }
}
