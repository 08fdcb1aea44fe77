//! Knowledge records distilled from commits, and the `sync` CLI over the
//! host-wide delivery queue.

use crate::core::error::DocHookError;
use crate::core::output;
use crate::core::sync::{SyncQueue, SyncReport};
use crate::core::time;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Troubleshooting,
    Adr,
    Practice,
    Security,
    General,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Troubleshooting => "troubleshooting",
            RecordKind::Adr => "adr",
            RecordKind::Practice => "practice",
            RecordKind::Security => "security",
            RecordKind::General => "general",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword lists used to classify a commit message. Checked in field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub troubleshooting: Vec<String>,
    pub decisions: Vec<String>,
    pub practices: Vec<String>,
    pub security: Vec<String>,
}

impl Default for Keywords {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        }
        Keywords {
            troubleshooting: words(&["fix", "bug", "error", "issue", "debug"]),
            decisions: words(&["decision", "decide", "architecture", "选型"]),
            practices: words(&["refactor", "optimize", "improve", "better"]),
            security: words(&["security", "auth", "vulnerability"]),
        }
    }
}

fn contains_any(haystack: &str, words: &[String]) -> bool {
    words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .any(|w| haystack.contains(&w.to_lowercase()))
}

/// Case-insensitive substring classification of a commit message.
pub fn classify(message: &str, keywords: &Keywords) -> RecordKind {
    let msg = message.to_lowercase();
    if contains_any(&msg, &keywords.troubleshooting) {
        RecordKind::Troubleshooting
    } else if contains_any(&msg, &keywords.decisions) {
        RecordKind::Adr
    } else if contains_any(&msg, &keywords.practices) {
        RecordKind::Practice
    } else if contains_any(&msg, &keywords.security) {
        RecordKind::Security
    } else {
        RecordKind::General
    }
}

/// Immutable once created; the queue stores it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: String,
    pub kind: RecordKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub source_commit: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// sha256 over kind, content and source commit.
    pub fingerprint: String,
}

pub fn fingerprint(kind: RecordKind, content: &str, source_commit: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_commit.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl KnowledgeRecord {
    pub fn new(
        kind: RecordKind,
        content: &str,
        source_commit: &str,
        project: &str,
        files: &[String],
    ) -> Self {
        KnowledgeRecord {
            id: time::new_id(),
            kind,
            content: content.to_string(),
            created_at: time::now(),
            source_commit: source_commit.to_string(),
            project: project.to_string(),
            files: files.to_vec(),
            fingerprint: fingerprint(kind, content, source_commit),
        }
    }

    /// Classify `message` and render a kind-specific Markdown body.
    pub fn from_commit(
        message: &str,
        files: &[String],
        source_commit: &str,
        project: &str,
        keywords: &Keywords,
    ) -> Self {
        let kind = classify(message, keywords);
        let content = render_body(kind, message, files);
        KnowledgeRecord::new(kind, &content, source_commit, project, files)
    }

    pub fn title(&self) -> String {
        let first = self
            .content
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        output::compact_line(first.trim_start_matches('#').trim(), 60)
    }
}

fn render_body(kind: RecordKind, message: &str, files: &[String]) -> String {
    let message = message.trim();
    let file_list = files.join(", ");
    match kind {
        RecordKind::Troubleshooting => format!(
            "# Troubleshooting Record\n\n## Problem\nIssue fixed in: {}\n\n## Solution\nSee commit for details\n\n## Context\nFiles: {}\n",
            message, file_list
        ),
        RecordKind::Adr => format!(
            "# ADR: {}\n\n## Decision\nSee commit for details\n\n## Context\nFiles affected: {}\n",
            message, file_list
        ),
        RecordKind::Practice => format!(
            "# Best Practice: general\n\n## Practice\n{}\n\n## Context\nFiles: {}\n",
            message, file_list
        ),
        RecordKind::Security => format!(
            "# Security Practice\n\n{}\n\n## Changes\nSee commit for details\n\n## Files\n{}\n",
            message, file_list
        ),
        RecordKind::General => format!(
            "# Commit: {}\n\n## Files Changed\n{}\n\n## Summary\nNo detailed summary available\n",
            message, file_list
        ),
    }
}

#[derive(Parser, Debug)]
#[clap(name = "sync", about = "Deliver queued knowledge records")]
pub struct SyncCli {
    #[clap(subcommand)]
    pub command: SyncCommand,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Attempt delivery of every queued record, in queue order.
    Run {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Show queued records with their delivery attempts.
    List {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Remove one record from the queue without delivering it.
    Drop {
        #[clap(long)]
        id: String,
    },
}

pub fn run_sync_cli(queue: &SyncQueue, cli: SyncCli) -> Result<(), DocHookError> {
    match cli.command {
        SyncCommand::Run { format } => {
            let report = queue.sync_all()?;
            if format == "json" {
                let extra = serde_json::to_value(&report)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&time::command_envelope("sync.run", "ok", extra))?
                );
            } else {
                print_report(queue, &report);
            }
        }
        SyncCommand::List { format } => {
            let entries = queue.list()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Sync queue is empty");
            } else {
                for entry in &entries {
                    let status = match &entry.last_failure {
                        Some(reason) => format!(
                            "{} attempt(s), last: {}",
                            entry.attempts,
                            output::compact_line(reason, 50)
                        )
                        .yellow(),
                        None => "never attempted".normal(),
                    };
                    println!(
                        "{}  {:<15} {}  ({})",
                        entry.record.id.bold(),
                        entry.record.kind.as_str(),
                        entry.record.title(),
                        status
                    );
                }
            }
        }
        SyncCommand::Drop { id } => {
            let dropped = queue.drop_record(&id)?;
            println!("{} Dropped {} ({})", "✓".green(), dropped.id, dropped.title());
        }
    }
    Ok(())
}

fn print_report(queue: &SyncQueue, report: &SyncReport) {
    if !queue.has_sink() {
        println!(
            "{} No delivery command configured; {} record(s) kept in queue",
            "!".yellow(),
            report.remaining
        );
        return;
    }
    println!(
        "{} Delivered {}, failed {}, remaining {}",
        if report.failed == 0 { "✓".green() } else { "!".yellow() },
        report.delivered,
        report.failed,
        report.remaining
    );
    if !report.permanent.is_empty() {
        println!(
            "{} Rejected by the knowledge store (kept for manual review): {}",
            "✗".red(),
            output::preview_messages(&report.permanent, 5, 30)
        );
    }
}
