//! Host-wide offline queue of knowledge records awaiting delivery.
//!
//! Records leave the queue only after the sink confirms delivery. Delivery
//! itself runs outside the queue lock so a slow sink never blocks `enqueue`
//! from a concurrent hook; results are folded back in under the lock.

use crate::core::error::DocHookError;
use crate::core::fsio;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::knowledge::KnowledgeRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const QUEUE_FILE: &str = "sync_queue.json";
const LOCK_FILE: &str = "sync_queue.lock";
const EVENTS_FILE: &str = "sync_events.jsonl";

/// Exit status a delivery command uses to ask for a later retry.
pub const EX_TEMPFAIL: i32 = 75;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryResult {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
}

/// The external knowledge store, as seen by the queue.
pub trait KnowledgeSink {
    fn send(&self, record: &KnowledgeRecord) -> DeliveryResult;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub record: KnowledgeRecord,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_failure: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default)]
    records: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub delivered: usize,
    pub failed: usize,
    pub remaining: usize,
    /// Ids the sink rejected permanently. They stay queued.
    pub permanent: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SyncEvent<'a> {
    ts: String,
    event_id: String,
    op: &'a str,
    record_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

pub struct SyncQueue {
    store: Store,
    sink: Option<Box<dyn KnowledgeSink>>,
}

impl SyncQueue {
    /// `sink: None` makes the queue store-only; `sync_all` then delivers nothing.
    pub fn new(store: Store, sink: Option<Box<dyn KnowledgeSink>>) -> Self {
        SyncQueue { store, sink }
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn queue_path(&self) -> PathBuf {
        self.store.root.join(QUEUE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.store.root.join(LOCK_FILE)
    }

    fn load(&self) -> Result<QueueFile, DocHookError> {
        let path = self.queue_path();
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| DocHookError::StateCorrupt {
                path,
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, queue: &QueueFile) -> Result<(), DocHookError> {
        fsio::write_json_atomic(&self.queue_path(), queue)
    }

    /// Audit failures are logged; the queue file is the record of truth.
    fn log_event(&self, op: &str, record_id: &str, detail: Option<&str>) {
        let ev = SyncEvent {
            ts: time::now().to_rfc3339(),
            event_id: time::new_id(),
            op,
            record_id,
            detail,
        };
        if let Err(e) = fsio::append_line(&self.store.root.join(EVENTS_FILE), &ev) {
            warn!(op, record_id, error = %e, "failed to append sync audit event");
        }
    }

    /// Append locally. Never attempts delivery. A corrupt queue file is an
    /// error here: rewriting it would lose the records it holds.
    pub fn enqueue(&self, record: KnowledgeRecord) -> Result<(), DocHookError> {
        let id = record.id.clone();
        fsio::with_lock(&self.lock_path(), || {
            let mut queue = self.load()?;
            queue.records.push(QueueEntry {
                record,
                attempts: 0,
                last_failure: None,
            });
            self.save(&queue)?;
            self.log_event("sync.enqueue", &id, None);
            Ok(())
        })?;
        debug!(record_id = %id, "knowledge record queued");
        Ok(())
    }

    /// Hand one record to the sink. Without a sink this is a transient failure.
    pub fn deliver(&self, record: &KnowledgeRecord) -> DeliveryResult {
        match &self.sink {
            Some(sink) => sink.send(record),
            None => DeliveryResult::TransientFailure("no delivery capability configured".into()),
        }
    }

    pub fn list(&self) -> Result<Vec<QueueEntry>, DocHookError> {
        Ok(self.load()?.records)
    }

    pub fn len(&self) -> Result<usize, DocHookError> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DocHookError> {
        Ok(self.len()? == 0)
    }

    /// Attempt every queued record once, in queue order.
    pub fn sync_all(&self) -> Result<SyncReport, DocHookError> {
        let snapshot = self.list()?;
        if self.sink.is_none() || snapshot.is_empty() {
            return Ok(SyncReport {
                remaining: snapshot.len(),
                ..SyncReport::default()
            });
        }

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            let result = self.deliver(&entry.record);
            match &result {
                DeliveryResult::Success => {
                    info!(record_id = %entry.record.id, "knowledge record delivered")
                }
                DeliveryResult::TransientFailure(reason) => {
                    warn!(record_id = %entry.record.id, %reason, "delivery failed; will retry")
                }
                DeliveryResult::PermanentFailure(reason) => {
                    warn!(record_id = %entry.record.id, %reason, "delivery rejected; record retained")
                }
            }
            outcomes.push((entry.record.id.clone(), result));
        }

        fsio::with_lock(&self.lock_path(), || {
            // Re-read: records enqueued while delivering must survive.
            let mut queue = self.load()?;
            let mut report = SyncReport::default();
            let mut events: Vec<(&str, &str, Option<&str>)> = Vec::new();
            for (id, result) in &outcomes {
                match result {
                    DeliveryResult::Success => {
                        let before = queue.records.len();
                        queue.records.retain(|e| &e.record.id != id);
                        if queue.records.len() < before {
                            report.delivered += 1;
                            events.push(("sync.delivered", id.as_str(), None));
                        }
                    }
                    DeliveryResult::TransientFailure(reason)
                    | DeliveryResult::PermanentFailure(reason) => {
                        report.failed += 1;
                        if matches!(result, DeliveryResult::PermanentFailure(_)) {
                            report.permanent.push(id.clone());
                        }
                        if let Some(entry) = queue.records.iter_mut().find(|e| &e.record.id == id) {
                            entry.attempts += 1;
                            entry.last_failure = Some(reason.clone());
                        }
                        events.push(("sync.failed", id.as_str(), Some(reason.as_str())));
                    }
                }
            }
            report.remaining = queue.records.len();
            self.save(&queue)?;
            for (op, id, detail) in events {
                self.log_event(op, id, detail);
            }
            Ok(report)
        })
    }

    /// Manual removal of one record. Nothing calls this implicitly.
    pub fn drop_record(&self, id: &str) -> Result<KnowledgeRecord, DocHookError> {
        fsio::with_lock(&self.lock_path(), || {
            let mut queue = self.load()?;
            let pos = queue
                .records
                .iter()
                .position(|e| e.record.id == id)
                .ok_or_else(|| DocHookError::NotFound(format!("queued record '{}'", id)))?;
            let entry = queue.records.remove(pos);
            self.save(&queue)?;
            self.log_event("sync.drop", id, None);
            Ok(entry.record)
        })
    }
}

/// Delivers by running an external program with the record JSON on stdin.
///
/// Exit 0 is success, exit 75 asks for a retry, any other exit is a rejection.
/// Spawn failures and timeouts are transient.
#[derive(Debug, Clone)]
pub struct CommandSink {
    argv: Vec<String>,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CommandSink {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Option<Self> {
        if argv.first().is_none_or(|p| p.trim().is_empty()) {
            return None;
        }
        Some(CommandSink {
            argv,
            timeout,
            env: Vec::new(),
        })
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

impl KnowledgeSink for CommandSink {
    fn send(&self, record: &KnowledgeRecord) -> DeliveryResult {
        let payload = match serde_json::to_vec(record) {
            Ok(p) => p,
            Err(e) => return DeliveryResult::PermanentFailure(format!("serialize: {}", e)),
        };
        let mut child = match Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                return DeliveryResult::TransientFailure(format!(
                    "failed to start '{}': {}",
                    self.argv[0], e
                ));
            }
        };
        let started = Instant::now();
        // The writer is detached: a sink that never reads stdin must not
        // hold the caller past the deadline, and one that exits without
        // reading is judged by its exit code alone.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                let _ = stdin.write_all(&payload);
            });
        }

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return match status.code() {
                        Some(0) => DeliveryResult::Success,
                        Some(EX_TEMPFAIL) => {
                            DeliveryResult::TransientFailure("sink asked for retry".into())
                        }
                        Some(code) => {
                            DeliveryResult::PermanentFailure(format!("sink exited with {}", code))
                        }
                        None => DeliveryResult::TransientFailure("sink killed by signal".into()),
                    };
                }
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return DeliveryResult::TransientFailure(format!(
                        "timed out after {:?}",
                        self.timeout
                    ));
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(e) => return DeliveryResult::TransientFailure(format!("wait failed: {}", e)),
            }
        }
    }
}
