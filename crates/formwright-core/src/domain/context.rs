//! Per-activity build context.
//!
//! Created when an activity starts, threaded explicitly through every
//! component call, closed when the activity ends. Never shared across
//! activities.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::failure::{FailureRecord, SkipReason};

/// Named counter keys.
pub mod counter {
    pub const DRAG_ATTEMPTS: &str = "drag_attempts";
    pub const PHANTOM_TIMEOUTS: &str = "phantom_timeouts";
    pub const LATE_CANDIDATES: &str = "late_candidates";
    pub const HARD_RESYNCS: &str = "hard_resyncs";
    pub const RETRY_PASSES: &str = "retry_passes";
    pub const ALIGN_FAST_PATH: &str = "align_fast_path";
    pub const ALIGN_SLOW_PATH: &str = "align_slow_path";
    pub const ALIGN_ESCALATIONS: &str = "align_escalations";
    pub const CATALOG_SEARCHES: &str = "catalog_searches";
    pub const SECTIONS_CREATED: &str = "sections_created";
    pub const FIELDS_ADDED: &str = "fields_added";
    pub const FIELDS_FAILED: &str = "fields_failed";
    pub const BIND_ATTEMPTS: &str = "bind_attempts";
    pub const PROPERTIES_WRITTEN: &str = "properties_written";
    pub const PROPERTIES_SKIPPED: &str = "properties_skipped";
    pub const REORDERS: &str = "reorders";
}

/// Monotonic named counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters(BTreeMap<String, u64>);

impl Counters {
    pub fn incr(&mut self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &str, n: u64) {
        *self.0.entry(name.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn as_map(&self) -> &BTreeMap<String, u64> {
        &self.0
    }
}

/// Terminal status of one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[serde(rename = "ok")]
    Completed,
    Skipped,
    Failed,
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityStatus::Completed => "ok",
            ActivityStatus::Skipped => "skipped",
            ActivityStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct BuildContext {
    pub code: String,
    pub counters: Counters,
    pub failures: Vec<FailureRecord>,
    /// Specification slots that have failed at least once.
    failed_fields: HashSet<usize>,
    terminal: Option<(ActivityStatus, Option<SkipReason>)>,
    started: Instant,
}

impl BuildContext {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            counters: Counters::default(),
            failures: Vec::new(),
            failed_fields: HashSet::new(),
            terminal: None,
            started: Instant::now(),
        }
    }

    pub fn incr(&mut self, name: &str) {
        self.counters.incr(name);
    }

    pub fn add(&mut self, name: &str, n: u64) {
        self.counters.add(name, n);
    }

    pub fn record_failure(&mut self, record: FailureRecord) {
        tracing::warn!(
            code = %self.code,
            spec_index = record.spec_index,
            kind = ?record.kind,
            reason = %record.reason,
            "field skipped"
        );
        if self.failed_fields.insert(record.spec_index) {
            self.incr(counter::FIELDS_FAILED);
        }
        self.failures.push(record);
    }

    /// Remove and return retryable failures in specification order.
    pub fn take_retryable(&mut self) -> Vec<FailureRecord> {
        let (mut retryable, kept): (Vec<_>, Vec<_>) =
            self.failures.drain(..).partition(|f| f.retryable);
        self.failures = kept;
        retryable.sort_by_key(|f| f.spec_index);
        retryable
    }

    /// Set the terminal status. The first call wins.
    pub fn finish(&mut self, status: ActivityStatus, reason: Option<SkipReason>) {
        if self.terminal.is_none() {
            self.terminal = Some((status, reason));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    /// Terminal status; an activity never explicitly finished completed.
    pub fn status(&self) -> (ActivityStatus, Option<SkipReason>) {
        self.terminal.unwrap_or((ActivityStatus::Completed, None))
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
