//! End-of-activity records and the per-run report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::context::{ActivityStatus, BuildContext};
use crate::domain::failure::{FailureRecord, SkipReason};

/// Structured record emitted to the summary sink when an activity closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub run_id: Uuid,
    pub code: String,
    pub status: ActivityStatus,
    pub reason: Option<SkipReason>,
    pub elapsed_ms: u64,
    pub counters: BTreeMap<String, u64>,
    pub failures: Vec<FailureRecord>,
    pub spec_digest: String,
    pub finished_at: DateTime<Utc>,
}

impl ActivitySummary {
    /// Close a context into its summary record.
    pub fn from_context(run_id: Uuid, ctx: BuildContext, spec_digest: String) -> Self {
        let (status, reason) = ctx.status();
        let elapsed_ms = ctx.elapsed_ms();
        let mut failures = ctx.failures;
        failures.sort_by_key(|f| f.spec_index);
        Self {
            run_id,
            code: ctx.code,
            status,
            reason,
            elapsed_ms,
            counters: ctx.counters.as_map().clone(),
            failures,
            spec_digest,
            finished_at: Utc::now(),
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Everything one invocation of the controller produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub activities: Vec<ActivitySummary>,
}

impl RunReport {
    pub fn count(&self, status: ActivityStatus) -> usize {
        self.activities.iter().filter(|a| a.status == status).count()
    }

    /// `true` when no activity failed.
    pub fn overall_success(&self) -> bool {
        self.count(ActivityStatus::Failed) == 0
    }

    pub fn activity(&self, code: &str) -> Option<&ActivitySummary> {
        self.activities.iter().find(|a| a.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::counter;

    #[test]
    fn test_summary_from_context() {
        let mut ctx = BuildContext::new("CPC-02");
        ctx.incr(counter::CATALOG_SEARCHES);
        ctx.finish(ActivityStatus::Skipped, Some(SkipReason::AlreadyExists));

        let summary = ActivitySummary::from_context(Uuid::new_v4(), ctx, "abc".to_string());
        assert_eq!(summary.status, ActivityStatus::Skipped);
        assert_eq!(summary.reason, Some(SkipReason::AlreadyExists));
        assert_eq!(summary.counter(counter::CATALOG_SEARCHES), 1);

        let raw = serde_json::to_value(&summary).unwrap();
        assert_eq!(raw["status"], "skipped");
        assert_eq!(raw["reason"], "already_exists");
        assert!(raw.get("spec_digest").is_some());
    }
}
