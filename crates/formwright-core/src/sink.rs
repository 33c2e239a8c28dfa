//! Run summary sinks.
//!
//! The controller hands every closed activity to a [`SummarySink`]. Where the
//! record goes (logs, metrics, a report file) is the sink's business.

use std::sync::Mutex;

use tracing::info;

use crate::domain::ActivitySummary;

pub trait SummarySink: Send + Sync {
    fn emit(&self, summary: &ActivitySummary);
}

/// Logs each summary as one structured event.
#[derive(Debug, Default)]
pub struct TracingSummarySink;

impl SummarySink for TracingSummarySink {
    fn emit(&self, summary: &ActivitySummary) {
        let counters = serde_json::to_string(&summary.counters).unwrap_or_default();
        info!(
            event = "activity.summary",
            run_id = %summary.run_id,
            code = %summary.code,
            status = %summary.status,
            reason = summary.reason.map(|r| r.as_str()).unwrap_or("none"),
            elapsed_ms = summary.elapsed_ms,
            failures = summary.failures.len(),
            counters = %counters,
        );
    }
}

/// Collects summaries in memory.
#[derive(Debug, Default)]
pub struct MemorySummarySink {
    summaries: Mutex<Vec<ActivitySummary>>,
}

impl MemorySummarySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<ActivitySummary> {
        self.summaries
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl SummarySink for MemorySummarySink {
    fn emit(&self, summary: &ActivitySummary) {
        if let Ok(mut summaries) = self.summaries.lock() {
            summaries.push(summary.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityStatus, BuildContext, SkipReason};
    use tracing_test::traced_test;

    fn summary() -> ActivitySummary {
        let mut ctx = BuildContext::new("CPC-02");
        ctx.finish(ActivityStatus::Skipped, Some(SkipReason::AlreadyExists));
        ActivitySummary::from_context(uuid::Uuid::new_v4(), ctx, String::new())
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySummarySink::new();
        sink.emit(&summary());
        sink.emit(&summary());
        assert_eq!(sink.summaries().len(), 2);
    }

    #[traced_test]
    #[test]
    fn test_tracing_sink_logs_summary() {
        TracingSummarySink.emit(&summary());
        assert!(logs_contain("activity.summary"));
        assert!(logs_contain("already_exists"));
    }
}
