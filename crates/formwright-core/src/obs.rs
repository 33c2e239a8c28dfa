//! Structured lifecycle events for build runs.
//!
//! - `ActivitySpan`: RAII guard tagging everything inside with run id and activity code
//! - `emit_*`: one function per lifecycle event, so event names stay greppable

use std::time::Duration;

use formwright_surface::{EntityId, Scope};
use tracing::{info, warn};

use crate::domain::{ActivityStatus, SkipReason};

/// Phases slower than this are reported.
pub const SLOW_PHASE: Duration = Duration::from_secs(5 * 60);

/// Enters an activity-scoped span for as long as it lives.
pub struct ActivitySpan {
    _span: tracing::span::EnteredSpan,
}

impl ActivitySpan {
    pub fn enter(run_id: &str, code: &str) -> Self {
        let span = tracing::info_span!("formwright.activity", run_id = %run_id, code = %code);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_activity_started(code: &str, field_count: usize) {
    info!(event = "activity.started", code = %code, fields = field_count);
}

pub fn emit_activity_finished(
    code: &str,
    status: ActivityStatus,
    reason: Option<SkipReason>,
    elapsed_ms: u64,
    failures: usize,
) {
    info!(
        event = "activity.finished",
        code = %code,
        status = %status,
        reason = reason.map(SkipReason::as_str).unwrap_or("none"),
        elapsed_ms = elapsed_ms,
        failures = failures,
    );
}

pub fn emit_phantom_transition(spec_index: usize, from: &str, to: &str) {
    info!(event = "phantom.transition", spec_index = spec_index, from = from, to = to);
}

pub fn emit_registry_drift(scope: &Scope, new: usize, missing: usize, reordered: usize) {
    warn!(
        event = "registry.drift",
        scope = ?scope,
        new = new,
        missing = missing,
        reordered = reordered,
    );
}

pub fn emit_alignment_escalated(section_id: &EntityId, attempts: u32) {
    warn!(event = "alignment.escalated", section_id = %section_id, attempts = attempts);
}

/// Warn when a phase ran longer than [`SLOW_PHASE`].
pub fn warn_if_slow(code: &str, phase: &str, elapsed: Duration) {
    if elapsed > SLOW_PHASE {
        warn!(
            event = "phase.slow",
            code = %code,
            phase = phase,
            elapsed_ms = elapsed.as_millis() as u64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_span_create() {
        let _span = ActivitySpan::enter("run-1", "CPC-01");
    }
}
