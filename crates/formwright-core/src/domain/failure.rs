//! Machine-readable reasons for every skip and failure.

use formwright_surface::EntityId;
use serde::{Deserialize, Serialize};

/// Why an activity, section or field did not reach its intended state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    // activity level
    AlreadyExists,
    LockedRequiresRevision,
    CatalogUnavailable,
    ShellCreationFailed,
    BuilderNotOpened,
    SectionCreationFailed,
    ConsecutiveFailures,
    // field level
    AlignmentFailed,
    NotCreated,
    AmbiguousCandidates,
    ResyncBudgetExhausted,
    DropFailed,
    BindingUnproven,
    PropertyUnverified,
    UnsupportedControl,
    ReorderFailed,
    NotAttempted,
}

/// Which step a field failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Add,
    Align,
    Bind,
    Configure,
}

/// One skipped field, kept for the summary and for retry passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub reason: SkipReason,
    pub retryable: bool,
    pub spec_index: usize,
    pub section_title: String,
    pub type_key: String,
    /// Present once the field is known to exist.
    pub field_id: Option<EntityId>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl FailureRecord {
    pub fn new(
        kind: FailureKind,
        reason: SkipReason,
        spec_index: usize,
        section_title: impl Into<String>,
        type_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            reason,
            retryable: reason.is_retryable(),
            spec_index,
            section_title: section_title.into(),
            type_key: type_key.into(),
            field_id: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn with_field(mut self, field_id: EntityId) -> Self {
        self.field_id = Some(field_id);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }
}

impl SkipReason {
    /// Whether a later retry pass may resolve this reason.
    ///
    /// Ambiguous candidates are final: the stray entities stay on the canvas
    /// and another drop would only add to them.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            SkipReason::AlignmentFailed
                | SkipReason::NotCreated
                | SkipReason::DropFailed
                | SkipReason::ResyncBudgetExhausted
                | SkipReason::BindingUnproven
                | SkipReason::PropertyUnverified
                | SkipReason::ReorderFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::AlreadyExists => "already_exists",
            SkipReason::LockedRequiresRevision => "locked_requires_revision",
            SkipReason::CatalogUnavailable => "catalog_unavailable",
            SkipReason::ShellCreationFailed => "shell_creation_failed",
            SkipReason::BuilderNotOpened => "builder_not_opened",
            SkipReason::SectionCreationFailed => "section_creation_failed",
            SkipReason::ConsecutiveFailures => "consecutive_failures",
            SkipReason::AlignmentFailed => "alignment_failed",
            SkipReason::NotCreated => "not_created",
            SkipReason::AmbiguousCandidates => "ambiguous_candidates",
            SkipReason::ResyncBudgetExhausted => "resync_budget_exhausted",
            SkipReason::DropFailed => "drop_failed",
            SkipReason::BindingUnproven => "binding_unproven",
            SkipReason::PropertyUnverified => "property_unverified",
            SkipReason::UnsupportedControl => "unsupported_control",
            SkipReason::ReorderFailed => "reorder_failed",
            SkipReason::NotAttempted => "not_attempted",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&SkipReason::LockedRequiresRevision).unwrap();
        assert_eq!(json, "\"locked_requires_revision\"");
        assert_eq!(SkipReason::AlreadyExists.to_string(), "already_exists");
    }

    #[test]
    fn test_as_str_matches_serde_name() {
        for reason in [
            SkipReason::ConsecutiveFailures,
            SkipReason::AmbiguousCandidates,
            SkipReason::ResyncBudgetExhausted,
            SkipReason::NotAttempted,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json.trim_matches('"'), reason.as_str());
        }
    }

    #[test]
    fn test_ambiguity_is_not_retryable() {
        let record = FailureRecord::new(FailureKind::Add, SkipReason::AmbiguousCandidates, 3, "Q", "paragraph");
        assert!(!record.retryable);
        let record = FailureRecord::new(FailureKind::Add, SkipReason::NotCreated, 3, "Q", "paragraph");
        assert!(record.retryable);
    }
}
