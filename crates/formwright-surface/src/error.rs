//! Error types for formwright-surface

use thiserror::Error;

use crate::surface_traits::{EntityId, TargetRef};

/// Errors a collaborator reports for a single best-effort UI operation.
///
/// Every variant is returned, never thrown: the engine decides whether an
/// error is retryable, ambiguous or fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The referenced element is not rendered right now
    #[error("element not found: {target}")]
    ElementNotFound { target: TargetRef },

    /// The reference resolved, but the element was re-rendered mid-operation
    #[error("stale reference: {target}")]
    StaleReference { target: TargetRef },

    /// The UI accepted the gesture but refused to apply it
    #[error("{action} rejected on {target}: {reason}")]
    ActionRejected {
        action: String,
        target: TargetRef,
        reason: String,
    },

    /// The properties panel is bound to a different field than the caller expected
    #[error("properties panel bound to {actual:?}, expected {expected}")]
    BindingMismatch {
        expected: EntityId,
        actual: Option<EntityId>,
    },

    /// The activity catalog could not complete a request
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The surface is not reachable at all (session lost, browser closed)
    #[error("surface unavailable: {0}")]
    Unavailable(String),
}

impl SurfaceError {
    /// Whether a later poll may observe a different result.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SurfaceError::ElementNotFound { .. } | SurfaceError::StaleReference { .. }
        )
    }
}
