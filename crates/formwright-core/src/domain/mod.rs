//! Domain models for the build engine.
//!
//! - `ActivitySpec`: parsed specification of one activity
//! - `BuildContext`: per-activity counters and terminal status
//! - `FailureRecord` / `SkipReason`: machine-readable skip reasons
//! - `ActivitySummary` / `RunReport`: what a run produced

pub mod context;
pub mod error;
pub mod failure;
pub mod spec;
pub mod summary;

pub use context::{counter, ActivityStatus, BuildContext, Counters};
pub use error::{BuildError, ConfigError, RegistryError, ReportError, Result};
pub use failure::{FailureKind, FailureRecord, SkipReason};
pub use spec::{ActivitySpec, FieldSpec, PlannedField, SectionSpec};
pub use summary::{ActivitySummary, RunReport};
