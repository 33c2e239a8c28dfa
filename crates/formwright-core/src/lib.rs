//! Formwright Core Library
//!
//! Verification-driven build-state engine. Every structural mutation of the
//! editing surface is proven before it is acted on and re-proven after,
//! against an entity registry that is only ever updated from observation.

pub mod alignment;
pub mod config;
pub mod configure;
pub mod controller;
pub mod domain;
pub mod obs;
pub mod phantom;
pub mod registry;
pub mod reporting;
pub mod session;
pub mod sink;
pub mod telemetry;
pub mod verify;

pub use domain::{
    counter, ActivitySpec, ActivityStatus, ActivitySummary, BuildContext, BuildError,
    ConfigError, Counters, FailureKind, FailureRecord, FieldSpec, PlannedField, RegistryError,
    ReportError, Result, RunReport, SectionSpec, SkipReason,
};

pub use alignment::{ensure_aligned, Aligned, AlignmentError, AlignmentGuard};
pub use config::{
    AlignmentConfig, BuildConfig, LocateConfig, PhantomConfig, RetryConfig, StepTiming,
    VerifyConfig,
};
pub use configure::{
    guarded_write, BoundField, CapabilityTable, ConfigureReport, ContentConfigurator,
    ControlFailure, PropertyConfigurator,
};
pub use controller::BuildController;
pub use phantom::{
    attempt_add, expected_ordinal, hard_resync, AddReport, AddRequest, PhantomState,
    ResyncBudget, ResyncError, UnrecoverableCause,
};
pub use registry::{
    Entity, FieldEntry, Registry, RegistryDiff, RegistrySnapshot, SectionEntry, SectionView,
};
pub use reporting::{read_run_report, render_run_summary, write_run_report};
pub use session::{ActivitySession, BootstrapError};
pub use sink::{MemorySummarySink, SummarySink, TracingSummarySink};
pub use telemetry::init_tracing;
pub use verify::{Attempt, AttemptOutcome, Outcome, TargetId, TimeoutPolicy, VerifiedAction, VerifyPolicy};
