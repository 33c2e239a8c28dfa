//! Error taxonomy for the build engine.
//!
//! Field, section and activity outcomes are values (`SkipReason`), not
//! errors. The types here cover logic errors and the single run-fatal
//! condition.

use formwright_surface::{EntityId, EntityKind, SurfaceError};

/// Registry logic errors. Every one of these signals drift.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {kind:?} id: {id}")]
    DuplicateId { id: EntityId, kind: EntityKind },

    #[error("field {field} references unknown section {section}")]
    UnknownSection { field: EntityId, section: EntityId },

    #[error("observed order for section {section} does not match the registered id set")]
    OrderMismatch { section: EntityId },
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("config rejected: {0}")]
    Invalid(String),
}

/// Errors that end a whole build run.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The only run-fatal input condition.
    #[error("no activity specifications supplied")]
    NoSpecifications,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run report artifact errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Result type for whole-run operations.
pub type Result<T> = std::result::Result<T, BuildError>;
