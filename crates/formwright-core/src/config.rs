//! Build configuration: verification timing, recovery budgets, locate and
//! retry policy.
//!
//! Loaded from TOML, then overridden from `FORMWRIGHT_*` environment
//! variables, then validated. Every section has defaults, so an empty file
//! is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::verify::VerifyPolicy;

/// Timing for one kind of verified action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepTiming {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl StepTiming {
    const fn new(timeout_ms: u64, poll_interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            timeout_ms,
            poll_interval_ms,
            max_attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> VerifyPolicy {
        VerifyPolicy::retry(self.timeout(), self.poll_interval(), self.max_attempts)
    }

    pub fn ambiguous_policy(&self) -> VerifyPolicy {
        VerifyPolicy::ambiguous(self.timeout(), self.poll_interval())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Frequent; keep it short.
    pub alignment: StepTiming,
    pub section_create: StepTiming,
    /// Immediate re-prove for a field drop. Attempts are governed by
    /// `phantom.add_attempts`, not by this timing.
    pub add_field: StepTiming,
    pub binding: StepTiming,
    pub property_write: StepTiming,
    pub shell_create: StepTiming,
    pub builder_open: StepTiming,
    pub reorder: StepTiming,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            alignment: StepTiming::new(1_500, 100, 3),
            section_create: StepTiming::new(5_000, 250, 2),
            add_field: StepTiming::new(2_000, 100, 1),
            binding: StepTiming::new(2_000, 100, 3),
            property_write: StepTiming::new(2_000, 100, 2),
            shell_create: StepTiming::new(10_000, 500, 1),
            builder_open: StepTiming::new(10_000, 250, 2),
            reorder: StepTiming::new(2_000, 100, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhantomConfig {
    /// Wait before the single late-candidate re-observation.
    pub grace_delay_ms: u64,
    /// Hard resyncs allowed per activity.
    pub hard_resync_budget: u32,
    /// Whole add-from-scratch cycles per field.
    pub add_attempts: u32,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 1_000,
            hard_resync_budget: 3,
            add_attempts: 2,
        }
    }
}

impl PhantomConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Maximum age of a confirmed alignment the fast path may trust.
    /// `None` trusts it until a structural mutation invalidates it.
    pub fast_path_ttl_ms: Option<u64>,
}

impl AlignmentConfig {
    pub fn fast_path_ttl(&self) -> Option<Duration> {
        self.fast_path_ttl_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocateConfig {
    pub search_inactive: bool,
    pub inactive_first: bool,
}

impl Default for LocateConfig {
    fn default() -> Self {
        Self {
            search_inactive: true,
            inactive_first: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_passes: u32,
    /// Consecutive failures within one pass before the pass stops early.
    pub failure_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_passes: 2,
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub verify: VerifyConfig,
    pub phantom: PhantomConfig,
    pub alignment: AlignmentConfig,
    pub locate: LocateConfig,
    pub retry: RetryConfig,
    /// Field failures in a row after which the activity is abandoned.
    pub abort_after_consecutive_failures: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            verify: VerifyConfig::default(),
            phantom: PhantomConfig::default(),
            alignment: AlignmentConfig::default(),
            locate: LocateConfig::default(),
            retry: RetryConfig::default(),
            abort_after_consecutive_failures: 5,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// File (or defaults), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FORMWRIGHT_*` overrides. Unrelated variables are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "FORMWRIGHT_GRACE_DELAY_MS" => self.phantom.grace_delay_ms = parse(key, value)?,
                "FORMWRIGHT_HARD_RESYNC_BUDGET" => {
                    self.phantom.hard_resync_budget = parse(key, value)?
                }
                "FORMWRIGHT_ADD_ATTEMPTS" => self.phantom.add_attempts = parse(key, value)?,
                "FORMWRIGHT_FAST_PATH_TTL_MS" => {
                    self.alignment.fast_path_ttl_ms = Some(parse(key, value)?)
                }
                "FORMWRIGHT_SEARCH_INACTIVE" => self.locate.search_inactive = parse(key, value)?,
                "FORMWRIGHT_INACTIVE_FIRST" => self.locate.inactive_first = parse(key, value)?,
                "FORMWRIGHT_RETRY_ENABLED" => self.retry.enabled = parse(key, value)?,
                "FORMWRIGHT_RETRY_MAX_PASSES" => self.retry.max_passes = parse(key, value)?,
                "FORMWRIGHT_ABORT_AFTER" => {
                    self.abort_after_consecutive_failures = parse(key, value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values that would disable a bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let steps = [
            ("verify.alignment", &self.verify.alignment),
            ("verify.section_create", &self.verify.section_create),
            ("verify.add_field", &self.verify.add_field),
            ("verify.binding", &self.verify.binding),
            ("verify.property_write", &self.verify.property_write),
            ("verify.shell_create", &self.verify.shell_create),
            ("verify.builder_open", &self.verify.builder_open),
            ("verify.reorder", &self.verify.reorder),
        ];
        for (name, step) in steps {
            if step.timeout_ms == 0 || step.poll_interval_ms == 0 || step.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: timeout_ms, poll_interval_ms and max_attempts must be non-zero"
                )));
            }
            if step.poll_interval_ms > step.timeout_ms {
                return Err(ConfigError::Invalid(format!(
                    "{name}: poll_interval_ms exceeds timeout_ms"
                )));
            }
        }
        if self.phantom.add_attempts == 0 {
            return Err(ConfigError::Invalid("phantom.add_attempts must be non-zero".into()));
        }
        if self.alignment.fast_path_ttl_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "alignment.fast_path_ttl_ms must be non-zero when set".into(),
            ));
        }
        if self.abort_after_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "abort_after_consecutive_failures must be non-zero".into(),
            ));
        }
        if self.retry.enabled && (self.retry.max_passes == 0 || self.retry.failure_threshold == 0) {
            return Err(ConfigError::Invalid(
                "retry.max_passes and retry.failure_threshold must be non-zero when enabled".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BuildConfig::default();
        config.validate().unwrap();
        assert_eq!(config.phantom.hard_resync_budget, 3);
        assert!(config.locate.search_inactive);
        assert!(!config.locate.inactive_first);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BuildConfig::from_toml_str(
            r#"
            abort_after_consecutive_failures = 7

            [phantom]
            grace_delay_ms = 250

            [verify.alignment]
            timeout_ms = 800
            poll_interval_ms = 50
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.abort_after_consecutive_failures, 7);
        assert_eq!(config.phantom.grace_delay_ms, 250);
        assert_eq!(config.phantom.add_attempts, 2);
        assert_eq!(config.verify.alignment.timeout_ms, 800);
        assert_eq!(config.verify.binding, VerifyConfig::default().binding);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = BuildConfig::from_toml_str("[phantom]\ngrace = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BuildConfig::default();
        config
            .apply_env([
                ("FORMWRIGHT_INACTIVE_FIRST", "true"),
                ("FORMWRIGHT_FAST_PATH_TTL_MS", "30000"),
                ("HOME", "/root"),
            ])
            .unwrap();
        assert!(config.locate.inactive_first);
        assert_eq!(config.alignment.fast_path_ttl(), Some(Duration::from_secs(30)));

        let err = config
            .apply_env([("FORMWRIGHT_ADD_ATTEMPTS", "many")])
            .unwrap_err();
        assert!(err.to_string().contains("FORMWRIGHT_ADD_ATTEMPTS"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = BuildConfig::default();
        config.verify.binding.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("verify.binding"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formwright.toml");
        std::fs::write(&path, "[retry]\nmax_passes = 4\n").unwrap();
        let config = BuildConfig::from_file(&path).unwrap();
        assert_eq!(config.retry.max_passes, 4);
        assert!(config.retry.enabled);
    }
}
