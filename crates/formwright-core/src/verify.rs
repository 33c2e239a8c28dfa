//! Prove, act, re-prove.
//!
//! Every state-changing interaction with the surface goes through [`run`]:
//!
//! 1. evaluate the precondition; if it already holds, confirm without acting
//! 2. perform exactly one mutating gesture
//! 3. poll the expectation until it holds or the timeout passes, re-resolving
//!    the target on every poll
//! 4. on timeout, either retry from step 2 or hand back `Ambiguous`
//!
//! Nothing is treated as done without passing step 3.

use std::time::Duration;

use async_trait::async_trait;
use formwright_surface::{EntityId, SurfaceError, SurfaceResult};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// One verifiable interaction.
///
/// Implementations hold target *references*, never element handles: each
/// call to `expectation` observes the surface afresh.
#[async_trait]
pub trait VerifiedAction: Send + Sync {
    /// What the caller receives once the expectation holds.
    type Proof: Send;

    /// Short machine name, e.g. `"select_section"`.
    fn kind(&self) -> &'static str;

    /// Human-readable target, for logs.
    fn target(&self) -> String;

    /// Returns a proof when the desired state already holds.
    async fn precondition(&self) -> SurfaceResult<Option<Self::Proof>> {
        Ok(None)
    }

    async fn act(&self) -> SurfaceResult<()>;

    /// Returns a proof once the desired state is observed.
    async fn expectation(&self) -> SurfaceResult<Option<Self::Proof>>;
}

/// What to do when the expectation does not hold within the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Act again, up to `max_attempts`.
    Retry,
    /// Stop and let the caller resolve the outcome.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub on_timeout: TimeoutPolicy,
}

impl VerifyPolicy {
    pub fn retry(timeout: Duration, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            poll_interval,
            max_attempts,
            on_timeout: TimeoutPolicy::Retry,
        }
    }

    /// A single act whose unconfirmed result is handed back as `Ambiguous`.
    pub fn ambiguous(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            max_attempts: 1,
            on_timeout: TimeoutPolicy::Ambiguous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<P> {
    Confirmed {
        proof: P,
        /// Acts performed; zero when the precondition already held.
        attempts: u32,
        fast_path: bool,
    },
    /// The act was delivered but its effect could not be proven.
    Ambiguous { attempts: u32 },
    /// Every attempt failed or timed out.
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
}

impl<P> Outcome<P> {
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Confirmed { attempts, .. }
            | Outcome::Ambiguous { attempts }
            | Outcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed { .. })
    }

    pub fn proof(self) -> Option<P> {
        match self {
            Outcome::Confirmed { proof, .. } => Some(proof),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        match self {
            Outcome::Exhausted { last_error, .. } => last_error.clone(),
            _ => None,
        }
    }

    /// Summarise as an [`Attempt`] record.
    pub fn to_attempt(&self, target_kind: &'static str, target_id: TargetId) -> Attempt {
        let outcome = match self {
            Outcome::Confirmed { .. } => AttemptOutcome::Confirmed,
            Outcome::Ambiguous { .. } => AttemptOutcome::Phantom,
            Outcome::Exhausted { .. } => AttemptOutcome::Failed,
        };
        Attempt {
            target_kind,
            target_id,
            outcome,
            count: self.attempts(),
        }
    }
}

/// Identity of an attempt's target. Pending until confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetId {
    Pending,
    Known(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Confirmed,
    Phantom,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Confirmed => "confirmed",
            AttemptOutcome::Phantom => "phantom",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// Transient record of one protocol cycle. Lives only for the build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub target_kind: &'static str,
    pub target_id: TargetId,
    pub outcome: AttemptOutcome,
    pub count: u32,
}

impl Attempt {
    /// Counter key, e.g. `add_field.phantom`.
    pub fn counter_key(&self) -> String {
        format!("{}.{}", self.target_kind, self.outcome.as_str())
    }
}

enum PollEnd<P> {
    Proven(P),
    TimedOut(Option<String>),
    Broken(String),
}

/// Run one action under the verification discipline.
pub async fn run<A>(action: &A, policy: &VerifyPolicy) -> Outcome<A::Proof>
where
    A: VerifiedAction + ?Sized,
{
    match action.precondition().await {
        Ok(Some(proof)) => {
            debug!(kind = action.kind(), target = %action.target(), "precondition holds; no action");
            return Outcome::Confirmed {
                proof,
                attempts: 0,
                fast_path: true,
            };
        }
        Ok(None) => {}
        Err(e) => {
            debug!(kind = action.kind(), target = %action.target(), error = %e, "precondition unreadable");
        }
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;

        if let Err(e) = action.act().await {
            warn!(
                kind = action.kind(),
                target = %action.target(),
                attempt = attempts,
                error = %e,
                "action failed"
            );
            let fatal = matches!(e, SurfaceError::Unavailable(_));
            last_error = Some(e.to_string());
            if fatal {
                break;
            }
            continue;
        }

        match poll_expectation(action, policy).await {
            PollEnd::Proven(proof) => {
                debug!(kind = action.kind(), target = %action.target(), attempts, "confirmed");
                return Outcome::Confirmed {
                    proof,
                    attempts,
                    fast_path: false,
                };
            }
            PollEnd::TimedOut(err) => {
                debug!(kind = action.kind(), target = %action.target(), attempt = attempts, "re-prove timed out");
                last_error = err.or(last_error);
                if policy.on_timeout == TimeoutPolicy::Ambiguous {
                    return Outcome::Ambiguous { attempts };
                }
            }
            PollEnd::Broken(err) => {
                warn!(kind = action.kind(), target = %action.target(), error = %err, "re-prove failed");
                last_error = Some(err);
            }
        }
    }

    Outcome::Exhausted {
        attempts,
        last_error,
    }
}

async fn poll_expectation<A>(action: &A, policy: &VerifyPolicy) -> PollEnd<A::Proof>
where
    A: VerifiedAction + ?Sized,
{
    let deadline = Instant::now() + policy.timeout;
    let mut last_transient = None;

    loop {
        match action.expectation().await {
            Ok(Some(proof)) => return PollEnd::Proven(proof),
            Ok(None) => {}
            // The target re-rendered under us; resolve it again next cycle.
            Err(e) if e.is_transient() => last_transient = Some(e.to_string()),
            Err(e) => return PollEnd::Broken(e.to_string()),
        }

        let now = Instant::now();
        if now >= deadline {
            return PollEnd::TimedOut(last_transient);
        }
        tokio::time::sleep(policy.poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwright_surface::TargetRef;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Becomes observable `lag` after the n-th act; acts below `fail_acts` error.
    struct Scripted {
        already: bool,
        confirm_on_act: u32,
        lag: Duration,
        fail_acts: u32,
        acts: AtomicU32,
        acted_at: std::sync::Mutex<Option<Instant>>,
        transient_polls: AtomicU32,
    }

    impl Scripted {
        fn new(confirm_on_act: u32) -> Self {
            Self {
                already: false,
                confirm_on_act,
                lag: Duration::ZERO,
                fail_acts: 0,
                acts: AtomicU32::new(0),
                acted_at: std::sync::Mutex::new(None),
                transient_polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VerifiedAction for Scripted {
        type Proof = u32;

        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn target(&self) -> String {
            "test".to_string()
        }

        async fn precondition(&self) -> SurfaceResult<Option<u32>> {
            Ok(self.already.then_some(0))
        }

        async fn act(&self) -> SurfaceResult<()> {
            let n = self.acts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_acts {
                return Err(SurfaceError::StaleReference {
                    target: TargetRef::CanvasRoot,
                });
            }
            if n == self.confirm_on_act {
                *self.acted_at.lock().unwrap() = Some(Instant::now());
            }
            Ok(())
        }

        async fn expectation(&self) -> SurfaceResult<Option<u32>> {
            if self.transient_polls.load(Ordering::SeqCst) > 0 {
                self.transient_polls.fetch_sub(1, Ordering::SeqCst);
                return Err(SurfaceError::ElementNotFound {
                    target: TargetRef::CanvasRoot,
                });
            }
            let ready = self
                .acted_at
                .lock()
                .unwrap()
                .is_some_and(|t| Instant::now() >= t + self.lag);
            Ok(ready.then(|| self.acts.load(Ordering::SeqCst)))
        }
    }

    fn policy() -> VerifyPolicy {
        VerifyPolicy::retry(Duration::from_millis(500), Duration::from_millis(50), 3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_precondition_skips_action() {
        let mut action = Scripted::new(1);
        action.already = true;
        let outcome = run(&action, &policy()).await;
        assert!(matches!(outcome, Outcome::Confirmed { attempts: 0, fast_path: true, .. }));
        assert_eq!(action.acts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_after_lagged_render() {
        let mut action = Scripted::new(1);
        action.lag = Duration::from_millis(200);
        let outcome = run(&action, &policy()).await;
        assert_eq!(
            outcome,
            Outcome::Confirmed {
                proof: 1,
                attempts: 1,
                fast_path: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_acts_again_after_timeout() {
        let action = Scripted::new(2);
        let outcome = run(&action, &policy()).await;
        assert!(matches!(outcome, Outcome::Confirmed { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_policy_hands_back_after_one_act() {
        let action = Scripted::new(99);
        let policy = VerifyPolicy::ambiguous(Duration::from_millis(300), Duration::from_millis(50));
        let outcome = run(&action, &policy).await;
        assert_eq!(outcome, Outcome::Ambiguous { attempts: 1 });
        assert_eq!(action.acts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_records_last_error() {
        let mut action = Scripted::new(99);
        action.fail_acts = 3;
        let outcome = run(&action, &policy()).await;
        assert_eq!(outcome.attempts(), 3);
        assert!(outcome.last_error().unwrap().contains("stale"));
        assert_eq!(
            outcome.to_attempt("scripted", TargetId::Pending).outcome,
            AttemptOutcome::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_are_tolerated() {
        let action = Scripted::new(1);
        action.transient_polls.store(3, Ordering::SeqCst);
        let outcome = run(&action, &policy()).await;
        assert!(matches!(outcome, Outcome::Confirmed { attempts: 1, .. }));
    }

    #[test]
    fn test_attempt_counter_key() {
        let attempt = Outcome::<()>::Ambiguous { attempts: 1 }
            .to_attempt("add_field", TargetId::Pending);
        assert_eq!(attempt.counter_key(), "add_field.phantom");
    }
}
