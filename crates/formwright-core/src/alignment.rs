//! Section alignment guard.
//!
//! Keeps the canvas on the section the next operation targets. A confirmed
//! alignment is trusted until the registry's section epoch moves (a section
//! was created or the registry was rebuilt) or the optional TTL runs out;
//! while trusted, `ensure_aligned` touches the surface not at all. The TTL
//! only shortens trust. It never replaces the re-prove step.

use std::time::Duration;

use async_trait::async_trait;
use formwright_surface::{EntityId, EntityKind, Property, Scope, Surface, SurfaceResult, TargetRef};
use tokio::time::Instant;

use crate::domain::counter;
use crate::obs;
use crate::phantom;
use crate::session::ActivitySession;
use crate::verify::{self, Outcome, TargetId, VerifiedAction};

#[derive(Debug, Clone)]
struct ConfirmedAlignment {
    section_id: EntityId,
    epoch: u64,
    at: Instant,
}

#[derive(Debug, Default)]
pub struct AlignmentGuard {
    target: Option<EntityId>,
    confirmed: Option<ConfirmedAlignment>,
    ttl: Option<Duration>,
}

impl AlignmentGuard {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            target: None,
            confirmed: None,
            ttl,
        }
    }

    /// Section the controller last asked for.
    pub fn target(&self) -> Option<&EntityId> {
        self.target.as_ref()
    }

    pub fn confirmed_section(&self) -> Option<&EntityId> {
        self.confirmed.as_ref().map(|c| &c.section_id)
    }

    pub fn invalidate(&mut self) {
        self.confirmed = None;
    }

    fn trusted(&self, section_id: &EntityId, epoch: u64) -> bool {
        let Some(c) = &self.confirmed else {
            return false;
        };
        let fresh = self.ttl.map_or(true, |ttl| c.at.elapsed() < ttl);
        &c.section_id == section_id && c.epoch == epoch && fresh
    }

    fn record(&mut self, section_id: &EntityId, epoch: u64) {
        self.confirmed = Some(ConfirmedAlignment {
            section_id: section_id.clone(),
            epoch,
            at: Instant::now(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aligned {
    pub section_id: EntityId,
    pub fast_path: bool,
    /// A hard resync was needed.
    pub escalated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlignmentError {
    #[error("canvas never showed section {section_id} after {attempts} attempts")]
    Unconfirmed {
        section_id: EntityId,
        attempts: u32,
        escalated: bool,
        last_error: Option<String>,
    },
}

impl AlignmentError {
    pub fn attempts(&self) -> u32 {
        match self {
            AlignmentError::Unconfirmed { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        match self {
            AlignmentError::Unconfirmed { last_error, .. } => last_error.clone(),
        }
    }
}

/// Select a section in the sidebar; proven by the canvas root's section id.
struct SelectSection<'a> {
    surface: &'a dyn Surface,
    section_id: &'a EntityId,
}

impl SelectSection<'_> {
    async fn canvas_shows_section(&self) -> SurfaceResult<Option<()>> {
        let shown = self
            .surface
            .read_value(&TargetRef::CanvasRoot, &Property::SectionId)
            .await?;
        Ok((shown.as_deref() == Some(self.section_id.as_str())).then_some(()))
    }
}

#[async_trait]
impl VerifiedAction for SelectSection<'_> {
    type Proof = ();

    fn kind(&self) -> &'static str {
        "select_section"
    }

    fn target(&self) -> String {
        self.section_id.to_string()
    }

    async fn precondition(&self) -> SurfaceResult<Option<()>> {
        self.canvas_shows_section().await
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface
            .select(&TargetRef::SectionItem(self.section_id.clone()))
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<()>> {
        self.canvas_shows_section().await
    }
}

/// Make sure the canvas displays `section_id`.
///
/// Exhausting the slow path escalates to one hard resync of the section list
/// followed by one more slow path. Failure after that is fatal for the
/// current field only.
pub async fn ensure_aligned(
    session: &mut ActivitySession<'_>,
    section_id: &EntityId,
) -> Result<Aligned, AlignmentError> {
    session.alignment.target = Some(section_id.clone());
    if session
        .alignment
        .trusted(section_id, session.registry.section_epoch())
    {
        session.ctx.incr(counter::ALIGN_FAST_PATH);
        return Ok(Aligned {
            section_id: section_id.clone(),
            fast_path: true,
            escalated: false,
        });
    }

    session.ctx.incr(counter::ALIGN_SLOW_PATH);
    let policy = session.config.verify.alignment.retry_policy();
    let action = SelectSection {
        surface: session.surface,
        section_id,
    };
    let first = verify::run(&action, &policy).await;
    session.record_attempt(&first.to_attempt("select_section", TargetId::Known(section_id.clone())));
    if first.is_confirmed() {
        mark_aligned(session, section_id);
        return Ok(Aligned {
            section_id: section_id.clone(),
            fast_path: false,
            escalated: false,
        });
    }

    let unconfirmed = |attempts, escalated, last_error| AlignmentError::Unconfirmed {
        section_id: section_id.clone(),
        attempts,
        escalated,
        last_error,
    };

    obs::emit_alignment_escalated(section_id, first.attempts());
    session.ctx.incr(counter::ALIGN_ESCALATIONS);
    match phantom::hard_resync(session, &Scope::Sections).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(unconfirmed(first.attempts(), false, first.last_error())),
        Err(e) => return Err(unconfirmed(first.attempts(), true, Some(e.to_string()))),
    }
    if !session
        .registry
        .known_ids(EntityKind::Section)
        .contains(section_id)
    {
        return Err(unconfirmed(
            first.attempts(),
            true,
            Some(format!("section {section_id} no longer rendered")),
        ));
    }

    let second = verify::run(&action, &policy).await;
    session.record_attempt(&second.to_attempt("select_section", TargetId::Known(section_id.clone())));
    let attempts = first.attempts() + second.attempts();
    match second {
        Outcome::Confirmed { .. } => {
            mark_aligned(session, section_id);
            Ok(Aligned {
                section_id: section_id.clone(),
                fast_path: false,
                escalated: true,
            })
        }
        other => Err(unconfirmed(attempts, true, other.last_error())),
    }
}

fn mark_aligned(session: &mut ActivitySession<'_>, section_id: &EntityId) {
    let epoch = session.registry.section_epoch();
    session.alignment.record(section_id, epoch);
    session.registry.set_aligned(section_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::domain::BuildContext;
    use formwright_surface::{FaultScript, SimulatedSurface};

    async fn session_with_sections<'a>(
        surface: &'a SimulatedSurface,
        config: &'a BuildConfig,
    ) -> ActivitySession<'a> {
        let mut session = ActivitySession::new(surface, config, BuildContext::new("CPC-01"));
        session.bootstrap().await.unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_is_fast_path_with_no_ui_calls() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        let config = BuildConfig::default();
        let mut session = session_with_sections(&surface, &config).await;

        let first = ensure_aligned(&mut session, &sid).await.unwrap();
        assert!(!first.fast_path);
        let before = surface.mutation_count();

        let second = ensure_aligned(&mut session, &sid).await.unwrap();
        assert!(second.fast_path);
        assert_eq!(surface.mutation_count(), before);
        assert_eq!(session.ctx.counters.get(counter::ALIGN_FAST_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_section_creation_invalidates_fast_path() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        let config = BuildConfig::default();
        let mut session = session_with_sections(&surface, &config).await;
        ensure_aligned(&mut session, &sid).await.unwrap();

        let other = surface.seed_section("Later");
        session
            .registry
            .register(crate::registry::Entity::observed(
                formwright_surface::EntityDescriptor::section(other, 1, Some("Later".into())),
            ))
            .unwrap();

        let again = ensure_aligned(&mut session, &sid).await.unwrap();
        assert!(!again.fast_path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_trust() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        let mut config = BuildConfig::default();
        config.alignment.fast_path_ttl_ms = Some(1_000);
        let mut session = session_with_sections(&surface, &config).await;
        ensure_aligned(&mut session, &sid).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let again = ensure_aligned(&mut session, &sid).await.unwrap();
        assert!(!again.fast_path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_selects_escalate_to_hard_resync() {
        let config = BuildConfig::default();
        let attempts = config.verify.alignment.max_attempts;
        let surface = SimulatedSurface::with_faults(FaultScript::new().ignore_selects(attempts));
        let sid = surface.seed_section("Intro");
        let mut session = session_with_sections(&surface, &config).await;

        let aligned = ensure_aligned(&mut session, &sid).await.unwrap();
        assert!(aligned.escalated);
        assert_eq!(session.ctx.counters.get(counter::HARD_RESYNCS), 1);
        assert_eq!(session.alignment.confirmed_section(), Some(&sid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_misalignment_is_an_error() {
        let surface = SimulatedSurface::with_faults(FaultScript::new().ignore_selects(100));
        let sid = surface.seed_section("Intro");
        let config = BuildConfig::default();
        let mut session = session_with_sections(&surface, &config).await;

        let err = ensure_aligned(&mut session, &sid).await.unwrap_err();
        assert!(matches!(err, AlignmentError::Unconfirmed { escalated: true, .. }));
        assert_eq!(err.attempts(), 2 * config.verify.alignment.max_attempts);
    }
}
