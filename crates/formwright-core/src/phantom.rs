//! Phantom recovery for structural "add field" actions.
//!
//! ```text
//! Idle -> Confirmed                                   (immediate re-prove held)
//! Idle -> Dropped -> LateCandidateCheck -> Recovered  (confirmation lagged)
//!                                       -> HardResync -> Recovered
//!                                                     -> Unrecoverable
//! ```
//!
//! Ambiguity is never resolved by picking a candidate: two plausible new
//! fields always lead to a hard resync, and a resync that still sees two
//! ends in `Unrecoverable`.

use std::collections::HashSet;

use async_trait::async_trait;
use formwright_surface::{
    DropPosition, EntityDescriptor, EntityId, EntityKind, Scope, Snapshot, Surface, SurfaceError,
    SurfaceResult, TargetRef,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{counter, RegistryError, SkipReason};
use crate::obs;
use crate::registry::{Entity, RegistryDiff};
use crate::session::ActivitySession;
use crate::verify::{self, Outcome, TargetId, VerifiedAction};

/// Why an add attempt could not produce a confirmed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecoverableCause {
    /// A resync proved no new field exists.
    NotCreated,
    /// More than one new field; none can be chosen.
    Ambiguous,
    /// The activity's hard resync budget is spent.
    BudgetExhausted,
    /// The drop gesture itself was refused, or the surface could not be read.
    DropFailed,
}

impl UnrecoverableCause {
    pub fn reason(self) -> SkipReason {
        match self {
            UnrecoverableCause::NotCreated => SkipReason::NotCreated,
            UnrecoverableCause::Ambiguous => SkipReason::AmbiguousCandidates,
            UnrecoverableCause::BudgetExhausted => SkipReason::ResyncBudgetExhausted,
            UnrecoverableCause::DropFailed => SkipReason::DropFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum PhantomState {
    Idle,
    Confirmed(EntityId),
    Dropped,
    LateCandidateCheck,
    HardResync,
    Recovered(EntityId),
    Unrecoverable(UnrecoverableCause),
}

impl PhantomState {
    pub fn name(&self) -> &'static str {
        match self {
            PhantomState::Idle => "idle",
            PhantomState::Confirmed(_) => "confirmed",
            PhantomState::Dropped => "dropped",
            PhantomState::LateCandidateCheck => "late_candidate_check",
            PhantomState::HardResync => "hard_resync",
            PhantomState::Recovered(_) => "recovered",
            PhantomState::Unrecoverable(_) => "unrecoverable",
        }
    }
}

/// Hard resyncs allowed per activity.
#[derive(Debug, Clone)]
pub struct ResyncBudget {
    limit: u32,
    used: u32,
}

impl ResyncBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResyncError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Rebuild the registry for `scope` from a fresh observation.
///
/// Returns `Ok(None)` when the activity's budget is already spent. Any
/// confirmed alignment is dropped.
pub async fn hard_resync(
    session: &mut ActivitySession<'_>,
    scope: &Scope,
) -> Result<Option<RegistryDiff>, ResyncError> {
    if !session.resync.try_consume() {
        warn!(code = %session.ctx.code, scope = ?scope, "hard resync budget exhausted");
        return Ok(None);
    }
    session.ctx.incr(counter::HARD_RESYNCS);
    session.alignment.invalidate();
    let observed = session.surface.observe(scope).await?;
    let diff = session.registry.rebuild_from_observation(&observed)?;
    info!(
        code = %session.ctx.code,
        scope = ?scope,
        new = diff.new.len(),
        missing = diff.missing.len(),
        "hard resync complete"
    );
    Ok(Some(diff))
}

/// One field to add.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub section_id: EntityId,
    pub type_key: String,
    pub position: DropPosition,
    pub spec_index: usize,
}

/// Terminal state of one add attempt plus the path that led there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReport {
    pub state: PhantomState,
    pub trace: Vec<PhantomState>,
    pub drag_attempts: u32,
    /// Unregistered candidates seen by the late check.
    pub late_candidates: usize,
    pub last_error: Option<String>,
}

impl AddReport {
    pub fn field_id(&self) -> Option<&EntityId> {
        match &self.state {
            PhantomState::Confirmed(id) | PhantomState::Recovered(id) => Some(id),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<UnrecoverableCause> {
        match self.state {
            PhantomState::Unrecoverable(cause) => Some(cause),
            _ => None,
        }
    }
}

struct Machine {
    spec_index: usize,
    state: PhantomState,
    trace: Vec<PhantomState>,
    drag_attempts: u32,
    late_candidates: usize,
    last_error: Option<String>,
}

impl Machine {
    fn new(spec_index: usize) -> Self {
        Self {
            spec_index,
            state: PhantomState::Idle,
            trace: vec![PhantomState::Idle],
            drag_attempts: 0,
            late_candidates: 0,
            last_error: None,
        }
    }

    fn to(&mut self, next: PhantomState) {
        obs::emit_phantom_transition(self.spec_index, self.state.name(), next.name());
        self.state = next.clone();
        self.trace.push(next);
    }

    fn finish(mut self, terminal: PhantomState) -> AddReport {
        self.to(terminal);
        AddReport {
            state: self.state,
            trace: self.trace,
            drag_attempts: self.drag_attempts,
            late_candidates: self.late_candidates,
            last_error: self.last_error,
        }
    }
}

/// Drag a palette card into a section; proven by exactly one new field.
struct DropField<'a> {
    surface: &'a dyn Surface,
    request: &'a AddRequest,
    excluded: &'a HashSet<EntityId>,
}

#[async_trait]
impl VerifiedAction for DropField<'_> {
    type Proof = EntityDescriptor;

    fn kind(&self) -> &'static str {
        "add_field"
    }

    fn target(&self) -> String {
        format!("{} -> {}", self.request.type_key, self.request.section_id)
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface
            .drag(
                &TargetRef::PaletteCard(self.request.type_key.clone()),
                &TargetRef::DropZone {
                    section_id: self.request.section_id.clone(),
                    position: self.request.position.clone(),
                },
            )
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<EntityDescriptor>> {
        let observed = self
            .surface
            .observe(&Scope::Section(self.request.section_id.clone()))
            .await?;
        let mut candidates = new_candidates(&observed, self.excluded, &self.request.type_key);
        if candidates.len() == 1 {
            return Ok(candidates.pop());
        }
        Ok(None)
    }
}

fn new_candidates(
    observed: &Snapshot,
    excluded: &HashSet<EntityId>,
    type_key: &str,
) -> Vec<EntityDescriptor> {
    observed
        .entities
        .iter()
        .filter(|e| e.kind == EntityKind::Field && !excluded.contains(&e.id))
        .filter(|e| type_matches(e.type_key.as_deref(), type_key))
        .cloned()
        .collect()
}

/// An entity whose type the surface did not report may still be the drop.
fn type_matches(observed: Option<&str>, wanted: &str) -> bool {
    observed.map_or(true, |k| k == wanted)
}

/// Ordinal a field dropped at `position` should land on.
pub fn expected_ordinal(before: &Snapshot, position: &DropPosition) -> u32 {
    match position {
        DropPosition::Top => 0,
        DropPosition::Bottom => before.len() as u32,
        DropPosition::After(anchor) => before
            .get(anchor)
            .map(|e| e.ordinal + 1)
            .unwrap_or(before.len() as u32),
    }
}

/// Run one add attempt through the phantom state machine.
///
/// Registers the field on `Confirmed` or `Recovered`. Performs at most one
/// hard resync.
pub async fn attempt_add(session: &mut ActivitySession<'_>, request: &AddRequest) -> AddReport {
    let mut machine = Machine::new(request.spec_index);
    let scope = Scope::Section(request.section_id.clone());

    let before = match session.surface.observe(&scope).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            machine.last_error = Some(e.to_string());
            return machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::DropFailed));
        }
    };
    let mut excluded = session.registry.known_ids(EntityKind::Field).clone();
    excluded.extend(before.ids());
    let ordinal = expected_ordinal(&before, &request.position);

    let action = DropField {
        surface: session.surface,
        request,
        excluded: &excluded,
    };
    let policy = session.config.verify.add_field.ambiguous_policy();
    let outcome = verify::run(&action, &policy).await;
    machine.drag_attempts = outcome.attempts();
    session.ctx.add(counter::DRAG_ATTEMPTS, u64::from(outcome.attempts()));
    session.record_attempt(&outcome.to_attempt("add_field", TargetId::Pending));

    match outcome {
        Outcome::Confirmed { proof, .. } => {
            let id = proof.id.clone();
            match session.registry.register(Entity::for_spec(proof, request.spec_index)) {
                Ok(_) => return machine.finish(PhantomState::Confirmed(id)),
                Err(e) => {
                    // Belief and surface disagree; only a resync can settle it.
                    machine.last_error = Some(e.to_string());
                    machine.to(PhantomState::Dropped);
                }
            }
        }
        Outcome::Exhausted { last_error, .. } => {
            machine.last_error = last_error;
            return machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::DropFailed));
        }
        Outcome::Ambiguous { .. } => {
            session.ctx.incr(counter::PHANTOM_TIMEOUTS);
            machine.to(PhantomState::Dropped);

            tokio::time::sleep(session.config.phantom.grace_delay()).await;
            machine.to(PhantomState::LateCandidateCheck);
            match session.surface.observe(&scope).await {
                Ok(observed) => {
                    let candidates = new_candidates(&observed, &excluded, &request.type_key);
                    machine.late_candidates = candidates.len();
                    if let [only] = candidates.as_slice() {
                        if only.ordinal == ordinal {
                            let id = only.id.clone();
                            let entity = Entity::for_spec(only.clone(), request.spec_index);
                            if session.registry.register(entity).is_ok() {
                                session.ctx.incr(counter::LATE_CANDIDATES);
                                return machine.finish(PhantomState::Recovered(id));
                            }
                        }
                    }
                }
                Err(e) => machine.last_error = Some(e.to_string()),
            }
        }
    }

    machine.to(PhantomState::HardResync);
    match hard_resync(session, &scope).await {
        Ok(None) => machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::BudgetExhausted)),
        Err(e) => {
            machine.last_error = Some(e.to_string());
            machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::DropFailed))
        }
        Ok(Some(_)) => {
            // Fields someone else added during the attempt are adopted by the
            // resync but never taken for this drop.
            let before_ids = before.ids();
            let created: Vec<EntityId> = session
                .registry
                .fields_of(&request.section_id)
                .iter()
                .filter(|f| !before_ids.contains(&f.id) && f.spec_index.is_none())
                .filter(|f| type_matches(f.type_key.as_deref(), &request.type_key))
                .map(|f| f.id.clone())
                .collect();
            match created.as_slice() {
                [] => machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::NotCreated)),
                [id] => {
                    session.registry.tag_spec_index(id, request.spec_index);
                    machine.finish(PhantomState::Recovered(id.clone()))
                }
                many => {
                    warn!(
                        spec_index = request.spec_index,
                        candidates = many.len(),
                        "resync left more than one new field; not choosing"
                    );
                    machine.finish(PhantomState::Unrecoverable(UnrecoverableCause::Ambiguous))
                }
            }
        }
    }
}
