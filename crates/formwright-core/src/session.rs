//! Per-activity working state.
//!
//! A session owns the registry scope, alignment guard, resync budget and
//! build context for exactly one activity. Components receive it explicitly;
//! nothing here outlives the activity.

use formwright_surface::{EntityKind, Scope, Surface, SurfaceError};

use crate::alignment::AlignmentGuard;
use crate::config::BuildConfig;
use crate::domain::{BuildContext, RegistryError};
use crate::phantom::ResyncBudget;
use crate::registry::{Entity, Registry};
use crate::verify::Attempt;

pub struct ActivitySession<'a> {
    pub surface: &'a dyn Surface,
    pub config: &'a BuildConfig,
    pub registry: Registry,
    pub alignment: AlignmentGuard,
    pub resync: ResyncBudget,
    pub ctx: BuildContext,
}

/// Seeding the registry from the opened builder failed.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl<'a> ActivitySession<'a> {
    pub fn new(surface: &'a dyn Surface, config: &'a BuildConfig, ctx: BuildContext) -> Self {
        Self {
            surface,
            config,
            registry: Registry::new(),
            alignment: AlignmentGuard::new(config.alignment.fast_path_ttl()),
            resync: ResyncBudget::new(config.phantom.hard_resync_budget),
            ctx,
        }
    }

    /// Register whatever the freshly opened builder already renders.
    pub async fn bootstrap(&mut self) -> Result<usize, BootstrapError> {
        let sections = self.surface.observe(&Scope::Sections).await?;
        for desc in sections.entities.iter().filter(|e| e.kind == EntityKind::Section) {
            self.registry.register(Entity::observed(desc.clone()))?;
        }
        for desc in &sections.entities {
            let fields = self.surface.observe(&Scope::Section(desc.id.clone())).await?;
            for field in fields.entities {
                self.registry.register(Entity::observed(field))?;
            }
        }
        let count = self.registry.known_ids(EntityKind::Section).len()
            + self.registry.known_ids(EntityKind::Field).len();
        tracing::debug!(code = %self.ctx.code, entities = count, "registry bootstrapped");
        Ok(count)
    }

    /// Feed a protocol cycle into the counters.
    pub fn record_attempt(&mut self, attempt: &Attempt) {
        self.ctx.incr(&attempt.counter_key());
    }

    pub fn into_context(self) -> BuildContext {
        self.ctx
    }
}
