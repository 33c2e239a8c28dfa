//! Build controller.
//!
//! Per activity: locate, decide create-vs-skip, create the shell, open the
//! builder, then build sections and fields in specification order through
//! the alignment guard and the phantom-guarded add. Field failures are
//! recorded and skipped; only a lost structural precondition fails the
//! activity; only an empty input fails the run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use formwright_surface::{
    ActivityCatalog, DropPosition, EntityDescriptor, EntityId, EntityKind, Property, Scope,
    ShellRequest, Snapshot, Surface, SurfaceResult, TargetRef, TemplateMatch, TemplateStatus,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alignment;
use crate::config::BuildConfig;
use crate::configure::{BindField, ContentConfigurator, PropertyConfigurator};
use crate::domain::{
    counter, ActivitySpec, ActivityStatus, ActivitySummary, BuildContext, BuildError,
    FailureKind, FailureRecord, PlannedField, RunReport, SectionSpec, SkipReason,
};
use crate::obs::{self, ActivitySpan};
use crate::phantom::{self, AddRequest, UnrecoverableCause};
use crate::registry::Entity;
use crate::session::ActivitySession;
use crate::sink::{SummarySink, TracingSummarySink};
use crate::verify::{self, Outcome, TargetId, VerifiedAction};

pub struct BuildController {
    surface: Arc<dyn Surface>,
    catalog: Arc<dyn ActivityCatalog>,
    configurator: Arc<dyn ContentConfigurator>,
    sink: Arc<dyn SummarySink>,
    config: BuildConfig,
}

impl BuildController {
    pub fn new(
        surface: Arc<dyn Surface>,
        catalog: Arc<dyn ActivityCatalog>,
        config: BuildConfig,
    ) -> Self {
        Self {
            surface,
            catalog,
            configurator: Arc::new(PropertyConfigurator::default()),
            sink: Arc::new(TracingSummarySink),
            config,
        }
    }

    pub fn with_configurator(mut self, configurator: Arc<dyn ContentConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build every specification in order.
    ///
    /// Fails only when there is nothing to build or the config is invalid;
    /// every per-activity outcome is in the report.
    pub async fn run(&self, specs: &[ActivitySpec]) -> Result<RunReport, BuildError> {
        if specs.is_empty() {
            return Err(BuildError::NoSpecifications);
        }
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, activities = specs.len(), "build run started");

        let mut activities = Vec::with_capacity(specs.len());
        for spec in specs {
            let summary = self.build_activity(run_id, spec).await;
            self.sink.emit(&summary);
            activities.push(summary);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            activities,
        };
        info!(
            run_id = %run_id,
            completed = report.count(ActivityStatus::Completed),
            skipped = report.count(ActivityStatus::Skipped),
            failed = report.count(ActivityStatus::Failed),
            "build run finished"
        );
        Ok(report)
    }

    /// Build one activity and close its context into a summary.
    pub async fn build_activity(&self, run_id: Uuid, spec: &ActivitySpec) -> ActivitySummary {
        let _span = ActivitySpan::enter(&run_id.to_string(), &spec.code);
        obs::emit_activity_started(&spec.code, spec.field_count());
        let digest = spec.digest().unwrap_or_else(|e| {
            warn!(code = %spec.code, error = %e, "spec digest unavailable");
            String::new()
        });

        let mut ctx = BuildContext::new(&spec.code);
        let phase = Instant::now();
        let located = self.locate(&spec.code, &mut ctx).await;
        obs::warn_if_slow(&spec.code, "locate", phase.elapsed());

        let ctx = match located {
            Err(e) => {
                warn!(code = %spec.code, error = %e, "catalog search failed");
                ctx.finish(ActivityStatus::Failed, Some(SkipReason::CatalogUnavailable));
                ctx
            }
            Ok(Some(found)) if found.locked => {
                info!(code = %spec.code, template = %found.template_id, "template locked; skipping");
                ctx.finish(ActivityStatus::Skipped, Some(SkipReason::LockedRequiresRevision));
                ctx
            }
            Ok(Some(found)) => {
                info!(code = %spec.code, template = %found.template_id, "template exists; skipping");
                ctx.finish(ActivityStatus::Skipped, Some(SkipReason::AlreadyExists));
                ctx
            }
            Ok(None) => self.create_and_build(spec, ctx).await,
        };

        let summary = ActivitySummary::from_context(run_id, ctx, digest);
        obs::emit_activity_finished(
            &summary.code,
            summary.status,
            summary.reason,
            summary.elapsed_ms,
            summary.failures.len(),
        );
        summary
    }

    async fn locate(
        &self,
        code: &str,
        ctx: &mut BuildContext,
    ) -> SurfaceResult<Option<TemplateMatch>> {
        let order: &[TemplateStatus] = match (
            self.config.locate.search_inactive,
            self.config.locate.inactive_first,
        ) {
            (false, _) => &[TemplateStatus::Active],
            (true, false) => &[TemplateStatus::Active, TemplateStatus::Inactive],
            (true, true) => &[TemplateStatus::Inactive, TemplateStatus::Active],
        };
        for status in order {
            ctx.incr(counter::CATALOG_SEARCHES);
            if let Some(found) = self.catalog.find(code, *status).await? {
                debug!(code, status = ?status, "template found");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn create_and_build(&self, spec: &ActivitySpec, mut ctx: BuildContext) -> BuildContext {
        let phase = Instant::now();
        let create = CreateShell {
            catalog: self.catalog.as_ref(),
            request: ShellRequest {
                code: spec.code.clone(),
                title: spec.title.clone(),
                category: spec.category.clone(),
            },
        };
        let template = match verify::run(&create, &self.config.verify.shell_create.retry_policy()).await {
            Outcome::Confirmed { proof, .. } => proof,
            other => {
                warn!(code = %spec.code, error = ?other.last_error(), "activity shell not created");
                ctx.finish(ActivityStatus::Failed, Some(SkipReason::ShellCreationFailed));
                return ctx;
            }
        };

        let open = OpenBuilder {
            catalog: self.catalog.as_ref(),
            surface: self.surface.as_ref(),
            template: &template,
        };
        let opened = verify::run(&open, &self.config.verify.builder_open.retry_policy()).await;
        if !opened.is_confirmed() {
            warn!(code = %spec.code, error = ?opened.last_error(), "builder did not open");
            ctx.finish(ActivityStatus::Failed, Some(SkipReason::BuilderNotOpened));
            return ctx;
        }
        obs::warn_if_slow(&spec.code, "create", phase.elapsed());

        let mut session = ActivitySession::new(self.surface.as_ref(), &self.config, ctx);
        if let Err(e) = session.bootstrap().await {
            warn!(code = %spec.code, error = %e, "builder state unreadable");
            session
                .ctx
                .finish(ActivityStatus::Failed, Some(SkipReason::BuilderNotOpened));
            return session.into_context();
        }

        let phase = Instant::now();
        self.build_structure(&mut session, spec).await;
        obs::warn_if_slow(&spec.code, "build", phase.elapsed());

        if self.config.retry.enabled && !session.ctx.is_finished() {
            let phase = Instant::now();
            self.retry_failures(&mut session, spec).await;
            obs::warn_if_slow(&spec.code, "retry", phase.elapsed());
        }
        session.into_context()
    }

    async fn build_structure(&self, session: &mut ActivitySession<'_>, spec: &ActivitySpec) {
        let planned = spec.planned_fields();
        let mut consecutive = 0u32;

        for (section_index, section) in spec.sections.iter().enumerate() {
            let section_id = match self.ensure_section(session, section).await {
                Ok(id) => id,
                Err(error) => {
                    warn!(code = %spec.code, section = %section.title, error = ?error, "section not established");
                    session
                        .ctx
                        .finish(ActivityStatus::Failed, Some(SkipReason::SectionCreationFailed));
                    mark_not_attempted(
                        &mut session.ctx,
                        planned.iter().filter(|p| p.section_index >= section_index),
                    );
                    return;
                }
            };

            for p in planned.iter().filter(|p| p.section_index == section_index) {
                let failures = self.place_field(session, &section_id, p).await;
                if failures.is_empty() {
                    consecutive = 0;
                    continue;
                }
                for record in failures {
                    session.ctx.record_failure(record);
                }
                consecutive += 1;
                if consecutive >= self.config.abort_after_consecutive_failures {
                    warn!(code = %spec.code, consecutive, "surface unstable; abandoning activity");
                    session
                        .ctx
                        .finish(ActivityStatus::Failed, Some(SkipReason::ConsecutiveFailures));
                    mark_not_attempted(
                        &mut session.ctx,
                        planned.iter().filter(|q| q.spec_index > p.spec_index),
                    );
                    return;
                }
            }
        }
    }

    /// Find the section by title or create it, returning its id.
    async fn ensure_section(
        &self,
        session: &mut ActivitySession<'_>,
        section: &SectionSpec,
    ) -> Result<EntityId, Option<String>> {
        if let Some(existing) = session.registry.section_by_title(&section.title) {
            return Ok(existing.id.clone());
        }

        let before = session
            .surface
            .observe(&Scope::Sections)
            .await
            .map_err(|e| Some(e.to_string()))?;
        let mut excluded = session.registry.known_ids(EntityKind::Section).clone();
        excluded.extend(before.ids());

        let policy = self.config.verify.section_create.retry_policy();
        let create = CreateSection {
            surface: session.surface,
            excluded,
        };
        let outcome = verify::run(&create, &policy).await;
        session.record_attempt(&outcome.to_attempt("create_section", TargetId::Pending));
        let desc = match outcome {
            Outcome::Confirmed { proof, .. } => proof,
            other => return Err(other.last_error()),
        };
        let id = desc.id.clone();
        session
            .registry
            .register(Entity::observed(desc))
            .map_err(|e| Some(e.to_string()))?;
        session.ctx.incr(counter::SECTIONS_CREATED);

        let rename = RenameSection {
            surface: session.surface,
            section_id: &id,
            title: &section.title,
        };
        let renamed = verify::run(&rename, &policy).await;
        if !renamed.is_confirmed() {
            return Err(renamed.last_error());
        }
        session.registry.set_section_title(&id, &section.title);
        info!(section = %section.title, id = %id, "section created");
        Ok(id)
    }

    /// Where the next drop for `spec_index` should land.
    fn drop_position(
        session: &ActivitySession<'_>,
        section_id: &EntityId,
        spec_index: usize,
    ) -> DropPosition {
        if let Some(anchor) = session.registry.anchor_for(section_id, spec_index) {
            DropPosition::After(anchor.id.clone())
        } else if session.registry.has_later_field(section_id, spec_index) {
            DropPosition::Top
        } else {
            DropPosition::Bottom
        }
    }

    /// Align, add, order, bind and configure one field. Returns its failures.
    async fn place_field(
        &self,
        session: &mut ActivitySession<'_>,
        section_id: &EntityId,
        p: &PlannedField<'_>,
    ) -> Vec<FailureRecord> {
        let fail = |kind, reason| {
            FailureRecord::new(kind, reason, p.spec_index, p.section.title.as_str(), p.field.type_key.as_str())
        };

        let mut field_id = None;
        let mut last = None;
        for cycle in 1..=self.config.phantom.add_attempts {
            if let Err(e) = alignment::ensure_aligned(session, section_id).await {
                return vec![fail(FailureKind::Align, SkipReason::AlignmentFailed)
                    .with_attempts(e.attempts())
                    .with_error(e.last_error())];
            }

            let request = AddRequest {
                section_id: section_id.clone(),
                type_key: p.field.type_key.clone(),
                position: Self::drop_position(session, section_id, p.spec_index),
                spec_index: p.spec_index,
            };
            let report = phantom::attempt_add(session, &request).await;
            if let Some(id) = report.field_id() {
                field_id = Some(id.clone());
                break;
            }

            let cause = report.cause().unwrap_or(UnrecoverableCause::DropFailed);
            last = Some(
                fail(FailureKind::Add, cause.reason())
                    .with_attempts(cycle)
                    .with_error(report.last_error.clone()),
            );
            match cause {
                UnrecoverableCause::NotCreated => {}
                // Nothing was applied; the trusted alignment may be stale.
                UnrecoverableCause::DropFailed => session.alignment.invalidate(),
                UnrecoverableCause::Ambiguous | UnrecoverableCause::BudgetExhausted => break,
            }
            debug!(spec_index = p.spec_index, cycle, cause = ?cause, "add attempt failed");
        }

        let Some(field_id) = field_id else {
            return last.into_iter().collect();
        };
        session.ctx.incr(counter::FIELDS_ADDED);

        let mut failures = Vec::new();
        if let Err(record) = self.ensure_order(session, section_id, &field_id, p).await {
            failures.push(record);
        }
        failures.extend(self.bind_and_configure(session, &field_id, p).await);
        failures
    }

    /// Move a field that landed out of specification order.
    async fn ensure_order(
        &self,
        session: &mut ActivitySession<'_>,
        section_id: &EntityId,
        field_id: &EntityId,
        p: &PlannedField<'_>,
    ) -> Result<(), FailureRecord> {
        let fields = session.registry.fields_of(section_id);
        let Some(pos) = fields.iter().position(|f| &f.id == field_id) else {
            return Ok(());
        };
        let anchor = session
            .registry
            .anchor_for(section_id, p.spec_index)
            .map(|a| a.id.clone());
        let position = match &anchor {
            Some(anchor_id) => {
                let anchor_pos = fields.iter().position(|f| &f.id == anchor_id);
                if anchor_pos.map(|a| a + 1) == Some(pos) {
                    return Ok(());
                }
                DropPosition::After(anchor_id.clone())
            }
            None => {
                let first_later = fields
                    .iter()
                    .position(|f| f.spec_index.is_some_and(|i| i > p.spec_index));
                match first_later {
                    Some(later) if pos > later => DropPosition::Top,
                    _ => return Ok(()),
                }
            }
        };

        info!(field = %field_id, target = ?position, "field out of order; moving");
        let action = MoveField {
            surface: session.surface,
            section_id,
            field_id,
            position,
        };
        let outcome = verify::run(&action, &self.config.verify.reorder.retry_policy()).await;
        session
            .ctx
            .add(counter::DRAG_ATTEMPTS, u64::from(outcome.attempts()));
        session.record_attempt(&outcome.to_attempt("reorder", TargetId::Known(field_id.clone())));

        let failure = |error: Option<String>, attempts| {
            FailureRecord::new(
                FailureKind::Add,
                SkipReason::ReorderFailed,
                p.spec_index,
                p.section.title.as_str(),
                p.field.type_key.as_str(),
            )
            .with_field(field_id.clone())
            .with_attempts(attempts)
            .with_error(error)
        };
        match outcome {
            Outcome::Confirmed { proof, attempts, .. } => {
                session
                    .registry
                    .confirm_order(&proof)
                    .map_err(|e| failure(Some(e.to_string()), attempts))?;
                session.ctx.incr(counter::REORDERS);
                Ok(())
            }
            other => Err(failure(other.last_error(), other.attempts())),
        }
    }

    async fn bind_and_configure(
        &self,
        session: &mut ActivitySession<'_>,
        field_id: &EntityId,
        p: &PlannedField<'_>,
    ) -> Vec<FailureRecord> {
        let fail = |kind, reason| {
            FailureRecord::new(kind, reason, p.spec_index, p.section.title.as_str(), p.field.type_key.as_str())
                .with_field(field_id.clone())
        };

        let bind = BindField {
            surface: session.surface,
            field_id,
            type_key: &p.field.type_key,
        };
        let outcome = verify::run(&bind, &self.config.verify.binding.retry_policy()).await;
        session
            .ctx
            .add(counter::BIND_ATTEMPTS, u64::from(outcome.attempts()));
        session.record_attempt(&outcome.to_attempt("bind_field", TargetId::Known(field_id.clone())));
        let bound = match outcome {
            Outcome::Confirmed { proof, .. } => proof,
            other => {
                return vec![fail(FailureKind::Bind, SkipReason::BindingUnproven)
                    .with_attempts(other.attempts())
                    .with_error(other.last_error())];
            }
        };
        session.registry.set_bound(field_id);

        let report = self
            .configurator
            .configure(
                session.surface,
                &bound,
                p.field,
                &self.config.verify.property_write.retry_policy(),
            )
            .await;
        session
            .ctx
            .add(counter::PROPERTIES_WRITTEN, report.written.len() as u64);
        session
            .ctx
            .add(counter::PROPERTIES_SKIPPED, report.skipped.len() as u64);

        report
            .failed
            .into_iter()
            .map(|f| {
                fail(FailureKind::Configure, f.reason)
                    .with_attempts(f.attempts)
                    .with_error(f.last_error)
            })
            .collect()
    }

    /// Retry retryable failures in specification order, pass by pass.
    ///
    /// Each failed field is retried once per pass, however many records it
    /// left behind.
    async fn retry_failures(&self, session: &mut ActivitySession<'_>, spec: &ActivitySpec) {
        let planned = spec.planned_fields();
        let threshold = self.config.retry.failure_threshold;

        for pass in 1..=self.config.retry.max_passes {
            let pending = group_by_field(session.ctx.take_retryable());
            if pending.is_empty() {
                break;
            }
            session.ctx.incr(counter::RETRY_PASSES);
            info!(code = %spec.code, pass, pending = pending.len(), "retry pass");

            let mut resolved = 0usize;
            let mut consecutive = 0u32;
            let mut queue = pending.into_iter();
            while let Some(records) = queue.next() {
                if consecutive >= threshold {
                    warn!(code = %spec.code, pass, consecutive, "retry pass stopped early");
                    session.ctx.failures.extend(records);
                    session.ctx.failures.extend(queue.by_ref().flatten());
                    break;
                }
                let spec_index = records[0].spec_index;
                let Some(p) = planned.get(spec_index) else {
                    warn!(code = %spec.code, spec_index, "failure refers to no planned field");
                    session.ctx.failures.extend(records);
                    continue;
                };
                let section_id = session
                    .registry
                    .section_by_title(&p.section.title)
                    .map(|s| s.id.clone());
                let Some(section_id) = section_id else {
                    session.ctx.failures.extend(records);
                    consecutive += 1;
                    continue;
                };

                let failures = self.retry_one(session, &section_id, p, &records).await;
                if failures.is_empty() {
                    resolved += 1;
                    consecutive = 0;
                } else {
                    consecutive += 1;
                    for failure in failures {
                        session.ctx.record_failure(failure);
                    }
                }
            }

            if resolved == 0 {
                break;
            }
        }
    }

    /// Redo whatever one field's failure records call for.
    async fn retry_one(
        &self,
        session: &mut ActivitySession<'_>,
        section_id: &EntityId,
        p: &PlannedField<'_>,
        records: &[FailureRecord],
    ) -> Vec<FailureRecord> {
        let existing = records
            .iter()
            .find_map(|r| r.field_id.clone())
            .filter(|id| session.registry.field(id).is_some());
        let Some(field_id) = existing else {
            return self.place_field(session, section_id, p).await;
        };

        let mut failures = Vec::new();
        if records.iter().any(|r| r.reason == SkipReason::ReorderFailed) {
            if let Err(failure) = self.ensure_order(session, section_id, &field_id, p).await {
                failures.push(failure);
            }
        }
        if records
            .iter()
            .any(|r| matches!(r.kind, FailureKind::Bind | FailureKind::Configure))
        {
            failures.extend(self.bind_and_configure(session, &field_id, p).await);
        }
        failures
    }
}

/// Split records sorted by `spec_index` into one group per field.
fn group_by_field(records: Vec<FailureRecord>) -> Vec<Vec<FailureRecord>> {
    let mut groups: Vec<Vec<FailureRecord>> = Vec::new();
    for record in records {
        match groups.last_mut() {
            Some(group) if group[0].spec_index == record.spec_index => group.push(record),
            _ => groups.push(vec![record]),
        }
    }
    groups
}

fn mark_not_attempted<'a, 'b: 'a>(
    ctx: &mut BuildContext,
    fields: impl Iterator<Item = &'a PlannedField<'b>>,
) {
    for p in fields {
        let record = FailureRecord::new(
            FailureKind::Add,
            SkipReason::NotAttempted,
            p.spec_index,
            p.section.title.as_str(),
            p.field.type_key.as_str(),
        );
        ctx.failures.push(record);
    }
}

// ---------------------------------------------------------------------------
// Verified actions
// ---------------------------------------------------------------------------

/// Submit an activity shell; proven by the catalog listing it.
struct CreateShell<'a> {
    catalog: &'a dyn ActivityCatalog,
    request: ShellRequest,
}

#[async_trait]
impl VerifiedAction for CreateShell<'_> {
    type Proof = TemplateMatch;

    fn kind(&self) -> &'static str {
        "create_shell"
    }

    fn target(&self) -> String {
        self.request.code.clone()
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.catalog.create_shell(&self.request).await
    }

    async fn expectation(&self) -> SurfaceResult<Option<TemplateMatch>> {
        for status in [TemplateStatus::Inactive, TemplateStatus::Active] {
            if let Some(found) = self.catalog.find(&self.request.code, status).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// Navigate to the builder; proven by the builder header's activity code.
struct OpenBuilder<'a> {
    catalog: &'a dyn ActivityCatalog,
    surface: &'a dyn Surface,
    template: &'a TemplateMatch,
}

impl OpenBuilder<'_> {
    async fn showing(&self) -> SurfaceResult<Option<()>> {
        let code = self
            .surface
            .read_value(&TargetRef::CanvasRoot, &Property::ActivityCode)
            .await?;
        Ok((code.as_deref() == Some(self.template.code.as_str())).then_some(()))
    }
}

#[async_trait]
impl VerifiedAction for OpenBuilder<'_> {
    type Proof = ();

    fn kind(&self) -> &'static str {
        "open_builder"
    }

    fn target(&self) -> String {
        self.template.template_id.clone()
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.catalog.open_builder(self.template).await
    }

    async fn expectation(&self) -> SurfaceResult<Option<()>> {
        self.showing().await
    }
}

/// Append a section; proven by exactly one new section in the sidebar.
struct CreateSection<'a> {
    surface: &'a dyn Surface,
    excluded: std::collections::HashSet<EntityId>,
}

#[async_trait]
impl VerifiedAction for CreateSection<'_> {
    type Proof = EntityDescriptor;

    fn kind(&self) -> &'static str {
        "create_section"
    }

    fn target(&self) -> String {
        "sidebar".to_string()
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface.click(&TargetRef::AddSectionButton).await
    }

    async fn expectation(&self) -> SurfaceResult<Option<EntityDescriptor>> {
        let observed = self.surface.observe(&Scope::Sections).await?;
        let mut new: Vec<EntityDescriptor> = observed
            .entities
            .into_iter()
            .filter(|e| e.kind == EntityKind::Section && !self.excluded.contains(&e.id))
            .collect();
        Ok(if new.len() == 1 { new.pop() } else { None })
    }
}

/// Write a section title; proven by reading it back.
struct RenameSection<'a> {
    surface: &'a dyn Surface,
    section_id: &'a EntityId,
    title: &'a str,
}

impl RenameSection<'_> {
    async fn titled(&self) -> SurfaceResult<Option<()>> {
        let title = self
            .surface
            .read_value(&TargetRef::SectionItem(self.section_id.clone()), &Property::Title)
            .await?;
        Ok((title.as_deref() == Some(self.title)).then_some(()))
    }
}

#[async_trait]
impl VerifiedAction for RenameSection<'_> {
    type Proof = ();

    fn kind(&self) -> &'static str {
        "rename_section"
    }

    fn target(&self) -> String {
        self.section_id.to_string()
    }

    async fn precondition(&self) -> SurfaceResult<Option<()>> {
        self.titled().await
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface
            .set_value(
                &TargetRef::SectionItem(self.section_id.clone()),
                &Property::Title,
                self.title,
            )
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<()>> {
        self.titled().await
    }
}

/// Drag an existing field; proven by its observed ordinal.
struct MoveField<'a> {
    surface: &'a dyn Surface,
    section_id: &'a EntityId,
    field_id: &'a EntityId,
    position: DropPosition,
}

impl MoveField<'_> {
    async fn placed(&self) -> SurfaceResult<Option<Snapshot>> {
        let observed = self
            .surface
            .observe(&Scope::Section(self.section_id.clone()))
            .await?;
        let Some(field) = observed.get(self.field_id) else {
            return Ok(None);
        };
        let wanted = match &self.position {
            DropPosition::Top => Some(0),
            DropPosition::Bottom => Some((observed.len() as u32).saturating_sub(1)),
            DropPosition::After(anchor) => observed.get(anchor).map(|a| a.ordinal + 1),
        };
        Ok((wanted == Some(field.ordinal)).then_some(observed))
    }
}

#[async_trait]
impl VerifiedAction for MoveField<'_> {
    type Proof = Snapshot;

    fn kind(&self) -> &'static str {
        "reorder"
    }

    fn target(&self) -> String {
        self.field_id.to_string()
    }

    async fn precondition(&self) -> SurfaceResult<Option<Snapshot>> {
        self.placed().await
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface
            .drag(
                &TargetRef::Field(self.field_id.clone()),
                &TargetRef::DropZone {
                    section_id: self.section_id.clone(),
                    position: self.position.clone(),
                },
            )
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<Snapshot>> {
        self.placed().await
    }
}
