//! Engine invariants exercised through the public API.

use std::sync::Arc;
use std::time::Duration;

use formwright_core::{
    attempt_add, counter, ensure_aligned, hard_resync, ActivitySession, ActivitySpec,
    ActivityStatus, AddRequest, BuildConfig, BuildContext, BuildController, PhantomState,
    SectionSpec, UnrecoverableCause,
};
use formwright_surface::{
    DropPosition, EntityId, FaultScript, Scope, SimulatedCatalog, SimulatedSurface, TargetRef,
    UiMutation,
};

fn spec(code: &str) -> ActivitySpec {
    ActivitySpec {
        code: code.to_string(),
        title: "Idempotent".to_string(),
        category: None,
        sections: vec![SectionSpec {
            title: "Only".to_string(),
            fields: vec![serde_json::from_value(serde_json::json!({
                "type_key": "paragraph",
                "properties": {"rows": "3"}
            }))
            .unwrap()],
        }],
    }
}

fn request(section_id: &EntityId, type_key: &str, spec_index: usize) -> AddRequest {
    AddRequest {
        section_id: section_id.clone(),
        type_key: type_key.to_string(),
        position: DropPosition::Bottom,
        spec_index,
    }
}

#[tokio::test(start_paused = true)]
async fn rerunning_a_completed_spec_performs_no_mutations() {
    let surface = Arc::new(SimulatedSurface::new());
    let catalog = Arc::new(SimulatedCatalog::new(surface.clone()));
    let controller = BuildController::new(surface.clone(), catalog, BuildConfig::default());

    let first = controller.run(&[spec("IDEM-1")]).await.unwrap();
    assert_eq!(first.activities[0].status, ActivityStatus::Completed);
    let after_first = surface.mutation_count();

    let second = controller.run(&[spec("IDEM-1")]).await.unwrap();
    assert_eq!(second.activities[0].status, ActivityStatus::Skipped);
    assert_eq!(surface.mutation_count(), after_first);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        first.activities[0].spec_digest,
        second.activities[0].spec_digest
    );
}

#[tokio::test(start_paused = true)]
async fn ambiguous_resync_never_registers_a_candidate() {
    let surface = SimulatedSurface::with_faults(FaultScript::new().duplicate_drop(1));
    let sid = surface.seed_section("Only");
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("NOGUESS"));
    session.bootstrap().await.unwrap();
    ensure_aligned(&mut session, &sid).await.unwrap();

    let report = attempt_add(&mut session, &request(&sid, "date", 0)).await;

    assert_eq!(report.cause(), Some(UnrecoverableCause::Ambiguous));
    assert!(report.field_id().is_none());
    let fields = session.registry.fields_of(&sid);
    assert_eq!(fields.len(), 2);
    assert!(fields.iter().all(|f| f.spec_index.is_none()));
}

#[tokio::test(start_paused = true)]
async fn registry_revision_never_decreases() {
    let faults = FaultScript::new()
        .lag_drop(1, Duration::from_millis(2_500))
        .silent_drop(2)
        .duplicate_drop(3);
    let surface = SimulatedSurface::with_faults(faults);
    let sid = surface.seed_section("Only");
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("MONO"));
    session.bootstrap().await.unwrap();

    let mut last = session.registry.revision();
    for spec_index in 0..4 {
        ensure_aligned(&mut session, &sid).await.unwrap();
        attempt_add(&mut session, &request(&sid, "checkbox", spec_index)).await;
        let now = session.registry.revision();
        assert!(now >= last, "revision went from {last} to {now}");
        last = now;
    }
}

#[tokio::test(start_paused = true)]
async fn confirmed_add_walks_idle_to_confirmed() {
    let surface = SimulatedSurface::new();
    let sid = surface.seed_section("Only");
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("TRACE"));
    session.bootstrap().await.unwrap();
    ensure_aligned(&mut session, &sid).await.unwrap();

    let report = attempt_add(&mut session, &request(&sid, "signature", 0)).await;
    let id = report.field_id().cloned().unwrap();
    assert_eq!(report.trace, vec![PhantomState::Idle, PhantomState::Confirmed(id)]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_field_is_bound() {
    let surface = SimulatedSurface::new();
    let sid = surface.seed_section("Only");
    let a = surface.seed_field(&sid, "paragraph").unwrap();
    let b = surface.seed_field(&sid, "paragraph").unwrap();
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("BIND"));
    session.bootstrap().await.unwrap();

    session.registry.set_bound(&a);
    session.registry.set_bound(&b);

    let bound: Vec<&EntityId> = session
        .registry
        .fields_of(&sid)
        .iter()
        .filter(|f| f.bound)
        .map(|f| &f.id)
        .collect();
    assert_eq!(bound, vec![&b]);
}

#[tokio::test(start_paused = true)]
async fn resync_absorbs_external_drift_then_settles() {
    let surface = SimulatedSurface::new();
    let sid = surface.seed_section("Only");
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("DRIFT"));
    session.bootstrap().await.unwrap();

    // Someone else edits the activity.
    let stray = surface.seed_field(&sid, "table").unwrap();

    let scope = Scope::Section(sid.clone());
    let drift = hard_resync(&mut session, &scope).await.unwrap().unwrap();
    let new: Vec<&EntityId> = drift.new.iter().map(|d| &d.id).collect();
    assert_eq!(new, vec![&stray]);
    assert!(session.registry.field(&stray).is_some());

    let settled = hard_resync(&mut session, &scope).await.unwrap().unwrap();
    assert!(settled.is_clean());
}

#[tokio::test(start_paused = true)]
async fn exhausted_resync_budget_is_reported() {
    let surface = SimulatedSurface::with_faults(FaultScript::new().silent_drop(1));
    let sid = surface.seed_section("Only");
    let mut config = BuildConfig::default();
    config.phantom.hard_resync_budget = 1;
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("BUDGET"));
    session.bootstrap().await.unwrap();

    hard_resync(&mut session, &Scope::Sections).await.unwrap();
    ensure_aligned(&mut session, &sid).await.unwrap();
    let report = attempt_add(&mut session, &request(&sid, "date", 0)).await;

    assert_eq!(report.cause(), Some(UnrecoverableCause::BudgetExhausted));
    assert_eq!(session.resync.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn resync_never_takes_a_field_of_another_type() {
    let surface = SimulatedSurface::with_faults(FaultScript::new().silent_drop(1));
    let sid = surface.seed_section("Only");
    let config = BuildConfig::default();
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("FOREIGN"));
    session.bootstrap().await.unwrap();
    ensure_aligned(&mut session, &sid).await.unwrap();

    // Another editor adds a table while the date drop is being proven.
    let req = request(&sid, "date", 0);
    let (report, table) = tokio::join!(attempt_add(&mut session, &req), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        surface.seed_field(&sid, "table").unwrap()
    });

    assert_eq!(report.cause(), Some(UnrecoverableCause::NotCreated));
    assert!(report.field_id().is_none());
    assert_eq!(session.ctx.counters.get(counter::HARD_RESYNCS), 1);
    let adopted = session.registry.field(&table).unwrap();
    assert_eq!(adopted.type_key.as_deref(), Some("table"));
    assert!(adopted.spec_index.is_none());
}

#[tokio::test(start_paused = true)]
async fn late_candidate_off_its_ordinal_is_settled_by_resync() {
    let surface = SimulatedSurface::with_faults(
        FaultScript::new().lag_drop(1, Duration::from_millis(2_500)),
    );
    let sid = surface.seed_section("Only");
    surface.seed_field(&sid, "instruction").unwrap();
    let mut config = BuildConfig::default();
    config.verify.add_field.timeout_ms = 2_000;
    config.phantom.grace_delay_ms = 1_000;
    let mut session = ActivitySession::new(&surface, &config, BuildContext::new("ORDINAL"));
    session.bootstrap().await.unwrap();
    ensure_aligned(&mut session, &sid).await.unwrap();

    let req = request(&sid, "date", 0);
    let (report, pushed) = tokio::join!(attempt_add(&mut session, &req), async {
        tokio::time::sleep(Duration::from_millis(2_600)).await;
        surface
            .drag(
                &TargetRef::PaletteCard("checkbox".to_string()),
                &TargetRef::DropZone {
                    section_id: sid.clone(),
                    position: DropPosition::Top,
                },
            )
            .await
    });
    pushed.unwrap();

    assert_eq!(report.late_candidates, 1);
    assert!(report.trace.contains(&PhantomState::HardResync));
    let id = report.field_id().cloned().unwrap();
    assert_eq!(report.state, PhantomState::Recovered(id.clone()));
    assert_eq!(session.ctx.counters.get(counter::LATE_CANDIDATES), 0);

    let types: Vec<Option<&str>> = session
        .registry
        .fields_of(&sid)
        .iter()
        .map(|f| f.type_key.as_deref())
        .collect();
    assert_eq!(types, vec![Some("checkbox"), Some("instruction"), Some("date")]);
    assert_eq!(session.registry.field(&id).unwrap().spec_index, Some(0));
}
