//! End-to-end build scenarios against the simulated surface.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use formwright_core::{
    counter, ActivitySpec, ActivityStatus, BuildConfig, BuildController, FailureKind, FieldSpec,
    MemorySummarySink, SectionSpec, SkipReason,
};
use formwright_surface::{
    FaultScript, MutationRecord, SimulatedCatalog, SimulatedSurface, TargetRef, TemplateMatch,
    TemplateStatus,
};

fn field(type_key: &str, properties: &[(&str, &str)]) -> FieldSpec {
    FieldSpec {
        type_key: type_key.to_string(),
        label: None,
        properties: properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn activity(code: &str, sections: Vec<SectionSpec>) -> ActivitySpec {
    ActivitySpec {
        code: code.to_string(),
        title: format!("Activity {code}"),
        category: Some("Inspections".to_string()),
        sections,
    }
}

fn section(title: &str, fields: Vec<FieldSpec>) -> SectionSpec {
    SectionSpec {
        title: title.to_string(),
        fields,
    }
}

fn two_section_spec(code: &str) -> ActivitySpec {
    activity(
        code,
        vec![
            section(
                "General",
                vec![
                    field("instruction", &[]),
                    field("short_answer", &[("required", "true")]),
                ],
            ),
            section(
                "Findings",
                vec![
                    field("paragraph", &[("rows", "5")]),
                    field("multiple_choice", &[("options", "yes|no"), ("shuffle", "false")]),
                ],
            ),
        ],
    )
}

struct Harness {
    surface: Arc<SimulatedSurface>,
    sink: Arc<MemorySummarySink>,
    controller: BuildController,
}

fn harness(faults: FaultScript, catalog: impl FnOnce(SimulatedCatalog) -> SimulatedCatalog) -> Harness {
    harness_with_config(faults, catalog, BuildConfig::default())
}

fn harness_with_config(
    faults: FaultScript,
    catalog: impl FnOnce(SimulatedCatalog) -> SimulatedCatalog,
    config: BuildConfig,
) -> Harness {
    let surface = Arc::new(SimulatedSurface::with_faults(faults));
    let catalog = Arc::new(catalog(SimulatedCatalog::new(surface.clone())));
    let sink = Arc::new(MemorySummarySink::new());
    let controller =
        BuildController::new(surface.clone(), catalog, config).with_sink(sink.clone());
    Harness {
        surface,
        sink,
        controller,
    }
}

// ---------------------------------------------------------------------------
// Clean build
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn clean_build_completes_with_every_field_in_order() {
    let h = harness(FaultScript::new(), |c| c);
    let report = h.controller.run(&[two_section_spec("CPC-100")]).await.unwrap();

    let summary = report.activity("CPC-100").unwrap();
    assert_eq!(summary.status, ActivityStatus::Completed);
    assert_eq!(summary.reason, None);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.counter(counter::SECTIONS_CREATED), 2);
    assert_eq!(summary.counter(counter::FIELDS_ADDED), 4);
    assert_eq!(summary.counter(counter::HARD_RESYNCS), 0);
    assert_eq!(summary.counter(counter::PROPERTIES_WRITTEN), 4);
    assert!(!summary.spec_digest.is_empty());

    let layout = h.surface.layout();
    let titles: Vec<&str> = layout.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["General", "Findings"]);
    let findings: Vec<&str> = layout[1].fields.iter().map(|f| f.type_key.as_str()).collect();
    assert_eq!(findings, vec!["paragraph", "multiple_choice"]);
    assert_eq!(
        h.surface.field_property(&layout[1].fields[1].id, "options").as_deref(),
        Some("yes|no")
    );

    assert_eq!(h.sink.summaries().len(), 1);
    assert!(report.overall_success());
}

// ---------------------------------------------------------------------------
// Existing templates
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn existing_template_is_skipped_without_mutation() {
    let existing = TemplateMatch {
        code: "CPC-200".to_string(),
        title: "Already there".to_string(),
        template_id: "tpl-existing".to_string(),
        status: TemplateStatus::Inactive,
        locked: false,
    };
    let h = harness(FaultScript::new(), |c| c.with_template(existing));
    let report = h.controller.run(&[two_section_spec("CPC-200")]).await.unwrap();

    let summary = report.activity("CPC-200").unwrap();
    assert_eq!(summary.status, ActivityStatus::Skipped);
    assert_eq!(summary.reason, Some(SkipReason::AlreadyExists));
    assert_eq!(h.surface.mutation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn locked_template_requires_revision() {
    let locked = TemplateMatch {
        code: "CPC-201".to_string(),
        title: "Published".to_string(),
        template_id: "tpl-locked".to_string(),
        status: TemplateStatus::Active,
        locked: true,
    };
    let h = harness(FaultScript::new(), |c| c.with_template(locked));
    let report = h.controller.run(&[two_section_spec("CPC-201")]).await.unwrap();

    let summary = report.activity("CPC-201").unwrap();
    assert_eq!(summary.status, ActivityStatus::Skipped);
    assert_eq!(summary.reason, Some(SkipReason::LockedRequiresRevision));
    assert_eq!(h.surface.mutation_count(), 0);
}

// ---------------------------------------------------------------------------
// Phantom recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn lagged_drop_is_recovered_as_late_candidate() {
    let h = harness(
        FaultScript::new().lag_drop(1, Duration::from_millis(2_500)),
        |c| c,
    );
    let report = h.controller.run(&[two_section_spec("CPC-300")]).await.unwrap();

    let summary = report.activity("CPC-300").unwrap();
    assert_eq!(summary.status, ActivityStatus::Completed);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.counter(counter::PHANTOM_TIMEOUTS), 1);
    assert_eq!(summary.counter(counter::LATE_CANDIDATES), 1);
    assert_eq!(summary.counter(counter::HARD_RESYNCS), 0);
    assert_eq!(summary.counter(counter::FIELDS_ADDED), 4);

    // The lagged drop must not have been repeated.
    assert_eq!(h.surface.layout()[0].fields.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_drop_is_skipped_never_guessed() {
    let h = harness(FaultScript::new().duplicate_drop(1), |c| c);
    let report = h.controller.run(&[two_section_spec("CPC-400")]).await.unwrap();

    let summary = report.activity("CPC-400").unwrap();
    assert_eq!(summary.status, ActivityStatus::Completed);
    assert_eq!(summary.counter(counter::HARD_RESYNCS), 1);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.spec_index, 0);
    assert_eq!(failure.kind, FailureKind::Add);
    assert_eq!(failure.reason, SkipReason::AmbiguousCandidates);
    assert!(!failure.retryable);

    // Neither duplicate was bound.
    let general = &h.surface.layout()[0];
    let duplicates: Vec<_> = general
        .fields
        .iter()
        .filter(|f| f.type_key == "instruction")
        .map(|f| f.id.clone())
        .collect();
    assert_eq!(duplicates.len(), 2);
    let clicked_duplicate = h.surface.mutations().iter().any(|m| {
        matches!(m, MutationRecord::Click(TargetRef::Field(id)) if duplicates.contains(id))
    });
    assert!(!clicked_duplicate);
}

#[tokio::test(start_paused = true)]
async fn silent_drop_is_retried_from_scratch() {
    let h = harness(FaultScript::new().silent_drop(1), |c| c);
    let report = h.controller.run(&[two_section_spec("CPC-450")]).await.unwrap();

    let summary = report.activity("CPC-450").unwrap();
    assert_eq!(summary.status, ActivityStatus::Completed);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.counter(counter::HARD_RESYNCS), 1);
    let layout = h.surface.layout();
    let general: Vec<&str> = layout[0]
        .fields
        .iter()
        .map(|f| f.type_key.as_str())
        .collect();
    assert_eq!(general, vec!["instruction", "short_answer"]);
}

#[tokio::test(start_paused = true)]
async fn failed_field_is_filled_in_by_retry_pass() {
    let mut config = BuildConfig::default();
    config.phantom.add_attempts = 1;
    let h = harness_with_config(FaultScript::new().silent_drop(1), |c| c, config);
    let report = h.controller.run(&[two_section_spec("CPC-460")]).await.unwrap();

    let summary = report.activity("CPC-460").unwrap();
    assert_eq!(summary.status, ActivityStatus::Completed);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.counter(counter::RETRY_PASSES), 1);
    assert_eq!(summary.counter(counter::FIELDS_FAILED), 1);

    // The retried field was dropped at the top, ahead of its successor.
    let layout = h.surface.layout();
    let general: Vec<&str> = layout[0]
        .fields
        .iter()
        .map(|f| f.type_key.as_str())
        .collect();
    assert_eq!(general, vec!["instruction", "short_answer"]);
}

// ---------------------------------------------------------------------------
// Multi-activity runs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shell_failure_fails_one_activity_and_run_continues() {
    let h = harness(FaultScript::new(), |c| c.refuse_shell("CPC-502"));
    let specs = vec![
        two_section_spec("CPC-501"),
        two_section_spec("CPC-502"),
        two_section_spec("CPC-503"),
    ];
    let report = h.controller.run(&specs).await.unwrap();

    assert_eq!(report.activities.len(), 3);
    assert_eq!(report.activity("CPC-501").unwrap().status, ActivityStatus::Completed);
    let failed = report.activity("CPC-502").unwrap();
    assert_eq!(failed.status, ActivityStatus::Failed);
    assert_eq!(failed.reason, Some(SkipReason::ShellCreationFailed));
    assert_eq!(report.activity("CPC-503").unwrap().status, ActivityStatus::Completed);

    assert_eq!(report.count(ActivityStatus::Failed), 1);
    assert!(!report.overall_success());
    assert_eq!(h.sink.summaries().len(), 3);
    assert!(report
        .activities
        .iter()
        .all(|a| a.run_id == report.run_id));
}

#[tokio::test(start_paused = true)]
async fn unstable_surface_aborts_activity_after_consecutive_failures() {
    let mut config = BuildConfig::default();
    config.abort_after_consecutive_failures = 2;
    config.phantom.add_attempts = 1;
    let faults = FaultScript::new()
        .duplicate_drop(1)
        .duplicate_drop(2);
    let h = harness_with_config(faults, |c| c, config);
    let report = h.controller.run(&[two_section_spec("CPC-600")]).await.unwrap();

    let summary = report.activity("CPC-600").unwrap();
    assert_eq!(summary.status, ActivityStatus::Failed);
    assert_eq!(summary.reason, Some(SkipReason::ConsecutiveFailures));
    let not_attempted = summary
        .failures
        .iter()
        .filter(|f| f.reason == SkipReason::NotAttempted)
        .count();
    assert_eq!(not_attempted, 2);
    assert_eq!(h.surface.layout().len(), 1);
}
