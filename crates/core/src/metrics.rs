//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job lifecycle (submissions, terminal outcomes, live monitoring tasks)
//! - Completion pipeline (thumbnails, conversion handoffs)
//! - Notification fanout
//! - Collaborator calls (engine, extractor, transcoder)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Lifecycle
// =============================================================================

/// Jobs submitted by category.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobhub_jobs_submitted_total", "Total jobs submitted"),
        &["category"],
    )
    .unwrap()
});

/// Jobs reaching a terminal status, by category and result.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobhub_jobs_finished_total", "Total jobs reaching a terminal status"),
        &["category", "result"], // "completed", "failed"
    )
    .unwrap()
});

/// Monitoring tasks currently running.
pub static ACTIVE_TASKS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "jobhub_active_monitoring_tasks",
        "Number of live job monitoring tasks",
    )
    .unwrap()
});

/// Monitoring tasks that panicked and were failed by the supervisor.
pub static TASK_PANICS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobhub_task_panics_total", "Monitoring tasks that panicked"),
        &["category"],
    )
    .unwrap()
});

// =============================================================================
// Completion pipeline
// =============================================================================

/// Thumbnails generated, by trigger.
pub static THUMBNAILS_GENERATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobhub_thumbnails_generated_total", "Thumbnails generated"),
        &["trigger", "result"], // trigger: "early", "completion", "remote"
    )
    .unwrap()
});

/// Conversion handoffs by result.
pub static CONVERSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobhub_conversions_total", "Conversion sub-jobs by result"),
        &["result"], // "completed", "failed", "submit_failed"
    )
    .unwrap()
});

// =============================================================================
// Fanout
// =============================================================================

/// Sink publish failures, by sink.
pub static FANOUT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jobhub_fanout_failures_total",
            "Notification sink publish failures",
        ),
        &["sink"],
    )
    .unwrap()
});

// =============================================================================
// Collaborators
// =============================================================================

/// Collaborator call duration.
pub static COLLABORATOR_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "jobhub_collaborator_duration_seconds",
            "Duration of collaborator calls",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["collaborator", "operation"],
    )
    .unwrap()
});

/// Start a timer on the collaborator duration histogram.
pub fn time_call(collaborator: &str, operation: &str) -> prometheus::HistogramTimer {
    COLLABORATOR_DURATION
        .with_label_values(&[collaborator, operation])
        .start_timer()
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(ACTIVE_TASKS.clone()),
        Box::new(TASK_PANICS.clone()),
        Box::new(THUMBNAILS_GENERATED.clone()),
        Box::new(CONVERSIONS.clone()),
        Box::new(FANOUT_FAILURES.clone()),
        Box::new(COLLABORATOR_DURATION.clone()),
    ]
}
