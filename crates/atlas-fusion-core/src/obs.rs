//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - Run- and subject-scoped tracing spans
//! - Emission functions for batch, skip and validation events
//!
//! Events are emitted at `info!`/`debug!` level; filter with `RUST_LOG`.

use tracing::{debug, info, Span};

/// Span covering one whole run.
///
/// Attach with [`tracing::Instrument::instrument`] so it follows the future
/// across await points.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("atlas_fusion.run", run_id = %run_id)
}

/// Span scoping log lines to one subject and scheme.
pub fn subject_span(subject: &str, scheme: &str) -> Span {
    tracing::info_span!("atlas_fusion.subject", subject = %subject, scheme = %scheme)
}

/// Emit event: a batch of jobs was launched.
pub fn emit_batch_started(stage: &str, batch: usize, size: usize, total: usize) {
    debug!(
        event = "batch.started",
        stage = %stage,
        batch = batch,
        size = size,
        total = total,
    );
}

/// Emit event: every job of a batch has exited.
pub fn emit_batch_finished(stage: &str, batch: usize) {
    debug!(event = "batch.finished", stage = %stage, batch = batch);
}

/// Emit event: a stage was skipped because its output already exists.
pub fn emit_stage_skipped(stage: &str, output: &std::path::Path) {
    info!(event = "stage.skipped", stage = %stage, output = %output.display(), "output exists, skipping");
}

/// Emit event: partial volume correction validated.
pub fn emit_pvc_validated(subject: &str, before: f64, after: f64, reduction: f64, passed: bool) {
    info!(
        event = "pvc.validated",
        subject = %subject,
        before = before,
        after = after,
        reduction_percent = reduction,
        passed = passed,
    );
}
