//! Structured lifecycle events for service runs, binary lookups and image saves.
//!
//! Every emitter logs at `info!` (failures at `warn!`) with an `event` field
//! so log pipelines can filter on it.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

use crate::service::ServiceStage;

/// Span tagging everything logged during one pipeline execution with its
/// run id and owning package.
///
/// The span is entered only while the wrapped future is polled, so the
/// future stays `Send` and a suspended run never tags another task's logs.
///
/// ```ignore
/// ServiceRunSpan::new(&run_id, "home:tom", "pkg").instrument(run).await
/// ```
pub struct ServiceRunSpan {
    span: tracing::Span,
}

impl ServiceRunSpan {
    pub fn new(run_id: &str, project: &str, package: &str) -> Self {
        let span = tracing::info_span!(
            "obsvc.service_run",
            run_id = %run_id,
            project = %project,
            package = %package,
        );
        Self { span }
    }

    pub fn instrument<F: Future>(self, future: F) -> Instrumented<F> {
        future.instrument(self.span)
    }
}

pub fn emit_stage_started(stage: ServiceStage, target: &str) {
    info!(event = "stage.started", stage = %stage, target = %target);
}

/// `status` is `None` when no response arrived.
pub fn emit_stage_finished(
    stage: ServiceStage,
    status: Option<u16>,
    duration_ms: u64,
    succeeded: bool,
) {
    if succeeded {
        info!(
            event = "stage.finished",
            stage = %stage,
            status = status,
            duration_ms = duration_ms,
            succeeded = succeeded,
        );
    } else {
        warn!(
            event = "stage.finished",
            stage = %stage,
            status = status,
            duration_ms = duration_ms,
            succeeded = succeeded,
        );
    }
}

pub fn emit_pipeline_finished(run_id: &str, duration_ms: u64, failed_stage: Option<ServiceStage>) {
    match failed_stage {
        None => info!(
            event = "pipeline.finished",
            run_id = %run_id,
            duration_ms = duration_ms,
            success = true,
        ),
        Some(stage) => warn!(
            event = "pipeline.finished",
            run_id = %run_id,
            duration_ms = duration_ms,
            success = false,
            failed_stage = %stage,
        ),
    }
}

pub fn emit_lookup_completed(project: &str, repository: &str, architecture: &str, binaries: usize) {
    info!(
        event = "binaries.lookup_completed",
        project = %project,
        repository = %repository,
        architecture = %architecture,
        binaries = binaries,
    );
}

pub fn emit_lookup_failed(project: &str, repository: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "binaries.lookup_failed",
        project = %project,
        repository = %repository,
        error = %error,
    );
}

pub fn emit_config_saved(owner: &str, revision: u64, digest: &str) {
    info!(event = "image.config_saved", owner = %owner, revision = revision, digest = %digest);
}
