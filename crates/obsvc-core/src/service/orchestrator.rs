//! Run → merge → wait against the source backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::document::ServiceDocument;
use super::error::{FailureReason, ServiceExecutionError};
use super::stage::{PipelineState, ServiceExecutionResult, ServiceStage};
use crate::backend::{BackendClient, BackendError, BackendRequest};
use crate::config::BackendConfig;
use crate::obs::{self, ServiceRunSpan};

/// Report of a pipeline that ran to `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub run_id: Uuid,
    pub project: String,
    pub package: String,
    pub results: Vec<ServiceExecutionResult>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    pub fn stages(&self) -> Vec<ServiceStage> {
        self.results.iter().map(|r| r.stage).collect()
    }

    pub fn result(&self, stage: ServiceStage) -> Option<&ServiceExecutionResult> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

/// Drives a package's service document through the backend.
///
/// Holds no state between stages or between executions; one orchestrator can
/// serve any number of packages concurrently.
#[derive(Clone)]
pub struct ServiceOrchestrator {
    client: Arc<dyn BackendClient>,
    wait_timeout: Duration,
}

impl ServiceOrchestrator {
    pub fn new(client: Arc<dyn BackendClient>, wait_timeout: Duration) -> Self {
        Self {
            client,
            wait_timeout,
        }
    }

    pub fn from_config(client: Arc<dyn BackendClient>, config: &BackendConfig) -> Self {
        Self::new(client, config.wait_timeout())
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Execute `document` for `project/package` on behalf of `identity`.
    ///
    /// Exactly one request per stage, no retries. A failed stage ends the
    /// pipeline and is returned as the error; an empty document fails before
    /// any request is made.
    #[instrument(skip(self, document), fields(services = document.len()))]
    pub async fn execute(
        &self,
        project: &str,
        package: &str,
        identity: &str,
        document: &ServiceDocument,
    ) -> Result<ExecutionOutcome, ServiceExecutionError> {
        if document.is_empty() {
            return Err(ServiceExecutionError::new(
                ServiceStage::Run,
                FailureReason::EmptyDocument,
            ));
        }
        let payload = document.to_xml().map_err(|e| {
            ServiceExecutionError::new(
                ServiceStage::Run,
                FailureReason::InvalidDocument(e.to_string()),
            )
        })?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let results = ServiceRunSpan::new(&run_id.to_string(), project, package)
            .instrument(self.run_stages(run_id, project, package, identity, &payload, start))
            .await?;

        Ok(ExecutionOutcome {
            run_id,
            project: project.to_string(),
            package: package.to_string(),
            results,
            duration_ms: elapsed_ms(start),
            started_at,
        })
    }

    /// Drive the state machine from `Running` to a terminal state.
    async fn run_stages(
        &self,
        run_id: Uuid,
        project: &str,
        package: &str,
        identity: &str,
        payload: &str,
        start: Instant,
    ) -> Result<Vec<ServiceExecutionResult>, ServiceExecutionError> {
        let run_id = run_id.to_string();
        let mut state = PipelineState::Idle.start();
        let mut results: Vec<ServiceExecutionResult> = Vec::new();

        while let Some(stage) = state.stage() {
            let request = self.stage_request(stage, project, package, identity, payload);
            let result = match self.send_stage(stage, request).await {
                Ok(result) => result,
                Err(err) => {
                    obs::emit_pipeline_finished(&run_id, elapsed_ms(start), Some(stage));
                    return Err(err);
                }
            };

            state = state.next(&result);
            if let PipelineState::Failed(failed) = state {
                let reason = failure_reason(failed, &result);
                obs::emit_pipeline_finished(&run_id, elapsed_ms(start), Some(failed));
                return Err(ServiceExecutionError::new(failed, reason)
                    .with_response(result.backend_status, result.body));
            }
            results.push(result);
        }

        obs::emit_pipeline_finished(&run_id, elapsed_ms(start), None);
        Ok(results)
    }

    /// Fetch the package's current service document.
    ///
    /// A missing `_service` file (404) or an empty body yields an empty
    /// document. Failures are attributed to the run stage since they prevent
    /// it from starting.
    #[instrument(skip(self))]
    pub async fn fetch_document(
        &self,
        project: &str,
        package: &str,
    ) -> Result<ServiceDocument, ServiceExecutionError> {
        let request = BackendRequest::get(format!("{}/_service", source_path(project, package)));
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| transport_failure(ServiceStage::Run, e))?;

        if response.status == 404 {
            debug!("package has no service document");
            return Ok(ServiceDocument::new());
        }
        if !response.is_success() {
            return Err(ServiceExecutionError::new(
                ServiceStage::Run,
                FailureReason::BackendStatus(response.status),
            )
            .with_response(response.status, response.body));
        }

        ServiceDocument::from_xml(&response.text()).map_err(|e| {
            ServiceExecutionError::new(
                ServiceStage::Run,
                FailureReason::InvalidDocument(e.to_string()),
            )
        })
    }

    /// Append `kiwi_import` to the package's service document and execute it.
    pub async fn add_kiwi_import(
        &self,
        project: &str,
        package: &str,
        identity: &str,
    ) -> Result<ExecutionOutcome, ServiceExecutionError> {
        let mut document = self.fetch_document(project, package).await?;
        document.add_kiwi_import();
        self.execute(project, package, identity, &document).await
    }

    fn stage_request(
        &self,
        stage: ServiceStage,
        project: &str,
        package: &str,
        identity: &str,
        payload: &str,
    ) -> BackendRequest {
        let mut request =
            BackendRequest::post(source_path(project, package)).with_query("cmd", stage.command());
        if stage.carries_user() {
            request = request.with_query("user", identity);
        }
        if stage.carries_document() {
            request = request.with_body(payload);
        }
        if stage == ServiceStage::Wait {
            request = request.with_timeout(self.wait_timeout);
        }
        request
    }

    /// One backend call. Transport failures and the wait bound become errors
    /// here; status codes are left for the state machine to judge.
    async fn send_stage(
        &self,
        stage: ServiceStage,
        request: BackendRequest,
    ) -> Result<ServiceExecutionResult, ServiceExecutionError> {
        obs::emit_stage_started(stage, &request.target());
        let start = Instant::now();

        let sent = if stage == ServiceStage::Wait {
            match tokio::time::timeout(self.wait_timeout, self.client.send(request)).await {
                Ok(sent) => sent,
                Err(_) => {
                    obs::emit_stage_finished(stage, None, elapsed_ms(start), false);
                    return Err(ServiceExecutionError::new(
                        stage,
                        FailureReason::Timeout(self.wait_timeout),
                    ));
                }
            }
        } else {
            self.client.send(request).await
        };

        let duration_ms = elapsed_ms(start);
        match sent {
            Ok(response) => {
                let result =
                    ServiceExecutionResult::new(stage, response.status, response.body, duration_ms);
                obs::emit_stage_finished(
                    stage,
                    Some(result.backend_status),
                    duration_ms,
                    result.succeeded,
                );
                Ok(result)
            }
            Err(BackendError::Timeout(_)) if stage == ServiceStage::Wait => {
                obs::emit_stage_finished(stage, None, duration_ms, false);
                Err(ServiceExecutionError::new(
                    stage,
                    FailureReason::Timeout(self.wait_timeout),
                ))
            }
            Err(err) => {
                obs::emit_stage_finished(stage, None, duration_ms, false);
                Err(transport_failure(stage, err))
            }
        }
    }
}

fn source_path(project: &str, package: &str) -> String {
    format!("/source/{project}/{package}")
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn transport_failure(stage: ServiceStage, err: BackendError) -> ServiceExecutionError {
    ServiceExecutionError::new(stage, FailureReason::Transport(err.to_string()))
}

/// Phrases the backend uses when merge cannot unpack the service output.
const NON_ARCHIVE_MARKERS: &[&str] = &["not a tar", "tar archive", "not an archive"];

/// Merge rejects service output it cannot unpack; the backend says so in the
/// error body. Every other non-2xx is reported by status.
fn failure_reason(stage: ServiceStage, result: &ServiceExecutionResult) -> FailureReason {
    if stage == ServiceStage::Merge && rejects_non_archive(&result.body) {
        FailureReason::NonArchivePayload
    } else {
        FailureReason::BackendStatus(result.backend_status)
    }
}

fn rejects_non_archive(body: &[u8]) -> bool {
    let body = String::from_utf8_lossy(body).to_ascii_lowercase();
    NON_ARCHIVE_MARKERS.iter().any(|marker| body.contains(marker))
}
