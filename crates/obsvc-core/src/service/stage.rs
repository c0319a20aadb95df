//! Pipeline stages and the state machine that sequences them.
//!
//! ```text
//! Idle -> Running -> Merging -> Waiting -> Done
//!            |          |          |
//!            +----------+----------+--> Failed(stage)
//! ```

use serde::{Deserialize, Serialize};

/// Backend command issued by one pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStage {
    /// `cmd=runservice`: start the services on the backend
    Run,
    /// `cmd=mergeservice`: fold service output into the package sources
    Merge,
    /// `cmd=waitservice`: block until the backend finishes the service run
    Wait,
}

impl ServiceStage {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceStage::Run => "run",
            ServiceStage::Merge => "merge",
            ServiceStage::Wait => "wait",
        }
    }

    /// Value of the `cmd` query parameter.
    pub fn command(&self) -> &'static str {
        match self {
            ServiceStage::Run => "runservice",
            ServiceStage::Merge => "mergeservice",
            ServiceStage::Wait => "waitservice",
        }
    }

    /// Run and merge are attributed to the acting user; wait is not.
    pub fn carries_user(&self) -> bool {
        !matches!(self, ServiceStage::Wait)
    }

    /// Only run sends the service document.
    pub fn carries_document(&self) -> bool {
        matches!(self, ServiceStage::Run)
    }
}

impl std::fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single stage's backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceExecutionResult {
    pub stage: ServiceStage,
    pub succeeded: bool,
    pub backend_status: u16,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub duration_ms: u64,
}

impl ServiceExecutionResult {
    pub fn new(stage: ServiceStage, backend_status: u16, body: Vec<u8>, duration_ms: u64) -> Self {
        Self {
            stage,
            succeeded: (200..300).contains(&backend_status),
            backend_status,
            body,
            duration_ms,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Where a pipeline execution currently stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    Merging,
    Waiting,
    Done,
    Failed(ServiceStage),
}

impl PipelineState {
    /// `Idle -> Running`; any other state is returned unchanged.
    pub fn start(self) -> Self {
        match self {
            PipelineState::Idle => PipelineState::Running,
            other => other,
        }
    }

    /// The stage whose backend call is due in this state.
    pub fn stage(&self) -> Option<ServiceStage> {
        match self {
            PipelineState::Running => Some(ServiceStage::Run),
            PipelineState::Merging => Some(ServiceStage::Merge),
            PipelineState::Waiting => Some(ServiceStage::Wait),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    /// Advance on the result of the stage due in this state.
    ///
    /// A result for a different stage, or any result in `Idle` or a terminal
    /// state, leaves the state unchanged.
    pub fn next(self, result: &ServiceExecutionResult) -> Self {
        match self.stage() {
            Some(stage) if stage == result.stage => {}
            _ => return self,
        }

        if !result.succeeded {
            return PipelineState::Failed(result.stage);
        }

        match self {
            PipelineState::Running => PipelineState::Merging,
            PipelineState::Merging => PipelineState::Waiting,
            PipelineState::Waiting => PipelineState::Done,
            other => other,
        }
    }
}
