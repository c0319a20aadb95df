//! Service pipeline errors.

use std::time::Duration;

use thiserror::Error;

use super::stage::ServiceStage;

/// Why a stage did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Backend answered with a non-2xx status
    BackendStatus(u16),
    /// Merge rejected service output that is not a tar archive
    NonArchivePayload,
    /// Stage exceeded its time bound
    Timeout(Duration),
    /// Request never produced a response
    Transport(String),
    /// Document had no invocations; nothing was sent
    EmptyDocument,
    /// Document could not be fetched or encoded
    InvalidDocument(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::BackendStatus(status) => write!(f, "backend returned status {status}"),
            FailureReason::NonArchivePayload => write!(f, "service output is not a tar archive"),
            FailureReason::Timeout(after) => write!(f, "timed out after {}s", after.as_secs()),
            FailureReason::Transport(msg) => write!(f, "transport failure: {msg}"),
            FailureReason::EmptyDocument => write!(f, "service document has no services"),
            FailureReason::InvalidDocument(msg) => write!(f, "invalid service document: {msg}"),
        }
    }
}

/// A pipeline stage failed; later stages were not attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("service {stage} stage failed: {reason}")]
pub struct ServiceExecutionError {
    pub stage: ServiceStage,
    pub reason: FailureReason,
    /// Status of the failing response, when there was one
    pub backend_status: Option<u16>,
    pub body: Vec<u8>,
}

impl ServiceExecutionError {
    pub fn new(stage: ServiceStage, reason: FailureReason) -> Self {
        Self {
            stage,
            reason,
            backend_status: None,
            body: Vec::new(),
        }
    }

    pub fn with_response(mut self, status: u16, body: Vec<u8>) -> Self {
        self.backend_status = Some(status);
        self.body = body;
        self
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, FailureReason::Timeout(_))
    }
}
