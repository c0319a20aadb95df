//! Source services: the per-package service document and the pipeline that
//! runs it on the backend.

mod document;
mod error;
mod orchestrator;
mod stage;

pub use document::{ServiceDocument, ServiceDocumentError, ServiceInvocation, KIWI_IMPORT};
pub use error::{FailureReason, ServiceExecutionError};
pub use orchestrator::{ExecutionOutcome, ServiceOrchestrator};
pub use stage::{PipelineState, ServiceExecutionResult, ServiceStage};
