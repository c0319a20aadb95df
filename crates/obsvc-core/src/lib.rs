//! obsvc Core Library
//!
//! Drives source services against a build-service source backend and edits
//! kiwi image build configurations.
//!
//! - [`service`]: service documents and the run → merge → wait pipeline
//! - [`binaries`]: the available-binaries index and its two listing adapters
//! - [`image`]: copy-on-write edit sessions over an image configuration
//! - [`backend`]: the HTTP seam to the source backend

pub mod backend;
pub mod binaries;
pub mod config;
pub mod image;
pub mod obs;
pub mod service;
pub mod telemetry;

pub use backend::{
    BackendClient, BackendError, BackendRequest, BackendResponse, HttpBackendClient, Method,
};
pub use binaries::{
    index_for, parse_listing, AvailableBinaries, BinaryIndex, BinaryIndexError,
    CommandListingIndex, PathListingIndex,
};
pub use config::{BackendConfig, ListingMode};
pub use image::{
    ImageConfigError, ImageConfigResult, ImageEditor, RepositoryBinaries, SessionState,
};
pub use service::{
    ExecutionOutcome, FailureReason, PipelineState, ServiceDocument, ServiceDocumentError,
    ServiceExecutionError, ServiceExecutionResult, ServiceInvocation, ServiceOrchestrator,
    ServiceStage, KIWI_IMPORT,
};

pub use obsvc_state::{
    ImageBuildConfig, ImageConfigStore, ImageDescription, MemoryImageStore, PackageKey,
    PackageReference, RepositoryKey, RepositoryReference, StorageError, StorageResult,
    StoredImageConfig, SurrealImageStore, NOARCH,
};
