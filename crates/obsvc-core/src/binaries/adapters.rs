//! The two backend endpoints behind [`BinaryIndex`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::parse::parse_listing;
use super::{AvailableBinaries, BinaryIndex, BinaryIndexError};
use crate::backend::{BackendClient, BackendError, BackendRequest, BackendResponse};
use crate::obs;

/// `GET /build/{project}/_availablebinaries?path={project}/{repository}`
///
/// Returns an XML listing covering every architecture of the repository;
/// results are narrowed to the requested one.
#[derive(Clone)]
pub struct PathListingIndex {
    client: Arc<dyn BackendClient>,
}

impl PathListingIndex {
    pub fn new(client: Arc<dyn BackendClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryIndex for PathListingIndex {
    #[instrument(skip(self))]
    async fn lookup(
        &self,
        project: &str,
        repository: &str,
        architecture: &str,
    ) -> Result<AvailableBinaries, BinaryIndexError> {
        let request = BackendRequest::get(format!("/build/{project}/_availablebinaries"))
            .with_query("path", format!("{project}/{repository}"));
        finish(
            project,
            repository,
            architecture,
            self.client.send(request).await,
        )
    }
}

/// `POST /_command?prpa={project}/{repository}/{architecture}&cmd=availablebinaries`
#[derive(Clone)]
pub struct CommandListingIndex {
    client: Arc<dyn BackendClient>,
}

impl CommandListingIndex {
    pub fn new(client: Arc<dyn BackendClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryIndex for CommandListingIndex {
    #[instrument(skip(self))]
    async fn lookup(
        &self,
        project: &str,
        repository: &str,
        architecture: &str,
    ) -> Result<AvailableBinaries, BinaryIndexError> {
        let request = BackendRequest::post("/_command")
            .with_query("prpa", format!("{project}/{repository}/{architecture}"))
            .with_query("cmd", "availablebinaries");
        finish(
            project,
            repository,
            architecture,
            self.client.send(request).await,
        )
    }
}

/// Shared tail of both adapters: status check, decode, narrow, log.
fn finish(
    project: &str,
    repository: &str,
    architecture: &str,
    sent: Result<BackendResponse, BackendError>,
) -> Result<AvailableBinaries, BinaryIndexError> {
    let result = sent
        .map_err(|e| BinaryIndexError::Transport(e.to_string()))
        .and_then(|response| {
            if !response.is_success() {
                return Err(BinaryIndexError::Status {
                    status: response.status,
                    body: response.text(),
                });
            }
            let mut binaries = parse_listing(&response.text(), architecture)?;
            binaries.retain_architecture(architecture);
            Ok(binaries)
        });

    match &result {
        Ok(binaries) => {
            obs::emit_lookup_completed(project, repository, architecture, binaries.len())
        }
        Err(err) => obs::emit_lookup_failed(project, repository, err),
    }
    result
}
