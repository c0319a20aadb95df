//! Image configuration edit errors.

use obsvc_state::StorageError;
use thiserror::Error;

use crate::binaries::BinaryIndexError;

/// Errors raised by an [`ImageEditor`](super::ImageEditor) session.
///
/// Validation variants leave the draft untouched; `Storage` on save keeps it.
#[derive(Debug, Error)]
pub enum ImageConfigError {
    #[error("repository {repository} is already part of the image")]
    DuplicateRepository { repository: String },

    #[error("repository {repository} is not part of the image")]
    RepositoryNotFound { repository: String },

    #[error("package {name} is not part of the image")]
    PackageNotFound { name: String },

    #[error("package {name} is already part of the image")]
    DuplicatePackage { name: String },

    /// No repository's index lists the package
    #[error("package {name} is not available in any image repository")]
    PackageNotResolvable { name: String },

    #[error("package {name} is not available for architecture {architecture}")]
    ArchitectureNotAvailable { name: String, architecture: String },

    /// Every repository the package was resolved from has been removed
    #[error("package {name} no longer resolves against the image repositories")]
    UnresolvedPackage { name: String },

    #[error("binary lookup failed for repository {repository}: {source}")]
    BinaryIndex {
        repository: String,
        #[source]
        source: BinaryIndexError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience result alias.
pub type ImageConfigResult<T> = std::result::Result<T, ImageConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_index_error_names_repository() {
        let err = ImageConfigError::BinaryIndex {
            repository: "openSUSE_Tumbleweed@home:tom".to_string(),
            source: BinaryIndexError::Transport("connection refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("openSUSE_Tumbleweed@home:tom"));
        assert!(msg.contains("connection refused"));
    }
}
