//! Storage trait for image build configurations
//!
//! `ImageConfigStore` is async and backend-agnostic. In-memory fakes live in
//! the `fakes` module; the SurrealDB implementation in `surreal_store`.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{ImageBuildConfig, PackageKey, StoredImageConfig};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Image configuration store.
///
/// Guarantees:
/// - `save` replaces the whole stored configuration or nothing; readers never
///   observe a mix of two saves.
/// - Concurrent saves for the same owner are applied one after another: each
///   gets its own increasing revision and the last one applied wins.
/// - Saving a configuration whose digest equals the stored digest keeps the
///   stored revision.
/// - `load` returns repositories and packages in the order they were saved.
#[async_trait]
pub trait ImageConfigStore: Send + Sync {
    /// Load the configuration owned by a package, if one was saved.
    async fn load(&self, owner: &PackageKey) -> StorageResult<Option<StoredImageConfig>>;

    /// Commit a configuration for a package.
    async fn save(
        &self,
        owner: &PackageKey,
        config: &ImageBuildConfig,
    ) -> StorageResult<StoredImageConfig>;

    /// Remove a configuration. No-op if absent.
    async fn delete(&self, owner: &PackageKey) -> StorageResult<()>;

    /// All owners with a stored configuration, sorted.
    async fn list(&self) -> StorageResult<Vec<PackageKey>>;
}
