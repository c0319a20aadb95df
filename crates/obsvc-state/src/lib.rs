//! obsvc-state: persistence for kiwi image build configurations
//!
//! This crate owns the persisted shape of an image build configuration and
//! the stores that hold it. Edit sessions in `obsvc-core` mutate a cloned
//! configuration and hand the finished draft to an [`ImageConfigStore`],
//! which replaces the stored record in a single step.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: whole-record atomic writes and order-preserving round trips.
//!
//! ## Key Components
//!
//! - `ImageBuildConfig`: repositories, packages and descriptive metadata
//! - `ImageConfigStore`: load/save/delete/list contract
//! - `MemoryImageStore`: in-memory fake used by tests
//! - `SurrealImageStore`: SurrealDB-backed store (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::MemoryImageStore;
pub use schema::{
    ContentDigest, ImageBuildConfig, ImageDescription, PackageKey, PackageReference,
    RepositoryKey, RepositoryReference, StoredImageConfig, NOARCH,
};
pub use storage_traits::{ImageConfigStore, StorageResult};
pub use surreal_store::SurrealImageStore;
