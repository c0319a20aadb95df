//! In-memory fake for `ImageConfigStore` (testing and dry runs)

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::schema::{ImageBuildConfig, PackageKey, StoredImageConfig};
use crate::storage_traits::{ImageConfigStore, StorageResult};

/// In-memory store backed by a `HashMap<owner, StoredImageConfig>`.
///
/// A save swaps the whole entry while holding the lock.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    configs: Mutex<HashMap<PackageKey, StoredImageConfig>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageConfigStore for MemoryImageStore {
    async fn load(&self, owner: &PackageKey) -> StorageResult<Option<StoredImageConfig>> {
        let configs = self.configs.lock().unwrap();
        Ok(configs.get(owner).cloned())
    }

    async fn save(
        &self,
        owner: &PackageKey,
        config: &ImageBuildConfig,
    ) -> StorageResult<StoredImageConfig> {
        let digest = config.digest()?;
        let mut configs = self.configs.lock().unwrap();

        let revision = match configs.get(owner) {
            Some(current) if current.digest == digest => return Ok(current.clone()),
            Some(current) => current.revision + 1,
            None => 1,
        };

        let stored = StoredImageConfig {
            owner: owner.clone(),
            config: config.clone(),
            digest,
            revision,
            saved_at: Utc::now(),
        };
        configs.insert(owner.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, owner: &PackageKey) -> StorageResult<()> {
        let mut configs = self.configs.lock().unwrap();
        configs.remove(owner);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<PackageKey>> {
        let configs = self.configs.lock().unwrap();
        let mut owners: Vec<PackageKey> = configs.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}
