//! SurrealDB-backed `ImageConfigStore`
//!
//! Each owner maps to one record `image_configs:⟨project/package⟩`. A save
//! writes the whole row in one statement, so a reader sees either the
//! previous or the new document, never a blend.
//!
//! The write is conditional on the revision the save started from: `CREATE`
//! when no row existed, `UPDATE ... WHERE revision = $expected` otherwise. A
//! save that loses the race reloads and tries again, so concurrent saves get
//! distinct, increasing revisions. Saves through one handle (and its clones)
//! are also queued on a local lock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{ContentDigest, ImageBuildConfig, PackageKey, StoredImageConfig};
use crate::storage_traits::{ImageConfigStore, StorageResult};

const DEFAULT_LOCAL_PATH: &str = ".obsvc/db";

/// Conditional writes attempted before a contended save gives up.
const MAX_SAVE_ATTEMPTS: usize = 5;

/// Row layout of the `image_configs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbImageConfig {
    owner_key: String,
    project: String,
    package: String,
    document: String,
    digest: String,
    revision: u64,
    saved_at: String,
}

#[derive(Debug, Deserialize)]
struct DbRevision {
    revision: u64,
}

#[derive(Debug, Deserialize)]
struct DbOwner {
    #[allow(dead_code)]
    owner_key: String,
    project: String,
    package: String,
}

/// SurrealDB-backed implementation of [`ImageConfigStore`].
#[derive(Clone)]
pub struct SurrealImageStore {
    db: Surreal<Any>,
    save_lock: Arc<Mutex<()>>,
}

impl SurrealImageStore {
    /// Connect to `url`, select `obsvc/main` and initialize the schema.
    pub async fn open(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns("obsvc").use_db("main").await?;

        migrations::init_schema(&db).await?;
        info!(url = %url, "SurrealImageStore connected");
        Ok(Self {
            db,
            save_lock: Arc::new(Mutex::new(())),
        })
    }

    /// In-memory instance for tests.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::open("mem://").await
    }

    /// Use `SURREALDB_URL` when set, otherwise local persistence in `.obsvc/db`.
    pub async fn from_env() -> StorageResult<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::open(&url).await;
        }

        std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
            StorageError::Backend(format!(
                "Failed to create database directory {DEFAULT_LOCAL_PATH}: {e}"
            ))
        })?;
        Self::open(&format!("surrealkv://{DEFAULT_LOCAL_PATH}")).await
    }

    fn owner_key(owner: &PackageKey) -> String {
        owner.to_string()
    }

    fn row_to_stored(row: DbImageConfig) -> StorageResult<StoredImageConfig> {
        let config = ImageBuildConfig::from_json(&row.document)?;
        let digest = config.digest()?;
        if digest.as_str() != row.digest {
            return Err(StorageError::DigestMismatch {
                owner: row.owner_key,
                expected: row.digest,
                actual: digest.to_string(),
            });
        }

        let saved_at = DateTime::parse_from_rfc3339(&row.saved_at)
            .map_err(|e| StorageError::Serialization(format!("bad saved_at: {e}")))?
            .with_timezone(&Utc);

        Ok(StoredImageConfig {
            owner: PackageKey::new(row.project, row.package),
            config,
            digest,
            revision: row.revision,
            saved_at,
        })
    }
}

impl SurrealImageStore {
    /// Write `row` only if the stored revision is still `expected`.
    ///
    /// Returns `false` when another save got there first.
    async fn write_row(&self, row: DbImageConfig, expected: Option<u64>) -> StorageResult<bool> {
        let key = row.owner_key.clone();
        match expected {
            None => {
                let mut res = self
                    .db
                    .query("CREATE type::thing('image_configs', $key) CONTENT $row RETURN revision")
                    .bind(("key", key))
                    .bind(("row", row))
                    .await?;
                let written: Vec<DbRevision> = res.take(0)?;
                Ok(!written.is_empty())
            }
            Some(expected) => {
                let mut res = self
                    .db
                    .query(
                        "UPDATE type::thing('image_configs', $key) CONTENT $row \
                         WHERE revision = $expected RETURN revision",
                    )
                    .bind(("key", key))
                    .bind(("row", row))
                    .bind(("expected", expected))
                    .await?;
                let written: Vec<DbRevision> = res.take(0)?;
                Ok(written.iter().any(|w| w.revision == expected + 1))
            }
        }
    }
}

#[async_trait]
impl ImageConfigStore for SurrealImageStore {
    #[instrument(skip(self), fields(owner = %owner))]
    async fn load(&self, owner: &PackageKey) -> StorageResult<Option<StoredImageConfig>> {
        let key = Self::owner_key(owner);
        let mut res = self
            .db
            .query(
                "SELECT owner_key, project, package, document, digest, revision, saved_at \
                 FROM image_configs WHERE owner_key = $key",
            )
            .bind(("key", key))
            .await?;

        let rows: Vec<DbImageConfig> = res.take(0)?;
        rows.into_iter().next().map(Self::row_to_stored).transpose()
    }

    #[instrument(skip(self, config), fields(owner = %owner))]
    async fn save(
        &self,
        owner: &PackageKey,
        config: &ImageBuildConfig,
    ) -> StorageResult<StoredImageConfig> {
        let document = config.to_canonical_json()?;
        let digest = ContentDigest::from_bytes(document.as_bytes());
        let _queued = self.save_lock.lock().await;

        let mut last_error = None;
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let expected = match self.load(owner).await? {
                Some(current) if current.digest == digest => {
                    debug!(revision = current.revision, "configuration unchanged");
                    return Ok(current);
                }
                Some(current) => Some(current.revision),
                None => None,
            };

            let revision = expected.map_or(1, |r| r + 1);
            let saved_at = Utc::now();
            let row = DbImageConfig {
                owner_key: Self::owner_key(owner),
                project: owner.project.clone(),
                package: owner.package.clone(),
                document: document.clone(),
                digest: digest.to_string(),
                revision,
                saved_at: saved_at.to_rfc3339(),
            };

            match self.write_row(row, expected).await {
                Ok(true) => {
                    debug!(revision, digest = %digest.short(), "configuration saved");
                    return Ok(StoredImageConfig {
                        owner: owner.clone(),
                        config: config.clone(),
                        digest,
                        revision,
                        saved_at,
                    });
                }
                Ok(false) => debug!(attempt, "revision moved during save, retrying"),
                Err(e) => {
                    debug!(attempt, error = %e, "conditional write failed, retrying");
                    last_error = Some(e);
                }
            }
        }

        warn!(attempts = MAX_SAVE_ATTEMPTS, "save abandoned under contention");
        Err(last_error.unwrap_or_else(|| StorageError::Conflict {
            owner: owner.to_string(),
        }))
    }

    async fn delete(&self, owner: &PackageKey) -> StorageResult<()> {
        self.db
            .query("DELETE type::thing('image_configs', $key)")
            .bind(("key", Self::owner_key(owner)))
            .await?
            .check()?;
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<PackageKey>> {
        let mut res = self
            .db
            .query("SELECT project, package, owner_key FROM image_configs ORDER BY owner_key ASC")
            .await?;
        let rows: Vec<DbOwner> = res.take(0)?;
        let mut owners: Vec<PackageKey> = rows
            .into_iter()
            .map(|r| PackageKey::new(r.project, r.package))
            .collect();
        owners.sort();
        Ok(owners)
    }
}
