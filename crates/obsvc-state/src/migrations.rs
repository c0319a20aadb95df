//! SurrealDB schema for image configuration storage
//!
//! Safe to run on every connection; `DEFINE ... IF NOT EXISTS` is idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize the `image_configs` table.
///
/// Schema:
/// ```text
/// TABLE image_configs {
///   id:        image_configs:⟨project/package⟩
///   owner_key: STRING (unique)
///   project:   STRING
///   package:   STRING
///   document:  STRING (canonical JSON of ImageBuildConfig)
///   digest:    STRING (SHA-256 of document)
///   revision:  INT
///   saved_at:  STRING (RFC 3339)
/// }
/// ```
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing image_configs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS image_configs SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS owner_key ON image_configs TYPE string;
        DEFINE FIELD IF NOT EXISTS project ON image_configs TYPE string;
        DEFINE FIELD IF NOT EXISTS package ON image_configs TYPE string;
        DEFINE FIELD IF NOT EXISTS document ON image_configs TYPE string;
        DEFINE FIELD IF NOT EXISTS digest ON image_configs TYPE string;
        DEFINE FIELD IF NOT EXISTS revision ON image_configs TYPE int;
        DEFINE FIELD IF NOT EXISTS saved_at ON image_configs TYPE string;
        DEFINE INDEX IF NOT EXISTS idx_image_owner ON image_configs FIELDS owner_key UNIQUE;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::Backend(format!("schema setup failed: {e}")))?;

    info!("image_configs schema ready");
    Ok(())
}
