//! Idempotent schema setup for the artifact repository's SurrealDB tables.
//!
//! Mirrors §4.5's table/index list: `collections`, `artifacts`,
//! `artifact_content`, `collection_tags`, `artifact_views`, `comparisons`,
//! `schema_info`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::db_err;
use crucible_core::Result;

/// Run every table-init statement. `DEFINE TABLE`/`DEFINE FIELD`/`DEFINE
/// INDEX` are idempotent in SurrealDB, so this is safe to call on every
/// startup.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    init_collections_table(db).await?;
    init_artifacts_table(db).await?;
    init_artifact_content_table(db).await?;
    init_collection_tags_table(db).await?;
    init_artifact_views_table(db).await?;
    init_comparisons_table(db).await?;
    init_schema_info_table(db).await?;
    debug!("artifact repository schema initialized");
    Ok(())
}

/// `collections`
///
/// | field            | type            |
/// |-------------------|-----------------|
/// | collection_id     | string (unique) |
/// | session_id        | string (unique) |
/// | environment_name  | string          |
/// | success           | option<bool>    |
/// | duration_ms       | option<int>     |
/// | created_at        | datetime        |
/// | metadata          | object          |
/// | total_size        | int             |
/// | artifact_count    | int             |
///
/// Indexes: (created_at, environment_name, success).
async fn init_collections_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE collections SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD collection_id ON collections TYPE string;
        DEFINE FIELD session_id ON collections TYPE string;
        DEFINE FIELD environment_name ON collections TYPE string;
        DEFINE FIELD success ON collections TYPE option<bool>;
        DEFINE FIELD duration_ms ON collections TYPE option<int>;
        DEFINE FIELD created_at ON collections TYPE datetime;
        DEFINE FIELD metadata ON collections FLEXIBLE TYPE object;
        DEFINE FIELD total_size ON collections TYPE int DEFAULT 0;
        DEFINE FIELD artifact_count ON collections TYPE int DEFAULT 0;
        DEFINE INDEX idx_collections_id ON collections FIELDS collection_id UNIQUE;
        DEFINE INDEX idx_collections_session ON collections FIELDS session_id UNIQUE;
        DEFINE INDEX idx_collections_lookup ON collections FIELDS created_at, environment_name, success;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `artifacts`
///
/// Foreign key `collection_id` cascades delete from `collections`.
/// Indexes: (collection_id, type, name, content_type).
async fn init_artifacts_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE artifacts SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD artifact_id ON artifacts TYPE string;
        DEFINE FIELD collection_id ON artifacts TYPE string;
        DEFINE FIELD artifact_type ON artifacts TYPE string;
        DEFINE FIELD name ON artifacts TYPE string;
        DEFINE FIELD file_path ON artifacts TYPE string;
        DEFINE FIELD file_size ON artifacts TYPE int;
        DEFINE FIELD content_type ON artifacts TYPE string;
        DEFINE FIELD content_hash ON artifacts TYPE string;
        DEFINE FIELD created_at ON artifacts TYPE datetime;
        DEFINE FIELD metadata ON artifacts FLEXIBLE TYPE object;
        DEFINE INDEX idx_artifacts_id ON artifacts FIELDS artifact_id UNIQUE;
        DEFINE INDEX idx_artifacts_lookup ON artifacts FIELDS collection_id, artifact_type, name, content_type;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `artifact_content` — full-text content for searchable artifact types.
async fn init_artifact_content_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE artifact_content SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD artifact_id ON artifact_content TYPE string;
        DEFINE FIELD collection_id ON artifact_content TYPE string;
        DEFINE FIELD content ON artifact_content TYPE string;
        DEFINE INDEX idx_artifact_content_collection ON artifact_content FIELDS collection_id;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `collection_tags`
async fn init_collection_tags_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE collection_tags SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD collection_id ON collection_tags TYPE string;
        DEFINE FIELD tag ON collection_tags TYPE string;
        DEFINE INDEX idx_collection_tags_tag ON collection_tags FIELDS tag;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `artifact_views` — saved searches.
async fn init_artifact_views_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE artifact_views SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD view_id ON artifact_views TYPE string;
        DEFINE FIELD name ON artifact_views TYPE string;
        DEFINE FIELD query ON artifact_views TYPE string;
        DEFINE FIELD filters ON artifact_views FLEXIBLE TYPE object;
        DEFINE FIELD created_at ON artifact_views TYPE datetime;
        DEFINE INDEX idx_artifact_views_id ON artifact_views FIELDS view_id UNIQUE;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `comparisons` — unique per unordered collection pair.
async fn init_comparisons_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE comparisons SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD collection_id1 ON comparisons TYPE string;
        DEFINE FIELD collection_id2 ON comparisons TYPE string;
        DEFINE FIELD payload ON comparisons FLEXIBLE TYPE object;
        DEFINE FIELD created_at ON comparisons TYPE datetime;
        DEFINE INDEX idx_comparisons_pair ON comparisons FIELDS collection_id1, collection_id2 UNIQUE;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// `schema_info` — one row recording the schema version in effect.
async fn init_schema_info_table(db: &Surreal<Any>) -> Result<()> {
    db.query(
        r#"
        DEFINE TABLE schema_info SCHEMALESS PERMISSIONS FOR create, select, update, delete FULL;
        DEFINE FIELD version ON schema_info TYPE int;
        DEFINE FIELD applied_at ON schema_info TYPE datetime;
        "#,
    )
    .await
    .map_err(db_err)?;
    Ok(())
}
