//! `ArtifactRepository`: the durable, indexed store of artifact collections.
//!
//! Backed by an embedded SurrealDB instance connected through the `any`
//! engine, so the same code path serves in-memory tests and on-disk
//! persistence (`surrealkv://<dir>`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{db_err, io_err};
use crate::migrations;
use crate::model::{
    Artifact, ArtifactCollection, ArtifactDiff, ArtifactType, ArtifactView, Comparison,
    ComparisonSummary, ContentDiffSummary, RepositoryConfig, RepositoryStatistics, SearchFilters,
    SearchResultRow, Significance,
};
use crucible_core::Result;

const SEARCH_LIMIT: usize = 1000;
const FIRST_DIFF_LINES: usize = 20;

/// Row shape as stored in the `collections` table (DB-facing, no nested
/// artifacts/tags — those live in their own tables and are joined in).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRow {
    collection_id: String,
    session_id: String,
    environment_name: String,
    success: Option<bool>,
    duration_ms: Option<u64>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    artifact_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactRow {
    artifact_id: String,
    collection_id: String,
    artifact_type: ArtifactType,
    name: String,
    file_path: String,
    file_size: u64,
    content_type: String,
    content_hash: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TagRow {
    collection_id: String,
    tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentRow {
    artifact_id: String,
    collection_id: String,
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ViewRow {
    view_id: String,
    name: String,
    query: String,
    filters: SearchFilters,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComparisonRow {
    collection_id1: String,
    collection_id2: String,
    payload: Comparison,
    created_at: DateTime<Utc>,
}

/// Input to [`ArtifactRepository::store_collection`]: a collection's
/// identity plus the raw files to ingest.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub session_id: String,
    pub environment_name: String,
    pub success: Option<bool>,
    pub duration_ms: Option<u64>,
    pub metadata: serde_json::Value,
}

/// A single artifact file to be ingested by `store_collection`.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    pub artifact_type: ArtifactType,
    pub name: String,
    pub file_path: PathBuf,
}

pub struct ArtifactRepository {
    db: Surreal<Any>,
    config: RepositoryConfig,
}

impl ArtifactRepository {
    /// Connect to an on-disk repository rooted at `dir`, creating it if
    /// absent, and run schema migrations.
    #[instrument(skip(config))]
    pub async fn open(dir: &Path, config: RepositoryConfig) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let url = format!("surrealkv://{}", dir.display());
        let db = surrealdb::engine::any::connect(&url).await.map_err(db_err)?;
        db.use_ns("crucible").use_db("artifacts").await.map_err(db_err)?;
        migrations::init_schema(&db).await?;
        info!(path = %dir.display(), "artifact repository opened");
        Ok(ArtifactRepository { db, config })
    }

    /// In-memory instance, for tests.
    pub async fn in_memory(config: RepositoryConfig) -> Result<Self> {
        let db = surrealdb::engine::any::connect("mem://").await.map_err(db_err)?;
        db.use_ns("crucible").use_db("artifacts").await.map_err(db_err)?;
        migrations::init_schema(&db).await?;
        Ok(ArtifactRepository { db, config })
    }

    // ------------------------------------------------------------------
    // Store
    // ------------------------------------------------------------------

    /// Transactionally ingest a collection and its artifacts.
    #[instrument(skip(self, metadata, artifacts))]
    pub async fn store_collection(
        &self,
        metadata: CollectionMetadata,
        artifacts: &[ArtifactInput],
    ) -> Result<String> {
        let collection_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut rows = Vec::with_capacity(artifacts.len());
        let mut content_rows = Vec::new();
        let mut total_size: u64 = 0;

        for input in artifacts {
            let bytes = std::fs::read(&input.file_path).map_err(io_err)?;
            let file_size = bytes.len() as u64;
            total_size += file_size;

            let content_type = detect_content_type(&input.file_path, &bytes);
            let content_hash = hex::encode(Sha256::digest(&bytes));
            let artifact_id = Uuid::new_v4().to_string();

            if self.config.enable_content_indexing
                && file_size <= self.config.max_content_size_bytes
                && (!self.config.index_text_files_only || is_indexable(&content_type))
            {
                if let Ok(text) = String::from_utf8(bytes.clone()) {
                    content_rows.push(ContentRow {
                        artifact_id: artifact_id.clone(),
                        collection_id: collection_id.clone(),
                        content: text,
                    });
                }
            }

            rows.push(ArtifactRow {
                artifact_id,
                collection_id: collection_id.clone(),
                artifact_type: input.artifact_type,
                name: input.name.clone(),
                file_path: input.file_path.display().to_string(),
                file_size,
                content_type,
                content_hash,
                created_at: now,
                metadata: serde_json::Value::Null,
            });
        }

        let collection_row = CollectionRow {
            collection_id: collection_id.clone(),
            session_id: metadata.session_id,
            environment_name: metadata.environment_name,
            success: metadata.success,
            duration_ms: metadata.duration_ms,
            created_at: now,
            metadata: metadata.metadata,
            total_size,
            artifact_count: rows.len() as u64,
        };

        let insert_result: Result<()> = async {
            let _: Option<CollectionRow> = self
                .db
                .create("collections")
                .content(collection_row)
                .await
                .map_err(db_err)?;

            for row in &rows {
                let _: Option<ArtifactRow> = self
                    .db
                    .create("artifacts")
                    .content(row.clone())
                    .await
                    .map_err(db_err)?;
            }

            for row in &content_rows {
                let _: Option<ContentRow> = self
                    .db
                    .create("artifact_content")
                    .content(row.clone())
                    .await
                    .map_err(db_err)?;
            }

            Ok(())
        }
        .await;

        if let Err(err) = insert_result {
            warn!(collection_id = %collection_id, "store_collection failed, rolling back");
            let _ = self.delete_collection_cascade(&collection_id).await;
            return Err(err);
        }

        debug!(collection_id = %collection_id, artifact_count = rows.len(), "collection stored");
        Ok(collection_id)
    }

    async fn delete_collection_cascade(&self, collection_id: &str) -> Result<()> {
        let id = collection_id.to_string();
        self.db
            .query("DELETE artifacts WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?;
        self.db
            .query("DELETE artifact_content WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?;
        self.db
            .query("DELETE collection_tags WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?;
        self.db
            .query("DELETE collections WHERE collection_id = $id")
            .bind(("id", id))
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    #[instrument(skip(self, filters))]
    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<SearchResultRow>> {
        let mut collections: Vec<CollectionRow> = self
            .db
            .query("SELECT * FROM collections ORDER BY created_at DESC")
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        collections.retain(|c| {
            filters.environment.as_deref().map_or(true, |e| e == c.environment_name)
                && filters.success.map_or(true, |s| c.success == Some(s))
                && filters.date_from.map_or(true, |d| c.created_at >= d)
                && filters.date_to.map_or(true, |d| c.created_at <= d)
        });

        let tag_match: Option<std::collections::HashSet<String>> = if let Some(tag) = &filters.tag {
            let tag_owned = tag.clone();
            let rows: Vec<TagRow> = self
                .db
                .query("SELECT * FROM collection_tags WHERE tag = $tag")
                .bind(("tag", tag_owned))
                .await
                .map_err(db_err)?
                .take(0)
                .map_err(db_err)?;
            Some(rows.into_iter().map(|r| r.collection_id).collect())
        } else {
            None
        };
        if let Some(ids) = &tag_match {
            collections.retain(|c| ids.contains(&c.collection_id));
        }

        let mut results = Vec::new();
        for collection in collections {
            let cid = collection.collection_id.clone();
            let mut artifacts: Vec<ArtifactRow> = self
                .db
                .query("SELECT * FROM artifacts WHERE collection_id = $id")
                .bind(("id", cid.clone()))
                .await
                .map_err(db_err)?
                .take(0)
                .map_err(db_err)?;

            if let Some(kind) = filters.artifact_type {
                artifacts.retain(|a| a.artifact_type == kind);
            }

            if !query.is_empty() {
                let matching_content_ids: std::collections::HashSet<String> = {
                    let q = format!("%{}%", query);
                    let rows: Vec<ContentRow> = self
                        .db
                        .query("SELECT * FROM artifact_content WHERE collection_id = $id AND content ~ $q")
                        .bind(("id", cid.clone()))
                        .bind(("q", q))
                        .await
                        .map_err(db_err)?
                        .take(0)
                        .map_err(db_err)?;
                    rows.into_iter().map(|r| r.artifact_id).collect()
                };
                artifacts.retain(|a| {
                    a.name.to_lowercase().contains(&query.to_lowercase())
                        || matching_content_ids.contains(&a.artifact_id)
                });
            }

            artifacts.sort_by(|a, b| {
                a.artifact_type
                    .as_str()
                    .cmp(b.artifact_type.as_str())
                    .then_with(|| a.name.cmp(&b.name))
            });

            for a in artifacts {
                results.push(SearchResultRow {
                    collection_id: cid.clone(),
                    artifact_id: a.artifact_id,
                    artifact_type: a.artifact_type,
                    name: a.name,
                    created_at: a.created_at,
                });
                if results.len() >= SEARCH_LIMIT {
                    return Ok(results);
                }
            }
        }

        Ok(results)
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn compare(&self, collection_id1: &str, collection_id2: &str) -> Result<Comparison> {
        let c1 = self.load_collection(collection_id1).await?;
        let c2 = self.load_collection(collection_id2).await?;

        let environment_match = c1.environment_name == c2.environment_name;
        let success_change = c1.success != c2.success;
        let duration_delta_ms = match (c1.duration_ms, c2.duration_ms) {
            (Some(a), Some(b)) => Some(b as i64 - a as i64),
            _ => None,
        };
        let size_delta = c2.total_size() as i64 - c1.total_size() as i64;
        let artifact_count_delta = c2.artifact_count() as i64 - c1.artifact_count() as i64;
        let time_between_hours = (c2.created_at - c1.created_at).num_seconds() as f64 / 3600.0;

        let mut artifact_diffs_by_type: BTreeMap<String, ArtifactDiff> = BTreeMap::new();
        let by_type = |artifacts: &[Artifact]| -> BTreeMap<ArtifactType, BTreeMap<&str, &Artifact>> {
            let mut map: BTreeMap<ArtifactType, BTreeMap<&str, &Artifact>> = BTreeMap::new();
            for a in artifacts {
                map.entry(a.artifact_type)
                    .or_default()
                    .insert(a.name.as_str(), a);
            }
            map
        };
        let map1 = by_type(&c1.artifacts);
        let map2 = by_type(&c2.artifacts);
        let all_types: std::collections::BTreeSet<ArtifactType> =
            map1.keys().chain(map2.keys()).copied().collect();

        let mut content_diffs = Vec::new();

        for kind in all_types {
            let empty = BTreeMap::new();
            let names1 = map1.get(&kind).unwrap_or(&empty);
            let names2 = map2.get(&kind).unwrap_or(&empty);

            let mut diff = ArtifactDiff::default();
            for (name, a2) in names2 {
                match names1.get(name) {
                    None => diff.new.push((*name).to_string()),
                    Some(a1) => {
                        if a1.content_hash != a2.content_hash {
                            diff.changed.push((*name).to_string());
                            if let Some(summary) = self
                                .text_content_diff(collection_id1, collection_id2, a1, a2)
                                .await?
                            {
                                content_diffs.push(summary);
                            }
                        }
                    }
                }
            }
            for name in names1.keys() {
                if !names2.contains_key(name) {
                    diff.missing.push((*name).to_string());
                }
            }
            artifact_diffs_by_type.insert(kind.as_str().to_string(), diff);
        }

        let summary = summarize_comparison(
            success_change,
            duration_delta_ms,
            c1.duration_ms,
            size_delta,
            &artifact_diffs_by_type,
        );

        let comparison = Comparison {
            collection_id1: collection_id1.to_string(),
            collection_id2: collection_id2.to_string(),
            environment_match,
            success_change,
            duration_delta_ms,
            size_delta,
            artifact_count_delta,
            time_between_hours,
            artifact_diffs_by_type,
            content_diffs,
            summary,
            created_at: Utc::now(),
        };

        let row = ComparisonRow {
            collection_id1: collection_id1.to_string(),
            collection_id2: collection_id2.to_string(),
            payload: comparison.clone(),
            created_at: comparison.created_at,
        };
        let id1 = collection_id1.to_string();
        let id2 = collection_id2.to_string();
        self.db
            .query(
                "DELETE comparisons WHERE collection_id1 = $id1 AND collection_id2 = $id2; \
                 CREATE comparisons CONTENT $row",
            )
            .bind(("id1", id1))
            .bind(("id2", id2))
            .bind(("row", row))
            .await
            .map_err(db_err)?;

        Ok(comparison)
    }

    async fn text_content_diff(
        &self,
        collection_id1: &str,
        collection_id2: &str,
        a1: &Artifact,
        a2: &Artifact,
    ) -> Result<Option<ContentDiffSummary>> {
        if !is_indexable(&a1.content_type) || !is_indexable(&a2.content_type) {
            return Ok(None);
        }
        if a1.file_size > self.config.max_content_size_bytes
            || a2.file_size > self.config.max_content_size_bytes
        {
            return Ok(None);
        }

        let c1 = self.load_content(collection_id1, &a1.id).await?;
        let c2 = self.load_content(collection_id2, &a2.id).await?;
        let (Some(c1), Some(c2)) = (c1, c2) else {
            return Ok(None);
        };

        let lines1: Vec<&str> = c1.lines().collect();
        let lines2: Vec<&str> = c2.lines().collect();
        let set1: std::collections::HashSet<&str> = lines1.iter().copied().collect();
        let set2: std::collections::HashSet<&str> = lines2.iter().copied().collect();

        let additions = lines2.iter().filter(|l| !set1.contains(**l)).count();
        let deletions = lines1.iter().filter(|l| !set2.contains(**l)).count();
        let first_lines = lines2
            .iter()
            .filter(|l| !set1.contains(**l))
            .take(FIRST_DIFF_LINES)
            .map(|l| l.to_string())
            .collect();

        Ok(Some(ContentDiffSummary {
            artifact_name: a2.name.clone(),
            additions,
            deletions,
            first_lines,
        }))
    }

    async fn load_content(&self, collection_id: &str, artifact_id: &str) -> Result<Option<String>> {
        let cid = collection_id.to_string();
        let aid = artifact_id.to_string();
        let rows: Vec<ContentRow> = self
            .db
            .query("SELECT * FROM artifact_content WHERE collection_id = $cid AND artifact_id = $aid")
            .bind(("cid", cid))
            .bind(("aid", aid))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;
        Ok(rows.into_iter().next().map(|r| r.content))
    }

    async fn load_collection(&self, collection_id: &str) -> Result<ArtifactCollection> {
        let id = collection_id.to_string();
        let rows: Vec<CollectionRow> = self
            .db
            .query("SELECT * FROM collections WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| crucible_core::CrucibleError::resource(
                format!("collection not found: {collection_id}"),
                false,
            ))?;

        let artifact_rows: Vec<ArtifactRow> = self
            .db
            .query("SELECT * FROM artifacts WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        let tag_rows: Vec<TagRow> = self
            .db
            .query("SELECT * FROM collection_tags WHERE collection_id = $id")
            .bind(("id", id))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        Ok(ArtifactCollection {
            collection_id: row.collection_id,
            session_id: row.session_id,
            environment_name: row.environment_name,
            success: row.success,
            duration_ms: row.duration_ms,
            created_at: row.created_at,
            metadata: row.metadata,
            artifacts: artifact_rows
                .into_iter()
                .map(|a| Artifact {
                    id: a.artifact_id,
                    collection_id: a.collection_id,
                    artifact_type: a.artifact_type,
                    name: a.name,
                    file_path: a.file_path,
                    file_size: a.file_size,
                    content_type: a.content_type,
                    content_hash: a.content_hash,
                    created_at: a.created_at,
                    metadata: a.metadata,
                })
                .collect(),
            tags: tag_rows.into_iter().map(|t| t.tag).collect(),
        })
    }

    /// Load a full collection by id, with its artifacts and tags joined.
    pub async fn get_collection(&self, collection_id: &str) -> Result<ArtifactCollection> {
        self.load_collection(collection_id).await
    }

    // ------------------------------------------------------------------
    // Tagging
    // ------------------------------------------------------------------

    #[instrument(skip(self, tags))]
    pub async fn tag(&self, collection_id: &str, tags: &[String]) -> Result<()> {
        let id = collection_id.to_string();
        self.db
            .query("DELETE collection_tags WHERE collection_id = $id")
            .bind(("id", id.clone()))
            .await
            .map_err(db_err)?;

        for tag in tags {
            let row = TagRow {
                collection_id: collection_id.to_string(),
                tag: tag.clone(),
            };
            let _: Option<TagRow> = self.db.create("collection_tags").content(row).await.map_err(db_err)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<ArtifactCollection>> {
        let tag_owned = tag.to_string();
        let rows: Vec<TagRow> = self
            .db
            .query("SELECT * FROM collection_tags WHERE tag = $tag")
            .bind(("tag", tag_owned))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        let mut collections = Vec::new();
        for row in rows {
            collections.push(self.load_collection(&row.collection_id).await?);
        }
        Ok(collections)
    }

    // ------------------------------------------------------------------
    // Saved views
    // ------------------------------------------------------------------

    #[instrument(skip(self, filters))]
    pub async fn create_view(&self, name: &str, query: &str, filters: SearchFilters) -> Result<String> {
        let view_id = Uuid::new_v4().to_string();
        let row = ViewRow {
            view_id: view_id.clone(),
            name: name.to_string(),
            query: query.to_string(),
            filters,
            created_at: Utc::now(),
        };
        let _: Option<ViewRow> = self.db.create("artifact_views").content(row).await.map_err(db_err)?;
        Ok(view_id)
    }

    #[instrument(skip(self))]
    pub async fn execute_view(&self, view_id: &str) -> Result<Vec<SearchResultRow>> {
        let id = view_id.to_string();
        let rows: Vec<ViewRow> = self
            .db
            .query("SELECT * FROM artifact_views WHERE view_id = $id")
            .bind(("id", id))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;
        let view = rows
            .into_iter()
            .next()
            .ok_or_else(|| crucible_core::CrucibleError::resource(format!("view not found: {view_id}"), false))?;
        self.search(&view.query, &view.filters).await
    }

    // ------------------------------------------------------------------
    // Export / Import
    // ------------------------------------------------------------------

    /// Export a collection to `dest_dir` as a directory containing each
    /// artifact plus a `manifest.yaml` metadata file.
    #[instrument(skip(self))]
    pub async fn export(&self, collection_id: &str, dest_dir: &Path) -> Result<()> {
        let collection = self.load_collection(collection_id).await?;
        std::fs::create_dir_all(dest_dir).map_err(io_err)?;

        for artifact in &collection.artifacts {
            let src = Path::new(&artifact.file_path);
            if src.exists() {
                let dest = dest_dir.join(&artifact.name);
                std::fs::copy(src, dest).map_err(io_err)?;
            }
        }

        let manifest = serde_yaml::to_string(&collection).map_err(|e| {
            crucible_core::CrucibleError::resource(format!("failed to serialize manifest: {e}"), false)
        })?;
        std::fs::write(dest_dir.join("manifest.yaml"), manifest).map_err(io_err)?;
        Ok(())
    }

    /// Import a previously exported directory, assigning a fresh session id
    /// and recording provenance in metadata.
    #[instrument(skip(self))]
    pub async fn import(&self, src_dir: &Path) -> Result<String> {
        let manifest_text = std::fs::read_to_string(src_dir.join("manifest.yaml")).map_err(io_err)?;
        let original: ArtifactCollection = serde_yaml::from_str(&manifest_text).map_err(|e| {
            crucible_core::CrucibleError::resource(format!("failed to parse manifest: {e}"), false)
        })?;

        let mut metadata = match original.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("imported_from".to_string(), serde_json::Value::String(src_dir.display().to_string()));
        metadata.insert("original_id".to_string(), serde_json::Value::String(original.collection_id.clone()));

        let artifacts: Vec<ArtifactInput> = original
            .artifacts
            .iter()
            .map(|a| ArtifactInput {
                artifact_type: a.artifact_type,
                name: a.name.clone(),
                file_path: src_dir.join(&a.name),
            })
            .collect();

        let collection_id = self
            .store_collection(
                CollectionMetadata {
                    session_id: Uuid::new_v4().to_string(),
                    environment_name: original.environment_name,
                    success: original.success,
                    duration_ms: original.duration_ms,
                    metadata: serde_json::Value::Object(metadata),
                },
                &artifacts,
            )
            .await?;

        if !original.tags.is_empty() {
            self.tag(&collection_id, &original.tags).await?;
        }

        Ok(collection_id)
    }

    // ------------------------------------------------------------------
    // Cleanup / backup / restore
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn cleanup_old(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let old: Vec<CollectionRow> = self
            .db
            .query("SELECT * FROM collections WHERE created_at < $cutoff")
            .bind(("cutoff", cutoff))
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        for row in &old {
            self.delete_collection_cascade(&row.collection_id).await?;
        }
        Ok(old.len())
    }

    /// Archive the whole repository directory by copying it to `dest`.
    pub fn backup(&self, repo_dir: &Path, dest: &Path) -> Result<()> {
        copy_dir_recursive(repo_dir, dest).map_err(io_err)
    }

    /// Replace `repo_dir`'s contents with `backup_dir`'s via an atomic
    /// rename-based swap; rolls back if the swap-in fails.
    pub fn restore(&self, repo_dir: &Path, backup_dir: &Path) -> Result<()> {
        let staging = repo_dir.with_extension("restoring");
        copy_dir_recursive(backup_dir, &staging).map_err(io_err)?;

        let previous = repo_dir.with_extension("previous");
        if repo_dir.exists() {
            std::fs::rename(repo_dir, &previous).map_err(io_err)?;
        }
        match std::fs::rename(&staging, repo_dir) {
            Ok(()) => {
                let _ = std::fs::remove_dir_all(&previous);
                Ok(())
            }
            Err(err) => {
                if previous.exists() {
                    let _ = std::fs::rename(&previous, repo_dir);
                }
                Err(io_err(err))
            }
        }
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<RepositoryStatistics> {
        let collections: Vec<CollectionRow> = self
            .db
            .query("SELECT * FROM collections")
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;
        let artifacts: Vec<ArtifactRow> = self
            .db
            .query("SELECT * FROM artifacts")
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;
        let tags: Vec<TagRow> = self
            .db
            .query("SELECT * FROM collection_tags")
            .await
            .map_err(db_err)?
            .take(0)
            .map_err(db_err)?;

        let cutoff = Utc::now() - Duration::days(7);
        let mut by_environment: BTreeMap<String, usize> = BTreeMap::new();
        for c in &collections {
            *by_environment.entry(c.environment_name.clone()).or_default() += 1;
        }
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for a in &artifacts {
            *by_type.entry(a.artifact_type.as_str().to_string()).or_default() += 1;
        }

        Ok(RepositoryStatistics {
            collection_count: collections.len(),
            artifact_count: artifacts.len(),
            total_bytes: artifacts.iter().map(|a| a.file_size).sum(),
            by_environment,
            by_type,
            recent_7_day_count: collections.iter().filter(|c| c.created_at >= cutoff).count(),
            distinct_tag_count: tags
                .iter()
                .map(|t| t.tag.clone())
                .collect::<std::collections::HashSet<_>>()
                .len(),
        })
    }
}

fn summarize_comparison(
    success_change: bool,
    duration_delta_ms: Option<i64>,
    baseline_duration_ms: Option<u64>,
    size_delta: i64,
    artifact_diffs_by_type: &BTreeMap<String, ArtifactDiff>,
) -> ComparisonSummary {
    let mut categories = Vec::new();
    if success_change {
        categories.push("test_result".to_string());
    }
    if let (Some(delta), Some(baseline)) = (duration_delta_ms, baseline_duration_ms) {
        if baseline > 0 && delta.unsigned_abs() as f64 > 0.2 * baseline as f64 {
            categories.push("performance".to_string());
        }
    }
    if size_delta.abs() > 0 {
        categories.push("size".to_string());
    }
    let has_new = artifact_diffs_by_type.values().any(|d| !d.new.is_empty());
    let has_missing = artifact_diffs_by_type.values().any(|d| !d.missing.is_empty());
    let has_changed = artifact_diffs_by_type.values().any(|d| !d.changed.is_empty());
    if has_new {
        categories.push("new_artifacts".to_string());
    }
    if has_missing {
        categories.push("missing_artifacts".to_string());
    }
    if has_changed {
        categories.push("changed_artifacts".to_string());
    }

    let significance = if success_change {
        Significance::High
    } else if categories.len() >= 3 {
        Significance::Medium
    } else if !categories.is_empty() {
        Significance::Low
    } else {
        Significance::Minimal
    };

    let mut recommendations = Vec::new();
    if categories.contains(&"test_result".to_string()) {
        recommendations.push("investigate the change in test outcome before promoting".to_string());
    }
    if categories.contains(&"performance".to_string()) {
        recommendations.push("review duration regression for a possible performance issue".to_string());
    }
    if categories.contains(&"missing_artifacts".to_string()) {
        recommendations.push("confirm missing artifacts were not expected outputs".to_string());
    }

    ComparisonSummary {
        categories,
        significance,
        recommendations,
    }
}

fn detect_content_type(path: &Path, bytes: &[u8]) -> String {
    let by_extension = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Some("application/json"),
        Some("yaml") | Some("yml") => Some("application/yaml"),
        Some("txt") | Some("log") => Some("text/plain"),
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        _ => None,
    };
    if let Some(mime) = by_extension {
        return mime.to_string();
    }
    if std::str::from_utf8(bytes).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn is_indexable(content_type: &str) -> bool {
    content_type.starts_with("text/") || content_type == "application/json" || content_type == "application/yaml"
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[tokio::test]
    async fn stores_and_retrieves_a_collection() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log_path = write_temp(&dir, "recipe.log", b"hello world\n");

        let id = repo
            .store_collection(
                CollectionMetadata {
                    session_id: "s1".into(),
                    environment_name: "ubuntu-22.04".into(),
                    success: Some(true),
                    duration_ms: Some(1200),
                    metadata: serde_json::json!({}),
                },
                &[ArtifactInput {
                    artifact_type: ArtifactType::Logs,
                    name: "recipe.log".into(),
                    file_path: log_path,
                }],
            )
            .await
            .unwrap();

        let collection = repo.get_collection(&id).await.unwrap();
        assert_eq!(collection.artifacts.len(), 1);
        assert_eq!(collection.total_size(), 12);
    }

    #[tokio::test]
    async fn search_filters_by_environment_and_query() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "out.txt", b"needle in a haystack");

        repo.store_collection(
            CollectionMetadata {
                session_id: "s1".into(),
                environment_name: "arch".into(),
                success: Some(true),
                duration_ms: None,
                metadata: serde_json::json!({}),
            },
            &[ArtifactInput {
                artifact_type: ArtifactType::TestOutput,
                name: "out.txt".into(),
                file_path: path,
            }],
        )
        .await
        .unwrap();

        let results = repo
            .search(
                "needle",
                &SearchFilters {
                    environment: Some("arch".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        let miss = repo
            .search(
                "needle",
                &SearchFilters {
                    environment: Some("fedora".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn compare_reports_test_result_change_as_high_significance() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_temp(&dir, "a.txt", b"version one");
        let p2 = write_temp(&dir, "b.txt", b"version two");

        let c1 = repo
            .store_collection(
                CollectionMetadata {
                    session_id: "s1".into(),
                    environment_name: "ubuntu".into(),
                    success: Some(true),
                    duration_ms: Some(1000),
                    metadata: serde_json::json!({}),
                },
                &[ArtifactInput { artifact_type: ArtifactType::TestOutput, name: "a.txt".into(), file_path: p1 }],
            )
            .await
            .unwrap();
        let c2 = repo
            .store_collection(
                CollectionMetadata {
                    session_id: "s2".into(),
                    environment_name: "ubuntu".into(),
                    success: Some(false),
                    duration_ms: Some(1500),
                    metadata: serde_json::json!({}),
                },
                &[ArtifactInput { artifact_type: ArtifactType::TestOutput, name: "b.txt".into(), file_path: p2 }],
            )
            .await
            .unwrap();

        let comparison = repo.compare(&c1, &c2).await.unwrap();
        assert!(comparison.success_change);
        assert_eq!(comparison.summary.significance, Significance::High);
    }

    #[tokio::test]
    async fn tag_and_find_by_tag_round_trip() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "a.txt", b"x");
        let id = repo
            .store_collection(
                CollectionMetadata {
                    session_id: "s1".into(),
                    environment_name: "ubuntu".into(),
                    success: Some(true),
                    duration_ms: None,
                    metadata: serde_json::json!({}),
                },
                &[ArtifactInput { artifact_type: ArtifactType::Logs, name: "a.txt".into(), file_path: path }],
            )
            .await
            .unwrap();

        repo.tag(&id, &["nightly".to_string(), "regression".to_string()]).await.unwrap();
        let found = repo.find_by_tag("nightly").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].collection_id, id);
    }

    #[tokio::test]
    async fn export_then_import_preserves_provenance() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let path = write_temp(&src_dir, "a.txt", b"content");
        let original_id = repo
            .store_collection(
                CollectionMetadata {
                    session_id: "s1".into(),
                    environment_name: "ubuntu".into(),
                    success: Some(true),
                    duration_ms: None,
                    metadata: serde_json::json!({}),
                },
                &[ArtifactInput { artifact_type: ArtifactType::Logs, name: "a.txt".into(), file_path: path }],
            )
            .await
            .unwrap();

        let export_dir = tempfile::tempdir().unwrap();
        repo.export(&original_id, export_dir.path()).await.unwrap();
        assert!(export_dir.path().join("manifest.yaml").exists());

        let imported_id = repo.import(export_dir.path()).await.unwrap();
        assert_ne!(imported_id, original_id);

        let imported = repo.get_collection(&imported_id).await.unwrap();
        assert_eq!(
            imported.metadata.get("original_id").and_then(|v| v.as_str()),
            Some(original_id.as_str())
        );
    }

    #[tokio::test]
    async fn statistics_reflect_stored_collections() {
        let repo = ArtifactRepository::in_memory(RepositoryConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "a.txt", b"12345");
        repo.store_collection(
            CollectionMetadata {
                session_id: "s1".into(),
                environment_name: "ubuntu".into(),
                success: Some(true),
                duration_ms: None,
                metadata: serde_json::json!({}),
            },
            &[ArtifactInput { artifact_type: ArtifactType::Logs, name: "a.txt".into(), file_path: path }],
        )
        .await
        .unwrap();

        let stats = repo.statistics().await.unwrap();
        assert_eq!(stats.collection_count, 1);
        assert_eq!(stats.artifact_count, 1);
        assert_eq!(stats.total_bytes, 5);
    }
}
