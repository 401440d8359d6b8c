//! The Result Cache: a filesystem directory with an `index.json` and a
//! `results/` subdirectory. Individual entry writes are atomic via
//! write-to-tempfile + rename; the cache is a single-writer structure and
//! callers must serialize `store`/`invalidate` calls.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use crucible_core::{CollectionFingerprint, CrucibleError, Result, TestResult, TestStatus};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::entry::{CacheEntry, CacheIndex, DependencySnapshot};

const INDEX_FILE: &str = "index.json";
const RESULTS_DIR: &str = "results";

/// Filesystem-backed result cache rooted at a configurable directory.
pub struct ResultCache {
    root: PathBuf,
    index: CacheIndex,
}

impl ResultCache {
    /// Open (creating if absent) the cache at `root`, loading the index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RESULTS_DIR))
            .map_err(|e| CrucibleError::resource(format!("cache root create failed: {e}"), false))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = fs::read_to_string(&index_path)
                .map_err(|e| CrucibleError::resource(format!("read cache index: {e}"), true))?;
            serde_json::from_str(&raw)
                .map_err(|e| CrucibleError::configuration(format!("corrupt cache index: {e}")))?
        } else {
            CacheIndex::default()
        };

        Ok(ResultCache { root, index })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn result_path(&self, fingerprint: &CollectionFingerprint) -> PathBuf {
        self.root.join(RESULTS_DIR).join(format!("{}.json", fingerprint.as_str()))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().ok_or_else(|| {
            CrucibleError::resource("cache path has no parent directory", false)
        })?;
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| CrucibleError::resource(format!("create temp file: {e}"), true))?;
        tmp.write_all(bytes)
            .map_err(|e| CrucibleError::resource(format!("write temp file: {e}"), true))?;
        tmp.persist(path)
            .map_err(|e| CrucibleError::resource(format!("rename temp file: {e}"), true))?;
        Ok(())
    }

    fn persist_index(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index)
            .map_err(|e| CrucibleError::configuration(e.to_string()))?;
        Self::write_atomic(&self.index_path(), &bytes)
    }

    /// `lookup(fingerprint) → Some(result) | None` (a miss).
    ///
    /// Validates dependency coherency: every recorded dependency must still
    /// exist with an mtime ≤ cached_at and a matching content hash, and the
    /// recipe file's mtime must not exceed cached_at.
    pub fn lookup(&self, fingerprint: &CollectionFingerprint) -> Result<Option<TestResult>> {
        let entry = match self.index.get(fingerprint) {
            Some(e) => e,
            None => return Ok(None),
        };

        for dep in &entry.dependencies {
            let path = Path::new(&dep.path);
            if !path.exists() {
                return Ok(None);
            }
            let mtime = mtime_utc(path)?;
            if mtime > entry.cached_at {
                return Ok(None);
            }
            let current_hash = hash_file(path)?;
            if current_hash != dep.content_hash {
                return Ok(None);
            }
        }

        let result_path = self.root.join(RESULTS_DIR).join(
            Path::new(&entry.result_file_path)
                .file_name()
                .ok_or_else(|| CrucibleError::configuration("malformed result file path"))?,
        );
        let raw = fs::read_to_string(&result_path)
            .map_err(|e| CrucibleError::resource(format!("read cached result: {e}"), true))?;
        let mut result: TestResult = serde_json::from_str(&raw)
            .map_err(|e| CrucibleError::configuration(format!("corrupt cached result: {e}")))?;
        result.from_cache = true;
        Ok(Some(result))
    }

    /// `store(fingerprint, result, dependency paths)`. Only `passed` results
    /// are cached — failures are re-tried rather than cached.
    pub fn store(
        &mut self,
        fingerprint: &CollectionFingerprint,
        spec_name: &str,
        result: &TestResult,
        dependency_paths: &[String],
    ) -> Result<()> {
        if result.status != TestStatus::Passed {
            return Ok(());
        }

        let cached_at = Utc::now();
        let mut dependencies = Vec::with_capacity(dependency_paths.len());
        for path in dependency_paths {
            dependencies.push(DependencySnapshot {
                path: path.clone(),
                content_hash: hash_file(Path::new(path))?,
            });
        }

        let result_path = self.result_path(fingerprint);
        let bytes = serde_json::to_vec_pretty(result)
            .map_err(|e| CrucibleError::configuration(e.to_string()))?;
        Self::write_atomic(&result_path, &bytes)?;

        self.index.insert(CacheEntry {
            fingerprint: fingerprint.to_string(),
            spec_name: spec_name.to_string(),
            cached_at,
            result_file_path: result_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            dependencies,
        });
        self.persist_index()
    }

    /// Delete the entry for `fingerprint`, if present.
    pub fn invalidate(&mut self, fingerprint: &CollectionFingerprint) -> Result<()> {
        if let Some(entry) = self.index.remove(fingerprint) {
            let path = self.root.join(RESULTS_DIR).join(&entry.result_file_path);
            let _ = fs::remove_file(path);
            self.persist_index()?;
        }
        Ok(())
    }

    /// Delete the entire results directory and recreate it empty.
    pub fn invalidate_all(&mut self) -> Result<()> {
        let results_dir = self.root.join(RESULTS_DIR);
        fs::remove_dir_all(&results_dir)
            .map_err(|e| CrucibleError::resource(format!("clear results dir: {e}"), true))?;
        fs::create_dir_all(&results_dir)
            .map_err(|e| CrucibleError::resource(format!("recreate results dir: {e}"), true))?;
        self.index = CacheIndex::default();
        self.persist_index()
    }

    /// Remove entries older than `max_age`.
    pub fn prune(&mut self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let before = self.index.entries.len();
        let stale: Vec<String> = self
            .index
            .entries
            .iter()
            .filter(|(_, e)| e.cached_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for fingerprint in &stale {
            if let Some(entry) = self.index.entries.remove(fingerprint) {
                let path = self.root.join(RESULTS_DIR).join(&entry.result_file_path);
                let _ = fs::remove_file(path);
            }
        }
        self.persist_index()?;
        Ok(before - self.index.entries.len())
    }
}

fn mtime_utc(path: &Path) -> Result<DateTime<Utc>> {
    let meta = fs::metadata(path)
        .map_err(|e| CrucibleError::resource(format!("stat {}: {e}", path.display()), true))?;
    let modified = meta
        .modified()
        .map_err(|e| CrucibleError::resource(format!("mtime {}: {e}", path.display()), true))?;
    let duration = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    Ok(DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
        .unwrap_or_else(Utc::now))
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .map_err(|e| CrucibleError::resource(format!("read {}: {e}", path.display()), true))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{FingerprintInputs, TestStatus};
    use std::io::Write as _;

    fn fingerprint() -> CollectionFingerprint {
        CollectionFingerprint::compute(&FingerprintInputs {
            spec_name: "demo".to_string(),
            recipe_path: "r.rb".to_string(),
            recipe_content_hash: "abc".to_string(),
            node_attributes: serde_json::json!({}),
            environment_descriptor: serde_json::json!({}),
            validator_configs: serde_json::json!([]),
        })
        .unwrap()
    }

    fn passed_result() -> TestResult {
        let mut result = TestResult {
            spec_name: "demo".to_string(),
            status: TestStatus::Running,
            start: Some(Utc::now()),
            end: None,
            validator_outcomes: Vec::new(),
            message: None,
            error: None,
            from_cache: false,
        };
        result.finish(TestStatus::Passed, Utc::now());
        result
    }

    #[test]
    fn miss_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        assert!(cache.lookup(&fingerprint()).unwrap().is_none());
    }

    #[test]
    fn store_then_lookup_hits_with_unchanged_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let mut dep_file = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        dep_file.write_all(b"recipe content").unwrap();
        let dep_path = dep_file.path().to_str().unwrap().to_string();

        let mut cache = ResultCache::open(dir.path()).unwrap();
        let fp = fingerprint();
        cache
            .store(&fp, "demo", &passed_result(), &[dep_path])
            .unwrap();

        let hit = cache.lookup(&fp).unwrap();
        assert!(hit.is_some());
        assert!(hit.unwrap().from_cache);
    }

    #[test]
    fn failed_results_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResultCache::open(dir.path()).unwrap();
        let mut result = passed_result();
        result.status = TestStatus::Failed;
        let fp = fingerprint();
        cache.store(&fp, "demo", &result, &[]).unwrap();
        assert!(cache.lookup(&fp).unwrap().is_none());
    }

    #[test]
    fn changed_dependency_content_invalidates_hit() {
        let dir = tempfile::tempdir().unwrap();
        let dep_path = dir.path().join("dep.txt");
        fs::write(&dep_path, b"v1").unwrap();

        let mut cache = ResultCache::open(dir.path()).unwrap();
        let fp = fingerprint();
        cache
            .store(&fp, "demo", &passed_result(), &[dep_path.to_str().unwrap().to_string()])
            .unwrap();

        // Mutate the dependency after caching; content hash no longer matches.
        fs::write(&dep_path, b"v2-modified").unwrap();
        assert!(cache.lookup(&fp).unwrap().is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResultCache::open(dir.path()).unwrap();
        let fp = fingerprint();
        cache.store(&fp, "demo", &passed_result(), &[]).unwrap();
        cache.invalidate(&fp).unwrap();
        assert!(cache.lookup(&fp).unwrap().is_none());
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResultCache::open(dir.path()).unwrap();
        let fp = fingerprint();
        cache.store(&fp, "demo", &passed_result(), &[]).unwrap();
        cache.invalidate_all().unwrap();
        assert!(cache.lookup(&fp).unwrap().is_none());
        assert!(cache.index.entries.is_empty());
    }
}
