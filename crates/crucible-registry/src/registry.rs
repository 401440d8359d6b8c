//! The plugin registry: a concurrent-safe mapping (kind, name) → descriptor
//! supporting eager and lazy registration, transitive dependency resolution
//! with cycle detection, and memoized directory loading.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crucible_core::{CrucibleError, Result};
use tokio::sync::Mutex;
use tracing::warn;

use crate::descriptor::{PluginDescriptor, PluginSource, PluginValue};

type Key = (String, String);

/// Process-wide plugin registry. Cloning shares the underlying state (it is
/// an `Arc`-backed handle), matching the "process-wide state initialized
/// once" requirement.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: Arc<Mutex<HashMap<Key, PluginDescriptor>>>,
    loaded_dirs: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. A duplicate (kind, name) overwrites the
    /// existing entry and logs a warning rather than failing.
    pub async fn register(&self, descriptor: PluginDescriptor) {
        let key = descriptor.key();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            warn!(kind = %key.0, name = %key.1, "overwriting existing plugin registration");
        }
        entries.insert(key, descriptor);
    }

    /// Resolve a plugin by (kind, name), running its loader if lazy and
    /// memoizing the result. Dependencies declared in the descriptor's
    /// metadata are resolved transitively first; a dependency cycle fails
    /// with [`CrucibleError::Dependency`] naming the full resolution stack.
    pub async fn resolve(&self, kind: &str, name: &str) -> Result<PluginValue> {
        let mut stack = Vec::new();
        self.resolve_with_stack(kind, name, &mut stack).await
    }

    fn resolve_with_stack<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
        stack: &'a mut Vec<Key>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<PluginValue>> + Send + 'a>>
    {
        Box::pin(async move {
            let key: Key = (kind.to_string(), name.to_string());
            if stack.contains(&key) {
                let mut path: Vec<String> =
                    stack.iter().map(|(k, n)| format!("{k}:{n}")).collect();
                path.push(format!("{kind}:{name}"));
                return Err(CrucibleError::dependency(format!(
                    "circular plugin dependency: {}",
                    path.join(" -> ")
                )));
            }
            stack.push(key.clone());

            let deps = {
                let entries = self.entries.lock().await;
                let descriptor =
                    entries
                        .get(&key)
                        .ok_or_else(|| {
                            CrucibleError::plugin(format!("plugin not found: {kind}:{name}"))
                                .with_detail("kind", kind)
                                .with_detail("name", name)
                        })?;
                descriptor.metadata.dependencies.clone()
            };

            for dep in &deps {
                self.resolve_with_stack(&dep.kind, &dep.name, stack).await?;
            }

            let value = self.load_and_memoize(&key).await?;
            stack.pop();
            Ok(value)
        })
    }

    async fn load_and_memoize(&self, key: &Key) -> Result<PluginValue> {
        let loader = {
            let entries = self.entries.lock().await;
            let descriptor = entries.get(key).ok_or_else(|| {
                CrucibleError::plugin(format!("plugin not found: {}:{}", key.0, key.1))
            })?;
            match &descriptor.source {
                PluginSource::Eager(value) => return Ok(value.clone()),
                PluginSource::Lazy(loader) => loader.clone(),
            }
        };

        let value = loader().await.map_err(|e| {
            CrucibleError::plugin(format!("plugin load failed for {}:{}: {e}", key.0, key.1))
        })?;

        let mut entries = self.entries.lock().await;
        if let Some(descriptor) = entries.get_mut(key) {
            descriptor.source = PluginSource::Eager(value.clone());
        }
        Ok(value)
    }

    /// Union of eager + lazy registration names for a given kind.
    pub async fn list(&self, kind: &str) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut names: Vec<String> = entries
            .values()
            .filter(|d| d.kind == kind)
            .map(|d| d.name.clone())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Load a directory of plugin candidates at most once. `list_candidates`
    /// enumerates files; `register_candidate` turns one file into zero or
    /// more descriptors, which are then registered (duplicates overwrite
    /// with a warning, per [`register`]).
    pub async fn load_directory<L, R>(
        &self,
        dir: &Path,
        list_candidates: L,
        mut register_candidate: R,
    ) -> Result<()>
    where
        L: FnOnce(&Path) -> Result<Vec<PathBuf>>,
        R: FnMut(&Path) -> Result<Vec<PluginDescriptor>>,
    {
        {
            let mut loaded = self.loaded_dirs.lock().await;
            if loaded.contains(dir) {
                return Ok(());
            }
            loaded.insert(dir.to_path_buf());
        }

        for candidate in list_candidates(dir)? {
            for descriptor in register_candidate(&candidate)? {
                self.register(descriptor).await;
            }
        }
        Ok(())
    }
}
