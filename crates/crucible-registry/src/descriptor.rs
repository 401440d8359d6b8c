//! Plugin descriptors: the (kind, name) lookup key and registration payload.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crucible_core::Result;
use serde::{Deserialize, Serialize};

/// Boxed dynamic plugin value. Concrete plugin crates downcast via
/// `Any::downcast_ref`/`downcast` once resolved.
pub type PluginValue = Arc<dyn Any + Send + Sync>;

/// A lazy loader, invoked at most once per (kind, name) and memoized.
pub type PluginLoader =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<PluginValue>> + Send>> + Send + Sync>;

/// How a plugin was registered.
#[derive(Clone)]
pub enum PluginSource {
    /// Ready-to-use value, registered eagerly.
    Eager(PluginValue),
    /// Loader invoked on first lookup, then memoized.
    Lazy(PluginLoader),
}

/// A single (kind, name) dependency reference inside [`PluginMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    pub kind: String,
    pub name: String,
}

/// Descriptive metadata attached to a [`PluginDescriptor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
}

/// A registered plugin: its (kind, name) key, its source (eager value or
/// lazy loader), and its metadata.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub kind: String,
    pub name: String,
    pub source: PluginSource,
    pub metadata: PluginMetadata,
}

impl PluginDescriptor {
    pub fn eager(
        kind: impl Into<String>,
        name: impl Into<String>,
        value: PluginValue,
        metadata: PluginMetadata,
    ) -> Self {
        PluginDescriptor {
            kind: kind.into(),
            name: name.into(),
            source: PluginSource::Eager(value),
            metadata,
        }
    }

    pub fn lazy(
        kind: impl Into<String>,
        name: impl Into<String>,
        loader: PluginLoader,
        metadata: PluginMetadata,
    ) -> Self {
        PluginDescriptor {
            kind: kind.into(),
            name: name.into(),
            source: PluginSource::Lazy(loader),
            metadata,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.kind.clone(), self.name.clone())
    }
}
