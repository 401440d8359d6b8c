//! Plugin registry: the (kind, name) → descriptor mapping that backend
//! environments, validators, and reporters register into, with eager/lazy
//! registration, transitive dependency resolution, and directory loading.

pub mod descriptor;
pub mod registry;

pub use descriptor::{PluginDependency, PluginDescriptor, PluginLoader, PluginMetadata, PluginSource, PluginValue};
pub use registry::PluginRegistry;
