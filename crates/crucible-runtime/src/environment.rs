//! Environment Lifecycle (§4.6): a factory trait backends register under
//! the Plugin Registry's `environment` kind, plus the one concrete
//! subprocess-backed implementation shipped with the engine.

use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crucible_core::{CrucibleError, Environment, ExecOutput, Result};

/// Per-distribution package install command, per §4.6. Unknown
/// distributions get `None` and a warning at call time.
pub fn install_command(distribution: &str, packages: &[String]) -> Option<Vec<String>> {
    if packages.is_empty() {
        return None;
    }
    let mut cmd = match distribution {
        "arch" => vec!["pacman".to_string(), "-S".to_string(), "--noconfirm".to_string()],
        "ubuntu" | "debian" => vec!["apt-get".to_string(), "install".to_string(), "-y".to_string()],
        "fedora" => vec!["dnf".to_string(), "install".to_string(), "-y".to_string()],
        other => {
            warn!(distribution = %other, "unknown distribution, skipping package install");
            return None;
        }
    };
    cmd.extend(packages.iter().cloned());
    Some(cmd)
}

/// A backend capable of creating disposable [`Environment`] instances.
/// Registered under the `environment` plugin kind, keyed by backend name
/// (e.g. `"local"`).
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    async fn create(
        &self,
        spec_name: &str,
        distribution: &str,
        options: &Value,
    ) -> Result<Box<dyn Environment>>;

    /// Tear down a previously created environment. Failures are logged as
    /// warnings by the caller and never fail the owning test (§4.6 step 4).
    async fn destroy(&self, environment: Box<dyn Environment>) -> Result<()> {
        drop(environment);
        Ok(())
    }
}

/// Subprocess-backed reference environment: runs commands directly on the
/// host via `tokio::process::Command`, with a private working directory
/// standing in for the environment's filesystem root.
pub struct LocalEnvironment {
    identity: String,
    distribution: String,
    root: std::path::PathBuf,
    logs: Mutex<std::collections::BTreeMap<String, String>>,
}

impl LocalEnvironment {
    pub fn new(identity: impl Into<String>, distribution: impl Into<String>, root: std::path::PathBuf) -> Self {
        LocalEnvironment {
            identity: identity.into(),
            distribution: distribution.into(),
            root,
            logs: Mutex::new(std::collections::BTreeMap::new()),
        }
    }

    fn resolve(&self, path: &str) -> std::path::PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    async fn execute(&self, command: &str, timeout_secs: Option<u64>) -> Result<ExecOutput> {
        debug!(identity = %self.identity, command, "executing in local environment");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CrucibleError::environment(format!("spawn failed: {e}"), true))?;

        let output = match timeout_secs {
            Some(secs) if secs > 0 => tokio::time::timeout(
                std::time::Duration::from_secs(secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| CrucibleError::timeout(secs * 1000, secs * 1000))?
            .map_err(|e| CrucibleError::execution(format!("wait failed: {e}"), true))?,
            _ => child
                .wait_with_output()
                .await
                .map_err(|e| CrucibleError::execution(format!("wait failed: {e}"), true))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        let mut logs = self.logs.lock().expect("log mutex poisoned");
        logs.insert(format!("{command}.stdout"), stdout.clone());
        logs.insert(format!("{command}.stderr"), stderr.clone());
        drop(logs);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            success: output.status.success(),
        })
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path).exists())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| CrucibleError::resource(format!("read {path}: {e}"), true))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CrucibleError::resource(format!("mkdir {}: {e}", parent.display()), true))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| CrucibleError::resource(format!("write {path}: {e}"), true))
    }

    async fn copy_file(&self, source: &str, destination: &str) -> Result<()> {
        let dest = self.resolve(destination);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CrucibleError::resource(format!("mkdir {}: {e}", parent.display()), true))?;
        }
        tokio::fs::copy(source, dest)
            .await
            .map_err(|e| CrucibleError::resource(format!("copy {source} -> {destination}: {e}"), true))?;
        Ok(())
    }

    async fn collect_logs(&self) -> Result<std::collections::BTreeMap<String, String>> {
        Ok(self.logs.lock().expect("log mutex poisoned").clone())
    }

    fn distribution(&self) -> &str {
        &self.distribution
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

/// Factory for [`LocalEnvironment`]: creates a fresh temp directory per
/// environment and returns an environment rooted there.
pub struct LocalEnvironmentFactory {
    base_dir: std::path::PathBuf,
}

impl LocalEnvironmentFactory {
    pub fn new(base_dir: std::path::PathBuf) -> Self {
        LocalEnvironmentFactory { base_dir }
    }
}

#[async_trait]
impl EnvironmentFactory for LocalEnvironmentFactory {
    async fn create(
        &self,
        spec_name: &str,
        distribution: &str,
        _options: &Value,
    ) -> Result<Box<dyn Environment>> {
        let identity = format!("{spec_name}-{}", uuid::Uuid::new_v4());
        let root = self.base_dir.join(&identity);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CrucibleError::environment(format!("create environment root: {e}"), true))?;
        Ok(Box::new(LocalEnvironment::new(identity, distribution.to_string(), root)))
    }

    async fn destroy(&self, environment: Box<dyn Environment>) -> Result<()> {
        let root = self.base_dir.join(environment.identity());
        drop(environment);
        if root.exists() {
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| CrucibleError::environment(format!("destroy environment: {e}"), true))?;
        }
        Ok(())
    }
}
