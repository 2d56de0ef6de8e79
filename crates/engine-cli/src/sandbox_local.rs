//! A concrete, local-filesystem [`Sandbox`] for the operator CLI.
//!
//! Executes the whitelisted `filesystem`/`node`/`git` actions directly
//! against a workspace directory on the host running the CLI. Production
//! deployments wire a stronger-isolated backend (container, worktree,
//! remote executor) behind the same trait; this one exists so `engine run`
//! has something to drive end to end without one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;

use engine_core::sandbox::{Sandbox, SandboxAction, validate_workspace_path};

pub struct LocalSandbox {
    workspace_root: PathBuf,
}

impl LocalSandbox {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        validate_workspace_path(relative)?;
        Ok(self.workspace_root.join(relative))
    }

    fn description(payload: &Value) -> Result<&str> {
        payload
            .get("description")
            .and_then(Value::as_str)
            .context("sandbox payload missing 'description'")
    }

    async fn read_file(&self, payload: &Value) -> Result<Value> {
        let description = Self::description(payload)?;
        let (path, _rest) = description
            .split_once(':')
            .context("filesystem task description must be 'path: instruction'")?;
        let full = self.resolve(path.trim())?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("failed to read {}", full.display()))?;
        Ok(json!({ "path": path.trim(), "content": content }))
    }

    async fn write_file(&self, payload: &Value) -> Result<Value> {
        let description = Self::description(payload)?;
        let (path, rest) = description
            .split_once(':')
            .context("filesystem task description must be 'path: content'")?;
        let full = self.resolve(path.trim())?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&full, rest.trim())
            .await
            .with_context(|| format!("failed to write {}", full.display()))?;
        Ok(json!({ "path": path.trim(), "bytesWritten": rest.trim().len() }))
    }

    async fn run_shell(&self, payload: &Value) -> Result<Value> {
        let command = Self::description(payload)?;
        let mut parts = command.split_whitespace();
        let binary = parts.next().context("empty shell command")?;
        let args: Vec<&str> = parts.collect();

        let output = Command::new(binary)
            .args(&args)
            .current_dir(&self.workspace_root)
            .output()
            .await
            .with_context(|| format!("failed to spawn {binary}"))?;

        Ok(json!({
            "exitCode": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }

    async fn git(&self, action: &str, payload: &Value) -> Result<Value> {
        let description = Self::description(payload)?;
        let rest = description.split_once(' ').map(|(_, r)| r.trim()).unwrap_or("");

        let args: Vec<&str> = match action {
            "status" => vec!["status", "--porcelain"],
            "diff" => vec!["diff"],
            "stage" => {
                if rest.is_empty() {
                    vec!["add", "-A"]
                } else {
                    vec!["add", rest]
                }
            }
            "unstage" => {
                if rest.is_empty() {
                    vec!["restore", "--staged", "."]
                } else {
                    vec!["restore", "--staged", rest]
                }
            }
            "commit" => vec!["commit", "-m", if rest.is_empty() { "engine: automated commit" } else { rest }],
            other => bail!("unsupported git action: {other}"),
        };

        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.workspace_root)
            .output()
            .await
            .context("failed to spawn git")?;

        Ok(json!({
            "exitCode": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn execute(&self, action: SandboxAction) -> Result<Value> {
        match (action.plugin.as_str(), action.action.as_str()) {
            ("filesystem", "read_file") => self.read_file(&action.payload).await,
            ("filesystem", "write_file") => self.write_file(&action.payload).await,
            ("node", "run") => self.run_shell(&action.payload).await,
            ("git", git_action) => self.git(git_action, &action.payload).await,
            (plugin, action) => bail!("unsupported sandbox plugin/action: {plugin}/{action}"),
        }
    }

    async fn get_artifact(&self, key: &str) -> Result<Vec<u8>> {
        validate_workspace_path(key)?;
        let full: &Path = &self.workspace_root.join(key);
        tokio::fs::read(full)
            .await
            .with_context(|| format!("failed to read artifact {}", full.display()))
    }
}
