//! The sandbox adapter contract: the external process that executes
//! filesystem, shell, and git side effects on behalf of a task.
//!
//! The engine only consumes this interface; no concrete implementation
//! lives in this crate. A production deployment wires a real backend
//! (container, worktree-on-host, remote executor) behind it.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;

/// Binaries an allow-listed shell `run` action may invoke.
const ALLOWED_SHELL_BINARIES: &[&str] = &["node", "npm", "pnpm", "yarn", "npx", "tsx"];

/// Characters that are never permitted in a shell command, regardless of
/// the binary: they would let a single action escape into a second command.
const FORBIDDEN_SHELL_METACHARACTERS: &[char] = &['|', '&', ';', '$', '`', '>', '<', '\r', '\n'];

/// A plugin/action pair understood by the sandbox, together with its JSON
/// payload.
#[derive(Debug, Clone)]
pub struct SandboxAction {
    pub plugin: String,
    pub action: String,
    pub payload: Value,
}

/// The sandbox adapter contract. Consumed, not implemented, by this crate.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute a single whitelisted plugin/action with its payload.
    async fn execute(&self, action: SandboxAction) -> Result<Value>;

    /// Fetch a previously produced artifact by key.
    async fn get_artifact(&self, key: &str) -> Result<Vec<u8>>;
}

// Compile-time assertion: Sandbox must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Sandbox) {}
};

/// Validate a workspace-relative path: no absolute paths, no `..` segments.
pub fn validate_workspace_path(path: &str) -> Result<()> {
    if path.starts_with('/') {
        bail!("workspace path must be relative, got absolute path: {path}");
    }
    if std::path::Path::new(path)
        .components()
        .any(|c| c == std::path::Component::ParentDir)
    {
        bail!("workspace path must not contain '..': {path}");
    }
    Ok(())
}

/// Validate a shell `run` command: it must start with an allow-listed
/// binary and must not contain any forbidden metacharacter.
pub fn validate_shell_command(command: &str) -> Result<()> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        bail!("shell command must not be empty");
    }

    if let Some(bad) = trimmed.chars().find(|c| FORBIDDEN_SHELL_METACHARACTERS.contains(c)) {
        bail!("shell command contains forbidden character '{bad}': {trimmed}");
    }

    let binary = trimmed.split_whitespace().next().unwrap_or("");
    if !ALLOWED_SHELL_BINARIES.contains(&binary) {
        bail!(
            "shell command must start with an allow-listed binary ({}), got: {binary}",
            ALLOWED_SHELL_BINARIES.join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_relative_path() {
        assert!(validate_workspace_path("src/lib.rs").is_ok());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_workspace_path("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_workspace_path("../secrets.env").is_err());
        assert!(validate_workspace_path("a/../../b").is_err());
    }

    #[test]
    fn accepts_allow_listed_shell_command() {
        assert!(validate_shell_command("npm test").is_ok());
        assert!(validate_shell_command("node script.js").is_ok());
    }

    #[test]
    fn rejects_disallowed_binary() {
        assert!(validate_shell_command("rm -rf /").is_err());
        assert!(validate_shell_command("curl http://example.com").is_err());
    }

    #[test]
    fn rejects_metacharacters_even_with_allowed_binary() {
        assert!(validate_shell_command("npm test; rm -rf /").is_err());
        assert!(validate_shell_command("npm test && echo done").is_err());
        assert!(validate_shell_command("npm test | tee out.log").is_err());
        assert!(validate_shell_command("npm run $(whoami)").is_err());
    }

    #[test]
    fn rejects_empty_command() {
        assert!(validate_shell_command("   ").is_err());
    }
}
