// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local mirror of the upstream record repository.
//!
//! The first run performs a shallow, single-revision clone; later runs
//! fast-forward the working copy. Failures are never retried here: the
//! orchestrator aborts the cycle and the next tick tries again.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Version control tool '{tool}' unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },
    #[error("Mirror {operation} failed: {reason}")]
    NetworkFailure { operation: &'static str, reason: String },
}

#[async_trait]
pub trait Mirror: Send + Sync {
    /// Make sure `local_dir` holds an up-to-date copy of `repo_url`.
    async fn ensure_and_refresh(&self, repo_url: &str, local_dir: &Path) -> Result<(), MirrorError>;
}

/// Git-backed mirror.
pub struct GitMirror {
    git_bin: String,
}

impl GitMirror {
    #[must_use]
    pub fn new(git_bin: impl Into<String>) -> Self {
        Self { git_bin: git_bin.into() }
    }

    async fn check_tool(&self) -> Result<(), MirrorError> {
        let output = Command::new(&self.git_bin)
            .arg("--version")
            .output()
            .await
            .map_err(|e| MirrorError::ToolUnavailable {
                tool: self.git_bin.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(MirrorError::ToolUnavailable {
                tool: self.git_bin.clone(),
                reason: format!("'--version' exited with {}", output.status),
            });
        }
        debug!(version = %String::from_utf8_lossy(&output.stdout).trim(), "Version control tool found");
        Ok(())
    }

    async fn run(&self, operation: &'static str, command: &mut Command) -> Result<(), MirrorError> {
        let output = command.output().await.map_err(|e| MirrorError::ToolUnavailable {
            tool: self.git_bin.clone(),
            reason: e.to_string(),
        })?;
        log_output(operation, &output);

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(MirrorError::NetworkFailure {
                operation,
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            })
        }
    }
}

impl Default for GitMirror {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl Mirror for GitMirror {
    #[tracing::instrument(skip(self), fields(local_dir = %local_dir.display()))]
    async fn ensure_and_refresh(&self, repo_url: &str, local_dir: &Path) -> Result<(), MirrorError> {
        if let Err(e) = self.check_tool().await {
            error!(error = %e, "Cannot refresh mirror");
            return Err(e);
        }

        let exists = tokio::fs::try_exists(local_dir).await.unwrap_or(false);
        if !exists {
            info!(repo_url, "Cloning repository (shallow)...");
            if let Some(parent) = local_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(error = %e, parent = %parent.display(), "Failed to create mirror parent directory");
                }
            }
            self.run(
                "clone",
                Command::new(&self.git_bin)
                    .arg("clone")
                    .arg("--depth=1")
                    .arg("--single-branch")
                    .arg(repo_url)
                    .arg(local_dir),
            )
            .await?;
            info!("Repository cloned");
        } else {
            info!("Repository present, pulling latest changes...");
            self.run(
                "pull",
                Command::new(&self.git_bin)
                    .arg("-C")
                    .arg(local_dir)
                    .arg("pull")
                    .arg("--ff-only"),
            )
            .await?;
            info!("Repository updated");
        }
        Ok(())
    }
}

/// Mirror that does nothing, for trees refreshed outside this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

#[async_trait]
impl Mirror for NoopMirror {
    async fn ensure_and_refresh(&self, _repo_url: &str, local_dir: &Path) -> Result<(), MirrorError> {
        debug!(local_dir = %local_dir.display(), "Mirror refresh disabled");
        Ok(())
    }
}

fn log_output(operation: &str, output: &Output) {
    for line in String::from_utf8_lossy(&output.stdout).lines().filter(|l| !l.trim().is_empty()) {
        info!(operation, "{}", line.trim());
    }
    // git reports progress on stderr even on success
    for line in String::from_utf8_lossy(&output.stderr).lines().filter(|l| !l.trim().is_empty()) {
        if output.status.success() {
            debug!(operation, "{}", line.trim());
        } else {
            error!(operation, "{}", line.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_is_tool_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new("definitely-not-a-real-vcs-binary");

        let err = mirror
            .ensure_and_refresh("https://example.invalid/repo.git", &dir.path().join("mirror"))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::ToolUnavailable { .. }));
        // Nothing was created
        assert!(!dir.path().join("mirror").exists());
    }

    #[tokio::test]
    async fn test_noop_mirror_always_succeeds() {
        let mirror = NoopMirror;
        assert!(mirror.ensure_and_refresh("unused", Path::new("/nonexistent")).await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires git
    async fn test_clone_of_missing_source_is_network_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = GitMirror::default();
        let source = dir.path().join("no-such-repo");

        let err = mirror
            .ensure_and_refresh(&source.to_string_lossy(), &dir.path().join("mirror"))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::NetworkFailure { operation: "clone", .. }));
    }

    #[tokio::test]
    #[ignore] // Requires git
    async fn test_clone_then_pull_local_repo() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = dir.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();

        let git = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(&upstream)
                .status()
                .unwrap();
            assert!(status.success(), "git {:?} failed", args);
        };
        git(&["init", "-q"]);
        git(&["config", "user.email", "sync@example.com"]);
        git(&["config", "user.name", "sync"]);
        std::fs::write(upstream.join("a.json"), "{}").unwrap();
        git(&["add", "."]);
        git(&["commit", "-q", "-m", "first"]);

        let mirror = GitMirror::default();
        let local = dir.path().join("mirror");
        let url = format!("file://{}", upstream.display());

        mirror.ensure_and_refresh(&url, &local).await.unwrap();
        assert!(local.join("a.json").exists());

        std::fs::write(upstream.join("b.json"), "{}").unwrap();
        git(&["add", "."]);
        git(&["commit", "-q", "-m", "second"]);

        mirror.ensure_and_refresh(&url, &local).await.unwrap();
        assert!(local.join("b.json").exists());
    }
}
