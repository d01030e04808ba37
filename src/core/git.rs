#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::GhwtError;

#[derive(Debug, Clone)]
pub struct Git {
    command: String,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Git {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Top-level directory of the worktree containing `dir`.
    pub async fn show_toplevel(&self, dir: &Path) -> Result<PathBuf, GhwtError> {
        let out = self.run_in_dir(dir, &["rev-parse", "--show-toplevel"]).await?;
        let top = out.trim();
        if top.is_empty() {
            return Err(GhwtError::Other(format!(
                "git reported no top-level directory for {}",
                dir.display()
            )));
        }
        Ok(PathBuf::from(top))
    }

    pub async fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<String, GhwtError> {
        let out = Command::new(&self.command)
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => GhwtError::BinaryNotFound(self.command.clone()),
                _ => GhwtError::Other(format!("failed to run {}: {e}", self.command)),
            })?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(GhwtError::OperationFailed {
                command: format!("{} {}", self.command, args.join(" ")),
                code: out.status.code().unwrap_or(1),
                stderr: stderr.trim().to_owned(),
            })
        }
    }
}
