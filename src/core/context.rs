#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::git::Git;
use crate::core::paths::BranchType;
use crate::error::GhwtError;

/// The `(project, branch)` of the worktree a directory belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorktreeContext {
    pub project: String,
    /// `"{branch_type}/{name}"`.
    pub branch: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContextResolver {
    root: PathBuf,
    git: Git,
}

impl ContextResolver {
    #[must_use]
    pub fn new(root: PathBuf, git: Git) -> Self {
        Self { root, git }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Context of the process's current working directory.
    pub async fn current_context(&self) -> Result<WorktreeContext, GhwtError> {
        let cwd = std::env::current_dir().map_err(|e| {
            log::debug!("cannot read current directory: {e}");
            self.not_in_worktree()
        })?;
        self.context_for_dir(&cwd).await
    }

    /// Context of an arbitrary directory. Every failure (git missing, not a
    /// repository, unresolvable paths) collapses into [`GhwtError::NotInWorktree`].
    pub async fn context_for_dir(&self, dir: &Path) -> Result<WorktreeContext, GhwtError> {
        let top = self.git.show_toplevel(dir).await.map_err(|e| {
            log::debug!("git top-level lookup failed in {}: {e}", dir.display());
            self.not_in_worktree()
        })?;
        let top = tokio::fs::canonicalize(&top).await.map_err(|e| {
            log::debug!("cannot resolve {}: {e}", top.display());
            self.not_in_worktree()
        })?;
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            log::debug!("cannot resolve worktrees root {}: {e}", self.root.display());
            self.not_in_worktree()
        })?;

        context_from_toplevel(&root, &top).ok_or_else(|| self.not_in_worktree())
    }

    fn not_in_worktree(&self) -> GhwtError {
        GhwtError::NotInWorktree {
            root: self.root.clone(),
        }
    }
}

/// Walks from `top` up towards `root` and returns the first ancestor whose path
/// relative to `root` reads `{project}/{branch|pr}/{name...}`.
///
/// Both paths must already be symlink-resolved.
#[must_use]
pub fn context_from_toplevel(root: &Path, top: &Path) -> Option<WorktreeContext> {
    let mut candidate = Some(top);
    while let Some(dir) = candidate {
        let Ok(rel) = dir.strip_prefix(root) else {
            return None;
        };
        let segments: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        if segments.len() >= 3 && segments[1].parse::<BranchType>().is_ok() {
            return Some(WorktreeContext {
                project: segments[0].clone(),
                branch: format!("{}/{}", segments[1], segments[2..].join("/")),
                path: dir.to_path_buf(),
            });
        }
        candidate = dir.parent();
    }
    None
}
