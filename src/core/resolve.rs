#![forbid(unsafe_code)]

use std::path::Path;

use crate::core::paths::{BranchType, has_type_prefix, worktree_path};

/// Maps a bare name or PR number onto an existing `branch/...` or `pr/...`
/// directory under `root/project`.
///
/// Input that already carries a type prefix is returned untouched. Digits-only
/// input is looked up under `pr/`, anything else under `branch/`, first verbatim
/// and then with `/` replaced by `-`. With no match the input comes back as-is.
#[must_use]
pub fn resolve_branch(root: &Path, project: &str, raw: &str) -> String {
    if has_type_prefix(raw) {
        return raw.to_owned();
    }

    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return raw.to_owned();
    }

    let branch_type = if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        BranchType::Pr
    } else {
        BranchType::Branch
    };

    let hyphenated = trimmed.replace('/', "-");
    let candidates = if hyphenated == trimmed {
        vec![trimmed.to_owned()]
    } else {
        vec![trimmed.to_owned(), hyphenated]
    };

    for name in candidates {
        if worktree_path(root, project, branch_type, &name).is_dir() {
            log::debug!("resolved '{raw}' to {branch_type}/{name}");
            return format!("{branch_type}/{name}");
        }
    }
    raw.to_owned()
}
