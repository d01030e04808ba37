#![forbid(unsafe_code)]

//! Pure mappings between `(root, project, branch type, name)` and the on-disk
//! hierarchy `{root}/{project}/{branch|pr}/{name...}`, note paths and
//! multiplexer session names.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefixes accepted on loose refs that all map to [`BranchType::Branch`].
const LEGACY_BRANCH_PREFIXES: &[&str] = &["feature", "bug", "branch"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Branch,
    Pr,
}

impl BranchType {
    pub const ALL: [Self; 2] = [Self::Branch, Self::Pr];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Pr => "pr",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch" => Ok(Self::Branch),
            "pr" => Ok(Self::Pr),
            other => Err(format!("unknown branch type '{other}' (expected branch|pr)")),
        }
    }
}

/// A branch type plus the (possibly nested) name below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchRef {
    pub branch_type: BranchType,
    pub name: String,
}

impl BranchRef {
    /// `"{branch_type}/{name}"`.
    #[must_use]
    pub fn to_prefixed(&self) -> String {
        format!("{}/{}", self.branch_type, self.name)
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorktreeRef {
    pub project: String,
    pub branch_type: BranchType,
    pub name: String,
}

impl WorktreeRef {
    #[must_use]
    pub fn new(project: &str, branch_ref: BranchRef) -> Self {
        Self {
            project: project.to_owned(),
            branch_type: branch_ref.branch_type,
            name: branch_ref.name,
        }
    }

    #[must_use]
    pub fn branch(&self) -> String {
        format!("{}/{}", self.branch_type, self.name)
    }

    #[must_use]
    pub fn path(&self, root: &Path) -> PathBuf {
        worktree_path(root, &self.project, self.branch_type, &self.name)
    }

    #[must_use]
    pub fn session_name(&self) -> String {
        session_name(&self.project, &self.branch())
    }
}

/// `root/project/branch_type/name`, where every `/` in `name` becomes a nested
/// directory.
#[must_use]
pub fn worktree_path(root: &Path, project: &str, branch_type: BranchType, name: &str) -> PathBuf {
    let mut path = root.join(project).join(branch_type.as_str());
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Splits a user-supplied ref into type and name.
///
/// `feature/`, `bug/` and `branch/` map to [`BranchType::Branch`], `pr/` to
/// [`BranchType::Pr`]; the first segment is dropped. Anything else is taken
/// verbatim as a branch name. Never fails.
#[must_use]
pub fn parse_loose_branch_ref(raw: &str) -> BranchRef {
    let raw = raw.trim().trim_matches('/');
    if let Some((head, rest)) = raw.split_once('/')
        && !rest.is_empty()
    {
        if head == "pr" {
            return BranchRef {
                branch_type: BranchType::Pr,
                name: rest.to_owned(),
            };
        }
        if LEGACY_BRANCH_PREFIXES.contains(&head) {
            return BranchRef {
                branch_type: BranchType::Branch,
                name: rest.to_owned(),
            };
        }
    }
    log::debug!("ref '{raw}' has no recognised type prefix, treating it as a branch");
    BranchRef {
        branch_type: BranchType::Branch,
        name: raw.to_owned(),
    }
}

/// `true` if `raw` already starts with `branch/` or `pr/`.
#[must_use]
pub fn has_type_prefix(raw: &str) -> bool {
    BranchType::ALL.iter().any(|t| {
        raw.strip_prefix(t.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|name| !name.is_empty())
    })
}

/// `"{type}/{name-with-hyphens}.md"`: the type stays a directory, the name is
/// flattened.
#[must_use]
pub fn note_file_name(raw_ref: &str) -> String {
    let r = parse_loose_branch_ref(raw_ref);
    format!("{}/{}.md", r.branch_type, r.name.replace('/', "-"))
}

#[must_use]
pub fn note_path(vault_root: &Path, project: &str, raw_ref: &str) -> PathBuf {
    let mut path = vault_root.join(project);
    for segment in note_file_name(raw_ref).split('/') {
        path.push(segment);
    }
    path
}

/// `"{project}-{branch}"` with characters multiplexers reject in session names
/// replaced by `-`, in both halves.
#[must_use]
pub fn session_name(project: &str, branch: &str) -> String {
    format!(
        "{}-{}",
        normalize_session_component(project),
        normalize_session_component(branch)
    )
}

fn normalize_session_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == '/' || c == '.' || c == ':' || c.is_whitespace() {
                '-'
            } else {
                c
            }
        })
        .collect()
}

/// A directory is a linked worktree iff its `.git` entry is a regular file.
#[must_use]
pub fn is_worktree_dir(path: &Path) -> bool {
    std::fs::metadata(path.join(".git")).is_ok_and(|m| m.is_file())
}
