#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::paths::{BranchType, parse_loose_branch_ref, worktree_path};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub project: String,
    /// `"{branch_type}/{name}"`.
    pub branch: String,
    pub path: PathBuf,
    pub display_name: String,
}

impl WorktreeInfo {
    fn new(project: &str, branch_type: BranchType, name: &str, path: PathBuf) -> Self {
        let branch = format!("{branch_type}/{name}");
        Self {
            project: project.to_owned(),
            display_name: format!("{project}:{branch}"),
            branch,
            path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// What the entry is, after following a symlink.
    pub kind: EntryKind,
    pub symlink: bool,
}

/// The filesystem view discovery walks.
pub trait DirSource {
    fn entries(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl DirSource for FsSource {
    fn entries(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let mut file_type = entry.file_type()?;
            let symlink = file_type.is_symlink();
            if symlink {
                match std::fs::metadata(entry.path()) {
                    Ok(meta) => file_type = meta.file_type(),
                    Err(_) => continue,
                }
            }
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                kind,
                symlink,
            });
        }
        Ok(out)
    }
}

/// Classification of one directory below a branch-type root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Contains a `.git` file; recursion stops here.
    WorktreeMarker,
    /// Anything else. Children are the subdirectories worth descending into,
    /// already classified; an empty list ends the branch of the walk.
    Intermediate(Vec<(String, Node)>),
}

/// Classifies `dir` and, for intermediate directories, every subdirectory below it.
///
/// Unreadable directories are logged and classified as empty intermediates.
/// Symlinked subdirectories are never descended into, so a link pointing back up
/// the tree cannot make the walk revisit a directory under another name.
pub fn classify(source: &dyn DirSource, dir: &Path) -> Node {
    let entries = match source.entries(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("skipping unreadable directory {}: {e}", dir.display());
            return Node::Intermediate(Vec::new());
        }
    };

    if entries
        .iter()
        .any(|e| e.name == ".git" && e.kind == EntryKind::File)
    {
        return Node::WorktreeMarker;
    }

    let mut names = Vec::new();
    for entry in &entries {
        if entry.kind != EntryKind::Dir || is_hidden(&entry.name) {
            continue;
        }
        if entry.symlink {
            log::debug!("not following symlinked directory {}", dir.join(&entry.name).display());
            continue;
        }
        names.push(entry.name.as_str());
    }
    names.sort_unstable();

    let children = names
        .into_iter()
        .map(|name| (name.to_owned(), classify(source, &dir.join(name))))
        .collect();
    Node::Intermediate(children)
}

/// Slash-joined paths from the classified root to every worktree marker below it.
#[must_use]
pub fn marker_names(node: &Node) -> Vec<String> {
    let mut out = Vec::new();
    collect_marker_names(node, "", &mut out);
    out
}

fn collect_marker_names(node: &Node, prefix: &str, out: &mut Vec<String>) {
    match node {
        Node::WorktreeMarker => {
            if !prefix.is_empty() {
                out.push(prefix.to_owned());
            }
        }
        Node::Intermediate(children) => {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                collect_marker_names(child, &path, out);
            }
        }
    }
}

// git rejects ref components starting with '.', so hidden dirs are never branches.
fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Every live worktree under `root`, optionally limited to one project, sorted by
/// `(project, branch)`.
#[must_use]
pub fn list_worktrees(root: &Path, filter_project: Option<&str>) -> Vec<WorktreeInfo> {
    list_worktrees_in(&FsSource, root, filter_project)
}

pub fn list_worktrees_in(
    source: &dyn DirSource,
    root: &Path,
    filter_project: Option<&str>,
) -> Vec<WorktreeInfo> {
    let projects = match source.entries(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("worktrees root {} does not exist", root.display());
            return Vec::new();
        }
        Err(e) => {
            log::warn!("skipping unreadable directory {}: {e}", root.display());
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for project in projects {
        if project.kind != EntryKind::Dir || is_hidden(&project.name) {
            continue;
        }
        if filter_project.is_some_and(|p| p != project.name) {
            continue;
        }
        let project_dir = root.join(&project.name);
        let type_dirs = match source.entries(&project_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("skipping unreadable directory {}: {e}", project_dir.display());
                continue;
            }
        };
        for branch_type in BranchType::ALL {
            let present = type_dirs
                .iter()
                .any(|e| e.kind == EntryKind::Dir && e.name == branch_type.as_str());
            if !present {
                continue;
            }
            let type_root = project_dir.join(branch_type.as_str());
            // A marker directly at the type root has no name and is ignored.
            for name in marker_names(&classify(source, &type_root)) {
                let path = worktree_path(root, &project.name, branch_type, &name);
                out.push(WorktreeInfo::new(&project.name, branch_type, &name, path));
            }
        }
    }

    out.sort_by(|a, b| {
        a.project
            .cmp(&b.project)
            .then_with(|| a.branch.cmp(&b.branch))
    });
    out
}

/// The worktree for `branch` (loose refs accepted) if it exists on disk.
#[must_use]
pub fn find_worktree(root: &Path, project: &str, branch: &str) -> Option<WorktreeInfo> {
    let r = parse_loose_branch_ref(branch);
    let path = worktree_path(root, project, r.branch_type, &r.name);
    crate::core::paths::is_worktree_dir(&path)
        .then(|| WorktreeInfo::new(project, r.branch_type, &r.name, path))
}

/// Case-insensitive substring match on project, branch, path and `project:branch`.
#[must_use]
pub fn filter_worktrees<'a>(entries: &'a [WorktreeInfo], pattern: &str) -> Vec<&'a WorktreeInfo> {
    let p = pattern.to_lowercase();
    entries
        .iter()
        .filter(|e| {
            e.project.to_lowercase().contains(&p)
                || e.branch.to_lowercase().contains(&p)
                || e.path.to_string_lossy().to_lowercase().contains(&p)
                || e.display_name.to_lowercase().contains(&p)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    /// In-memory tree: directory path -> entries.
    #[derive(Default)]
    struct MemSource {
        dirs: BTreeMap<PathBuf, Vec<DirEntry>>,
        links: Vec<(PathBuf, PathBuf)>,
        unreadable: Vec<PathBuf>,
    }

    impl MemSource {
        fn dir(&mut self, path: &str) {
            let path = PathBuf::from(path);
            let mut cur = PathBuf::new();
            for comp in path.components() {
                let parent = cur.clone();
                cur.push(comp);
                self.dirs.entry(cur.clone()).or_default();
                if parent.as_os_str().is_empty() {
                    continue;
                }
                let name = comp.as_os_str().to_string_lossy().to_string();
                let siblings = self.dirs.entry(parent).or_default();
                if !siblings.iter().any(|e| e.name == name) {
                    siblings.push(DirEntry {
                        name,
                        kind: EntryKind::Dir,
                        symlink: false,
                    });
                }
            }
        }

        fn file(&mut self, dir: &str, name: &str) {
            self.dir(dir);
            self.dirs
                .entry(PathBuf::from(dir))
                .or_default()
                .push(DirEntry {
                    name: name.to_owned(),
                    kind: EntryKind::File,
                    symlink: false,
                });
        }

        /// `dir/name` links to `target`; paths through it read the target.
        fn link(&mut self, dir: &str, name: &str, target: &str) {
            self.dir(dir);
            self.dir(target);
            self.dirs
                .entry(PathBuf::from(dir))
                .or_default()
                .push(DirEntry {
                    name: name.to_owned(),
                    kind: EntryKind::Dir,
                    symlink: true,
                });
            self.links
                .push((Path::new(dir).join(name), PathBuf::from(target)));
        }

        fn resolve(&self, dir: &Path) -> PathBuf {
            let mut cur = dir.to_path_buf();
            while let Some((from, to)) = self.links.iter().find(|(from, _)| cur.starts_with(from)) {
                let rest = cur.strip_prefix(from).map(Path::to_path_buf).unwrap_or_default();
                cur = if rest.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(rest)
                };
            }
            cur
        }

        fn worktree(&mut self, dir: &str) {
            self.file(dir, ".git");
        }
    }

    impl DirSource for MemSource {
        fn entries(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
            if self.unreadable.iter().any(|p| p == dir) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            self.dirs
                .get(&self.resolve(dir))
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    #[test]
    fn classifies_markers_and_intermediates() {
        let mut src = MemSource::default();
        src.worktree("/r/claude/plan-x");
        src.dir("/r/empty");
        src.file("/r/loose", "README.md");

        let node = classify(&src, Path::new("/r"));
        let Node::Intermediate(children) = &node else {
            panic!("root should be intermediate");
        };
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["claude", "empty", "loose"]);
        assert_eq!(marker_names(&node), ["claude/plan-x"]);
    }

    #[test]
    fn git_directory_is_not_a_marker() {
        let mut src = MemSource::default();
        src.dir("/r/nested-repo/.git");
        src.worktree("/r/real");

        let node = classify(&src, Path::new("/r"));
        assert_eq!(marker_names(&node), ["real"]);
    }

    #[test]
    fn stops_descending_at_markers() {
        let mut src = MemSource::default();
        src.worktree("/r/outer");
        src.worktree("/r/outer/inner");

        assert_eq!(marker_names(&classify(&src, Path::new("/r"))), ["outer"]);
    }

    #[test]
    fn does_not_follow_symlinked_directories() {
        let mut src = MemSource::default();
        src.worktree("/r/cool-feature");
        src.link("/r", "loop", "/r");

        assert_eq!(marker_names(&classify(&src, Path::new("/r"))), ["cool-feature"]);
    }

    #[test]
    fn build_dir_names_are_ordinary_branches() {
        let mut src = MemSource::default();
        src.worktree("/wt/target/branch/target");
        src.worktree("/wt/target/branch/node_modules/fix");

        let got: Vec<String> = list_worktrees_in(&src, Path::new("/wt"), None)
            .into_iter()
            .map(|w| w.display_name)
            .collect();
        assert_eq!(got, ["target:branch/node_modules/fix", "target:branch/target"]);
    }

    #[test]
    fn lists_across_projects_and_types_sorted() {
        let mut src = MemSource::default();
        src.worktree("/wt/zeta/branch/main");
        src.worktree("/wt/acme/pr/1234");
        src.worktree("/wt/acme/branch/cool-feature");
        src.worktree("/wt/acme/branch/claude/plan-x");
        src.worktree("/wt/acme/other/ignored");

        let all = list_worktrees_in(&src, Path::new("/wt"), None);
        let got: Vec<(&str, &str)> = all
            .iter()
            .map(|w| (w.project.as_str(), w.branch.as_str()))
            .collect();
        assert_eq!(
            got,
            [
                ("acme", "branch/claude/plan-x"),
                ("acme", "branch/cool-feature"),
                ("acme", "pr/1234"),
                ("zeta", "branch/main"),
            ]
        );
        assert_eq!(
            all[0].path,
            PathBuf::from("/wt/acme/branch/claude/plan-x")
        );
        assert_eq!(all[0].display_name, "acme:branch/claude/plan-x");
    }

    #[test]
    fn filters_by_project() {
        let mut src = MemSource::default();
        src.worktree("/wt/acme/branch/cool-feature");
        src.worktree("/wt/zeta/branch/main");

        let only = list_worktrees_in(&src, Path::new("/wt"), Some("acme"));
        assert_eq!(only.len(), 1);
        assert_eq!(
            only[0],
            WorktreeInfo {
                project: "acme".to_owned(),
                branch: "branch/cool-feature".to_owned(),
                path: PathBuf::from("/wt/acme/branch/cool-feature"),
                display_name: "acme:branch/cool-feature".to_owned(),
            }
        );
    }

    #[test]
    fn unreadable_directories_yield_partial_results() {
        let mut src = MemSource::default();
        src.worktree("/wt/acme/branch/ok");
        src.worktree("/wt/acme/branch/locked/inside");
        src.unreadable.push(PathBuf::from("/wt/acme/branch/locked"));

        let got = list_worktrees_in(&src, Path::new("/wt"), None);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].branch, "branch/ok");
    }

    #[test]
    fn missing_root_is_empty() {
        let src = MemSource::default();
        assert!(list_worktrees_in(&src, Path::new("/nope"), None).is_empty());
    }

    #[test]
    fn scans_the_real_filesystem() {
        let td = tempfile::tempdir().unwrap();
        let wt = td.path().join("acme/branch/cool-feature");
        std::fs::create_dir_all(&wt).unwrap();
        std::fs::write(wt.join(".git"), "gitdir: /x/.git/worktrees/cool-feature\n").unwrap();
        std::fs::create_dir_all(td.path().join("acme/branch/repo-root/.git")).unwrap();

        let got = list_worktrees(td.path(), Some("acme"));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].branch, "branch/cool-feature");
        assert_eq!(got[0].path, wt);

        assert!(find_worktree(td.path(), "acme", "cool-feature").is_some());
        assert!(find_worktree(td.path(), "acme", "repo-root").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_on_disk_do_not_invent_worktrees() {
        let td = tempfile::tempdir().unwrap();
        let branch_root = td.path().join("acme/branch");
        let wt = branch_root.join("cool-feature");
        std::fs::create_dir_all(&wt).unwrap();
        std::fs::write(wt.join(".git"), "gitdir: /x/.git/worktrees/cool-feature\n").unwrap();
        std::os::unix::fs::symlink("..", branch_root.join("loop")).unwrap();
        std::os::unix::fs::symlink(".", branch_root.join("self")).unwrap();

        let got = list_worktrees(td.path(), Some("acme"));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].branch, "branch/cool-feature");
    }

    #[test]
    fn filter_matches_combined_display_name() {
        let entries = vec![
            WorktreeInfo::new("acme", BranchType::Branch, "main", PathBuf::from("/wt/acme/branch/main")),
            WorktreeInfo::new("zeta", BranchType::Pr, "7", PathBuf::from("/wt/zeta/pr/7")),
        ];
        assert_eq!(filter_worktrees(&entries, "ACME:BRANCH").len(), 1);
        assert_eq!(filter_worktrees(&entries, "pr/7").len(), 1);
        assert_eq!(filter_worktrees(&entries, "/wt").len(), 2);
    }
}
