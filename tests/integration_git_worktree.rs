use std::path::Path;
use std::process::Command;

use ghwt::core::context::ContextResolver;
use ghwt::core::discovery::{find_worktree, list_worktrees};
use ghwt::core::git::Git;
use ghwt::core::paths::{BranchType, worktree_path};
use ghwt::core::resolve::resolve_branch;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// `{tmp}/repo` plus linked worktrees under `{tmp}/root/acme/...`.
fn hierarchy() -> tempfile::TempDir {
    let td = tempfile::tempdir().expect("tempdir");
    let repo = td.path().join("repo");
    std::fs::create_dir_all(&repo).expect("mkdir repo");

    run(&repo, &["init"]);
    run(&repo, &["config", "user.email", "test@example.com"]);
    run(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("README.md"), "hello\n").expect("write");
    run(&repo, &["add", "."]);
    run(&repo, &["commit", "-m", "init"]);

    let root = td.path().join("root");
    let feature = worktree_path(&root, "acme", BranchType::Branch, "cool-feature");
    let nested = worktree_path(&root, "acme", BranchType::Branch, "claude/plan-x");
    let pr = worktree_path(&root, "acme", BranchType::Pr, "42");
    for (path, branch) in [
        (&feature, "cool-feature"),
        (&nested, "claude/plan-x"),
        (&pr, "pr-42"),
    ] {
        let path = path.to_string_lossy().to_string();
        run(&repo, &["worktree", "add", "-b", branch, &path]);
    }
    // Stray empty directory: tolerated, never listed.
    std::fs::create_dir_all(root.join("acme/branch/empty")).expect("mkdir");
    td
}

#[test]
fn discovers_linked_worktrees() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = hierarchy();
    let root = td.path().join("root");

    let branches: Vec<String> = list_worktrees(&root, None)
        .into_iter()
        .map(|w| w.display_name)
        .collect();
    assert_eq!(
        branches,
        [
            "acme:branch/claude/plan-x",
            "acme:branch/cool-feature",
            "acme:pr/42",
        ]
    );
    assert!(list_worktrees(&root, Some("other")).is_empty());
    assert!(find_worktree(&root, "acme", "feature/cool-feature").is_some());
    assert!(find_worktree(&root, "acme", "branch/empty").is_none());
}

#[test]
fn resolves_bare_names_to_existing_worktrees() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = hierarchy();
    let root = td.path().join("root");

    assert_eq!(resolve_branch(&root, "acme", "42"), "pr/42");
    assert_eq!(resolve_branch(&root, "acme", "cool-feature"), "branch/cool-feature");
    assert_eq!(resolve_branch(&root, "acme", "claude/plan-x"), "branch/claude/plan-x");
    assert_eq!(resolve_branch(&root, "acme", "unknown"), "unknown");
}

#[tokio::test]
async fn context_round_trips_from_a_subdirectory() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = hierarchy();
    let root = td.path().join("root");
    let resolver = ContextResolver::new(root.clone(), Git::default());

    let nested = worktree_path(&root, "acme", BranchType::Branch, "claude/plan-x");
    let sub = nested.join("src/deep");
    std::fs::create_dir_all(&sub).expect("mkdir");

    let ctx = resolver.context_for_dir(&sub).await.expect("context");
    assert_eq!(ctx.project, "acme");
    assert_eq!(ctx.branch, "branch/claude/plan-x");
    assert_eq!(
        ctx.path,
        std::fs::canonicalize(&nested).expect("canonicalize")
    );

    // The main checkout lives outside the hierarchy.
    let err = resolver
        .context_for_dir(&td.path().join("repo"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not inside a worktree"));
}

fn run(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    if !out.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }
}
