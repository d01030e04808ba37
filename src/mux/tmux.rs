#![forbid(unsafe_code)]

use std::path::Path;

use crate::error::GhwtError;
use crate::mux::layout::{Layout, TemplateVars};
use crate::mux::{
    AttachOptions, MuxBackend, SessionManager, Terminal, attach_through_wrapper,
    launch_in_terminal,
};
use crate::process::{CmdOutput, CommandRunner, SystemRunner, run_checked};

/// Printed by `new-session` / `new-window` so later steps can address what was
/// just created regardless of `base-index` settings.
const WINDOW_FORMAT: &str = "#{window_id} #{pane_id}";
const PANE_FORMAT: &str = "#{pane_id}";

/// Drives tmux with one blocking subprocess per step.
#[derive(Debug, Clone)]
pub struct TmuxBackend<R = SystemRunner> {
    runner: R,
    command: String,
    terminal: Terminal,
}

impl TmuxBackend<SystemRunner> {
    #[must_use]
    pub fn new(command: String, terminal: Terminal) -> Self {
        Self::with_runner(SystemRunner, command, terminal)
    }
}

impl<R: CommandRunner> TmuxBackend<R> {
    #[must_use]
    pub fn with_runner(runner: R, command: String, terminal: Terminal) -> Self {
        Self {
            runner,
            command,
            terminal,
        }
    }

    fn tmux(&self, args: &[&str]) -> Result<CmdOutput, GhwtError> {
        let args: Vec<String> = args.iter().map(|s| (*s).to_owned()).collect();
        run_checked(&self.runner, &self.command, &args, None)
    }

    fn build(&self, name: &str, layout: &Layout, vars: &TemplateVars) -> Result<(), GhwtError> {
        let session = tmux_session_name(name);
        let mut first_window: Option<String> = None;

        for (tab, window) in layout.windows() {
            let title = layout.window_title(tab, window);
            let dir = layout.window_dir(window, vars);
            let dir = dir.to_string_lossy();

            let (window_id, first_pane) = if first_window.is_none() {
                let out = self.tmux(&[
                    "new-session", "-d", "-s", &session, "-c", &dir, "-P", "-F", WINDOW_FORMAT,
                ])?;
                let ids = parse_window_ids(&out.stdout)?;
                self.tmux(&["rename-window", "-t", &ids.0, &title])?;
                ids
            } else {
                let target = format!("{}:", exact(name));
                let out = self.tmux(&[
                    "new-window", "-d", "-t", &target, "-n", &title, "-c", &dir, "-P", "-F",
                    WINDOW_FORMAT,
                ])?;
                parse_window_ids(&out.stdout)?
            };
            if first_window.is_none() {
                first_window = Some(window_id.clone());
            }

            for (index, pane) in window.pane_commands().into_iter().enumerate() {
                let pane_id = if index == 0 {
                    first_pane.clone()
                } else {
                    let out = self.tmux(&[
                        "split-window", "-t", &window_id, "-c", &dir, "-P", "-F", PANE_FORMAT,
                    ])?;
                    self.tmux(&["select-layout", "-t", &window_id, "tiled"])?;
                    out.stdout.trim().to_owned()
                };
                for cmd in layout.pane_chain(tab, window, pane, vars) {
                    // -l keeps a command that happens to spell a key name literal.
                    self.tmux(&["send-keys", "-t", &pane_id, "-l", &cmd])?;
                    self.tmux(&["send-keys", "-t", &pane_id, "Enter"])?;
                }
            }
        }

        if let Some(window_id) = first_window {
            self.tmux(&["select-window", "-t", &window_id])?;
        }
        Ok(())
    }

    fn attach_args(name: &str) -> Vec<String> {
        vec![
            "attach-session".to_owned(),
            "-t".to_owned(),
            exact(name),
        ]
    }

    fn detach_other_clients(&self, name: &str) {
        let args = vec!["detach-client".to_owned(), "-s".to_owned(), exact(name)];
        if let Err(e) = self.runner.output(&self.command, &args, None) {
            log::debug!("detach-client for {name} failed: {e}");
        }
    }
}

/// tmux silently rewrites `.` and `:` in new session names to `_`; every lookup
/// has to use the rewritten form to find the session again.
#[must_use]
pub fn tmux_session_name(name: &str) -> String {
    name.replace(['.', ':'], "_")
}

fn exact(name: &str) -> String {
    format!("={}", tmux_session_name(name))
}

fn parse_window_ids(stdout: &str) -> Result<(String, String), GhwtError> {
    let mut parts = stdout.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(window), Some(pane)) => Ok((window.to_owned(), pane.to_owned())),
        _ => Err(GhwtError::Other(format!(
            "unexpected tmux output while creating a window: '{}'",
            stdout.trim()
        ))),
    }
}

impl<R: CommandRunner> SessionManager for TmuxBackend<R> {
    fn backend(&self) -> MuxBackend {
        MuxBackend::Tmux
    }

    fn exists(&self, name: &str) -> Result<bool, GhwtError> {
        let args = vec!["has-session".to_owned(), "-t".to_owned(), exact(name)];
        Ok(self.runner.output(&self.command, &args, None)?.success)
    }

    fn create(&self, name: &str, layout: &Layout, vars: &TemplateVars) -> Result<(), GhwtError> {
        if self.exists(name)? {
            log::info!("tmux session '{name}' already exists");
            return Ok(());
        }
        log::info!("creating tmux session '{name}'");
        self.build(name, layout, vars)
    }

    fn attach(
        &self,
        name: &str,
        worktree_path: &Path,
        opts: &AttachOptions,
    ) -> Result<(), GhwtError> {
        if !self.exists(name)? {
            return Err(GhwtError::SessionNotFound(name.to_owned()));
        }
        if opts.inside_multiplexer {
            self.tmux(&["switch-client", "-t", &exact(name)])?;
            return Ok(());
        }
        self.detach_other_clients(name);
        attach_through_wrapper(
            &self.runner,
            &opts.wrapper,
            &self.command,
            &Self::attach_args(name),
            Some(worktree_path),
        )
    }

    fn kill(&self, name: &str) -> Result<(), GhwtError> {
        if !self.exists(name)? {
            log::debug!("tmux session '{name}' is not running, nothing to kill");
            return Ok(());
        }
        self.tmux(&["kill-session", "-t", &exact(name)])?;
        Ok(())
    }

    fn launch_ui(&self, name: &str, worktree_path: &Path) -> Result<(), GhwtError> {
        if !self.exists(name)? {
            return Err(GhwtError::SessionNotFound(name.to_owned()));
        }
        self.detach_other_clients(name);
        launch_in_terminal(
            &self.runner,
            &self.terminal,
            &self.command,
            &Self::attach_args(name),
            worktree_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::mux::layout::{TabConfig, WindowConfig};
    use crate::process::testing::{CallKind, FakeRunner};

    fn backend(runner: FakeRunner) -> TmuxBackend<FakeRunner> {
        TmuxBackend::with_runner(runner, "tmux".to_owned(), Terminal::default())
    }

    fn vars() -> TemplateVars {
        TemplateVars::new(Path::new("/wt/acme/branch/x"), "acme", "branch/x")
    }

    fn layout() -> Layout {
        Layout {
            pre: vec!["source .venv/bin/activate".to_owned()],
            tabs: vec![TabConfig {
                name: "default".to_owned(),
                pre: Vec::new(),
                windows: vec![
                    WindowConfig {
                        name: "editor".to_owned(),
                        root: None,
                        pre: Vec::new(),
                        panes: vec!["nvim".to_owned()],
                    },
                    WindowConfig {
                        name: "run".to_owned(),
                        root: Some("web".to_owned()),
                        pre: vec!["echo {branch}".to_owned()],
                        panes: vec!["make dev".to_owned(), "make test".to_owned()],
                    },
                ],
            }],
            zellij_ui: None,
        }
    }

    #[test]
    fn create_issues_commands_in_dependency_order() {
        let tmux = backend(FakeRunner::new());
        tmux.create("acme-branch-x", &layout(), &vars()).unwrap();

        let mut expected = vec!["tmux has-session", "tmux new-session", "tmux rename-window"];
        expected.extend(["tmux send-keys"; 4]);
        expected.push("tmux new-window");
        expected.extend(["tmux send-keys"; 6]);
        expected.extend(["tmux split-window", "tmux select-layout"]);
        expected.extend(["tmux send-keys"; 6]);
        expected.push("tmux select-window");
        assert_eq!(tmux.runner.verbs(), expected);

        let calls = tmux.runner.calls();
        assert_eq!(
            calls[1].args,
            [
                "new-session", "-d", "-s", "acme-branch-x", "-c", "/wt/acme/branch/x", "-P",
                "-F", WINDOW_FORMAT,
            ]
        );
        assert_eq!(calls[2].args, ["rename-window", "-t", "@1", "editor"]);
        assert_eq!(calls[5].args, ["send-keys", "-t", "%1", "-l", "nvim"]);
        assert_eq!(calls[6].args, ["send-keys", "-t", "%1", "Enter"]);
        assert_eq!(calls[7].args[3], "=acme-branch-x:");
        assert_eq!(calls[7].args[6], "-c");
        assert_eq!(calls[7].args[7], "/wt/acme/branch/x/web");

        // Second pane re-runs the whole chain.
        let split_pane_keys: Vec<&str> = calls[16..22]
            .iter()
            .step_by(2)
            .map(|c| c.args[4].as_str())
            .collect();
        assert_eq!(
            split_pane_keys,
            ["source .venv/bin/activate", "echo branch/x", "make test"]
        );
        assert!(calls[16..22].iter().all(|c| c.args[2] == "%3"));
    }

    #[test]
    fn key_names_are_typed_literally() {
        let tmux = backend(FakeRunner::new());
        let mut layout = layout();
        layout.pre.clear();
        layout.tabs[0].windows.truncate(1);
        layout.tabs[0].windows[0].panes = vec!["Escape".to_owned()];
        tmux.create("s", &layout, &vars()).unwrap();

        let sends: Vec<Vec<String>> = tmux
            .runner
            .calls()
            .into_iter()
            .filter(|c| c.args[0] == "send-keys")
            .map(|c| c.args)
            .collect();
        assert_eq!(
            sends,
            [
                vec!["send-keys", "-t", "%1", "-l", "Escape"],
                vec!["send-keys", "-t", "%1", "Enter"],
            ]
        );
    }

    #[test]
    fn dotted_names_stay_idempotent() {
        let tmux = backend(FakeRunner::new());
        tmux.create("socket.io-branch-x", &layout(), &vars()).unwrap();
        assert_eq!(tmux.runner.sessions(), ["socket_io-branch-x"]);
        assert!(tmux.exists("socket.io-branch-x").unwrap());

        tmux.create("socket.io-branch-x", &layout(), &vars()).unwrap();
        let verbs = tmux.runner.verbs();
        assert_eq!(verbs.iter().filter(|v| *v == "tmux new-session").count(), 1);

        tmux.kill("socket.io-branch-x").unwrap();
        assert!(tmux.runner.sessions().is_empty());
    }

    #[test]
    fn create_twice_builds_once() {
        let tmux = backend(FakeRunner::new());
        tmux.create("acme-branch-x", &layout(), &vars()).unwrap();
        let first = tmux.runner.calls().len();
        tmux.create("acme-branch-x", &layout(), &vars()).unwrap();

        let verbs = tmux.runner.verbs();
        assert_eq!(verbs.len(), first + 1);
        assert_eq!(verbs.last().map(String::as_str), Some("tmux has-session"));
        assert_eq!(verbs.iter().filter(|v| *v == "tmux new-session").count(), 1);
        assert_eq!(tmux.runner.sessions(), ["acme-branch-x"]);
    }

    #[test]
    fn failing_step_aborts_the_rest() {
        let tmux = backend(FakeRunner::new().failing("new-window"));
        let err = tmux.create("s", &layout(), &vars()).unwrap_err();
        assert!(matches!(err, GhwtError::OperationFailed { .. }));
        assert_eq!(tmux.runner.verbs().last().map(String::as_str), Some("tmux new-window"));
    }

    #[test]
    fn attach_requires_existing_session() {
        let tmux = backend(FakeRunner::new());
        let err = tmux
            .attach("ghost", Path::new("/wt"), &AttachOptions::default())
            .unwrap_err();
        assert!(matches!(err, GhwtError::SessionNotFound(name) if name == "ghost"));
    }

    #[test]
    fn attach_detaches_other_clients_first() {
        let tmux = backend(FakeRunner::new().with_session("s"));
        tmux.attach("s", Path::new("/wt"), &AttachOptions::default())
            .unwrap();
        let calls = tmux.runner.calls();
        assert_eq!(
            tmux.runner.verbs(),
            ["tmux has-session", "tmux detach-client", "tmux attach-session"]
        );
        assert_eq!(calls[2].kind, CallKind::Interactive);
        assert_eq!(calls[2].args, ["attach-session", "-t", "=s"]);
        assert_eq!(calls[2].cwd, Some(PathBuf::from("/wt")));
    }

    #[test]
    fn attach_inside_tmux_switches_client() {
        let tmux = backend(FakeRunner::new().with_session("s"));
        let opts = AttachOptions {
            inside_multiplexer: true,
            ..AttachOptions::default()
        };
        tmux.attach("s", Path::new("/wt"), &opts).unwrap();
        assert_eq!(tmux.runner.verbs(), ["tmux has-session", "tmux switch-client"]);
    }

    #[test]
    fn kill_is_idempotent() {
        let tmux = backend(FakeRunner::new().with_session("s"));
        tmux.kill("s").unwrap();
        tmux.kill("s").unwrap();
        assert_eq!(
            tmux.runner.verbs(),
            ["tmux has-session", "tmux kill-session", "tmux has-session"]
        );
        assert!(!tmux.exists("s").unwrap());
    }

    #[test]
    fn launch_ui_spawns_the_terminal() {
        let tmux = backend(FakeRunner::new().with_session("s"));
        tmux.launch_ui("s", Path::new("/wt")).unwrap();
        let calls = tmux.runner.calls();
        let last = calls.last().unwrap();
        assert_eq!(last.kind, CallKind::Detached);
        assert_eq!(last.program, "ghostty");
        assert_eq!(last.args, ["-e", "tmux", "attach-session", "-t", "=s"]);
    }
}
