#![forbid(unsafe_code)]

pub mod layout;
pub mod tmux;
pub mod zellij;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SessionSettings;
use crate::core::paths;
use crate::error::GhwtError;
use crate::mux::layout::{Layout, TemplateVars};
use crate::mux::tmux::TmuxBackend;
use crate::mux::zellij::{ZellijBackend, ZellijOptions};
use crate::process::{CmdOutput, CommandRunner, display_command};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MuxBackend {
    #[default]
    Tmux,
    Zellij,
}

impl std::fmt::Display for MuxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Tmux => "tmux",
            Self::Zellij => "zellij",
        })
    }
}

/// Lifecycle of one named multiplexer session.
///
/// Nothing is cached: every call asks the multiplexer. `create` and `kill` are
/// idempotent, `attach` and `launch_ui` require the session to exist.
pub trait SessionManager {
    fn backend(&self) -> MuxBackend;

    fn exists(&self, name: &str) -> Result<bool, GhwtError>;

    /// Builds the session from `layout` unless it already exists.
    fn create(&self, name: &str, layout: &Layout, vars: &TemplateVars) -> Result<(), GhwtError>;

    fn attach(&self, name: &str, worktree_path: &Path, opts: &AttachOptions)
    -> Result<(), GhwtError>;

    fn kill(&self, name: &str) -> Result<(), GhwtError>;

    /// Opens the session in a new terminal application window.
    fn launch_ui(&self, name: &str, worktree_path: &Path) -> Result<(), GhwtError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Command the attach invocation is wrapped in; empty attaches directly.
    pub wrapper: Vec<String>,
    /// The caller already runs inside this multiplexer.
    pub inside_multiplexer: bool,
}

/// Terminal application used by `launch_ui`: `command args... <attach argv>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for Terminal {
    fn default() -> Self {
        Self {
            command: "ghostty".to_owned(),
            args: vec!["-e".to_owned()],
        }
    }
}

/// The worktree a session is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub project: String,
    pub branch: String,
    pub worktree_path: PathBuf,
}

impl SessionTarget {
    #[must_use]
    pub fn session_name(&self) -> String {
        paths::session_name(&self.project, &self.branch)
    }

    #[must_use]
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::new(&self.worktree_path, &self.project, &self.branch)
    }
}

/// Creates (or reuses) the session for `target` and returns its name.
pub fn open_session(
    manager: &dyn SessionManager,
    target: &SessionTarget,
    layout: &Layout,
) -> Result<String, GhwtError> {
    let name = target.session_name();
    manager.create(&name, layout, &target.template_vars())?;
    Ok(name)
}

/// Picks the configured backend.
#[must_use]
pub fn build(settings: &SessionSettings) -> Box<dyn SessionManager> {
    let terminal = Terminal {
        command: settings.terminal.clone(),
        args: settings.terminal_args.clone(),
    };
    match settings.backend {
        MuxBackend::Tmux => Box::new(TmuxBackend::new(settings.tmux_command.clone(), terminal)),
        MuxBackend::Zellij => Box::new(ZellijBackend::new(ZellijOptions::from_settings(
            settings, terminal,
        ))),
    }
}

/// Runs `program attach_args...` on the caller's terminal, inside `wrapper` when
/// one is configured. A wrapper that is not installed falls back to a direct attach.
pub(crate) fn attach_through_wrapper(
    runner: &dyn CommandRunner,
    wrapper: &[String],
    program: &str,
    attach_args: &[String],
    cwd: Option<&Path>,
) -> Result<(), GhwtError> {
    if let Some((bin, extra)) = wrapper.split_first() {
        let mut args = extra.to_vec();
        args.push(program.to_owned());
        args.extend(attach_args.iter().cloned());
        log::debug!("{}", display_command(bin, &args));
        match runner.interactive(bin, &args, cwd) {
            Ok(out) => return interactive_result(bin, &args, &out),
            Err(GhwtError::BinaryNotFound(missing)) => {
                log::warn!("attach wrapper '{missing}' not found, attaching directly");
            }
            Err(e) => return Err(e),
        }
    }
    log::debug!("{}", display_command(program, attach_args));
    let out = runner.interactive(program, attach_args, cwd)?;
    interactive_result(program, attach_args, &out)
}

/// Starts `terminal args... program attach_args...` in the background; a missing
/// terminal application degrades to a direct attach.
pub(crate) fn launch_in_terminal(
    runner: &dyn CommandRunner,
    terminal: &Terminal,
    program: &str,
    attach_args: &[String],
    cwd: &Path,
) -> Result<(), GhwtError> {
    let mut args = terminal.args.clone();
    args.push(program.to_owned());
    args.extend(attach_args.iter().cloned());
    log::debug!("{}", display_command(&terminal.command, &args));
    match runner.spawn_detached(&terminal.command, &args, Some(cwd)) {
        Ok(()) => Ok(()),
        Err(GhwtError::BinaryNotFound(missing)) => {
            log::warn!("terminal '{missing}' not found, attaching directly");
            attach_through_wrapper(runner, &[], program, attach_args, Some(cwd))
        }
        Err(e) => Err(e),
    }
}

fn interactive_result(program: &str, args: &[String], out: &CmdOutput) -> Result<(), GhwtError> {
    if out.success {
        Ok(())
    } else {
        Err(GhwtError::OperationFailed {
            command: display_command(program, args),
            code: out.code,
            stderr: String::new(),
        })
    }
}
