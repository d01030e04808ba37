#![forbid(unsafe_code)]

//! Zellij cannot be scripted step by step the way tmux can, so a session is
//! rendered up front into a KDL layout and started as a detached background
//! server pointed at that file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sha2::{Digest as _, Sha256};

use crate::config::SessionSettings;
use crate::error::GhwtError;
use crate::mux::layout::{Layout, TabConfig, TemplateVars, WindowConfig, ZellijUiMode};
use crate::mux::{
    AttachOptions, MuxBackend, SessionManager, Terminal, attach_through_wrapper,
    launch_in_terminal,
};
use crate::process::{CommandRunner, SystemRunner, display_command, run_checked};

/// Longest session name zellij accepts before its socket path gets too long.
pub const MAX_SESSION_NAME: usize = 32;
const PREFIX_BUDGET: usize = MAX_SESSION_NAME - 9;

const LAYOUT_DIR: &str = ".zellij";
const LAYOUT_FILE: &str = "layout.kdl";

#[derive(Debug, Clone)]
pub struct ZellijOptions {
    pub command: String,
    /// Shell every pane runs its command chain in.
    pub shell: String,
    /// Chrome used when the layout does not choose one.
    pub ui_mode: ZellijUiMode,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub terminal: Terminal,
}

impl ZellijOptions {
    #[must_use]
    pub fn from_settings(settings: &SessionSettings, terminal: Terminal) -> Self {
        Self {
            command: settings.zellij_command.clone(),
            shell: settings.shell.clone(),
            ui_mode: settings.zellij_ui,
            ready_timeout: Duration::from_millis(settings.zellij_ready_timeout_ms),
            poll_interval: Duration::from_millis(settings.zellij_poll_interval_ms),
            terminal,
        }
    }
}

impl Default for ZellijOptions {
    fn default() -> Self {
        Self {
            command: "zellij".to_owned(),
            shell: "bash".to_owned(),
            ui_mode: ZellijUiMode::Full,
            ready_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(200),
            terminal: Terminal::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZellijBackend<R = SystemRunner> {
    runner: R,
    opts: ZellijOptions,
}

impl ZellijBackend<SystemRunner> {
    #[must_use]
    pub fn new(opts: ZellijOptions) -> Self {
        Self::with_runner(SystemRunner, opts)
    }
}

impl<R: CommandRunner> ZellijBackend<R> {
    #[must_use]
    pub fn with_runner(runner: R, opts: ZellijOptions) -> Self {
        Self { runner, opts }
    }

    fn is_running(&self, alias: &str) -> Result<bool, GhwtError> {
        let args = argv(&["list-sessions", "--no-formatting"]);
        let out = self.runner.output(&self.opts.command, &args, None)?;
        // zellij exits non-zero when there are no sessions at all.
        if !out.success {
            return Ok(false);
        }
        Ok(out
            .stdout
            .lines()
            .filter(|line| !line.contains("EXITED"))
            .filter_map(|line| line.split_whitespace().next())
            .any(|name| name == alias))
    }

    /// Drops a resurrectable (exited) session so its name can be reused.
    fn forget_exited(&self, alias: &str) {
        let args = argv(&["delete-session", alias]);
        log::debug!("{}", display_command(&self.opts.command, &args));
        match self.runner.output(&self.opts.command, &args, None) {
            Ok(out) if !out.success => {
                log::debug!("no exited zellij session '{alias}' to delete");
            }
            Ok(_) => {}
            Err(e) => log::debug!("zellij delete-session {alias} failed: {e}"),
        }
    }

    fn wait_until_running(&self, alias: &str) -> Result<(), GhwtError> {
        let started = Instant::now();
        loop {
            if self.is_running(alias)? {
                log::debug!(
                    "zellij session '{alias}' ready after {}ms",
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            if started.elapsed() >= self.opts.ready_timeout {
                return Err(GhwtError::SessionStartTimeout {
                    name: alias.to_owned(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(self.opts.poll_interval);
        }
    }
}

impl<R: CommandRunner> SessionManager for ZellijBackend<R> {
    fn backend(&self) -> MuxBackend {
        MuxBackend::Zellij
    }

    fn exists(&self, name: &str) -> Result<bool, GhwtError> {
        self.is_running(&zellij_session_name(name))
    }

    fn create(&self, name: &str, layout: &Layout, vars: &TemplateVars) -> Result<(), GhwtError> {
        let alias = zellij_session_name(name);
        if self.is_running(&alias)? {
            log::info!("zellij session '{alias}' already exists");
            return Ok(());
        }
        log::info!("creating zellij session '{alias}'");
        self.forget_exited(&alias);

        let worktree = Path::new(&vars.worktree_path);
        let mode = layout.zellij_ui.unwrap_or(self.opts.ui_mode);
        let kdl = render_layout(layout, vars, mode, &self.opts.shell);
        let path = write_layout(worktree, &kdl)?;

        let path = path.to_string_lossy();
        let args = argv(&[
            "attach",
            "--create-background",
            &alias,
            "options",
            "--default-layout",
            &path,
        ]);
        log::debug!("{}", display_command(&self.opts.command, &args));
        self.runner
            .spawn_detached(&self.opts.command, &args, Some(worktree))?;

        self.wait_until_running(&alias)
    }

    fn attach(
        &self,
        name: &str,
        worktree_path: &Path,
        opts: &AttachOptions,
    ) -> Result<(), GhwtError> {
        let alias = zellij_session_name(name);
        if !self.is_running(&alias)? {
            return Err(GhwtError::SessionNotFound(name.to_owned()));
        }
        if opts.inside_multiplexer {
            log::warn!("already inside zellij, attaching to '{alias}' as a nested client");
        }
        attach_through_wrapper(
            &self.runner,
            &opts.wrapper,
            &self.opts.command,
            &argv(&["attach", &alias]),
            Some(worktree_path),
        )
    }

    fn kill(&self, name: &str) -> Result<(), GhwtError> {
        let alias = zellij_session_name(name);
        if !self.is_running(&alias)? {
            log::debug!("zellij session '{alias}' is not running, nothing to kill");
            return Ok(());
        }
        run_checked(
            &self.runner,
            &self.opts.command,
            &argv(&["kill-session", &alias]),
            None,
        )?;
        self.forget_exited(&alias);
        Ok(())
    }

    fn launch_ui(&self, name: &str, worktree_path: &Path) -> Result<(), GhwtError> {
        let alias = zellij_session_name(name);
        if !self.is_running(&alias)? {
            return Err(GhwtError::SessionNotFound(name.to_owned()));
        }
        launch_in_terminal(
            &self.runner,
            &self.opts.terminal,
            &self.opts.command,
            &argv(&["attach", &alias]),
            worktree_path,
        )
    }
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

/// Name zellij actually sees for `name`.
///
/// Names that fit are kept. Longer ones become `{prefix}-{hash}`: up to 23 bytes
/// of the original (cut on a char boundary, trailing `-` dropped) plus the first
/// 8 hex digits of its SHA-256, so the result never exceeds 32 bytes.
#[must_use]
pub fn zellij_session_name(name: &str) -> String {
    if name.len() <= MAX_SESSION_NAME {
        return name.to_owned();
    }
    let mut end = PREFIX_BUDGET;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = name[..end].trim_end_matches('-');
    let hash = short_hash(name);
    if prefix.is_empty() {
        hash
    } else {
        format!("{prefix}-{hash}")
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut s = String::with_capacity(8);
    for b in &digest[..4] {
        let _ = write!(&mut s, "{b:02x}");
    }
    s
}

#[must_use]
pub fn layout_path(worktree: &Path) -> PathBuf {
    worktree.join(LAYOUT_DIR).join(LAYOUT_FILE)
}

fn write_layout(worktree: &Path, kdl: &str) -> Result<PathBuf, GhwtError> {
    let path = layout_path(worktree);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| GhwtError::IoPath {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&path, kdl).map_err(|source| GhwtError::IoPath {
        path: path.clone(),
        source,
    })?;
    log::debug!("wrote zellij layout {}", path.display());
    Ok(path)
}

/// Renders `layout` as a zellij KDL layout document.
///
/// Every window becomes a tab. Each pane runs its command chain inside `shell`
/// and then execs an interactive `shell` so the pane stays open.
#[must_use]
pub fn render_layout(
    layout: &Layout,
    vars: &TemplateVars,
    mode: ZellijUiMode,
    shell: &str,
) -> String {
    let mut out = String::new();
    out.push_str("layout {\n");
    render_chrome(&mut out, mode);
    for (index, (tab, window)) in layout.windows().enumerate() {
        render_tab(&mut out, layout, tab, window, vars, shell, index == 0);
    }
    out.push_str("}\n");
    out
}

fn render_chrome(out: &mut String, mode: ZellijUiMode) {
    match mode {
        ZellijUiMode::Full => {
            out.push_str("    default_tab_template {\n");
            bar(out, 1, "zellij:tab-bar");
            out.push_str("        children\n");
            bar(out, 2, "zellij:status-bar");
            out.push_str("    }\n");
        }
        ZellijUiMode::Compact => {
            out.push_str("    default_tab_template {\n");
            out.push_str("        children\n");
            bar(out, 1, "zellij:compact-bar");
            out.push_str("    }\n");
        }
        ZellijUiMode::None => {}
    }
}

fn bar(out: &mut String, size: u8, plugin: &str) {
    let _ = writeln!(out, "        pane size={size} borderless=true {{");
    let _ = writeln!(out, "            plugin location={}", kdl_string(plugin));
    out.push_str("        }\n");
}

fn render_tab(
    out: &mut String,
    layout: &Layout,
    tab: &TabConfig,
    window: &WindowConfig,
    vars: &TemplateVars,
    shell: &str,
    focus: bool,
) {
    let title = layout.window_title(tab, window);
    let dir = layout.window_dir(window, vars);
    let _ = write!(
        out,
        "    tab name={} cwd={}",
        kdl_string(&title),
        kdl_string(&dir.to_string_lossy())
    );
    if focus {
        out.push_str(" focus=true");
    }
    out.push_str(" {\n");

    let panes = window.pane_commands();
    let depth = if panes.len() > 1 {
        out.push_str("        pane split_direction=\"vertical\" {\n");
        3
    } else {
        2
    };
    for pane in panes {
        let chain = layout.pane_chain(tab, window, pane, vars);
        render_pane(out, depth, &chain, shell);
    }
    if depth == 3 {
        out.push_str("        }\n");
    }
    out.push_str("    }\n");
}

fn render_pane(out: &mut String, depth: usize, chain: &[String], shell: &str) {
    let indent = "    ".repeat(depth);
    if chain.is_empty() {
        let _ = writeln!(out, "{indent}pane");
        return;
    }
    let script = format!("{}; exec {shell}", chain.join("; "));
    let _ = writeln!(out, "{indent}pane command={} {{", kdl_string(shell));
    let _ = writeln!(out, "{indent}    args \"-lc\" {}", kdl_string(&script));
    let _ = writeln!(out, "{indent}}}");
}

fn kdl_string(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
