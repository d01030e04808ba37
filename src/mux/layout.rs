#![forbid(unsafe_code)]

//! Declarative session layouts: tabs hold windows, windows hold panes, and
//! `pre` commands cascade from session to tab to window into every pane.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GhwtError;

pub const DEFAULT_TAB_NAME: &str = "default";

const BOTH_SCHEMAS: &str = "set either 'tabs' or 'windows', not both";
const NO_SCHEMA: &str = "one of 'tabs' or 'windows' is required";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZellijUiMode {
    #[default]
    Full,
    Compact,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZellijUi {
    pub mode: ZellijUiMode,
}

/// A session config as written on disk. Exactly one of `tabs` / `windows` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabs: Option<Vec<TabConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<WindowConfig>>,
    #[serde(
        default,
        rename = "zellijUi",
        alias = "zellij_ui",
        skip_serializing_if = "Option::is_none"
    )]
    pub zellij_ui: Option<ZellijUi>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<String>,
    pub windows: Vec<WindowConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub panes: Vec<String>,
}

impl WindowConfig {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Pane commands, with a window that lists none treated as one bare pane.
    #[must_use]
    pub fn pane_commands(&self) -> Vec<Option<&str>> {
        if self.panes.is_empty() {
            vec![None]
        } else {
            self.panes.iter().map(|p| Some(p.as_str())).collect()
        }
    }
}

impl SessionConfig {
    /// Layout used when a project has no session config file.
    #[must_use]
    pub fn fallback(project: &str) -> Self {
        Self {
            name: project.to_owned(),
            pre: Vec::new(),
            tabs: None,
            windows: Some(vec![WindowConfig::named("main")]),
            zellij_ui: None,
        }
    }

    pub fn validate(&self) -> Result<(), GhwtError> {
        if self.name.trim().is_empty() {
            return Err(GhwtError::InvalidLayout("session name must not be empty".to_owned()));
        }
        match (&self.tabs, &self.windows) {
            (Some(_), Some(_)) => Err(GhwtError::InvalidLayout(BOTH_SCHEMAS.to_owned())),
            (None, None) => Err(GhwtError::InvalidLayout(NO_SCHEMA.to_owned())),
            (Some(tabs), None) => {
                if tabs.is_empty() {
                    return Err(GhwtError::InvalidLayout("'tabs' must not be empty".to_owned()));
                }
                for tab in tabs {
                    validate_tab(tab)?;
                }
                Ok(())
            }
            (None, Some(windows)) => {
                if windows.is_empty() {
                    return Err(GhwtError::InvalidLayout(
                        "'windows' must not be empty".to_owned(),
                    ));
                }
                windows.iter().try_for_each(validate_window)
            }
        }
    }

    #[must_use]
    pub fn ui_mode(&self) -> Option<ZellijUiMode> {
        self.zellij_ui.as_ref().map(|ui| ui.mode)
    }
}

fn validate_tab(tab: &TabConfig) -> Result<(), GhwtError> {
    if tab.name.trim().is_empty() {
        return Err(GhwtError::InvalidLayout("tab name must not be empty".to_owned()));
    }
    if tab.windows.is_empty() {
        return Err(GhwtError::InvalidLayout(format!(
            "tab '{}' needs at least one window",
            tab.name
        )));
    }
    tab.windows.iter().try_for_each(validate_window)
}

fn validate_window(window: &WindowConfig) -> Result<(), GhwtError> {
    if window.name.trim().is_empty() {
        return Err(GhwtError::InvalidLayout("window name must not be empty".to_owned()));
    }
    Ok(())
}

/// A normalized layout: always tabs, never the legacy `windows` form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layout {
    pub pre: Vec<String>,
    pub tabs: Vec<TabConfig>,
    /// Chrome override for the zellij backend; `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zellij_ui: Option<ZellijUiMode>,
}

/// Lifts legacy window-only configs into a single `"default"` tab.
pub fn normalize(config: &SessionConfig) -> Result<Layout, GhwtError> {
    let tabs = match (&config.tabs, &config.windows) {
        (Some(tabs), None) => {
            for tab in tabs {
                validate_tab(tab)?;
            }
            tabs.clone()
        }
        (None, Some(windows)) => vec![TabConfig {
            name: DEFAULT_TAB_NAME.to_owned(),
            pre: Vec::new(),
            windows: windows.clone(),
        }],
        (Some(_), Some(_)) => return Err(GhwtError::InvalidLayout(BOTH_SCHEMAS.to_owned())),
        (None, None) => return Err(GhwtError::InvalidLayout(NO_SCHEMA.to_owned())),
    };
    Ok(Layout {
        pre: config.pre.clone(),
        tabs,
        zellij_ui: config.ui_mode(),
    })
}

impl Layout {
    /// Title of a multiplexer window: the window name, qualified by its tab when
    /// the layout has more than one tab.
    #[must_use]
    pub fn window_title(&self, tab: &TabConfig, window: &WindowConfig) -> String {
        if self.tabs.len() > 1 {
            format!("{}/{}", tab.name, window.name)
        } else {
            window.name.clone()
        }
    }

    /// Session `pre`, tab `pre`, window `pre`, then the pane's own command, with
    /// template variables substituted. Empty entries are dropped.
    #[must_use]
    pub fn pane_chain(
        &self,
        tab: &TabConfig,
        window: &WindowConfig,
        pane: Option<&str>,
        vars: &TemplateVars,
    ) -> Vec<String> {
        self.pre
            .iter()
            .chain(&tab.pre)
            .chain(&window.pre)
            .map(String::as_str)
            .chain(pane)
            .map(|cmd| substitute_variables(cmd, vars))
            .filter(|cmd| !cmd.trim().is_empty())
            .collect()
    }

    /// Working directory of a window: its `root` resolved against the worktree.
    #[must_use]
    pub fn window_dir(&self, window: &WindowConfig, vars: &TemplateVars) -> PathBuf {
        let base = Path::new(&vars.worktree_path);
        match window.root.as_deref().map(|r| substitute_variables(r, vars)) {
            Some(root) if !root.trim().is_empty() => base.join(root.trim()),
            _ => base.to_path_buf(),
        }
    }

    pub fn windows(&self) -> impl Iterator<Item = (&TabConfig, &WindowConfig)> {
        self.tabs
            .iter()
            .flat_map(|tab| tab.windows.iter().map(move |w| (tab, w)))
    }
}

/// Values substituted for `{worktree_path}`, `{project}` and `{branch}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub worktree_path: String,
    pub project: String,
    pub branch: String,
}

impl TemplateVars {
    #[must_use]
    pub fn new(worktree_path: &Path, project: &str, branch: &str) -> Self {
        Self {
            worktree_path: worktree_path.to_string_lossy().to_string(),
            project: project.to_owned(),
            branch: branch.to_owned(),
        }
    }
}

#[must_use]
pub fn substitute_variables(template: &str, vars: &TemplateVars) -> String {
    template
        .replace("{worktree_path}", &vars.worktree_path)
        .replace("{project}", &vars.project)
        .replace("{branch}", &vars.branch)
}
