#![forbid(unsafe_code)]

pub mod session;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::GhwtError;
use crate::mux::MuxBackend;
use crate::mux::layout::ZellijUiMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(alias = "root")]
    pub worktrees_root: String,
    #[serde(alias = "vault")]
    pub vault_root: String,
    pub session_config_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            worktrees_root: "~/worktrees".to_owned(),
            vault_root: "~/notes".to_owned(),
            session_config_dir: "~/.config/ghwt/sessions".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub backend: MuxBackend,
    pub tmux_command: String,
    pub zellij_command: String,
    pub shell: String,
    /// Command the attach is wrapped in, split on whitespace. Empty attaches directly.
    pub ui_wrapper: String,
    pub terminal: String,
    pub terminal_args: Vec<String>,
    #[serde(alias = "zellijUi")]
    pub zellij_ui: ZellijUiMode,
    pub zellij_ready_timeout_ms: u64,
    pub zellij_poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: MuxBackend::Tmux,
            tmux_command: "tmux".to_owned(),
            zellij_command: "zellij".to_owned(),
            shell: "bash".to_owned(),
            ui_wrapper: String::new(),
            terminal: "ghostty".to_owned(),
            terminal_args: vec!["-e".to_owned()],
            zellij_ui: ZellijUiMode::Full,
            zellij_ready_timeout_ms: 5000,
            zellij_poll_interval_ms: 200,
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn wrapper_argv(&self) -> Vec<String> {
        self.ui_wrapper
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

/// `override_path` when given, otherwise `~/.config/ghwt/config.toml`.
pub fn default_paths(override_path: Option<&Path>) -> anyhow::Result<ConfigPaths> {
    let config_file = match override_path {
        Some(path) => path.to_path_buf(),
        None => home_dir()
            .context("failed to determine the home directory")?
            .join(".config")
            .join("ghwt")
            .join("config.toml"),
    };
    Ok(ConfigPaths { config_file })
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()))
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    let rest = if input == "~" {
        Some("")
    } else {
        input.strip_prefix("~/")
    };
    match (rest, home_dir()) {
        (Some(""), Some(home)) => home.to_string_lossy().into_owned(),
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => input.to_owned(),
    }
}

/// `path` with the home directory shown as `~`.
#[must_use]
pub fn tilde_path(path: &Path) -> String {
    let rest = home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf));
    match rest {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_owned(),
        Some(rest) => format!("~/{}", rest.display()),
        None => path.display().to_string(),
    }
}

/// Expands `~`, `$VAR` and `${VAR}`, and anchors relative paths at the cwd.
pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input.trim()));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Unknown variables are left as written.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

pub fn load(override_path: Option<&Path>) -> anyhow::Result<(Config, ConfigPaths)> {
    let paths = default_paths(override_path)?;
    let cfg = read_config(&paths.config_file)?;
    cfg.validate()?;
    log::debug!("loaded config from {}", paths.config_file.display());
    Ok((cfg, paths))
}

pub fn list_resolved_toml(override_path: Option<&Path>) -> anyhow::Result<String> {
    let (cfg, _paths) = load(override_path)?;
    Ok(toml::to_string_pretty(&cfg)?)
}

/// File contents, or `None` when there is no config file yet.
fn read_raw(path: &Path) -> anyhow::Result<Option<String>> {
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("failed to read {}", path.display()))
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    match read_raw(path)? {
        Some(raw) => toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML in {}", path.display())),
        None => Ok(Config::default()),
    }
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let cfg = read_config(path)?;
    cfg.validate()?;
    Ok(lookup(&cfg, &normalize_key(key)).map(render_value))
}

/// Sets one dotted key, keeping the rest of the file (comments included) intact.
/// Nothing is written unless the result still loads and validates.
pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let mut doc = match read_raw(path)? {
        Some(raw) => raw
            .parse::<toml_edit::DocumentMut>()
            .with_context(|| format!("failed to parse TOML in {}", path.display()))?,
        None => toml_edit::DocumentMut::new(),
    };

    let norm = normalize_key(key);
    let item = parse_setting(key, &norm, value)?;
    insert_dotted(&mut doc, &norm, item)?;

    let updated = doc.to_string();
    let cfg: Config = toml::from_str(&updated)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, updated)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("set {norm} in {}", path.display());
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), GhwtError> {
        for (key, value) in [
            ("paths.worktrees_root", &self.paths.worktrees_root),
            ("paths.vault_root", &self.paths.vault_root),
            ("paths.session_config_dir", &self.paths.session_config_dir),
            ("session.tmux_command", &self.session.tmux_command),
            ("session.zellij_command", &self.session.zellij_command),
            ("session.shell", &self.session.shell),
        ] {
            if value.trim().is_empty() {
                return Err(GhwtError::Config(format!("{key} must not be empty")));
            }
        }
        if self.session.zellij_ready_timeout_ms == 0 {
            return Err(GhwtError::Config(
                "session.zellij_ready_timeout_ms must be >= 1".to_owned(),
            ));
        }
        if self.session.zellij_poll_interval_ms == 0 {
            return Err(GhwtError::Config(
                "session.zellij_poll_interval_ms must be >= 1".to_owned(),
            ));
        }
        if self.session.zellij_poll_interval_ms > self.session.zellij_ready_timeout_ms {
            return Err(GhwtError::Config(
                "session.zellij_poll_interval_ms must not exceed session.zellij_ready_timeout_ms"
                    .to_owned(),
            ));
        }
        Ok(())
    }

    pub fn worktrees_root(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.paths.worktrees_root)
    }

    pub fn vault_root(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.paths.vault_root)
    }

    pub fn session_config_dir(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.paths.session_config_dir)
    }
}

/// How `config set` reads the value for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingKind {
    Text,
    /// Whitespace-separated words stored as an array.
    Words,
    Millis,
    OneOf(&'static [&'static str]),
}

fn normalize_key(key: &str) -> String {
    match key {
        "paths.root" => "paths.worktrees_root",
        "paths.vault" => "paths.vault_root",
        "session.zellijUi" => "session.zellij_ui",
        "mux.backend" => "session.backend",
        _ => key,
    }
    .to_owned()
}

fn setting_kind(key: &str) -> Option<SettingKind> {
    Some(match key {
        "paths.worktrees_root"
        | "paths.vault_root"
        | "paths.session_config_dir"
        | "session.tmux_command"
        | "session.zellij_command"
        | "session.shell"
        | "session.ui_wrapper"
        | "session.terminal" => SettingKind::Text,
        "session.terminal_args" => SettingKind::Words,
        "session.zellij_ready_timeout_ms" | "session.zellij_poll_interval_ms" => {
            SettingKind::Millis
        }
        "session.backend" => SettingKind::OneOf(&["tmux", "zellij"]),
        "session.zellij_ui" => SettingKind::OneOf(&["full", "compact", "none"]),
        _ => return None,
    })
}

/// `key` is what the user typed (for messages), `norm` its canonical form.
fn parse_setting(key: &str, norm: &str, value: &str) -> anyhow::Result<toml_edit::Item> {
    let kind = setting_kind(norm).ok_or_else(|| GhwtError::InvalidConfigKey(key.to_owned()))?;
    let invalid = |msg: String| GhwtError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    };
    let value = value.trim();
    Ok(match kind {
        SettingKind::Text => toml_edit::value(value),
        SettingKind::Words => {
            toml_edit::value(value.split_whitespace().collect::<toml_edit::Array>())
        }
        SettingKind::Millis => {
            let ms = value
                .parse::<u32>()
                .map_err(|e| invalid(format!("expected milliseconds, got '{value}': {e}")))?;
            toml_edit::value(i64::from(ms))
        }
        SettingKind::OneOf(allowed) => {
            if !allowed.contains(&value) {
                return Err(invalid(format!("must be one of: {}", allowed.join(", "))).into());
            }
            toml_edit::value(value)
        }
    })
}

/// Inserts `section.leaf`, creating `[section]` when the file has none.
fn insert_dotted(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    item: toml_edit::Item,
) -> Result<(), GhwtError> {
    let Some((section, leaf)) = key.split_once('.') else {
        return Err(GhwtError::InvalidConfigKey(key.to_owned()));
    };
    let table = doc
        .entry(section)
        .or_insert(toml_edit::table())
        .as_table_mut()
        .ok_or_else(|| GhwtError::Config(format!("cannot set {key}: [{section}] is not a table")))?;
    table.insert(leaf, item);
    Ok(())
}

fn lookup(cfg: &Config, key: &str) -> Option<toml::Value> {
    let mut value = toml::Value::try_from(cfg).ok()?;
    for segment in key.split('.') {
        let next = value.as_table_mut()?.remove(segment)?;
        value = next;
    }
    Some(value)
}

/// Plain scalars for `config get`; word lists come back space-separated.
fn render_value(value: toml::Value) -> String {
    match value {
        toml::Value::String(s) => s,
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}
