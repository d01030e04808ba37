#![forbid(unsafe_code)]

//! Per-project session layout files:
//! `{session_config_dir}/{project}/.ghwt-session.{yaml|yml|json}`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::mux::layout::SessionConfig;

const FILE_STEM: &str = ".ghwt-session";
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// First existing session file for `project`, probing yaml, yml, then json.
#[must_use]
pub fn find_session_config(dir: &Path, project: &str) -> Option<PathBuf> {
    let project_dir = dir.join(project);
    EXTENSIONS
        .iter()
        .map(|ext| project_dir.join(format!("{FILE_STEM}.{ext}")))
        .find(|p| p.is_file())
}

/// Parses a session file by extension and validates its schema.
pub fn load_session_config(path: &Path) -> anyhow::Result<SessionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let config: SessionConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse JSON in {}", path.display()))?,
        Some("yaml" | "yml") => serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse YAML in {}", path.display()))?,
        other => anyhow::bail!(
            "unsupported session config extension {:?} for {}",
            other.unwrap_or_default(),
            path.display()
        ),
    };

    config
        .validate()
        .with_context(|| format!("invalid session config {}", path.display()))?;
    Ok(config)
}

/// The project's session config, or the built-in single-window layout when the
/// project has none.
pub fn load_for_project(dir: &Path, project: &str) -> anyhow::Result<SessionConfig> {
    match find_session_config(dir, project) {
        Some(path) => {
            log::debug!("using session config {}", path.display());
            load_session_config(&path)
        }
        None => {
            log::debug!(
                "no session config for '{project}' under {}, using the default layout",
                dir.display()
            );
            Ok(SessionConfig::fallback(project))
        }
    }
}
