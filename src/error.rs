#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GhwtError {
    #[error(
        "not inside a worktree (expected a directory under {}/<project>/{{branch|pr}}/<name>)",
        .root.display()
    )]
    NotInWorktree { root: PathBuf },

    #[error("session '{0}' does not exist")]
    SessionNotFound(String),

    #[error("`{command}` failed with exit code {code}: {stderr}")]
    OperationFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("session '{name}' did not come up within {waited_ms}ms")]
    SessionStartTimeout { name: String, waited_ms: u64 },

    #[error("{0} is required but was not found in PATH")]
    BinaryNotFound(String),

    #[error("invalid session layout: {0}")]
    InvalidLayout(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
