#![forbid(unsafe_code)]

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::GhwtError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmdOutput {
    pub success: bool,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Process-spawning seam used by the multiplexer backends.
///
/// Every call blocks until the child exits, except [`CommandRunner::spawn_detached`],
/// which returns as soon as the child is running.
pub trait CommandRunner {
    /// Runs `program` with captured stdout/stderr.
    fn output(&self, program: &str, args: &[String], cwd: Option<&Path>)
    -> Result<CmdOutput, GhwtError>;

    /// Runs `program` attached to the caller's terminal.
    fn interactive(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CmdOutput, GhwtError>;

    /// Starts `program` in the background with null stdio and does not wait for it.
    fn spawn_detached(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<(), GhwtError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(program: &str, args: &[String], cwd: Option<&Path>) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command
    }
}

impl CommandRunner for SystemRunner {
    fn output(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CmdOutput, GhwtError> {
        let out = Self::command(program, args, cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(program, &e))?;
        Ok(CmdOutput {
            success: out.status.success(),
            code: out.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        })
    }

    fn interactive(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CmdOutput, GhwtError> {
        let status = Self::command(program, args, cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| spawn_error(program, &e))?;
        Ok(CmdOutput {
            success: status.success(),
            code: status.code().unwrap_or(1),
            ..CmdOutput::default()
        })
    }

    fn spawn_detached(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<(), GhwtError> {
        let mut command = Self::command(program, args, cwd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|e| spawn_error(program, &e))?;
        // Reap in the background so the child never lingers as a zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

fn spawn_error(program: &str, e: &std::io::Error) -> GhwtError {
    match e.kind() {
        std::io::ErrorKind::NotFound => GhwtError::BinaryNotFound(program.to_owned()),
        _ => GhwtError::Other(format!("failed to run {program}: {e}")),
    }
}

/// Runs a command and turns a non-zero exit into [`GhwtError::OperationFailed`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CmdOutput, GhwtError> {
    log::debug!("{}", display_command(program, args));
    let out = runner.output(program, args, cwd)?;
    if out.success {
        Ok(out)
    } else {
        Err(GhwtError::OperationFailed {
            command: display_command(program, args),
            code: out.code,
            stderr: out.stderr.trim().to_owned(),
        })
    }
}

#[must_use]
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut s = program.to_owned();
    for arg in args {
        s.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            s.push('\'');
            s.push_str(arg);
            s.push('\'');
        } else {
            s.push_str(arg);
        }
    }
    s
}

#[must_use]
pub fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}
