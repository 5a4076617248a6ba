//! External command execution behind a swappable runner.

use std::ffi::OsString;
use std::process::Command;

use shell_escape::unix::escape;
use tracing::debug;

use super::BridgeError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts a non-zero exit into [`BridgeError::Command`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Command`] unless the command exited with zero.
    pub fn into_success(self, program: &str) -> Result<Self, BridgeError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(BridgeError::Command {
            program: program.to_owned(),
            code: self.code,
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BridgeError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BridgeError> {
        debug!(command = %render_command(program, args), "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| BridgeError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Renders a command line with shell quoting, for logs and assertions.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        let lossy = arg.to_string_lossy();
        rendered.push_str(escape(lossy).as_ref());
    }
    rendered
}

/// Builds an owned argument vector from string slices.
#[must_use]
pub fn args(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}
