use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::{debug, info};

use crate::error::ToolError;

/// Seam between the typed buildah client and the process that actually does the work.
///
/// Every call is blocking and returns only once the tool has exited. A nonzero exit
/// status is reported as [`ToolError::Failed`].
pub trait ToolRunner {
    /// Run the tool with captured output and return its stdout.
    fn output(&self, args: &[String]) -> Result<String, ToolError>;

    /// Run the tool with caller-chosen stream wiring. Returns stdout only when
    /// [`Streams::capture`] is set.
    fn run(&self, args: &[String], streams: &Streams) -> Result<Option<String>, ToolError>;
}

/// Standard-stream redirection for [`ToolRunner::run`]. `None` inherits the
/// corresponding stream of the current process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Streams {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub capture: bool,
}

/// Runs a real executable through [`std::process::Command`].
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    debug: bool,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args);
        let cmdline = command_line_string(&command);
        if self.debug {
            info!(command = %cmdline, "buildah");
        } else {
            debug!(command = %cmdline, "buildah");
        }
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ToolError {
        ToolError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn output(&self, args: &[String]) -> Result<String, ToolError> {
        let mut command = self.command(args);
        command.stdin(Stdio::null());
        let output = command.output().map_err(|err| self.spawn_error(err))?;
        let logs = CommandLogs::from_output(&output);
        check_status(&command, &output.status, &logs.stderr)?;
        Ok(logs.stdout)
    }

    fn run(&self, args: &[String], streams: &Streams) -> Result<Option<String>, ToolError> {
        let mut command = self.command(args);
        if let Some(path) = &streams.stdin {
            command.stdin(open_input(path)?);
        }
        if streams.capture {
            command.stdout(Stdio::piped());
        } else if let Some(path) = &streams.stdout {
            command.stdout(open_output(path)?);
        }
        if let Some(path) = &streams.stderr {
            command.stderr(open_output(path)?);
        } else if streams.capture {
            command.stderr(Stdio::piped());
        }

        if streams.capture {
            let output = command.output().map_err(|err| self.spawn_error(err))?;
            let logs = CommandLogs::from_output(&output);
            if output.status.success() && !output.stderr.is_empty() {
                // Piped for failure messages only; echo it on success.
                let _ = std::io::stderr().write_all(&output.stderr);
            }
            check_status(&command, &output.status, &logs.stderr)?;
            Ok(Some(logs.stdout))
        } else {
            let status = command.status().map_err(|err| self.spawn_error(err))?;
            check_status(&command, &status, "")?;
            Ok(None)
        }
    }
}

fn open_input(path: &Path) -> Result<File, ToolError> {
    File::open(path).map_err(|err| ToolError::io("Failed to open stdin source", path, err))
}

fn open_output(path: &Path) -> Result<File, ToolError> {
    File::create(path).map_err(|err| ToolError::io("Failed to create output file", path, err))
}

fn check_status(command: &Command, status: &ExitStatus, stderr: &str) -> Result<(), ToolError> {
    if status.success() {
        return Ok(());
    }
    Err(ToolError::Failed {
        command: command_line_string(command),
        status: status.code(),
        stderr: truncate(stderr.trim(), 2048),
    })
}

#[derive(Debug, Clone)]
struct CommandLogs {
    stdout: String,
    stderr: String,
}

impl CommandLogs {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut truncated = text[..end].to_string();
        truncated.push_str("… (truncated)");
        truncated
    }
}

/// Quote one token so a POSIX shell-words parser reads it back unchanged.
pub fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let escaped = arg.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

/// Join tokens with every token individually quoted.
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn command_line_string(cmd: &Command) -> String {
    let mut s = String::new();
    s.push_str(&cmd.get_program().to_string_lossy());
    for a in cmd.get_args() {
        s.push(' ');
        let a = a.to_string_lossy();
        if a.is_empty() || a.contains(' ') || a.contains('"') || a.contains('\'') {
            s.push_str(&shell_escape(&a));
        } else {
            s.push_str(&a);
        }
    }
    s
}
