use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single buildah invocation or of the host-side work around it.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {stderr}", describe_status(.status))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("Unexpected output from `{command}`: {message}")]
    InvalidOutput { command: String, message: String },
    #[error("{message} ({}): {source}", .path.display())]
    Io {
        message: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{feature} is not implemented")]
    NotImplemented { feature: String },
    #[error("Working container {id} has already been removed")]
    Released { id: String },
}

impl ToolError {
    pub(crate) fn io(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        ToolError::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Spawn { .. } => "BUILDAH_SPAWN_ERROR",
            ToolError::Failed { .. } => "BUILDAH_COMMAND_FAILED",
            ToolError::InvalidOutput { .. } => "BUILDAH_INVALID_OUTPUT",
            ToolError::Io { .. } => "BUILDAH_IO_ERROR",
            ToolError::NotImplemented { .. } => "BUILDAH_NOT_IMPLEMENTED",
            ToolError::Released { .. } => "BUILDAH_CONTAINER_RELEASED",
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}
