use capsules_buildah::ToolError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed front-matter, parameter spec, or script syntax. Always fatal
/// before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("parameter `{name}` declares unknown caster `{caster}`")]
    UnknownCaster { name: String, caster: String },
    #[error("parameter `{name}`: cannot convert {raw:?} with `{caster}`: {reason}")]
    CastFailed {
        name: String,
        caster: String,
        raw: String,
        reason: String,
    },
}

/// Class of a runtime failure raised while a script executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeError,
    NameError,
    KeyError,
    IndexError,
    ValueError,
    AttributeError,
    ZeroDivisionError,
    NotImplementedError,
    RecursionError,
    MemoryError,
    /// Raised explicitly by the script with `raise`.
    Error,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NameError => "NameError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::NotImplementedError => "NotImplementedError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::Error => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("line {line}: {kind}: {message}")]
    Runtime {
        line: usize,
        kind: ErrorKind,
        message: String,
    },
    #[error("line {line}: {source}")]
    Tool {
        line: usize,
        #[source]
        source: ToolError,
    },
    #[error("line {line}: script returned a working container, not an image (did you forget to call commit()?)")]
    UncommittedContainer { line: usize },
    #[error("line {line}: script returned {found}, expected an Image or None")]
    ArtifactType { line: usize, found: String },
}

impl ExecError {
    pub fn line(&self) -> usize {
        match self {
            ExecError::Runtime { line, .. }
            | ExecError::Tool { line, .. }
            | ExecError::UncommittedContainer { line }
            | ExecError::ArtifactType { line, .. } => *line,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Runtime { .. } => "SCRIPT_RUNTIME_ERROR",
            ExecError::Tool { source, .. } => source.code(),
            ExecError::UncommittedContainer { .. } | ExecError::ArtifactType { .. } => {
                "SCRIPT_ARTIFACT_TYPE"
            }
        }
    }
}

/// Anything that can stop a script between reading it and finishing its run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}
