use capsules_buildah::ToolError;

use super::value::Value;
use crate::error::{ErrorKind, ExecError};

/// How a statement finished.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
    /// Program-level produce, with the line it happened on.
    Produce(Value, usize),
}

/// A failure unwinding through the interpreter. The line is filled in by the
/// innermost statement that sees it.
#[derive(Debug)]
pub(crate) enum Fault {
    Raise {
        kind: ErrorKind,
        message: String,
        line: Option<usize>,
    },
    Tool {
        source: ToolError,
        line: Option<usize>,
    },
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Fault::Raise {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Fault::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Fault::new(ErrorKind::ValueError, message)
    }

    pub fn key_error(key: &str) -> Self {
        Fault::new(ErrorKind::KeyError, format!("'{}'", key))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Fault::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn at(self, at_line: usize) -> Self {
        match self {
            Fault::Raise {
                kind,
                message,
                line,
            } => Fault::Raise {
                kind,
                message,
                line: line.or(Some(at_line)),
            },
            Fault::Tool { source, line } => Fault::Tool {
                source,
                line: line.or(Some(at_line)),
            },
        }
    }

    /// Text bound by `except as name`.
    pub fn describe(&self) -> String {
        match self {
            Fault::Raise { kind, message, .. } => format!("{}: {}", kind, message),
            Fault::Tool { source, .. } => format!("ToolError: {}", source),
        }
    }

    pub fn into_exec_error(self) -> ExecError {
        match self {
            Fault::Raise {
                kind,
                message,
                line,
            } => ExecError::Runtime {
                line: line.unwrap_or(0),
                kind,
                message,
            },
            Fault::Tool { source, line } => ExecError::Tool {
                line: line.unwrap_or(0),
                source,
            },
        }
    }
}

impl From<ToolError> for Fault {
    fn from(source: ToolError) -> Self {
        Fault::Tool { source, line: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_line_wins() {
        let fault = Fault::key_error("X").at(7).at(2);
        match fault.into_exec_error() {
            ExecError::Runtime { line, kind, message } => {
                assert_eq!((line, kind, message.as_str()), (7, ErrorKind::KeyError, "'X'"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn describe_includes_kind() {
        assert_eq!(
            Fault::type_error("bad operand").describe(),
            "TypeError: bad operand"
        );
    }
}
