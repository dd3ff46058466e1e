//! Error types for Sandpit

use std::fmt;

use thiserror::Error;

/// Exception classes a script can raise, catch and inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    LookupError,
    MemoryError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    StopIteration,
    TypeError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 18] = [
        ExceptionKind::Exception,
        ExceptionKind::ArithmeticError,
        ExceptionKind::AssertionError,
        ExceptionKind::AttributeError,
        ExceptionKind::ImportError,
        ExceptionKind::IndexError,
        ExceptionKind::KeyError,
        ExceptionKind::LookupError,
        ExceptionKind::MemoryError,
        ExceptionKind::NameError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::OverflowError,
        ExceptionKind::RecursionError,
        ExceptionKind::RuntimeError,
        ExceptionKind::StopIteration,
        ExceptionKind::TypeError,
        ExceptionKind::ValueError,
        ExceptionKind::ZeroDivisionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::MemoryError => "MemoryError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Direct base class in the exception hierarchy.
    pub fn parent(self) -> Option<Self> {
        match self {
            ExceptionKind::Exception => None,
            ExceptionKind::IndexError | ExceptionKind::KeyError => Some(ExceptionKind::LookupError),
            ExceptionKind::OverflowError | ExceptionKind::ZeroDivisionError => {
                Some(ExceptionKind::ArithmeticError)
            }
            ExceptionKind::RecursionError | ExceptionKind::NotImplementedError => {
                Some(ExceptionKind::RuntimeError)
            }
            _ => Some(ExceptionKind::Exception),
        }
    }

    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception raised inside a script. These are the only errors that
/// `try`/`except` can observe.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptException {
    pub kind: ExceptionKind,
    pub message: String,
    pub line: Option<usize>,
}

impl ScriptException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (line {})", line),
        None => String::new(),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("SyntaxError: {message}{}", line_suffix(.line))]
    Syntax { message: String, line: Option<usize> },

    #[error("{0}")]
    Policy(String),

    #[error("operation limit of {limit} exceeded")]
    OperationLimit { limit: u64 },

    #[error("loop iteration limit of {limit} exceeded{}", line_suffix(.line))]
    IterationLimit { limit: u64, line: Option<usize> },

    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Runtime(ScriptException),

    /// A sandbox configuration document that could not be used.
    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}

impl SandboxError {
    pub fn syntax(message: impl Into<String>, line: Option<usize>) -> Self {
        SandboxError::Syntax {
            message: message.into(),
            line,
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        SandboxError::Policy(message.into())
    }

    pub fn runtime(kind: ExceptionKind, message: impl Into<String>) -> Self {
        SandboxError::Runtime(ScriptException::new(kind, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::runtime(ExceptionKind::ValueError, message)
    }

    /// Attach a script line to errors that do not carry one yet.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            SandboxError::Runtime(exc) => SandboxError::Runtime(exc.with_line(line)),
            SandboxError::IterationLimit { limit, line: None } => SandboxError::IterationLimit {
                limit,
                line: Some(line),
            },
            SandboxError::Syntax {
                message,
                line: None,
            } => SandboxError::Syntax {
                message,
                line: Some(line),
            },
            other => other,
        }
    }

    /// Whether `try`/`except` may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, SandboxError::Runtime(_))
    }
}

impl From<ScriptException> for SandboxError {
    fn from(exc: ScriptException) -> Self {
        SandboxError::Runtime(exc)
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        assert!(ExceptionKind::ZeroDivisionError.is_subclass_of(ExceptionKind::ArithmeticError));
        assert!(ExceptionKind::KeyError.is_subclass_of(ExceptionKind::LookupError));
        assert!(ExceptionKind::KeyError.is_subclass_of(ExceptionKind::Exception));
        assert!(!ExceptionKind::KeyError.is_subclass_of(ExceptionKind::ValueError));
        assert!(ExceptionKind::RecursionError.is_subclass_of(ExceptionKind::RuntimeError));
    }

    #[test]
    fn test_runtime_display_carries_line() {
        let err = SandboxError::runtime(ExceptionKind::ZeroDivisionError, "division by zero")
            .at_line(3);
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero (line 3)");
    }

    #[test]
    fn test_first_line_wins() {
        let err = SandboxError::value_error("bad").at_line(7).at_line(2);
        assert_eq!(err.to_string(), "ValueError: bad (line 7)");
    }

    #[test]
    fn test_syntax_display() {
        let err = SandboxError::syntax("invalid syntax", Some(4));
        assert_eq!(err.to_string(), "SyntaxError: invalid syntax (line 4)");
    }

    #[test]
    fn test_only_runtime_is_catchable() {
        assert!(SandboxError::type_error("x").is_catchable());
        assert!(!SandboxError::policy("os.system is not permitted").is_catchable());
        assert!(!SandboxError::OperationLimit { limit: 10 }.is_catchable());
        assert!(!SandboxError::Cancelled.is_catchable());
    }
}
