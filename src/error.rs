//! Crate-wide error type.
//!
//! Each subsystem defines its own narrow error enum (`FramingError`,
//! `ConfigError`, ...); this module aggregates them behind a single
//! public `Error` so callers do not need to know which layer failed.

use std::fmt;

use crate::config::ConfigError;
use crate::framing::FramingError;

/// A validation failure caught before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A name (variable, constant, class segment) contained a space.
    SpaceInName(String),
    /// A class-name segment did not match `[A-Za-z0-9_\\]+`.
    InvalidClassName(String),
    /// A special function (`exit`, `eval`, ...) was called with the wrong
    /// number of arguments.
    WrongArgCount { function: &'static str, got: usize },
    /// Attempted to construct, delete, or assign through a proxy shape that
    /// does not support the operation (e.g. deleting a class path).
    UnsupportedOperation(String),
    /// A class-rooted chain had no rooting class segment before the static
    /// variable marker.
    NoRootingClass,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::SpaceInName(name) => {
                write!(f, "name must not contain spaces: {name:?}")
            }
            ValidationError::InvalidClassName(name) => {
                write!(f, "invalid class name segment: {name:?}")
            }
            ValidationError::WrongArgCount { function, got } => {
                write!(f, "{function}() called with {got} arguments")
            }
            ValidationError::UnsupportedOperation(msg) => write!(f, "unsupported: {msg}"),
            ValidationError::NoRootingClass => {
                write!(f, "static variable access has no rooting class")
            }
        }
    }
}

/// The PHP process exited, or never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitError {
    /// `Some(0)` clean exit, `Some(n)` non-zero exit, `None` when the
    /// process died abnormally or the code could not be determined (FPM
    /// transport never trusts PHP's own exit code, see §6.4).
    pub code: Option<i32>,
    pub cause: String,
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(0) => write!(f, "interpreter exited cleanly: {}", self.cause),
            Some(code) => write!(f, "interpreter exited with code {code}: {}", self.cause),
            None => write!(f, "interpreter died: {}", self.cause),
        }
    }
}

/// Everything that can go wrong talking to the PHP side.
#[derive(Debug)]
pub enum Error {
    /// Caught locally, before any I/O (see [`ValidationError`]).
    Validation(ValidationError),
    /// PHP code threw during dispatch of our command.
    Remote {
        file: String,
        line: u32,
        message: String,
        trace: String,
    },
    /// The interpreter process is gone.
    Exit(ExitError),
    /// We raised while servicing a PHP→host callback; carries the message
    /// that was sent back to PHP as an `IS_ERROR` DATA reply.
    HostCallback(String),
    /// The wire framing was malformed.
    Framing(FramingError),
    /// Configuration could not be loaded.
    Config(ConfigError),
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// A `HostObject` method was invoked that the concrete type does not
    /// implement (the default trait-method body).
    Unsupported(&'static str),
    /// A reply frame's payload did not have the shape the caller expected
    /// (wrong JSON type, missing handle, malformed init ack, ...).
    InvalidResponse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "validation error: {e}"),
            Error::Remote { file, line, message, .. } => {
                write!(f, "PHP error in {file}:{line}: {message}")
            }
            Error::Exit(e) => write!(f, "{e}"),
            Error::HostCallback(msg) => write!(f, "host callback error: {msg}"),
            Error::Framing(e) => write!(f, "framing error: {e}"),
            Error::Config(e) => write!(f, "configuration error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Unsupported(op) => write!(f, "unsupported operation: {op}"),
            Error::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Framing(e) => Some(e),
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<ExitError> for Error {
    fn from(e: ExitError) -> Self {
        Error::Exit(e)
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Error::Framing(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_validation() {
        let err: Error = ValidationError::SpaceInName("foo bar".into()).into();
        assert!(err.to_string().contains("foo bar"));
    }

    #[test]
    fn display_exit() {
        let err: Error = ExitError { code: Some(0), cause: "normal".into() }.into();
        assert_eq!(err.to_string(), "interpreter exited cleanly: normal");

        let err: Error = ExitError { code: None, cause: "killed".into() }.into();
        assert_eq!(err.to_string(), "interpreter died: killed");
    }
}
