//! Module containing the universal error type
use crate::types::{DataType, Variability};
use thiserror::Error;

/// Coarse classification of an [`Error`]
///
/// Lex and parse errors are fatal to compiling a shader; bind errors and
/// runtime faults are fatal to a single shading invocation only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Bind,
    Runtime,
    Io,
}

/// Universal error type for the shading-language toolchain
#[derive(Error, Debug)]
pub enum Error {
    /// A numeric literal was flagged as malformed by the lexer
    #[error("line {line}: malformed numeric literal `{text}`")]
    BadNumber { line: usize, text: String },

    /// Syntax or semantic error while compiling or assembling
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Several per-line errors collected while assembling
    #[error("{} errors while assembling:\n{}", .0.len(), format_list(.0))]
    Assembly(Vec<Error>),

    /// A global referenced by the shader is absent from the grid
    #[error("could not find the global `{0}`")]
    MissingGlobal(String),

    /// A bound symbol has the wrong data type
    #[error("`{name}` is {found} but expecting {expected}")]
    TypeMismatch {
        name: String,
        expected: DataType,
        found: DataType,
    },

    /// A bound symbol has the wrong variability
    #[error("`{name}` is {found} but expecting {expected}")]
    VariabilityMismatch {
        name: String,
        expected: Variability,
        found: Variability,
    },

    /// Call-time parameters may only override uniform parameters
    #[error("varying call-time override of `{0}` is not supported")]
    VaryingOverride(String),

    /// Grid storage has the wrong type or length for its symbol
    #[error("storage for `{0}` does not match its declaration")]
    BadStorage(String),

    /// A varying parameter has no grid value to bind to
    #[error("varying parameter `{0}` has no source")]
    MissingParameter(String),

    /// Fatal error while executing bytecode
    #[error("fault at line {line}: {message}")]
    Fault { line: usize, message: String },

    /// IO error; see inner code for details
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_list(errs: &[Error]) -> String {
    errs.iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Builds a [`Error::Parse`] at the given (1-based) line
    pub(crate) fn parse<S: Into<String>>(line: usize, message: S) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    /// Builds a [`Error::Fault`] at the given (1-based) line
    pub(crate) fn fault<S: Into<String>>(line: usize, message: S) -> Self {
        Error::Fault {
            line,
            message: message.into(),
        }
    }

    /// Returns the coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadNumber { .. } => ErrorKind::Lex,
            Error::Parse { .. } | Error::Assembly(..) => ErrorKind::Parse,
            Error::MissingGlobal(..)
            | Error::TypeMismatch { .. }
            | Error::VariabilityMismatch { .. }
            | Error::VaryingOverride(..)
            | Error::BadStorage(..)
            | Error::MissingParameter(..) => ErrorKind::Bind,
            Error::Fault { .. } => ErrorKind::Runtime,
            Error::Io(..) => ErrorKind::Io,
        }
    }

    /// Returns the source line recorded with this error, if any
    ///
    /// For accumulated assembly errors, this is the line of the first one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::BadNumber { line, .. }
            | Error::Parse { line, .. }
            | Error::Fault { line, .. } => Some(*line),
            Error::Assembly(errs) => errs.first().and_then(Error::line),
            _ => None,
        }
    }

    /// Shifts line numbers back by `n` lines
    ///
    /// The compiler lexes the builtins prelude and the user source as one
    /// text; this maps errors back onto the user's own line numbers.
    pub(crate) fn rebase_line(self, n: usize) -> Self {
        match self {
            Error::BadNumber { line, text } => Error::BadNumber {
                line: line.saturating_sub(n),
                text,
            },
            Error::Parse { line, message } => Error::Parse {
                line: line.saturating_sub(n),
                message,
            },
            e => e,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kind() {
        let e = Error::parse(3, "oops");
        assert_eq!(e.kind(), ErrorKind::Parse);
        assert_eq!(e.line(), Some(3));
        assert_eq!(e.to_string(), "line 3: oops");

        let e = Error::Assembly(vec![Error::parse(4, "a"), Error::parse(9, "b")]);
        assert_eq!(e.line(), Some(4));
        assert!(e.to_string().contains("line 9: b"));

        let e = Error::MissingGlobal("P".to_owned());
        assert_eq!(e.kind(), ErrorKind::Bind);
        assert_eq!(e.line(), None);

        let e = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(e, Error::Io(..)));
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_rebase() {
        let e = Error::parse(12, "x").rebase_line(10);
        assert_eq!(e.line(), Some(2));
    }
}
