//! Error types for the ErgoScript test runner
//!
//! All fallible operations return `Result<T, Error>`.
//! Errors never cross a single test boundary: the runner converts every
//! variant into a failed or errored test result (see `runner`).

use std::sync::Arc;

use thiserror::Error;

use crate::script::{CompileError, EvalError};

/// Test runner error types
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Structural violation in a test, context or fixture block
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Unreadable or unresolvable import, or a circular import
    #[error("Import error: {0}")]
    Import(String),

    /// The mock execution context could not be constructed
    #[error("Context error: {0}")]
    Context(String),

    /// The contract compiler rejected the source
    #[error("Compilation error: {0}")]
    Compile(#[from] CompileError),

    /// Contract evaluation raised an error
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// Filesystem access failed
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl Error {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source: Arc::new(err),
        }
    }

    /// Short category name used in failure messages
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "ParseError",
            Error::Import(_) => "ImportError",
            Error::Context(_) => "ContextError",
            Error::Compile(_) => "CompileError",
            Error::Evaluation(e) => e.kind(),
            Error::Io { .. } => "IoError",
        }
    }
}

/// Result type alias for test runner operations
pub type Result<T> = std::result::Result<T, Error>;
