//! Error types for the node lifecycle manager

use crate::models::{NodeStatus, Operation};
use crate::runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} node {node}: node is {current}{}", detail_suffix(.detail))]
    InvalidTransition {
        node: i64,
        current: NodeStatus,
        operation: Operation,
        detail: Option<String>,
    },

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({})", d),
        None => String::new(),
    }
}

/// Stable error classification for callers that map failures to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    Runtime,
    Store,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::Store(_) => ErrorKind::Store,
            Error::Config(_) | Error::Io(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn node_not_found(id: i64) -> Self {
        Error::NotFound(format!("node {}", id))
    }

    pub(crate) fn host_not_found(id: i64) -> Self {
        Error::NotFound(format!("host {}", id))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        // Uniqueness is a caller conflict; any other constraint is a store bug
        if let rusqlite::Error::SqliteFailure(ref err, ref msg) = e {
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                return Error::Validation(
                    msg.clone().unwrap_or_else(|| "uniqueness violation".to_string()),
                );
            }
        }
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("JSON: {}", e))
    }
}
