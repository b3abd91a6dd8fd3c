//! Error taxonomy for the membership core

use rusqlite::ffi;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for membership operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable, machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Forbidden,
    Conflict,
    InvalidInvite,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInvite => "invalid_invite",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the membership core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed ids, empty names, out-of-range values
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A role label outside the six known roles
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Authorization guard rejection
    #[error("Permission denied: {user} cannot {action}")]
    Forbidden { user: String, action: String },

    /// The last owner tried to leave their group
    #[error("Cannot leave group {group}: you are its only owner, promote another member to owner first")]
    SoleOwner { group: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid invite: {0}")]
    InvalidInvite(String),

    /// Deadline elapsed or the caller cancelled; the transaction was rolled back
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        CoreError::NotFound { entity, id: id.to_string() }
    }

    pub fn forbidden(user: impl fmt::Display, action: impl Into<String>) -> Self {
        CoreError::Forbidden { user: user.to_string(), action: action.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) | CoreError::InvalidRole(_) => ErrorKind::InvalidInput,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Forbidden { .. } | CoreError::SoleOwner { .. } => ErrorKind::Forbidden,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidInvite(_) => ErrorKind::InvalidInvite,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::Storage(_) | CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                CoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => CoreError::Storage(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        CoreError::Storage(format!("Failed to get connection: {}", e))
    }
}
