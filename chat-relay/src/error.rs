use std::fmt;

use thiserror::Error;

use crate::registry::StreamHandle;

/// Lookup and binding failures surfaced by the [`Registry`](crate::registry::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("identity '{0}' is not registered")]
    NotFound(String),
    #[error("no registered session is waiting for a datagram binding")]
    NoUnboundSession,
}

/// Refused registration. Both variants hand the stream handle back to the
/// caller so it can still write a rejection line before closing.
#[derive(Error)]
pub enum RegisterError {
    #[error("identity '{identity}' is already registered")]
    Duplicate {
        identity: String,
        handle: StreamHandle,
    },
    #[error("relay is shutting down")]
    ShuttingDown { handle: StreamHandle },
}

impl RegisterError {
    pub fn into_handle(self) -> StreamHandle {
        match self {
            RegisterError::Duplicate { handle, .. } | RegisterError::ShuttingDown { handle } => {
                handle
            }
        }
    }
}

impl fmt::Debug for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::Duplicate { identity, .. } => f
                .debug_struct("Duplicate")
                .field("identity", identity)
                .finish_non_exhaustive(),
            RegisterError::ShuttingDown { .. } => {
                f.debug_struct("ShuttingDown").finish_non_exhaustive()
            }
        }
    }
}

/// A configuration line that was skipped; defaults stay in effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigParseError {
    #[error("line {line}: expected exactly one '=' separator")]
    Malformed { line: usize },
    #[error("line {line}: invalid value '{value}' for {key}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}
