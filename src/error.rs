//! Error taxonomy shared by the binding, the flow controller and every transport.
//!
//! Each variant carries the [`Operation`] that produced it. Argument
//! validation failures (`InvalidArgument`) are returned synchronously from the
//! call itself; the device and state failures are delivered through the
//! operation's completion future.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A specialized `Result` type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

/// The operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    New,
    List,
    Open,
    Close,
    Update,
    Set,
    Write,
    Flush,
    Drain,
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::List => "list",
            Self::Open => "open",
            Self::Close => "close",
            Self::Update => "update",
            Self::Set => "set",
            Self::Write => "write",
            Self::Flush => "flush",
            Self::Drain => "drain",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Fieldless discriminant of [`BindingError`], convenient for matching and
/// assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PortNotFound,
    PortClosed,
    PortLocked,
    InvalidArgument,
    TransportDisconnected,
}

/// Errors surfaced by binding operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The referenced path has no backing device.
    #[error("{op}: port {path} does not exist")]
    PortNotFound { op: Operation, path: String },

    /// The binding has no open session.
    #[error("{op}: port is closed")]
    PortClosed { op: Operation },

    /// Another session holds the lock on this port.
    #[error("{op}: port {path} is locked and cannot be opened")]
    PortLocked { op: Operation, path: String },

    /// Malformed configuration or call; a programming error.
    #[error("{op}: invalid argument: {reason}")]
    InvalidArgument { op: Operation, reason: String },

    /// The device went away (or the OS reported an I/O failure) while open.
    #[error("{op}: transport disconnected: {reason}")]
    TransportDisconnected { op: Operation, reason: String },
}

impl BindingError {
    pub fn not_found(op: Operation, path: impl Into<String>) -> Self {
        Self::PortNotFound {
            op,
            path: path.into(),
        }
    }

    pub fn closed(op: Operation) -> Self {
        Self::PortClosed { op }
    }

    pub fn locked(op: Operation, path: impl Into<String>) -> Self {
        Self::PortLocked {
            op,
            path: path.into(),
        }
    }

    pub fn invalid(op: Operation, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            op,
            reason: reason.into(),
        }
    }

    pub fn disconnected(op: Operation, reason: impl Into<String>) -> Self {
        Self::TransportDisconnected {
            op,
            reason: reason.into(),
        }
    }

    /// The kind of failure, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PortNotFound { .. } => ErrorKind::PortNotFound,
            Self::PortClosed { .. } => ErrorKind::PortClosed,
            Self::PortLocked { .. } => ErrorKind::PortLocked,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::TransportDisconnected { .. } => ErrorKind::TransportDisconnected,
        }
    }

    /// The operation that produced this error.
    pub fn operation(&self) -> Operation {
        match self {
            Self::PortNotFound { op, .. }
            | Self::PortClosed { op }
            | Self::PortLocked { op, .. }
            | Self::InvalidArgument { op, .. }
            | Self::TransportDisconnected { op, .. } => *op,
        }
    }

    /// Re-attribute the error to another operation.
    ///
    /// Transports report failures against the call they were servicing; the
    /// binding uses this when a failure belongs to the caller's operation.
    pub fn with_operation(mut self, new_op: Operation) -> Self {
        match &mut self {
            Self::PortNotFound { op, .. }
            | Self::PortClosed { op }
            | Self::PortLocked { op, .. }
            | Self::InvalidArgument { op, .. }
            | Self::TransportDisconnected { op, .. } => *op = new_op,
        }
        self
    }
}
