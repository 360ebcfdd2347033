//! Link errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised by the connection, subscription and telemetry layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The connection did not open within the connect window.
    #[error("connection to '{controller}' timed out after {timeout_ms}ms")]
    ConnectTimeout { controller: SmolStr, timeout_ms: u64 },

    /// Transport-level failure while opening or running a connection.
    #[error("connection to '{controller}' failed: {reason}")]
    ConnectError { controller: SmolStr, reason: SmolStr },

    /// The remote end closed with a non-clean close code.
    #[error("connection to '{controller}' closed abnormally (code {code:?})")]
    AbnormalClose {
        controller: SmolStr,
        code: Option<u16>,
    },

    /// Inbound payload could not be decoded.
    #[error("malformed message from '{controller}': {reason}")]
    MalformedMessage { controller: SmolStr, reason: SmolStr },

    /// Subscription attempted while no controller is connected.
    #[error("no active controller connection")]
    NoActiveConnection,

    /// Operation referenced an unregistered controller id.
    #[error("unknown controller '{0}'")]
    UnknownController(SmolStr),

    /// Controller address cannot be turned into an endpoint.
    #[error("invalid controller address '{0}'")]
    InvalidAddress(SmolStr),

    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Outbound protocol failure (send on a closed connection, encode failure).
    #[error("protocol error '{0}'")]
    Protocol(SmolStr),

    /// Local I/O failure (thread spawn, file access).
    #[error("i/o error '{0}'")]
    Io(SmolStr),
}

impl LinkError {
    /// Controller id the error refers to, when there is one.
    #[must_use]
    pub fn controller(&self) -> Option<&str> {
        match self {
            Self::ConnectTimeout { controller, .. }
            | Self::ConnectError { controller, .. }
            | Self::AbnormalClose { controller, .. }
            | Self::MalformedMessage { controller, .. } => Some(controller.as_str()),
            Self::UnknownController(id) => Some(id.as_str()),
            _ => None,
        }
    }
}
