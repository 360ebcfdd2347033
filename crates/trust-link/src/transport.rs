//! Connection transport seam.
//!
//! The hub never talks to sockets directly. It asks a [`Connector`] to open a
//! connection for a controller and receives everything that happens on that
//! connection as [`TransportEvent`]s on a channel it owns.

#![allow(missing_docs)]

pub mod ws;

use std::fmt;

use crossbeam_channel::Sender;
use smol_str::SmolStr;

use crate::error::LinkError;
use crate::registry::ControllerId;

pub use ws::{Endpoint, WsConnector};

/// Identity of one dispatched connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parameters for opening one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub attempt: AttemptId,
    pub controller: ControllerId,
    pub address: SmolStr,
}

/// Something that happened on a dispatched connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The connection reached its open state.
    Opened,
    /// One inbound text frame.
    Message(String),
    /// The connection closed; `None` when no close frame was received.
    Closed { code: Option<u16> },
    /// Transport-level failure (resolve, connect, handshake, I/O).
    Failed { reason: SmolStr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub attempt: AttemptId,
    pub controller: ControllerId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    #[must_use]
    pub fn new(request: &OpenRequest, kind: TransportEventKind) -> Self {
        Self {
            attempt: request.attempt,
            controller: request.controller.clone(),
            kind,
        }
    }
}

/// Normal (1000) and going-away (1001) closes are clean; everything else is not.
#[must_use]
pub fn is_clean_close(code: Option<u16>) -> bool {
    matches!(code, Some(1000 | 1001))
}

/// Handle to one live (or opening) connection.
pub trait Connection: Send + fmt::Debug {
    /// Queue one outbound text frame.
    fn send_text(&self, text: &str) -> Result<(), LinkError>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// Opens connections on behalf of the hub.
pub trait Connector: Send {
    /// Start opening a connection and return its handle immediately.
    ///
    /// Progress is reported on `events`. An `Err` means the attempt could not
    /// even be dispatched.
    fn open(
        &self,
        request: OpenRequest,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, LinkError>;
}
