//! `trust-link` - multi-controller connection and telemetry manager for
//! Structured Text runtimes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Clocks for timers and timestamps.
pub mod clock;
/// `trust-link.toml` configuration.
pub mod config;
/// Error types.
pub mod error;
/// Connection hub and shared handle.
pub mod hub;
/// Notification sink and keys.
pub mod notify;
/// Structured Text program validation.
pub mod program;
/// Wire messages.
pub mod protocol;
/// Controller registry and connection state.
pub mod registry;
/// Aggregate status view.
pub mod status;
/// Subscription set.
pub mod subscription;
/// Variable map and history ring.
pub mod telemetry;
/// Transport traits and the WebSocket connector.
pub mod transport;

pub use clock::{Clock, ManualClock, StdClock};
pub use config::{ControllerConfig, LinkConfig};
pub use error::LinkError;
pub use hub::{
    ConnectOutcome, ControllerHub, DisconnectOutcome, HubSettings, PumpHandle, SharedHub,
    SubscribeOutcome,
};
pub use notify::{Notification, NotificationCenter, NotificationLevel, Notifier, TracingNotifier};
pub use registry::{ConnectionState, Controller, ControllerId, ControllerRegistry};
pub use status::{ControllerView, StatusView};
pub use transport::{Connection, Connector, WsConnector};
