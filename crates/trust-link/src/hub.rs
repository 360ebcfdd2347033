//! Connection hub: per-controller connect state machine, subscriptions and
//! telemetry ingestion behind one owned store.
//!
//! All state changes happen synchronously inside `&mut self` methods. The
//! only asynchronous inputs are transport events (delivered over a channel
//! the hub owns) and connect timers (checked against the injected clock),
//! both processed by [`ControllerHub::process_pending`] or
//! [`ControllerHub::pump`].
//!
//! A controller is in the connecting set exactly while its state is
//! `Connecting`. `connect` marks that state before the attempt is handed to
//! the connector, so a repeated `connect` for the same id observes it and
//! returns without dispatching a second attempt.

#![allow(missing_docs)]

pub mod shared;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::LinkError;
use crate::notify::{self, Notification, Notifier};
use crate::program::CompileOutput;
use crate::registry::{
    ConnectionState, Controller, ControllerId, ControllerRegistry, RegistryChange,
};
use crate::status::StatusView;
use crate::subscription::SubscriptionSet;
use crate::telemetry::{HistoryRing, IngestReport, TelemetryStore, VariableMap};
use crate::transport::{
    is_clean_close, AttemptId, Connector, OpenRequest, TransportEvent, TransportEventKind,
};

pub use shared::{PumpHandle, SharedHub};

/// Default connect window.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub connect_timeout: Duration,
    pub history_limit: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            history_limit: crate::telemetry::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Result of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new attempt was handed to the connector.
    Dispatched(AttemptId),
    AlreadyConnected,
    AlreadyConnecting,
    UnknownController,
    /// The connector refused to start the attempt.
    Failed,
}

/// Result of a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// An open connection was closed.
    Closed,
    /// An in-flight attempt was abandoned.
    Cancelled,
    NotConnected,
    UnknownController,
}

/// Result of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Sent { connections: usize, failed: usize },
    NoActiveConnection,
    /// The program did not compile; nothing was recorded.
    Skipped,
}

#[derive(Debug, Clone)]
struct PendingAttempt {
    controller: ControllerId,
    deadline: Duration,
}

/// Owner of every controller connection.
pub struct ControllerHub {
    registry: ControllerRegistry,
    telemetry: TelemetryStore,
    subscriptions: SubscriptionSet,
    timers: BTreeMap<AttemptId, PendingAttempt>,
    next_attempt: u64,
    connector: Box<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: HubSettings,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
}

impl std::fmt::Debug for ControllerHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHub")
            .field("registry", &self.registry)
            .field("subscriptions", &self.subscriptions)
            .field("timers", &self.timers.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ControllerHub {
    pub fn new(
        connector: impl Connector + 'static,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: HubSettings,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            registry: ControllerRegistry::new(),
            telemetry: TelemetryStore::new(settings.history_limit),
            subscriptions: SubscriptionSet::new(),
            timers: BTreeMap::new(),
            next_attempt: 1,
            connector: Box::new(connector),
            notifier,
            clock,
            settings,
            events_tx,
            events_rx,
        }
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a controller or update its name/address in place.
    pub fn add_controller(
        &mut self,
        id: impl Into<ControllerId>,
        name: impl Into<SmolStr>,
        address: impl Into<SmolStr>,
    ) -> RegistryChange {
        let id = id.into();
        let change = self.registry.add(id.clone(), name, address);
        match change {
            RegistryChange::Inserted => info!(controller = %id, "controller registered"),
            RegistryChange::Updated => debug!(controller = %id, "controller updated"),
            RegistryChange::Unchanged => {}
        }
        change
    }

    /// Remove a controller, closing its connection and dropping its variables.
    pub fn remove_controller(&mut self, id: &str) -> bool {
        let Some(mut controller) = self.registry.remove(id) else {
            self.reject_unknown(id);
            return false;
        };
        if let Some(attempt) = controller.attempt {
            self.timers.remove(&attempt);
        }
        if let Some(connection) = controller.take_connection() {
            connection.close();
        }
        let cleared = self.telemetry.clear_controller(controller.id());
        self.notifier.dismiss(&notify::controller_key(controller.id()));
        info!(controller = %controller.id(), cleared, "controller removed");
        true
    }

    /// Whether `id` is connected; false for unknown ids.
    #[must_use]
    pub fn get_status(&self, id: &str) -> bool {
        self.registry.status(id)
    }

    #[must_use]
    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.registry.state(id)
    }

    #[must_use]
    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.registry.iter()
    }

    /// True when any controller is connected, recomputed on every call.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.registry.any_connected()
    }

    /// Ids with an outstanding connect attempt, in registration order.
    #[must_use]
    pub fn connecting_controllers(&self) -> Vec<ControllerId> {
        self.registry.ids_in_state(ConnectionState::Connecting)
    }

    #[must_use]
    pub fn status_view(&self) -> StatusView {
        StatusView::from_registry(&self.registry)
    }

    #[must_use]
    pub fn variables(&self) -> &VariableMap {
        self.telemetry.variables()
    }

    #[must_use]
    pub fn history(&self) -> &HistoryRing {
        self.telemetry.history()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    #[must_use]
    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Number of armed connect timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Sender side of the transport event channel.
    #[must_use]
    pub fn event_sender(&self) -> Sender<TransportEvent> {
        self.events_tx.clone()
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    /// Start connecting `id` unless it is already connected or connecting.
    pub fn connect(&mut self, id: &str) -> ConnectOutcome {
        let Some(controller) = self.registry.get_mut(id) else {
            self.reject_unknown(id);
            return ConnectOutcome::UnknownController;
        };
        match controller.state() {
            ConnectionState::Connected => {
                debug!(controller = %id, "connect ignored: already connected");
                return ConnectOutcome::AlreadyConnected;
            }
            ConnectionState::Connecting => {
                debug!(controller = %id, "connect ignored: attempt in flight");
                return ConnectOutcome::AlreadyConnecting;
            }
            ConnectionState::Disconnected => {}
        }
        let now_ms = self.clock.unix_millis();
        controller.set_state(ConnectionState::Connecting, now_ms);
        self.dispatch(id)
    }

    /// Connect every disconnected controller.
    ///
    /// All targets are marked connecting before the first attempt is
    /// dispatched.
    pub fn connect_all(&mut self) -> Vec<(ControllerId, ConnectOutcome)> {
        let targets = self.registry.ids_in_state(ConnectionState::Disconnected);
        let now_ms = self.clock.unix_millis();
        for id in &targets {
            if let Some(controller) = self.registry.get_mut(id.as_str()) {
                controller.set_state(ConnectionState::Connecting, now_ms);
            }
        }
        debug!(count = targets.len(), "connecting all disconnected controllers");
        targets
            .into_iter()
            .map(|id| {
                let outcome = self.dispatch(id.as_str());
                (id, outcome)
            })
            .collect()
    }

    /// `connect(id)` for `Some`, `connect_all()` for `None`.
    pub fn connect_target(&mut self, id: Option<&str>) -> Vec<(ControllerId, ConnectOutcome)> {
        match id {
            Some(id) => vec![(ControllerId::new(id), self.connect(id))],
            None => self.connect_all(),
        }
    }

    fn dispatch(&mut self, id: &str) -> ConnectOutcome {
        let attempt = AttemptId::new(self.next_attempt);
        self.next_attempt = self.next_attempt.wrapping_add(1);
        let Some(controller) = self.registry.get_mut(id) else {
            return ConnectOutcome::UnknownController;
        };
        controller.attempt = Some(attempt);
        let request = OpenRequest {
            attempt,
            controller: controller.id().clone(),
            address: SmolStr::new(controller.address()),
        };
        info!(
            controller = %request.controller,
            address = %request.address,
            %attempt,
            "connecting"
        );
        match self.connector.open(request, self.events_tx.clone()) {
            Ok(connection) => {
                controller.connection = Some(connection);
                let deadline = self.clock.now().saturating_add(self.settings.connect_timeout);
                self.timers.insert(
                    attempt,
                    PendingAttempt {
                        controller: controller.id().clone(),
                        deadline,
                    },
                );
                ConnectOutcome::Dispatched(attempt)
            }
            Err(err) => {
                controller.take_connection();
                controller.set_state(ConnectionState::Disconnected, self.clock.unix_millis());
                let error = match err {
                    LinkError::ConnectError { .. } => err,
                    other => LinkError::ConnectError {
                        controller: controller.id().as_smol_str().clone(),
                        reason: other.to_string().into(),
                    },
                };
                warn!(controller = %id, %error, "connect dispatch failed");
                let notification = failure_notification(controller, &error);
                self.notifier.notify(notification);
                ConnectOutcome::Failed
            }
        }
    }

    /// Close `id` if it is connected or connecting.
    pub fn disconnect(&mut self, id: &str) -> DisconnectOutcome {
        let Some(controller) = self.registry.get_mut(id) else {
            self.reject_unknown(id);
            return DisconnectOutcome::UnknownController;
        };
        let outcome = match controller.state() {
            ConnectionState::Disconnected => {
                debug!(controller = %id, "disconnect ignored: not connected");
                return DisconnectOutcome::NotConnected;
            }
            ConnectionState::Connected => DisconnectOutcome::Closed,
            ConnectionState::Connecting => DisconnectOutcome::Cancelled,
        };
        if let Some(attempt) = controller.attempt {
            self.timers.remove(&attempt);
        }
        if let Some(connection) = controller.take_connection() {
            connection.close();
        }
        controller.set_state(ConnectionState::Disconnected, self.clock.unix_millis());
        info!(controller = %id, ?outcome, "disconnected");
        self.notifier.notify(Notification::info(
            notify::controller_key(controller.id()),
            "Disconnected",
            format!("Disconnected from {}.", controller.name()),
        ));
        outcome
    }

    /// Disconnect every connected or connecting controller.
    pub fn disconnect_all(&mut self) -> Vec<(ControllerId, DisconnectOutcome)> {
        let targets = self
            .registry
            .iter()
            .filter(|controller| controller.state() != ConnectionState::Disconnected)
            .map(|controller| controller.id().clone())
            .collect::<Vec<_>>();
        targets
            .into_iter()
            .map(|id| {
                let outcome = self.disconnect(id.as_str());
                (id, outcome)
            })
            .collect()
    }

    /// `disconnect(id)` for `Some`, `disconnect_all()` for `None`.
    pub fn disconnect_target(
        &mut self,
        id: Option<&str>,
    ) -> Vec<(ControllerId, DisconnectOutcome)> {
        match id {
            Some(id) => vec![(ControllerId::new(id), self.disconnect(id))],
            None => self.disconnect_all(),
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Replace the watched variables and push the full set to every open
    /// connection.
    pub fn subscribe_to_variables<I, S>(
        &mut self,
        names: I,
        namespace: impl Into<SmolStr>,
    ) -> SubscribeOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.subscriptions.replace(names, namespace);
        debug!(
            namespace = self.subscriptions.namespace(),
            count = self.subscriptions.len(),
            "subscription replaced"
        );
        if !self.registry.any_connected() {
            info!("subscription recorded; no controller connected");
            self.notifier.notify(Notification::info(
                notify::SUBSCRIPTION_KEY,
                "Not connected",
                "Connect to a controller to start watching variables.",
            ));
            return SubscribeOutcome::NoActiveConnection;
        }
        let Some(text) = self.subscription_text() else {
            return SubscribeOutcome::Sent {
                connections: 0,
                failed: 0,
            };
        };
        let mut connections = 0;
        let mut failed = 0;
        for controller in self.registry.iter() {
            if !controller.is_connected() {
                continue;
            }
            let Some(connection) = controller.connection.as_ref() else {
                continue;
            };
            match connection.send_text(&text) {
                Ok(()) => connections += 1,
                Err(err) => {
                    failed += 1;
                    warn!(controller = %controller.id(), %err, "subscribe send failed");
                }
            }
        }
        SubscribeOutcome::Sent {
            connections,
            failed,
        }
    }

    /// Subscribe to the variables a compiled program declares.
    pub fn subscribe_program(&mut self, output: &CompileOutput) -> SubscribeOutcome {
        let Some(ast) = output.ast.as_ref().filter(|_| output.success) else {
            warn!(
                diagnostics = output.diagnostics.len(),
                "program did not compile; subscription skipped"
            );
            self.notifier.notify(Notification::warning(
                notify::SUBSCRIPTION_KEY,
                "Program has errors",
                "Fix the reported diagnostics before watching variables.",
            ));
            return SubscribeOutcome::Skipped;
        };
        let names = ast.watch_list();
        let namespace = SmolStr::new(ast.namespace());
        self.subscribe_to_variables(names, namespace)
    }

    fn subscription_text(&self) -> Option<String> {
        let message = self.subscriptions.message()?;
        match message.encode() {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(%err, "subscription encode failed");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Event processing
    // ------------------------------------------------------------------

    /// Apply one transport event.
    ///
    /// Events from an attempt that is no longer the controller's current one
    /// are dropped. Close and failure events for the current attempt always
    /// end in `Disconnected`, whatever state the controller was in.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let TransportEvent {
            attempt,
            controller: id,
            kind,
        } = event;
        let now_ms = self.clock.unix_millis();
        let Some(controller) = self.registry.get_mut(id.as_str()) else {
            debug!(controller = %id, %attempt, "event for removed controller dropped");
            return;
        };
        if controller.attempt != Some(attempt) {
            debug!(controller = %id, %attempt, "stale transport event dropped");
            return;
        }
        match kind {
            TransportEventKind::Opened => {
                self.timers.remove(&attempt);
                controller.set_state(ConnectionState::Connected, now_ms);
                info!(controller = %id, %attempt, "connected");
                self.notifier.notify(Notification::success(
                    notify::controller_key(&id),
                    "Connected",
                    format!("Connected to {} at {}.", controller.name(), controller.address()),
                ));
                self.resend_subscription(&id);
            }
            TransportEventKind::Message(text) => self.ingest(&id, &text, now_ms),
            TransportEventKind::Closed { code } => {
                self.timers.remove(&attempt);
                let was = controller.state();
                controller.take_connection();
                controller.set_state(ConnectionState::Disconnected, now_ms);
                let notification = if was == ConnectionState::Connecting {
                    let error = LinkError::ConnectError {
                        controller: id.as_smol_str().clone(),
                        reason: "closed before the connection opened".into(),
                    };
                    warn!(controller = %id, %error, "connect failed");
                    failure_notification(controller, &error)
                } else if is_clean_close(code) {
                    info!(controller = %id, ?code, "connection closed");
                    Notification::info(
                        notify::controller_key(&id),
                        "Disconnected",
                        format!("{} closed the connection.", controller.name()),
                    )
                } else {
                    let error = LinkError::AbnormalClose {
                        controller: id.as_smol_str().clone(),
                        code,
                    };
                    warn!(controller = %id, %error, "connection lost");
                    failure_notification(controller, &error)
                };
                self.notifier.notify(notification);
            }
            TransportEventKind::Failed { reason } => {
                self.timers.remove(&attempt);
                if let Some(connection) = controller.take_connection() {
                    connection.close();
                }
                controller.set_state(ConnectionState::Disconnected, now_ms);
                let error = LinkError::ConnectError {
                    controller: id.as_smol_str().clone(),
                    reason,
                };
                warn!(controller = %id, %error, "connection failed");
                let notification = failure_notification(controller, &error);
                self.notifier.notify(notification);
            }
        }
    }

    fn resend_subscription(&mut self, id: &ControllerId) {
        if !self.subscriptions.is_declared() {
            return;
        }
        let Some(text) = self.subscription_text() else {
            return;
        };
        let Some(connection) = self
            .registry
            .get(id.as_str())
            .and_then(|controller| controller.connection.as_ref())
        else {
            return;
        };
        match connection.send_text(&text) {
            Ok(()) => debug!(controller = %id, "subscription restored"),
            Err(err) => warn!(controller = %id, %err, "subscription restore failed"),
        }
    }

    fn ingest(&mut self, id: &ControllerId, text: &str, now_ms: u64) {
        match self.telemetry.ingest(id, text, now_ms) {
            Ok(IngestReport::Update {
                status,
                paths,
                numeric_fields,
            }) => {
                debug!(controller = %id, paths, numeric_fields, "update ingested");
                if let Some(status) = status {
                    if let Some(controller) = self.registry.get_mut(id.as_str()) {
                        controller.set_runtime_status(status);
                    }
                }
            }
            Ok(IngestReport::Deployment { path }) => {
                info!(controller = %id, %path, "program deployed");
            }
            Ok(IngestReport::Ignored) => {
                debug!(controller = %id, "unrecognised message ignored");
            }
            Err(err) => {
                warn!(controller = %id, %err, "inbound message dropped");
                let name = self
                    .registry
                    .get(id.as_str())
                    .map_or_else(|| id.to_string(), |controller| controller.name().to_string());
                self.notifier.notify(Notification::warning(
                    notify::message_key(id),
                    "Invalid message",
                    format!("{name} sent a message that could not be decoded."),
                ));
            }
        }
    }

    /// Fail every attempt whose connect window has elapsed.
    pub fn fire_timeouts(&mut self) -> usize {
        let now = self.clock.now();
        let expired = self
            .timers
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(attempt, _)| *attempt)
            .collect::<Vec<_>>();
        let mut fired = 0;
        for attempt in expired {
            let Some(pending) = self.timers.remove(&attempt) else {
                continue;
            };
            let Some(controller) = self.registry.get_mut(pending.controller.as_str()) else {
                continue;
            };
            if controller.attempt != Some(attempt)
                || controller.state() != ConnectionState::Connecting
            {
                debug!(controller = %pending.controller, %attempt, "stale timer ignored");
                continue;
            }
            if let Some(connection) = controller.take_connection() {
                connection.close();
            }
            controller.set_state(ConnectionState::Disconnected, self.clock.unix_millis());
            let error = LinkError::ConnectTimeout {
                controller: pending.controller.as_smol_str().clone(),
                timeout_ms: u64::try_from(self.settings.connect_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            };
            warn!(controller = %pending.controller, %attempt, %error, "connect timed out");
            let notification = failure_notification(controller, &error);
            self.notifier.notify(notification);
            fired += 1;
        }
        fired
    }

    /// Process every queued transport event and expired timer without
    /// blocking. Returns the number of events handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        self.fire_timeouts();
        handled
    }

    /// Wait up to `max_wait` for the next event or timer deadline, then
    /// process everything pending.
    pub fn pump(&mut self, max_wait: Duration) -> usize {
        let wait = self
            .next_deadline()
            .map_or(max_wait, |deadline| {
                deadline.saturating_sub(self.clock.now()).min(max_wait)
            });
        let mut handled = 0;
        match self.events_rx.recv_timeout(wait) {
            Ok(event) => {
                self.handle_event(event);
                handled += 1;
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
        handled + self.process_pending()
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.timers.values().map(|pending| pending.deadline).min()
    }

    fn reject_unknown(&self, id: &str) {
        let error = LinkError::UnknownController(id.into());
        warn!(%error, "request rejected");
        self.notifier.notify(Notification::error(
            notify::unknown_key(id),
            "Unknown controller",
            format!("No controller with id '{id}' is registered."),
        ));
    }
}

/// Persistent, replace-in-place notification for a connection failure.
fn failure_notification(controller: &Controller, error: &LinkError) -> Notification {
    let name = controller.name();
    let address = controller.address();
    let key = notify::controller_key(controller.id());
    let (title, message) = match error {
        LinkError::ConnectTimeout { timeout_ms, .. } => (
            "Connection timed out",
            format!(
                "Could not reach {name} at {address} within {timeout_ms}ms. \
                 Check that the controller is powered on and reachable on the network."
            ),
        ),
        LinkError::AbnormalClose { code, .. } => (
            "Connection lost",
            format!(
                "{name} at {address} closed the connection unexpectedly{}. \
                 Check the controller's power and network link.",
                code.map(|code| format!(" (code {code})")).unwrap_or_default()
            ),
        ),
        LinkError::ConnectError { reason, .. } => (
            "Connection failed",
            format!(
                "Could not connect to {name} at {address}: {reason}. \
                 Check the address and that the runtime is online."
            ),
        ),
        other => ("Connection error", format!("{name} at {address}: {other}")),
    };
    Notification::error(key, title, message).persistent()
}
