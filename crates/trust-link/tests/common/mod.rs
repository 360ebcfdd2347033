#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use trust_link::transport::{OpenRequest, TransportEvent, TransportEventKind};
use trust_link::{
    Connection, Connector, ControllerHub, HubSettings, LinkError, ManualClock,
    NotificationCenter,
};

/// Connection handed out by [`ScriptedConnector`]; records sent frames.
#[derive(Debug, Clone, Default)]
pub struct FakeLink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl FakeLink {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for FakeLink {
    fn send_text(&self, text: &str) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Io("connection closed".into()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub request: OpenRequest,
    pub events: Sender<TransportEvent>,
    pub link: FakeLink,
}

#[derive(Debug, Default)]
struct ScriptState {
    opens: Vec<OpenRecord>,
    refuse: Option<String>,
}

/// In-memory connector: records every open request and lets tests drive
/// the transport events of each attempt.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl Connector for ScriptedConnector {
    fn open(
        &self,
        request: OpenRequest,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, LinkError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.refuse.take() {
            return Err(LinkError::InvalidAddress(reason.into()));
        }
        let link = FakeLink::default();
        state.opens.push(OpenRecord {
            request,
            events,
            link: link.clone(),
        });
        Ok(Box::new(link))
    }
}

impl ScriptedConnector {
    /// Refuse the next open request with `reason`.
    pub fn refuse_next(&self, reason: &str) {
        self.state.lock().refuse = Some(reason.to_string());
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn opens_for(&self, id: &str) -> usize {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|record| record.request.controller.as_str() == id)
            .count()
    }

    pub fn opened_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .opens
            .iter()
            .map(|record| record.request.controller.to_string())
            .collect()
    }

    /// Most recent attempt for `id`.
    pub fn latest(&self, id: &str) -> OpenRecord {
        self.state
            .lock()
            .opens
            .iter()
            .rev()
            .find(|record| record.request.controller.as_str() == id)
            .cloned()
            .expect("no open request recorded for controller")
    }

    pub fn emit(&self, record: &OpenRecord, kind: TransportEventKind) {
        record
            .events
            .send(TransportEvent::new(&record.request, kind))
            .expect("hub event channel closed");
    }

    pub fn open(&self, id: &str) {
        self.emit(&self.latest(id), TransportEventKind::Opened);
    }

    pub fn message(&self, id: &str, text: &str) {
        self.emit(&self.latest(id), TransportEventKind::Message(text.to_string()));
    }

    pub fn close(&self, id: &str, code: Option<u16>) {
        self.emit(&self.latest(id), TransportEventKind::Closed { code });
    }

    pub fn fail(&self, id: &str, reason: &str) {
        self.emit(
            &self.latest(id),
            TransportEventKind::Failed {
                reason: reason.into(),
            },
        );
    }

    pub fn sent(&self, id: &str) -> Vec<String> {
        self.latest(id).link.sent()
    }
}

pub struct Harness {
    pub hub: ControllerHub,
    pub connector: ScriptedConnector,
    pub notices: NotificationCenter,
    pub clock: ManualClock,
}

impl Harness {
    /// Connect `id` and deliver its open event.
    pub fn connect_and_open(&mut self, id: &str) {
        self.hub.connect(id);
        self.connector.open(id);
        self.hub.process_pending();
    }

    pub fn advance(&mut self, delta: Duration) {
        self.clock.advance(delta);
        self.hub.process_pending();
    }
}

pub fn harness(controllers: &[(&str, &str)]) -> Harness {
    let connector = ScriptedConnector::default();
    let notices = NotificationCenter::new();
    let clock = ManualClock::with_epoch(1_700_000_000_000);
    let mut hub = ControllerHub::new(
        connector.clone(),
        Arc::new(notices.clone()),
        Arc::new(clock.clone()),
        HubSettings::default(),
    );
    for (id, address) in controllers {
        hub.add_controller(*id, format!("Controller {id}"), *address);
    }
    Harness {
        hub,
        connector,
        notices,
        clock,
    }
}

pub fn update_json(path: &str, samples: serde_json::Value) -> String {
    serde_json::json!({
        "type": "update",
        "variables": { path: samples }
    })
    .to_string()
}
