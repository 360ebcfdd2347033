//! WebSocket transport (one worker thread per connection).

#![allow(missing_docs)]

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use smol_str::SmolStr;
use tracing::{debug, warn};
use tungstenite::{Message, WebSocket};

use crate::error::LinkError;

use super::{Connection, Connector, OpenRequest, TransportEvent, TransportEventKind};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Resolved controller endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Normalise a controller address.
    ///
    /// Accepts a bare host or IP (default port applied), `host:port`,
    /// `[v6]:port`, a bare IPv6 address, or a `ws://` URL.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, LinkError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(LinkError::InvalidAddress(address.into()));
        }
        // Plain ws:// only; wss:// and other schemes are rejected.
        if trimmed.contains("://") && !trimmed.starts_with("ws://") {
            return Err(LinkError::InvalidAddress(address.into()));
        }
        let rest = trimmed.strip_prefix("ws://").unwrap_or(trimmed);
        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };
        let (host, port) = split_authority(authority, default_port)
            .ok_or_else(|| LinkError::InvalidAddress(address.into()))?;
        if host.is_empty() {
            return Err(LinkError::InvalidAddress(address.into()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    #[must_use]
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("ws://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            format!("ws://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

fn split_authority(authority: &str, default_port: u16) -> Option<(&str, u16)> {
    if let Some(inner) = authority.strip_prefix('[') {
        let (host, tail) = inner.split_once(']')?;
        return match tail.strip_prefix(':') {
            Some(port) => Some((host, port.parse().ok()?)),
            None if tail.is_empty() => Some((host, default_port)),
            None => None,
        };
    }
    match authority.matches(':').count() {
        0 => Some((authority, default_port)),
        1 => {
            let (host, port) = authority.split_once(':')?;
            Some((host, port.parse().ok()?))
        }
        // Bare IPv6 literal.
        _ => Some((authority, default_port)),
    }
}

/// Opens `ws://` connections with blocking tungstenite sockets.
#[derive(Debug, Clone)]
pub struct WsConnector {
    default_port: u16,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(default_port: u16, connect_timeout: Duration) -> Self {
        Self {
            default_port,
            connect_timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Read poll interval of the worker loop.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }
}

#[derive(Debug)]
enum Command {
    Text(String),
    Close,
}

#[derive(Debug)]
struct WsConnection {
    commands: Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl Connection for WsConnection {
    fn send_text(&self, text: &str) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Protocol("connection closed".into()));
        }
        self.commands
            .send(Command::Text(text.to_string()))
            .map_err(|_| LinkError::Protocol("connection worker stopped".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close);
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        request: OpenRequest,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, LinkError> {
        let endpoint = Endpoint::parse(&request.address, self.default_port)?;
        let (commands, inbox) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            endpoint,
            request: request.clone(),
            events,
            inbox,
            closed: closed.clone(),
            connect_timeout: self.connect_timeout,
            poll_interval: self.poll_interval,
        };
        thread::Builder::new()
            .name(format!("trust-link-{}", request.controller))
            .spawn(move || worker.run())
            .map_err(|err| LinkError::Io(format!("spawn connection worker: {err}").into()))?;
        Ok(Box::new(WsConnection { commands, closed }))
    }
}

struct Worker {
    endpoint: Endpoint,
    request: OpenRequest,
    events: Sender<TransportEvent>,
    inbox: Receiver<Command>,
    closed: Arc<AtomicBool>,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl Worker {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent::new(&self.request, kind));
    }

    fn run(self) {
        let mut socket = match self.open_socket() {
            Ok(socket) => socket,
            Err(reason) => {
                debug!(controller = %self.request.controller, %reason, "connect failed");
                self.emit(TransportEventKind::Failed { reason });
                return;
            }
        };
        if self.closed.load(Ordering::Acquire) {
            let _ = socket.close(None);
            let _ = socket.flush();
            return;
        }
        if let Err(err) = socket
            .get_mut()
            .set_read_timeout(Some(self.poll_interval))
        {
            self.emit(TransportEventKind::Failed {
                reason: format!("set read timeout: {err}").into(),
            });
            return;
        }
        self.emit(TransportEventKind::Opened);
        let code = self.pump(&mut socket);
        self.emit(TransportEventKind::Closed { code });
    }

    fn open_socket(&self) -> Result<WebSocket<TcpStream>, SmolStr> {
        let addrs = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|err| SmolStr::from(format!("resolve {}: {err}", self.endpoint.host)))?;
        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(err) => last_error = Some(format!("connect {addr}: {err}")),
            }
        }
        let stream = stream.ok_or_else(|| {
            SmolStr::from(last_error.unwrap_or_else(|| "no addresses resolved".to_string()))
        })?;
        let _ = stream.set_nodelay(true);
        stream
            .set_read_timeout(Some(self.connect_timeout))
            .map_err(|err| SmolStr::from(format!("set read timeout: {err}")))?;
        let (socket, _response) = tungstenite::client(self.endpoint.url(), stream)
            .map_err(|err| SmolStr::from(format!("handshake: {err}")))?;
        Ok(socket)
    }

    /// Runs until the socket closes; returns the peer's close code.
    fn pump(&self, socket: &mut WebSocket<TcpStream>) -> Option<u16> {
        let mut close_code = None;
        let mut closing_since: Option<Instant> = None;
        loop {
            if closing_since.is_none() {
                match self.drain_commands(socket) {
                    Ok(true) => closing_since = Some(Instant::now()),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(controller = %self.request.controller, %err, "send failed");
                        return close_code;
                    }
                }
            }
            match socket.read() {
                Ok(Message::Text(text)) => {
                    if closing_since.is_none() {
                        self.emit(TransportEventKind::Message(text.as_str().to_string()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    close_code = Some(frame.map_or(1005, |frame| u16::from(frame.code)));
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    if closing_since.is_some_and(|since| since.elapsed() >= CLOSE_GRACE) {
                        return Some(1000);
                    }
                    let _ = socket.flush();
                }
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return close_code.or(closing_since.map(|_| 1000));
                }
                Err(err) => {
                    debug!(controller = %self.request.controller, %err, "socket error");
                    return close_code.or(closing_since.map(|_| 1000));
                }
            }
        }
    }

    /// Sends queued frames; `Ok(true)` once a close was requested.
    fn drain_commands(
        &self,
        socket: &mut WebSocket<TcpStream>,
    ) -> Result<bool, tungstenite::Error> {
        loop {
            match self.inbox.try_recv() {
                Ok(Command::Text(text)) => socket.send(Message::text(text))?,
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    return Ok(true);
                }
                Err(TryRecvError::Empty) => return Ok(false),
            }
        }
    }
}
