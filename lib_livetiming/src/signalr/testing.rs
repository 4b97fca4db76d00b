//! Scripted stand-ins for the network side of the pipeline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::error::{NegotiationError, TransportError};
use super::negotiate::{ConnectionCredentials, Negotiate};
use super::transport::{Connect, Connection};

/// Shared view of what happened on scripted connections.
#[derive(Default, Clone)]
pub(crate) struct Wire {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl Wire {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedConnection {
    frames: VecDeque<String>,
    hang_when_drained: bool,
    closed: bool,
    wire: Wire,
}

impl ScriptedConnection {
    /// Yields `frames`, then reports the connection as closed by the server.
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            frames: frames.into(),
            hang_when_drained: false,
            closed: false,
            wire: Wire::default(),
        }
    }

    /// Yields `frames`, then stays silent forever.
    pub fn hanging(frames: Vec<String>) -> Self {
        Self {
            hang_when_drained: true,
            ..Self::new(frames)
        }
    }

    pub fn with_wire(mut self, wire: Wire) -> Self {
        self.wire = wire;
        self
    }
}

impl Connection for ScriptedConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hang_when_drained => std::future::pending().await,
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.wire.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.wire.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Negotiator answering from a list of outcomes; reports the instant of every call.
pub(crate) struct ScriptedNegotiator {
    outcomes: Mutex<VecDeque<bool>>,
    calls: mpsc::UnboundedSender<Instant>,
}

impl ScriptedNegotiator {
    /// `true` entries succeed with token `T1`, `false` entries fail. Once the
    /// script runs out every call fails.
    pub fn new(outcomes: Vec<bool>) -> (Self, mpsc::UnboundedReceiver<Instant>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls,
            },
            rx,
        )
    }
}

impl Negotiate for ScriptedNegotiator {
    async fn negotiate(&self) -> Result<ConnectionCredentials, NegotiationError> {
        let _ = self.calls.send(Instant::now());
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(true) => Ok(ConnectionCredentials {
                token: "T1".to_string(),
                cookie: Some("session=abc".to_string()),
            }),
            _ => Err(NegotiationError::MissingToken),
        }
    }
}

/// Negotiator whose calls never complete; reports the instant of every call.
pub(crate) struct StalledNegotiator {
    calls: mpsc::UnboundedSender<Instant>,
}

impl StalledNegotiator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Instant>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls }, rx)
    }
}

impl Negotiate for StalledNegotiator {
    async fn negotiate(&self) -> Result<ConnectionCredentials, NegotiationError> {
        let _ = self.calls.send(Instant::now());
        std::future::pending().await
    }
}

/// Connector whose handshakes never complete. Records the token of every attempt.
#[derive(Default)]
pub(crate) struct StalledConnector {
    pub tokens: Arc<Mutex<Vec<String>>>,
}

impl Connect for StalledConnector {
    type Connection = ScriptedConnection;

    async fn connect(
        &self,
        credentials: ConnectionCredentials,
    ) -> Result<ScriptedConnection, TransportError> {
        self.tokens.lock().unwrap().push(credentials.token);
        std::future::pending().await
    }
}

/// Connector handing out pre-built connections in order.
pub(crate) struct ScriptedConnector {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    pub tokens: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(connections: Vec<ScriptedConnection>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            tokens: Arc::default(),
        }
    }
}

impl Connect for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(
        &self,
        credentials: ConnectionCredentials,
    ) -> Result<ScriptedConnection, TransportError> {
        self.tokens.lock().unwrap().push(credentials.token);
        let next = self.connections.lock().unwrap().pop_front();
        next.ok_or(TransportError::Closed)
    }
}
