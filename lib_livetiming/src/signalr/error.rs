use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure to obtain connection credentials.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid negotiation URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("negotiation request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    #[error("negotiation returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("negotiation response could not be decoded: {0}")]
    Body(#[from] reqwest::Error),

    #[error("negotiation response carries no ConnectionToken")]
    MissingToken,
}

/// Failure of the websocket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid streaming URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid value for header {name}")]
    Header { name: &'static str },

    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("websocket read failed: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("websocket send failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection is closed")]
    Closed,

    #[error("no frame received for {0:?}")]
    Idle(Duration),
}

/// A failed negotiate + connect + subscribe attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A frame, or part of one, that could not be turned into raw items.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unrecognized Messages representation: {0}")]
    UnrecognizedShape(String),
}

/// A failure raised by an injected collaborator while handling one item.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("transform failed: {0:#}")]
    Transform(anyhow::Error),

    #[error("record timestamp unavailable: {0:#}")]
    Timestamp(anyhow::Error),

    #[error("consumer apply failed: {0:#}")]
    Apply(anyhow::Error),

    #[error("state publish failed: {0:#}")]
    Publish(anyhow::Error),

    #[error("collaborator panicked: {0}")]
    Panicked(String),
}
