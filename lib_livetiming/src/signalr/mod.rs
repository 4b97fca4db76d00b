//! # SignalR Hub Client
//!
//! A resilient client for the live timing "negotiate, then connect" hub.
//! A short HTTP negotiation hands out a connection token (and usually a
//! session cookie), after which a websocket streams JSON frames until the
//! server closes it or the network drops.
//!
//! ## Contained Modules:
//!
//! - **`negotiate`**: HTTP handshake producing single-use `ConnectionCredentials`.
//! - **`transport`**: The websocket connection and the `Connection` trait the
//!   rest of the pipeline reads frames through.
//! - **`subscribe`**: The one-shot `Subscribe` control frame.
//! - **`demux`**: Parses frames of both wire shapes (incremental `feed`
//!   invocations and subscribe snapshots) into raw items, and the pull-based
//!   `ItemStream` over a live connection.
//! - **`epoch`**: Per-connection start time and backlog cutoff.
//! - **`filter`**: Collaborator contracts and the `StartupFilter` that drops
//!   backlog replay before handing records to the consumer.
//! - **`supervisor`**: The reconnect state machine with exponential backoff.
//!
//! The supervisor owns the connection, the live epoch and the backoff delay.
//! Nothing is shared with other tasks apart from the cancellation token and a
//! read-only state channel exposed through `SupervisorHandle`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Endpoint, hub and retry settings.
pub mod config;
/// Error taxonomy for every stage of the pipeline.
pub mod error;
/// HTTP negotiation.
pub mod negotiate;
/// Websocket transport.
pub mod transport;
/// Subscribe control frame.
pub mod subscribe;
/// Frame demultiplexing into raw feed items.
pub mod demux;
/// Connection epochs and the startup cutoff.
pub mod epoch;
/// Collaborator contracts and backlog suppression.
pub mod filter;
/// Reconnect supervision.
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

// --- Public API Re-exports ---
pub use config::{BackoffConfig, HubConfig};
pub use demux::{FrameDemultiplexer, ItemStream, Messages, RawItem};
pub use epoch::ConnectionEpoch;
pub use error::{
    CollaboratorError, ConnectError, FrameError, NegotiationError, TransportError,
};
pub use filter::{
    Attributes, Consumer, ItemSink, NormalizedRecord, Outcome, StartupFilter, StateChange,
    StatePublisher, Transform,
};
pub use negotiate::{ConnectionCredentials, HttpNegotiator, Negotiate};
pub use subscribe::{subscribe, SubscribeFrame};
pub use supervisor::{Backoff, ReconnectSupervisor, SupervisorHandle, SupervisorState};
pub use transport::{Connect, Connection, WsConnection, WsConnector};
