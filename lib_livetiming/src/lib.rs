//! # lib_livetiming
//!
//! Client-side building blocks for the live timing SignalR hub. Modules are
//! gated by cargo features, so binaries only pull the networking stack when
//! they ask for it.

#[cfg(feature = "signalr")]
pub mod signalr;

#[cfg(feature = "signalr")]
pub use signalr::{
    HubConfig, ReconnectSupervisor, SupervisorHandle, SupervisorState,
};
