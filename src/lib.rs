//! Two-party video calls negotiated through a shared document store.
//!
//! One participant publishes an offer under a well-known session key, the
//! other answers it, and both trickle ICE candidates through two
//! sub-collections until media flows. Either side hanging up deletes the
//! shared artifacts, which the other side observes and follows.
//!
//! The orchestrator is [`CallSession`]; [`CallHandle`] runs it on a task
//! for UI code. Storage, connections and media capture are reached through
//! the [`DocumentStore`], [`ConnectionAdapter`] and [`MediaSource`] traits;
//! [`MemoryStore`] and [`WebRtcConnector`] are the bundled implementations.

pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;
pub mod subscription;
pub mod utils;
pub mod webrtc_peer;

#[cfg(test)]
mod testing;

pub use commands::CallHandle;
pub use config::{CallConfig, LoggingConfig};
pub use error::{CallError, Result, StoreError};
pub use peer::{
    ConnectionAdapter, ConnectionEvent, IceCandidate, MediaSource, MediaStream, PeerConnection,
    Phase, Role, SessionDescription,
};
pub use session::{CallEvent, CallSession, SessionInput};
pub use signaling::SignalingChannel;
pub use store::{DocumentStore, MemoryStore};
pub use subscription::Subscription;
pub use webrtc_peer::WebRtcConnector;
