pub mod connection;
pub mod ice;
pub mod media;
pub mod state;
pub mod types;

pub use connection::{ConnectionAdapter, ConnectionEvent, PeerConnection, PeerHandle};
pub use media::{MediaSource, MediaStream, MediaTrack, TrackKind};
pub use state::{CallState, Phase, Role};
pub use types::{IceCandidate, SdpType, ServerConfig, SessionDescription, SessionRecord};
