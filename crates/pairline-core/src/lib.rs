//! Pairline core: client-side bookkeeping for peer-to-peer media negotiation.
//!
//! Responsibilities:
//! - decoding and encoding relay messages (`NewUser`, `RequestPair`, descriptions, candidates)
//! - tracking one negotiation state machine per remote peer
//! - buffering remote candidates until a remote description exists
//! - routing local descriptions and candidates back out through the signaling channel
//!
//! The media engine and the relay connection are collaborators behind the
//! [`PeerTransport`], [`MediaSource`] and [`SignalingChannel`] traits.
//!
//! Log events set their target with `target: "negotiation"` (or `"signaling"`,
//! `"webrtc"`) rather than a `target = ..` field, so `RUST_LOG=negotiation=debug`
//! selects them directly.

pub mod candidate_buffer;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod message;
pub mod mock;
pub mod peer_id;
pub mod registry;
pub mod report;
pub mod session;
pub mod transport;

mod actor;

pub use actor::{SessionHandle, SessionSnapshot};
pub use candidate_buffer::{CandidateBuffer, DrainOutcome};
pub use channel::{ChannelError, ChannelEvent, Outbox, SignalingChannel};
pub use config::{IceServer, NegotiationConfig, PairingPolicy, TransportConfig};
pub use coordinator::SignalingCoordinator;
pub use error::NegotiationError;
pub use media::{LocalSource, MediaConstraints, MediaSource, SourceError};
pub use message::{DescriptionKind, IceCandidate, MessageError, SessionDescription, SignalingMessage};
pub use peer_id::PeerId;
pub use registry::SessionRegistry;
pub use report::{CloseReason, DropReason, NegotiationReport, Reporter};
pub use session::{NegotiationState, PeerSession, Role, SessionContext};
pub use transport::{
    ConnectionState, PeerTransport, RemoteTrack, TransportError, TransportEvent, TransportEvents,
    TransportHandle,
};
