use crate::config::TransportConfig;
use crate::media::LocalSource;
use crate::message::{IceCandidate, SessionDescription};
use crate::peer_id::PeerId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("remote description rejected: {0}")]
    DescriptionRejected(String),
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("local description failed: {0}")]
    LocalDescription(String),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: String,
    pub stream_id: String,
}

/// Callbacks raised by a transport. They are delivered into the owning
/// session's mailbox, never handled on the transport's own tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    RemoteTrack(RemoteTrack),
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Factory for per-peer transport handles.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create(
        &self,
        peer: &PeerId,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}

/// One connection attempt with one remote peer.
///
/// `add_remote_candidate` must fail with [`TransportError::CandidateRejected`]
/// when called before a remote description has been applied.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), TransportError>;
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;
    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}
