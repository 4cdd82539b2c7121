use crate::channel::ChannelError;
use crate::peer_id::PeerId;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer {peer}: protocol sequencing error: {detail}")]
    ProtocolSequencing { peer: PeerId, detail: String },
    #[error("peer {peer}: a live session already exists")]
    DuplicateSession { peer: PeerId },
    #[error("peer {peer}: {source}")]
    Transport {
        peer: PeerId,
        #[source]
        source: TransportError,
    },
    #[error("peer {peer}: session is closed")]
    SessionClosed { peer: PeerId },
    #[error("refusing to pair with the local identifier {0}")]
    SelfPairing(PeerId),
    #[error("signaling channel unavailable: {0}")]
    ChannelUnavailable(#[from] ChannelError),
}

pub type NegotiationResult<T> = Result<T, NegotiationError>;
