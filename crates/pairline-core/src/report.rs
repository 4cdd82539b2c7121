use crate::message::IceCandidate;
use crate::peer_id::PeerId;
use crate::transport::{RemoteTrack, TransportError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    TransportFailed,
    TransportClosed,
    ProtocolSequencing,
    DescriptionRejected,
    NegotiationFailed,
    PeerLeft,
    ChannelUnavailable,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::Requested => "close requested",
            CloseReason::TransportFailed => "transport failed",
            CloseReason::TransportClosed => "transport closed",
            CloseReason::ProtocolSequencing => "protocol sequencing error",
            CloseReason::DescriptionRejected => "remote description rejected",
            CloseReason::NegotiationFailed => "local negotiation step failed",
            CloseReason::PeerLeft => "peer left the relay",
            CloseReason::ChannelUnavailable => "signaling channel unavailable",
            CloseReason::Shutdown => "coordinator shutdown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No session exists for the identifier.
    NoSession,
    /// The session exists but already reached `Closed`.
    SessionClosed,
}

/// Recoverable conditions surfaced to the host. None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationReport {
    PeerAvailable {
        peer: PeerId,
    },
    DuplicateSession {
        peer: PeerId,
        trigger: &'static str,
    },
    ProtocolSequencing {
        peer: PeerId,
        detail: String,
    },
    CandidateOverflow {
        peer: PeerId,
        dropped: IceCandidate,
    },
    CandidateDropped {
        peer: PeerId,
        reason: DropReason,
    },
    TransportRejected {
        peer: PeerId,
        error: TransportError,
        fatal: bool,
    },
    SourceUnavailable {
        peer: PeerId,
        reason: String,
    },
    Connected {
        peer: PeerId,
    },
    RemoteTrack {
        peer: PeerId,
        track: RemoteTrack,
    },
    SessionClosed {
        peer: PeerId,
        reason: CloseReason,
    },
    ChannelUnavailable {
        reason: String,
    },
}

#[derive(Debug, Default)]
enum Stream {
    #[default]
    Unclaimed,
    Open(mpsc::UnboundedSender<NegotiationReport>),
    Gone,
}

/// Logs every report and forwards it to whoever subscribed.
///
/// Until [`subscribe`](Self::subscribe) is called reports are only logged, so
/// a host that never reads them holds nothing.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    stream: Arc<Mutex<Stream>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter that is already subscribed.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NegotiationReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self {
            stream: Arc::new(Mutex::new(Stream::Open(tx))),
        };
        (reporter, rx)
    }

    /// Opens the report stream. Only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<NegotiationReport>> {
        let mut stream = self.stream.lock();
        if !matches!(*stream, Stream::Unclaimed) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *stream = Stream::Open(tx);
        Some(rx)
    }

    pub fn report(&self, report: NegotiationReport) {
        log_report(&report);
        let mut stream = self.stream.lock();
        if let Stream::Open(tx) = &*stream {
            if tx.send(report).is_err() {
                *stream = Stream::Gone;
            }
        }
    }
}

fn log_report(report: &NegotiationReport) {
    match report {
        NegotiationReport::PeerAvailable { peer } => {
            tracing::info!(target: "negotiation", peer = %peer, "peer available");
        }
        NegotiationReport::DuplicateSession { peer, trigger } => {
            tracing::info!(
                target: "negotiation",
                peer = %peer,
                trigger,
                "duplicate session request ignored"
            );
        }
        NegotiationReport::ProtocolSequencing { peer, detail } => {
            tracing::warn!(target: "negotiation", peer = %peer, detail = %detail, "protocol sequencing error");
        }
        NegotiationReport::CandidateOverflow { peer, dropped } => {
            tracing::warn!(
                target: "negotiation",
                peer = %peer,
                dropped = %dropped.candidate,
                "candidate buffer full; dropped oldest candidate"
            );
        }
        NegotiationReport::CandidateDropped { peer, reason } => {
            tracing::debug!(target: "negotiation", peer = %peer, reason = ?reason, "remote candidate dropped");
        }
        NegotiationReport::TransportRejected { peer, error, fatal } => {
            if *fatal {
                tracing::warn!(target: "negotiation", peer = %peer, error = %error, "transport rejected negotiation step");
            } else {
                tracing::debug!(target: "negotiation", peer = %peer, error = %error, "transport rejected candidate");
            }
        }
        NegotiationReport::SourceUnavailable { peer, reason } => {
            tracing::info!(target: "negotiation", peer = %peer, reason = %reason, "continuing without local media");
        }
        NegotiationReport::Connected { peer } => {
            tracing::info!(target: "negotiation", peer = %peer, "peer connected");
        }
        NegotiationReport::RemoteTrack { peer, track } => {
            tracing::info!(
                target: "negotiation",
                peer = %peer,
                track = %track.id,
                kind = %track.kind,
                "remote media track"
            );
        }
        NegotiationReport::SessionClosed { peer, reason } => {
            tracing::info!(target: "negotiation", peer = %peer, reason = %reason, "session closed");
        }
        NegotiationReport::ChannelUnavailable { reason } => {
            tracing::warn!(target: "negotiation", reason = %reason, "signaling channel unavailable; closing sessions");
        }
    }
}
