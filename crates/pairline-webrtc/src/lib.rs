//! webrtc-rs backed [`PeerTransport`] for pairline sessions.
//!
//! Each handle wraps one `RTCPeerConnection`. Connection callbacks are turned
//! into [`TransportEvent`]s and pushed into the owning session's mailbox.

mod media;

pub use media::{OPUS_FRAME, SilentAudioSource};

use async_trait::async_trait;
use pairline_core::{
    ConnectionState, DescriptionKind, IceCandidate, LocalSource, PeerId, PeerTransport,
    RemoteTrack, SessionDescription, TransportConfig, TransportError, TransportEvent,
    TransportEvents, TransportHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

fn build_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|err| TransportError::Setup(err.to_string()))?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|err| TransportError::Setup(err.to_string()))?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn rtc_configuration(config: &TransportConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();
    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn to_rtc_description(
    description: &SessionDescription,
) -> Result<RTCSessionDescription, webrtc::Error> {
    match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
        DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
    }
}

fn from_rtc_description(
    description: RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(TransportError::LocalDescription(format!(
            "unexpected sdp type {other}"
        ))),
    }
}

fn to_rtc_candidate(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mline_index: init.sdp_mline_index,
        sdp_mid: init.sdp_mid,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

/// Creates one `RTCPeerConnection` per session from a shared API instance.
pub struct WebRtcTransport {
    api: Arc<API>,
}

impl WebRtcTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            api: Arc::new(build_api()?),
        })
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create(
        &self,
        peer: &PeerId,
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let pc = self
            .api
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|err| TransportError::Setup(err.to_string()))?;
        let pc = Arc::new(pc);
        wire_callbacks(&pc, peer, events);
        tracing::debug!(target: "webrtc", peer = %peer, "peer connection created");
        Ok(Arc::new(WebRtcHandle {
            peer: peer.clone(),
            pc,
            media_tasks: Mutex::new(Vec::new()),
        }))
    }
}

fn wire_callbacks(pc: &RTCPeerConnection, peer: &PeerId, events: TransportEvents) {
    let candidate_events = events.clone();
    let candidate_peer = peer.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let peer = candidate_peer.clone();
        Box::pin(async move {
            // `None` marks the end of gathering; the relay protocol has no message for it.
            let Some(candidate) = candidate else {
                tracing::debug!(target: "webrtc", peer = %peer, "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(TransportEvent::LocalCandidate(from_rtc_candidate(init)));
                }
                Err(err) => {
                    tracing::warn!(target: "webrtc", peer = %peer, error = %err, "failed to serialize local candidate");
                }
            }
        })
    }));

    let state_events = events.clone();
    let state_peer = peer.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::debug!(target: "webrtc", peer = %state_peer, state = %state, "peer connection state");
        let _ = state_events.send(TransportEvent::ConnectionState(map_connection_state(state)));
        Box::pin(async {})
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = events.send(TransportEvent::RemoteTrack(RemoteTrack {
                id: track.id(),
                kind: track.kind().to_string(),
                stream_id: track.stream_id(),
            }));
            Box::pin(async {})
        },
    ));
}

struct WebRtcHandle {
    peer: PeerId,
    pc: Arc<RTCPeerConnection>,
    media_tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl TransportHandle for WebRtcHandle {
    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), TransportError> {
        if source.video {
            tracing::debug!(target: "webrtc", peer = %self.peer, source = %source.label, "video capture not supported; sending audio only");
        }
        if !source.audio {
            return Ok(());
        }
        let tasks = media::attach_silent_audio(&self.pc, &self.peer).await?;
        self.media_tasks.lock().extend(tasks);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| TransportError::LocalDescription(err.to_string()))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| TransportError::LocalDescription(err.to_string()))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let local = to_rtc_description(description)
            .map_err(|err| TransportError::LocalDescription(err.to_string()))?;
        self.pc
            .set_local_description(local)
            .await
            .map_err(|err| TransportError::LocalDescription(err.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let remote = to_rtc_description(description)
            .map_err(|err| TransportError::DescriptionRejected(err.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|err| TransportError::DescriptionRejected(err.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if self.pc.remote_description().await.is_none() {
            return Err(TransportError::CandidateRejected(
                "remote description not set".into(),
            ));
        }
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|err| TransportError::CandidateRejected(err.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        for task in self.media_tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(target: "webrtc", peer = %self.peer, "closing peer connection");
        self.pc
            .close()
            .await
            .map_err(|err| TransportError::Setup(err.to_string()))
    }
}

impl Drop for WebRtcHandle {
    fn drop(&mut self) {
        for task in self.media_tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
