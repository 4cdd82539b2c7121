//! In-memory collaborators for exercising the negotiation logic without a
//! media engine or a relay.

use crate::channel::{ChannelError, SignalingChannel};
use crate::config::TransportConfig;
use crate::media::{LocalSource, MediaConstraints, MediaSource, SourceError};
use crate::message::{IceCandidate, SessionDescription, SignalingMessage};
use crate::peer_id::PeerId;
use crate::transport::{PeerTransport, TransportError, TransportEvent, TransportEvents, TransportHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// One recorded call against a mock transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Create,
    AttachLocalSource(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddRemoteCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
struct MockTransportState {
    calls: HashMap<PeerId, Vec<TransportCall>>,
    events: HashMap<PeerId, TransportEvents>,
    rejected_candidates: HashSet<String>,
    reject_descriptions: bool,
    fail_create: bool,
    fail_offers: bool,
    offer_gate: Option<Arc<Notify>>,
}

/// Recording transport factory. Clones share the same call log.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_descriptions(&self, reject: bool) {
        self.state.lock().reject_descriptions = reject;
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.state.lock().rejected_candidates.insert(candidate.to_string());
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn fail_offers(&self, fail: bool) {
        self.state.lock().fail_offers = fail;
    }

    /// Makes every later `create_offer` wait until the returned gate is
    /// notified once per held offer.
    pub fn hold_offers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().offer_gate = Some(gate.clone());
        gate
    }

    pub fn calls(&self, peer: &PeerId) -> Vec<TransportCall> {
        self.state.lock().calls.get(peer).cloned().unwrap_or_default()
    }

    pub fn count(&self, peer: &PeerId, call: fn(&TransportCall) -> bool) -> usize {
        self.calls(peer).iter().filter(|c| call(c)).count()
    }

    pub fn applied_candidates(&self, peer: &PeerId) -> Vec<IceCandidate> {
        self.calls(peer)
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddRemoteCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    /// Raises a transport callback for `peer`. Returns false when no handle was
    /// created for that peer or its session is gone.
    pub fn emit(&self, peer: &PeerId, event: TransportEvent) -> bool {
        let sender = self.state.lock().events.get(peer).cloned();
        sender.is_some_and(|tx| tx.send(event).is_ok())
    }

    fn record(&self, peer: &PeerId, call: TransportCall) {
        self.state.lock().calls.entry(peer.clone()).or_default().push(call);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create(
        &self,
        peer: &PeerId,
        _config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        if self.state.lock().fail_create {
            return Err(TransportError::Setup("mock transport refused".into()));
        }
        self.record(peer, TransportCall::Create);
        self.state.lock().events.insert(peer.clone(), events);
        Ok(Arc::new(MockHandle {
            peer: peer.clone(),
            factory: self.clone(),
            remote_set: AtomicBool::new(false),
        }))
    }
}

struct MockHandle {
    peer: PeerId,
    factory: MockTransport,
    remote_set: AtomicBool,
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), TransportError> {
        self.factory
            .record(&self.peer, TransportCall::AttachLocalSource(source.label.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.factory.record(&self.peer, TransportCall::CreateOffer);
        let gate = self.factory.state.lock().offer_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.factory.state.lock().fail_offers {
            return Err(TransportError::LocalDescription("mock offer failure".into()));
        }
        Ok(SessionDescription::offer(format!("v=0 mock-offer {}", self.peer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.factory.record(&self.peer, TransportCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 mock-answer {}", self.peer)))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.factory
            .record(&self.peer, TransportCall::SetLocal(description.clone()));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.factory
            .record(&self.peer, TransportCall::SetRemote(description.clone()));
        if self.factory.state.lock().reject_descriptions {
            return Err(TransportError::DescriptionRejected("mock rejection".into()));
        }
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.factory
            .record(&self.peer, TransportCall::AddRemoteCandidate(candidate.clone()));
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(TransportError::CandidateRejected(
                "no remote description".into(),
            ));
        }
        if self
            .factory
            .state
            .lock()
            .rejected_candidates
            .contains(&candidate.candidate)
        {
            return Err(TransportError::CandidateRejected(candidate.candidate.clone()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.factory.record(&self.peer, TransportCall::Close);
        Ok(())
    }
}

/// Signaling channel that records every message it is asked to send.
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<SignalingMessage>>,
    failing: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<SignalingMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|msg| msg.peer_id() == peer)
            .cloned()
            .collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingChannel for MockChannel {
    async fn send(&self, message: SignalingMessage) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

/// Media source with a fixed outcome.
#[derive(Debug, Default)]
pub struct StaticMedia {
    unavailable: Option<String>,
    acquired: AtomicUsize,
}

impl StaticMedia {
    pub fn microphone() -> Self {
        Self::default()
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            acquired: AtomicUsize::new(0),
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalSource, SourceError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        match &self.unavailable {
            Some(reason) => Err(SourceError::Unavailable(reason.clone())),
            None => Ok(LocalSource {
                label: "mock-microphone".into(),
                audio: constraints.audio,
                video: constraints.video,
            }),
        }
    }
}
