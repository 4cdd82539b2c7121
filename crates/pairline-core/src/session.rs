use crate::candidate_buffer::CandidateBuffer;
use crate::channel::Outbox;
use crate::config::NegotiationConfig;
use crate::error::{NegotiationError, NegotiationResult};
use crate::media::MediaSource;
use crate::message::{DescriptionKind, IceCandidate, SessionDescription, SignalingMessage};
use crate::peer_id::PeerId;
use crate::report::{CloseReason, DropReason, NegotiationReport, Reporter};
use crate::transport::{
    ConnectionState, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportHandle,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Collaborators shared by every session of one coordinator.
pub struct SessionContext {
    pub config: NegotiationConfig,
    pub transports: Arc<dyn PeerTransport>,
    pub media: Arc<dyn MediaSource>,
    pub outbox: Outbox,
    pub reporter: Reporter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer.
    Caller,
    /// Answers a remote offer.
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    AwaitingLocalOffer,
    AwaitingRemoteOffer,
    OfferSent,
    RemoteDescriptionSet,
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }

    /// Remote candidates may be handed to the transport directly.
    pub fn has_remote_description(self) -> bool {
        matches!(
            self,
            NegotiationState::RemoteDescriptionSet | NegotiationState::Connected
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::AwaitingLocalOffer => "awaiting-local-offer",
            NegotiationState::AwaitingRemoteOffer => "awaiting-remote-offer",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::RemoteDescriptionSet => "remote-description-set",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Negotiation with exactly one remote peer.
///
/// A session is driven by a single task, so none of its methods need to be
/// safe against concurrent calls. The shared `closed` flag is the only state
/// other tasks touch: once it is set nothing more is emitted to the relay.
pub struct PeerSession {
    id: PeerId,
    role: Role,
    state: NegotiationState,
    transport: Option<Arc<dyn TransportHandle>>,
    pending: CandidateBuffer,
    closed: Arc<AtomicBool>,
    events: TransportEvents,
    ctx: Arc<SessionContext>,
}

impl PeerSession {
    pub fn new(
        id: PeerId,
        role: Role,
        ctx: Arc<SessionContext>,
        events: TransportEvents,
        closed: Arc<AtomicBool>,
    ) -> Self {
        let state = match role {
            Role::Caller => NegotiationState::AwaitingLocalOffer,
            Role::Callee => NegotiationState::AwaitingRemoteOffer,
        };
        Self {
            pending: CandidateBuffer::with_cap(ctx.config.candidate_cap),
            id,
            role,
            state,
            transport: None,
            closed,
            events,
            ctx,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn start_local_offer(&mut self) -> NegotiationResult<()> {
        match self.state {
            NegotiationState::AwaitingLocalOffer => {}
            NegotiationState::Closed => return Err(self.closed_error()),
            _ => return Err(self.duplicate("local offer")),
        }

        let transport = self.ensure_transport().await?;
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(err) => return Err(self.abort(err, CloseReason::NegotiationFailed).await),
        };
        if let Err(err) = transport.set_local_description(&offer).await {
            return Err(self.abort(err, CloseReason::NegotiationFailed).await);
        }
        self.transition(NegotiationState::OfferSent);
        self.emit_description(offer).await;
        Ok(())
    }

    pub async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> NegotiationResult<()> {
        match (self.state, description.kind) {
            (NegotiationState::Closed, _) => Err(self.closed_error()),
            (NegotiationState::AwaitingRemoteOffer, DescriptionKind::Offer) => {
                self.accept_offer(description).await
            }
            (NegotiationState::OfferSent, DescriptionKind::Answer) => {
                self.accept_answer(description).await
            }
            (_, DescriptionKind::Offer) => Err(self.duplicate("remote offer")),
            (state, DescriptionKind::Answer) => {
                let detail = format!("answer received while {state}");
                self.ctx.reporter.report(NegotiationReport::ProtocolSequencing {
                    peer: self.id.clone(),
                    detail: detail.clone(),
                });
                self.close(CloseReason::ProtocolSequencing).await;
                Err(NegotiationError::ProtocolSequencing {
                    peer: self.id.clone(),
                    detail,
                })
            }
        }
    }

    pub async fn apply_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.state.is_closed() {
            self.ctx.reporter.report(NegotiationReport::CandidateDropped {
                peer: self.id.clone(),
                reason: DropReason::SessionClosed,
            });
            return;
        }

        if self.state.has_remote_description() {
            if let Some(transport) = self.transport.clone() {
                if let Err(error) = transport.add_remote_candidate(&candidate).await {
                    self.reject_candidate(error);
                }
                return;
            }
        }

        if let Some(dropped) = self.pending.push(candidate) {
            self.ctx.reporter.report(NegotiationReport::CandidateOverflow {
                peer: self.id.clone(),
                dropped,
            });
        }
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        if self.state.is_closed() {
            return;
        }
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.emit(SignalingMessage::IceCandidate {
                    id: self.id.clone(),
                    candidate,
                })
                .await;
            }
            TransportEvent::ConnectionState(ConnectionState::Connected) => {
                if self.state == NegotiationState::RemoteDescriptionSet {
                    self.transition(NegotiationState::Connected);
                    self.ctx.reporter.report(NegotiationReport::Connected {
                        peer: self.id.clone(),
                    });
                }
            }
            TransportEvent::ConnectionState(ConnectionState::Failed) => {
                self.close(CloseReason::TransportFailed).await;
            }
            TransportEvent::ConnectionState(ConnectionState::Closed) => {
                self.close(CloseReason::TransportClosed).await;
            }
            TransportEvent::ConnectionState(other) => {
                tracing::debug!(
                    target: "negotiation",
                    peer = %self.id,
                    connection = ?other,
                    "transport connection state"
                );
            }
            TransportEvent::RemoteTrack(track) => {
                self.ctx.reporter.report(NegotiationReport::RemoteTrack {
                    peer: self.id.clone(),
                    track,
                });
            }
        }
    }

    /// Moves to `Closed`, releasing the transport and discarding buffered
    /// candidates. Calling it again is a no-op.
    pub async fn close(&mut self, reason: CloseReason) {
        if self.state.is_closed() {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.transition(NegotiationState::Closed);
        self.pending.clear();
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                tracing::debug!(target: "negotiation", peer = %self.id, error = %err, "transport close failed");
            }
        }
        self.ctx.reporter.report(NegotiationReport::SessionClosed {
            peer: self.id.clone(),
            reason,
        });
    }

    async fn accept_offer(&mut self, offer: SessionDescription) -> NegotiationResult<()> {
        let transport = self.ensure_transport().await?;
        if let Err(err) = transport.set_remote_description(&offer).await {
            return Err(self.abort(err, CloseReason::DescriptionRejected).await);
        }
        self.transition(NegotiationState::RemoteDescriptionSet);
        self.flush_pending(transport.as_ref()).await;

        let answer = match transport.create_answer().await {
            Ok(answer) => answer,
            Err(err) => return Err(self.abort(err, CloseReason::NegotiationFailed).await),
        };
        if let Err(err) = transport.set_local_description(&answer).await {
            return Err(self.abort(err, CloseReason::NegotiationFailed).await);
        }
        self.emit_description(answer).await;
        Ok(())
    }

    async fn accept_answer(&mut self, answer: SessionDescription) -> NegotiationResult<()> {
        let Some(transport) = self.transport.clone() else {
            // OfferSent is only reachable after the transport exists.
            return Err(self.closed_error());
        };
        if let Err(err) = transport.set_remote_description(&answer).await {
            return Err(self.abort(err, CloseReason::DescriptionRejected).await);
        }
        self.transition(NegotiationState::RemoteDescriptionSet);
        self.flush_pending(transport.as_ref()).await;
        Ok(())
    }

    async fn ensure_transport(&mut self) -> NegotiationResult<Arc<dyn TransportHandle>> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }

        let created = self
            .ctx
            .transports
            .create(&self.id, &self.ctx.config.transport, self.events.clone())
            .await;
        let transport = match created {
            Ok(transport) => transport,
            Err(err) => return Err(self.abort(err, CloseReason::NegotiationFailed).await),
        };
        self.transport = Some(transport.clone());

        let attached = match self.ctx.media.acquire(&self.ctx.config.media).await {
            Ok(source) => transport
                .attach_local_source(&source)
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(reason) = attached {
            self.ctx.reporter.report(NegotiationReport::SourceUnavailable {
                peer: self.id.clone(),
                reason,
            });
        }
        Ok(transport)
    }

    async fn flush_pending(&mut self, transport: &dyn TransportHandle) {
        if self.pending.is_empty() {
            return;
        }
        let outcome = self.pending.drain_into(transport).await;
        tracing::debug!(
            target: "negotiation",
            peer = %self.id,
            applied = outcome.applied,
            rejected = outcome.rejected.len(),
            "flushed buffered candidates"
        );
        for (_, error) in outcome.rejected {
            self.reject_candidate(error);
        }
    }

    fn reject_candidate(&self, error: TransportError) {
        self.ctx.reporter.report(NegotiationReport::TransportRejected {
            peer: self.id.clone(),
            error,
            fatal: false,
        });
    }

    async fn abort(&mut self, error: TransportError, reason: CloseReason) -> NegotiationError {
        self.ctx.reporter.report(NegotiationReport::TransportRejected {
            peer: self.id.clone(),
            error: error.clone(),
            fatal: true,
        });
        self.close(reason).await;
        NegotiationError::Transport {
            peer: self.id.clone(),
            source: error,
        }
    }

    fn duplicate(&self, trigger: &'static str) -> NegotiationError {
        self.ctx.reporter.report(NegotiationReport::DuplicateSession {
            peer: self.id.clone(),
            trigger,
        });
        NegotiationError::DuplicateSession {
            peer: self.id.clone(),
        }
    }

    fn closed_error(&self) -> NegotiationError {
        NegotiationError::SessionClosed {
            peer: self.id.clone(),
        }
    }

    fn transition(&mut self, next: NegotiationState) {
        tracing::debug!(
            target: "negotiation",
            peer = %self.id,
            from = %self.state,
            to = %next,
            "session transition"
        );
        self.state = next;
    }

    async fn emit_description(&self, description: SessionDescription) {
        self.emit(SignalingMessage::SessionDescription {
            id: self.id.clone(),
            description,
        })
        .await;
    }

    async fn emit(&self, message: SignalingMessage) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::trace!(target: "negotiation", peer = %self.id, action = message.kind(), "suppressed emission after close");
            return;
        }
        // No retries: delivery failures surface as ChannelUnavailable from the channel side.
        let _ = self.ctx.outbox.emit(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SignalingChannel;
    use crate::mock::{MockChannel, MockTransport, StaticMedia, TransportCall};
    use tokio::sync::mpsc;

    struct Fixture {
        transport: MockTransport,
        channel: Arc<MockChannel>,
        reports: mpsc::UnboundedReceiver<NegotiationReport>,
        ctx: Arc<SessionContext>,
    }

    fn fixture_with(config: NegotiationConfig, media: StaticMedia) -> Fixture {
        let transport = MockTransport::new();
        let channel = Arc::new(MockChannel::new());
        let (reporter, reports) = Reporter::channel();
        let ctx = Arc::new(SessionContext {
            config,
            transports: Arc::new(transport.clone()),
            media: Arc::new(media),
            outbox: Outbox::new(channel.clone() as Arc<dyn SignalingChannel>),
            reporter,
        });
        Fixture {
            transport,
            channel,
            reports,
            ctx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(NegotiationConfig::default(), StaticMedia::microphone())
    }

    fn session(fx: &Fixture, id: &str, role: Role) -> PeerSession {
        let (events, _rx) = mpsc::unbounded_channel();
        PeerSession::new(
            PeerId::from(id),
            role,
            fx.ctx.clone(),
            events,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn drain_reports(fx: &mut Fixture) -> Vec<NegotiationReport> {
        let mut out = Vec::new();
        while let Ok(report) = fx.reports.try_recv() {
            out.push(report);
        }
        out
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 9 typ host"), Some(0))
    }

    #[tokio::test]
    async fn caller_offer_creates_transport_once_and_emits_offer() {
        let fx = fixture();
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();

        assert_eq!(session.state(), NegotiationState::OfferSent);
        let peer = PeerId::from("AB3X9");
        let calls = fx.transport.calls(&peer);
        assert_eq!(
            calls[..2],
            [
                TransportCall::Create,
                TransportCall::AttachLocalSource("mock-microphone".into())
            ]
        );
        assert_eq!(fx.transport.count(&peer, |c| matches!(c, TransportCall::Create)), 1);

        let sent = fx.channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            SignalingMessage::SessionDescription { description, .. }
                if description.kind == DescriptionKind::Offer
        ));
    }

    #[tokio::test]
    async fn callee_buffers_candidates_until_offer_then_answers() {
        let fx = fixture();
        let peer = PeerId::from("Q7");
        let mut session = session(&fx, "Q7", Role::Callee);
        for n in 1..=3 {
            session.apply_remote_candidate(candidate(n)).await;
        }
        assert_eq!(session.pending_candidates(), 3);
        assert!(fx.transport.calls(&peer).is_empty());

        session
            .apply_remote_description(SessionDescription::offer("v=0 remote"))
            .await
            .unwrap();

        assert_eq!(session.state(), NegotiationState::RemoteDescriptionSet);
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(
            fx.transport.applied_candidates(&peer),
            vec![candidate(1), candidate(2), candidate(3)]
        );

        let calls = fx.transport.calls(&peer);
        let remote_at = calls
            .iter()
            .position(|c| matches!(c, TransportCall::SetRemote(_)))
            .unwrap();
        let first_candidate_at = calls
            .iter()
            .position(|c| matches!(c, TransportCall::AddRemoteCandidate(_)))
            .unwrap();
        assert!(remote_at < first_candidate_at);

        let sent = fx.channel.sent_to(&peer);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            SignalingMessage::SessionDescription { description, .. }
                if description.kind == DescriptionKind::Answer
        ));
    }

    #[tokio::test]
    async fn answer_outside_offer_sent_closes_session() {
        let mut fx = fixture();
        let mut session = session(&fx, "Z9K2P", Role::Callee);
        let err = session
            .apply_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::ProtocolSequencing { .. }));
        assert_eq!(session.state(), NegotiationState::Closed);
        let reports = drain_reports(&mut fx);
        assert!(matches!(reports[0], NegotiationReport::ProtocolSequencing { .. }));
        assert!(matches!(
            reports.last(),
            Some(NegotiationReport::SessionClosed {
                reason: CloseReason::ProtocolSequencing,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn second_offer_is_rejected_but_session_kept() {
        let mut fx = fixture();
        let mut session = session(&fx, "Z9K2P", Role::Callee);
        session
            .apply_remote_description(SessionDescription::offer("v=0 first"))
            .await
            .unwrap();
        let err = session
            .apply_remote_description(SessionDescription::offer("v=0 second"))
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::DuplicateSession { .. }));
        assert_eq!(session.state(), NegotiationState::RemoteDescriptionSet);
        assert!(drain_reports(&mut fx).iter().any(|r| matches!(
            r,
            NegotiationReport::DuplicateSession { trigger: "remote offer", .. }
        )));
    }

    #[tokio::test]
    async fn rejected_description_closes_and_releases_transport() {
        let fx = fixture();
        fx.transport.reject_descriptions(true);
        let peer = PeerId::from("Z9K2P");
        let mut session = session(&fx, "Z9K2P", Role::Callee);
        session.apply_remote_candidate(candidate(1)).await;

        let err = session
            .apply_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NegotiationError::Transport {
                source: TransportError::DescriptionRejected(_),
                ..
            }
        ));
        assert_eq!(session.state(), NegotiationState::Closed);
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(fx.transport.count(&peer, |c| matches!(c, TransportCall::Close)), 1);
        assert!(fx.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut fx = fixture();
        let peer = PeerId::from("AB3X9");
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();

        session.close(CloseReason::Requested).await;
        session.close(CloseReason::Requested).await;

        assert_eq!(fx.transport.count(&peer, |c| matches!(c, TransportCall::Close)), 1);
        let closes = drain_reports(&mut fx)
            .into_iter()
            .filter(|r| matches!(r, NegotiationReport::SessionClosed { .. }))
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn local_candidates_are_not_emitted_after_close() {
        let fx = fixture();
        let peer = PeerId::from("AB3X9");
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();
        session
            .on_transport_event(TransportEvent::LocalCandidate(candidate(1)))
            .await;
        assert_eq!(fx.channel.sent_to(&peer).len(), 2);

        session.close(CloseReason::Requested).await;
        session
            .on_transport_event(TransportEvent::LocalCandidate(candidate(2)))
            .await;
        assert_eq!(fx.channel.sent_to(&peer).len(), 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports() {
        let config = NegotiationConfig {
            candidate_cap: 2,
            ..NegotiationConfig::default()
        };
        let mut fx = fixture_with(config, StaticMedia::microphone());
        let mut session = session(&fx, "Q7", Role::Callee);
        for n in 1..=3 {
            session.apply_remote_candidate(candidate(n)).await;
        }
        assert_eq!(session.pending_candidates(), 2);
        let reports = drain_reports(&mut fx);
        assert_eq!(
            reports,
            vec![NegotiationReport::CandidateOverflow {
                peer: PeerId::from("Q7"),
                dropped: candidate(1),
            }]
        );
    }

    #[tokio::test]
    async fn missing_media_is_reported_and_negotiation_continues() {
        let mut fx = fixture_with(NegotiationConfig::default(), StaticMedia::unavailable("no microphone"));
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();

        assert_eq!(session.state(), NegotiationState::OfferSent);
        assert!(drain_reports(&mut fx).iter().any(|r| matches!(
            r,
            NegotiationReport::SourceUnavailable { reason, .. } if reason.contains("no microphone")
        )));
    }

    #[tokio::test]
    async fn connected_and_failed_transitions() {
        let fx = fixture();
        let peer = PeerId::from("AB3X9");
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();
        session
            .apply_remote_description(SessionDescription::answer("v=0 answer"))
            .await
            .unwrap();

        session
            .on_transport_event(TransportEvent::ConnectionState(ConnectionState::Connected))
            .await;
        assert_eq!(session.state(), NegotiationState::Connected);

        session
            .on_transport_event(TransportEvent::ConnectionState(ConnectionState::Disconnected))
            .await;
        assert_eq!(session.state(), NegotiationState::Connected);

        session
            .on_transport_event(TransportEvent::ConnectionState(ConnectionState::Failed))
            .await;
        assert_eq!(session.state(), NegotiationState::Closed);
        assert_eq!(fx.transport.count(&peer, |c| matches!(c, TransportCall::Close)), 1);
    }

    #[tokio::test]
    async fn candidates_after_remote_description_apply_directly() {
        let fx = fixture();
        let peer = PeerId::from("AB3X9");
        let mut session = session(&fx, "AB3X9", Role::Caller);
        session.start_local_offer().await.unwrap();
        session
            .apply_remote_description(SessionDescription::answer("v=0 answer"))
            .await
            .unwrap();

        session.apply_remote_candidate(candidate(4)).await;
        session.apply_remote_candidate(candidate(4)).await;
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(fx.transport.applied_candidates(&peer), vec![candidate(4), candidate(4)]);
    }
}
