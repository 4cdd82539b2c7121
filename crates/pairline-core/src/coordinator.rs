use crate::actor::{SessionCommand, SessionHandle, SessionSnapshot, spawn_session};
use crate::channel::{ChannelEvent, Outbox, SignalingChannel};
use crate::config::{NegotiationConfig, PairingPolicy};
use crate::error::{NegotiationError, NegotiationResult};
use crate::media::MediaSource;
use crate::message::{DescriptionKind, SignalingMessage};
use crate::peer_id::PeerId;
use crate::registry::SessionRegistry;
use crate::report::{CloseReason, DropReason, NegotiationReport, Reporter};
use crate::session::{Role, SessionContext};
use crate::transport::PeerTransport;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Single entry and exit point between the relay and the per-peer sessions.
///
/// Inbound messages are routed to the owning session's task; the coordinator
/// never waits on a transport operation itself.
pub struct SignalingCoordinator {
    local_id: PeerId,
    registry: Arc<SessionRegistry>,
    ctx: Arc<SessionContext>,
    available: RwLock<HashSet<PeerId>>,
}

impl SignalingCoordinator {
    pub fn new(
        local_id: PeerId,
        config: NegotiationConfig,
        channel: Arc<dyn SignalingChannel>,
        transports: Arc<dyn PeerTransport>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        let ctx = SessionContext {
            config,
            transports,
            media,
            outbox: Outbox::new(channel),
            reporter: Reporter::new(),
        };
        Self {
            local_id,
            registry: Arc::new(SessionRegistry::new()),
            ctx: Arc::new(ctx),
            available: RwLock::new(HashSet::new()),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The report stream. Only the first caller gets it; reports raised
    /// before then are logged and discarded.
    pub fn take_reports(&self) -> Option<mpsc::UnboundedReceiver<NegotiationReport>> {
        self.ctx.reporter.subscribe()
    }

    pub fn available_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.available.read().iter().cloned().collect();
        peers.sort();
        peers
    }

    pub async fn session(&self, id: &PeerId) -> Option<SessionSnapshot> {
        self.registry.get(id)?.snapshot().await
    }

    pub async fn handle_inbound(&self, message: SignalingMessage) -> NegotiationResult<()> {
        tracing::debug!(
            target: "signaling",
            peer = %message.peer_id(),
            action = message.kind(),
            "inbound signaling message"
        );
        match message {
            SignalingMessage::NewUser { id } => self.on_new_user(id).await,
            SignalingMessage::RequestPair { id } => {
                self.on_pair_request(id);
                Ok(())
            }
            SignalingMessage::UserLeave { id } => {
                self.available.write().remove(&id);
                if let Some(handle) = self.registry.get(&id) {
                    handle.close(CloseReason::PeerLeft);
                }
                Ok(())
            }
            SignalingMessage::SessionDescription { id, description } => {
                let handle = match description.kind {
                    DescriptionKind::Offer => self
                        .open_session(id.clone(), Role::Callee)
                        .unwrap_or_else(|existing| existing),
                    DescriptionKind::Answer => match self.registry.live(&id) {
                        Some(handle) => handle,
                        None => {
                            let detail = "answer received without a session".to_string();
                            self.ctx.reporter.report(NegotiationReport::ProtocolSequencing {
                                peer: id.clone(),
                                detail: detail.clone(),
                            });
                            return Err(NegotiationError::ProtocolSequencing { peer: id, detail });
                        }
                    },
                };
                if handle.send(SessionCommand::RemoteDescription(description)) {
                    Ok(())
                } else {
                    Err(NegotiationError::SessionClosed { peer: id })
                }
            }
            SignalingMessage::IceCandidate { id, candidate } => {
                let reason = match self.registry.get(&id) {
                    Some(handle) if !handle.is_closed() => {
                        if handle.send(SessionCommand::RemoteCandidate(candidate)) {
                            return Ok(());
                        }
                        DropReason::SessionClosed
                    }
                    Some(_) => DropReason::SessionClosed,
                    None => DropReason::NoSession,
                };
                self.ctx
                    .reporter
                    .report(NegotiationReport::CandidateDropped { peer: id, reason });
                Ok(())
            }
        }
    }

    /// Asks the relay to pair with `id` and starts negotiating as the caller.
    pub async fn request_pair(&self, id: PeerId) -> NegotiationResult<()> {
        if id == self.local_id {
            return Err(NegotiationError::SelfPairing(id));
        }
        if self.registry.live(&id).is_some() {
            self.report_duplicate(&id, "pair request");
            return Err(NegotiationError::DuplicateSession { peer: id });
        }
        self.ctx
            .outbox
            .emit(SignalingMessage::RequestPair { id: id.clone() })
            .await?;
        self.send_local_offer(id)
    }

    /// Ensures a caller session for `id` exists and queues offer generation.
    pub fn send_local_offer(&self, id: PeerId) -> NegotiationResult<()> {
        if id == self.local_id {
            return Err(NegotiationError::SelfPairing(id));
        }
        let handle = match self.open_session(id.clone(), Role::Caller) {
            Ok(handle) => handle,
            Err(existing) if existing.role() == Role::Caller => existing,
            Err(_) => {
                self.report_duplicate(&id, "local offer");
                return Err(NegotiationError::DuplicateSession { peer: id });
            }
        };
        if handle.send(SessionCommand::StartOffer) {
            Ok(())
        } else {
            Err(NegotiationError::SessionClosed { peer: id })
        }
    }

    /// Queues a close for one session. Returns false if none was live.
    pub fn close_session(&self, id: &PeerId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|handle| handle.close(CloseReason::Requested))
    }

    /// Closes every session and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let handles = self.registry.close_all(CloseReason::Shutdown);
        tracing::info!(target: "negotiation", sessions = handles.len(), "shutting down negotiation");
        for handle in handles {
            handle.wait_closed().await;
        }
    }

    pub async fn handle_channel_event(&self, event: ChannelEvent) -> NegotiationResult<()> {
        match event {
            ChannelEvent::Opened => {
                tracing::info!(target: "signaling", local = %self.local_id, "signaling channel open");
                Ok(())
            }
            ChannelEvent::Message(message) => self.handle_inbound(message).await,
            ChannelEvent::Closed => {
                self.channel_lost("relay closed the connection".to_string());
                Ok(())
            }
            ChannelEvent::Error(reason) => {
                self.channel_lost(reason);
                Ok(())
            }
        }
    }

    /// Drives the coordinator from a channel's event stream until it ends.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(err) = self.handle_channel_event(event).await {
                tracing::debug!(target: "signaling", error = %err, "inbound message not applied");
            }
        }
        tracing::debug!(target: "signaling", "channel event stream ended");
    }

    async fn on_new_user(&self, id: PeerId) -> NegotiationResult<()> {
        if id == self.local_id {
            return Ok(());
        }
        if self.available.write().insert(id.clone()) {
            self.ctx
                .reporter
                .report(NegotiationReport::PeerAvailable { peer: id.clone() });
        }
        if self.ctx.config.pairing != PairingPolicy::AutoPair {
            return Ok(());
        }
        match self.request_pair(id).await {
            Err(NegotiationError::DuplicateSession { .. }) => Ok(()),
            other => other,
        }
    }

    fn on_pair_request(&self, id: PeerId) {
        if id == self.local_id {
            tracing::debug!(target: "signaling", "ignoring pair request naming the local id");
            return;
        }
        self.available.write().insert(id.clone());
        if self.open_session(id.clone(), Role::Callee).is_err() {
            self.report_duplicate(&id, "pair request");
        }
    }

    fn open_session(&self, id: PeerId, role: Role) -> Result<SessionHandle, SessionHandle> {
        let ctx = self.ctx.clone();
        let registry = Arc::downgrade(&self.registry);
        let key = id.clone();
        self.registry.insert_with(key, move |generation| {
            spawn_session(id, role, generation, ctx, registry)
        })
    }

    fn report_duplicate(&self, id: &PeerId, trigger: &'static str) {
        self.ctx.reporter.report(NegotiationReport::DuplicateSession {
            peer: id.clone(),
            trigger,
        });
    }

    fn channel_lost(&self, reason: String) {
        self.ctx
            .reporter
            .report(NegotiationReport::ChannelUnavailable { reason });
        self.registry.close_all(CloseReason::ChannelUnavailable);
    }
}
