use crate::message::{IceCandidate, SessionDescription};
use crate::peer_id::PeerId;
use crate::registry::SessionRegistry;
use crate::report::CloseReason;
use crate::session::{NegotiationState, PeerSession, Role, SessionContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};

pub(crate) enum SessionCommand {
    StartOffer,
    RemoteDescription(SessionDescription),
    RemoteCandidate(IceCandidate),
    Close(CloseReason),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Point-in-time view of a session, answered by its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: PeerId,
    pub role: Role,
    pub state: NegotiationState,
    pub pending_candidates: usize,
    pub has_transport: bool,
}

/// Address of a running session task. Cheap to clone; the task itself owns the
/// [`PeerSession`].
#[derive(Clone)]
pub struct SessionHandle {
    id: PeerId,
    role: Role,
    generation: u64,
    mailbox: mpsc::UnboundedSender<SessionCommand>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.mailbox.is_closed()
    }

    pub(crate) fn send(&self, command: SessionCommand) -> bool {
        self.mailbox.send(command).is_ok()
    }

    /// Marks the session closed and queues the close. Returns false when the
    /// session was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.send(SessionCommand::Close(reason))
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    /// Resolves once the session task has released its registry entry and exited.
    pub async fn wait_closed(&self) {
        self.mailbox.closed().await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) fn spawn_session(
    id: PeerId,
    role: Role,
    generation: u64,
    ctx: Arc<SessionContext>,
    registry: Weak<SessionRegistry>,
) -> SessionHandle {
    let (mailbox, mut commands) = mpsc::unbounded_channel();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let mut session = PeerSession::new(id.clone(), role, ctx, events_tx, closed.clone());

    tracing::debug!(target: "negotiation", peer = %id, role = ?role, generation, "spawning session");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => dispatch(&mut session, command).await,
                    None => session.close(CloseReason::Shutdown).await,
                },
                Some(event) = events.recv() => session.on_transport_event(event).await,
            }
            if session.state().is_closed() {
                break;
            }
        }
        if let Some(registry) = registry.upgrade() {
            registry.release(session.id(), generation);
        }
        commands.close();
        // Commands queued behind the close still get an answer; candidates
        // among them are reported as dropped.
        while let Ok(command) = commands.try_recv() {
            dispatch(&mut session, command).await;
        }
    });

    SessionHandle {
        id,
        role,
        generation,
        mailbox,
        closed,
    }
}

async fn dispatch(session: &mut PeerSession, command: SessionCommand) {
    let result = match command {
        SessionCommand::StartOffer => session.start_local_offer().await,
        SessionCommand::RemoteDescription(description) => {
            session.apply_remote_description(description).await
        }
        SessionCommand::RemoteCandidate(candidate) => {
            session.apply_remote_candidate(candidate).await;
            Ok(())
        }
        SessionCommand::Close(reason) => {
            session.close(reason).await;
            Ok(())
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(SessionSnapshot {
                id: session.id().clone(),
                role: session.role(),
                state: session.state(),
                pending_candidates: session.pending_candidates(),
                has_transport: session.has_transport(),
            });
            Ok(())
        }
    };
    if let Err(err) = result {
        // Already reported by the session; keep the task alive unless it closed.
        tracing::debug!(target: "negotiation", peer = %session.id(), error = %err, "session command failed");
    }
}

#[cfg(test)]
pub(crate) fn detached_handle(
    id: PeerId,
    generation: u64,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionCommand>) {
    let (mailbox, commands) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        id,
        role: Role::Callee,
        generation,
        mailbox,
        closed: Arc::new(AtomicBool::new(false)),
    };
    (handle, commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Outbox, SignalingChannel};
    use crate::config::NegotiationConfig;
    use crate::mock::{MockChannel, MockTransport, StaticMedia};
    use crate::report::{DropReason, NegotiationReport, Reporter};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn candidates_queued_behind_close_are_reported_dropped() {
        let (reporter, mut reports) = Reporter::channel();
        let channel: Arc<dyn SignalingChannel> = Arc::new(MockChannel::new());
        let ctx = Arc::new(SessionContext {
            config: NegotiationConfig::default(),
            transports: Arc::new(MockTransport::new()),
            media: Arc::new(StaticMedia::microphone()),
            outbox: Outbox::new(channel),
            reporter,
        });
        let peer = PeerId::from("Q7");
        let handle = spawn_session(peer.clone(), Role::Callee, 1, ctx, Weak::new());

        // Both are queued before the task first runs.
        assert!(handle.close(CloseReason::Requested));
        assert!(handle.send(SessionCommand::RemoteCandidate(IceCandidate::new(
            "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
            Some(0),
        ))));
        handle.wait_closed().await;

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let report = timeout(Duration::from_secs(2), reports.recv())
                .await
                .expect("timed out waiting for report")
                .expect("report stream open");
            seen.push(report);
        }
        assert_eq!(
            seen,
            vec![
                NegotiationReport::SessionClosed {
                    peer: peer.clone(),
                    reason: CloseReason::Requested,
                },
                NegotiationReport::CandidateDropped {
                    peer,
                    reason: DropReason::SessionClosed,
                },
            ]
        );
        assert!(!handle.send(SessionCommand::StartOffer));
    }
}
