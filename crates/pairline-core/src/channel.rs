use crate::message::SignalingMessage;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("signaling channel closed")]
    Closed,
    #[error("signaling send failed: {0}")]
    Send(String),
}

/// Everything the relay connection can tell the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(SignalingMessage),
    Closed,
    Error(String),
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalingMessage) -> Result<(), ChannelError>;
}

/// The coordinator's single exit point towards the relay.
#[derive(Clone)]
pub struct Outbox {
    channel: Arc<dyn SignalingChannel>,
}

impl Outbox {
    pub fn new(channel: Arc<dyn SignalingChannel>) -> Self {
        Self { channel }
    }

    pub async fn emit(&self, message: SignalingMessage) -> Result<(), ChannelError> {
        tracing::debug!(
            target: "signaling",
            peer = %message.peer_id(),
            action = message.kind(),
            "emitting signaling message"
        );
        self.channel.send(message).await.inspect_err(|err| {
            tracing::warn!(target: "signaling", error = %err, "failed to emit signaling message");
        })
    }
}
