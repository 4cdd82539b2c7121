use async_trait::async_trait;
use thiserror::Error;

/// What the local endpoint wants to capture. Defaults to audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// A captured source a transport can attach as outgoing tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    pub label: String,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("media source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalSource, SourceError>;
}
