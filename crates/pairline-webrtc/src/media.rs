use async_trait::async_trait;
use bytes::Bytes;
use pairline_core::{LocalSource, MediaConstraints, MediaSource, PeerId, SourceError, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub const OPUS_FRAME: Duration = Duration::from_millis(20);

/// One 20 ms Opus frame of digital silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Local source for headless endpoints: an audio track carrying Opus silence.
/// There is no capture device, so video requests are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudioSource;

#[async_trait]
impl MediaSource for SilentAudioSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalSource, SourceError> {
        if !constraints.audio {
            return Err(SourceError::Unavailable(
                "only audio capture is available".into(),
            ));
        }
        Ok(LocalSource {
            label: "silence".into(),
            audio: true,
            video: false,
        })
    }
}

/// Adds an Opus track to `pc` and starts feeding it silence. Returns the tasks
/// the caller must abort when the connection goes away.
pub(crate) async fn attach_silent_audio(
    pc: &RTCPeerConnection,
    peer: &PeerId,
) -> Result<Vec<JoinHandle<()>>, TransportError> {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        format!("audio-{peer}"),
        format!("pairline-{peer}"),
    ));
    let sender = pc
        .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|err| TransportError::Setup(err.to_string()))?;

    // RTCP has to be read for interceptors (NACK, reports) to make progress.
    let rtcp = tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME);
        loop {
            ticker.tick().await;
            let sample = Sample {
                data: Bytes::from_static(&OPUS_SILENCE),
                duration: OPUS_FRAME,
                ..Default::default()
            };
            if let Err(err) = track.write_sample(&sample).await {
                tracing::debug!(target: "webrtc", peer = %writer_peer, error = %err, "audio track closed");
                break;
            }
        }
    });

    tracing::debug!(target: "webrtc", peer = %peer, "attached silent audio track");
    Ok(vec![rtcp, writer])
}
