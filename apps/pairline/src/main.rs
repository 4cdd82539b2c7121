mod config;
mod signaling;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use pairline_core::{NegotiationReport, PairingPolicy, PeerId, SignalingCoordinator};
use pairline_webrtc::{SilentAudioSource, WebRtcTransport};
use signaling::WebSocketChannel;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pairline")]
#[command(about = "Pair with peers over a signaling relay and negotiate WebRTC media sessions")]
struct Cli {
    /// Relay base URL (overrides PAIRLINE_SIGNALING_URL)
    #[arg(long, short = 's')]
    signaling_url: Option<String>,

    /// Relay path clients join under (overrides PAIRLINE_ROOM_PATH)
    #[arg(long)]
    room_path: Option<String>,

    /// Local identifier to announce instead of a random one
    #[arg(long)]
    peer_id: Option<String>,

    /// Peer to pair with once connected; may be repeated
    #[arg(long = "pair", short = 'p')]
    pair: Vec<String>,

    /// Pair with every peer the relay announces
    #[arg(long)]
    auto_pair: bool,

    /// Maximum remote candidates buffered per session before a remote description
    #[arg(long)]
    candidate_cap: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.signaling_url {
            config.signaling_url = config::normalize_localhost(url);
        }
        if let Some(path) = &self.room_path {
            config.room_path = path.clone();
        }
        if let Some(id) = &self.peer_id {
            config.peer_id = Some(id.clone());
        }
        if self.auto_pair {
            config.negotiation.pairing = PairingPolicy::AutoPair;
        }
        if let Some(cap) = self.candidate_cap.filter(|cap| *cap > 0) {
            config.negotiation.candidate_cap = cap;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    cli.apply(&mut config);

    let local_id = config
        .peer_id
        .clone()
        .map(PeerId::from)
        .unwrap_or_else(PeerId::generate);
    info!(
        local = %local_id,
        relay = %config.signaling_url,
        pairing = ?config.negotiation.pairing,
        "starting pairline"
    );

    let (channel, events) =
        WebSocketChannel::connect(&config.signaling_url, &config.room_path, &local_id)
            .await
            .context("connecting to signaling relay")?;
    info!(url = %channel.url(), "joined relay");

    let transport = WebRtcTransport::new().context("building webrtc api")?;
    let coordinator = Arc::new(SignalingCoordinator::new(
        local_id,
        config.negotiation.clone(),
        channel.clone(),
        Arc::new(transport),
        Arc::new(SilentAudioSource),
    ));

    let mut reports = coordinator
        .take_reports()
        .context("negotiation report stream already taken")?;
    // Reports are logged where they are raised; this loop only watches for a lost relay.
    let mut report_watch = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if let NegotiationReport::ChannelUnavailable { reason } = report {
                return reason;
            }
        }
        "report stream closed".to_string()
    });

    let runner_coordinator = Arc::clone(&coordinator);
    let mut runner = tokio::spawn(async move { runner_coordinator.run(events).await });

    for target in &cli.pair {
        if let Err(err) = coordinator.request_pair(PeerId::from(target.as_str())).await {
            warn!(peer = %target, error = %err, "pair request failed");
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for interrupt");
            }
            info!("interrupt received");
        }
        _ = &mut runner => info!("signaling event stream ended"),
        reason = &mut report_watch => {
            let reason = reason.unwrap_or_else(|err| err.to_string());
            warn!(reason = %reason, "signaling relay unavailable");
        }
    }

    coordinator.shutdown().await;
    runner.abort();
    report_watch.abort();
    Ok(())
}
