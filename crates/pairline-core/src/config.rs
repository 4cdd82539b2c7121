use crate::media::MediaConstraints;
use std::env;

pub const DEFAULT_CANDIDATE_CAP: usize = 64;
pub const DEFAULT_STUN_URL: &str = "stun:global.stun.twilio.com:3478?transport=udp";

/// Who starts a negotiation when the relay announces a new peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPolicy {
    /// Pairing only happens through an explicit `request_pair` call.
    #[default]
    Explicit,
    /// Every `NewUser` announcement triggers a pairing request.
    AutoPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
        }
    }
}

/// Negotiation settings shared by every session a coordinator creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Upper bound on remote candidates held before a remote description exists.
    pub candidate_cap: usize,
    pub pairing: PairingPolicy,
    pub transport: TransportConfig,
    pub media: MediaConstraints,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            candidate_cap: DEFAULT_CANDIDATE_CAP,
            pairing: PairingPolicy::default(),
            transport: TransportConfig::default(),
            media: MediaConstraints::default(),
        }
    }
}

impl NegotiationConfig {
    /// Load configuration from `PAIRLINE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let candidate_cap = env::var("PAIRLINE_CANDIDATE_CAP")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|cap: &usize| *cap > 0)
            .unwrap_or(defaults.candidate_cap);
        let pairing = if env_flag("PAIRLINE_AUTO_PAIR").unwrap_or(false) {
            PairingPolicy::AutoPair
        } else {
            PairingPolicy::Explicit
        };

        let mut ice_servers = Vec::new();
        let stun_urls = env_list("PAIRLINE_STUN_URLS");
        match stun_urls {
            Some(urls) => ice_servers.extend(urls.into_iter().map(IceServer::stun)),
            None => ice_servers.extend(defaults.transport.ice_servers),
        }
        if let Some(urls) = env_list("PAIRLINE_TURN_URLS") {
            ice_servers.push(IceServer {
                urls,
                username: env::var("PAIRLINE_TURN_USERNAME").ok(),
                credential: env::var("PAIRLINE_TURN_CREDENTIAL").ok(),
            });
        }

        let media = MediaConstraints {
            audio: env_flag("PAIRLINE_MEDIA_AUDIO").unwrap_or(defaults.media.audio),
            video: env_flag("PAIRLINE_MEDIA_VIDEO").unwrap_or(defaults.media.video),
        };

        Self {
            candidate_cap,
            pairing,
            transport: TransportConfig { ice_servers },
            media,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let urls: Vec<String> = env::var(key)
        .ok()?
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect();
    (!urls.is_empty()).then_some(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not interleave.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const KEYS: &[&str] = &[
        "PAIRLINE_CANDIDATE_CAP",
        "PAIRLINE_AUTO_PAIR",
        "PAIRLINE_STUN_URLS",
        "PAIRLINE_TURN_URLS",
        "PAIRLINE_TURN_USERNAME",
        "PAIRLINE_TURN_CREDENTIAL",
        "PAIRLINE_MEDIA_AUDIO",
        "PAIRLINE_MEDIA_VIDEO",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = NegotiationConfig::default();
        assert_eq!(config.candidate_cap, 64);
        assert_eq!(config.pairing, PairingPolicy::Explicit);
        assert_eq!(config.transport.ice_servers, vec![IceServer::stun(DEFAULT_STUN_URL)]);
        assert!(config.media.audio);
        assert!(!config.media.video);
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(NegotiationConfig::from_env(), NegotiationConfig::default());
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("PAIRLINE_CANDIDATE_CAP", "8");
            env::set_var("PAIRLINE_AUTO_PAIR", "true");
            env::set_var("PAIRLINE_STUN_URLS", "stun:a.example:3478, stun:b.example:3478");
            env::set_var("PAIRLINE_TURN_URLS", "turn:t.example:3478?transport=tcp");
            env::set_var("PAIRLINE_TURN_USERNAME", "user");
            env::set_var("PAIRLINE_TURN_CREDENTIAL", "secret");
            env::set_var("PAIRLINE_MEDIA_VIDEO", "1");
        }

        let config = NegotiationConfig::from_env();
        clear_env();

        assert_eq!(config.candidate_cap, 8);
        assert_eq!(config.pairing, PairingPolicy::AutoPair);
        assert!(config.media.video);
        assert_eq!(config.transport.ice_servers.len(), 3);
        assert_eq!(config.transport.ice_servers[1].urls, vec!["stun:b.example:3478"]);
        let turn = &config.transport.ice_servers[2];
        assert_eq!(turn.username.as_deref(), Some("user"));
        assert_eq!(turn.credential.as_deref(), Some("secret"));
    }

    #[test]
    fn zero_candidate_cap_falls_back_to_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("PAIRLINE_CANDIDATE_CAP", "0");
        }
        let config = NegotiationConfig::from_env();
        clear_env();
        assert_eq!(config.candidate_cap, DEFAULT_CANDIDATE_CAP);
    }
}
