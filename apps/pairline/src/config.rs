use pairline_core::NegotiationConfig;
use std::env;

pub const DEFAULT_SIGNALING_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_ROOM_PATH: &str = "websocket/dssn";

/// Pairline client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Relay base URL; `http(s)` is mapped to `ws(s)` when connecting.
    pub signaling_url: String,
    /// Path under the relay where clients join, followed by their own id.
    pub room_path: String,
    /// Fixed local id; a random one is generated when unset.
    pub peer_id: Option<String>,
    pub negotiation: NegotiationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            room_path: DEFAULT_ROOM_PATH.to_string(),
            peer_id: None,
            negotiation: NegotiationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let signaling_url = env::var("PAIRLINE_SIGNALING_URL")
            .map(|url| normalize_localhost(&url))
            .unwrap_or_else(|_| DEFAULT_SIGNALING_URL.to_string());
        let room_path =
            env::var("PAIRLINE_ROOM_PATH").unwrap_or_else(|_| DEFAULT_ROOM_PATH.to_string());
        let peer_id = env::var("PAIRLINE_PEER_ID")
            .ok()
            .filter(|id| !id.trim().is_empty());
        Self {
            signaling_url,
            room_path,
            peer_id,
            negotiation: NegotiationConfig::from_env(),
        }
    }
}

/// Prefer IPv4 loopback so the relay is not reached over `::1` by accident.
pub fn normalize_localhost(url: &str) -> String {
    for scheme in ["http://", "https://", "ws://", "wss://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            if rest == "localhost" || rest.starts_with("localhost:") || rest.starts_with("localhost/") {
                return format!("{scheme}127.0.0.1{}", &rest["localhost".len()..]);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        for key in [
            "PAIRLINE_SIGNALING_URL",
            "PAIRLINE_ROOM_PATH",
            "PAIRLINE_PEER_ID",
            "PAIRLINE_CANDIDATE_CAP",
            "PAIRLINE_AUTO_PAIR",
        ] {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.room_path, DEFAULT_ROOM_PATH);
        assert_eq!(config.peer_id, None);
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("PAIRLINE_SIGNALING_URL", "https://relay.example.com");
            env::set_var("PAIRLINE_ROOM_PATH", "rooms/lobby");
            env::set_var("PAIRLINE_PEER_ID", "AB3X9");
            env::set_var("PAIRLINE_CANDIDATE_CAP", "16");
        }
        let config = AppConfig::from_env();
        clear_env();

        assert_eq!(config.signaling_url, "https://relay.example.com");
        assert_eq!(config.room_path, "rooms/lobby");
        assert_eq!(config.peer_id.as_deref(), Some("AB3X9"));
        assert_eq!(config.negotiation.candidate_cap, 16);
    }

    #[test]
    fn test_config_localhost_normalization() {
        assert_eq!(normalize_localhost("http://localhost:8080"), "http://127.0.0.1:8080");
        assert_eq!(normalize_localhost("ws://localhost/relay"), "ws://127.0.0.1/relay");
        assert_eq!(normalize_localhost("https://localhost.example"), "https://localhost.example");
    }
}
