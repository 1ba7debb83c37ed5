use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub redis: RedisConfig,
    pub socket: SocketConfig,
    pub presence: PresenceConfig,
    pub rate_limit: RateLimitConfig,
    pub sweeper: SweeperConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8085,
        }
    }
}

/// Upgrade authentication and origin policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trust `X-User-ID` / `X-User-Phone` headers set by the API gateway.
    pub trust_gateway_headers: bool,
    /// Auth Service endpoint used to validate bearer tokens.
    pub verify_url: String,
    /// Origins accepted on WebSocket upgrade. An empty Origin header is
    /// always accepted (non-browser clients).
    pub allowed_origins: Vec<String>,
    /// Development override: accept any Origin.
    pub allow_any_origin: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            trust_gateway_headers: true,
            verify_url: "http://127.0.0.1:8081/internal/v1/verify".into(),
            allowed_origins: vec![
                "http://localhost".into(),
                "https://localhost".into(),
                "http://127.0.0.1".into(),
                "https://127.0.0.1".into(),
            ],
            allow_any_origin: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
        }
    }
}

/// Per-connection socket timings and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Maximum inbound frame size in bytes.
    pub max_frame_bytes: usize,
    /// Interval between server-sent pings.
    pub ping_interval_secs: u64,
    /// Read deadline: the connection is dropped when no frame (including
    /// pong) arrives within this window.
    pub pong_timeout_secs: u64,
    /// Write deadline for a single outbound frame.
    pub write_timeout_secs: u64,
    /// Bounded per-connection send queue; overflow drops the newest envelope.
    pub send_queue_len: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            ping_interval_secs: 25,
            pong_timeout_secs: 35,
            write_timeout_secs: 10,
            send_queue_len: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// TTL of the online marker.
    pub ttl_secs: u64,
    /// TTL of a typing marker.
    pub typing_ttl_secs: u64,
    /// TTL of the cached participant list per chat.
    pub participants_ttl_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            typing_ttl_secs: 5,
            participants_ttl_secs: 300,
        }
    }
}

/// Fixed-window rate limit applied to mutating HTTP routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_secs: 60,
        }
    }
}

/// Disappearing-messages sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_contract() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.socket.max_frame_bytes, 65536);
        assert_eq!(cfg.socket.ping_interval_secs, 25);
        assert_eq!(cfg.socket.pong_timeout_secs, 35);
        assert_eq!(cfg.socket.send_queue_len, 256);
        assert_eq!(cfg.presence.ttl_secs, 60);
        assert_eq!(cfg.presence.participants_ttl_secs, 300);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [auth]
            allow_any_origin = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert!(cfg.auth.allow_any_origin);
        assert_eq!(cfg.presence.ttl_secs, 60);
    }
}
