use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use {
    parley_bus::{DurableBus, EphemeralBus, KeyValueStore},
    parley_chats::ChatService,
    parley_config::{ParleyConfig, RateLimitConfig, SocketConfig},
    parley_messages::MessageService,
    parley_presence::{PresenceStore, PresenceTracker},
};

use crate::{auth::AuthVerifier, registry::ConnectionRegistry};

/// Domain services the gateway talks to.
#[derive(Clone)]
pub struct GatewayServices {
    pub messages: Arc<dyn MessageService>,
    pub chats: Arc<dyn ChatService>,
}

/// Upgrade-time authentication policy.
pub struct AuthSettings {
    /// Accept `X-User-ID` / `X-User-Phone` set by the API gateway.
    pub trust_gateway_headers: bool,
    /// Token verifier for connections that arrive without trusted headers.
    pub verifier: Option<Arc<dyn AuthVerifier>>,
    pub allowed_origins: Vec<String>,
    pub allow_any_origin: bool,
}

/// Shared gateway runtime state, wrapped in `Arc` for use across tasks.
pub struct GatewayState {
    pub registry: ConnectionRegistry,
    pub services: GatewayServices,
    pub durable: Arc<dyn DurableBus>,
    pub ephemeral: Arc<dyn EphemeralBus>,
    pub kv: Arc<dyn KeyValueStore>,
    pub presence: PresenceStore,
    pub tracker: PresenceTracker,
    pub auth: AuthSettings,
    pub socket: SocketConfig,
    pub rate_limit: RateLimitConfig,
    /// TTL of the cached participant list per chat.
    pub participants_ttl: Duration,
    /// Cancelled once at process shutdown; every long-lived task observes it.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        config: &ParleyConfig,
        services: GatewayServices,
        durable: Arc<dyn DurableBus>,
        ephemeral: Arc<dyn EphemeralBus>,
        kv: Arc<dyn KeyValueStore>,
        verifier: Option<Arc<dyn AuthVerifier>>,
    ) -> Arc<Self> {
        let presence = PresenceStore::new(
            kv.clone(),
            Duration::from_secs(config.presence.ttl_secs),
            Duration::from_secs(config.presence.typing_ttl_secs),
        );
        Arc::new(Self {
            registry: ConnectionRegistry::new(),
            services,
            durable,
            ephemeral,
            kv,
            presence,
            tracker: PresenceTracker::new(),
            auth: AuthSettings {
                trust_gateway_headers: config.auth.trust_gateway_headers,
                verifier,
                allowed_origins: config.auth.allowed_origins.clone(),
                allow_any_origin: config.auth.allow_any_origin,
            },
            socket: config.socket.clone(),
            rate_limit: config.rate_limit.clone(),
            participants_ttl: Duration::from_secs(config.presence.participants_ttl_secs),
            shutdown: CancellationToken::new(),
        })
    }
}
