//! Configuration: typed schema, file loading with env substitution, and
//! standard-location discovery.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use loader::{discover_and_load, load_config};
pub use schema::{
    AuthConfig, DatabaseConfig, NatsConfig, ParleyConfig, PresenceConfig, RateLimitConfig,
    RedisConfig, ServerConfig, SocketConfig, SweeperConfig,
};
