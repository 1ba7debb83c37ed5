//! Gateway: the real-time delivery core.
//!
//! Lifecycle:
//! 1. Authenticate the WebSocket upgrade (trusted headers or token RPC)
//! 2. Run one read pump + one write pump + one ephemeral-bus subscriber
//!    per connection
//! 3. Route inbound envelopes through the event router
//! 4. Consume durable-bus subjects and fan out per-user envelopes on the
//!    ephemeral bus
//!
//! Message and chat semantics live in their own crates and are reached
//! through the service traits wired into [`state::GatewayState`].

pub mod auth;
pub mod error;
pub mod fanout;
pub mod participants;
pub mod ratelimit;
pub mod registry;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;
pub mod subscriber;
pub mod ws;

pub use server::{build_app, run};
pub use state::{GatewayServices, GatewayState};
