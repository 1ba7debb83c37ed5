//! Two-layer fan-out bus.
//!
//! The **durable** layer is an at-least-once pub/sub with persistent
//! streams and named durable consumers; it carries the authoritative
//! persisted-event subjects between backend services. The **ephemeral**
//! layer is a fire-and-forget pub/sub keyed by user channel; it exists only
//! to route outbound envelopes to whichever gateway instance holds the
//! target user's socket. A TTL'd key/value seam rides alongside for
//! presence markers, typing markers, participant caches, and rate-limit
//! counters.
//!
//! All three seams are traits so tests and single-node deployments can run
//! on the in-memory backends.

pub mod durable;
pub mod ephemeral;
pub mod error;
pub mod memory;
pub mod nats;
pub mod redis;
pub mod subjects;

pub use durable::{DurableBus, DurableDelivery, DurableSubscription};
pub use ephemeral::{EphemeralBus, EphemeralSubscription, KeyValueStore};
pub use error::BusError;
pub use memory::{MemoryDurableBus, MemoryEphemeralBus, MemoryKv};
pub use nats::JetStreamBus;
pub use redis::{RedisBus, RedisKv};
