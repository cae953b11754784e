//! Implementations of the ports.
//!
//! - `InMemoryWorkOrderStore`: single process, no durability
//! - `RedisWorkOrderStore`: durable, shareable between orchestrator instances
//! - `StaticCredentials`: fixed tokens per remote service

pub mod credentials;
pub mod memory_store;
pub mod redis_store;

pub use self::credentials::StaticCredentials;
pub use self::memory_store::InMemoryWorkOrderStore;
pub use self::redis_store::{RedisKeys, RedisWorkOrderStore};
