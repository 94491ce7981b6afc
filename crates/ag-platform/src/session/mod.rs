//! Session persistence: record shape, store trait, Redis and in-memory
//! implementations.

pub mod memory;
pub mod record;
pub mod redis_store;
pub mod store;

pub use memory::MemorySessionStore;
pub use record::{device_from_user_agent, SessionRecord, SessionWithSid};
pub use redis_store::RedisSessionStore;
pub use store::{SessionMutator, SessionStore};
