//! Invalidation Module
//!
//! Lets any collaborator declare a key or namespace stale and have the cache
//! react asynchronously.

mod bus;
mod event;
mod listener;

pub use bus::{InvalidationBus, BUS_CAPACITY, HISTORY_LIMIT};
pub use event::{InvalidationEvent, InvalidationReason, InvalidationTarget, Metadata};
pub use listener::{spawn_invalidation_listener, InvalidationHandler};
