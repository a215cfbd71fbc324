//! Adaptive TTL Module
//!
//! Chooses entry lifetimes from the kind of data and when it is cached.

mod context;
mod engine;
mod policy;

pub use context::{DataClass, SystemLoad, TtlContext};
pub use engine::{TtlEngine, TtlSource};
pub use policy::{LoadMultipliers, TtlBand, TtlPolicy};
