//! # veltime
//!
//! Embedded velocity tracking: count occurrences or sum amounts per key over
//! a sliding window of minutes, and answer "has this key been seen N times, or
//! for value V, within the last D minutes?" inline in a decision pipeline.
//!
//! ## Architecture
//!
//! - **Keys**: identifiers are hashed once to a dense 64-bit key
//!   ([`dense_key`]), stable across restarts.
//! - **Records**: each key holds a bounded, newest-first history of window
//!   slots ([`Record`]), encoded at 8 bytes per slot ([`codec`]).
//! - **Stores**: a [`Store`] keeps encoded records, either on the heap
//!   ([`MemoryStore`], backed by [`LongMap`]) or through any key -> bytes
//!   [`Backend`] ([`BackendStore`]).
//! - **Engine**: [`Velocity`] runs the window update ([`window::advance`])
//!   under a per-key lock and answers the queries. Stale records are purged
//!   opportunistically.
//! - **Registry**: named instances and pluggable backend kinds
//!   ([`registry`]).
//!
//! ## Example
//!
//! ```rust
//! use veltime::{MemoryStore, Velocity, VelocityConfig};
//!
//! let vel = Velocity::new("cards", Box::new(MemoryStore::new()), VelocityConfig::default());
//! let card = "4111111111111111";
//!
//! // Two hits a minute apart inside a 5 minute window.
//! assert_eq!(vel.vel_count(card, 5, "2014-06-04 12:12:00"), 1);
//! assert_eq!(vel.vel_count(card, 5, "2014-06-04 12:13:00"), 2);
//!
//! // A third window opens: three hits reaches the threshold.
//! assert!(!vel.vel_or(card, 3, 0.0, 0.0, 5, "2014-06-04 12:14:00"));
//! ```

#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod map;
pub mod record;
pub mod registry;
pub mod store;
pub mod text;
pub mod time;
pub mod window;

pub use config::VelocityConfig;
pub use engine::{Stats, Subject, Velocity};
pub use error::{CodecError, Error, Result};
pub use hasher::{dense_key, obscure};
pub use map::LongMap;
pub use record::{from_fix, to_fix, Record, Slot};
pub use registry::{Factory, Registry};
pub use store::{Backend, BackendStore, MemoryStore, OrderedBackend, Store};
pub use time::{Unit, When};

#[cfg(test)]
mod proptests;
