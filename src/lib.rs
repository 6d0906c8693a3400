//! # zk-coordinator
//!
//! Thread-safe session and node/watch management for a ZooKeeper-style
//! coordination ensemble.
//!
//! ## What this crate provides
//!
//! - **Session lifecycle** - [`SessionManager`]: connect/close, server
//!   selection order, a single session-event handler, bounded "wait for
//!   state"
//! - **Node operations** - [`NodeManager`]: blocking CRUD over an
//!   asynchronous transport, one-shot watches keyed by path
//! - **Facade** - [`Client`] and [`ClientBuilder`]
//!
//! The wire protocol is **not** part of this crate. Plug a transport in
//! through [`transport::CoordinationTransport`];
//! [`transport::memory::MemoryEnsemble`] runs everything in process.
//!
//! ## Threading
//!
//! Application threads call in concurrently. Each open session owns one
//! event dispatcher thread that applies state changes and runs every
//! handler serially. Handlers must return promptly and must not block on
//! requests against the same session.

mod client;
mod config;
mod errors;
mod node;
mod pending;
mod session;
pub mod transport;
pub mod utils;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use node::*;
pub use session::*;

#[cfg(test)]
mod pending_test;
