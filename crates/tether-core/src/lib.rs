//! Application layer for tether clients.
//!
//! Ties the RPC client to what a UI needs around it: configuration, a
//! named-topic event bus, persisted display data and a session object that
//! owns all three.

pub mod bus;
pub mod cache;
pub mod config;
pub mod session;

mod error;

#[cfg(test)]
mod tests;

pub use bus::{AppEvent, EventBus, EventStream};
pub use cache::DisplayCache;
pub use config::{Config, Directories};
pub use error::{Error, Result};
pub use session::Session;

pub use tether_types::*;
