//! Gantry: Gateway API controller registration and runtime
//!
//! One controller per watched kind reads objects through the manager's
//! client and publishes upsert/delete events onto a shared channel, which
//! the event loop drains in batches.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod reconciler;
pub mod startup;
