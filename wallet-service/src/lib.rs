//! Service context of the wallet connector.
//!
//! Holds wallet state and the registries behind it: site whitelist, sync
//! coordinator, protocol parameter cache, UI subscriptions and the gated
//! pollers. Relay ports are served by [`listener::serve_channel`]; the wallet's
//! own UI talks to [`admin_api::AdminApi`].

pub mod admin_api;
pub mod backend;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod listener;
pub mod network;
pub mod params;
pub mod pollers;
pub mod service;
pub mod signer;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod whitelist;

#[cfg(test)]
mod testing;

pub use service::{ServiceDeps, WalletService};
