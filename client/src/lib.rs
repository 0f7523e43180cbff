//! Page-side connector API.
//!
//! A page creates one [`ConnectorClient`] over a port to the relay, calls
//! [`ConnectorClient::enable`] and then talks to the wallet through the
//! returned [`WalletApi`].

mod api;
mod client;
pub mod connection;
pub mod multiplexer;

pub use api::{AuthApi, WalletApi};
pub use client::{ClientConfig, ConnectorClient, EnableOptions};
pub use connection::ConnectionState;
pub use multiplexer::Multiplexer;
