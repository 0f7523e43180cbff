//! Relay context: forwards connector messages between pages and the wallet
//! service. Holds no wallet data; it only checks message direction and stamps
//! connect requests with the origin it observed.

pub mod bridge;
pub mod config;
pub mod server;

pub use bridge::{bridge, BridgeSummary, ClosedBy};
pub use config::{ConfigFile, RelayConfig};
pub use server::Relay;
