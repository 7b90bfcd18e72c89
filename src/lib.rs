//! Treasury Custody Core
//!
//! Encrypted key custody with inactivity auto-lock, plus a resilient Solana RPC
//! layer with per-network endpoint pools, health monitoring and failover.

pub mod cli;
pub mod config;
pub mod error;
pub mod rpc;
pub mod session;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use session::SessionController;
