//! Endpoint resilience layer
//!
//! Per-network RPC endpoint pools with live health tracking and failover.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor ──► EndpointRegistry ◄── FailoverExecutor ──► LedgerRpc
//!                         │
//!                   RegistryEvent subscribers
//! ```

pub mod client;
pub mod endpoint;
pub mod executor;
pub mod monitor;
pub mod registry;

pub use client::{FeeEstimate, LedgerRpc, SolanaRpc};
pub use endpoint::{Endpoint, EndpointConfig, HealthStatus, Network};
pub use executor::FailoverExecutor;
pub use monitor::{HealthMonitor, ProbeReport, ProbeResult};
pub use registry::{EndpointPool, EndpointRegistry, RegistryEvent};
