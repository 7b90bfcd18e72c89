//! Remote ledger capability
//!
//! The four read-only calls the core needs from a Solana RPC node, behind a
//! trait so failover and health probing can be exercised without a network.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use solana_client::client_error::Result as ClientResult;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Priority fee snapshot in micro-lamports per compute unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub median_micro_lamports: u64,
    pub max_micro_lamports: u64,
    pub samples: usize,
}

impl FeeEstimate {
    /// Summarize a window of recent prioritization fees
    pub fn from_samples(mut fees: Vec<u64>) -> Self {
        if fees.is_empty() {
            return Self::default();
        }
        fees.sort_unstable();
        Self {
            median_micro_lamports: fees[fees.len() / 2],
            max_micro_lamports: fees[fees.len() - 1],
            samples: fees.len(),
        }
    }
}

/// Calls the core makes against a ledger RPC endpoint
///
/// Any error is treated as an endpoint failure by the caller.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Cheap liveness check
    async fn health(&self, url: &str) -> Result<()>;

    async fn latest_blockhash(&self, url: &str) -> Result<Hash>;

    /// Balance in lamports
    async fn balance(&self, url: &str, pubkey: &Pubkey) -> Result<u64>;

    async fn fee_estimate(&self, url: &str) -> Result<FeeEstimate>;
}

/// Solana JSON-RPC implementation backed by the nonblocking client
pub struct SolanaRpc {
    timeout: Duration,
    /// One client per url, created on first use
    clients: DashMap<String, Arc<RpcClient>>,
}

impl SolanaRpc {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: DashMap::new(),
        }
    }

    fn client(&self, url: &str) -> Arc<RpcClient> {
        self.clients
            .entry(url.to_string())
            .or_insert_with(|| {
                debug!(url = %url, "Creating RPC client");
                Arc::new(RpcClient::new_with_timeout(url.to_string(), self.timeout))
            })
            .value()
            .clone()
    }

    async fn bounded<T>(&self, call: impl Future<Output = ClientResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::RpcTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn health(&self, url: &str) -> Result<()> {
        let client = self.client(url);
        self.bounded(client.get_health()).await
    }

    async fn latest_blockhash(&self, url: &str) -> Result<Hash> {
        let client = self.client(url);
        self.bounded(client.get_latest_blockhash()).await
    }

    async fn balance(&self, url: &str, pubkey: &Pubkey) -> Result<u64> {
        let client = self.client(url);
        self.bounded(client.get_balance(pubkey)).await
    }

    async fn fee_estimate(&self, url: &str) -> Result<FeeEstimate> {
        // Note: Not every RPC provider serves this method
        let client = self.client(url);
        let fees = self.bounded(client.get_recent_prioritization_fees(&[])).await?;
        Ok(FeeEstimate::from_samples(
            fees.iter().map(|f| f.prioritization_fee).collect(),
        ))
    }
}
