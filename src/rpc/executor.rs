//! Failover executor
//!
//! Every outbound RPC call goes through [`FailoverExecutor::execute`], which
//! picks an endpoint from the registry, reports the outcome back into it, and
//! rotates to the next candidate on failure.

use chrono::Utc;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::client::{FeeEstimate, LedgerRpc};
use super::endpoint::{Endpoint, Network};
use super::registry::EndpointRegistry;

/// Runs remote operations with endpoint failover
#[derive(Clone)]
pub struct FailoverExecutor {
    registry: Arc<EndpointRegistry>,
    rpc: Arc<dyn LedgerRpc>,
}

impl FailoverExecutor {
    pub fn new(registry: Arc<EndpointRegistry>, rpc: Arc<dyn LedgerRpc>) -> Self {
        Self { registry, rpc }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Run `operation` against the selected endpoint, failing over on error
    ///
    /// Makes at most one attempt per pool candidate. Fails with
    /// [`Error::AllEndpointsUnreachable`] once every attempt has failed.
    pub async fn execute<T, F, Fut>(&self, network: Network, mut operation: F) -> Result<T>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.registry.pool_size(network);
        if max_attempts == 0 {
            return Err(Error::NoEndpointsConfigured(network));
        }

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let endpoint = self.registry.select(network)?;
            let url = endpoint.url.clone();
            let start = Instant::now();

            match operation(endpoint).await {
                Ok(value) => {
                    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                    debug!(
                        network = %network,
                        url = %url,
                        attempt,
                        latency_ms,
                        "RPC call succeeded"
                    );
                    self.registry
                        .record_result(network, &url, true, Some(latency_ms), Utc::now());
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        network = %network,
                        url = %url,
                        attempt,
                        max_attempts,
                        error = %e,
                        "RPC call failed"
                    );
                    self.registry
                        .record_result(network, &url, false, None, Utc::now());
                    last_error = e.to_string();

                    if attempt < max_attempts {
                        self.registry
                            .rotate_if_active(network, &url, &last_error)?;
                    }
                }
            }
        }

        Err(Error::AllEndpointsUnreachable {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Balance in lamports
    pub async fn get_balance(&self, network: Network, pubkey: &Pubkey) -> Result<u64> {
        self.execute(network, |endpoint| {
            let rpc = self.rpc.clone();
            let pubkey = *pubkey;
            async move { rpc.balance(&endpoint.url, &pubkey).await }
        })
        .await
    }

    pub async fn get_latest_blockhash(&self, network: Network) -> Result<Hash> {
        self.execute(network, |endpoint| {
            let rpc = self.rpc.clone();
            async move { rpc.latest_blockhash(&endpoint.url).await }
        })
        .await
    }

    pub async fn get_fee_estimate(&self, network: Network) -> Result<FeeEstimate> {
        self.execute(network, |endpoint| {
            let rpc = self.rpc.clone();
            async move { rpc.fee_estimate(&endpoint.url).await }
        })
        .await
    }
}
