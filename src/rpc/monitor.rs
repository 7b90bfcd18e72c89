//! Background RPC endpoint health monitoring
//!
//! Periodically pings every candidate of the active network and feeds the
//! results into the registry. If the active endpoint turns out unhealthy after
//! a pass, the pool advances.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::client::LedgerRpc;
use super::endpoint::{Endpoint, HealthStatus, Network};
use super::registry::EndpointRegistry;

pub const MIN_INTERVAL_SECS: u64 = 15;
pub const MAX_INTERVAL_SECS: u64 = 60;

/// Clamp a requested poll interval into the supported range
pub fn clamp_interval(requested_secs: u64) -> Duration {
    Duration::from_secs(requested_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS))
}

/// Outcome of probing one endpoint
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub healthy: bool,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

/// Outcome of one full probe pass
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub network: Network,
    pub results: Vec<ProbeResult>,
    /// Active endpoint after the pass
    pub active: Option<Endpoint>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeReport {
    pub fn healthy_count(&self) -> usize {
        self.results.iter().filter(|r| r.healthy).count()
    }
}

/// Periodic prober for the active network's endpoint pool
pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    rpc: Arc<dyn LedgerRpc>,
    interval: Duration,
    /// Set while the schedule is running
    schedule: Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    /// Create a monitor; `interval_secs` is clamped to 15..=60
    pub fn new(
        registry: Arc<EndpointRegistry>,
        rpc: Arc<dyn LedgerRpc>,
        interval_secs: u64,
    ) -> Self {
        let interval = clamp_interval(interval_secs);
        if interval.as_secs() != interval_secs {
            debug!(
                requested = interval_secs,
                effective = interval.as_secs(),
                "Clamped health poll interval"
            );
        }

        Self {
            registry,
            rpc,
            interval,
            schedule: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Probe once immediately, then keep probing on the interval
    pub async fn start(self: &Arc<Self>) -> Result<ProbeReport> {
        let report = self.probe().await?;

        let token = {
            let mut schedule = self
                .schedule
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if schedule.is_some() {
                return Ok(report);
            }
            let token = CancellationToken::new();
            *schedule = Some(token.clone());
            token
        };

        info!("Starting health monitor with {}s poll interval", self.interval.as_secs());

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + monitor.interval;
            let mut ticker = interval_at(start, monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.probe().await {
                            warn!("Health probe failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        });

        Ok(report)
    }

    /// Cancel the schedule; safe to call repeatedly
    pub fn stop(&self) {
        let token = self
            .schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Run one probe pass now, outside the schedule
    pub async fn force_poll(&self) -> Result<ProbeReport> {
        self.probe().await
    }

    /// Probe every candidate of the active network once
    pub async fn probe(&self) -> Result<ProbeReport> {
        let network = self.registry.active_network();
        let endpoints = self.registry.endpoints(network);

        let results = join_all(endpoints.iter().map(|endpoint| self.ping(&endpoint.url))).await;

        let checked_at = Utc::now();
        for result in &results {
            self.registry
                .record_result(network, &result.url, result.healthy, result.latency_ms, checked_at);
        }

        let active = if endpoints.is_empty() {
            None
        } else {
            let current = self.registry.active(network)?;
            if current.health == HealthStatus::Unhealthy {
                Some(self.registry.advance(network)?)
            } else {
                Some(current)
            }
        };

        let report = ProbeReport {
            network,
            results,
            active,
            checked_at,
        };
        debug!(
            network = %network,
            healthy = report.healthy_count(),
            total = report.results.len(),
            "Health probe complete"
        );
        Ok(report)
    }

    async fn ping(&self, url: &str) -> ProbeResult {
        let start = Instant::now();
        match self.rpc.health(url).await {
            Ok(()) => ProbeResult {
                url: url.to_string(),
                healthy: true,
                latency_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => {
                debug!(url = %url, error = %e, "Endpoint failed health check");
                ProbeResult {
                    url: url.to_string(),
                    healthy: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
