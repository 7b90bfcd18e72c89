//! Endpoint registry
//!
//! Owns the ordered candidate pool of every network and the health snapshot of
//! each candidate. All mutations go through one mutex, and subscribers are
//! notified inside that critical section so they never observe a state that has
//! already moved on.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::endpoint::{Endpoint, EndpointConfig, HealthStatus, Network};

/// Change notification published by the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// An endpoint's health classification changed
    HealthChanged {
        network: Network,
        previous: Endpoint,
        current: Endpoint,
    },
    /// The active endpoint of a network was switched
    Rotated {
        network: Network,
        previous: Endpoint,
        current: Endpoint,
        reason: String,
    },
}

pub type RegistryListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Ordered candidates for one network plus the active pointer
///
/// Candidates are kept sorted by ascending priority; the sort is stable so equal
/// priorities keep their configured order. Pool order is the scan order.
#[derive(Debug, Clone, Default)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    active_index: usize,
}

impl EndpointPool {
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort_by_key(|e| e.priority);
        Self {
            endpoints,
            active_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active(&self) -> Option<&Endpoint> {
        self.endpoints.get(self.active_index)
    }

    /// Index the next advance would land on
    ///
    /// Scans after the active index in pool order, wrapping, for the first
    /// candidate that is not known to be unhealthy. When every candidate is
    /// unhealthy the immediate next index is used so probing keeps moving.
    fn next_index(&self) -> usize {
        let len = self.endpoints.len();
        (1..=len)
            .map(|offset| (self.active_index + offset) % len)
            .find(|&i| self.endpoints[i].health.is_usable())
            .unwrap_or((self.active_index + 1) % len)
    }

    /// Move the active pointer; returns (previous, current)
    fn advance(&mut self) -> Option<(Endpoint, Endpoint)> {
        if self.endpoints.is_empty() {
            return None;
        }
        let previous = self.endpoints[self.active_index].clone();
        self.active_index = self.next_index();
        Some((previous, self.endpoints[self.active_index].clone()))
    }
}

struct RegistryState {
    pools: HashMap<Network, EndpointPool>,
    active_network: Network,
    listeners: Vec<RegistryListener>,
}

impl RegistryState {
    fn pool_mut(&mut self, network: Network) -> Result<&mut EndpointPool> {
        match self.pools.get_mut(&network) {
            Some(pool) if !pool.is_empty() => Ok(pool),
            _ => Err(Error::NoEndpointsConfigured(network)),
        }
    }

    fn emit(&self, event: RegistryEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Advance and publish a rotation event if `always_emit` or the active endpoint changed
    fn advance(
        &mut self,
        network: Network,
        reason: &str,
        always_emit: bool,
    ) -> Result<(Endpoint, Endpoint)> {
        let pool = self.pool_mut(network)?;
        let before = pool.active_index();
        let (previous, current) = pool
            .advance()
            .ok_or(Error::NoEndpointsConfigured(network))?;
        let changed = pool.active_index() != before;

        if changed || always_emit {
            info!(
                network = %network,
                from = %previous.url,
                to = %current.url,
                reason = %reason,
                "Rotated RPC endpoint"
            );
            self.emit(RegistryEvent::Rotated {
                network,
                previous: previous.clone(),
                current: current.clone(),
                reason: reason.to_string(),
            });
        }

        Ok((previous, current))
    }
}

/// Per-network endpoint pools with live health tracking
pub struct EndpointRegistry {
    state: Mutex<RegistryState>,
}

impl EndpointRegistry {
    /// Create an empty registry
    pub fn new(active_network: Network) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                pools: HashMap::new(),
                active_network,
                listeners: Vec::new(),
            }),
        }
    }

    /// Create a registry seeded from static endpoint configuration
    pub fn from_config(
        pools: &HashMap<Network, Vec<EndpointConfig>>,
        active_network: Network,
    ) -> Self {
        let registry = Self::new(active_network);
        for (network, entries) in pools {
            registry.set_pool(*network, entries.iter().map(Endpoint::from).collect());
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the pool of a network; the active pointer resets to the first candidate
    pub fn set_pool(&self, network: Network, endpoints: Vec<Endpoint>) {
        if endpoints.is_empty() {
            warn!(network = %network, "Endpoint pool is empty, remote calls will fail");
        }
        let pool = EndpointPool::new(endpoints);
        debug!(network = %network, size = pool.len(), "Seeded endpoint pool");
        self.lock().pools.insert(network, pool);
    }

    /// Register a listener for health and rotation events
    ///
    /// Listeners run while the registry lock is held and must not call back into
    /// the registry.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.lock().listeners.push(Arc::new(listener));
    }

    /// Register a listener for health classification changes only
    pub fn on_health_change<F>(&self, listener: F)
    where
        F: Fn(Network, &Endpoint, &Endpoint) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let RegistryEvent::HealthChanged {
                network,
                previous,
                current,
            } = event
            {
                listener(*network, previous, current);
            }
        });
    }

    /// Register a listener for rotations only
    pub fn on_rotation<F>(&self, listener: F)
    where
        F: Fn(Network, &Endpoint, &Endpoint, &str) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let RegistryEvent::Rotated {
                network,
                previous,
                current,
                reason,
            } = event
            {
                listener(*network, previous, current, reason);
            }
        });
    }

    pub fn active_network(&self) -> Network {
        self.lock().active_network
    }

    pub fn set_active_network(&self, network: Network) {
        let mut state = self.lock();
        if state.active_network != network {
            info!(from = %state.active_network, to = %network, "Switched network");
            state.active_network = network;
        }
    }

    /// Snapshot of a network's candidates in pool order
    pub fn endpoints(&self, network: Network) -> Vec<Endpoint> {
        self.lock()
            .pools
            .get(&network)
            .map(|pool| pool.endpoints().to_vec())
            .unwrap_or_default()
    }

    pub fn pool_size(&self, network: Network) -> usize {
        self.lock().pools.get(&network).map_or(0, |pool| pool.len())
    }

    /// Current active candidate, without any health evaluation
    pub fn active(&self, network: Network) -> Result<Endpoint> {
        let mut state = self.lock();
        let pool = state.pool_mut(network)?;
        pool.active()
            .cloned()
            .ok_or(Error::NoEndpointsConfigured(network))
    }

    /// Record a probe or call outcome for the candidate with `url`
    ///
    /// Unknown urls are ignored so stale probes from an old configuration are harmless.
    pub fn record_result(
        &self,
        network: Network,
        url: &str,
        healthy: bool,
        latency_ms: Option<f64>,
        timestamp: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        let Some(pool) = state.pools.get_mut(&network) else {
            return;
        };
        let Some(endpoint) = pool.endpoints.iter_mut().find(|e| e.url == url) else {
            debug!(network = %network, url = %url, "Ignoring result for unknown endpoint");
            return;
        };

        let previous = endpoint.clone();
        endpoint.health = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        endpoint.latency_ms = latency_ms;
        endpoint.last_checked = Some(timestamp);
        let current = endpoint.clone();

        if previous.health != current.health {
            debug!(
                network = %network,
                url = %url,
                from = %previous.health,
                to = %current.health,
                "Endpoint health changed"
            );
            state.emit(RegistryEvent::HealthChanged {
                network,
                previous,
                current,
            });
        }
    }

    /// Endpoint to use for the next call
    ///
    /// The active candidate unless it is known to be unhealthy, in which case the
    /// pool advances first.
    pub fn select(&self, network: Network) -> Result<Endpoint> {
        let mut state = self.lock();
        let usable = state
            .pool_mut(network)?
            .active()
            .filter(|active| active.health.is_usable())
            .cloned();
        match usable {
            Some(active) => Ok(active),
            None => state
                .advance(network, "active endpoint unhealthy", false)
                .map(|(_, current)| current),
        }
    }

    /// Move to the next usable candidate
    pub fn advance(&self, network: Network) -> Result<Endpoint> {
        self.lock()
            .advance(network, "active endpoint unhealthy", false)
            .map(|(_, current)| current)
    }

    /// Forced advance that always publishes a rotation event
    pub fn rotate(&self, network: Network, reason: &str) -> Result<(Endpoint, Endpoint)> {
        self.lock().advance(network, reason, true)
    }

    /// Rotate only if `url` is still the active candidate
    ///
    /// Returns `None` when someone else already moved the pool on.
    pub fn rotate_if_active(
        &self,
        network: Network,
        url: &str,
        reason: &str,
    ) -> Result<Option<(Endpoint, Endpoint)>> {
        let mut state = self.lock();
        let pool = state.pool_mut(network)?;
        if pool.active().map(|e| e.url.as_str()) != Some(url) {
            return Ok(None);
        }
        state.advance(network, reason, true).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "https://a.example.com";
    const B: &str = "https://b.example.com";
    const C: &str = "https://c.example.com";

    fn registry(urls: &[&str]) -> EndpointRegistry {
        let registry = EndpointRegistry::new(Network::Devnet);
        registry.set_pool(
            Network::Devnet,
            urls.iter().map(|u| Endpoint::new(u, "", 0)).collect(),
        );
        registry
    }

    fn collect_events(registry: &EndpointRegistry) -> Arc<Mutex<Vec<RegistryEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_select_skips_unhealthy_active() {
        let registry = registry(&[A, B]);
        registry.record_result(Network::Devnet, A, false, None, Utc::now());
        registry.record_result(Network::Devnet, B, true, Some(42.0), Utc::now());

        let selected = registry.select(Network::Devnet).unwrap();
        assert_eq!(selected.url, B);
        assert_eq!(selected.latency_ms, Some(42.0));
    }

    #[test]
    fn test_select_keeps_unknown_active() {
        let registry = registry(&[A, B]);
        assert_eq!(registry.select(Network::Devnet).unwrap().url, A);
    }

    #[test]
    fn test_empty_pool_fails_fast() {
        let registry = EndpointRegistry::new(Network::Mainnet);
        assert!(matches!(
            registry.select(Network::Mainnet),
            Err(Error::NoEndpointsConfigured(Network::Mainnet))
        ));
        assert!(matches!(
            registry.advance(Network::Mainnet),
            Err(Error::NoEndpointsConfigured(_))
        ));

        registry.set_pool(Network::Mainnet, vec![]);
        assert!(registry.rotate(Network::Mainnet, "drill").is_err());
    }

    #[test]
    fn test_advance_skips_unhealthy_and_wraps() {
        let registry = registry(&[A, B, C]);
        registry.record_result(Network::Devnet, B, false, None, Utc::now());

        assert_eq!(registry.advance(Network::Devnet).unwrap().url, C);
        assert_eq!(registry.advance(Network::Devnet).unwrap().url, A);
    }

    #[test]
    fn test_advance_all_unhealthy_still_moves() {
        let registry = registry(&[A, B]);
        registry.record_result(Network::Devnet, A, false, None, Utc::now());
        registry.record_result(Network::Devnet, B, false, None, Utc::now());

        assert_eq!(registry.active(Network::Devnet).unwrap().url, A);
        assert_eq!(registry.advance(Network::Devnet).unwrap().url, B);
        assert_eq!(registry.advance(Network::Devnet).unwrap().url, A);
    }

    #[test]
    fn test_unknown_url_ignored() {
        let registry = registry(&[A]);
        let events = collect_events(&registry);

        let stale = "https://stale.example.com";
        registry.record_result(Network::Devnet, stale, false, None, Utc::now());
        registry.record_result(Network::Testnet, A, false, None, Utc::now());

        assert_eq!(registry.active(Network::Devnet).unwrap().health, HealthStatus::Unknown);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_health_event_only_on_change() {
        let registry = registry(&[A]);
        let events = collect_events(&registry);

        registry.record_result(Network::Devnet, A, true, Some(10.0), Utc::now());
        registry.record_result(Network::Devnet, A, true, Some(12.0), Utc::now());
        registry.record_result(Network::Devnet, A, false, None, Utc::now());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            RegistryEvent::HealthChanged { previous, current, .. }
                if previous.health == HealthStatus::Healthy
                    && current.health == HealthStatus::Unhealthy
        ));
    }

    #[test]
    fn test_rotate_always_emits() {
        let registry = registry(&[A]);
        let rotations = Arc::new(Mutex::new(Vec::new()));
        let sink = rotations.clone();
        registry.on_rotation(move |_, previous, current, reason| {
            sink.lock()
                .unwrap()
                .push((previous.url.clone(), current.url.clone(), reason.to_string()));
        });

        let (previous, current) = registry.rotate(Network::Devnet, "Failover drill").unwrap();
        assert_eq!(previous.url, A);
        assert_eq!(current.url, A);

        let rotations = rotations.lock().unwrap();
        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].2, "Failover drill");
    }

    fn collect_rotations(registry: &EndpointRegistry) -> Arc<Mutex<Vec<(String, String, String)>>> {
        let rotations = Arc::new(Mutex::new(Vec::new()));
        let sink = rotations.clone();
        registry.on_rotation(move |_, previous, current, reason| {
            sink.lock()
                .unwrap()
                .push((previous.url.clone(), current.url.clone(), reason.to_string()));
        });
        rotations
    }

    #[test]
    fn test_select_off_unhealthy_emits_one_rotation() {
        let registry = registry(&[A, B]);
        registry.record_result(Network::Devnet, A, false, None, Utc::now());
        let rotations = collect_rotations(&registry);

        assert_eq!(registry.select(Network::Devnet).unwrap().url, B);
        assert_eq!(registry.select(Network::Devnet).unwrap().url, B);

        let rotations = rotations.lock().unwrap();
        assert_eq!(
            *rotations,
            vec![(A.to_string(), B.to_string(), "active endpoint unhealthy".to_string())]
        );
    }

    #[test]
    fn test_advance_without_change_is_silent() {
        let registry = registry(&[A]);
        registry.record_result(Network::Devnet, A, false, None, Utc::now());
        let rotations = collect_rotations(&registry);

        assert_eq!(registry.advance(Network::Devnet).unwrap().url, A);
        assert_eq!(registry.select(Network::Devnet).unwrap().url, A);
        assert!(rotations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rotate_if_active_skips_stale_url() {
        let registry = registry(&[A, B]);
        registry.advance(Network::Devnet).unwrap();

        assert!(registry
            .rotate_if_active(Network::Devnet, A, "late failure")
            .unwrap()
            .is_none());
        assert_eq!(registry.active(Network::Devnet).unwrap().url, B);
    }

    #[test]
    fn test_priority_orders_pool() {
        let registry = EndpointRegistry::new(Network::Devnet);
        registry.set_pool(
            Network::Devnet,
            vec![
                Endpoint::new(A, "a", 5),
                Endpoint::new(B, "b", 1),
                Endpoint::new(C, "c", 1),
            ],
        );

        let urls: Vec<String> = registry
            .endpoints(Network::Devnet)
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(urls, vec![B, C, A]);
        assert_eq!(registry.select(Network::Devnet).unwrap().url, B);
    }

    #[test]
    fn test_from_config() {
        let mut pools = HashMap::new();
        pools.insert(Network::Testnet, vec![EndpointConfig::new(A, "primary", 0)]);
        let registry = EndpointRegistry::from_config(&pools, Network::Testnet);

        assert_eq!(registry.active_network(), Network::Testnet);
        assert_eq!(registry.pool_size(Network::Testnet), 1);
        assert_eq!(registry.pool_size(Network::Mainnet), 0);
    }
}
