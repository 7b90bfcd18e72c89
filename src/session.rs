//! Session controller
//!
//! One context object that owns the vault and the endpoint resilience layer
//! and exposes the operator commands a front end needs.

use solana_sdk::hash::Hash;
use solana_sdk::native_token::lamports_to_sol;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::rpc::{
    EndpointRegistry, FailoverExecutor, FeeEstimate, HealthMonitor, LedgerRpc, Network,
    ProbeReport, SolanaRpc,
};
use crate::vault::{KeyVault, LockReason, VaultStatus};

/// Last balance fetched, tied to the identity and network it was read for
#[derive(Debug, Clone, Copy)]
struct CachedBalance {
    network: Network,
    public_key: Pubkey,
    lamports: u64,
}

pub struct SessionController {
    vault: Arc<KeyVault>,
    registry: Arc<EndpointRegistry>,
    executor: FailoverExecutor,
    monitor: Arc<HealthMonitor>,
    balance: Mutex<Option<CachedBalance>>,
}

impl SessionController {
    pub fn new(
        vault: Arc<KeyVault>,
        registry: Arc<EndpointRegistry>,
        rpc: Arc<dyn LedgerRpc>,
        monitor_interval_secs: u64,
    ) -> Self {
        let executor = FailoverExecutor::new(Arc::clone(&registry), Arc::clone(&rpc));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            rpc,
            monitor_interval_secs,
        ));

        Self {
            vault,
            registry,
            executor,
            monitor,
            balance: Mutex::new(None),
        }
    }

    /// Build the full stack against live Solana RPC endpoints
    pub fn from_config(config: &Config) -> Result<Self> {
        let vault = Arc::new(KeyVault::from_config(&config.vault)?);
        let registry = Arc::new(EndpointRegistry::from_config(
            &config.endpoints.pools(),
            config.rpc.default_network,
        ));
        let rpc: Arc<dyn LedgerRpc> = Arc::new(SolanaRpc::new(config.rpc.timeout()));

        Ok(Self::new(vault, registry, rpc, config.monitor.interval_secs))
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &FailoverExecutor {
        &self.executor
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn network(&self) -> Network {
        self.registry.active_network()
    }

    fn cached_balance(&self) -> MutexGuard<'_, Option<CachedBalance>> {
        self.balance.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start background health monitoring
    pub async fn start_monitoring(&self) -> Result<ProbeReport> {
        self.monitor.start().await
    }

    /// Make `network` active and probe its pool right away
    pub async fn switch_network(&self, network: Network) -> Result<ProbeReport> {
        let previous = self.registry.active_network();
        self.registry.set_active_network(network);
        if previous != network {
            info!("Switched network {} -> {}", previous, network);
        }
        self.monitor.force_poll().await
    }

    pub fn status(&self) -> VaultStatus {
        self.vault.status()
    }

    pub async fn unlock(&self, passphrase: &str) -> Result<Pubkey> {
        self.vault.unlock(passphrase).await
    }

    /// Start a session with a freshly generated keypair
    pub fn generate_ephemeral(&self) -> Pubkey {
        self.vault.unlock_with_material(Keypair::new())
    }

    /// Start a session from a base58-encoded 64-byte secret
    pub fn import_secret(&self, secret: &str) -> Result<Pubkey> {
        let keypair = crate::vault::keypair_from_base58(secret)?;
        Ok(self.vault.unlock_with_material(keypair))
    }

    /// Encrypt the current session's keypair to disk
    pub async fn persist(&self, passphrase: &str) -> Result<Pubkey> {
        self.vault.persist_session(passphrase).await
    }

    pub fn lock(&self) {
        self.vault.lock(LockReason::Manual);
    }

    pub fn register_activity(&self) {
        self.vault.register_activity();
    }

    /// Fetch the wallet balance on the active network and cache it
    ///
    /// Works while locked; only the public key is needed.
    pub async fn refresh_balance(&self) -> Result<u64> {
        let public_key = self.vault.public_key().ok_or(Error::NoKeystore)?;
        let network = self.network();

        let lamports = self.executor.get_balance(network, &public_key).await?;
        *self.cached_balance() = Some(CachedBalance {
            network,
            public_key,
            lamports,
        });
        self.vault.register_activity();
        Ok(lamports)
    }

    pub async fn latest_blockhash(&self) -> Result<Hash> {
        self.executor.get_latest_blockhash(self.network()).await
    }

    pub async fn fee_estimate(&self) -> Result<FeeEstimate> {
        self.executor.get_fee_estimate(self.network()).await
    }

    /// One-line summary of the session for a status bar
    pub fn status_line(&self) -> String {
        let network = self.network();
        let public_key = match (self.vault.status(), self.vault.public_key()) {
            (VaultStatus::Unlocked, Some(public_key)) => public_key,
            (VaultStatus::Unlocked, None) => return format!("Unlocked on {}", network),
            _ => return "Locked · No key loaded".to_string(),
        };

        let encoded = public_key.to_string();
        let short = format!("{}…{}", &encoded[..4], &encoded[encoded.len() - 4..]);

        let balance = match *self.cached_balance() {
            Some(cached) if cached.network == network && cached.public_key == public_key => {
                format!(" · {:.4} SOL", lamports_to_sol(cached.lamports))
            }
            _ => String::new(),
        };

        format!("Active on {} · {}{}", network, short, balance)
    }

    /// Stop monitoring and lock the vault
    pub fn shutdown(&self) {
        self.monitor.stop();
        self.vault.shutdown();
        info!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::mock::MockLedger;
    use crate::rpc::Endpoint;
    use crate::vault::KdfParams;
    use solana_sdk::signer::Signer;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const DEV_A: &str = "https://dev-a.example.com";
    const DEV_B: &str = "https://dev-b.example.com";
    const MAIN: &str = "https://main.example.com";

    fn controller(dir: &TempDir, ledger: Arc<MockLedger>) -> SessionController {
        let vault = KeyVault::open(
            dir.path().join("keystore.json"),
            Duration::ZERO,
            KdfParams {
                memory_kib: 256,
                iterations: 1,
                parallelism: 1,
            },
        )
        .unwrap();

        let registry = Arc::new(EndpointRegistry::new(Network::Devnet));
        registry.set_pool(
            Network::Devnet,
            vec![Endpoint::new(DEV_A, "a", 0), Endpoint::new(DEV_B, "b", 1)],
        );
        registry.set_pool(Network::Mainnet, vec![Endpoint::new(MAIN, "main", 0)]);

        SessionController::new(Arc::new(vault), registry, ledger, 30)
    }

    #[tokio::test]
    async fn test_status_line_locked() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::new()));
        assert_eq!(session.status_line(), "Locked · No key loaded");
    }

    #[tokio::test]
    async fn test_status_line_with_balance() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::with_balance(1_500_000_000)));
        let public_key = session.generate_ephemeral();
        let encoded = public_key.to_string();

        let line = session.status_line();
        assert!(line.starts_with("Active on Devnet · "));
        assert!(line.contains(&encoded[..4]));
        assert!(!line.contains("SOL"));

        assert_eq!(session.refresh_balance().await.unwrap(), 1_500_000_000);
        assert!(session.status_line().ends_with(" · 1.5000 SOL"));

        session.lock();
        assert_eq!(session.status_line(), "Locked · No key loaded");
    }

    #[tokio::test]
    async fn test_balance_requires_identity() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::new()));
        assert!(matches!(session.refresh_balance().await, Err(Error::NoKeystore)));
    }

    #[tokio::test]
    async fn test_balance_while_locked_uses_keystore_identity() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::with_balance(42)));
        session.generate_ephemeral();
        session.persist("pw").await.unwrap();
        session.lock();

        assert_eq!(session.status(), VaultStatus::Locked);
        assert_eq!(session.refresh_balance().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_switch_network_probes_new_pool() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let session = controller(&dir, ledger.clone());

        let report = session.switch_network(Network::Mainnet).await.unwrap();

        assert_eq!(session.network(), Network::Mainnet);
        assert_eq!(report.network, Network::Mainnet);
        assert_eq!(report.results.len(), 1);
        assert_eq!(ledger.call_count(), 1);
    }

    #[tokio::test]
    async fn test_switch_network_hides_stale_balance() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::with_balance(1_000_000_000)));
        session.generate_ephemeral();
        session.refresh_balance().await.unwrap();
        assert!(session.status_line().contains("SOL"));

        session.switch_network(Network::Mainnet).await.unwrap();
        let line = session.status_line();
        assert!(line.starts_with("Active on Mainnet"));
        assert!(!line.contains("SOL"));
    }

    #[tokio::test]
    async fn test_queries_fail_over() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(MockLedger::new());
        ledger.fail(DEV_A);
        let session = controller(&dir, ledger);

        assert!(session.latest_blockhash().await.is_ok());
        let fees = session.fee_estimate().await.unwrap();
        assert_eq!(fees.samples, 3);
        assert_eq!(session.registry().active(Network::Devnet).unwrap().url, DEV_B);
    }

    #[tokio::test]
    async fn test_import_secret() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::new()));
        let keypair = Keypair::new();

        let public_key = session.import_secret(&keypair.to_base58_string()).unwrap();
        assert_eq!(public_key, keypair.pubkey());
        assert!(session.import_secret("not-base58!").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_locks_and_stops_monitor() {
        let dir = tempdir().unwrap();
        let session = controller(&dir, Arc::new(MockLedger::new()));
        session.generate_ephemeral();
        session.start_monitoring().await.unwrap();
        assert!(session.monitor().is_running());

        session.shutdown();
        assert!(!session.monitor().is_running());
        assert_eq!(session.status(), VaultStatus::NoKeystore);
    }
}
