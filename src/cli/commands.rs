//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::{Confirm, Password};
use solana_sdk::native_token::lamports_to_sol;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::{mask_url, Config};
use crate::rpc::{HealthStatus, Network};
use crate::session::SessionController;
use crate::vault::VaultStatus;

const MIN_PASSPHRASE_LEN: usize = 8;

/// Build the session stack, optionally pinned to a network other than the default
fn open_session(config: &Config, network: Option<Network>) -> Result<SessionController> {
    let session = SessionController::from_config(config).context("Failed to open vault")?;
    if let Some(network) = network {
        session.registry().set_active_network(network);
    }
    Ok(session)
}

fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    let passphrase = Zeroizing::new(
        Password::new()
            .with_prompt("New passphrase")
            .with_confirmation("Confirm passphrase", "Passphrases do not match")
            .interact()?,
    );
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        anyhow::bail!(
            "Passphrase must be at least {} characters",
            MIN_PASSPHRASE_LEN
        );
    }
    Ok(passphrase)
}

fn prompt_passphrase() -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(
        Password::new().with_prompt("Passphrase").interact()?,
    ))
}

/// Ask before replacing an existing keystore
fn confirm_overwrite(session: &SessionController, force: bool) -> Result<bool> {
    if force || !session.vault().has_keystore() {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Replace the keystore at {}? The current key is lost unless backed up",
            session.vault().keystore_path().display()
        ))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Generate a new keypair and store it encrypted
pub async fn create(config: &Config, force: bool) -> Result<()> {
    let session = open_session(config, None)?;
    if !confirm_overwrite(&session, force)? {
        println!("Cancelled.");
        return Ok(());
    }

    let passphrase = prompt_new_passphrase()?;
    let public_key = session.generate_ephemeral();
    session.persist(&passphrase).await?;
    session.shutdown();

    info!("Created keystore for {}", public_key);
    println!("Keystore written to {}", session.vault().keystore_path().display());
    println!("Address: {}", public_key);
    Ok(())
}

/// Import a base58 secret key and store it encrypted
pub async fn import(config: &Config, force: bool) -> Result<()> {
    let session = open_session(config, None)?;
    if !confirm_overwrite(&session, force)? {
        println!("Cancelled.");
        return Ok(());
    }

    let secret = Zeroizing::new(
        Password::new()
            .with_prompt("Base58 secret key")
            .interact()?,
    );
    let public_key = session
        .import_secret(secret.trim())
        .context("Could not read secret key")?;

    let passphrase = prompt_new_passphrase()?;
    session.persist(&passphrase).await?;
    session.shutdown();

    println!("Keystore written to {}", session.vault().keystore_path().display());
    println!("Address: {}", public_key);
    Ok(())
}

/// Verify the passphrase by unlocking, then lock again
pub async fn unlock(config: &Config) -> Result<()> {
    let session = open_session(config, None)?;
    if !session.vault().has_keystore() {
        anyhow::bail!(
            "No keystore at {}. Run 'treasury create' or 'treasury import' first",
            session.vault().keystore_path().display()
        );
    }

    let passphrase = prompt_passphrase()?;
    let public_key = session.unlock(&passphrase).await?;
    println!("Unlocked {}", public_key);
    println!("{}", session.status_line());

    session.shutdown();
    Ok(())
}

/// Show vault and endpoint status
pub async fn status(config: &Config, network: Option<Network>) -> Result<()> {
    let session = open_session(config, network)?;
    let network = session.network();

    println!("\n=== TREASURY STATUS ===\n");
    println!("Vault: {}", session.status());
    println!("Keystore: {}", session.vault().keystore_path().display());
    match session.vault().public_key() {
        Some(public_key) => println!("Address: {}", public_key),
        None => println!("Address: (none)"),
    }
    let timeout = session.vault().inactivity_timeout();
    if timeout.is_zero() {
        println!("Auto-lock: disabled");
    } else {
        println!("Auto-lock: {}s", timeout.as_secs());
    }

    println!("\nNetwork: {}", network);
    match session.registry().active(network) {
        Ok(endpoint) => println!(
            "Active endpoint: {} ({})",
            endpoint.display_name(),
            mask_url(&endpoint.url)
        ),
        Err(e) => println!("Active endpoint: {}", e),
    }
    println!("Candidates: {}", session.registry().pool_size(network));

    println!("\n{}", session.status_line());
    Ok(())
}

/// Fetch the wallet balance through the failover layer
pub async fn balance(config: &Config, network: Option<Network>) -> Result<()> {
    let session = open_session(config, network)?;
    if session.status() == VaultStatus::NoKeystore {
        anyhow::bail!("No keystore configured, nothing to query");
    }

    let lamports = session.refresh_balance().await?;
    println!(
        "{:.4} SOL ({} lamports) on {}",
        lamports_to_sol(lamports),
        lamports,
        session.network()
    );
    Ok(())
}

/// Fetch the latest blockhash through the failover layer
pub async fn blockhash(config: &Config, network: Option<Network>) -> Result<()> {
    let session = open_session(config, network)?;
    let hash = session.latest_blockhash().await?;
    println!("{}", hash);
    Ok(())
}

/// Fetch the recent priority fee window through the failover layer
pub async fn fees(config: &Config, network: Option<Network>) -> Result<()> {
    let session = open_session(config, network)?;
    let estimate = session.fee_estimate().await?;

    if estimate.samples == 0 {
        warn!("Endpoint returned no prioritization fee samples");
    }
    println!("Priority fees on {} ({} slots):", session.network(), estimate.samples);
    println!("  median: {} micro-lamports/CU", estimate.median_micro_lamports);
    println!("  max:    {} micro-lamports/CU", estimate.max_micro_lamports);
    Ok(())
}

/// Probe every endpoint of the network once and print the results
pub async fn health(config: &Config, network: Option<Network>) -> Result<()> {
    let session = open_session(config, network)?;
    let report = session.monitor().force_poll().await?;

    println!("\n=== ENDPOINT HEALTH ({}) ===\n", report.network);
    if report.results.is_empty() {
        anyhow::bail!("No endpoints configured for {}", report.network);
    }

    for endpoint in session.registry().endpoints(report.network) {
        let result = report.results.iter().find(|r| r.url == endpoint.url);
        print!("{}... ", endpoint.display_name());
        match (endpoint.health, result) {
            (HealthStatus::Healthy, Some(result)) => {
                println!("OK ({:.0}ms)", result.latency_ms.unwrap_or_default())
            }
            (_, Some(result)) => println!(
                "FAILED: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ),
            (status, None) => println!("{:?}", status),
        }
    }

    if let Some(active) = &report.active {
        println!("\nActive: {} ({})", active.display_name(), mask_url(&active.url));
    }

    println!();
    if report.healthy_count() == report.results.len() {
        println!("All endpoints healthy");
    } else if report.healthy_count() > 0 {
        println!(
            "{} of {} endpoints healthy",
            report.healthy_count(),
            report.results.len()
        );
    } else {
        anyhow::bail!("No reachable endpoints for {}", report.network);
    }

    Ok(())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
