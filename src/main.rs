//! Treasury console - encrypted key custody and resilient Solana RPC access

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use treasury_custody::cli::commands;
use treasury_custody::config::Config;
use treasury_custody::rpc::Network;

/// Treasury wallet console
#[derive(Parser)]
#[command(name = "treasury")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "treasury.toml", env = "TREASURY_CONFIG")]
    config: String,

    /// Network to use instead of the configured default
    #[arg(short, long, global = true)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair and store it encrypted
    Create {
        /// Replace an existing keystore without asking
        #[arg(long)]
        force: bool,
    },

    /// Import a base58 secret key and store it encrypted
    Import {
        /// Replace an existing keystore without asking
        #[arg(long)]
        force: bool,
    },

    /// Check the passphrase by unlocking the keystore
    Unlock,

    /// Show vault and endpoint status
    Status,

    /// Show the wallet balance
    Balance,

    /// Show the latest blockhash
    Blockhash,

    /// Show recent priority fees
    Fees,

    /// Probe every endpoint of the network
    Health,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("treasury_custody=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    startup_checks(&config);

    let network = cli.network;
    let result = match cli.command {
        Commands::Create { force } => commands::create(&config, force).await,
        Commands::Import { force } => commands::import(&config, force).await,
        Commands::Unlock => commands::unlock(&config).await,
        Commands::Status => commands::status(&config, network).await,
        Commands::Balance => commands::balance(&config, network).await,
        Commands::Blockhash => commands::blockhash(&config, network).await,
        Commands::Fees => commands::fees(&config, network).await,
        Commands::Health => commands::health(&config, network).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        let code = exit_code(&e);
        if code == VAULT_EXIT_CODE {
            error!("{}", e);
        } else {
            error!("Command failed: {:#}", e);
        }
        std::process::exit(code);
    }

    Ok(())
}

/// Exit status for errors the operator must resolve at the vault
const VAULT_EXIT_CODE: i32 = 2;

fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<treasury_custody::Error>() {
        Some(err) if err.is_vault_error() => VAULT_EXIT_CODE,
        _ => 1,
    }
}

/// Warn about an unsafe keystore file before touching it
fn startup_checks(config: &Config) {
    let path = config.vault.resolved_keystore_path();
    if !path.exists() {
        info!("No keystore at {}", path.display());
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&path) {
            Ok(metadata) => {
                let mode = metadata.permissions().mode();
                // Readable by group or others
                if mode & 0o077 != 0 {
                    warn!(
                        "Keystore {} has permissions {:o}. Run 'chmod 600 {}' to fix",
                        path.display(),
                        mode & 0o777,
                        path.display()
                    );
                }
            }
            Err(e) => warn!("Cannot read keystore metadata {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treasury_custody::Error;

    #[test]
    fn test_vault_errors_exit_with_distinct_code() {
        assert_eq!(exit_code(&Error::WrongPassphrase.into()), VAULT_EXIT_CODE);
        assert_eq!(exit_code(&Error::Busy.into()), VAULT_EXIT_CODE);
        assert_eq!(exit_code(&Error::RpcTimeout(500).into()), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("no config")), 1);
    }
}
