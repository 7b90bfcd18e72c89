//! Error types for the custody core

use thiserror::Error;

use crate::rpc::Network;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the custody core
#[derive(Error, Debug)]
pub enum Error {
    // Vault errors
    #[error("No keystore available")]
    NoKeystore,

    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Keystore is corrupt: {0}")]
    CorruptKeystore(String),

    #[error("Another unlock is already in progress")]
    Busy,

    #[error("Keystore was replaced during unlock")]
    KeystoreReplaced,

    #[error("Wallet is locked")]
    Locked,

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    // Endpoint errors
    #[error("No endpoints configured for {0}")]
    NoEndpointsConfigured(Network),

    #[error("All endpoints unreachable after {attempts} attempts: {last_error}")]
    AllEndpointsUnreachable { attempts: usize, last_error: String },

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error comes from the vault and must go straight back to the operator
    pub fn is_vault_error(&self) -> bool {
        matches!(
            self,
            Error::NoKeystore
                | Error::WrongPassphrase
                | Error::CorruptKeystore(_)
                | Error::Busy
                | Error::KeystoreReplaced
                | Error::Locked
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
