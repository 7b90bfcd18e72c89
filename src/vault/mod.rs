//! Encrypted key custody
//!
//! - `keystore`: on-disk encrypted record and key derivation
//! - `manager`: lock state machine with inactivity auto-lock
//! - `types`: status, lock reasons and events

pub mod keystore;
pub mod manager;
pub mod types;

pub use keystore::{keypair_from_base58, keypair_from_bytes, KdfParams, KeystoreRecord};
pub use manager::KeyVault;
pub use types::{LockReason, VaultEvent, VaultStatus};
