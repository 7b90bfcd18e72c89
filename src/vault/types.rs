//! Core types for the key custody vault

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Lock posture of the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// No keystore on disk and no session
    NoKeystore,
    /// Keystore present, secret not in memory
    Locked,
    /// Secret held in memory
    Unlocked,
}

impl std::fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultStatus::NoKeystore => write!(f, "no keystore"),
            VaultStatus::Locked => write!(f, "locked"),
            VaultStatus::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Why a session was locked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Operator asked for it
    Manual,
    /// Inactivity timer expired
    Timeout,
    /// Process is shutting down
    Shutdown,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockReason::Manual => write!(f, "manual"),
            LockReason::Timeout => write!(f, "timeout"),
            LockReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Change notification published by the vault
///
/// Carries only public data, never key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Unlocked { public_key: Pubkey },
    Locked { reason: LockReason },
}
