//! Key vault - lock state machine and in-memory key custody
//!
//! The vault owns the keystore record, the decrypted keypair while a session is
//! unlocked, and the inactivity timer that locks an idle session. Every state
//! change happens under one mutex and subscribers are notified inside it, so a
//! manual lock and a timer-triggered lock can never interleave.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::error::{Error, Result};

use super::keystore::{keypair_from_bytes, KdfParams, KeystoreRecord, KEYPAIR_LEN};
use super::types::{LockReason, VaultEvent, VaultStatus};

pub type VaultListener = Arc<dyn Fn(&VaultEvent) + Send + Sync>;

/// Decrypted key material, alive only while unlocked
///
/// Dropping the keypair zeroizes its secret half.
struct Session {
    keypair: Keypair,
    public_key: Pubkey,
}

struct InactivityTimer {
    generation: u64,
    cancel: CancellationToken,
}

struct VaultState {
    record: Option<KeystoreRecord>,
    session: Option<Session>,
    timer: Option<InactivityTimer>,
    /// Bumped for every armed timer so a stale one can tell it was replaced
    generation: u64,
    listeners: Vec<VaultListener>,
}

impl VaultState {
    fn status(&self) -> VaultStatus {
        if self.session.is_some() {
            VaultStatus::Unlocked
        } else if self.record.is_some() {
            VaultStatus::Locked
        } else {
            VaultStatus::NoKeystore
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
        }
    }

    /// Drop the session; returns false if there was none
    fn lock(&mut self, reason: LockReason) -> bool {
        self.cancel_timer();
        let Some(session) = self.session.take() else {
            return false;
        };
        drop(session);

        info!(reason = %reason, "Vault locked");
        self.emit(VaultEvent::Locked { reason });
        true
    }

    fn emit(&self, event: VaultEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }
}

fn lock_state(shared: &Mutex<VaultState>) -> MutexGuard<'_, VaultState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the single-unlock flag when the unlock attempt ends, however it ends
struct UnlockGuard<'a>(&'a AtomicBool);

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Passphrase-gated custody of one wallet keypair
pub struct KeyVault {
    keystore_path: PathBuf,
    kdf: KdfParams,
    /// Zero disables auto-lock
    inactivity: Duration,
    shared: Arc<Mutex<VaultState>>,
    unlock_in_flight: AtomicBool,
    runtime: Handle,
}

impl KeyVault {
    /// Open the vault, reading keystore metadata if present
    ///
    /// Nothing is decrypted here. A malformed keystore is treated as absent.
    /// Must be called from within a tokio runtime.
    pub fn open(
        keystore_path: impl Into<PathBuf>,
        inactivity: Duration,
        kdf: KdfParams,
    ) -> Result<Self> {
        let keystore_path = keystore_path.into();
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("Vault requires a tokio runtime: {}", e)))?;

        let record = match KeystoreRecord::load(&keystore_path) {
            Ok(record) => {
                info!("Found keystore for {}", record.public_key);
                Some(record)
            }
            Err(Error::NoKeystore) => {
                debug!("No keystore at {}", keystore_path.display());
                None
            }
            Err(e) => {
                warn!(
                    "Ignoring unusable keystore at {}: {}",
                    keystore_path.display(),
                    e
                );
                None
            }
        };

        Ok(Self {
            keystore_path,
            kdf,
            inactivity,
            shared: Arc::new(Mutex::new(VaultState {
                record,
                session: None,
                timer: None,
                generation: 0,
                listeners: Vec::new(),
            })),
            unlock_in_flight: AtomicBool::new(false),
            runtime,
        })
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        Self::open(
            config.resolved_keystore_path(),
            config.inactivity(),
            config.kdf,
        )
    }

    fn state(&self) -> MutexGuard<'_, VaultState> {
        lock_state(&self.shared)
    }

    pub fn keystore_path(&self) -> &Path {
        &self.keystore_path
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity
    }

    pub fn status(&self) -> VaultStatus {
        self.state().status()
    }

    pub fn is_locked(&self) -> bool {
        self.status() != VaultStatus::Unlocked
    }

    pub fn has_keystore(&self) -> bool {
        self.state().record.is_some()
    }

    /// Public identity of the live session, or of the stored keystore when locked
    pub fn public_key(&self) -> Option<Pubkey> {
        let state = self.state();
        match &state.session {
            Some(session) => Some(session.public_key),
            None => state.record.as_ref().and_then(|r| r.pubkey().ok()),
        }
    }

    /// Register a listener for lock and unlock events
    ///
    /// Listeners run while the vault lock is held and must not call back into
    /// the vault.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&VaultEvent) + Send + Sync + 'static,
    {
        self.state().listeners.push(Arc::new(listener));
    }

    pub fn on_unlock<F>(&self, listener: F)
    where
        F: Fn(&Pubkey) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let VaultEvent::Unlocked { public_key } = event {
                listener(public_key);
            }
        });
    }

    pub fn on_lock<F>(&self, listener: F)
    where
        F: Fn(&LockReason) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let VaultEvent::Locked { reason } = event {
                listener(reason);
            }
        });
    }

    /// Encrypt `keypair` under `passphrase` and write it as the keystore
    ///
    /// Replaces any existing keystore. An unlocked session stays unlocked.
    pub async fn persist(&self, passphrase: &str, keypair: &Keypair) -> Result<Pubkey> {
        self.persist_bytes(passphrase, Zeroizing::new(keypair.to_bytes()))
            .await
    }

    /// Persist the keypair of the current session
    pub async fn persist_session(&self, passphrase: &str) -> Result<Pubkey> {
        let bytes = self
            .state()
            .session
            .as_ref()
            .map(|session| Zeroizing::new(session.keypair.to_bytes()))
            .ok_or(Error::Locked)?;
        self.persist_bytes(passphrase, bytes).await
    }

    async fn persist_bytes(
        &self,
        passphrase: &str,
        bytes: Zeroizing<[u8; KEYPAIR_LEN]>,
    ) -> Result<Pubkey> {
        let passphrase = Zeroizing::new(passphrase.to_string());
        let path = self.keystore_path.clone();
        let kdf = self.kdf;

        let record = tokio::task::spawn_blocking(move || {
            let keypair = keypair_from_bytes(&bytes[..])?;
            let record = KeystoreRecord::seal(&keypair, &passphrase, kdf)?;
            record.save(&path)?;
            Ok::<_, Error>(record)
        })
        .await
        .map_err(|e| Error::Internal(format!("Keystore task failed: {}", e)))??;

        let public_key = record.pubkey()?;
        self.state().record = Some(record);
        Ok(public_key)
    }

    /// Decrypt the keystore and start a session
    ///
    /// Only one unlock may run at a time; a concurrent call fails with
    /// [`Error::Busy`]. A wrong passphrase leaves the vault locked.
    pub async fn unlock(&self, passphrase: &str) -> Result<Pubkey> {
        if self
            .unlock_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let _guard = UnlockGuard(&self.unlock_in_flight);

        let record = self.state().record.clone().ok_or(Error::NoKeystore)?;
        let expected = record.public_key.clone();
        let passphrase = Zeroizing::new(passphrase.to_string());

        let result = tokio::task::spawn_blocking(move || record.open(&passphrase))
            .await
            .map_err(|e| Error::Internal(format!("Unlock task failed: {}", e)))
            .and_then(|opened| opened)
            .and_then(|keypair| self.finish_unlock(keypair, &expected));

        if let Err(e) = &result {
            warn!("Unlock failed: {}", e);
        }
        result
    }

    /// Start the session only if the keystore that was decrypted is still current
    fn finish_unlock(&self, keypair: Keypair, expected: &str) -> Result<Pubkey> {
        let mut state = self.state();
        let current = state.record.as_ref().map(|r| r.public_key.as_str());
        if current != Some(expected) {
            return Err(Error::KeystoreReplaced);
        }
        Ok(self.start_session(&mut state, keypair))
    }

    /// Start a session from key material the caller already holds
    pub fn unlock_with_material(&self, keypair: Keypair) -> Pubkey {
        let mut state = self.state();
        self.start_session(&mut state, keypair)
    }

    fn start_session(&self, state: &mut VaultState, keypair: Keypair) -> Pubkey {
        let public_key = keypair.pubkey();
        state.session = Some(Session {
            keypair,
            public_key,
        });
        self.arm_timer(state);

        info!("Vault unlocked for {}", public_key);
        state.emit(VaultEvent::Unlocked { public_key });
        public_key
    }

    /// Drop the in-memory secret; no-op if already locked
    pub fn lock(&self, reason: LockReason) {
        self.state().lock(reason);
    }

    /// Restart the inactivity timer; ignored while locked
    pub fn register_activity(&self) {
        let mut state = self.state();
        if state.session.is_some() {
            self.arm_timer(&mut state);
        }
    }

    /// Borrow the keypair for signing without taking it out of the vault
    pub fn with_keypair<R>(&self, f: impl FnOnce(&Keypair) -> R) -> Result<R> {
        let state = self.state();
        let session = state.session.as_ref().ok_or(Error::Locked)?;
        Ok(f(&session.keypair))
    }

    /// Lock and cancel any pending timer
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.lock(LockReason::Shutdown);
        state.cancel_timer();
    }

    /// Replace the inactivity timer with a fresh one
    fn arm_timer(&self, state: &mut VaultState) {
        state.cancel_timer();
        if self.inactivity.is_zero() {
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let timeout = self.inactivity;

        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut state = lock_state(&shared);
                    // Only the timer that is still current may lock
                    if state.timer.as_ref().map(|t| t.generation) == Some(generation) {
                        state.timer = None;
                        state.lock(LockReason::Timeout);
                    }
                }
            }
        });

        state.timer = Some(InactivityTimer { generation, cancel });
    }
}

impl Drop for KeyVault {
    fn drop(&mut self) {
        lock_state(&self.shared).cancel_timer();
    }
}
