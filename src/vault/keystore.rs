//! Encrypted keystore file
//!
//! Encrypts a 64-byte Solana keypair with an operator passphrase:
//! 1. Argon2id derives a 32-byte key from the passphrase + random salt
//! 2. AES-256-GCM encrypts the keypair bytes with a random nonce
//! 3. The record is stored as JSON with everything needed to decrypt again,
//!    except the passphrase
//!
//! A wrong passphrase fails the GCM tag check, and the decrypted bytes must
//! also form a consistent keypair matching the stored public key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::keypair::keypair_from_seed;
use solana_sdk::signer::Signer;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Current record format
pub const KEYSTORE_VERSION: u32 = 1;

/// Serialized keypair length (32-byte secret + 32-byte public key)
pub const KEYPAIR_LEN: usize = 64;

/// AES-256 key length in bytes
const KEY_LEN: usize = 32;
/// Salt length in bytes
const SALT_LEN: usize = 32;
/// AES-GCM nonce length in bytes (96 bits)
const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length
const TAG_LEN: usize = 16;

/// Largest Argon2 memory cost accepted, in KiB (4 GiB)
pub const MAX_KDF_MEMORY_KIB: u32 = 4 * 1024 * 1024;
/// Largest Argon2 lane count accepted
pub const MAX_KDF_PARALLELISM: u32 = 16;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Time cost (passes over memory)
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MiB
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Argon2 parameters, refusing costs outside the supported range
    ///
    /// Argon2 enforces the lower bounds (one lane, one pass, 8 KiB per lane);
    /// the upper bounds keep a hostile keystore from exhausting memory.
    pub fn params(&self) -> std::result::Result<Params, String> {
        if self.memory_kib > MAX_KDF_MEMORY_KIB {
            return Err(format!(
                "memory cost {} KiB exceeds {} KiB",
                self.memory_kib, MAX_KDF_MEMORY_KIB
            ));
        }
        if self.parallelism > MAX_KDF_PARALLELISM {
            return Err(format!(
                "parallelism {} exceeds {}",
                self.parallelism, MAX_KDF_PARALLELISM
            ));
        }
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| e.to_string())
    }

    /// Derive the symmetric key for `passphrase` and `salt`
    pub fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let params = self
            .params()
            .map_err(|e| Error::Crypto(format!("Invalid Argon2 parameters: {}", e)))?;

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}

/// Persisted keystore record, one per wallet identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreRecord {
    pub version: u32,

    /// Base58 public key, readable without the passphrase
    pub public_key: String,

    /// Base64 Argon2 salt
    pub salt: String,

    /// Base64 AES-GCM nonce
    pub nonce: String,

    /// Base64 ciphertext including the GCM tag
    pub ciphertext: String,

    pub kdf: KdfParams,

    pub created_at: DateTime<Utc>,
}

impl KeystoreRecord {
    /// Encrypt `keypair` under `passphrase`
    pub fn seal(keypair: &Keypair, passphrase: &str, kdf: KdfParams) -> Result<Self> {
        let mut rng = rand::thread_rng();

        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce_bytes);

        let key = kdf.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| Error::Crypto(format!("AES key init failed: {}", e)))?;

        let plaintext = Zeroizing::new(keypair.to_bytes());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), &plaintext[..])
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(Self {
            version: KEYSTORE_VERSION,
            public_key: keypair.pubkey().to_string(),
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
            kdf,
            created_at: Utc::now(),
        })
    }

    /// Decrypt the keypair; any mismatch means a wrong passphrase
    pub fn open(&self, passphrase: &str) -> Result<Keypair> {
        let (salt, nonce, ciphertext) = self.decoded()?;

        let key = self.kdf.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| Error::Crypto(format!("AES key init failed: {}", e)))?;

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
                .map_err(|_| Error::WrongPassphrase)?,
        );

        let keypair = keypair_from_bytes(&plaintext).map_err(|_| Error::WrongPassphrase)?;
        if keypair.pubkey().to_string() != self.public_key {
            return Err(Error::WrongPassphrase);
        }
        Ok(keypair)
    }

    pub fn pubkey(&self) -> Result<Pubkey> {
        self.public_key
            .parse()
            .map_err(|e| Error::CorruptKeystore(format!("Invalid public key: {}", e)))
    }

    /// Check the record is structurally usable before anyone tries to unlock it
    pub fn validate(&self) -> Result<()> {
        if self.version != KEYSTORE_VERSION {
            return Err(Error::CorruptKeystore(format!(
                "Unsupported keystore version: {}",
                self.version
            )));
        }
        self.kdf
            .params()
            .map_err(|e| Error::CorruptKeystore(format!("Invalid KDF parameters: {}", e)))?;
        self.pubkey()?;
        self.decoded()?;
        Ok(())
    }

    fn decoded(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let decode = |field: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|e| Error::CorruptKeystore(format!("Invalid {} encoding: {}", field, e)))
        };
        let salt = decode("salt", &self.salt)?;
        let nonce = decode("nonce", &self.nonce)?;
        let ciphertext = decode("ciphertext", &self.ciphertext)?;

        if salt.len() < 16 {
            return Err(Error::CorruptKeystore(format!(
                "Salt too short: {} bytes",
                salt.len()
            )));
        }
        if nonce.len() != NONCE_LEN {
            return Err(Error::CorruptKeystore(format!(
                "Invalid nonce length: {}",
                nonce.len()
            )));
        }
        if ciphertext.len() != KEYPAIR_LEN + TAG_LEN {
            return Err(Error::CorruptKeystore(format!(
                "Invalid ciphertext length: {}",
                ciphertext.len()
            )));
        }
        Ok((salt, nonce, ciphertext))
    }

    /// Load and validate a record
    ///
    /// A missing file is [`Error::NoKeystore`]; anything unreadable or malformed is
    /// [`Error::CorruptKeystore`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NoKeystore);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::CorruptKeystore(format!("Failed to read keystore: {}", e)))?;
        let record: KeystoreRecord = serde_json::from_str(&content)
            .map_err(|e| Error::CorruptKeystore(format!("Failed to parse keystore: {}", e)))?;
        record.validate()?;

        debug!("Loaded keystore for {}", record.public_key);
        Ok(record)
    }

    /// Write the record, replacing any previous one
    ///
    /// Parent directories are created as needed. The file is written next to the
    /// target and renamed over it, with owner-only permissions on Unix.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)?;

        info!("Saved keystore for {} to {}", self.public_key, path.display());
        Ok(())
    }
}

/// Parse 64 keypair bytes, checking the public half matches the secret half
pub fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != KEYPAIR_LEN {
        return Err(Error::InvalidKeypair(format!(
            "Expected {} bytes, got {}",
            KEYPAIR_LEN,
            bytes.len()
        )));
    }

    let keypair = keypair_from_seed(&bytes[..32])
        .map_err(|e| Error::InvalidKeypair(format!("Invalid secret key: {}", e)))?;
    if keypair.pubkey().to_bytes()[..] != bytes[32..] {
        return Err(Error::InvalidKeypair(
            "Public key does not match secret key".to_string(),
        ));
    }
    Ok(keypair)
}

/// Parse a base58-encoded 64-byte secret as exported by Solana wallets
pub fn keypair_from_base58(secret: &str) -> Result<Keypair> {
    let bytes = Zeroizing::new(
        bs58::decode(secret.trim())
            .into_vec()
            .map_err(|e| Error::InvalidKeypair(format!("Invalid base58 secret: {}", e)))?,
    );
    keypair_from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Cheap parameters so tests stay fast
    fn test_kdf() -> KdfParams {
        KdfParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_seal_and_open() {
        let keypair = Keypair::new();
        let record = KeystoreRecord::seal(&keypair, "correct horse", test_kdf()).unwrap();

        assert_eq!(record.public_key, keypair.pubkey().to_string());
        let opened = record.open("correct horse").unwrap();
        assert_eq!(opened.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_wrong_passphrase() {
        let record = KeystoreRecord::seal(&Keypair::new(), "correct horse", test_kdf()).unwrap();
        for guess in ["bad passphrase", "", "correct horse "] {
            assert!(matches!(record.open(guess), Err(Error::WrongPassphrase)));
        }
    }

    #[test]
    fn test_ciphertext_never_contains_secret() {
        let keypair = Keypair::new();
        let record = KeystoreRecord::seal(&keypair, "pw", test_kdf()).unwrap();
        let ciphertext = BASE64.decode(&record.ciphertext).unwrap();

        assert_eq!(ciphertext.len(), KEYPAIR_LEN + TAG_LEN);
        assert_ne!(&ciphertext[..KEYPAIR_LEN], &keypair.to_bytes()[..]);
    }

    #[test]
    fn test_salt_is_fresh_per_seal() {
        let keypair = Keypair::new();
        let first = KeystoreRecord::seal(&keypair, "pw", test_kdf()).unwrap();
        let second = KeystoreRecord::seal(&keypair, "pw", test_kdf()).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("keystore.json");
        let keypair = Keypair::new();

        KeystoreRecord::seal(&keypair, "pw", test_kdf())
            .unwrap()
            .save(&path)
            .unwrap();

        let loaded = KeystoreRecord::load(&path).unwrap();
        assert_eq!(loaded.pubkey().unwrap(), keypair.pubkey());
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        assert!(matches!(KeystoreRecord::load(&path), Err(Error::NoKeystore)));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            KeystoreRecord::load(&path),
            Err(Error::CorruptKeystore(_))
        ));

        let mut record = KeystoreRecord::seal(&Keypair::new(), "pw", test_kdf()).unwrap();
        record.nonce = BASE64.encode([0u8; 4]);
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
        assert!(matches!(
            KeystoreRecord::load(&path),
            Err(Error::CorruptKeystore(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_kdf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let record = KeystoreRecord::seal(&Keypair::new(), "pw", test_kdf()).unwrap();

        let bad = [
            (256, 1, 0),
            (0, 1, 1),
            (256, 0, 1),
            (u32::MAX, 1, 1),
            (8192, 1, MAX_KDF_PARALLELISM + 1),
        ];
        for (memory_kib, iterations, parallelism) in bad {
            let kdf = KdfParams {
                memory_kib,
                iterations,
                parallelism,
            };
            let mut tampered = record.clone();
            tampered.kdf = kdf;
            std::fs::write(&path, serde_json::to_string(&tampered).unwrap()).unwrap();
            assert!(
                matches!(KeystoreRecord::load(&path), Err(Error::CorruptKeystore(_))),
                "{:?} should be rejected",
                kdf
            );
        }

        assert!(test_kdf().params().is_ok());
        assert!(KdfParams::default().params().is_ok());
    }

    #[test]
    fn test_keypair_from_bytes_rejects_mismatch() {
        let keypair = Keypair::new();
        let mut bytes = keypair.to_bytes();
        assert!(keypair_from_bytes(&bytes).is_ok());

        bytes[40] ^= 0xff;
        assert!(keypair_from_bytes(&bytes).is_err());
        assert!(keypair_from_bytes(&bytes[..32]).is_err());
    }

    #[test]
    fn test_keypair_from_base58() {
        let keypair = Keypair::new();
        let encoded = keypair.to_base58_string();

        let imported = keypair_from_base58(&format!("  {}\n", encoded)).unwrap();
        assert_eq!(imported.pubkey(), keypair.pubkey());
        assert!(keypair_from_base58("not-base58-0OIl").is_err());
    }
}
