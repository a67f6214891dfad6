//! Credential safe: key custody and signing
//!
//! [`CredentialSafe`] is the seam to whatever holds the private keys (a
//! platform keystore, a secure element). [`SoftwareCredentialSafe`] keeps
//! ECDSA P-256 keys in memory with `ring` and can persist its use counters.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use log::{debug, warn};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

use super::prompt::SigningHandle;
use super::types::CredentialSource;
use crate::errors::SafeError;
use crate::utils::crypto::{encode_b64url, generate_random_bytes};

const CREDENTIAL_ID_LEN: usize = 32;
const KEY_ALIAS_PREFIX: &str = "keyceremony-keypair-";

/// Key custody interface used by the authenticator
pub trait CredentialSafe: Send + Sync {
    /// Generate a fresh key pair and the credential source that refers to it
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    fn generate_credential(
        &self,
        rp_id: &str,
        user_id: &[u8],
        user_name: &str,
    ) -> Result<CredentialSource, SafeError>;

    /// Uncompressed SEC1 public key for `key_pair_alias`
    ///
    /// # Errors
    /// Returns `SafeError::UnknownAlias` if the key does not exist.
    fn public_key(&self, key_pair_alias: &str) -> Result<Vec<u8>, SafeError>;

    /// DER-encoded ES256 signature over `data`
    ///
    /// A key that requires user verification only signs with a `handle` issued for it.
    ///
    /// # Errors
    ///
    /// - `SafeError::VerificationRequired` if the key needs a handle and none matches
    /// - `SafeError::UnknownAlias` if the key does not exist
    /// - `SafeError::Signing` if signing fails
    fn sign(
        &self,
        key_pair_alias: &str,
        handle: Option<&SigningHandle>,
        data: &[u8],
    ) -> Result<Vec<u8>, SafeError>;

    fn supports_user_verification(&self) -> bool;

    fn key_requires_verification(&self, key_pair_alias: &str) -> bool;

    /// Remove the credential and its key. Deleting an unknown credential is a no-op.
    ///
    /// # Errors
    /// Returns an error if the safe cannot be updated.
    fn delete_credential(&self, credential: &CredentialSource) -> Result<(), SafeError>;

    fn find_credential(&self, rp_id: &str, credential_id: &[u8]) -> Option<CredentialSource>;

    fn credentials_for_rp(&self, rp_id: &str) -> Vec<CredentialSource>;

    /// Increment and return the use counter. A returned value is never handed out again.
    ///
    /// # Errors
    /// Returns an error if the new value cannot be made durable.
    fn increment_use_counter(&self, credential: &CredentialSource) -> Result<u32, SafeError>;
}

struct StoredKey {
    key_pair: EcdsaKeyPair,
    requires_verification: bool,
}

/// In-memory credential safe backed by `ring`
pub struct SoftwareCredentialSafe {
    rng: SystemRandom,
    keys: RwLock<HashMap<String, StoredKey>>,
    credentials: RwLock<Vec<CredentialSource>>,
    counters: Mutex<HashMap<String, u32>>,
    counter_file: Option<PathBuf>,
    user_verification: bool,
}

impl Default for SoftwareCredentialSafe {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareCredentialSafe {
    /// Safe without user verification and with volatile counters
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
            keys: RwLock::new(HashMap::new()),
            credentials: RwLock::new(Vec::new()),
            counters: Mutex::new(HashMap::new()),
            counter_file: None,
            user_verification: false,
        }
    }

    /// Safe whose counters are loaded from and written through to `path`
    ///
    /// # Errors
    /// Returns `SafeError::Counter` if an existing counter file cannot be read or parsed.
    pub fn with_counter_file(path: impl AsRef<Path>) -> Result<Self, SafeError> {
        let path = path.as_ref().to_path_buf();
        let counters = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| SafeError::Counter(format!("Failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&content).map_err(|e| {
                SafeError::Counter(format!("Failed to parse {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };
        debug!("Loaded {} use counters from {}", counters.len(), path.display());

        Ok(Self {
            counters: Mutex::new(counters),
            counter_file: Some(path),
            ..Self::new()
        })
    }

    /// Enable user verification; keys generated afterwards require it
    #[must_use]
    pub fn with_user_verification(mut self, enabled: bool) -> Self {
        self.user_verification = enabled;
        self
    }

    fn persist_counters(&self, counters: &HashMap<String, u32>) -> Result<(), SafeError> {
        let Some(path) = &self.counter_file else {
            return Ok(());
        };
        let json = serde_json::to_vec(counters)
            .map_err(|e| SafeError::Counter(format!("Failed to serialize counters: {e}")))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)
            .map_err(|e| SafeError::Counter(format!("Failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| SafeError::Counter(format!("Failed to replace {}: {e}", path.display())))
    }
}

impl CredentialSafe for SoftwareCredentialSafe {
    fn generate_credential(
        &self,
        rp_id: &str,
        user_id: &[u8],
        user_name: &str,
    ) -> Result<CredentialSource, SafeError> {
        let credential_id = generate_random_bytes(&self.rng, CREDENTIAL_ID_LEN)?;
        let key_pair_alias = format!("{KEY_ALIAS_PREFIX}{}", encode_b64url(&credential_id));

        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.rng)
            .map_err(|_| SafeError::KeyGeneration("P-256 key generation failed".to_string()))?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &self.rng)
                .map_err(|e| SafeError::KeyGeneration(format!("Generated key rejected: {e}")))?;

        let credential = CredentialSource {
            credential_id,
            rp_id: rp_id.to_string(),
            user_handle: user_id.to_vec(),
            user_display_name: user_name.to_string(),
            key_pair_alias: key_pair_alias.clone(),
            created_at: Utc::now(),
        };

        self.keys.write().map_err(|_| SafeError::Poisoned)?.insert(
            key_pair_alias,
            StoredKey {
                key_pair,
                requires_verification: self.user_verification,
            },
        );
        self.credentials
            .write()
            .map_err(|_| SafeError::Poisoned)?
            .push(credential.clone());

        debug!("Generated credential for rp_id {rp_id}");
        Ok(credential)
    }

    fn public_key(&self, key_pair_alias: &str) -> Result<Vec<u8>, SafeError> {
        let keys = self.keys.read().map_err(|_| SafeError::Poisoned)?;
        keys.get(key_pair_alias)
            .map(|stored| stored.key_pair.public_key().as_ref().to_vec())
            .ok_or_else(|| SafeError::UnknownAlias(key_pair_alias.to_string()))
    }

    fn sign(
        &self,
        key_pair_alias: &str,
        handle: Option<&SigningHandle>,
        data: &[u8],
    ) -> Result<Vec<u8>, SafeError> {
        let keys = self.keys.read().map_err(|_| SafeError::Poisoned)?;
        let stored = keys
            .get(key_pair_alias)
            .ok_or_else(|| SafeError::UnknownAlias(key_pair_alias.to_string()))?;
        if stored.requires_verification
            && !handle.is_some_and(|handle| handle.key_pair_alias() == key_pair_alias)
        {
            return Err(SafeError::VerificationRequired(key_pair_alias.to_string()));
        }
        let signature = stored
            .key_pair
            .sign(&self.rng, data)
            .map_err(|_| SafeError::Signing("ECDSA signing failed".to_string()))?;
        Ok(signature.as_ref().to_vec())
    }

    fn supports_user_verification(&self) -> bool {
        self.user_verification
    }

    fn key_requires_verification(&self, key_pair_alias: &str) -> bool {
        self.keys
            .read()
            .map(|keys| {
                keys.get(key_pair_alias)
                    .is_some_and(|stored| stored.requires_verification)
            })
            .unwrap_or(true)
    }

    fn delete_credential(&self, credential: &CredentialSource) -> Result<(), SafeError> {
        self.keys
            .write()
            .map_err(|_| SafeError::Poisoned)?
            .remove(&credential.key_pair_alias);
        self.credentials
            .write()
            .map_err(|_| SafeError::Poisoned)?
            .retain(|c| c.credential_id != credential.credential_id);

        let mut counters = self.counters.lock().map_err(|_| SafeError::Poisoned)?;
        if counters.remove(&credential.key_pair_alias).is_some() {
            if let Err(e) = self.persist_counters(&counters) {
                warn!("Counter file not updated after credential deletion: {e}");
            }
        }
        Ok(())
    }

    fn find_credential(&self, rp_id: &str, credential_id: &[u8]) -> Option<CredentialSource> {
        let credentials = self.credentials.read().ok()?;
        credentials
            .iter()
            .find(|c| c.rp_id == rp_id && c.credential_id == credential_id)
            .cloned()
    }

    fn credentials_for_rp(&self, rp_id: &str) -> Vec<CredentialSource> {
        self.credentials
            .read()
            .map(|credentials| {
                credentials
                    .iter()
                    .filter(|c| c.rp_id == rp_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn increment_use_counter(&self, credential: &CredentialSource) -> Result<u32, SafeError> {
        let mut counters = self.counters.lock().map_err(|_| SafeError::Poisoned)?;
        let current = counters
            .get(&credential.key_pair_alias)
            .copied()
            .unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| SafeError::Counter("Use counter exhausted".to_string()))?;

        counters.insert(credential.key_pair_alias.clone(), next);
        if let Err(e) = self.persist_counters(&counters) {
            counters.insert(credential.key_pair_alias.clone(), current);
            return Err(e);
        }
        Ok(next)
    }
}
