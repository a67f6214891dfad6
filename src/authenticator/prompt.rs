//! User verification and credential selection seams

use async_trait::async_trait;

use super::types::CredentialSource;
use crate::errors::Cancelled;

/// Proof that the user unlocked one specific key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningHandle {
    key_pair_alias: String,
}

impl SigningHandle {
    #[must_use]
    pub fn new(key_pair_alias: &str) -> Self {
        Self {
            key_pair_alias: key_pair_alias.to_string(),
        }
    }

    #[must_use]
    pub fn for_credential(credential: &CredentialSource) -> Self {
        Self::new(&credential.key_pair_alias)
    }

    #[must_use]
    pub fn key_pair_alias(&self) -> &str {
        &self.key_pair_alias
    }

    /// Whether this handle was issued for `credential`'s key
    #[must_use]
    pub fn unlocks(&self, credential: &CredentialSource) -> bool {
        self.key_pair_alias == credential.key_pair_alias
    }
}

/// Biometric (or equivalent) prompt shown before a key may sign
///
/// Implementations suspend until the user answers. The authenticator bounds
/// the wait with a timeout and treats expiry as [`Cancelled`].
#[async_trait]
pub trait VerificationPrompt: Send + Sync {
    /// Ask the user to unlock `credential`
    ///
    /// # Errors
    /// Returns `Cancelled` if the user declines or fails verification.
    async fn request(&self, credential: &CredentialSource) -> Result<SigningHandle, Cancelled>;
}

/// Lets the user pick one credential when several match
pub trait CredentialSelector: Send + Sync {
    fn select_from(&self, credentials: &[CredentialSource]) -> Option<CredentialSource>;
}

/// Prompt for safes without user verification: every request is approved
pub struct PresencePrompt;

#[async_trait]
impl VerificationPrompt for PresencePrompt {
    async fn request(&self, credential: &CredentialSource) -> Result<SigningHandle, Cancelled> {
        Ok(SigningHandle::for_credential(credential))
    }
}
