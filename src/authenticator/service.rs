//! Authenticator operations: make-credential and get-assertion
//!
//! Every failure after a credential has been generated deletes it again, so an
//! aborted registration never leaves a usable key behind.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::prompt::{CredentialSelector, SigningHandle, VerificationPrompt};
use super::safe::CredentialSafe;
use super::types::{
    AssertionResult, AttestationObject, CredentialSource, GetAssertionOptions,
    MakeCredentialOptions, PUBLIC_KEY_CREDENTIAL_TYPE,
};
use crate::codec::{
    encode_attested_credential_data, encode_authenticator_data, encode_public_key_cose,
    COSE_ALG_ES256,
};
use crate::errors::{Cancelled, CeremonyError};
use crate::settings::AuthenticatorSettings;
use crate::utils::crypto::sha256;

fn internal(err: impl Display) -> CeremonyError {
    CeremonyError::Unknown(err.to_string())
}

/// Device-side half of the protocol
pub struct Authenticator {
    safe: Arc<dyn CredentialSafe>,
    prompt: Arc<dyn VerificationPrompt>,
    verification_timeout: Duration,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        safe: Arc<dyn CredentialSafe>,
        prompt: Arc<dyn VerificationPrompt>,
        verification_timeout: Duration,
    ) -> Self {
        Self {
            safe,
            prompt,
            verification_timeout,
        }
    }

    #[must_use]
    pub fn from_settings(
        safe: Arc<dyn CredentialSafe>,
        prompt: Arc<dyn VerificationPrompt>,
        settings: &AuthenticatorSettings,
    ) -> Self {
        Self::new(
            safe,
            prompt,
            Duration::from_secs(settings.verification_timeout_seconds),
        )
    }

    #[must_use]
    pub fn credential_safe(&self) -> &Arc<dyn CredentialSafe> {
        &self.safe
    }

    /// Create a new credential and return its self-attestation
    ///
    /// # Errors
    ///
    /// - `Unknown` if the options are malformed or the credential safe fails
    /// - `NotSupported` if ES256 is not among the requested algorithms
    /// - `ConstraintViolation` if user verification is required but unavailable
    /// - `NotAllowed` if the user cancels or the prompt times out
    /// - `InvalidState` if the exclude list names an existing credential
    pub async fn make_credential(
        &self,
        options: &MakeCredentialOptions,
    ) -> Result<AttestationObject, CeremonyError> {
        if !options.are_well_formed() {
            warn!("MakeCredential options are not well-formed");
            return Err(CeremonyError::Unknown(
                "MakeCredential options are not well-formed".to_string(),
            ));
        }

        if !options.algorithms.contains(&COSE_ALG_ES256) {
            return Err(CeremonyError::NotSupported(format!(
                "No supported algorithm in {:?}",
                options.algorithms
            )));
        }

        // Checked now, acted on only after consent
        let exclude_flag = options.exclude_credentials.iter().any(|descriptor| {
            descriptor.credential_type == PUBLIC_KEY_CREDENTIAL_TYPE
                && self
                    .safe
                    .find_credential(&options.rp_id, &descriptor.id)
                    .is_some()
        });

        if options.require_user_verification && !self.safe.supports_user_verification() {
            return Err(CeremonyError::ConstraintViolation(
                "User verification required but not supported".to_string(),
            ));
        }

        let credential = self
            .safe
            .generate_credential(&options.rp_id, &options.user_id, &options.user_name)
            .map_err(internal)?;

        let attestation = match self.attest(options, &credential).await {
            Ok(attestation) => attestation,
            Err(e) => {
                self.discard(&credential);
                return Err(e);
            }
        };

        if exclude_flag {
            self.discard(&credential);
            return Err(CeremonyError::InvalidState(
                "Credential is excluded for this relying party".to_string(),
            ));
        }

        debug!("MakeCredential completed for rp_id {}", options.rp_id);
        Ok(attestation)
    }

    async fn attest(
        &self,
        options: &MakeCredentialOptions,
        credential: &CredentialSource,
    ) -> Result<AttestationObject, CeremonyError> {
        let handle =
            if options.require_user_verification || self.safe.supports_user_verification() {
                Some(self.verify_user(credential).await?)
            } else {
                None
            };
        let user_verified = handle.is_some();

        let public_key = self
            .safe
            .public_key(&credential.key_pair_alias)
            .map_err(internal)?;
        let cose_key = encode_public_key_cose(&public_key).map_err(internal)?;
        let attested = encode_attested_credential_data(&credential.credential_id, &cose_key)
            .map_err(internal)?;
        let rp_id_hash = sha256(options.rp_id.as_bytes());
        let authenticator_data =
            encode_authenticator_data(&rp_id_hash, Some(&attested), 0, user_verified)
                .map_err(internal)?;

        let signature = self.sign(
            credential,
            handle.as_ref(),
            &authenticator_data,
            &options.client_data_hash,
        )?;

        Ok(AttestationObject {
            credential_id: credential.credential_id.clone(),
            authenticator_data,
            signature,
        })
    }

    /// Sign an assertion with one of `candidates`
    ///
    /// # Errors
    ///
    /// - `Unknown` if the options are malformed or signing fails
    /// - `NotAllowed` if no candidate survives the allow list, none is selected,
    ///   or user verification is declined
    pub async fn get_assertion(
        &self,
        options: &GetAssertionOptions,
        candidates: Vec<CredentialSource>,
        selector: &dyn CredentialSelector,
    ) -> Result<AssertionResult, CeremonyError> {
        if !options.are_well_formed() {
            warn!("GetAssertion options are not well-formed");
            return Err(CeremonyError::Unknown(
                "GetAssertion options are not well-formed".to_string(),
            ));
        }

        let mut credentials = candidates;
        if !options.allow_credentials.is_empty() {
            credentials.retain(|credential| {
                options.allow_credentials.iter().any(|descriptor| {
                    descriptor.credential_type == PUBLIC_KEY_CREDENTIAL_TYPE
                        && descriptor.id == credential.credential_id
                })
            });
        }

        let selected = match credentials.len() {
            0 => {
                debug!("No credentials for rp_id {}", options.rp_id);
                return Err(CeremonyError::NotAllowed(
                    "No credentials for this relying party".to_string(),
                ));
            }
            1 => credentials.swap_remove(0),
            _ => selector.select_from(&credentials).ok_or_else(|| {
                CeremonyError::NotAllowed("User did not select a credential".to_string())
            })?,
        };

        let handle = if options.require_user_verification
            || self.safe.key_requires_verification(&selected.key_pair_alias)
        {
            Some(self.verify_user(&selected).await?)
        } else {
            None
        };
        let user_verified = handle.is_some();

        let counter = self
            .safe
            .increment_use_counter(&selected)
            .map_err(internal)?;

        let rp_id_hash = sha256(options.rp_id.as_bytes());
        let authenticator_data =
            encode_authenticator_data(&rp_id_hash, None, counter, user_verified)
                .map_err(internal)?;
        let signature = self.sign(
            &selected,
            handle.as_ref(),
            &authenticator_data,
            &options.client_data_hash,
        )?;

        let user_handle =
            (!selected.user_handle.is_empty()).then(|| selected.user_handle.clone());

        Ok(AssertionResult {
            credential_id: selected.credential_id,
            authenticator_data,
            signature,
            user_handle,
        })
    }

    /// [`Self::get_assertion`] over every credential the safe holds for `options.rp_id`
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_assertion`].
    pub async fn get_assertion_for_rp(
        &self,
        options: &GetAssertionOptions,
        selector: &dyn CredentialSelector,
    ) -> Result<AssertionResult, CeremonyError> {
        let candidates = self.safe.credentials_for_rp(&options.rp_id);
        self.get_assertion(options, candidates, selector).await
    }

    async fn verify_user(&self, credential: &CredentialSource) -> Result<SigningHandle, CeremonyError> {
        let outcome =
            match tokio::time::timeout(self.verification_timeout, self.prompt.request(credential))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "User verification timed out after {}s",
                        self.verification_timeout.as_secs()
                    );
                    Err(Cancelled)
                }
            };

        let handle = outcome
            .map_err(|Cancelled| CeremonyError::NotAllowed("User verification failed".to_string()))?;
        if !handle.unlocks(credential) {
            return Err(CeremonyError::NotAllowed(
                "Signing handle was issued for another key".to_string(),
            ));
        }
        Ok(handle)
    }

    fn sign(
        &self,
        credential: &CredentialSource,
        handle: Option<&SigningHandle>,
        authenticator_data: &[u8],
        client_data_hash: &[u8],
    ) -> Result<Vec<u8>, CeremonyError> {
        let mut to_sign = Vec::with_capacity(authenticator_data.len() + client_data_hash.len());
        to_sign.extend_from_slice(authenticator_data);
        to_sign.extend_from_slice(client_data_hash);
        self.safe
            .sign(&credential.key_pair_alias, handle, &to_sign)
            .map_err(internal)
    }

    fn discard(&self, credential: &CredentialSource) {
        if let Err(e) = self.safe.delete_credential(credential) {
            warn!("Failed to delete abandoned credential: {e}");
        }
    }
}
