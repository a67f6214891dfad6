//! Test fixtures: every service wired over in-memory stores
//!
//! The fixture also owns a software authenticator, so tests can run real
//! ceremonies end to end instead of hand-assembling signed bytes.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::builders::ClientDataBuilder;
use super::constants::{TEST_RNG_SEED, TEST_RP_ID};
use super::mock::FirstCredentialSelector;
use crate::authenticator::{
    Authenticator, CredentialDescriptor, CredentialSafe, GetAssertionOptions,
    MakeCredentialOptions, PresencePrompt, SoftwareCredentialSafe,
};
use crate::codec::RawAuthenticationResponse;
use crate::relying_party::client_data::REGISTER_FINISH_TYPE;
use crate::relying_party::crypto::rp_id_hash;
use crate::relying_party::types::{
    AuthenticateResponse, DeviceRegistration, RegisterResponse, RequestMessage,
};
use crate::relying_party::{AuthenticationService, RegistrationService};
use crate::settings::KeyCeremonySettings;
use crate::store::{ChallengeStore, DeviceRegistrationStore, MemoryEntryStore};
use crate::sweeper::ExpirySweeper;
use crate::utils::crypto::{decode_b64url, encode_b64url, sha256};

pub struct TestFixtures {
    pub settings: KeyCeremonySettings,
    pub challenges: Arc<ChallengeStore>,
    pub devices: Arc<DeviceRegistrationStore>,
    pub registration: RegistrationService,
    pub authentication: AuthenticationService,
    pub safe: Arc<SoftwareCredentialSafe>,
    pub authenticator: Authenticator,
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixtures {
    /// Default settings pointed at [`TEST_RP_ID`]
    #[must_use]
    pub fn settings() -> KeyCeremonySettings {
        let mut settings = KeyCeremonySettings::default();
        settings.relying_party.rp_id = TEST_RP_ID.to_string();
        settings.authenticator.verification_timeout_seconds = 5;
        settings
    }

    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(Self::settings())
    }

    #[must_use]
    pub fn with_settings(settings: KeyCeremonySettings) -> Self {
        let challenges = Arc::new(ChallengeStore::from_settings(
            Arc::new(MemoryEntryStore::new()),
            StdRng::seed_from_u64(TEST_RNG_SEED),
            &settings.challenges,
        ));
        let devices = Arc::new(DeviceRegistrationStore::new(Arc::new(
            MemoryEntryStore::new(),
        )));
        let safe = Arc::new(SoftwareCredentialSafe::new());
        let authenticator = Authenticator::from_settings(
            Arc::clone(&safe) as Arc<dyn CredentialSafe>,
            Arc::new(PresencePrompt),
            &settings.authenticator,
        );

        Self {
            registration: RegistrationService::new(Arc::clone(&challenges), Arc::clone(&devices)),
            authentication: AuthenticationService::new(
                Arc::clone(&challenges),
                Arc::clone(&devices),
            ),
            settings,
            challenges,
            devices,
            safe,
            authenticator,
        }
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.settings.relying_party.rp_id
    }

    /// Sweeper over this fixture's stores
    #[must_use]
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(self.challenges.entry_store()),
            Arc::clone(self.devices.entry_store()),
            &self.settings,
        )
    }

    /// Answer a registration request with a fresh credential from the software authenticator
    ///
    /// # Panics
    ///
    /// Panics if the authenticator fails to make a credential.
    pub async fn register_response(&self, message: &RequestMessage, typ: &str) -> RegisterResponse {
        let client_data = ClientDataBuilder::new(typ, &message.challenge).build_json();
        let user_id = message.owner_user_id.as_deref().unwrap_or("pending-user");
        let options = MakeCredentialOptions::new(
            &message.rp_id,
            user_id.as_bytes(),
            user_id,
            &sha256(&client_data),
        );

        let attestation = self
            .authenticator
            .make_credential(&options)
            .await
            .expect("make_credential should succeed");
        let registration_data = attestation
            .to_registration_response()
            .expect("attestation should encode");

        RegisterResponse {
            registration_data: encode_b64url(&registration_data),
            client_data: encode_b64url(&client_data),
            device_data: None,
        }
    }

    /// Run a full registration for `owner_user_id` (or a pending one-step registration)
    ///
    /// # Panics
    ///
    /// Panics if any ceremony step fails.
    pub async fn register_device(&self, owner_user_id: Option<&str>) -> DeviceRegistration {
        let message = self
            .registration
            .build_registration_request(self.rp_id(), owner_user_id, None)
            .expect("registration request");
        let response = self.register_response(&message, REGISTER_FINISH_TYPE).await;
        self.registration
            .finish_registration(&message, &response, owner_user_id, None)
            .expect("registration should be approved")
            .registration
    }

    /// Answer an authentication request with the software authenticator, which
    /// increments its own use counter
    ///
    /// # Panics
    ///
    /// Panics if the key handle is not base64url or the authenticator fails.
    pub async fn authenticate_response(
        &self,
        message: &RequestMessage,
        key_handle: &str,
        typ: &str,
    ) -> AuthenticateResponse {
        let client_data = ClientDataBuilder::new(typ, &message.challenge).build_json();
        let mut options = GetAssertionOptions::new(&message.rp_id, &sha256(&client_data));
        options.allow_credentials = vec![CredentialDescriptor::public_key(
            decode_b64url(key_handle).expect("key handle should be base64url"),
        )];

        let assertion = self
            .authenticator
            .get_assertion_for_rp(&options, &FirstCredentialSelector)
            .await
            .expect("get_assertion should succeed");
        let signature_data = assertion
            .to_authentication_response()
            .expect("assertion should encode");

        AuthenticateResponse {
            request_id: message.request_id.clone(),
            key_handle: key_handle.to_string(),
            signature_data: encode_b64url(&signature_data),
            client_data: encode_b64url(&client_data),
        }
    }

    /// Authentication response with a chosen flags byte and counter, validly
    /// signed by the registered key; the authenticator's own counter is untouched
    ///
    /// # Panics
    ///
    /// Panics if the safe holds no credential for `key_handle`.
    #[must_use]
    pub fn signed_authentication_response(
        &self,
        message: &RequestMessage,
        key_handle: &str,
        typ: &str,
        flags: u8,
        counter: u32,
    ) -> AuthenticateResponse {
        let client_data = ClientDataBuilder::new(typ, &message.challenge).build_json();
        let credential_id = decode_b64url(key_handle).expect("key handle should be base64url");
        let credential = self
            .safe
            .find_credential(&message.rp_id, &credential_id)
            .expect("credential should exist");

        let mut raw = RawAuthenticationResponse {
            flags,
            counter,
            signature: Vec::new(),
        };
        let signed = raw.signed_data(&rp_id_hash(&message.rp_id), &sha256(&client_data));
        raw.signature = self
            .safe
            .sign(&credential.key_pair_alias, None, &signed)
            .expect("signing should succeed");

        AuthenticateResponse {
            request_id: message.request_id.clone(),
            key_handle: key_handle.to_string(),
            signature_data: encode_b64url(&raw.encode()),
            client_data: encode_b64url(&client_data),
        }
    }
}
