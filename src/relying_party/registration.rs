//! Registration ceremony, relying-party side
//!
//! A registration request carries one fresh challenge. For a known user it
//! also carries one authentication sub-request per active device, so the same
//! ceremony can re-prove possession of earlier devices.

use std::sync::Arc;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use super::client_data::{verify_client_data, CeremonyType};
use super::crypto::{rp_id_hash, verify_es256_signature};
use super::types::{
    AuthenticateRequest, CeremonyStatus, DeviceRegistration, DeviceRegistrationResult,
    DeviceStatus, RegisterRequest, RegisterResponse, RequestKind, RequestMessage, U2F_VERSION,
};
use crate::codec::RawRegistrationResponse;
use crate::errors::CeremonyError;
use crate::store::{key_handle_hash, ChallengeStore, DeviceRegistrationStore};
use crate::utils::crypto::{decode_b64url, encode_b64url};
use crate::utils::logging::LoggingHelper;

pub struct RegistrationService {
    challenges: Arc<ChallengeStore>,
    devices: Arc<DeviceRegistrationStore>,
}

impl RegistrationService {
    #[must_use]
    pub fn new(challenges: Arc<ChallengeStore>, devices: Arc<DeviceRegistrationStore>) -> Self {
        Self {
            challenges,
            devices,
        }
    }

    /// Issue and store a registration request
    ///
    /// # Arguments
    /// * `rp_id` - Relying party the device registers with
    /// * `owner_user_id` - Present for two-step registration of a known user
    /// * `session_id` - Optional caller session to tie the request to
    ///
    /// # Errors
    /// Returns `Unknown` if the challenge cannot be generated or stored.
    pub fn build_registration_request(
        &self,
        rp_id: &str,
        owner_user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<RequestMessage, CeremonyError> {
        let challenge = self.challenges.generate_challenge()?;

        let authenticate_requests = match owner_user_id {
            Some(owner) => self
                .devices
                .find_user_devices(owner, rp_id)?
                .into_iter()
                .filter(|device| !device.is_compromised())
                .map(|device| AuthenticateRequest {
                    version: U2F_VERSION.to_string(),
                    challenge: challenge.clone(),
                    app_id: rp_id.to_string(),
                    key_handle: device.key_handle,
                })
                .collect(),
            None => Vec::new(),
        };

        let message = RequestMessage {
            id: Uuid::new_v4().to_string(),
            request_id: self.challenges.generate_request_id()?,
            kind: RequestKind::Registration,
            rp_id: rp_id.to_string(),
            session_id: session_id.map(ToString::to_string),
            owner_user_id: owner_user_id.map(ToString::to_string),
            register_requests: vec![RegisterRequest {
                version: U2F_VERSION.to_string(),
                challenge: challenge.clone(),
                app_id: rp_id.to_string(),
            }],
            challenge,
            authenticate_requests,
            created_at: Utc::now(),
        };

        self.challenges.persist(message.clone())?;
        LoggingHelper::log_request_issued(
            "registration",
            rp_id,
            &message.request_id,
            message.register_requests.len() + message.authenticate_requests.len(),
        );
        Ok(message)
    }

    /// Verify a registration response and store the new device
    ///
    /// The request message is consumed first, so a response can be finished
    /// at most once whatever the outcome.
    ///
    /// # Arguments
    /// * `request_message` - The message issued by [`Self::build_registration_request`]
    /// * `response` - The client's answer
    /// * `owner_user_id` - Must match the owner the request was issued for
    /// * `allowed_facets` - Accepted origins; `None` accepts only the `rp_id`
    ///
    /// # Errors
    ///
    /// - `BadInput` if the message was already used or expired, the client data
    ///   or raw response is malformed or mismatched, the signature does not
    ///   verify, or the key handle is already registered for this `rp_id`
    /// - `Unknown` if the store fails
    pub fn finish_registration(
        &self,
        request_message: &RequestMessage,
        response: &RegisterResponse,
        owner_user_id: Option<&str>,
        allowed_facets: Option<&[String]>,
    ) -> Result<DeviceRegistrationResult, CeremonyError> {
        if request_message.kind != RequestKind::Registration {
            return Err(CeremonyError::BadInput(
                "Request message is not a registration request".to_string(),
            ));
        }

        let stored = self.challenges.consume(request_message)?;
        if stored.owner_user_id.as_deref() != owner_user_id {
            return Err(CeremonyError::BadInput(
                "Registration request was issued for another user".to_string(),
            ));
        }

        let default_facets = [stored.rp_id.clone()];
        let facets = allowed_facets.unwrap_or(&default_facets[..]);
        let client_data = verify_client_data(
            &response.client_data,
            CeremonyType::Registration,
            &stored.challenge,
            facets,
        )?;

        let raw_bytes = decode_b64url(&response.registration_data).map_err(|_| {
            CeremonyError::BadInput("Invalid registration data encoding".to_string())
        })?;
        let raw = RawRegistrationResponse::decode(&raw_bytes)?;

        let mut signed = raw.signed_authenticator_data(&rp_id_hash(&stored.rp_id))?;
        signed.extend_from_slice(&client_data.hash);
        verify_es256_signature(&raw.public_key, &signed, &raw.signature)?;

        let key_handle = encode_b64url(&raw.key_handle);
        let registration = DeviceRegistration {
            id: Uuid::new_v4().to_string(),
            key_handle_hash: key_handle_hash(&raw.key_handle),
            key_handle,
            public_key: encode_b64url(&raw.public_key),
            application_id: stored.rp_id.clone(),
            counter: 0,
            status: DeviceStatus::Active,
            creation_date: Utc::now(),
            last_access_time: None,
            owner_user_id: owner_user_id.map(ToString::to_string),
            deletable: true,
            device_data: response.device_data.clone(),
        };

        if client_data.status == CeremonyStatus::Canceled {
            LoggingHelper::log_registration_canceled(&stored.rp_id);
            return Ok(DeviceRegistrationResult {
                registration,
                status: CeremonyStatus::Canceled,
            });
        }

        debug!(
            "Storing device registration {} (attestation certificate {})",
            registration.id,
            if raw.certificate.is_some() { "present" } else { "absent" }
        );
        if !self.devices.add_unique(registration.clone())? {
            LoggingHelper::log_duplicate_key_handle(&stored.rp_id, &registration.key_handle);
            return Err(CeremonyError::BadInput(
                "Key handle is already registered; device may be compromised".to_string(),
            ));
        }
        LoggingHelper::log_registration_approved(
            &stored.rp_id,
            &registration.key_handle,
            registration.owner_user_id.is_some(),
        );

        Ok(DeviceRegistrationResult {
            registration,
            status: CeremonyStatus::Approved,
        })
    }
}
