//! Authentication ceremony, relying-party side
//!
//! The stored counter is the clone detector. It only moves through a
//! compare-and-set, and a counter that fails to increase marks the device
//! compromised even when the signature is valid.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::client_data::{verify_client_data, CeremonyType};
use super::crypto::{rp_id_hash, verify_es256_signature};
use super::types::{
    AuthenticateRequest, AuthenticateResponse, CeremonyStatus, DeviceRegistration,
    DeviceRegistrationResult, RequestKind, RequestMessage, U2F_VERSION,
};
use crate::codec::RawAuthenticationResponse;
use crate::errors::{CeremonyError, NoDevicesReason};
use crate::store::{ChallengeStore, DeviceRegistrationStore};
use crate::utils::crypto::decode_b64url;
use crate::utils::logging::LoggingHelper;

/// Whether `received` may follow the stored counter of `device`
///
/// A zero counter is accepted once, on a device that has never been used.
fn counter_advances(device: &DeviceRegistration, received: u32) -> bool {
    received > device.counter
        || (device.counter == 0 && received == 0 && device.last_access_time.is_none())
}

pub struct AuthenticationService {
    challenges: Arc<ChallengeStore>,
    devices: Arc<DeviceRegistrationStore>,
}

impl AuthenticationService {
    #[must_use]
    pub fn new(challenges: Arc<ChallengeStore>, devices: Arc<DeviceRegistrationStore>) -> Self {
        Self {
            challenges,
            devices,
        }
    }

    /// Issue and store an authentication request covering every usable device
    ///
    /// # Errors
    ///
    /// - `NoEligibleDevices` if the user has no device for `rp_id`, or all are compromised
    /// - `Unknown` if the challenge cannot be generated or stored
    pub fn build_authentication_request(
        &self,
        rp_id: &str,
        owner_user_id: &str,
        session_id: Option<&str>,
    ) -> Result<RequestMessage, CeremonyError> {
        let devices = self.devices.find_user_devices(owner_user_id, rp_id)?;
        if devices.is_empty() {
            return Err(CeremonyError::NoEligibleDevices(
                NoDevicesReason::NoneRegistered,
            ));
        }

        let eligible: Vec<DeviceRegistration> = devices
            .into_iter()
            .filter(|device| !device.is_compromised())
            .collect();
        if eligible.is_empty() {
            return Err(CeremonyError::NoEligibleDevices(
                NoDevicesReason::AllCompromised,
            ));
        }

        let challenge = self.challenges.generate_challenge()?;
        let authenticate_requests = eligible
            .into_iter()
            .map(|device| AuthenticateRequest {
                version: U2F_VERSION.to_string(),
                challenge: challenge.clone(),
                app_id: rp_id.to_string(),
                key_handle: device.key_handle,
            })
            .collect();

        let message = RequestMessage {
            id: Uuid::new_v4().to_string(),
            request_id: self.challenges.generate_request_id()?,
            kind: RequestKind::Authentication,
            rp_id: rp_id.to_string(),
            session_id: session_id.map(ToString::to_string),
            owner_user_id: Some(owner_user_id.to_string()),
            challenge,
            register_requests: Vec::new(),
            authenticate_requests,
            created_at: Utc::now(),
        };

        self.challenges.persist(message.clone())?;
        LoggingHelper::log_request_issued(
            "authentication",
            rp_id,
            &message.request_id,
            message.authenticate_requests.len(),
        );
        Ok(message)
    }

    /// Verify an authentication response and advance the device counter
    ///
    /// # Arguments
    /// * `request_message` - The message issued by [`Self::build_authentication_request`]
    /// * `response` - The client's answer
    /// * `owner_user_id` - The user the request was issued for
    /// * `allowed_facets` - Accepted origins; `None` accepts only the `rp_id`
    ///
    /// # Errors
    ///
    /// - `BadInput` if the response does not belong to the request, the device is
    ///   unknown, the client data or raw response is malformed or mismatched, the
    ///   signature does not verify, or user presence is missing
    /// - `DeviceCompromised` if the device is, or is now found to be, compromised
    /// - `Unknown` if the store fails
    pub fn finish_authentication(
        &self,
        request_message: &RequestMessage,
        response: &AuthenticateResponse,
        owner_user_id: &str,
        allowed_facets: Option<&[String]>,
    ) -> Result<DeviceRegistrationResult, CeremonyError> {
        Self::check_correlation(request_message, response)?;

        let stored = self.challenges.consume(request_message)?;
        Self::check_correlation(&stored, response)?;
        if stored.owner_user_id.as_deref() != Some(owner_user_id) {
            return Err(CeremonyError::BadInput(
                "Authentication request was issued for another user".to_string(),
            ));
        }

        let device = self
            .devices
            .find_user_device_by_key_handle(owner_user_id, &stored.rp_id, &response.key_handle)?
            .ok_or_else(|| {
                CeremonyError::BadInput("No device registered for this key handle".to_string())
            })?;
        if device.is_compromised() {
            LoggingHelper::log_compromised_device_rejected(&device.id);
            return Err(CeremonyError::DeviceCompromised);
        }

        let default_facets = [stored.rp_id.clone()];
        let facets = allowed_facets.unwrap_or(&default_facets[..]);
        let client_data = verify_client_data(
            &response.client_data,
            CeremonyType::Authentication,
            &stored.challenge,
            facets,
        )?;

        let raw_bytes = decode_b64url(&response.signature_data)
            .map_err(|_| CeremonyError::BadInput("Invalid signature data encoding".to_string()))?;
        let raw = RawAuthenticationResponse::decode(&raw_bytes)?;
        let public_key = decode_b64url(&device.public_key)
            .map_err(|_| CeremonyError::Unknown("Stored public key is corrupt".to_string()))?;
        verify_es256_signature(
            &public_key,
            &raw.signed_data(&rp_id_hash(&stored.rp_id), &client_data.hash),
            &raw.signature,
        )?;

        if !raw.user_present() {
            return Err(CeremonyError::BadInput("User presence flag is not set".to_string()));
        }

        let registration = self.advance_counter(device, raw.counter, Utc::now())?;
        match client_data.status {
            CeremonyStatus::Approved => {
                LoggingHelper::log_authentication_approved(&registration.id, registration.counter);
            }
            CeremonyStatus::Canceled => {
                LoggingHelper::log_authentication_canceled(&registration.id);
            }
        }

        Ok(DeviceRegistrationResult {
            registration,
            status: client_data.status,
        })
    }

    /// Number of registrations stored for `rp_id`
    ///
    /// # Errors
    /// Returns `Unknown` if the store fails.
    pub fn get_device_count(&self, rp_id: &str) -> Result<usize, CeremonyError> {
        Ok(self.devices.get_device_count(rp_id)?)
    }

    /// Remove a device registration; `false` if it did not exist
    ///
    /// # Errors
    ///
    /// - `ConstraintViolation` if the registration is not deletable
    /// - `Unknown` if the store fails
    pub fn remove_device(&self, device_id: &str) -> Result<bool, CeremonyError> {
        self.devices.remove_device(device_id)
    }

    fn check_correlation(
        message: &RequestMessage,
        response: &AuthenticateResponse,
    ) -> Result<(), CeremonyError> {
        if message.kind != RequestKind::Authentication {
            return Err(CeremonyError::BadInput(
                "Request message is not an authentication request".to_string(),
            ));
        }
        if response.request_id != message.request_id {
            return Err(CeremonyError::BadInput(
                "Response does not answer this request".to_string(),
            ));
        }
        if !message.offers_key_handle(&response.key_handle) {
            return Err(CeremonyError::BadInput(
                "Key handle was not offered by this request".to_string(),
            ));
        }
        Ok(())
    }

    /// Compare-and-set the counter, re-reading once if another ceremony won the race
    fn advance_counter(
        &self,
        device: DeviceRegistration,
        received: u32,
        now: DateTime<Utc>,
    ) -> Result<DeviceRegistration, CeremonyError> {
        let mut current = device;
        for _ in 0..2 {
            if current.is_compromised() {
                LoggingHelper::log_compromised_device_rejected(&current.id);
                return Err(CeremonyError::DeviceCompromised);
            }
            if !counter_advances(&current, received) {
                LoggingHelper::log_counter_regression(&current.id, current.counter, received);
                self.devices.mark_compromised(&current)?;
                return Err(CeremonyError::DeviceCompromised);
            }
            if self.devices.update_counter(&current, received, now)? {
                current.counter = received;
                current.last_access_time = Some(now);
                return Ok(current);
            }

            LoggingHelper::log_counter_race(&current.id);
            current = self.devices.find(&current.id)?.ok_or_else(|| {
                CeremonyError::BadInput("Device registration was removed".to_string())
            })?;
        }
        Err(CeremonyError::Unknown(
            "Counter update kept losing to concurrent ceremonies".to_string(),
        ))
    }
}
