//! Fluent builders for creating customizable test objects

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::constants::{TEST_ORIGIN, TEST_RP_ID};
use crate::relying_party::types::{DeviceData, DeviceRegistration, DeviceStatus};
use crate::store::encoded_key_handle_hash;
use crate::utils::crypto::encode_b64url;

/// Builder for stored device registrations
///
/// Defaults: a fresh random key handle for [`TEST_RP_ID`], active, deletable,
/// counter 0 and no owner (a pending one-step registration).
pub struct DeviceRegistrationBuilder {
    registration: DeviceRegistration,
}

impl Default for DeviceRegistrationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistrationBuilder {
    #[must_use]
    pub fn new() -> Self {
        let key_handle = encode_b64url(Uuid::new_v4().as_bytes());
        Self {
            registration: DeviceRegistration {
                id: Uuid::new_v4().to_string(),
                key_handle_hash: encoded_key_handle_hash(&key_handle),
                key_handle,
                public_key: encode_b64url(&[0x04; 65]),
                application_id: TEST_RP_ID.to_string(),
                counter: 0,
                status: DeviceStatus::Active,
                creation_date: Utc::now(),
                last_access_time: None,
                owner_user_id: None,
                deletable: true,
                device_data: None,
            },
        }
    }

    /// Set the key handle (base64url); the index hash follows it
    #[must_use]
    pub fn key_handle(mut self, key_handle: &str) -> Self {
        self.registration.key_handle = key_handle.to_string();
        self.registration.key_handle_hash = encoded_key_handle_hash(key_handle);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner_user_id: &str) -> Self {
        self.registration.owner_user_id = Some(owner_user_id.to_string());
        self
    }

    #[must_use]
    pub fn application_id(mut self, rp_id: &str) -> Self {
        self.registration.application_id = rp_id.to_string();
        self
    }

    #[must_use]
    pub fn counter(mut self, counter: u32) -> Self {
        self.registration.counter = counter;
        self
    }

    #[must_use]
    pub fn status(mut self, status: DeviceStatus) -> Self {
        self.registration.status = status;
        self
    }

    #[must_use]
    pub fn deletable(mut self, deletable: bool) -> Self {
        self.registration.deletable = deletable;
        self
    }

    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.registration.creation_date = created_at;
        self
    }

    #[must_use]
    pub fn device_name(mut self, name: &str) -> Self {
        self.registration.device_data = Some(DeviceData {
            name: Some(name.to_string()),
            ..DeviceData::default()
        });
        self
    }

    #[must_use]
    pub fn build(self) -> DeviceRegistration {
        self.registration
    }
}

/// Builder for base64url client data JSON
pub struct ClientDataBuilder {
    typ: String,
    challenge: Option<String>,
    origin: String,
}

impl ClientDataBuilder {
    #[must_use]
    pub fn new(typ: &str, challenge: &str) -> Self {
        Self {
            typ: typ.to_string(),
            challenge: Some(challenge.to_string()),
            origin: TEST_ORIGIN.to_string(),
        }
    }

    #[must_use]
    pub fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    /// Drop the challenge field entirely
    #[must_use]
    pub fn without_challenge(mut self) -> Self {
        self.challenge = None;
        self
    }

    /// Raw JSON bytes, the exact input of the client data hash
    #[must_use]
    pub fn build_json(&self) -> Vec<u8> {
        let mut json = serde_json::json!({
            "typ": self.typ,
            "origin": self.origin,
        });
        if let Some(challenge) = &self.challenge {
            json["challenge"] = serde_json::Value::String(challenge.clone());
        }
        json.to_string().into_bytes()
    }

    #[must_use]
    pub fn build(&self) -> String {
        encode_b64url(&self.build_json())
    }
}
