//! Relying-party records and wire messages
//!
//! Binary values (challenges, key handles, public keys, raw responses) travel
//! base64url-encoded without padding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{AttributeValue, Entry};

/// Protocol version string carried by every sub-request
pub const U2F_VERSION: &str = "U2F_V2";

/// Registration sub-request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub version: String,
    pub challenge: String,
    pub app_id: String,
}

/// Authentication sub-request, one per eligible device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub version: String,
    pub challenge: String,
    pub app_id: String,
    pub key_handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Registration,
    Authentication,
}

/// Single-use request message holding one challenge shared by all its sub-requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Storage id
    pub id: String,
    /// Id the client echoes back
    pub request_id: String,
    pub kind: RequestKind,
    pub rp_id: String,
    pub session_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub challenge: String,
    pub register_requests: Vec<RegisterRequest>,
    pub authenticate_requests: Vec<AuthenticateRequest>,
    pub created_at: DateTime<Utc>,
}

impl RequestMessage {
    pub const ATTR_REQUEST_ID: &'static str = "request_id";
    pub const ATTR_KIND: &'static str = "kind";
    pub const ATTR_RP_ID: &'static str = "rp_id";
    pub const ATTR_CHALLENGE: &'static str = "challenge";

    /// Whether `key_handle` was offered by one of this message's authentication sub-requests
    #[must_use]
    pub fn offers_key_handle(&self, key_handle: &str) -> bool {
        self.authenticate_requests
            .iter()
            .any(|request| request.key_handle == key_handle)
    }
}

impl Entry for RequestMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            Self::ATTR_REQUEST_ID => Some(AttributeValue::text(&self.request_id)),
            Self::ATTR_KIND => Some(AttributeValue::text(match self.kind {
                RequestKind::Registration => "registration",
                RequestKind::Authentication => "authentication",
            })),
            Self::ATTR_RP_ID => Some(AttributeValue::text(&self.rp_id)),
            Self::ATTR_CHALLENGE => Some(AttributeValue::text(&self.challenge)),
            _ => None,
        }
    }
}

/// Optional metadata a device reports about itself at enrollment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceData {
    pub name: Option<String>,
    pub platform: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub push_token: Option<String>,
}

/// Client answer to a registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub registration_data: String,
    pub client_data: String,
    #[serde(default)]
    pub device_data: Option<DeviceData>,
}

/// Client answer to an authentication request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub request_id: String,
    pub key_handle: String,
    pub signature_data: String,
    pub client_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Compromised,
}

impl DeviceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Compromised => "compromised",
        }
    }
}

/// Long-lived record of a registered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub id: String,
    pub key_handle: String,
    /// Index hint only; lookups re-check `key_handle`
    pub key_handle_hash: i32,
    /// Uncompressed SEC1 point, base64url
    pub public_key: String,
    pub application_id: String,
    pub counter: u32,
    pub status: DeviceStatus,
    pub creation_date: DateTime<Utc>,
    pub last_access_time: Option<DateTime<Utc>>,
    /// `None` until a one-step registration is attached
    pub owner_user_id: Option<String>,
    pub deletable: bool,
    pub device_data: Option<DeviceData>,
}

impl DeviceRegistration {
    pub const ATTR_KEY_HANDLE_HASH: &'static str = "key_handle_hash";
    pub const ATTR_KEY_HANDLE: &'static str = "key_handle";
    pub const ATTR_APPLICATION_ID: &'static str = "application_id";
    pub const ATTR_OWNER: &'static str = "owner_user_id";
    pub const ATTR_STATUS: &'static str = "status";
    pub const ATTR_COUNTER: &'static str = "counter";
    pub const ATTR_LAST_ACCESS: &'static str = "last_access_time";

    #[must_use]
    pub fn is_compromised(&self) -> bool {
        self.status == DeviceStatus::Compromised
    }
}

impl Entry for DeviceRegistration {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.creation_date
    }

    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            Self::ATTR_KEY_HANDLE_HASH => Some(AttributeValue::Int(i64::from(self.key_handle_hash))),
            Self::ATTR_KEY_HANDLE => Some(AttributeValue::text(&self.key_handle)),
            Self::ATTR_APPLICATION_ID => Some(AttributeValue::text(&self.application_id)),
            Self::ATTR_OWNER => Some(
                self.owner_user_id
                    .as_deref()
                    .map_or(AttributeValue::Null, AttributeValue::text),
            ),
            Self::ATTR_STATUS => Some(AttributeValue::text(self.status.as_str())),
            Self::ATTR_COUNTER => Some(AttributeValue::Int(i64::from(self.counter))),
            Self::ATTR_LAST_ACCESS => Some(
                self.last_access_time
                    .map_or(AttributeValue::Null, |t| AttributeValue::Text(t.to_rfc3339())),
            ),
            _ => None,
        }
    }
}

/// Outcome of the ceremony as reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CeremonyStatus {
    Approved,
    Canceled,
}

/// Result of `finish_registration` and `finish_authentication`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistrationResult {
    pub registration: DeviceRegistration,
    pub status: CeremonyStatus,
}

impl DeviceRegistrationResult {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == CeremonyStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(owner: Option<&str>) -> DeviceRegistration {
        DeviceRegistration {
            id: "dev-1".to_string(),
            key_handle: "kh".to_string(),
            key_handle_hash: -42,
            public_key: String::new(),
            application_id: "https://example.com".to_string(),
            counter: 7,
            status: DeviceStatus::Active,
            creation_date: Utc::now(),
            last_access_time: None,
            owner_user_id: owner.map(ToString::to_string),
            deletable: true,
            device_data: None,
        }
    }

    #[test]
    fn test_unattached_owner_attribute_is_null() {
        assert_eq!(
            registration(None).attribute(DeviceRegistration::ATTR_OWNER),
            Some(AttributeValue::Null)
        );
        assert_eq!(
            registration(Some("alice")).attribute(DeviceRegistration::ATTR_OWNER),
            Some(AttributeValue::text("alice"))
        );
    }

    #[test]
    fn test_numeric_attributes() {
        let reg = registration(None);
        assert_eq!(
            reg.attribute(DeviceRegistration::ATTR_KEY_HANDLE_HASH),
            Some(AttributeValue::Int(-42))
        );
        assert_eq!(
            reg.attribute(DeviceRegistration::ATTR_COUNTER),
            Some(AttributeValue::Int(7))
        );
        assert_eq!(reg.attribute("unknown"), None);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&CeremonyStatus::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
    }

    #[test]
    fn test_register_response_uses_camel_case() {
        let json = r#"{"registrationData":"AA","clientData":"BB"}"#;
        let response: RegisterResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.registration_data, "AA");
        assert!(response.device_data.is_none());
    }
}
