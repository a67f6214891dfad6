//! Client data verification
//!
//! The client data is JSON the browser or device assembled; its SHA-256 is
//! part of every signed preimage.

use serde::Deserialize;

use super::types::CeremonyStatus;
use crate::errors::CeremonyError;
use crate::utils::crypto::{decode_b64url, sha256};

pub const REGISTER_FINISH_TYPE: &str = "navigator.id.finishEnrollment";
pub const REGISTER_CANCEL_TYPE: &str = "navigator.id.cancelEnrollment";
pub const AUTHENTICATE_GET_TYPE: &str = "navigator.id.getAssertion";
pub const AUTHENTICATE_CANCEL_TYPE: &str = "navigator.id.cancelAssertion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyType {
    Registration,
    Authentication,
}

impl CeremonyType {
    #[must_use]
    pub fn approve_type(self) -> &'static str {
        match self {
            CeremonyType::Registration => REGISTER_FINISH_TYPE,
            CeremonyType::Authentication => AUTHENTICATE_GET_TYPE,
        }
    }

    #[must_use]
    pub fn cancel_type(self) -> &'static str {
        match self {
            CeremonyType::Registration => REGISTER_CANCEL_TYPE,
            CeremonyType::Authentication => AUTHENTICATE_CANCEL_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientData {
    #[serde(alias = "type")]
    pub typ: String,
    pub challenge: String,
    pub origin: String,
}

/// Client data that passed verification, with the hash the device signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClientData {
    pub client_data: ClientData,
    pub hash: [u8; 32],
    pub status: CeremonyStatus,
}

/// Verify client data type, challenge and origin
///
/// # Arguments
/// * `client_data_b64` - Base64URL-encoded client data JSON
/// * `ceremony` - Which ceremony the data must belong to
/// * `expected_challenge` - Challenge from the request message
/// * `allowed_facets` - Accepted origins
///
/// # Errors
/// Returns `BadInput` if the data does not decode, misses a field, carries a
/// type from another ceremony, or the challenge or origin do not match.
pub fn verify_client_data(
    client_data_b64: &str,
    ceremony: CeremonyType,
    expected_challenge: &str,
    allowed_facets: &[String],
) -> Result<VerifiedClientData, CeremonyError> {
    let raw = decode_b64url(client_data_b64)
        .map_err(|_| CeremonyError::BadInput("Invalid client data encoding".to_string()))?;

    let client_data: ClientData = serde_json::from_slice(&raw).map_err(|e| {
        CeremonyError::BadInput(format!(
            "Client data must carry challenge, origin and type: {e}"
        ))
    })?;

    let status = if client_data.typ == ceremony.approve_type() {
        CeremonyStatus::Approved
    } else if client_data.typ == ceremony.cancel_type() {
        CeremonyStatus::Canceled
    } else {
        return Err(CeremonyError::BadInput(format!(
            "Invalid client data type, expected {}",
            ceremony.approve_type()
        )));
    };

    if client_data.challenge.trim_end_matches('=') != expected_challenge.trim_end_matches('=') {
        return Err(CeremonyError::BadInput("Challenge mismatch".to_string()));
    }

    if !allowed_facets
        .iter()
        .any(|facet| facet == &client_data.origin)
    {
        return Err(CeremonyError::BadInput(format!(
            "Origin {} is not an allowed facet",
            client_data.origin
        )));
    }

    Ok(VerifiedClientData {
        hash: sha256(&raw),
        client_data,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::encode_b64url;

    const ORIGIN: &str = "https://example.com";

    fn encode(json: &serde_json::Value) -> String {
        encode_b64url(json.to_string().as_bytes())
    }

    fn facets() -> Vec<String> {
        vec![ORIGIN.to_string()]
    }

    #[test]
    fn test_approved_registration() {
        let data = encode(&serde_json::json!({
            "typ": REGISTER_FINISH_TYPE,
            "challenge": "abc",
            "origin": ORIGIN,
        }));
        let verified =
            verify_client_data(&data, CeremonyType::Registration, "abc", &facets()).unwrap();
        assert_eq!(verified.status, CeremonyStatus::Approved);
        assert_eq!(verified.hash, sha256(&decode_b64url(&data).unwrap()));
    }

    #[test]
    fn test_type_alias_and_cancel() {
        let data = encode(&serde_json::json!({
            "type": AUTHENTICATE_CANCEL_TYPE,
            "challenge": "abc",
            "origin": ORIGIN,
        }));
        let verified =
            verify_client_data(&data, CeremonyType::Authentication, "abc", &facets()).unwrap();
        assert_eq!(verified.status, CeremonyStatus::Canceled);
    }

    #[test]
    fn test_type_from_other_ceremony_is_rejected() {
        let data = encode(&serde_json::json!({
            "typ": AUTHENTICATE_GET_TYPE,
            "challenge": "abc",
            "origin": ORIGIN,
        }));
        let result = verify_client_data(&data, CeremonyType::Registration, "abc", &facets());
        assert!(matches!(result, Err(CeremonyError::BadInput(_))));
    }

    #[test]
    fn test_challenge_and_origin_mismatch() {
        let data = encode(&serde_json::json!({
            "typ": REGISTER_FINISH_TYPE,
            "challenge": "abc",
            "origin": "https://evil.example",
        }));
        assert!(verify_client_data(&data, CeremonyType::Registration, "abc", &facets()).is_err());
        assert!(verify_client_data(
            &data,
            CeremonyType::Registration,
            "xyz",
            &["https://evil.example".to_string()]
        )
        .is_err());
    }

    #[test]
    fn test_missing_field_is_bad_input() {
        let data = encode(&serde_json::json!({
            "typ": REGISTER_FINISH_TYPE,
            "origin": ORIGIN,
        }));
        let result = verify_client_data(&data, CeremonyType::Registration, "abc", &facets());
        assert!(matches!(result, Err(CeremonyError::BadInput(_))));
    }

    #[test]
    fn test_undecodable_client_data() {
        let result = verify_client_data("%%%", CeremonyType::Registration, "abc", &facets());
        assert!(matches!(result, Err(CeremonyError::BadInput(_))));
    }
}
