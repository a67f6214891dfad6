//! Authenticator-side data types
//!
//! Options for the two authenticator operations, the device-local credential
//! record, and the ceremony results handed back to the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{
    RawAuthenticationResponse, RawRegistrationResponse, COSE_ALG_ES256, RP_ID_HASH_LEN,
};
use crate::errors::CodecError;

/// The only credential type this authenticator knows about
pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

/// Device-local binding of a key pair to a relying party and user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSource {
    pub credential_id: Vec<u8>,
    pub rp_id: String,
    pub user_handle: Vec<u8>,
    pub user_display_name: String,
    /// Handle into the credential safe; never the key itself
    pub key_pair_alias: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to a credential in exclude and allow lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub id: Vec<u8>,
}

impl CredentialDescriptor {
    #[must_use]
    pub fn public_key(id: Vec<u8>) -> Self {
        Self {
            credential_type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            id,
        }
    }
}

/// Arguments to `make_credential`
#[derive(Debug, Clone)]
pub struct MakeCredentialOptions {
    pub client_data_hash: Vec<u8>,
    pub rp_id: String,
    pub user_id: Vec<u8>,
    pub user_name: String,
    /// Acceptable COSE algorithms, in order of preference
    pub algorithms: Vec<i64>,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub require_user_verification: bool,
}

impl MakeCredentialOptions {
    #[must_use]
    pub fn new(rp_id: &str, user_id: &[u8], user_name: &str, client_data_hash: &[u8]) -> Self {
        Self {
            client_data_hash: client_data_hash.to_vec(),
            rp_id: rp_id.to_string(),
            user_id: user_id.to_vec(),
            user_name: user_name.to_string(),
            algorithms: vec![COSE_ALG_ES256],
            exclude_credentials: Vec::new(),
            require_user_verification: false,
        }
    }

    #[must_use]
    pub fn are_well_formed(&self) -> bool {
        self.client_data_hash.len() == RP_ID_HASH_LEN
            && !self.rp_id.is_empty()
            && !self.user_id.is_empty()
            && !self.algorithms.is_empty()
    }
}

/// Arguments to `get_assertion`
#[derive(Debug, Clone)]
pub struct GetAssertionOptions {
    pub rp_id: String,
    pub client_data_hash: Vec<u8>,
    /// Empty means every credential for `rp_id` is a candidate
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub require_user_verification: bool,
}

impl GetAssertionOptions {
    #[must_use]
    pub fn new(rp_id: &str, client_data_hash: &[u8]) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            client_data_hash: client_data_hash.to_vec(),
            allow_credentials: Vec::new(),
            require_user_verification: false,
        }
    }

    #[must_use]
    pub fn are_well_formed(&self) -> bool {
        self.client_data_hash.len() == RP_ID_HASH_LEN && !self.rp_id.is_empty()
    }
}

/// Self-attested result of `make_credential`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AttestationObject {
    /// Raw registration response bytes for the relying party
    ///
    /// # Errors
    /// Returns an error if the authenticator data does not carry an attested credential.
    pub fn to_registration_response(&self) -> Result<Vec<u8>, CodecError> {
        RawRegistrationResponse::from_authenticator_data(&self.authenticator_data, &self.signature)?
            .encode()
    }
}

/// Result of `get_assertion`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

impl AssertionResult {
    /// Raw authentication response bytes for the relying party
    ///
    /// # Errors
    /// Returns an error if the authenticator data cannot be parsed.
    pub fn to_authentication_response(&self) -> Result<Vec<u8>, CodecError> {
        Ok(
            RawAuthenticationResponse::from_authenticator_data(
                &self.authenticator_data,
                &self.signature,
            )?
            .encode(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_credential_options_defaults_to_es256() {
        let options = MakeCredentialOptions::new("example.com", b"user", "alice", &[0u8; 32]);
        assert_eq!(options.algorithms, vec![COSE_ALG_ES256]);
        assert!(options.are_well_formed());
    }

    #[test]
    fn test_options_reject_short_client_data_hash() {
        let make = MakeCredentialOptions::new("example.com", b"user", "alice", &[0u8; 16]);
        let get = GetAssertionOptions::new("example.com", &[0u8; 16]);
        assert!(!make.are_well_formed());
        assert!(!get.are_well_formed());
    }

    #[test]
    fn test_descriptor_serializes_type_field() {
        let json = serde_json::to_value(CredentialDescriptor::public_key(vec![1, 2])).unwrap();
        assert_eq!(json["type"], "public-key");
    }
}
