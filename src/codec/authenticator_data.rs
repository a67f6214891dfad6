//! `authenticatorData` and `attestedCredentialData` layouts
//!
//! ```text
//! authenticatorData      = rp_id_hash(32) | flags(1) | counter(4, BE) | [attestedCredentialData]
//! attestedCredentialData = aaguid(16) | credential_id_len(2, BE) | credential_id | cose_public_key
//! ```

use std::io::Cursor;

use ciborium::value::Value;

use crate::errors::CodecError;

/// Length of the SHA-256 relying party id hash
pub const RP_ID_HASH_LEN: usize = 32;

/// rp_id_hash + flags + counter
pub const AUTHENTICATOR_DATA_MIN_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

/// Self/none attestation uses an all-zero AAGUID
pub const AAGUID: [u8; 16] = [0u8; 16];

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x01 << 2;
pub const FLAG_ATTESTED_DATA: u8 = 0x01 << 6;

/// Decoded attested credential data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>, // COSE-encoded
}

/// Decoded authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub counter: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    /// Re-encode to the exact wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(AUTHENTICATOR_DATA_MIN_LEN);
        data.extend_from_slice(&self.rp_id_hash);
        data.push(self.flags);
        data.extend_from_slice(&self.counter.to_be_bytes());
        if let Some(attested) = &self.attested_credential_data {
            data.extend_from_slice(&attested.aaguid);
            // Length was validated when the structure was decoded or built
            let id_len = u16::try_from(attested.credential_id.len()).unwrap_or(u16::MAX);
            data.extend_from_slice(&id_len.to_be_bytes());
            data.extend_from_slice(&attested.credential_id);
            data.extend_from_slice(&attested.public_key);
        }
        data
    }
}

/// Build `attestedCredentialData` for a freshly generated credential
///
/// # Errors
/// Returns `CodecError::InvalidInput` if the credential id is longer than `u16::MAX`
/// or empty.
pub fn encode_attested_credential_data(
    credential_id: &[u8],
    encoded_public_key: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if credential_id.is_empty() {
        return Err(CodecError::InvalidInput(
            "Credential id must not be empty".to_string(),
        ));
    }
    let id_len = u16::try_from(credential_id.len()).map_err(|_| {
        CodecError::InvalidInput(format!(
            "Credential id is {} bytes, maximum is {}",
            credential_id.len(),
            u16::MAX
        ))
    })?;

    let mut data = Vec::with_capacity(16 + 2 + credential_id.len() + encoded_public_key.len());
    data.extend_from_slice(&AAGUID);
    data.extend_from_slice(&id_len.to_be_bytes());
    data.extend_from_slice(credential_id);
    data.extend_from_slice(encoded_public_key);
    Ok(data)
}

/// Build `authenticatorData`
///
/// The user-present flag is always set; user-verified is set iff `user_verified`;
/// attested-credential-data is set iff `attested_credential_data` is present.
///
/// # Errors
/// Returns `CodecError::InvalidInput` if `rp_id_hash` is not exactly 32 bytes.
pub fn encode_authenticator_data(
    rp_id_hash: &[u8],
    attested_credential_data: Option<&[u8]>,
    counter: u32,
    user_verified: bool,
) -> Result<Vec<u8>, CodecError> {
    if rp_id_hash.len() != RP_ID_HASH_LEN {
        return Err(CodecError::InvalidInput(format!(
            "rp_id_hash must be {RP_ID_HASH_LEN} bytes, got {}",
            rp_id_hash.len()
        )));
    }

    let mut flags = FLAG_USER_PRESENT;
    if user_verified {
        flags |= FLAG_USER_VERIFIED;
    }
    if attested_credential_data.is_some() {
        flags |= FLAG_ATTESTED_DATA;
    }

    let mut data = Vec::with_capacity(
        AUTHENTICATOR_DATA_MIN_LEN + attested_credential_data.map_or(0, <[u8]>::len),
    );
    data.extend_from_slice(rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&counter.to_be_bytes());
    if let Some(attested) = attested_credential_data {
        data.extend_from_slice(attested);
    }
    Ok(data)
}

/// Parse `authenticatorData`
///
/// # Errors
/// Returns an error if the data is shorter than 37 bytes, if the attested-data
/// flag disagrees with the payload, or if bytes are left over after the COSE key.
pub fn decode_authenticator_data(bytes: &[u8]) -> Result<AuthenticatorData, CodecError> {
    if bytes.len() < AUTHENTICATOR_DATA_MIN_LEN {
        return Err(CodecError::Truncated {
            expected: AUTHENTICATOR_DATA_MIN_LEN,
            actual: bytes.len(),
        });
    }

    let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
    rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
    let flags = bytes[RP_ID_HASH_LEN];
    let counter = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
    let rest = &bytes[AUTHENTICATOR_DATA_MIN_LEN..];

    let attested_credential_data = if flags & FLAG_ATTESTED_DATA == 0 {
        if !rest.is_empty() {
            return Err(CodecError::InvalidInput(
                "Unexpected bytes after authenticator data".to_string(),
            ));
        }
        None
    } else {
        Some(decode_attested_credential_data(rest)?)
    };

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        counter,
        attested_credential_data,
    })
}

fn decode_attested_credential_data(bytes: &[u8]) -> Result<AttestedCredentialData, CodecError> {
    // aaguid + length prefix
    if bytes.len() < 18 {
        return Err(CodecError::Truncated {
            expected: AUTHENTICATOR_DATA_MIN_LEN + 18,
            actual: AUTHENTICATOR_DATA_MIN_LEN + bytes.len(),
        });
    }

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&bytes[..16]);
    let id_len = usize::from(u16::from_be_bytes([bytes[16], bytes[17]]));
    let mut pos = 18;

    if id_len == 0 || bytes.len() < pos + id_len {
        return Err(CodecError::InvalidInput(
            "Credential id length exceeds attested data".to_string(),
        ));
    }
    let credential_id = bytes[pos..pos + id_len].to_vec();
    pos += id_len;

    let key_bytes = &bytes[pos..];
    if key_bytes.is_empty() {
        return Err(CodecError::InvalidInput(
            "Attested data has no public key".to_string(),
        ));
    }

    // The COSE key is self-delimiting CBOR; anything after it is an extension we don't support
    let mut cursor = Cursor::new(key_bytes);
    let _: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| CodecError::Cbor(format!("Invalid COSE public key: {e}")))?;
    let consumed = usize::try_from(cursor.position())
        .map_err(|_| CodecError::InvalidInput("COSE key too large".to_string()))?;
    if consumed != key_bytes.len() {
        return Err(CodecError::InvalidInput(
            "Leftover bytes after COSE public key".to_string(),
        ));
    }

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        public_key: key_bytes.to_vec(),
    })
}
