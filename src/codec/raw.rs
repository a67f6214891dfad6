//! Raw device response formats
//!
//! ```text
//! registration   = flags(1) | public_key(65) | key_handle_len(1) | key_handle | [certificate DER] | signature DER
//! authentication = flags(1) | counter(4, BE) | signature DER
//! ```
//!
//! The leading byte of a registration response carries the authenticator data
//! flags the device signed, so the relying party can rebuild the exact signed
//! `authenticatorData` from the other fields.

use super::authenticator_data::{
    decode_authenticator_data, encode_attested_credential_data, encode_authenticator_data,
    FLAG_ATTESTED_DATA, FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
};
use super::cose::{decode_public_key_cose, encode_public_key_cose, PUBLIC_KEY_LEN};
use crate::errors::CodecError;

/// flags + public key + key handle length
pub const REGISTRATION_MIN_LEN: usize = 1 + PUBLIC_KEY_LEN + 1;

/// flags + counter
pub const AUTHENTICATION_MIN_LEN: usize = 1 + 4;

const DER_SEQUENCE: u8 = 0x30;

/// Parsed raw registration response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegistrationResponse {
    pub flags: u8,
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub certificate: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

impl RawRegistrationResponse {
    /// Parse a raw registration response
    ///
    /// # Errors
    /// Returns an error if the response is shorter than the fixed prefix, the key
    /// handle overruns the buffer, or the signature is not a DER sequence.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < REGISTRATION_MIN_LEN {
            return Err(CodecError::Truncated {
                expected: REGISTRATION_MIN_LEN,
                actual: bytes.len(),
            });
        }

        let flags = bytes[0];
        let public_key = bytes[1..=PUBLIC_KEY_LEN].to_vec();
        if public_key[0] != 0x04 {
            return Err(CodecError::InvalidInput(
                "Public key is not an uncompressed point".to_string(),
            ));
        }

        let key_handle_len = usize::from(bytes[PUBLIC_KEY_LEN + 1]);
        if key_handle_len == 0 {
            return Err(CodecError::InvalidInput("Empty key handle".to_string()));
        }
        let mut pos = REGISTRATION_MIN_LEN;
        if bytes.len() < pos + key_handle_len {
            return Err(CodecError::Truncated {
                expected: pos + key_handle_len,
                actual: bytes.len(),
            });
        }
        let key_handle = bytes[pos..pos + key_handle_len].to_vec();
        pos += key_handle_len;

        let remainder = &bytes[pos..];
        let first_len = der_element_len(remainder)?;
        let (certificate, signature) = if first_len == remainder.len() {
            (None, remainder.to_vec())
        } else {
            let signature = &remainder[first_len..];
            if der_element_len(signature)? != signature.len() {
                return Err(CodecError::InvalidInput(
                    "Leftover bytes after signature".to_string(),
                ));
            }
            (Some(remainder[..first_len].to_vec()), signature.to_vec())
        };

        Ok(Self {
            flags,
            public_key,
            key_handle,
            certificate,
            signature,
        })
    }

    /// Serialize to the wire layout
    ///
    /// # Errors
    /// Returns `CodecError::InvalidInput` if the key handle is longer than 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let key_handle_len = u8::try_from(self.key_handle.len()).map_err(|_| {
            CodecError::InvalidInput("Key handle longer than 255 bytes".to_string())
        })?;

        let mut out = Vec::with_capacity(
            REGISTRATION_MIN_LEN
                + self.key_handle.len()
                + self.certificate.as_ref().map_or(0, Vec::len)
                + self.signature.len(),
        );
        out.push(self.flags);
        out.extend_from_slice(&self.public_key);
        out.push(key_handle_len);
        out.extend_from_slice(&self.key_handle);
        if let Some(cert) = &self.certificate {
            out.extend_from_slice(cert);
        }
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    /// Build a raw registration response from a self-attested `authenticatorData`
    /// and its signature
    ///
    /// # Errors
    /// Returns an error if the authenticator data carries no attested credential data.
    pub fn from_authenticator_data(
        authenticator_data: &[u8],
        signature: &[u8],
    ) -> Result<Self, CodecError> {
        let decoded = decode_authenticator_data(authenticator_data)?;
        let attested = decoded.attested_credential_data.ok_or_else(|| {
            CodecError::InvalidInput("Authenticator data has no attested credential".to_string())
        })?;

        Ok(Self {
            flags: decoded.flags,
            public_key: decode_public_key_cose(&attested.public_key)?,
            key_handle: attested.credential_id,
            certificate: None,
            signature: signature.to_vec(),
        })
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    /// Rebuild the `authenticatorData` the device signed at registration
    ///
    /// # Errors
    /// Returns an error if the flags are not a valid registration flag set or the
    /// public key cannot be COSE-encoded.
    pub fn signed_authenticator_data(&self, rp_id_hash: &[u8]) -> Result<Vec<u8>, CodecError> {
        let required = FLAG_USER_PRESENT | FLAG_ATTESTED_DATA;
        if self.flags & required != required
            || self.flags & !(required | FLAG_USER_VERIFIED) != 0
        {
            return Err(CodecError::InvalidInput(format!(
                "Invalid registration flags {:#04x}",
                self.flags
            )));
        }

        let cose_key = encode_public_key_cose(&self.public_key)?;
        let attested = encode_attested_credential_data(&self.key_handle, &cose_key)?;
        encode_authenticator_data(rp_id_hash, Some(&attested), 0, self.user_verified())
    }
}

/// Parsed raw authentication response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAuthenticationResponse {
    pub flags: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl RawAuthenticationResponse {
    /// Parse a raw authentication response
    ///
    /// # Errors
    /// Returns an error if the response is shorter than the fixed prefix or carries
    /// no signature.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() <= AUTHENTICATION_MIN_LEN {
            return Err(CodecError::Truncated {
                expected: AUTHENTICATION_MIN_LEN + 1,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            flags: bytes[0],
            counter: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            signature: bytes[AUTHENTICATION_MIN_LEN..].to_vec(),
        })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUTHENTICATION_MIN_LEN + self.signature.len());
        out.push(self.flags);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Build a raw authentication response from assertion `authenticatorData`
    ///
    /// # Errors
    /// Returns an error if the authenticator data cannot be parsed.
    pub fn from_authenticator_data(
        authenticator_data: &[u8],
        signature: &[u8],
    ) -> Result<Self, CodecError> {
        let decoded = decode_authenticator_data(authenticator_data)?;
        Ok(Self {
            flags: decoded.flags,
            counter: decoded.counter,
            signature: signature.to_vec(),
        })
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    /// The bytes covered by the signature: `rp_id_hash | flags | counter | client_data_hash`
    #[must_use]
    pub fn signed_data(&self, rp_id_hash: &[u8], client_data_hash: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(rp_id_hash.len() + 5 + client_data_hash.len());
        data.extend_from_slice(rp_id_hash);
        data.push(self.flags);
        data.extend_from_slice(&self.counter.to_be_bytes());
        data.extend_from_slice(client_data_hash);
        data
    }
}

/// Total length (header + content) of the DER element at the start of `bytes`
fn der_element_len(bytes: &[u8]) -> Result<usize, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Truncated {
            expected: 2,
            actual: bytes.len(),
        });
    }
    if bytes[0] != DER_SEQUENCE {
        return Err(CodecError::InvalidInput(
            "Expected DER sequence".to_string(),
        ));
    }

    let (header_len, content_len) = match bytes[1] {
        len @ 0x00..=0x7F => (2, usize::from(len)),
        0x81 => {
            let len = *bytes.get(2).ok_or(CodecError::Truncated {
                expected: 3,
                actual: bytes.len(),
            })?;
            (3, usize::from(len))
        }
        0x82 => {
            if bytes.len() < 4 {
                return Err(CodecError::Truncated {
                    expected: 4,
                    actual: bytes.len(),
                });
            }
            (4, usize::from(u16::from_be_bytes([bytes[2], bytes[3]])))
        }
        other => {
            return Err(CodecError::InvalidInput(format!(
                "Unsupported DER length form {other:#04x}"
            )))
        }
    };

    let total = header_len + content_len;
    if bytes.len() < total {
        return Err(CodecError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Vec<u8> {
        let mut key = vec![0x04u8];
        key.extend_from_slice(&[0x33u8; 64]);
        key
    }

    fn der_blob(content_len: usize, fill: u8) -> Vec<u8> {
        let mut blob = vec![DER_SEQUENCE];
        if content_len < 0x80 {
            blob.push(u8::try_from(content_len).unwrap());
        } else {
            blob.push(0x82);
            blob.extend_from_slice(&u16::try_from(content_len).unwrap().to_be_bytes());
        }
        blob.extend(std::iter::repeat(fill).take(content_len));
        blob
    }

    #[test]
    fn test_registration_without_certificate() {
        let response = RawRegistrationResponse {
            flags: 0x41,
            public_key: sample_key(),
            key_handle: vec![7u8; 64],
            certificate: None,
            signature: der_blob(70, 0xAB),
        };
        let decoded = RawRegistrationResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_registration_with_certificate() {
        let response = RawRegistrationResponse {
            flags: 0x45,
            public_key: sample_key(),
            key_handle: vec![1u8; 32],
            certificate: Some(der_blob(300, 0xCE)),
            signature: der_blob(71, 0x5A),
        };
        let decoded = RawRegistrationResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.certificate.as_ref().map(Vec::len), Some(304));
        assert_eq!(decoded.signature, response.signature);
        assert!(decoded.user_verified());
    }

    #[test]
    fn test_registration_rejects_short_prefix() {
        let result = RawRegistrationResponse::decode(&[0x41u8; 10]);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_registration_rejects_overrunning_key_handle() {
        let mut bytes = vec![0x41u8];
        bytes.extend_from_slice(&sample_key());
        bytes.push(200);
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(RawRegistrationResponse::decode(&bytes).is_err());
    }

    #[test]
    fn test_signed_authenticator_data_rejects_missing_presence() {
        let response = RawRegistrationResponse {
            flags: 0x40,
            public_key: sample_key(),
            key_handle: vec![1u8; 16],
            certificate: None,
            signature: der_blob(8, 0),
        };
        assert!(response.signed_authenticator_data(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_signed_authenticator_data_matches_authenticator_layout() {
        let response = RawRegistrationResponse {
            flags: 0x41,
            public_key: sample_key(),
            key_handle: vec![9u8; 16],
            certificate: None,
            signature: der_blob(8, 0),
        };
        let rebuilt = response.signed_authenticator_data(&[0xEEu8; 32]).unwrap();
        let round = RawRegistrationResponse::from_authenticator_data(&rebuilt, &response.signature)
            .unwrap();
        assert_eq!(round, response);
    }

    #[test]
    fn test_authentication_layout() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x02, 0x30, 0x00];
        let decoded = RawAuthenticationResponse::decode(&bytes).unwrap();
        assert!(decoded.user_present());
        assert_eq!(decoded.counter, 258);
        assert_eq!(decoded.signature, vec![0x30, 0x00]);
        assert_eq!(decoded.encode(), bytes.to_vec());
    }

    #[test]
    fn test_authentication_rejects_missing_signature() {
        let result = RawAuthenticationResponse::decode(&[0x01, 0, 0, 0, 1]);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_authentication_signed_data_layout() {
        let raw = RawAuthenticationResponse {
            flags: 0x01,
            counter: 7,
            signature: vec![],
        };
        let data = raw.signed_data(&[0xAAu8; 32], &[0xBBu8; 32]);
        assert_eq!(data.len(), 69);
        assert_eq!(data[32], 0x01);
        assert_eq!(&data[33..37], &7u32.to_be_bytes());
        assert_eq!(&data[37..], &[0xBBu8; 32]);
    }
}
