//! Relying-party signature checks (ES256 via `ring`)

use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};

use crate::codec::PUBLIC_KEY_LEN;
use crate::errors::CeremonyError;
use crate::utils::crypto::sha256;

/// Verify a DER-encoded ES256 signature
///
/// # Arguments
/// * `public_key` - Uncompressed SEC1 P-256 point
/// * `data` - The data that was signed
/// * `signature` - ASN.1 DER signature
///
/// # Errors
/// Returns `BadInput` if the key is malformed or the signature does not verify.
pub fn verify_es256_signature(
    public_key: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), CeremonyError> {
    if public_key.len() != PUBLIC_KEY_LEN {
        return Err(CeremonyError::BadInput(format!(
            "Public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            public_key.len()
        )));
    }
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(data, signature)
        .map_err(|_| CeremonyError::BadInput("Signature verification failed".to_string()))
}

#[must_use]
pub fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    sha256(rp_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    fn key_pair() -> EcdsaKeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng).unwrap()
    }

    #[test]
    fn test_valid_signature_verifies() {
        let key = key_pair();
        let signature = key.sign(&SystemRandom::new(), b"message").unwrap();
        verify_es256_signature(key.public_key().as_ref(), b"message", signature.as_ref()).unwrap();
    }

    #[test]
    fn test_tampered_data_fails() {
        let key = key_pair();
        let signature = key.sign(&SystemRandom::new(), b"message").unwrap();
        let result =
            verify_es256_signature(key.public_key().as_ref(), b"messagf", signature.as_ref());
        assert!(matches!(result, Err(CeremonyError::BadInput(_))));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let result = verify_es256_signature(&[0x04; 33], b"m", &[0x30, 0x00]);
        assert!(matches!(result, Err(CeremonyError::BadInput(_))));
    }
}
