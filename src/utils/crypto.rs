// Hashing and random helpers shared by the authenticator and the relying party

use base64::{engine::general_purpose, Engine as _};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::SafeError;

/// SHA-256 digest of `data`
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
    out
}

/// Fill `length` bytes from the system CSPRNG
///
/// # Errors
///
/// Returns `SafeError::KeyGeneration` if the system random source fails.
pub fn generate_random_bytes(rng: &SystemRandom, length: usize) -> Result<Vec<u8>, SafeError> {
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes)
        .map_err(|_| SafeError::KeyGeneration("System random source failed".to_string()))?;
    Ok(bytes)
}

/// Base64url (no padding) encoding used for every identifier on the wire
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url value, tolerating trailing padding
///
/// # Errors
///
/// Returns an error if the input is not valid base64url.
pub fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}
