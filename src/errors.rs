//! Error types for credential ceremonies
//!
//! This module defines the error taxonomy shared by the authenticator and the
//! relying-party services, plus the lower-level codec, storage and credential
//! safe errors that feed into it.

use thiserror::Error;

/// Why a user has no device eligible for authentication.
///
/// Only used for server-side diagnostics; see [`CeremonyError::public_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDevicesReason {
    NoneRegistered,
    AllCompromised,
}

impl std::fmt::Display for NoDevicesReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoDevicesReason::NoneRegistered => write!(f, "no devices registered"),
            NoDevicesReason::AllCompromised => write!(f, "all devices are compromised"),
        }
    }
}

/// Errors that terminate a registration or authentication ceremony
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// Malformed or mismatched protocol fields
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Device previously or newly marked compromised
    #[error("Device is compromised")]
    DeviceCompromised,

    /// Zero usable devices
    #[error("No eligible devices: {0}")]
    NoEligibleDevices(NoDevicesReason),

    /// User declined or failed verification, or no credential matched
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// A required capability is absent
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Requested algorithm or credential type is not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Credential excluded by the caller's exclude list
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal or cryptographic failure
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CeremonyError {
    /// Message that is safe to return to an unauthenticated caller.
    ///
    /// `NoEligibleDevices` collapses to one string regardless of the reason and
    /// `Unknown` hides its detail.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            CeremonyError::NoEligibleDevices(_) => "No eligible devices".to_string(),
            CeremonyError::Unknown(_) => "Unknown error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Binary codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Truncated data: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("CBOR error: {0}")]
    Cbor(String),
}

impl From<CodecError> for CeremonyError {
    fn from(err: CodecError) -> Self {
        CeremonyError::BadInput(err.to_string())
    }
}

/// Entry store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

impl From<StoreError> for CeremonyError {
    fn from(err: StoreError) -> Self {
        CeremonyError::Unknown(err.to_string())
    }
}

/// Credential safe errors
#[derive(Debug, Error)]
pub enum SafeError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Unknown key alias: {0}")]
    UnknownAlias(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Key {0} requires user verification")]
    VerificationRequired(String),

    #[error("Counter persistence failed: {0}")]
    Counter(String),

    #[error("Credential safe lock poisoned")]
    Poisoned,
}

/// The user cancelled, failed or timed out the verification prompt
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("User verification cancelled")]
pub struct Cancelled;
