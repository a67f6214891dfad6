//! Binary codec for authenticator data, COSE keys and raw device responses
//!
//! Pure functions only: nothing in this module performs I/O or holds state, so
//! the authenticator and the relying party can share it and agree
//! byte-for-byte on every structure they sign or verify.

mod authenticator_data;
mod cose;
mod raw;

pub use authenticator_data::{
    decode_authenticator_data, encode_attested_credential_data, encode_authenticator_data,
    AttestedCredentialData, AuthenticatorData, AAGUID, AUTHENTICATOR_DATA_MIN_LEN,
    FLAG_ATTESTED_DATA, FLAG_USER_PRESENT, FLAG_USER_VERIFIED, RP_ID_HASH_LEN,
};
pub use cose::{decode_public_key_cose, encode_public_key_cose, COSE_ALG_ES256, PUBLIC_KEY_LEN};
pub use raw::{
    RawAuthenticationResponse, RawRegistrationResponse, AUTHENTICATION_MIN_LEN,
    REGISTRATION_MIN_LEN,
};
