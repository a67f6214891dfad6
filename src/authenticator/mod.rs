//! Device-side authenticator
//!
//! Orchestrates make-credential and get-assertion over a [`CredentialSafe`]
//! and a [`VerificationPrompt`], producing the signed objects the relying
//! party verifies.

pub mod prompt;
pub mod safe;
pub mod service;
pub mod types;

pub use prompt::{CredentialSelector, PresencePrompt, SigningHandle, VerificationPrompt};
pub use safe::{CredentialSafe, SoftwareCredentialSafe};
pub use service::Authenticator;
pub use types::{
    AssertionResult, AttestationObject, CredentialDescriptor, CredentialSource,
    GetAssertionOptions, MakeCredentialOptions, PUBLIC_KEY_CREDENTIAL_TYPE,
};
