//! Relying-party side of the registration and authentication ceremonies

pub mod authentication;
pub mod client_data;
pub mod crypto;
pub mod registration;
pub mod types;

pub use authentication::AuthenticationService;
pub use client_data::{verify_client_data, CeremonyType, ClientData, VerifiedClientData};
pub use registration::RegistrationService;
pub use types::{
    AuthenticateRequest, AuthenticateResponse, CeremonyStatus, DeviceData, DeviceRegistration,
    DeviceRegistrationResult, DeviceStatus, RegisterRequest, RegisterResponse, RequestKind,
    RequestMessage,
};
