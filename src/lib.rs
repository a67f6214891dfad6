#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the keyceremony crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod authenticator;
pub mod codec;
pub mod errors;
pub mod factory;
pub mod relying_party;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authenticator::{Authenticator, CredentialSafe, SoftwareCredentialSafe, VerificationPrompt};
pub use errors::{CeremonyError, NoDevicesReason};
pub use factory::CeremonyServices;
pub use relying_party::{
    AuthenticationService, CeremonyStatus, DeviceRegistration, DeviceRegistrationResult,
    RegistrationService, RequestMessage,
};
pub use settings::KeyCeremonySettings;
pub use store::{ChallengeStore, DeviceRegistrationStore, EntryStore, MemoryEntryStore};
pub use sweeper::{ExpirySweeper, SweepReport};
