//! Unified testing utilities for keyceremony
//!
//! ## Organization
//!
//! - [`fixtures`] - Wired services over in-memory stores, plus helpers that
//!   drive the software authenticator through a ceremony
//! - [`builders`] - Fluent builders for device registrations and client data
//! - [`mock`] - Scripted prompts, selectors, credential safes and entry stores
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyceremony::testing::fixtures::TestFixtures;
//!
//! let fixtures = TestFixtures::new();
//! let device = fixtures.register_device(Some("alice")).await;
//! ```

pub mod builders;
pub mod fixtures;
pub mod mock;

pub use builders::{ClientDataBuilder, DeviceRegistrationBuilder};
pub use fixtures::TestFixtures;

/// Common test constants
pub mod constants {
    /// Relying party used throughout the tests
    pub const TEST_RP_ID: &str = "https://example.com";

    /// Origin the test client reports; equal to the rp id so default facets accept it
    pub const TEST_ORIGIN: &str = "https://example.com";

    pub const TEST_USER: &str = "alice";

    /// Seed for the challenge store's random source
    pub const TEST_RNG_SEED: u64 = 0x5EED;
}
