//! Service factory for wiring the relying party over shared storage
//!
//! The challenge store, device store, both ceremony services and the expiry
//! sweeper must all see the same entry stores, otherwise the sweeper cleans up
//! records nobody else can reach.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::relying_party::{
    AuthenticationService, DeviceRegistration, RegistrationService, RequestMessage,
};
use crate::settings::KeyCeremonySettings;
use crate::store::{ChallengeStore, DeviceRegistrationStore, EntryStore, MemoryEntryStore};
use crate::sweeper::ExpirySweeper;

/// Relying-party services sharing one pair of entry stores
pub struct CeremonyServices {
    pub challenges: Arc<ChallengeStore>,
    pub devices: Arc<DeviceRegistrationStore>,
    pub registration: RegistrationService,
    pub authentication: AuthenticationService,
    settings: KeyCeremonySettings,
}

impl CeremonyServices {
    /// Wire every service over the given backends
    ///
    /// # Arguments
    /// * `requests` - Backend for request messages
    /// * `devices` - Backend for device registrations
    /// * `rng` - Random source for challenges and request ids
    /// * `settings` - Loaded configuration
    #[must_use]
    pub fn new(
        requests: Arc<dyn EntryStore<RequestMessage>>,
        devices: Arc<dyn EntryStore<DeviceRegistration>>,
        rng: StdRng,
        settings: &KeyCeremonySettings,
    ) -> Self {
        let challenges = Arc::new(ChallengeStore::from_settings(
            requests,
            rng,
            &settings.challenges,
        ));
        let devices = Arc::new(DeviceRegistrationStore::new(devices));

        log::info!("Ceremony services ready for {}", settings.relying_party.rp_id);
        Self {
            registration: RegistrationService::new(Arc::clone(&challenges), Arc::clone(&devices)),
            authentication: AuthenticationService::new(
                Arc::clone(&challenges),
                Arc::clone(&devices),
            ),
            challenges,
            devices,
            settings: settings.clone(),
        }
    }

    /// In-process stores and an OS-seeded random source
    #[must_use]
    pub fn in_memory(settings: &KeyCeremonySettings) -> Self {
        Self::new(
            Arc::new(MemoryEntryStore::new()),
            Arc::new(MemoryEntryStore::new()),
            StdRng::from_os_rng(),
            settings,
        )
    }

    /// Expiry sweeper over the same stores the services write to
    #[must_use]
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(self.challenges.entry_store()),
            Arc::clone(self.devices.entry_store()),
            &self.settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::builders::DeviceRegistrationBuilder;
    use crate::testing::constants::TEST_RP_ID;
    use chrono::{Duration, Utc};

    #[test]
    fn test_sweeper_sees_service_records() {
        let mut settings = KeyCeremonySettings::default();
        settings.relying_party.rp_id = TEST_RP_ID.to_string();
        let services = CeremonyServices::in_memory(&settings);

        services
            .registration
            .build_registration_request(TEST_RP_ID, None, None)
            .unwrap();
        services
            .devices
            .add(
                DeviceRegistrationBuilder::new()
                    .created_at(Utc::now() - Duration::days(30))
                    .build(),
            )
            .unwrap();

        let report = services
            .sweeper()
            .sweep_once(Utc::now() + Duration::hours(1));
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(services.authentication.get_device_count(TEST_RP_ID).unwrap(), 0);
    }
}
