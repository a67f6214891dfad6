// Clone detection, compromised lockout, request correlation and key handle uniqueness
use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;
use keyceremony::authenticator::CredentialSafe;
use keyceremony::codec::{RawRegistrationResponse, FLAG_ATTESTED_DATA, FLAG_USER_PRESENT};
use keyceremony::errors::{CeremonyError, NoDevicesReason};
use keyceremony::relying_party::client_data::{AUTHENTICATE_GET_TYPE, REGISTER_FINISH_TYPE};
use keyceremony::relying_party::crypto::rp_id_hash;
use keyceremony::relying_party::{
    AuthenticateRequest, DeviceRegistration, RegisterResponse, RegistrationService, RequestKind,
    RequestMessage,
};
use keyceremony::store::DeviceRegistrationStore;
use keyceremony::testing::constants::TEST_USER;
use keyceremony::testing::mock::SlowLookupEntryStore;
use keyceremony::testing::{ClientDataBuilder, TestFixtures};
use keyceremony::utils::crypto::{decode_b64url, encode_b64url, sha256};

async fn registered(fixtures: &TestFixtures) -> DeviceRegistration {
    fixtures.register_device(Some(TEST_USER)).await
}

fn auth_request(fixtures: &TestFixtures) -> RequestMessage {
    fixtures
        .authentication
        .build_authentication_request(fixtures.rp_id(), TEST_USER, None)
        .unwrap()
}

fn authenticate_with_counter(
    fixtures: &TestFixtures,
    device: &DeviceRegistration,
    counter: u32,
) -> Result<DeviceRegistration, CeremonyError> {
    let message = auth_request(fixtures);
    let response = fixtures.signed_authentication_response(
        &message,
        &device.key_handle,
        AUTHENTICATE_GET_TYPE,
        FLAG_USER_PRESENT,
        counter,
    );
    fixtures
        .authentication
        .finish_authentication(&message, &response, TEST_USER, None)
        .map(|result| result.registration)
}

#[tokio::test]
async fn test_increasing_counter_is_accepted() {
    let fixtures = TestFixtures::new();
    let device = registered(&fixtures).await;

    let updated = authenticate_with_counter(&fixtures, &device, 5).unwrap();
    assert_eq!(updated.counter, 5);
    let updated = authenticate_with_counter(&fixtures, &device, 6).unwrap();
    assert_eq!(updated.counter, 6);
    assert_eq!(fixtures.devices.find(&device.id).unwrap().unwrap().counter, 6);
}

#[tokio::test]
async fn test_non_increasing_counter_marks_device_compromised() {
    for replayed in [5u32, 4, 0] {
        let fixtures = TestFixtures::new();
        let device = registered(&fixtures).await;
        authenticate_with_counter(&fixtures, &device, 5).unwrap();

        let result = authenticate_with_counter(&fixtures, &device, replayed);
        assert!(matches!(result, Err(CeremonyError::DeviceCompromised)));

        let stored = fixtures.devices.find(&device.id).unwrap().unwrap();
        assert!(stored.is_compromised());
        assert_eq!(stored.counter, 5);
    }
}

#[tokio::test]
async fn test_zero_counter_only_tolerated_on_first_use() {
    let fixtures = TestFixtures::new();
    let device = registered(&fixtures).await;

    let first = authenticate_with_counter(&fixtures, &device, 0).unwrap();
    assert_eq!(first.counter, 0);
    assert!(first.last_access_time.is_some());

    let second = authenticate_with_counter(&fixtures, &device, 0);
    assert!(matches!(second, Err(CeremonyError::DeviceCompromised)));
}

#[tokio::test]
async fn test_compromised_device_is_locked_out() {
    let fixtures = TestFixtures::new();
    let device = registered(&fixtures).await;
    let message = auth_request(&fixtures);
    fixtures.devices.mark_compromised(&device).unwrap();

    // a perfectly valid, increasing response still fails
    let response = fixtures.signed_authentication_response(
        &message,
        &device.key_handle,
        AUTHENTICATE_GET_TYPE,
        FLAG_USER_PRESENT,
        10,
    );
    let result = fixtures
        .authentication
        .finish_authentication(&message, &response, TEST_USER, None);
    assert!(matches!(result, Err(CeremonyError::DeviceCompromised)));

    let again = fixtures
        .authentication
        .build_authentication_request(fixtures.rp_id(), TEST_USER, None);
    assert!(matches!(
        again,
        Err(CeremonyError::NoEligibleDevices(NoDevicesReason::AllCompromised))
    ));
}

fn empty_authentication_message(fixtures: &TestFixtures) -> RequestMessage {
    let message = RequestMessage {
        id: "manual-request".to_string(),
        request_id: fixtures.challenges.generate_request_id().unwrap(),
        kind: RequestKind::Authentication,
        rp_id: fixtures.rp_id().to_string(),
        session_id: None,
        owner_user_id: Some(TEST_USER.to_string()),
        challenge: fixtures.challenges.generate_challenge().unwrap(),
        register_requests: Vec::new(),
        authenticate_requests: Vec::<AuthenticateRequest>::new(),
        created_at: Utc::now(),
    };
    fixtures.challenges.persist(message.clone()).unwrap();
    message
}

#[tokio::test]
async fn test_unoffered_key_handle_is_rejected_for_any_device_count() {
    for device_count in [0usize, 1, 5] {
        let fixtures = TestFixtures::new();
        for _ in 0..device_count {
            registered(&fixtures).await;
        }
        // a valid device of another user
        let stranger = fixtures.register_device(Some("bob")).await;

        let message = if device_count == 0 {
            empty_authentication_message(&fixtures)
        } else {
            auth_request(&fixtures)
        };
        assert_eq!(message.authenticate_requests.len(), device_count);

        let response = fixtures.signed_authentication_response(
            &message,
            &stranger.key_handle,
            AUTHENTICATE_GET_TYPE,
            FLAG_USER_PRESENT,
            1,
        );
        let result = fixtures
            .authentication
            .finish_authentication(&message, &response, TEST_USER, None);
        assert!(
            matches!(result, Err(CeremonyError::BadInput(_))),
            "device count {device_count}"
        );
        assert_eq!(
            fixtures.devices.find(&stranger.id).unwrap().unwrap().counter,
            0
        );
    }
}

/// Registration response for a new challenge that reuses an existing credential's key handle
fn replayed_registration(
    fixtures: &TestFixtures,
    message: &RequestMessage,
    key_handle: &str,
) -> RegisterResponse {
    let credential = fixtures
        .safe
        .find_credential(fixtures.rp_id(), &decode_b64url(key_handle).unwrap())
        .unwrap();
    let public_key = fixtures.safe.public_key(&credential.key_pair_alias).unwrap();
    let client_data = ClientDataBuilder::new(REGISTER_FINISH_TYPE, &message.challenge).build_json();

    let mut raw = RawRegistrationResponse {
        flags: FLAG_USER_PRESENT | FLAG_ATTESTED_DATA,
        public_key,
        key_handle: credential.credential_id.clone(),
        certificate: None,
        signature: Vec::new(),
    };
    let mut signed = raw
        .signed_authenticator_data(&rp_id_hash(fixtures.rp_id()))
        .unwrap();
    signed.extend_from_slice(&sha256(&client_data));
    raw.signature = fixtures
        .safe
        .sign(&credential.key_pair_alias, None, &signed)
        .unwrap();

    RegisterResponse {
        registration_data: encode_b64url(&raw.encode().unwrap()),
        client_data: encode_b64url(&client_data),
        device_data: None,
    }
}

#[tokio::test]
async fn test_duplicate_key_handle_is_rejected() {
    let fixtures = TestFixtures::new();
    let original = registered(&fixtures).await;

    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), Some("bob"), None)
        .unwrap();
    let response = replayed_registration(&fixtures, &message, &original.key_handle);

    let result = fixtures
        .registration
        .finish_registration(&message, &response, Some("bob"), None);
    assert!(matches!(result, Err(CeremonyError::BadInput(_))));

    assert_eq!(fixtures.devices.get_device_count(fixtures.rp_id()).unwrap(), 1);
    let untouched = fixtures.devices.find(&original.id).unwrap().unwrap();
    assert_eq!(untouched, original);
}

#[tokio::test]
async fn test_concurrent_replay_is_detected() {
    let fixtures = TestFixtures::new();
    let device = registered(&fixtures).await;

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let message = auth_request(&fixtures);
            let response = fixtures.signed_authentication_response(
                &message,
                &device.key_handle,
                AUTHENTICATE_GET_TYPE,
                FLAG_USER_PRESENT,
                1,
            );
            (message, response)
        })
        .collect();

    let barrier = Barrier::new(attempts.len());
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = attempts
            .iter()
            .map(|(message, response)| {
                let fixtures = &fixtures;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    fixtures
                        .authentication
                        .finish_authentication(message, response, TEST_USER, None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let compromised = results
        .iter()
        .filter(|r| matches!(r, Err(CeremonyError::DeviceCompromised)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(compromised, 1);
    assert!(fixtures.devices.find(&device.id).unwrap().unwrap().is_compromised());
}

#[tokio::test]
async fn test_concurrent_registrations_share_no_key_handle() {
    let fixtures = TestFixtures::new();
    // credential lives in the authenticator but not in the store under test
    let credential = registered(&fixtures).await;

    let devices = Arc::new(DeviceRegistrationStore::new(Arc::new(
        SlowLookupEntryStore::<DeviceRegistration>::new(Duration::from_millis(100)),
    )));
    let registration =
        RegistrationService::new(Arc::clone(&fixtures.challenges), Arc::clone(&devices));

    let attempts: Vec<_> = ["bob", "carol"]
        .into_iter()
        .map(|owner| {
            let message = registration
                .build_registration_request(fixtures.rp_id(), Some(owner), None)
                .unwrap();
            let response = replayed_registration(&fixtures, &message, &credential.key_handle);
            (owner, message, response)
        })
        .collect();

    let barrier = Barrier::new(attempts.len());
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = attempts
            .iter()
            .map(|(owner, message, response)| {
                let registration = &registration;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    registration.finish_registration(message, response, Some(*owner), None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CeremonyError::BadInput(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(rejected, 1);

    let stored = devices
        .find_all_by_key_handle(fixtures.rp_id(), &credential.key_handle)
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_consumed_request_cannot_be_replayed() {
    let fixtures = TestFixtures::new();
    let device = registered(&fixtures).await;
    let message = auth_request(&fixtures);
    let response = fixtures.signed_authentication_response(
        &message,
        &device.key_handle,
        AUTHENTICATE_GET_TYPE,
        FLAG_USER_PRESENT,
        1,
    );

    fixtures
        .authentication
        .finish_authentication(&message, &response, TEST_USER, None)
        .unwrap();
    let replay = fixtures
        .authentication
        .finish_authentication(&message, &response, TEST_USER, None);
    assert!(matches!(replay, Err(CeremonyError::BadInput(_))));
    assert!(!fixtures.devices.find(&device.id).unwrap().unwrap().is_compromised());
}
