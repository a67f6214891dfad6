// End-to-end registration and authentication ceremonies over the in-memory stores
use keyceremony::authenticator::{CredentialSafe, MakeCredentialOptions};
use keyceremony::codec::decode_authenticator_data;
use keyceremony::errors::CeremonyError;
use keyceremony::relying_party::client_data::{AUTHENTICATE_GET_TYPE, REGISTER_FINISH_TYPE};
use keyceremony::relying_party::{CeremonyStatus, DeviceData};
use keyceremony::testing::constants::TEST_USER;
use keyceremony::testing::{ClientDataBuilder, TestFixtures};
use keyceremony::utils::crypto::decode_b64url;

#[tokio::test]
async fn test_full_ceremony_one_step_then_attached() {
    let fixtures = TestFixtures::new();

    // 1. registration request without a user
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), None, None)
        .unwrap();
    assert_eq!(message.register_requests.len(), 1);
    assert!(decode_b64url(&message.challenge).unwrap().len() >= 16);

    // 2. the authenticator answers; authenticator data is 37 + 16 + 2 + id + cose key
    let response = fixtures
        .register_response(&message, REGISTER_FINISH_TYPE)
        .await;
    let credentials = fixtures.safe.credentials_for_rp(fixtures.rp_id());
    let credential = &credentials[0];
    let options = MakeCredentialOptions::new(
        fixtures.rp_id(),
        b"sample",
        "sample",
        &[0u8; 32],
    );
    let attestation = fixtures.authenticator.make_credential(&options).await.unwrap();
    assert_eq!(
        attestation.authenticator_data.len(),
        37 + 16 + 2 + attestation.credential_id.len() + 77
    );
    assert!(decode_authenticator_data(&attestation.authenticator_data)
        .unwrap()
        .attested_credential_data
        .is_some());

    // 3. relying party approves with counter 0
    let result = fixtures
        .registration
        .finish_registration(&message, &response, None, None)
        .unwrap();
    assert_eq!(result.status, CeremonyStatus::Approved);
    assert_eq!(result.registration.counter, 0);
    assert_eq!(
        decode_b64url(&result.registration.key_handle).unwrap(),
        credential.credential_id
    );

    // one-step: the pending registration is claimed by its user
    fixtures
        .devices
        .attach_user_device(TEST_USER, &result.registration.id)
        .unwrap();

    // 4. authentication request carries that key handle
    let auth_message = fixtures
        .authentication
        .build_authentication_request(fixtures.rp_id(), TEST_USER, None)
        .unwrap();
    assert_eq!(auth_message.authenticate_requests.len(), 1);
    assert_eq!(
        auth_message.authenticate_requests[0].key_handle,
        result.registration.key_handle
    );

    // 5. the authenticator signs with counter 1
    let auth_response = fixtures
        .authenticate_response(
            &auth_message,
            &result.registration.key_handle,
            AUTHENTICATE_GET_TYPE,
        )
        .await;

    // 6. approved and the stored counter follows
    let outcome = fixtures
        .authentication
        .finish_authentication(&auth_message, &auth_response, TEST_USER, None)
        .unwrap();
    assert!(outcome.is_approved());
    let stored = fixtures
        .devices
        .find(&result.registration.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.counter, 1);
    assert!(stored.last_access_time.is_some());
}

#[tokio::test]
async fn test_two_step_registration_and_repeated_authentication() {
    let fixtures = TestFixtures::new();
    let first = fixtures.register_device(Some(TEST_USER)).await;

    // second device: the request re-offers the first one
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), Some(TEST_USER), Some("session-7"))
        .unwrap();
    assert_eq!(message.authenticate_requests.len(), 1);
    assert_eq!(message.authenticate_requests[0].key_handle, first.key_handle);

    let mut response = fixtures
        .register_response(&message, REGISTER_FINISH_TYPE)
        .await;
    response.device_data = Some(DeviceData {
        name: Some("Security key".to_string()),
        ..DeviceData::default()
    });
    let second = fixtures
        .registration
        .finish_registration(&message, &response, Some(TEST_USER), None)
        .unwrap()
        .registration;
    assert_eq!(
        second.device_data.as_ref().and_then(|d| d.name.as_deref()),
        Some("Security key")
    );

    let devices = fixtures
        .devices
        .find_user_devices(TEST_USER, fixtures.rp_id())
        .unwrap();
    assert_eq!(devices.len(), 2);

    for expected in 1..=3u32 {
        let auth_message = fixtures
            .authentication
            .build_authentication_request(fixtures.rp_id(), TEST_USER, None)
            .unwrap();
        assert_eq!(auth_message.authenticate_requests.len(), 2);
        let auth_response = fixtures
            .authenticate_response(&auth_message, &second.key_handle, AUTHENTICATE_GET_TYPE)
            .await;
        let outcome = fixtures
            .authentication
            .finish_authentication(&auth_message, &auth_response, TEST_USER, None)
            .unwrap();
        assert_eq!(outcome.registration.counter, expected);
    }
}

#[tokio::test]
async fn test_allowed_facets_replace_rp_id_origin() {
    let fixtures = TestFixtures::new();
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), None, None)
        .unwrap();
    let mut response = fixtures
        .register_response(&message, REGISTER_FINISH_TYPE)
        .await;
    // re-issue client data from an app facet; the signature no longer covers it
    response.client_data = ClientDataBuilder::new(REGISTER_FINISH_TYPE, &message.challenge)
        .origin("android:apk-key-hash:abc")
        .build();

    let facets = vec!["android:apk-key-hash:abc".to_string()];
    let result = fixtures
        .registration
        .finish_registration(&message, &response, None, Some(&facets));
    // origin accepted, then the signature check fails on the substituted client data
    assert!(matches!(result, Err(CeremonyError::BadInput(ref m)) if m.contains("Signature")));
}

#[tokio::test]
async fn test_foreign_origin_is_rejected() {
    let fixtures = TestFixtures::new();
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), None, None)
        .unwrap();
    let mut response = fixtures
        .register_response(&message, REGISTER_FINISH_TYPE)
        .await;
    response.client_data = ClientDataBuilder::new(REGISTER_FINISH_TYPE, &message.challenge)
        .origin("https://phish.example")
        .build();

    let result = fixtures
        .registration
        .finish_registration(&message, &response, None, None);
    assert!(matches!(result, Err(CeremonyError::BadInput(ref m)) if m.contains("facet")));
}

#[tokio::test]
async fn test_request_lookup_by_request_id() {
    let fixtures = TestFixtures::new();
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), None, None)
        .unwrap();

    let found = fixtures
        .challenges
        .find_by_request_id(&message.request_id)
        .unwrap()
        .unwrap();
    assert_eq!(found, message);

    let response = fixtures
        .register_response(&found, REGISTER_FINISH_TYPE)
        .await;
    fixtures
        .registration
        .finish_registration(&found, &response, None, None)
        .unwrap();
    assert!(fixtures
        .challenges
        .find_by_request_id(&message.request_id)
        .unwrap()
        .is_none());
}
