// Settings loading: TOML files, the secrets directory and environment overrides
use std::fs;

use keyceremony::settings::KeyCeremonySettings;
use keyceremony::testing::TestFixtures;
use serial_test::serial;

fn clean_env_vars() {
    for var in [
        "RP_ID",
        "ALLOWED_FACETS",
        "REQUEST_TTL_SECONDS",
        "PENDING_REGISTRATION_TTL_SECONDS",
        "SWEEP_INTERVAL_SECONDS",
        "SWEEP_BATCH_SIZE",
        "SWEEP_CHUNK_SIZE",
        "VERIFICATION_TIMEOUT_SECONDS",
        "LOG_LEVEL",
        "KEYCEREMONY_SECRETS_DIR",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_prefers_secrets_dir_then_env() {
    clean_env_vars();
    let secrets = tempfile::tempdir().unwrap();
    fs::write(
        secrets.path().join("Settings.toml"),
        r#"
        [relying_party]
        rp_id = "https://secrets.example"
        allowed_facets = ["https://secrets.example", "https://m.secrets.example"]

        [challenges]
        request_ttl_seconds = 45
        "#,
    )
    .unwrap();
    std::env::set_var("KEYCEREMONY_SECRETS_DIR", secrets.path());
    std::env::set_var("REQUEST_TTL_SECONDS", "90");
    std::env::set_var("LOG_LEVEL", "debug");

    let settings = KeyCeremonySettings::load().unwrap();
    assert_eq!(settings.relying_party.rp_id, "https://secrets.example");
    assert_eq!(settings.effective_facets().len(), 2);
    assert_eq!(settings.challenges.request_ttl_seconds, 90);
    assert_eq!(settings.logging.level, "debug");

    clean_env_vars();
}

#[test]
#[serial]
fn test_load_rejects_invalid_overrides() {
    clean_env_vars();
    std::env::set_var("SWEEP_CHUNK_SIZE", "5000");

    let result = KeyCeremonySettings::load();
    assert!(result.is_err());

    clean_env_vars();
}

#[test]
fn test_from_file_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Settings.toml");
    fs::write(&path, "[sweeper]\nbatch_size = \"many\"\n").unwrap();

    let err = KeyCeremonySettings::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[tokio::test]
#[serial]
async fn test_env_ttl_reaches_challenge_store() {
    clean_env_vars();
    std::env::set_var("REQUEST_TTL_SECONDS", "1");

    let mut settings = TestFixtures::settings();
    KeyCeremonySettings::apply_env_overrides(&mut settings);
    clean_env_vars();

    let fixtures = TestFixtures::with_settings(settings);
    assert_eq!(fixtures.challenges.ttl(), chrono::Duration::seconds(1));
    let message = fixtures
        .registration
        .build_registration_request(fixtures.rp_id(), None, None)
        .unwrap();
    assert!(fixtures
        .challenges
        .is_expired(&message, chrono::Utc::now() + chrono::Duration::seconds(2)));
}
