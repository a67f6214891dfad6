use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyCeremonySettings {
    pub relying_party: RelyingPartySettings,
    pub challenges: ChallengeSettings,
    pub sweeper: SweeperSettings,
    pub authenticator: AuthenticatorSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelyingPartySettings {
    pub rp_id: String,
    /// Accepted client origins; empty means only `rp_id`
    pub allowed_facets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub request_ttl_seconds: u64,
    /// How long an unattached one-step registration waits to be claimed
    pub pending_registration_ttl_seconds: u64,
    pub challenge_length_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    pub interval_seconds: u64,
    /// Upper bound on records examined per pass
    pub batch_size: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorSettings {
    pub verification_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

/// Minimum challenge entropy in bytes
pub const MIN_CHALLENGE_LENGTH: usize = 16;

/// Configured seconds as a `chrono` duration, saturating at chrono's range
#[must_use]
pub fn ttl_duration(seconds: u64) -> chrono::Duration {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    chrono::Duration::seconds(seconds)
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            rp_id: "https://localhost".to_string(),
            allowed_facets: Vec::new(),
        }
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            request_ttl_seconds: 120,
            pending_registration_ttl_seconds: 600,
            challenge_length_bytes: 32,
        }
    }
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            batch_size: 1000,
            chunk_size: 100,
        }
    }
}

impl Default for AuthenticatorSettings {
    fn default() -> Self {
        Self {
            verification_timeout_seconds: 60,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KeyCeremonySettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - The resulting settings fail validation
    pub fn load() -> Result<Self> {
        Self::load_env_file();

        // Load base settings from TOML or defaults
        let mut settings = Self::load_base_settings()?;

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut settings);

        settings.validate()?;
        settings.init_logger();

        Ok(settings)
    }

    /// Initialize `env_logger` at the configured level. `RUST_LOG` still wins.
    pub fn init_logger(&self) {
        let env = env_logger::Env::default().default_filter_or(self.logging.level.as_str());
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already initialized");
        }
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `KEYCEREMONY_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("KEYCEREMONY_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ KEYCEREMONY_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse one TOML settings file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let toml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        basic_toml::from_str(&toml_content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_relying_party_env_overrides(&mut settings.relying_party);
        Self::apply_challenge_env_overrides(&mut settings.challenges);
        Self::apply_sweeper_env_overrides(&mut settings.sweeper);
        Self::apply_authenticator_env_overrides(&mut settings.authenticator);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_relying_party_env_overrides(rp_settings: &mut RelyingPartySettings) {
        if let Ok(rp_id) = std::env::var("RP_ID") {
            rp_settings.rp_id = rp_id;
        }
        if let Ok(facets) = std::env::var("ALLOWED_FACETS") {
            rp_settings.allowed_facets = facets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
    }

    fn apply_challenge_env_overrides(challenge_settings: &mut ChallengeSettings) {
        Self::apply_parsed_env_override(
            "REQUEST_TTL_SECONDS",
            &mut challenge_settings.request_ttl_seconds,
        );
        Self::apply_parsed_env_override(
            "PENDING_REGISTRATION_TTL_SECONDS",
            &mut challenge_settings.pending_registration_ttl_seconds,
        );
    }

    fn apply_sweeper_env_overrides(sweeper_settings: &mut SweeperSettings) {
        Self::apply_parsed_env_override(
            "SWEEP_INTERVAL_SECONDS",
            &mut sweeper_settings.interval_seconds,
        );
        Self::apply_parsed_env_override("SWEEP_BATCH_SIZE", &mut sweeper_settings.batch_size);
        Self::apply_parsed_env_override("SWEEP_CHUNK_SIZE", &mut sweeper_settings.chunk_size);
    }

    fn apply_authenticator_env_overrides(authenticator_settings: &mut AuthenticatorSettings) {
        Self::apply_parsed_env_override(
            "VERIFICATION_TIMEOUT_SECONDS",
            &mut authenticator_settings.verification_timeout_seconds,
        );
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            logging_settings.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides.
    /// Unparseable values are ignored.
    fn apply_parsed_env_override<T: FromStr>(env_var: &str, target: &mut T) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.trim().parse::<T>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Reject settings the ceremonies cannot run with
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `rp_id` is empty
    /// - the challenge length is below 16 bytes
    /// - batch or chunk size is zero, or chunk size exceeds batch size
    pub fn validate(&self) -> Result<()> {
        if self.relying_party.rp_id.trim().is_empty() {
            bail!("relying_party.rp_id must not be empty");
        }
        if self.challenges.challenge_length_bytes < MIN_CHALLENGE_LENGTH {
            bail!(
                "challenges.challenge_length_bytes must be at least {MIN_CHALLENGE_LENGTH}, got {}",
                self.challenges.challenge_length_bytes
            );
        }
        if self.sweeper.batch_size == 0 || self.sweeper.chunk_size == 0 {
            bail!("sweeper.batch_size and sweeper.chunk_size must be positive");
        }
        if self.sweeper.chunk_size > self.sweeper.batch_size {
            bail!(
                "sweeper.chunk_size ({}) must not exceed sweeper.batch_size ({})",
                self.sweeper.chunk_size,
                self.sweeper.batch_size
            );
        }
        Ok(())
    }

    /// Facets accepted for client data origins
    #[must_use]
    pub fn effective_facets(&self) -> Vec<String> {
        if self.relying_party.allowed_facets.is_empty() {
            vec![self.relying_party.rp_id.clone()]
        } else {
            self.relying_party.allowed_facets.clone()
        }
    }
}
