//! Challenge store: single-use request messages with TTL
//!
//! Challenges come from an injected random source so tests can seed it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::debug;
use rand::rngs::StdRng;
use rand::RngCore;

use super::{EntryStore, Filter};
use crate::errors::{CeremonyError, StoreError};
use crate::relying_party::types::RequestMessage;
use crate::settings::{ttl_duration, ChallengeSettings, MIN_CHALLENGE_LENGTH};
use crate::utils::crypto::encode_b64url;

const REQUEST_ID_LEN: usize = 16;

pub struct ChallengeStore {
    entries: Arc<dyn EntryStore<RequestMessage>>,
    rng: Mutex<StdRng>,
    challenge_length: usize,
    ttl: Duration,
}

impl ChallengeStore {
    /// `challenge_length` is raised to the 16-byte minimum if smaller
    #[must_use]
    pub fn new(
        entries: Arc<dyn EntryStore<RequestMessage>>,
        rng: StdRng,
        challenge_length: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            entries,
            rng: Mutex::new(rng),
            challenge_length: challenge_length.max(MIN_CHALLENGE_LENGTH),
            ttl,
        }
    }

    #[must_use]
    pub fn from_settings(
        entries: Arc<dyn EntryStore<RequestMessage>>,
        rng: StdRng,
        settings: &ChallengeSettings,
    ) -> Self {
        Self::new(
            entries,
            rng,
            settings.challenge_length_bytes,
            ttl_duration(settings.request_ttl_seconds),
        )
    }

    #[must_use]
    pub fn entry_store(&self) -> &Arc<dyn EntryStore<RequestMessage>> {
        &self.entries
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn random_b64url(&self, length: usize) -> Result<String, StoreError> {
        let mut bytes = vec![0u8; length];
        self.rng
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .fill_bytes(&mut bytes);
        Ok(encode_b64url(&bytes))
    }

    /// Fresh base64url challenge
    ///
    /// # Errors
    /// Returns `StoreError::Poisoned` if the random source lock is poisoned.
    pub fn generate_challenge(&self) -> Result<String, StoreError> {
        self.random_b64url(self.challenge_length)
    }

    /// Fresh client-visible request id
    ///
    /// # Errors
    /// Returns `StoreError::Poisoned` if the random source lock is poisoned.
    pub fn generate_request_id(&self) -> Result<String, StoreError> {
        self.random_b64url(REQUEST_ID_LEN)
    }

    /// # Errors
    /// Returns an error if the entry store rejects the message.
    pub fn persist(&self, message: RequestMessage) -> Result<(), StoreError> {
        debug!("Persisting {:?} request message {}", message.kind, message.id);
        self.entries.persist(message)
    }

    #[must_use]
    pub fn is_expired(&self, message: &RequestMessage, now: DateTime<Utc>) -> bool {
        message.created_at + self.ttl <= now
    }

    /// Stored, unexpired request message with this client-visible id
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<RequestMessage>, StoreError> {
        let now = Utc::now();
        Ok(self
            .entries
            .find_by_filter(&Filter::eq_text(RequestMessage::ATTR_REQUEST_ID, request_id))?
            .into_iter()
            .find(|message| !self.is_expired(message, now)))
    }

    /// Atomically take the stored copy of `message`; only one caller ever succeeds
    ///
    /// A copy whose request id or challenge differs from the stored one is rejected
    /// and leaves the stored message in place.
    ///
    /// # Errors
    ///
    /// - `BadInput` if the message was already consumed, swept, has expired or
    ///   does not match the stored copy
    /// - `Unknown` if the entry store fails
    pub fn consume(&self, message: &RequestMessage) -> Result<RequestMessage, CeremonyError> {
        let used = || {
            CeremonyError::BadInput("Request message was already used or has expired".to_string())
        };

        let stored = self.entries.find(&message.id)?.ok_or_else(used)?;
        if stored.request_id != message.request_id || stored.challenge != message.challenge {
            return Err(CeremonyError::BadInput(
                "Request message does not match the stored copy".to_string(),
            ));
        }

        let guard = Filter::And(vec![
            Filter::eq_text(RequestMessage::ATTR_REQUEST_ID, &message.request_id),
            Filter::eq_text(RequestMessage::ATTR_CHALLENGE, &message.challenge),
        ]);
        let stored = self.entries.remove_if(&message.id, &guard)?.ok_or_else(used)?;
        if self.is_expired(&stored, Utc::now()) {
            return Err(CeremonyError::BadInput("Request message has expired".to_string()));
        }
        Ok(stored)
    }

    /// Idempotent removal
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn remove(&self, message: &RequestMessage) -> Result<(), StoreError> {
        self.entries.remove(&message.id).map(|_| ())
    }
}
