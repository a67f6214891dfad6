//! Device registration store
//!
//! Lookups by key handle go through the `key_handle_hash` index and then
//! compare the full key handle, so hash collisions never match the wrong device.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::{AttributeValue, Entry, EntryStore, Filter};
use crate::errors::{CeremonyError, StoreError};
use crate::relying_party::types::{DeviceRegistration, DeviceStatus};
use crate::utils::crypto::decode_b64url;

/// Bucketing hash over key handle bytes (`h = 31 * h + b`, signed bytes, wrapping)
///
/// Not a security control: only used to narrow index lookups.
#[must_use]
pub fn key_handle_hash(key_handle: &[u8]) -> i32 {
    key_handle.iter().fold(1i32, |hash, &byte| {
        hash.wrapping_mul(31)
            .wrapping_add(i32::from(i8::from_ne_bytes([byte])))
    })
}

/// Index hash for a base64url key handle; falls back to the text bytes if it does not decode
#[must_use]
pub fn encoded_key_handle_hash(key_handle: &str) -> i32 {
    decode_b64url(key_handle).map_or_else(
        |_| key_handle_hash(key_handle.as_bytes()),
        |bytes| key_handle_hash(&bytes),
    )
}

const MAX_STATUS_ATTEMPTS: usize = 3;

pub struct DeviceRegistrationStore {
    entries: Arc<dyn EntryStore<DeviceRegistration>>,
}

impl DeviceRegistrationStore {
    #[must_use]
    pub fn new(entries: Arc<dyn EntryStore<DeviceRegistration>>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entry_store(&self) -> &Arc<dyn EntryStore<DeviceRegistration>> {
        &self.entries
    }

    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find(&self, id: &str) -> Result<Option<DeviceRegistration>, StoreError> {
        self.entries.find(id)
    }

    /// # Errors
    /// Returns an error if the entry store fails or the id is already taken.
    pub fn add(&self, registration: DeviceRegistration) -> Result<(), StoreError> {
        self.entries.persist(registration)
    }

    /// Insert `registration` unless its key handle is already registered for the
    /// same relying party, under any owner. Returns `false` without writing if it is.
    ///
    /// # Errors
    /// Returns an error if the entry store fails or the id is already taken.
    pub fn add_unique(&self, registration: DeviceRegistration) -> Result<bool, StoreError> {
        let conflict = Filter::And(vec![
            Self::key_handle_filter(&registration.application_id, &registration.key_handle),
            Filter::eq_text(DeviceRegistration::ATTR_KEY_HANDLE, &registration.key_handle),
        ]);
        self.entries.persist_unless(registration, &conflict)
    }

    fn key_handle_filter(rp_id: &str, key_handle: &str) -> Filter {
        Filter::And(vec![
            Filter::eq(
                DeviceRegistration::ATTR_KEY_HANDLE_HASH,
                AttributeValue::Int(i64::from(encoded_key_handle_hash(key_handle))),
            ),
            Filter::eq_text(DeviceRegistration::ATTR_APPLICATION_ID, rp_id),
        ])
    }

    fn owner_filter(owner_user_id: &str, rp_id: &str) -> Filter {
        Filter::And(vec![
            Filter::eq_text(DeviceRegistration::ATTR_OWNER, owner_user_id),
            Filter::eq_text(DeviceRegistration::ATTR_APPLICATION_ID, rp_id),
        ])
    }

    /// Filter for unattached registrations created at or before `cutoff`
    #[must_use]
    pub fn pending_filter(cutoff: DateTime<Utc>) -> Filter {
        Filter::And(vec![
            Filter::eq(DeviceRegistration::ATTR_OWNER, AttributeValue::Null),
            Filter::CreatedBefore(cutoff),
        ])
    }

    /// Every registration of `key_handle` for `rp_id`, across all owners and pending records
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_all_by_key_handle(
        &self,
        rp_id: &str,
        key_handle: &str,
    ) -> Result<Vec<DeviceRegistration>, StoreError> {
        let mut found = self
            .entries
            .find_by_filter(&Self::key_handle_filter(rp_id, key_handle))?;
        found.retain(|registration| registration.key_handle == key_handle);
        Ok(found)
    }

    /// Registration of `key_handle` owned by `owner_user_id` for `rp_id`
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_user_device_by_key_handle(
        &self,
        owner_user_id: &str,
        rp_id: &str,
        key_handle: &str,
    ) -> Result<Option<DeviceRegistration>, StoreError> {
        Ok(self
            .find_all_by_key_handle(rp_id, key_handle)?
            .into_iter()
            .find(|registration| registration.owner_user_id.as_deref() == Some(owner_user_id)))
    }

    /// All registrations of a user for `rp_id`, regardless of status
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_user_devices(
        &self,
        owner_user_id: &str,
        rp_id: &str,
    ) -> Result<Vec<DeviceRegistration>, StoreError> {
        self.entries
            .find_by_filter(&Self::owner_filter(owner_user_id, rp_id))
    }

    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_user_device(
        &self,
        owner_user_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRegistration>, StoreError> {
        Ok(self
            .entries
            .find(device_id)?
            .filter(|registration| registration.owner_user_id.as_deref() == Some(owner_user_id)))
    }

    /// A pending (not yet attached) registration addressed by its own id
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn find_one_step_device(
        &self,
        device_id: &str,
    ) -> Result<Option<DeviceRegistration>, StoreError> {
        Ok(self
            .entries
            .find(device_id)?
            .filter(|registration| registration.owner_user_id.is_none()))
    }

    /// Attach a pending registration to its owner
    ///
    /// # Errors
    ///
    /// - `BadInput` if the device does not exist or is already attached
    /// - `Unknown` if the entry store fails
    pub fn attach_user_device(
        &self,
        owner_user_id: &str,
        device_id: &str,
    ) -> Result<DeviceRegistration, CeremonyError> {
        let pending = self
            .find_one_step_device(device_id)?
            .ok_or_else(|| {
                CeremonyError::BadInput(format!("No pending device registration {device_id}"))
            })?;

        let mut attached = pending;
        attached.owner_user_id = Some(owner_user_id.to_string());
        let guard = Filter::eq(DeviceRegistration::ATTR_OWNER, AttributeValue::Null);
        if !self.entries.merge_if(attached.clone(), &guard)? {
            return Err(CeremonyError::BadInput(format!(
                "Device registration {device_id} is already attached"
            )));
        }

        info!("Attached device registration {device_id} to its owner");
        Ok(attached)
    }

    /// Compare-and-set the counter: writes only while the stored record still has
    /// the snapshot's counter and last access time and the device is active
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn update_counter(
        &self,
        registration: &DeviceRegistration,
        new_counter: u32,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut updated = registration.clone();
        updated.counter = new_counter;
        updated.last_access_time = Some(accessed_at);

        self.entries
            .merge_if(updated, &Self::unchanged_since(registration))
    }

    /// Matches the stored record while it is still active with the snapshot's
    /// counter and last access time
    fn unchanged_since(snapshot: &DeviceRegistration) -> Filter {
        Filter::And(vec![
            Filter::eq(
                DeviceRegistration::ATTR_COUNTER,
                AttributeValue::Int(i64::from(snapshot.counter)),
            ),
            Filter::eq(
                DeviceRegistration::ATTR_LAST_ACCESS,
                snapshot
                    .attribute(DeviceRegistration::ATTR_LAST_ACCESS)
                    .unwrap_or(AttributeValue::Null),
            ),
            Filter::eq_text(
                DeviceRegistration::ATTR_STATUS,
                DeviceStatus::Active.as_str(),
            ),
        ])
    }

    /// Mark a device compromised; it stays stored but can no longer authenticate
    ///
    /// # Errors
    /// Returns an error if the entry store fails or the record keeps changing underneath.
    pub fn mark_compromised(&self, registration: &DeviceRegistration) -> Result<(), StoreError> {
        for _ in 0..MAX_STATUS_ATTEMPTS {
            let Some(mut stored) = self.entries.find(&registration.id)? else {
                return Err(StoreError::NotFound(registration.id.clone()));
            };
            if stored.is_compromised() {
                return Ok(());
            }

            // only the status changes; a concurrent counter update forces a re-read
            let guard = Self::unchanged_since(&stored);
            stored.status = DeviceStatus::Compromised;
            if self.entries.merge_if(stored, &guard)? {
                warn!(
                    "Device registration {} marked compromised",
                    registration.id
                );
                return Ok(());
            }
            debug!(
                "Device registration {} changed while being marked compromised",
                registration.id
            );
        }
        Err(StoreError::Backend(format!(
            "Device registration {} kept changing while being marked compromised",
            registration.id
        )))
    }

    /// Number of registrations for `rp_id`, attached and pending
    ///
    /// # Errors
    /// Returns an error if the entry store fails.
    pub fn get_device_count(&self, rp_id: &str) -> Result<usize, StoreError> {
        self.entries
            .count(&Filter::eq_text(DeviceRegistration::ATTR_APPLICATION_ID, rp_id))
    }

    /// Remove a registration. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// - `ConstraintViolation` if the registration is not deletable
    /// - `Unknown` if the entry store fails
    pub fn remove_device(&self, device_id: &str) -> Result<bool, CeremonyError> {
        let Some(registration) = self.entries.find(device_id)? else {
            return Ok(false);
        };
        if !registration.deletable {
            return Err(CeremonyError::ConstraintViolation(format!(
                "Device registration {device_id} is not deletable"
            )));
        }
        Ok(self.entries.remove(device_id)?.is_some())
    }
}
