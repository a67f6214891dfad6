//! Storage layer
//!
//! [`EntryStore`] is the seam to a concrete backend (directory, SQL or
//! document store). [`MemoryEntryStore`] is the in-process adapter. The
//! challenge and device stores build the protocol's lookups on top of it.

pub mod challenge;
pub mod device;
pub mod memory;

pub use challenge::ChallengeStore;
pub use device::{encoded_key_handle_hash, key_handle_hash, DeviceRegistrationStore};
pub use memory::MemoryEntryStore;

use chrono::{DateTime, Utc};

use crate::errors::StoreError;

/// Value of an indexed attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl AttributeValue {
    #[must_use]
    pub fn text(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

/// A record the entry store can hold
pub trait Entry: Clone + Send + Sync {
    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    /// Value of an indexed attribute, `None` if the entry has no such attribute
    fn attribute(&self, name: &str) -> Option<AttributeValue>;
}

/// Predicate over entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Equals(String, AttributeValue),
    /// `created_at <= t`
    CreatedBefore(DateTime<Utc>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    #[must_use]
    pub fn eq(attribute: &str, value: AttributeValue) -> Self {
        Filter::Equals(attribute.to_string(), value)
    }

    #[must_use]
    pub fn eq_text(attribute: &str, value: &str) -> Self {
        Self::eq(attribute, AttributeValue::text(value))
    }

    #[must_use]
    pub fn matches<E: Entry>(&self, entry: &E) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals(name, value) => entry.attribute(name).as_ref() == Some(value),
            Filter::CreatedBefore(cutoff) => entry.created_at() <= *cutoff,
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
        }
    }
}

/// Generic record store
///
/// `persist_unless`, `merge_if`, `remove` and `remove_if` must be atomic with
/// respect to each other.
pub trait EntryStore<E: Entry>: Send + Sync {
    /// # Errors
    /// Returns an error if the backend fails.
    fn find(&self, id: &str) -> Result<Option<E>, StoreError>;

    /// # Errors
    /// Returns an error if the backend fails.
    fn find_by_filter(&self, filter: &Filter) -> Result<Vec<E>, StoreError>;

    /// Insert a new entry
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if an entry with the same id exists.
    fn persist(&self, entry: E) -> Result<(), StoreError>;

    /// Insert a new entry unless some stored entry matches `conflict`.
    /// Returns `false` without writing when one does.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if an entry with the same id exists.
    fn persist_unless(&self, entry: E, conflict: &Filter) -> Result<bool, StoreError>;

    /// Replace an existing entry
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the entry does not exist.
    fn merge(&self, entry: E) -> Result<(), StoreError>;

    /// Replace an existing entry only while the stored version matches `guard`.
    /// Returns `false` without writing when it does not.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the entry does not exist.
    fn merge_if(&self, entry: E, guard: &Filter) -> Result<bool, StoreError>;

    /// Remove and return an entry; removing a missing id returns `None`
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn remove(&self, id: &str) -> Result<Option<E>, StoreError>;

    /// Remove and return an entry only while it matches `guard`; a missing or
    /// non-matching entry is left alone and yields `None`
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn remove_if(&self, id: &str, guard: &Filter) -> Result<Option<E>, StoreError>;

    /// # Errors
    /// Returns an error if the backend fails.
    fn count(&self, filter: &Filter) -> Result<usize, StoreError>;

    /// Up to `batch_size` matching entries, oldest first, split into chunks of
    /// at most `chunk_size`
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    fn scan(
        &self,
        filter: &Filter,
        batch_size: usize,
        chunk_size: usize,
    ) -> Result<Vec<Vec<E>>, StoreError>;
}
