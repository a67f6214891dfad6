//! Mock objects and fake implementations for testing
//!
//! Prompts, selectors, credential safes and entry stores with scripted
//! behaviour, for exercising failure and cancellation paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::authenticator::{
    CredentialSafe, CredentialSelector, CredentialSource, SigningHandle, VerificationPrompt,
};
use crate::errors::{Cancelled, SafeError, StoreError};
use crate::store::{Entry, EntryStore, Filter, MemoryEntryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptBehaviour {
    Approve,
    Cancel,
    Hang,
    WrongKey,
}

/// Verification prompt with a fixed answer that counts how often it was shown
pub struct MockVerificationPrompt {
    behaviour: PromptBehaviour,
    calls: Arc<AtomicUsize>,
}

impl MockVerificationPrompt {
    fn with(behaviour: PromptBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// User unlocks the requested key
    #[must_use]
    pub fn approve() -> Self {
        Self::with(PromptBehaviour::Approve)
    }

    /// User declines
    #[must_use]
    pub fn cancel() -> Self {
        Self::with(PromptBehaviour::Cancel)
    }

    /// User never answers
    #[must_use]
    pub fn hang() -> Self {
        Self::with(PromptBehaviour::Hang)
    }

    /// Prompt returns a handle for some other key
    #[must_use]
    pub fn wrong_key() -> Self {
        Self::with(PromptBehaviour::WrongKey)
    }

    /// Shared call counter, readable after the prompt has been moved
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl VerificationPrompt for MockVerificationPrompt {
    async fn request(&self, credential: &CredentialSource) -> Result<SigningHandle, Cancelled> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            PromptBehaviour::Approve => Ok(SigningHandle::for_credential(credential)),
            PromptBehaviour::Cancel => Err(Cancelled),
            PromptBehaviour::Hang => std::future::pending().await,
            PromptBehaviour::WrongKey => Ok(SigningHandle::new("some-other-key")),
        }
    }
}

/// Always picks the first candidate
pub struct FirstCredentialSelector;

impl CredentialSelector for FirstCredentialSelector {
    fn select_from(&self, credentials: &[CredentialSource]) -> Option<CredentialSource> {
        credentials.first().cloned()
    }
}

/// User dismisses the account chooser
pub struct DecliningSelector;

impl CredentialSelector for DecliningSelector {
    fn select_from(&self, _credentials: &[CredentialSource]) -> Option<CredentialSource> {
        None
    }
}

/// Credential safe whose every key operation fails
pub struct FailingCredentialSafe;

impl CredentialSafe for FailingCredentialSafe {
    fn generate_credential(
        &self,
        _rp_id: &str,
        _user_id: &[u8],
        _user_name: &str,
    ) -> Result<CredentialSource, SafeError> {
        Err(SafeError::KeyGeneration("keystore unavailable".to_string()))
    }

    fn public_key(&self, key_pair_alias: &str) -> Result<Vec<u8>, SafeError> {
        Err(SafeError::UnknownAlias(key_pair_alias.to_string()))
    }

    fn sign(
        &self,
        _key_pair_alias: &str,
        _handle: Option<&SigningHandle>,
        _data: &[u8],
    ) -> Result<Vec<u8>, SafeError> {
        Err(SafeError::Signing("keystore unavailable".to_string()))
    }

    fn supports_user_verification(&self) -> bool {
        false
    }

    fn key_requires_verification(&self, _key_pair_alias: &str) -> bool {
        false
    }

    fn delete_credential(&self, _credential: &CredentialSource) -> Result<(), SafeError> {
        Ok(())
    }

    fn find_credential(&self, _rp_id: &str, _credential_id: &[u8]) -> Option<CredentialSource> {
        None
    }

    fn credentials_for_rp(&self, _rp_id: &str) -> Vec<CredentialSource> {
        Vec::new()
    }

    fn increment_use_counter(&self, _credential: &CredentialSource) -> Result<u32, SafeError> {
        Err(SafeError::Counter("keystore unavailable".to_string()))
    }
}

/// Entry store whose backend is down
pub struct FailingEntryStore;

fn backend_down() -> StoreError {
    StoreError::Backend("backend unavailable".to_string())
}

impl<E: Entry> EntryStore<E> for FailingEntryStore {
    fn find(&self, _id: &str) -> Result<Option<E>, StoreError> {
        Err(backend_down())
    }

    fn find_by_filter(&self, _filter: &Filter) -> Result<Vec<E>, StoreError> {
        Err(backend_down())
    }

    fn persist(&self, _entry: E) -> Result<(), StoreError> {
        Err(backend_down())
    }

    fn persist_unless(&self, _entry: E, _conflict: &Filter) -> Result<bool, StoreError> {
        Err(backend_down())
    }

    fn merge(&self, _entry: E) -> Result<(), StoreError> {
        Err(backend_down())
    }

    fn merge_if(&self, _entry: E, _guard: &Filter) -> Result<bool, StoreError> {
        Err(backend_down())
    }

    fn remove(&self, _id: &str) -> Result<Option<E>, StoreError> {
        Err(backend_down())
    }

    fn remove_if(&self, _id: &str, _guard: &Filter) -> Result<Option<E>, StoreError> {
        Err(backend_down())
    }

    fn count(&self, _filter: &Filter) -> Result<usize, StoreError> {
        Err(backend_down())
    }

    fn scan(
        &self,
        _filter: &Filter,
        _batch_size: usize,
        _chunk_size: usize,
    ) -> Result<Vec<Vec<E>>, StoreError> {
        Err(backend_down())
    }
}

/// In-memory store that refuses to remove a fixed set of ids
pub struct FlakyEntryStore<E: Entry> {
    inner: MemoryEntryStore<E>,
    stuck: HashSet<String>,
}

impl<E: Entry> FlakyEntryStore<E> {
    #[must_use]
    pub fn failing_removals_of(ids: &[&str]) -> Self {
        Self {
            inner: MemoryEntryStore::new(),
            stuck: ids.iter().map(ToString::to_string).collect(),
        }
    }
}

impl<E: Entry> EntryStore<E> for FlakyEntryStore<E> {
    fn find(&self, id: &str) -> Result<Option<E>, StoreError> {
        self.inner.find(id)
    }

    fn find_by_filter(&self, filter: &Filter) -> Result<Vec<E>, StoreError> {
        self.inner.find_by_filter(filter)
    }

    fn persist(&self, entry: E) -> Result<(), StoreError> {
        self.inner.persist(entry)
    }

    fn persist_unless(&self, entry: E, conflict: &Filter) -> Result<bool, StoreError> {
        self.inner.persist_unless(entry, conflict)
    }

    fn merge(&self, entry: E) -> Result<(), StoreError> {
        self.inner.merge(entry)
    }

    fn merge_if(&self, entry: E, guard: &Filter) -> Result<bool, StoreError> {
        self.inner.merge_if(entry, guard)
    }

    fn remove(&self, id: &str) -> Result<Option<E>, StoreError> {
        if self.stuck.contains(id) {
            return Err(StoreError::Backend(format!("transient failure removing {id}")));
        }
        self.inner.remove(id)
    }

    fn remove_if(&self, id: &str, guard: &Filter) -> Result<Option<E>, StoreError> {
        if self.stuck.contains(id) {
            return Err(StoreError::Backend(format!("transient failure removing {id}")));
        }
        self.inner.remove_if(id, guard)
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.inner.count(filter)
    }

    fn scan(
        &self,
        filter: &Filter,
        batch_size: usize,
        chunk_size: usize,
    ) -> Result<Vec<Vec<E>>, StoreError> {
        self.inner.scan(filter, batch_size, chunk_size)
    }
}

/// In-memory store whose filtered lookups stall, widening any window between a
/// caller's read and its write
pub struct SlowLookupEntryStore<E: Entry> {
    inner: MemoryEntryStore<E>,
    delay: Duration,
}

impl<E: Entry> SlowLookupEntryStore<E> {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryEntryStore::new(),
            delay,
        }
    }
}

impl<E: Entry> EntryStore<E> for SlowLookupEntryStore<E> {
    fn find(&self, id: &str) -> Result<Option<E>, StoreError> {
        self.inner.find(id)
    }

    fn find_by_filter(&self, filter: &Filter) -> Result<Vec<E>, StoreError> {
        let found = self.inner.find_by_filter(filter);
        std::thread::sleep(self.delay);
        found
    }

    fn persist(&self, entry: E) -> Result<(), StoreError> {
        self.inner.persist(entry)
    }

    fn persist_unless(&self, entry: E, conflict: &Filter) -> Result<bool, StoreError> {
        self.inner.persist_unless(entry, conflict)
    }

    fn merge(&self, entry: E) -> Result<(), StoreError> {
        self.inner.merge(entry)
    }

    fn merge_if(&self, entry: E, guard: &Filter) -> Result<bool, StoreError> {
        self.inner.merge_if(entry, guard)
    }

    fn remove(&self, id: &str) -> Result<Option<E>, StoreError> {
        self.inner.remove(id)
    }

    fn remove_if(&self, id: &str, guard: &Filter) -> Result<Option<E>, StoreError> {
        self.inner.remove_if(id, guard)
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.inner.count(filter)
    }

    fn scan(
        &self,
        filter: &Filter,
        batch_size: usize,
        chunk_size: usize,
    ) -> Result<Vec<Vec<E>>, StoreError> {
        self.inner.scan(filter, batch_size, chunk_size)
    }
}
