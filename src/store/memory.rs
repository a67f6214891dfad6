//! In-memory entry store
//!
//! Every operation takes the map lock once, so the conditional writes are
//! atomic against each other.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Entry, EntryStore, Filter};
use crate::errors::StoreError;

pub struct MemoryEntryStore<E: Entry> {
    entries: RwLock<HashMap<String, E>>,
}

impl<E: Entry> Default for MemoryEntryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entry> MemoryEntryStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries
    ///
    /// # Errors
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().map_err(|_| StoreError::Poisoned)?.len())
    }

    /// # Errors
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl<E: Entry> std::fmt::Debug for MemoryEntryStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEntryStore")
            .field("entries", &self.entries.read().map(|e| e.len()).unwrap_or(0))
            .finish()
    }
}

impl<E: Entry> EntryStore<E> for MemoryEntryStore<E> {
    fn find(&self, id: &str) -> Result<Option<E>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(id).cloned())
    }

    fn find_by_filter(&self, filter: &Filter) -> Result<Vec<E>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<E> = entries
            .values()
            .filter(|entry| filter.matches(*entry))
            .cloned()
            .collect();
        found.sort_by_key(|entry| entry.created_at());
        Ok(found)
    }

    fn persist(&self, entry: E) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if entries.contains_key(entry.id()) {
            return Err(StoreError::Backend(format!(
                "Entry {} already exists",
                entry.id()
            )));
        }
        entries.insert(entry.id().to_string(), entry);
        Ok(())
    }

    fn persist_unless(&self, entry: E, conflict: &Filter) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if entries.contains_key(entry.id()) {
            return Err(StoreError::Backend(format!(
                "Entry {} already exists",
                entry.id()
            )));
        }
        if entries.values().any(|stored| conflict.matches(stored)) {
            return Ok(false);
        }
        entries.insert(entry.id().to_string(), entry);
        Ok(true)
    }

    fn merge(&self, entry: E) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let slot = entries
            .get_mut(entry.id())
            .ok_or_else(|| StoreError::NotFound(entry.id().to_string()))?;
        *slot = entry;
        Ok(())
    }

    fn merge_if(&self, entry: E, guard: &Filter) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let slot = entries
            .get_mut(entry.id())
            .ok_or_else(|| StoreError::NotFound(entry.id().to_string()))?;
        if !guard.matches(&*slot) {
            return Ok(false);
        }
        *slot = entry;
        Ok(true)
    }

    fn remove(&self, id: &str) -> Result<Option<E>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.remove(id))
    }

    fn remove_if(&self, id: &str, guard: &Filter) -> Result<Option<E>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if !entries.get(id).is_some_and(|stored| guard.matches(stored)) {
            return Ok(None);
        }
        Ok(entries.remove(id))
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.values().filter(|entry| filter.matches(*entry)).count())
    }

    fn scan(
        &self,
        filter: &Filter,
        batch_size: usize,
        chunk_size: usize,
    ) -> Result<Vec<Vec<E>>, StoreError> {
        if chunk_size == 0 {
            return Err(StoreError::Backend("Chunk size must be positive".to_string()));
        }
        let mut matching = self.find_by_filter(filter)?;
        matching.truncate(batch_size);
        Ok(matching
            .chunks(chunk_size)
            .map(<[E]>::to_vec)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AttributeValue;
    use chrono::{DateTime, Duration, Utc};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        tag: String,
        version: i64,
        created_at: DateTime<Utc>,
    }

    impl Entry for Note {
        fn id(&self) -> &str {
            &self.id
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }

        fn attribute(&self, name: &str) -> Option<AttributeValue> {
            match name {
                "tag" => Some(AttributeValue::text(&self.tag)),
                "version" => Some(AttributeValue::Int(self.version)),
                _ => None,
            }
        }
    }

    fn note(id: &str, tag: &str, age_minutes: i64) -> Note {
        Note {
            id: id.to_string(),
            tag: tag.to_string(),
            version: 0,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn test_persist_rejects_duplicate_id() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        store.persist(note("a", "x", 0)).unwrap();
        assert!(store.persist(note("a", "y", 0)).is_err());
        assert_eq!(store.find("a").unwrap().unwrap().tag, "x");
    }

    #[test]
    fn test_filters() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        store.persist(note("old-x", "x", 30)).unwrap();
        store.persist(note("new-x", "x", 1)).unwrap();
        store.persist(note("old-y", "y", 30)).unwrap();

        let cutoff = Utc::now() - Duration::minutes(10);
        let old_x = Filter::And(vec![Filter::eq_text("tag", "x"), Filter::CreatedBefore(cutoff)]);
        let found = store.find_by_filter(&old_x).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "old-x");

        let not_x = Filter::Not(Box::new(Filter::eq_text("tag", "x")));
        assert_eq!(store.count(&not_x).unwrap(), 1);
        assert_eq!(store.count(&Filter::All).unwrap(), 3);
    }

    #[test]
    fn test_merge_if_is_compare_and_set() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        store.persist(note("a", "x", 0)).unwrap();

        let mut updated = store.find("a").unwrap().unwrap();
        updated.version = 1;
        let guard = Filter::eq("version", AttributeValue::Int(0));
        assert!(store.merge_if(updated.clone(), &guard).unwrap());

        // same guard now fails: the stored version moved on
        let mut stale = updated;
        stale.version = 2;
        assert!(!store.merge_if(stale, &guard).unwrap());
        assert_eq!(store.find("a").unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_persist_unless_skips_conflicting_entry() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        let tagged_x = Filter::eq_text("tag", "x");

        assert!(store.persist_unless(note("a", "x", 0), &tagged_x).unwrap());
        assert!(!store.persist_unless(note("b", "x", 0), &tagged_x).unwrap());
        assert!(store.find("b").unwrap().is_none());
        assert!(store
            .persist_unless(note("c", "y", 0), &Filter::eq_text("tag", "y"))
            .unwrap());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_remove_if_leaves_non_matching_entry() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        store.persist(note("a", "x", 0)).unwrap();

        assert!(store.remove_if("a", &Filter::eq_text("tag", "y")).unwrap().is_none());
        assert!(store.find("a").unwrap().is_some());
        assert!(store.remove_if("a", &Filter::eq_text("tag", "x")).unwrap().is_some());
        assert!(store.remove_if("a", &Filter::All).unwrap().is_none());
    }

    #[test]
    fn test_merge_missing_entry_is_not_found() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        assert!(matches!(
            store.merge(note("ghost", "x", 0)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        store.persist(note("a", "x", 0)).unwrap();
        assert!(store.remove("a").unwrap().is_some());
        assert!(store.remove("a").unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_scan_bounds_batch_and_chunks() {
        let store: MemoryEntryStore<Note> = MemoryEntryStore::new();
        for i in 0..25 {
            store.persist(note(&format!("n{i}"), "x", 100 - i)).unwrap();
        }

        let chunks = store.scan(&Filter::All, 20, 7).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![7, 7, 6]);
        // oldest first
        assert_eq!(chunks[0][0].id, "n0");
    }
}
