//! Output cache storage.
//!
//! [`OutputCacheStore`] is the contract every backing store fulfils: keyed values
//! with an absolute expiration and an optional single dependency on another key.
//! [`MemoryStore`] is the built-in concurrent implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use metrics::gauge;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::registry::DependencyIndex;

const METRIC_ENTRIES: &str = "output_cache_entries";

/// Value held under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Placeholder used for base keys.
    Empty,
    Text(String),
    Bytes(Bytes),
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for CacheValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("output cache store operation `{op}` failed: {message}")]
    Operation { op: &'static str, message: String },
}

impl StoreError {
    pub fn operation(op: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            op,
            message: message.into(),
        }
    }
}

/// One key/value pair written as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub key: String,
    pub value: CacheValue,
}

impl CacheRecord {
    pub fn new(key: impl Into<String>, value: impl Into<CacheValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Synchronous store contract.
///
/// Removing a key also removes every key that was added with it as `depends_on`.
pub trait OutputCacheStore: Send + Sync {
    fn contains(&self, key: &str) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError>;

    /// Store `value` until `expiration`.
    ///
    /// When `depends_on` names a key that is not present the value is dropped.
    fn add(
        &self,
        key: &str,
        value: CacheValue,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` together with everything tagged as depending on it.
    ///
    /// Stores without dependency tracking may approximate this with a literal
    /// prefix match on `key`.
    fn remove_starts_with(&self, key: &str) -> Result<(), StoreError>;

    fn all_keys(&self) -> Result<Vec<String>, StoreError>;

    fn find_keys_starting_with(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .all_keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    /// Add records in order, sharing one expiration and dependency.
    fn add_all(
        &self,
        records: Vec<CacheRecord>,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError> {
        for record in records {
            self.add(&record.key, record.value, expiration, depends_on)?;
        }
        Ok(())
    }
}

/// Asynchronous store contract, used by the interceptor.
///
/// Every [`OutputCacheStore`] is an `AsyncOutputCacheStore`.
#[async_trait]
pub trait AsyncOutputCacheStore: Send + Sync {
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError>;

    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn remove_starts_with(&self, key: &str) -> Result<(), StoreError>;

    async fn all_keys(&self) -> Result<Vec<String>, StoreError>;

    async fn find_keys_starting_with(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn add_all(
        &self,
        records: Vec<CacheRecord>,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError> {
        for record in records {
            self.add(&record.key, record.value, expiration, depends_on)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> AsyncOutputCacheStore for T
where
    T: OutputCacheStore + ?Sized,
{
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        OutputCacheStore::contains(self, key)
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        OutputCacheStore::get(self, key)
    }

    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError> {
        OutputCacheStore::add(self, key, value, expiration, depends_on)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        OutputCacheStore::remove(self, key)
    }

    async fn remove_starts_with(&self, key: &str) -> Result<(), StoreError> {
        OutputCacheStore::remove_starts_with(self, key)
    }

    async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
        OutputCacheStore::all_keys(self)
    }

    async fn find_keys_starting_with(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        OutputCacheStore::find_keys_starting_with(self, prefix)
    }

    async fn add_all(
        &self,
        records: Vec<CacheRecord>,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError> {
        OutputCacheStore::add_all(self, records, expiration, depends_on)
    }
}

struct StoredItem {
    value: CacheValue,
    expires_at: OffsetDateTime,
}

impl StoredItem {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// In-memory store backed by a sharded map.
///
/// Expired entries are dropped lazily on access and in bulk by
/// [`MemoryStore::purge_expired`].
#[derive(Default)]
pub struct MemoryStore {
    items: DashMap<String, StoredItem>,
    index: DependencyIndex,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every expired entry together with its dependents.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let expired: Vec<String> = self
            .items
            .iter()
            .filter(|entry| !entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();

        let removed: usize = expired.iter().map(|key| self.evict(key)).sum();
        gauge!(METRIC_ENTRIES).set(self.items.len() as f64);
        if removed > 0 {
            debug!(cache = "output", removed, "purged expired entries");
        }
        removed
    }

    fn live(&self, key: &str, now: OffsetDateTime) -> Option<CacheValue> {
        let expired = match self.items.get(key) {
            Some(item) if item.is_live(now) => return Some(item.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.evict(key);
        }
        None
    }

    /// Remove `key` and, transitively, everything depending on it.
    fn evict(&self, key: &str) -> usize {
        let mut removed = 0;
        let mut pending = vec![key.to_string()];
        let mut seen = HashSet::new();

        while let Some(next) = pending.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let dependents = self.index.unlink(&next, || {
                if self.items.remove(&next).is_some() {
                    removed += 1;
                }
            });
            pending.extend(dependents);
        }
        removed
    }
}

impl OutputCacheStore for MemoryStore {
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key, OffsetDateTime::now_utc()).is_some())
    }

    fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        Ok(self.live(key, OffsetDateTime::now_utc()))
    }

    fn add(
        &self,
        key: &str,
        value: CacheValue,
        expiration: OffsetDateTime,
        depends_on: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        if expiration <= now {
            return Ok(());
        }

        let item = StoredItem {
            value,
            expires_at: expiration,
        };
        let insert = || {
            self.items.insert(key.to_string(), item);
        };

        match depends_on {
            Some(base) if base != key => {
                let base_is_live = || {
                    self.items
                        .get(base)
                        .is_some_and(|stored| stored.is_live(now))
                };
                if !self.index.attach(key, base, base_is_live, insert) {
                    debug!(cache = "output", key, base, "dependency missing, skipping add");
                }
            }
            _ => self.index.detach(key, insert),
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.evict(key);
        Ok(())
    }

    fn remove_starts_with(&self, key: &str) -> Result<(), StoreError> {
        self.evict(key);
        Ok(())
    }

    fn all_keys(&self) -> Result<Vec<String>, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .items
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use time::Duration;

    use super::{CacheRecord, CacheValue, MemoryStore, OutputCacheStore};

    fn in_a_minute() -> time::OffsetDateTime {
        time::OffsetDateTime::now_utc() + Duration::minutes(1)
    }

    #[test]
    fn add_get_remove() {
        let store = MemoryStore::new();
        store
            .add("k", CacheValue::Text("v".into()), in_a_minute(), None)
            .expect("add");

        assert!(store.contains("k").expect("contains"));
        assert_eq!(
            store.get("k").expect("get"),
            Some(CacheValue::Text("v".into()))
        );

        store.remove("k").expect("remove");
        assert!(!store.contains("k").expect("contains"));
        assert!(store.is_empty());
    }

    #[test]
    fn add_overwrites_existing_value() {
        let store = MemoryStore::new();
        store
            .add("k", CacheValue::Text("first".into()), in_a_minute(), None)
            .expect("add");
        store
            .add("k", CacheValue::Text("second".into()), in_a_minute(), None)
            .expect("add");

        assert_eq!(
            store.get("k").expect("get"),
            Some(CacheValue::Text("second".into()))
        );
    }

    #[test]
    fn removing_base_removes_dependents() {
        let store = MemoryStore::new();
        let expiration = in_a_minute();
        store
            .add("teams-get", CacheValue::Empty, expiration, None)
            .expect("base");
        store
            .add_all(
                vec![
                    CacheRecord::new("teams-get-1:application/json", bytes::Bytes::from("{}")),
                    CacheRecord::new(
                        "teams-get-1:application/json:response-ct",
                        "application/json".to_string(),
                    ),
                ],
                expiration,
                Some("teams-get"),
            )
            .expect("dependents");
        store
            .add("other", CacheValue::Empty, expiration, None)
            .expect("unrelated");

        store.remove("teams-get").expect("remove base");

        assert!(!store.contains("teams-get-1:application/json").expect("contains"));
        assert!(
            !store
                .contains("teams-get-1:application/json:response-ct")
                .expect("contains")
        );
        assert!(store.contains("other").expect("contains"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn dependent_is_dropped_when_base_missing() {
        let store = MemoryStore::new();
        store
            .add("k", CacheValue::Empty, in_a_minute(), Some("missing-base"))
            .expect("add");
        assert!(!store.contains("k").expect("contains"));
    }

    #[test]
    fn expired_entries_are_invisible_and_purged() {
        let store = MemoryStore::new();
        let past = time::OffsetDateTime::now_utc() - Duration::seconds(1);
        store
            .add("stale", CacheValue::Empty, past, None)
            .expect("add");
        assert!(!store.contains("stale").expect("contains"));
        assert!(store.is_empty());

        store
            .add(
                "short",
                CacheValue::Empty,
                time::OffsetDateTime::now_utc() + Duration::milliseconds(20),
                None,
            )
            .expect("add");
        std::thread::sleep(std::time::Duration::from_millis(40));
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn remove_starts_with_removes_named_key_and_dependents_only() {
        let store = MemoryStore::new();
        let expiration = in_a_minute();
        for base in ["teams-get", "teams-getbyid"] {
            store
                .add(base, CacheValue::Empty, expiration, None)
                .expect("base");
            store
                .add(
                    &format!("{base}:application/json"),
                    CacheValue::Empty,
                    expiration,
                    Some(base),
                )
                .expect("dependent");
        }

        store.remove_starts_with("teams-get").expect("remove base");

        let mut keys = store.all_keys().expect("keys");
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "teams-getbyid".to_string(),
                "teams-getbyid:application/json".to_string()
            ]
        );
    }

    #[test]
    fn dependent_added_while_base_is_removed_never_outlives_it() {
        let store = Arc::new(MemoryStore::new());
        let expiration = in_a_minute();

        for round in 0..500 {
            let dependent = format!("base-{round}:application/json");
            store
                .add("base", CacheValue::Empty, expiration, None)
                .expect("base");
            let barrier = Barrier::new(2);

            thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    store
                        .add(&dependent, CacheValue::Empty, expiration, Some("base"))
                        .expect("dependent");
                });
                scope.spawn(|| {
                    barrier.wait();
                    store.remove("base").expect("remove base");
                });
            });

            assert!(!store.contains("base").expect("contains"));
            assert!(
                !store.contains(&dependent).expect("contains"),
                "{dependent} survived removal of its base"
            );
        }
        assert!(store.is_empty());
    }

    #[test]
    fn find_keys_starting_with_filters_all_keys() {
        let store = MemoryStore::new();
        let expiration = in_a_minute();
        for key in ["a-1", "a-2", "b-1"] {
            store
                .add(key, CacheValue::Empty, expiration, None)
                .expect("add");
        }

        let mut found = store.find_keys_starting_with("a-").expect("find");
        found.sort();
        assert_eq!(found, vec!["a-1".to_string(), "a-2".to_string()]);
    }

    #[test]
    fn remove_missing_key_is_a_no_op() {
        let store = MemoryStore::new();
        store.remove("nothing").expect("remove");
        store.remove_starts_with("nothing").expect("remove prefix");
    }

    #[tokio::test]
    async fn sync_store_is_usable_through_async_contract() {
        use super::AsyncOutputCacheStore;

        let store: Arc<dyn AsyncOutputCacheStore> = Arc::new(MemoryStore::new());
        store
            .add("k", CacheValue::Text("v".into()), in_a_minute(), None)
            .await
            .expect("add");

        assert!(store.contains("k").await.expect("contains"));
        assert_eq!(
            store.find_keys_starting_with("k").await.expect("find"),
            vec!["k".to_string()]
        );
    }
}
