use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Key/value store holding stream metadata, chunk logs and active pointers.
///
/// Values are either plain strings or append-only lists. A TTL is fixed when a
/// key is created; later writes do not extend it.
#[async_trait]
pub trait BufferStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replaces a string value. `ttl` of `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Appends to a list, creating it with `ttl` when missing. Returns the new length.
    async fn append(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<u64>;

    /// List entries from `start` (inclusive) to the end.
    async fn range(&self, key: &str, start: usize) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drops expired keys and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local [`BufferStore`]. Expired keys vanish on read and on janitor sweeps.
#[derive(Debug, Default)]
pub struct InMemoryBufferStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryBufferStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task purging expired keys every `interval` until `shutdown` fires.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(removed) => debug!(removed, "purged expired buffer keys"),
                            Err(err) => debug!(error = %err, "buffer purge failed"),
                        }
                    }
                }
            }
        })
    }

    async fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        {
            let guard = self.entries.read().await;
            match guard.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut guard = self.entries.write().await;
        if guard.get(key).is_some_and(|entry| entry.is_expired(now)) {
            guard.remove(key);
            trace!(key, "expired buffer key dropped on read");
        }
        None
    }
}

#[async_trait]
impl BufferStore for InMemoryBufferStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live_entry(key).await.map(|entry| entry.value) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value)),
            Some(StoredValue::List(_)) => bail!("key {key} holds a list"),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut guard = self.entries.write().await;
        guard.insert(key.to_string(), Entry::new(StoredValue::Text(value), ttl));
        trace!(key, "buffer key set");
        Ok(())
    }

    async fn append(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<u64> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;

        let entry = guard
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    *entry = Entry::new(StoredValue::List(Vec::new()), ttl);
                }
            })
            .or_insert_with(|| Entry::new(StoredValue::List(Vec::new()), ttl));

        match &mut entry.value {
            StoredValue::List(items) => {
                items.push(value);
                trace!(key, len = items.len(), "buffer list appended");
                Ok(items.len() as u64)
            }
            StoredValue::Text(_) => bail!("key {key} holds a string"),
        }
    }

    async fn range(&self, key: &str, start: usize) -> Result<Vec<String>> {
        match self.live_entry(key).await.map(|entry| entry.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(items)) => Ok(items.into_iter().skip(start).collect()),
            Some(StoredValue::Text(_)) => bail!("key {key} holds a string"),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut guard = self.entries.write().await;
        Ok(guard.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        Ok(before - guard.len())
    }
}
