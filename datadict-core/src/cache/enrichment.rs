//! Two-level memoization map for enrichment responses.
//!
//! Each prompt key maps to a shared [`OnceCell`]. Concurrent lookups for
//! the same key await the same initialization, so one external call serves
//! all of them. A failed initialization leaves the cell empty and the next
//! caller retries.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::Result;

type Cell = Arc<OnceCell<String>>;
type Partition = Arc<DashMap<String, Cell>>;

/// connectionKey → promptKey → response
#[derive(Clone, Default)]
pub struct EnrichmentCache {
    partitions: Arc<DashMap<String, Partition>>,
}

impl std::fmt::Debug for EnrichmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentCache")
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl EnrichmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle bound to one connection key; its partition is created on first write
    pub fn scope(&self, connection_key: impl Into<String>) -> EnrichmentScope {
        EnrichmentScope {
            cache: self.clone(),
            connection_key: Arc::from(connection_key.into()),
            creates_partition: true,
        }
    }

    /// Handle that only writes into a partition opened with
    /// [`EnrichmentCache::open_partition`].
    ///
    /// Once that partition is removed, writes through the handle are
    /// dropped and lookups are computed without being memoized.
    pub fn bound_scope(&self, connection_key: impl Into<String>) -> EnrichmentScope {
        EnrichmentScope {
            cache: self.clone(),
            connection_key: Arc::from(connection_key.into()),
            creates_partition: false,
        }
    }

    /// Creates the (empty) partition for a connection key if it is missing
    pub fn open_partition(&self, connection_key: &str) {
        self.partitions
            .entry(connection_key.to_string())
            .or_default();
    }

    fn partition(&self, connection_key: &str, create: bool) -> Option<Partition> {
        if let Some(partition) = self.partitions.get(connection_key) {
            return Some(Arc::clone(&partition));
        }
        if !create {
            return None;
        }
        Some(Arc::clone(
            &self
                .partitions
                .entry(connection_key.to_string())
                .or_default(),
        ))
    }

    fn cell(&self, connection_key: &str, prompt_key: &str, create: bool) -> Option<Cell> {
        let partition = self.partition(connection_key, create)?;
        if let Some(cell) = partition.get(prompt_key) {
            return Some(Arc::clone(&cell));
        }
        let cell = Arc::clone(&partition.entry(prompt_key.to_string()).or_default());
        Some(cell)
    }

    /// Memoized value, if one has been computed
    pub fn get(&self, connection_key: &str, prompt_key: &str) -> Option<String> {
        let partition = self.partitions.get(connection_key)?;
        let cell = partition.get(prompt_key)?;
        cell.get().cloned()
    }

    /// Sets or replaces a value
    pub fn insert(&self, connection_key: &str, prompt_key: &str, value: String) {
        self.insert_inner(connection_key, prompt_key, value, true);
    }

    fn insert_inner(&self, connection_key: &str, prompt_key: &str, value: String, create: bool) {
        if let Some(partition) = self.partition(connection_key, create) {
            partition.insert(
                prompt_key.to_string(),
                Arc::new(OnceCell::new_with(Some(value))),
            );
        }
    }

    /// Returns the memoized value or runs `init` once to produce it.
    ///
    /// Concurrent callers with the same keys share a single `init` run.
    ///
    /// # Errors
    /// Propagates the error from `init`; nothing is stored in that case.
    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        connection_key: &str,
        prompt_key: &str,
        init: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.get_or_try_insert_inner(connection_key, prompt_key, init, true)
            .await
    }

    async fn get_or_try_insert_inner<F, Fut>(
        &self,
        connection_key: &str,
        prompt_key: &str,
        init: F,
        create: bool,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        // No map guard may be held across the await below.
        match self.cell(connection_key, prompt_key, create) {
            Some(cell) => cell.get_or_try_init(init).await.cloned(),
            None => init().await,
        }
    }

    /// Drops every memoized value for one connection key
    pub fn remove_partition(&self, connection_key: &str) -> bool {
        self.partitions.remove(connection_key).is_some()
    }

    /// Number of prompt keys held for one connection key
    pub fn partition_len(&self, connection_key: &str) -> usize {
        self.partitions
            .get(connection_key)
            .map_or(0, |partition| partition.len())
    }

    pub fn clear(&self) {
        self.partitions.clear();
    }
}

/// [`EnrichmentCache`] bound to one session's connection key
#[derive(Clone)]
pub struct EnrichmentScope {
    cache: EnrichmentCache,
    connection_key: Arc<str>,
    creates_partition: bool,
}

impl std::fmt::Debug for EnrichmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentScope")
            .field("entries", &self.cache.partition_len(&self.connection_key))
            .finish()
    }
}

impl EnrichmentScope {
    /// Scope over a private cache, for one-off runs with no session
    pub fn ephemeral() -> Self {
        EnrichmentCache::new().scope("ephemeral")
    }

    pub fn connection_key(&self) -> &str {
        &self.connection_key
    }

    pub fn get(&self, prompt_key: &str) -> Option<String> {
        self.cache.get(&self.connection_key, prompt_key)
    }

    pub fn insert(&self, prompt_key: &str, value: String) {
        self.cache
            .insert_inner(&self.connection_key, prompt_key, value, self.creates_partition);
    }

    pub fn len(&self) -> usize {
        self.cache.partition_len(&self.connection_key)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// See [`EnrichmentCache::get_or_try_insert_with`]
    pub async fn get_or_try_insert_with<F, Fut>(&self, prompt_key: &str, init: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.cache
            .get_or_try_insert_inner(&self.connection_key, prompt_key, init, self.creates_partition)
            .await
    }
}
