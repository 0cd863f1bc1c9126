//! Token-addressed credential store with a fixed TTL.
//!
//! Entries live in a sharded [`DashMap`], so lookups and removals for
//! unrelated tokens never contend on one lock. Expirations are also pushed
//! onto a min-heap; `store` pops only the entries that are due instead of
//! scanning the whole map.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{CacheConfig, EnrichmentCache, EnrichmentScope};
use crate::error::{DataDictError, Result};
use crate::models::BackendKind;
use crate::resolver::ConnectionSpec;

/// Random bytes behind each token
const TOKEN_BYTES: usize = 32;

/// A stored connection target and its absolute expiry
#[derive(Debug, Clone)]
pub struct CachedCredential {
    pub token: String,
    pub backend: BackendKind,
    pub spec: ConnectionSpec,
    pub expires_at: Instant,
}

impl CachedCredential {
    /// Live strictly before `expires_at`
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Generates an unpredictable URL-safe token from the thread-local CSPRNG
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

struct Inner {
    ttl: Duration,
    entries: DashMap<String, CachedCredential>,
    expirations: Mutex<BinaryHeap<Reverse<(Instant, String)>>>,
    enrichment: EnrichmentCache,
}

/// Process-wide credential cache. Cloning shares the same store.
///
/// # Example
/// ```rust
/// use datadict_core::cache::CredentialCache;
/// use datadict_core::models::BackendKind;
/// use datadict_core::resolver::{ConnectionRequest, resolve};
///
/// let cache = CredentialCache::new();
/// let spec = resolve(BackendKind::Redis, &ConnectionRequest::new("cache")).unwrap();
///
/// let token = cache.store(BackendKind::Redis, spec);
/// assert!(cache.has(&token));
///
/// cache.remove(&token);
/// assert!(!cache.has(&token));
/// ```
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl CredentialCache {
    /// Creates a cache with the default thirty-minute TTL
    pub fn new() -> Self {
        Self::build(CacheConfig::default().credential_ttl)
    }

    /// # Errors
    /// Returns error when the configuration does not validate
    pub fn with_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config.credential_ttl))
    }

    fn build(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                entries: DashMap::new(),
                expirations: Mutex::new(BinaryHeap::new()),
                enrichment: EnrichmentCache::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Enrichment memo map sharing this cache's lifecycle
    pub fn enrichment(&self) -> &EnrichmentCache {
        &self.inner.enrichment
    }

    /// Enrichment handle scoped to one token's session.
    ///
    /// The handle stops memoizing once the token is removed or expires.
    pub fn enrichment_scope(&self, token: &str) -> EnrichmentScope {
        self.inner.enrichment.bound_scope(token)
    }

    /// Stores a connection target and returns its new token.
    ///
    /// Entries that are already due are swept first.
    pub fn store(&self, backend: BackendKind, spec: ConnectionSpec) -> String {
        let now = Instant::now();
        self.sweep_expired_at(now);

        let expires_at = now + self.inner.ttl;
        loop {
            let token = generate_token();
            if let Entry::Vacant(slot) = self.inner.entries.entry(token.clone()) {
                self.inner.enrichment.open_partition(&token);
                slot.insert(CachedCredential {
                    token: token.clone(),
                    backend,
                    spec,
                    expires_at,
                });
                self.lock_expirations()
                    .push(Reverse((expires_at, token.clone())));
                tracing::debug!("Stored {} credential; {} live entries", backend, self.len());
                return token;
            }
        }
    }

    /// Returns the entry if the token exists and has not expired.
    ///
    /// An expired entry is evicted and reported as absent.
    pub fn get(&self, token: &str) -> Option<CachedCredential> {
        let now = Instant::now();
        {
            let entry = self.inner.entries.get(token)?;
            if entry.is_live_at(now) {
                return Some(entry.clone());
            }
        }
        self.evict_if_expired(token, now);
        None
    }

    /// Like [`CredentialCache::get`], but a miss is `TokenExpiredOrInvalid`
    pub fn require(&self, token: &str) -> Result<CachedCredential> {
        self.get(token).ok_or(DataDictError::TokenExpiredOrInvalid)
    }

    /// Liveness check without cloning the entry
    pub fn has(&self, token: &str) -> bool {
        let now = Instant::now();
        let live = match self.inner.entries.get(token) {
            Some(entry) => entry.is_live_at(now),
            None => return false,
        };
        if !live {
            self.evict_if_expired(token, now);
        }
        live
    }

    /// Evicts the credential and its enrichment partition. Idempotent.
    pub fn remove(&self, token: &str) {
        let removed = self.inner.entries.remove(token).is_some();
        self.inner.enrichment.remove_partition(token);
        if removed {
            tracing::debug!("Removed credential entry");
        }
    }

    /// Removes every entry whose expiry has passed; returns how many
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut due = Vec::new();
        {
            let mut heap = self.lock_expirations();
            while let Some(Reverse((expires_at, _))) = heap.peek() {
                if *expires_at > now {
                    break;
                }
                if let Some(Reverse((_, token))) = heap.pop() {
                    due.push(token);
                }
            }
        }

        due.iter()
            .filter(|token| self.evict_if_expired(token, now))
            .count()
    }

    fn evict_if_expired(&self, token: &str, now: Instant) -> bool {
        let evicted = self
            .inner
            .entries
            .remove_if(token, |_, entry| !entry.is_live_at(now))
            .is_some();
        if evicted {
            self.inner.enrichment.remove_partition(token);
        }
        evicted
    }

    /// Drops every credential and every enrichment partition
    pub fn clear(&self) {
        self.inner.entries.clear();
        self.lock_expirations().clear();
        self.inner.enrichment.clear();
    }

    /// Number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Sweeps expired entries every `period` until the cache is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = CredentialCache { inner }.sweep_expired();
                if removed > 0 {
                    tracing::debug!("Swept {} expired credential entries", removed);
                }
            }
        })
    }

    fn lock_expirations(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<(Instant, String)>>> {
        self.inner
            .expirations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ConnectionRequest, resolve};
    use std::collections::HashSet;

    fn spec() -> ConnectionSpec {
        resolve(BackendKind::Redis, &ConnectionRequest::new("cache")).unwrap()
    }

    const DEFAULT_TTL_MINUS_ONE_MS: Duration = Duration::from_millis(30 * 60 * 1000 - 1);

    #[tokio::test(start_paused = true)]
    async fn test_token_live_until_ttl_boundary() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        assert!(cache.has(&token));

        tokio::time::advance(DEFAULT_TTL_MINUS_ONE_MS).await;
        assert!(cache.has(&token));
        assert!(cache.get(&token).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.has(&token));
        assert!(cache.get(&token).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_ttl() {
        let config = CacheConfig::default().with_credential_ttl(Duration::from_secs(5));
        let cache = CredentialCache::with_config(&config).unwrap();
        let token = cache.store(BackendKind::Redis, spec());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.has(&token));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.has(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_expired_token() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        tokio::time::advance(cache.ttl()).await;

        let err = cache.require(&token).unwrap_err();
        assert!(err.is_token_expired());
    }

    #[tokio::test]
    async fn test_require_unknown_token() {
        let cache = CredentialCache::new();
        assert!(matches!(
            cache.require("nope"),
            Err(DataDictError::TokenExpiredOrInvalid)
        ));
    }

    #[tokio::test]
    async fn test_get_returns_stored_spec() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());

        let entry = cache.get(&token).unwrap();
        assert_eq!(entry.token, token);
        assert_eq!(entry.backend, BackendKind::Redis);
        assert_eq!(entry.spec.to_string(), "cache:6379");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());

        cache.remove(&token);
        assert!(!cache.has(&token));
        cache.remove(&token);
        cache.remove("never-issued");
        assert!(!cache.has(&token));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_enrichment_partition() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        cache
            .enrichment()
            .insert(&token, "prompt", "answer".to_string());
        assert_eq!(
            cache.enrichment().get(&token, "prompt").as_deref(),
            Some("answer")
        );

        cache.remove(&token);
        assert_eq!(cache.enrichment().get(&token, "prompt"), None);
    }

    #[tokio::test]
    async fn test_scope_outliving_its_token_does_not_recreate_partition() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        let scope = cache.enrichment_scope(&token);

        cache.remove(&token);
        scope.insert("prompt", "late answer".to_string());
        let value = scope
            .get_or_try_insert_with("other", || async { Ok("computed".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "computed");
        assert_eq!(cache.enrichment().partition_len(&token), 0);
        assert_eq!(cache.enrichment().get(&token, "prompt"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_stops_memoizing_after_expiry() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        let scope = cache.enrichment_scope(&token);
        scope.insert("prompt", "answer".to_string());
        assert_eq!(scope.len(), 1);

        tokio::time::advance(cache.ttl()).await;
        assert_eq!(cache.sweep_expired(), 1);
        scope.insert("prompt", "again".to_string());

        assert!(scope.is_empty());
        assert_eq!(cache.enrichment().partition_len(&token), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_sweeps_due_entries() {
        let cache = CredentialCache::new();
        let first = cache.store(BackendKind::Redis, spec());
        let second = cache.store(BackendKind::Redis, spec());
        assert_eq!(cache.len(), 2);

        tokio::time::advance(cache.ttl()).await;
        let third = cache.store(BackendKind::Redis, spec());

        assert_eq!(cache.len(), 1);
        assert!(!cache.has(&first));
        assert!(!cache.has(&second));
        assert!(cache.has(&third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_removed_tokens() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        cache.remove(&token);

        tokio::time::advance(cache.ttl()).await;
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        let handle = cache.spawn_sweeper(Duration::from_secs(60));

        tokio::time::sleep(cache.ttl() + Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 0);
        assert!(!cache.has(&token));

        drop(cache);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = CredentialCache::new();
        let token = cache.store(BackendKind::Redis, spec());
        cache.enrichment().insert(&token, "k", "v".to_string());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.enrichment().get(&token, "k"), None);
    }

    #[test]
    fn test_generated_tokens_unique() {
        let tokens: HashSet<String> = (0..10_000).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[tokio::test]
    async fn test_stored_tokens_unique() {
        let cache = CredentialCache::new();
        let mut tokens = HashSet::new();
        for _ in 0..10_000 {
            assert!(tokens.insert(cache.store(BackendKind::Redis, spec())));
        }
        assert_eq!(cache.len(), 10_000);
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_store_and_remove() {
        let cache = CredentialCache::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let token = cache.store(BackendKind::Redis, spec());
                    assert!(cache.has(&token));
                    cache.remove(&token);
                    assert!(!cache.has(&token));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.is_empty());
    }
}
