//! Token-based session flow: connect, regenerate, disconnect.
//!
//! [`DictionaryService`] resolves a connection request, keeps the resulting
//! target in the [`CredentialCache`] under a fresh token, and runs the
//! backend's introspector with an enricher bound to that token's cache
//! partition. Later `generate` calls reuse both the stored target and the
//! memoized descriptions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{CachedCredential, CredentialCache};
use crate::enrichment::Enricher;
use crate::error::Result;
use crate::introspect::{
    IntrospectionContext, IntrospectionOptions, Introspector, create_introspector, run,
};
use crate::models::{BackendKind, DataDictionary};
use crate::resolver::{ConnectionRequest, ConnectionSpec, resolve};

/// Picks the introspector for a backend
pub type IntrospectorFactory = Arc<dyn Fn(BackendKind) -> Result<Box<dyn Introspector>> + Send + Sync>;

/// Ties the resolver, credential cache, enricher and introspectors together
#[derive(Clone)]
pub struct DictionaryService {
    cache: CredentialCache,
    enricher: Enricher,
    options: IntrospectionOptions,
    factory: IntrospectorFactory,
}

impl std::fmt::Debug for DictionaryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryService")
            .field("cached_credentials", &self.cache.len())
            .field("enricher", &self.enricher)
            .field("options", &self.options)
            .finish()
    }
}

impl DictionaryService {
    pub fn new(cache: CredentialCache, enricher: Enricher, options: IntrospectionOptions) -> Self {
        Self {
            cache,
            enricher,
            options,
            factory: Arc::new(create_introspector),
        }
    }

    /// Replaces the backend-to-introspector mapping
    pub fn with_factory(mut self, factory: IntrospectorFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Resolves and stores the request, then introspects it.
    ///
    /// The new token is removed again when introspection fails.
    ///
    /// # Errors
    /// `InvalidSpec` before anything is stored; otherwise whatever the
    /// introspection returns.
    pub async fn connect(
        &self,
        backend: BackendKind,
        request: &ConnectionRequest,
    ) -> Result<(String, DataDictionary)> {
        self.connect_with_cancellation(backend, request, CancellationToken::new())
            .await
    }

    pub async fn connect_with_cancellation(
        &self,
        backend: BackendKind,
        request: &ConnectionRequest,
        cancellation: CancellationToken,
    ) -> Result<(String, DataDictionary)> {
        self.options.validate()?;
        let spec = resolve(backend, request)?;
        let token = self.cache.store(backend, spec);

        let credential = self.cache.require(&token)?;
        match self.build(&credential, cancellation).await {
            Ok(dictionary) => {
                tracing::info!(
                    "Connected to {} '{}' with {} tables",
                    backend,
                    dictionary.database_name,
                    dictionary.tables.len()
                );
                Ok((token, dictionary))
            }
            Err(e) => {
                self.cache.remove(&token);
                Err(e)
            }
        }
    }

    /// Re-runs introspection from the cached target.
    ///
    /// # Errors
    /// `TokenExpiredOrInvalid` for an unknown or expired token.
    pub async fn generate(&self, token: &str) -> Result<DataDictionary> {
        self.generate_with_cancellation(token, CancellationToken::new())
            .await
    }

    pub async fn generate_with_cancellation(
        &self,
        token: &str,
        cancellation: CancellationToken,
    ) -> Result<DataDictionary> {
        let credential = self.cache.require(token)?;
        self.build(&credential, cancellation).await
    }

    /// Forgets the token and its memoized descriptions. Idempotent.
    pub fn disconnect(&self, token: &str) {
        self.cache.remove(token);
    }

    async fn build(
        &self,
        credential: &CachedCredential,
        cancellation: CancellationToken,
    ) -> Result<DataDictionary> {
        let introspector = (self.factory)(credential.backend)?;
        let enricher = self
            .enricher
            .rescoped(self.cache.enrichment_scope(&credential.token));
        let ctx = IntrospectionContext::new(self.options.clone(), enricher)
            .with_cancellation(cancellation);

        let tables = run(introspector.as_ref(), &credential.spec, &ctx).await?;
        Ok(DataDictionary::new(
            dictionary_name(credential.backend, &credential.spec),
            credential.backend,
            tables,
        ))
    }
}

/// Name shown for the introspected database
pub fn dictionary_name(backend: BackendKind, spec: &ConnectionSpec) -> String {
    let name = spec.database_name();
    match backend {
        BackendKind::Redis => crate::introspect::key_value::database_label(
            name.and_then(|n| n.parse().ok()).unwrap_or(0),
        ),
        _ => name.unwrap_or_else(|| backend.as_str().to_string()),
    }
}
