//! Credential and enrichment-response caching.
//!
//! Two concerns share one lifecycle:
//! - [`CredentialCache`]: token-addressed connection specs with a fixed TTL
//! - [`EnrichmentCache`]: connectionKey → promptKey → response memoization
//!
//! Removing a token from the credential cache also drops that token's
//! enrichment partition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DataDictError, Result};

mod credentials;
mod enrichment;

pub use credentials::{CachedCredential, CredentialCache, generate_token};
pub use enrichment::{EnrichmentCache, EnrichmentScope};

/// Default lifetime of a stored credential
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(30 * 60);

/// Upper bound accepted for a credential TTL
const MAX_CREDENTIAL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a stored credential stays visible
    pub credential_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
        }
    }
}

impl CacheConfig {
    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = ttl;
        self
    }

    /// # Errors
    /// Returns error for a zero TTL or one longer than seven days
    pub fn validate(&self) -> Result<()> {
        if self.credential_ttl.is_zero() {
            return Err(DataDictError::configuration(
                "credential_ttl must be greater than 0",
            ));
        }
        if self.credential_ttl > MAX_CREDENTIAL_TTL {
            return Err(DataDictError::configuration(
                "credential_ttl should not exceed 7 days",
            ));
        }
        Ok(())
    }
}
