//! Per-backend introspection into the canonical model.
//!
//! One object-safe [`Introspector`] trait covers all six backends. The
//! backend is chosen by [`create_introspector`] from an explicit
//! [`BackendKind`]; drivers that were not compiled in yield
//! `UnsupportedBackend`.
//!
//! # Module Structure
//! - `helpers`: enrichment annotation, definition scripts, placeholder tables
//! - `relational`: catalog-driven collection shared by SQL Server, PostgreSQL, MySQL
//! - `document`: sampled-document inference (MongoDB)
//! - `column_family`: keyspace/table/column-role walk (Cassandra)
//! - `key_value`: key sampling and synthetic summary tables (Redis)

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::enrichment::Enricher;
use crate::error::{DataDictError, Result};
use crate::models::{BackendKind, Table};
use crate::resolver::ConnectionSpec;

pub mod column_family;
#[cfg(feature = "mongodb")]
pub mod document;
pub mod helpers;
pub mod key_value;
pub mod relational;

/// How sampled document fields that disagree on type are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeStrategy {
    /// The first sampled occurrence decides the type
    #[default]
    FirstOccurrence,
    /// Agreeing occurrences keep their type; disagreement yields `mixed`
    Unanimous,
}

impl FromStr for FieldTypeStrategy {
    type Err = DataDictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-occurrence" | "first_occurrence" => {
                Ok(FieldTypeStrategy::FirstOccurrence)
            }
            "unanimous" | "mixed" => Ok(FieldTypeStrategy::Unanimous),
            other => Err(DataDictError::configuration(format!(
                "Unknown field type strategy '{}'",
                other
            ))),
        }
    }
}

/// Introspection tuning shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionOptions {
    /// Documents sampled per collection
    pub document_sample_size: u32,
    /// Keys sampled from a key-value database
    pub key_sample_limit: usize,
    pub field_type_strategy: FieldTypeStrategy,
    /// Ask the enricher for example mutation statements on relational tables
    pub include_examples: bool,
    pub connect_timeout: Duration,
    /// Overall bound on one introspection call
    pub deadline: Option<Duration>,
    /// Pool size for relational drivers
    pub max_connections: u32,
}

impl Default for IntrospectionOptions {
    fn default() -> Self {
        Self {
            document_sample_size: 10,
            key_sample_limit: 100,
            field_type_strategy: FieldTypeStrategy::FirstOccurrence,
            include_examples: true,
            connect_timeout: Duration::from_secs(30),
            deadline: None,
            max_connections: 2,
        }
    }
}

impl IntrospectionOptions {
    pub fn with_document_sample_size(mut self, size: u32) -> Self {
        self.document_sample_size = size;
        self
    }

    pub fn with_key_sample_limit(mut self, limit: usize) -> Self {
        self.key_sample_limit = limit;
        self
    }

    pub fn with_field_type_strategy(mut self, strategy: FieldTypeStrategy) -> Self {
        self.field_type_strategy = strategy;
        self
    }

    pub fn with_examples(mut self, include: bool) -> Self {
        self.include_examples = include;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// # Errors
    /// Returns error if configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        if self.document_sample_size == 0 || self.document_sample_size > 1000 {
            return Err(DataDictError::configuration(
                "document_sample_size must be between 1 and 1000",
            ));
        }

        if self.key_sample_limit == 0 || self.key_sample_limit > 100_000 {
            return Err(DataDictError::configuration(
                "key_sample_limit must be between 1 and 100000",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(DataDictError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(DataDictError::configuration(
                "deadline must be greater than 0",
            ));
        }

        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(DataDictError::configuration(
                "max_connections must be between 1 and 100",
            ));
        }

        Ok(())
    }
}

/// Everything an introspector needs besides the connection target
#[derive(Debug, Clone)]
pub struct IntrospectionContext {
    pub options: IntrospectionOptions,
    pub enricher: Enricher,
    pub cancellation: CancellationToken,
}

impl IntrospectionContext {
    pub fn new(options: IntrospectionOptions, enricher: Enricher) -> Self {
        Self {
            options,
            enricher,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl Default for IntrospectionContext {
    fn default() -> Self {
        Self::new(IntrospectionOptions::default(), Enricher::disabled())
    }
}

/// Produces canonical tables from one backend.
///
/// Implementations release every connection or session they open before
/// returning, on success and on failure. A successful call never returns
/// an empty list.
#[async_trait]
pub trait Introspector: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// # Errors
    /// `Connection` when the backend cannot be reached or refuses the
    /// credentials; `Introspection` when a catalog or sample query fails.
    async fn introspect(
        &self,
        spec: &ConnectionSpec,
        ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>>;
}

/// Selects the introspector for `backend`.
///
/// # Errors
/// `UnsupportedBackend` when the backend's feature was not compiled in.
pub fn create_introspector(backend: BackendKind) -> Result<Box<dyn Introspector>> {
    match backend {
        #[cfg(feature = "mssql")]
        BackendKind::SqlServer => Ok(Box::new(relational::mssql::SqlServerIntrospector)),
        #[cfg(feature = "postgresql")]
        BackendKind::PostgreSql => Ok(Box::new(relational::postgres::PostgresIntrospector)),
        #[cfg(feature = "mysql")]
        BackendKind::MySql => Ok(Box::new(relational::mysql::MySqlIntrospector)),
        #[cfg(feature = "mongodb")]
        BackendKind::MongoDb => Ok(Box::new(document::MongoIntrospector)),
        #[cfg(feature = "cassandra")]
        BackendKind::Cassandra => Ok(Box::new(column_family::CassandraIntrospector)),
        #[cfg(feature = "redis")]
        BackendKind::Redis => Ok(Box::new(key_value::RedisIntrospector)),
        #[allow(unreachable_patterns)]
        other => Err(DataDictError::unsupported_backend(other)),
    }
}

/// Runs one introspection with the context's deadline and cancellation.
///
/// Dropping the in-flight driver future on deadline or cancellation closes
/// its connection.
///
/// # Errors
/// Everything [`Introspector::introspect`] returns, plus `DeadlineExceeded`
/// and `Cancelled`.
pub async fn introspect(
    backend: BackendKind,
    spec: &ConnectionSpec,
    ctx: &IntrospectionContext,
) -> Result<Vec<Table>> {
    ctx.options.validate()?;
    let introspector = create_introspector(backend)?;
    run(introspector.as_ref(), spec, ctx).await
}

/// Deadline/cancellation wrapper around an already-selected introspector
pub async fn run(
    introspector: &dyn Introspector,
    spec: &ConnectionSpec,
    ctx: &IntrospectionContext,
) -> Result<Vec<Table>> {
    let backend = introspector.backend();
    tracing::info!("Starting {} introspection of {}", backend, spec);
    let start = std::time::Instant::now();

    let work = introspector.introspect(spec, ctx);
    let bounded = async {
        match ctx.options.deadline {
            Some(after) => tokio::time::timeout(after, work)
                .await
                .map_err(|_| DataDictError::DeadlineExceeded { backend, after })?,
            None => work.await,
        }
    };

    let tables = tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => {
            tracing::warn!("{} introspection cancelled", backend);
            return Err(DataDictError::Cancelled { backend });
        }
        result = bounded => result,
    };

    match &tables {
        Ok(tables) => tracing::info!(
            "{} introspection produced {} tables in {:.2}s",
            backend,
            tables.len(),
            start.elapsed().as_secs_f64()
        ),
        Err(e) => tracing::error!("{} introspection failed: {}", backend, e),
    }
    tables
}

#[cfg(test)]
mod tests;
