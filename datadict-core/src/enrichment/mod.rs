//! Natural-language enrichment of the canonical model.
//!
//! [`Enricher`] exposes the four description operations. Each one derives a
//! deterministic prompt key from its inputs and consults the session's
//! [`EnrichmentScope`] before calling the [`DescriptionGenerator`], so
//! repeated and concurrent identical requests share one external call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::EnrichmentScope;
use crate::error::{DataDictError, Result};
use crate::models::Column;

mod openai;

#[cfg(test)]
pub(crate) mod stub;

pub use openai::OpenAiGenerator;

/// Default chat-completions endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Default model name
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// External text generator behind the description operations
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    /// Generates a completion for `prompt` capped at `max_tokens`.
    ///
    /// # Errors
    /// `Enrichment` when the call fails or the response is unusable.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// The four description operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentOperation {
    TableDescription,
    ColumnDescription,
    TablePurpose,
    ExampleData,
}

impl EnrichmentOperation {
    fn tag(self) -> &'static str {
        match self {
            EnrichmentOperation::TableDescription => "table_description",
            EnrichmentOperation::ColumnDescription => "column_description",
            EnrichmentOperation::TablePurpose => "table_purpose",
            EnrichmentOperation::ExampleData => "example_data",
        }
    }
}

/// Unit separator between key parts. Identifiers do not contain it, so
/// distinct inputs cannot collide the way `_`-joined keys can.
const KEY_SEPARATOR: char = '\u{1f}';

/// Deterministic cache key for one operation and its inputs
pub fn prompt_key(operation: EnrichmentOperation, parts: &[&str]) -> String {
    let mut key = String::from(operation.tag());
    for part in parts {
        key.push(KEY_SEPARATOR);
        key.push_str(part);
    }
    key
}

/// Completion token budgets per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgets {
    pub table_description: u32,
    pub column_description: u32,
    pub table_purpose: u32,
    pub example_data: u32,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            table_description: 100,
            column_description: 60,
            table_purpose: 60,
            example_data: 500,
        }
    }
}

/// Settings for the description generator.
///
/// The API key is supplied separately to [`OpenAiGenerator::new`] and is
/// never part of this serializable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub budgets: TokenBudgets,
    /// Maximum concurrent generator calls while annotating one table
    pub max_concurrent_calls: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            request_timeout: Duration::from_secs(30),
            budgets: TokenBudgets::default(),
            max_concurrent_calls: 4,
        }
    }
}

impl EnrichmentConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit;
        self
    }

    /// # Errors
    /// Returns error if configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        match url::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(DataDictError::configuration(
                    "endpoint must be an http(s) URL",
                ));
            }
        }

        if self.model.trim().is_empty() {
            return Err(DataDictError::configuration("model cannot be empty"));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DataDictError::configuration(
                "temperature must be between 0.0 and 2.0",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(DataDictError::configuration(
                "request_timeout must be greater than 0",
            ));
        }

        let budgets = self.budgets;
        if [
            budgets.table_description,
            budgets.column_description,
            budgets.table_purpose,
            budgets.example_data,
        ]
        .contains(&0)
        {
            return Err(DataDictError::configuration(
                "token budgets must be greater than 0",
            ));
        }

        if self.max_concurrent_calls == 0 {
            return Err(DataDictError::configuration(
                "max_concurrent_calls must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Session-scoped client for the four description operations.
///
/// A disabled enricher answers every operation with an empty string and
/// makes no calls.
#[derive(Clone)]
pub struct Enricher {
    generator: Option<Arc<dyn DescriptionGenerator>>,
    scope: EnrichmentScope,
    budgets: TokenBudgets,
    max_concurrent_calls: usize,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("enabled", &self.is_enabled())
            .field("scope", &self.scope)
            .field("budgets", &self.budgets)
            .finish()
    }
}

impl Enricher {
    pub fn new(generator: Arc<dyn DescriptionGenerator>, scope: EnrichmentScope) -> Self {
        let defaults = EnrichmentConfig::default();
        Self {
            generator: Some(generator),
            scope,
            budgets: defaults.budgets,
            max_concurrent_calls: defaults.max_concurrent_calls,
        }
    }

    /// Enricher that never calls out
    pub fn disabled() -> Self {
        let defaults = EnrichmentConfig::default();
        Self {
            generator: None,
            scope: EnrichmentScope::ephemeral(),
            budgets: defaults.budgets,
            max_concurrent_calls: defaults.max_concurrent_calls,
        }
    }

    /// Applies budgets and the concurrency limit from a configuration
    pub fn with_config(mut self, config: &EnrichmentConfig) -> Self {
        self.budgets = config.budgets;
        self.max_concurrent_calls = config.max_concurrent_calls.max(1);
        self
    }

    /// Same generator, bound to another session's cache partition
    pub fn rescoped(&self, scope: EnrichmentScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub fn scope(&self) -> &EnrichmentScope {
        &self.scope
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// Table description from its name and column names
    pub async fn describe_table(&self, table: &str, columns: &[String]) -> Result<String> {
        let joined = columns.join(", ");
        let prompt = format!(
            "I am documenting a database. Briefly describe the purpose of a table named '{}' \
             based on its name and these columns: {}. State what the table records or stores, \
             in no more than 30 words.",
            table, joined
        );
        let mut parts = vec![table];
        parts.extend(columns.iter().map(String::as_str));
        self.memoized(
            EnrichmentOperation::TableDescription,
            &parts,
            prompt,
            self.budgets.table_description,
        )
        .await
    }

    /// Column description from table and column name
    pub async fn describe_column(&self, table: &str, column: &str) -> Result<String> {
        let prompt = format!(
            "I am documenting a database. In technical terms and in no more than 15 words, \
             describe the purpose of the column '{}' of the table '{}'.",
            column, table
        );
        self.memoized(
            EnrichmentOperation::ColumnDescription,
            &[table, column],
            prompt,
            self.budgets.column_description,
        )
        .await
    }

    /// Business purpose of a table from its name alone
    pub async fn table_purpose(&self, table: &str) -> Result<String> {
        let prompt = format!(
            "What is the general purpose of a table named '{}' in a business database? \
             Answer in a single technical sentence of no more than 30 words.",
            table
        );
        self.memoized(
            EnrichmentOperation::TablePurpose,
            &[table],
            prompt,
            self.budgets.table_purpose,
        )
        .await
    }

    /// Example INSERT statements for a table's columns
    pub async fn example_data(&self, table: &str, columns: &[Column]) -> Result<String> {
        let described: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        let prompt = format!(
            "Generate 5 SQL INSERT INTO statements for the table '{}' with the following \
             columns: {}. Use realistic sample data.",
            table,
            described.join(", ")
        );
        let mut parts = vec![table];
        parts.extend(described.iter().map(String::as_str));
        self.memoized(
            EnrichmentOperation::ExampleData,
            &parts,
            prompt,
            self.budgets.example_data,
        )
        .await
    }

    async fn memoized(
        &self,
        operation: EnrichmentOperation,
        parts: &[&str],
        prompt: String,
        max_tokens: u32,
    ) -> Result<String> {
        let Some(generator) = &self.generator else {
            return Ok(String::new());
        };

        let key = prompt_key(operation, parts);
        self.scope
            .get_or_try_insert_with(&key, || async move {
                tracing::debug!("Enrichment cache miss for {:?}", operation);
                generator.generate(&prompt, max_tokens).await
            })
            .await
    }
}
