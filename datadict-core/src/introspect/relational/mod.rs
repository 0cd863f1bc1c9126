//! Catalog-driven collection for the three relational backends.
//!
//! Each driver implements [`CatalogSource`] over its own system catalog;
//! [`collect_relational`] owns everything the three have in common:
//! key back-annotation, relationship text, definition scripts, the
//! best-effort procedure scan, enrichment, and the empty-catalog placeholder.

use std::collections::HashSet;

use async_trait::async_trait;

use super::IntrospectionContext;
use super::helpers::{annotate_table, definition_script, format_procedures, placeholder_table};
use crate::error::Result;
use crate::models::{BackendKind, Column, Relationships, Table};

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgresql")]
pub mod postgres;

/// One column row from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub max_length: Option<i64>,
}

/// One foreign-key column and the table it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
}

/// Read access to one relational catalog over an open connection.
///
/// Methods take `&mut self` so single-connection drivers need no locking.
#[async_trait]
pub trait CatalogSource: Send {
    fn backend(&self) -> BackendKind;

    /// Schema the session resolves unqualified names against
    async fn default_schema(&mut self) -> Result<String>;

    /// Base tables (no views) in `schema`, ordered by name
    async fn base_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Columns of one table in ordinal order
    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>>;

    /// `(table, column)` pairs that belong to a primary key
    async fn primary_keys(&mut self, schema: &str) -> Result<HashSet<(String, String)>>;

    async fn foreign_keys(&mut self, schema: &str) -> Result<Vec<ForeignKeyRef>>;

    /// `(name, body)` of procedures whose body contains `table` as a substring.
    ///
    /// Substring matching is knowingly imprecise: a table named `user` also
    /// matches procedures that only touch `users`.
    async fn procedures_mentioning(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>>;
}

/// Collects every base table of the default schema into canonical tables.
///
/// # Errors
/// Propagates catalog errors. A failed procedure scan is logged and leaves
/// that table's procedure artifact empty instead.
pub async fn collect_relational<S>(
    source: &mut S,
    database: &str,
    ctx: &IntrospectionContext,
) -> Result<Vec<Table>>
where
    S: CatalogSource + ?Sized,
{
    let backend = source.backend();
    let schema = source.default_schema().await?;
    let names = source.base_tables(&schema).await?;
    tracing::info!(
        "Found {} base tables in {} schema '{}'",
        names.len(),
        backend,
        schema
    );

    let primary_keys = source.primary_keys(&schema).await?;
    let foreign_keys = source.foreign_keys(&schema).await?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        tracing::debug!("Collecting columns for table '{}'", name);
        let mut table = Table::new(name.as_str());

        for entry in source.columns(&schema, &name).await? {
            let mut column = Column::new(entry.name, entry.data_type)
                .nullable(entry.is_nullable)
                .with_max_length(entry.max_length);
            column.is_primary_key = primary_keys.contains(&(name.clone(), column.name.clone()));
            column.is_foreign_key = foreign_keys
                .iter()
                .any(|fk| fk.table == name && fk.column == column.name);
            if let Err(e) = table.add_column(column) {
                tracing::warn!("{}", e);
            }
        }

        table.relationships = Relationships::from_references(
            &name,
            foreign_keys
                .iter()
                .filter(|fk| fk.table == name)
                .map(|fk| fk.referenced_table.clone()),
        );
        table.artifacts.definition_script = Some(definition_script(&schema, &table));
        table.artifacts.related_procedures =
            match source.procedures_mentioning(&schema, &name).await {
                Ok(procedures) => Some(format_procedures(&procedures)),
                Err(e) => {
                    tracing::warn!("Procedure scan for '{}' skipped: {}", name, e);
                    None
                }
            };

        annotate_table(&mut table, &ctx.enricher, ctx.options.include_examples).await;
        tables.push(table);
    }

    if tables.is_empty() {
        tracing::warn!(
            "{} schema '{}' has no base tables; returning placeholder",
            backend,
            schema
        );
        tables.push(placeholder_table(backend, database));
    }

    Ok(tables)
}
