//! Shared helpers for introspectors.

use futures::StreamExt;

use crate::enrichment::Enricher;
use crate::error::Result;
use crate::models::{BackendKind, Column, Relationships, Table};

/// Sentinel stored when no procedure mentions a table
pub const NO_PROCEDURES_TEXT: &str = "No related stored procedures found.";

/// Fills descriptions, purpose, and optionally example statements.
///
/// Enrichment failures are logged and leave the affected field blank; they
/// never abort introspection. Column descriptions run concurrently up to the
/// enricher's limit.
pub async fn annotate_table(table: &mut Table, enricher: &Enricher, generate_examples: bool) {
    if !enricher.is_enabled() {
        return;
    }

    let name = table.name.clone();
    let table_name = name.as_str();
    let column_names = table.column_names();

    let (description, purpose) = tokio::join!(
        enricher.describe_table(table_name, &column_names),
        enricher.table_purpose(table_name)
    );
    table.description = or_blank(description, table_name, "table description");
    table.purpose = or_blank(purpose, table_name, "table purpose");

    let described: Vec<(String, Result<String>)> = futures::stream::iter(column_names)
        .map(|column| async move {
            let result = enricher.describe_column(table_name, &column).await;
            (column, result)
        })
        .buffered(enricher.max_concurrent_calls())
        .collect()
        .await;

    for (column_name, result) in described {
        let text = or_blank(result, table_name, "column description");
        if let Some(column) = table.column_mut(&column_name) {
            column.description = text;
        }
    }

    if generate_examples
        && table.artifacts.example_statements.is_none()
        && !table.columns().is_empty()
    {
        match enricher.example_data(table_name, table.columns()).await {
            Ok(text) if !text.is_empty() => table.artifacts.example_statements = Some(text),
            Ok(_) => {}
            Err(e) => tracing::warn!("Example data for '{}' left empty: {}", table_name, e),
        }
    }
}

/// Annotates tables one after another
pub async fn annotate_tables(tables: &mut [Table], enricher: &Enricher, generate_examples: bool) {
    for table in tables.iter_mut() {
        annotate_table(table, enricher, generate_examples).await;
    }
}

fn or_blank(result: Result<String>, table: &str, what: &str) -> String {
    result.unwrap_or_else(|e| {
        tracing::warn!("{} for '{}' left empty: {}", what, table, e);
        String::new()
    })
}

/// Rebuilds a `CREATE TABLE` script from introspected column metadata.
///
/// Lengths are appended only when positive; `-1` (MAX) and absent lengths
/// are omitted.
pub fn definition_script(schema: &str, table: &Table) -> String {
    let lines: Vec<String> = table
        .columns()
        .iter()
        .map(|column| {
            let mut line = format!("    {} {}", column.name, column.data_type);
            if let Some(len) = column.max_length.filter(|len| *len > 0) {
                line.push_str(&format!("({})", len));
            }
            line.push_str(if column.is_nullable {
                " NULL"
            } else {
                " NOT NULL"
            });
            if column.is_primary_key {
                line.push_str(" PRIMARY KEY");
            }
            line
        })
        .collect();

    format!(
        "CREATE TABLE {}.{} (\n{}\n);",
        schema,
        table.name,
        lines.join(",\n")
    )
}

/// Renders matched procedures under a header each, or the sentinel
pub fn format_procedures(procedures: &[(String, String)]) -> String {
    if procedures.is_empty() {
        return NO_PROCEDURES_TEXT.to_string();
    }
    procedures
        .iter()
        .map(|(name, body)| format!("/****** PROCEDURE: {} ******/\n{}", name, body.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Synthetic table returned when a backend answers but holds no tables
pub fn placeholder_table(backend: BackendKind, database: &str) -> Table {
    let mut table = Table::new(format!("{}_database_info", backend.as_str()))
        .with_relationships(match backend.family() {
            crate::models::BackendFamily::Relational => Relationships::None,
            _ => Relationships::NotApplicable,
        });
    let columns = [
        Column::new("database_name", "string")
            .primary_key()
            .with_extra(database),
        Column::new("backend", "string").with_extra(backend.to_string()),
        Column::new("status", "string").with_extra("no tables found"),
    ];
    for column in columns {
        // Names above are distinct.
        let _ = table.add_column(column);
    }
    table
}
