//! Canonical data dictionary model.
//!
//! Every backend collapses into the same [`Table`]/[`Column`] shape. Column
//! types stay engine-native strings; backend-specific signal that has no
//! dedicated field (column-family roles, key counts, connection facts) rides
//! in [`Column::extra`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DataDictError, Result};

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    SqlServer,
    PostgreSql,
    MySql,
    MongoDb,
    Cassandra,
    Redis,
}

/// Structural family a backend belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Relational,
    Document,
    ColumnFamily,
    KeyValue,
}

impl BackendKind {
    /// Every backend, in display order
    pub const ALL: [BackendKind; 6] = [
        BackendKind::SqlServer,
        BackendKind::PostgreSql,
        BackendKind::MySql,
        BackendKind::MongoDb,
        BackendKind::Cassandra,
        BackendKind::Redis,
    ];

    /// Well-known port used when a request leaves the port out
    pub fn default_port(self) -> u16 {
        match self {
            BackendKind::SqlServer => 1433,
            BackendKind::PostgreSql => 5432,
            BackendKind::MySql => 3306,
            BackendKind::MongoDb => 27017,
            BackendKind::Cassandra => 9042,
            BackendKind::Redis => 6379,
        }
    }

    pub fn family(self) -> BackendFamily {
        match self {
            BackendKind::SqlServer | BackendKind::PostgreSql | BackendKind::MySql => {
                BackendFamily::Relational
            }
            BackendKind::MongoDb => BackendFamily::Document,
            BackendKind::Cassandra => BackendFamily::ColumnFamily,
            BackendKind::Redis => BackendFamily::KeyValue,
        }
    }

    /// Stable lowercase identifier, also the serde representation
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::SqlServer => "sqlserver",
            BackendKind::PostgreSql => "postgresql",
            BackendKind::MySql => "mysql",
            BackendKind::MongoDb => "mongodb",
            BackendKind::Cassandra => "cassandra",
            BackendKind::Redis => "redis",
        }
    }

    /// Cargo feature that compiles this backend's driver
    pub fn feature_name(self) -> &'static str {
        match self {
            BackendKind::SqlServer => "mssql",
            other => other.as_str(),
        }
    }

    /// Whether the driver for this backend was compiled in
    pub fn is_enabled(self) -> bool {
        match self {
            BackendKind::SqlServer => cfg!(feature = "mssql"),
            BackendKind::PostgreSql => cfg!(feature = "postgresql"),
            BackendKind::MySql => cfg!(feature = "mysql"),
            BackendKind::MongoDb => cfg!(feature = "mongodb"),
            BackendKind::Cassandra => cfg!(feature = "cassandra"),
            BackendKind::Redis => cfg!(feature = "redis"),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::SqlServer => write!(f, "SQL Server"),
            BackendKind::PostgreSql => write!(f, "PostgreSQL"),
            BackendKind::MySql => write!(f, "MySQL"),
            BackendKind::MongoDb => write!(f, "MongoDB"),
            BackendKind::Cassandra => write!(f, "Cassandra"),
            BackendKind::Redis => write!(f, "Redis"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = DataDictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "sql-server" => Ok(BackendKind::SqlServer),
            "postgresql" | "postgres" | "pg" => Ok(BackendKind::PostgreSql),
            "mysql" => Ok(BackendKind::MySql),
            "mongodb" | "mongo" => Ok(BackendKind::MongoDb),
            "cassandra" | "scylla" => Ok(BackendKind::Cassandra),
            "redis" => Ok(BackendKind::Redis),
            other => Err(DataDictError::configuration(format!(
                "Unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Tables referenced by a table's outgoing foreign keys.
///
/// Relational backends produce [`Relationships::References`] or
/// [`Relationships::None`]; every other family reports
/// [`Relationships::NotApplicable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tables", rename_all = "snake_case")]
pub enum Relationships {
    References(Vec<String>),
    #[default]
    None,
    NotApplicable,
}

impl Relationships {
    /// Sentinel shown when a relational table has no outgoing foreign keys
    pub const NONE_TEXT: &'static str = "No relationships detected.";
    /// Sentinel shown for backends without a foreign-key concept
    pub const NOT_APPLICABLE_TEXT: &'static str = "Not applicable (non-relational)";

    /// Builds the distinct, first-seen-ordered set of referenced tables.
    ///
    /// Self references are dropped so a table never lists itself.
    pub fn from_references<I, S>(table: &str, referenced: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in referenced {
            let name = name.into();
            if name == table || names.contains(&name) {
                continue;
            }
            names.push(name);
        }

        if names.is_empty() {
            Relationships::None
        } else {
            Relationships::References(names)
        }
    }

    /// Referenced table names; empty for the sentinel variants
    pub fn tables(&self) -> &[String] {
        match self {
            Relationships::References(names) => names,
            Relationships::None | Relationships::NotApplicable => &[],
        }
    }
}

impl std::fmt::Display for Relationships {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relationships::References(names) => write!(f, "{}", names.join(", ")),
            Relationships::None => write!(f, "{}", Self::NONE_TEXT),
            Relationships::NotApplicable => write!(f, "{}", Self::NOT_APPLICABLE_TEXT),
        }
    }
}

/// One column (or document field, or synthetic attribute)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Engine-native type name, never normalized
    pub data_type: String,
    pub is_nullable: bool,
    pub max_length: Option<i64>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub description: String,
    /// Backend-specific metadata (role tag, count, default value)
    pub extra: Option<String>,
}

impl Column {
    /// Creates a nullable, non-key column with no description
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            max_length: None,
            is_primary_key: false,
            is_foreign_key: false,
            description: String::new(),
            extra: None,
        }
    }

    pub fn nullable(mut self, is_nullable: bool) -> Self {
        self.is_nullable = is_nullable;
        self
    }

    pub fn with_max_length(mut self, max_length: Option<i64>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Marks the column as part of the primary key, which also makes it non-null
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// Raw-text artifacts attached to a table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleArtifacts {
    /// Example mutation statements or sampled documents
    pub example_statements: Option<String>,
    /// Structural definition script rebuilt from column metadata
    pub definition_script: Option<String>,
    /// Procedural code associated with the table
    pub related_procedures: Option<String>,
}

/// One table, collection, or synthetic summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub description: String,
    pub purpose: String,
    pub relationships: Relationships,
    columns: Vec<Column>,
    pub artifacts: SampleArtifacts,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            purpose: String::new(),
            relationships: Relationships::None,
            columns: Vec::new(),
            artifacts: SampleArtifacts::default(),
        }
    }

    pub fn with_relationships(mut self, relationships: Relationships) -> Self {
        self.relationships = relationships;
        self
    }

    /// Appends a column, rejecting a name already present in this table
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.column(&column.name).is_some() {
            return Err(DataDictError::configuration(format!(
                "Duplicate column '{}' in table '{}'",
                column.name, self.name
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Builder form of [`Table::add_column`]
    pub fn with_column(mut self, column: Column) -> Result<Self> {
        self.add_column(column)?;
        Ok(self)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Mutable access for annotation. Column names must not be changed.
    pub fn columns_mut(&mut self) -> std::slice::IterMut<'_, Column> {
        self.columns.iter_mut()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Reorders columns in place; the set of columns is unchanged
    pub fn sort_columns_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Column, &Column) -> std::cmp::Ordering,
    {
        self.columns.sort_by(compare);
    }
}

/// Result of one introspection, as handed to preview and export consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDictionary {
    pub database_name: String,
    pub backend: BackendKind,
    pub generated_at: DateTime<Utc>,
    pub tables: Vec<Table>,
}

impl DataDictionary {
    pub fn new(database_name: impl Into<String>, backend: BackendKind, tables: Vec<Table>) -> Self {
        Self {
            database_name: database_name.into(),
            backend,
            generated_at: Utc::now(),
            tables,
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns().len()).sum()
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
