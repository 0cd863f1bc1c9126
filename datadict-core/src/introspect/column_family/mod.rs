//! Cassandra introspection: keyspaces, tables, and column roles.
//!
//! The mapping from `system_schema.columns` rows to canonical columns lives
//! here and does not depend on the driver. Partition-key and clustering
//! columns become non-null primary-key columns; the role itself is kept in
//! the column's extra field.

use std::cmp::Ordering;

use async_trait::async_trait;

use super::IntrospectionContext;
use super::helpers::annotate_tables;
use crate::error::{DataDictError, Result};
use crate::models::{BackendKind, Column, Relationships, Table};

#[cfg(feature = "cassandra")]
mod cassandra;

#[cfg(feature = "cassandra")]
pub use cassandra::CassandraIntrospector;

/// Keyspaces whose names start with this prefix belong to the server
pub const SYSTEM_KEYSPACE_PREFIX: &str = "system";

/// Name of the synthetic table returned when nothing else is found
pub const CLUSTER_INFO_TABLE: &str = "cassandra_cluster_info";

/// Role of a column within its table's primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
    Static,
}

impl ColumnKind {
    /// Parses the `kind` column of `system_schema.columns`.
    ///
    /// Unknown kinds are treated as regular columns.
    pub fn from_catalog(kind: &str) -> Self {
        match kind {
            "partition_key" => ColumnKind::PartitionKey,
            "clustering" => ColumnKind::Clustering,
            "static" => ColumnKind::Static,
            _ => ColumnKind::Regular,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::PartitionKey => "partition_key",
            ColumnKind::Clustering => "clustering",
            ColumnKind::Regular => "regular",
            ColumnKind::Static => "static",
        }
    }

    pub fn is_key(self) -> bool {
        matches!(self, ColumnKind::PartitionKey | ColumnKind::Clustering)
    }

    fn rank(self) -> u8 {
        match self {
            ColumnKind::PartitionKey => 0,
            ColumnKind::Clustering => 1,
            ColumnKind::Regular | ColumnKind::Static => 2,
        }
    }
}

/// One row of `system_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub kind: ColumnKind,
    /// Position within the partition or clustering key; `-1` otherwise
    pub position: i32,
}

impl CatalogColumn {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        kind: &str,
        position: i32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            kind: ColumnKind::from_catalog(kind),
            position,
        }
    }

    fn to_column(&self) -> Column {
        let column = Column::new(self.name.as_str(), self.data_type.as_str())
            .with_extra(self.kind.as_str());
        if self.kind.is_key() {
            column.primary_key()
        } else {
            column.nullable(true)
        }
    }
}

/// Partition keys, then clustering keys, each by position, then the rest by name
fn key_order(a: &CatalogColumn, b: &CatalogColumn) -> Ordering {
    a.kind
        .rank()
        .cmp(&b.kind.rank())
        .then_with(|| {
            if a.kind.is_key() {
                a.position.cmp(&b.position)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.name.cmp(&b.name))
}

pub fn is_system_keyspace(name: &str) -> bool {
    name.starts_with(SYSTEM_KEYSPACE_PREFIX)
}

/// Canonical table `<keyspace>.<table>` from its catalog rows
pub fn table_from_catalog(keyspace: &str, table: &str, mut columns: Vec<CatalogColumn>) -> Table {
    columns.sort_by(key_order);

    let mut result =
        Table::new(format!("{}.{}", keyspace, table)).with_relationships(Relationships::NotApplicable);
    for column in &columns {
        if let Err(e) = result.add_column(column.to_column()) {
            tracing::warn!("{}", e);
        }
    }
    result
}

fn synthetic_table(name: String, columns: [Column; 2]) -> Table {
    let mut table = Table::new(name).with_relationships(Relationships::NotApplicable);
    for column in columns {
        // Synthetic column names are distinct.
        let _ = table.add_column(column);
    }
    table
}

/// Virtual table summarizing one keyspace
pub fn keyspace_table(keyspace: &str) -> Table {
    synthetic_table(
        format!("keyspace_{}", keyspace),
        [
            Column::new("keyspace_name", "text")
                .primary_key()
                .with_extra(keyspace),
            Column::new("type", "text")
                .nullable(false)
                .with_extra("keyspace"),
        ],
    )
}

/// Fallback table describing the cluster connection
pub fn cluster_info_table(cluster_name: Option<&str>) -> Table {
    synthetic_table(
        CLUSTER_INFO_TABLE.to_string(),
        [
            Column::new("cluster_name", "text")
                .primary_key()
                .with_extra(cluster_name.unwrap_or("cassandra_cluster")),
            Column::new("connection_status", "text")
                .nullable(false)
                .with_extra("connected"),
        ],
    )
}

/// Read access to the schema tables of one cluster
#[async_trait]
pub trait KeyspaceCatalog: Send + Sync {
    /// Non-system keyspaces, ordered by name
    async fn user_keyspaces(&self) -> Result<Vec<String>>;

    /// Tables of one keyspace, ordered by name
    async fn table_names(&self, keyspace: &str) -> Result<Vec<String>>;

    async fn columns(&self, keyspace: &str, table: &str) -> Result<Vec<CatalogColumn>>;

    /// Best effort; `None` when the cluster does not say
    async fn cluster_name(&self) -> Option<String>;
}

/// Walks the requested keyspace, or every user keyspace.
///
/// A keyspace whose tables cannot be listed, or a table whose columns
/// cannot be read, is left out; the run then ends with
/// `PartialIntrospection` carrying everything else. Tables without columns
/// are skipped. Each untargeted keyspace gets its summary table after its
/// own tables.
///
/// # Errors
/// Fails outright only when the keyspace list itself cannot be read.
pub async fn collect_keyspaces<C>(
    catalog: &C,
    keyspace: Option<&str>,
    ctx: &IntrospectionContext,
) -> Result<Vec<Table>>
where
    C: KeyspaceCatalog + ?Sized,
{
    let targeted = keyspace.is_some();
    let keyspaces = match keyspace {
        Some(keyspace) => vec![keyspace.to_string()],
        None => catalog.user_keyspaces().await?,
    };
    tracing::info!("Introspecting {} Cassandra keyspace(s)", keyspaces.len());

    let mut tables = Vec::new();
    let mut unread = Vec::new();
    let mut first_error = None;

    for keyspace in &keyspaces {
        match catalog.table_names(keyspace).await {
            Ok(names) => {
                for name in names {
                    match catalog.columns(keyspace, &name).await {
                        Ok(columns) if columns.is_empty() => {
                            tracing::debug!("Skipping '{}.{}': no columns", keyspace, name);
                        }
                        Ok(columns) => tables.push(table_from_catalog(keyspace, &name, columns)),
                        Err(e) => {
                            tracing::warn!("{}", e);
                            unread.push(format!("{}.{}", keyspace, name));
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}", e);
                unread.push(format!("keyspace {}", keyspace));
                first_error.get_or_insert(e);
            }
        }

        if !targeted {
            tables.push(keyspace_table(keyspace));
        }
    }

    if tables.is_empty() && first_error.is_none() {
        tracing::warn!("No Cassandra tables found; returning cluster info");
        tables.push(cluster_info_table(catalog.cluster_name().await.as_deref()));
    }

    annotate_tables(&mut tables, &ctx.enricher, false).await;

    match first_error {
        None => Ok(tables),
        Some(e) => Err(DataDictError::PartialIntrospection {
            backend: BackendKind::Cassandra,
            context: format!("could not read {}", unread.join(", ")),
            partial: tables,
            source: Box::new(e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Enricher;
    use crate::introspect::IntrospectionOptions;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeCluster {
        keyspaces: Vec<String>,
        tables: HashMap<String, Vec<String>>,
        columns: HashMap<(String, String), Vec<CatalogColumn>>,
        unlistable: Vec<String>,
        unreadable: Vec<(String, String)>,
    }

    impl FakeCluster {
        fn table(mut self, keyspace: &str, table: &str, columns: Vec<CatalogColumn>) -> Self {
            if !self.keyspaces.iter().any(|k| k == keyspace) {
                self.keyspaces.push(keyspace.to_string());
            }
            self.tables
                .entry(keyspace.to_string())
                .or_default()
                .push(table.to_string());
            self.columns
                .insert((keyspace.to_string(), table.to_string()), columns);
            self
        }

        fn failed() -> DataDictError {
            DataDictError::introspection_failed(
                BackendKind::Cassandra,
                "read timeout",
                std::io::Error::other("timeout"),
            )
        }
    }

    #[async_trait]
    impl KeyspaceCatalog for FakeCluster {
        async fn user_keyspaces(&self) -> Result<Vec<String>> {
            Ok(self.keyspaces.clone())
        }

        async fn table_names(&self, keyspace: &str) -> Result<Vec<String>> {
            if self.unlistable.iter().any(|k| k == keyspace) {
                return Err(Self::failed());
            }
            Ok(self.tables.get(keyspace).cloned().unwrap_or_default())
        }

        async fn columns(&self, keyspace: &str, table: &str) -> Result<Vec<CatalogColumn>> {
            let key = (keyspace.to_string(), table.to_string());
            if self.unreadable.contains(&key) {
                return Err(Self::failed());
            }
            Ok(self.columns.get(&key).cloned().unwrap_or_default())
        }

        async fn cluster_name(&self) -> Option<String> {
            Some("Test Cluster".to_string())
        }
    }

    fn ctx() -> IntrospectionContext {
        IntrospectionContext::new(IntrospectionOptions::default(), Enricher::disabled())
    }

    fn id_column() -> Vec<CatalogColumn> {
        vec![CatalogColumn::new("id", "uuid", "partition_key", 0)]
    }

    fn names(tables: &[Table]) -> Vec<&str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_keyspace_summary_follows_its_tables() {
        let cluster = FakeCluster::default()
            .table("audit", "events", id_column())
            .table("shop", "orders", id_column());

        let tables = collect_keyspaces(&cluster, None, &ctx()).await.unwrap();
        assert_eq!(
            names(&tables),
            ["audit.events", "keyspace_audit", "shop.orders", "keyspace_shop"]
        );
    }

    #[tokio::test]
    async fn test_targeted_keyspace_has_no_summary() {
        let cluster = FakeCluster::default()
            .table("shop", "orders", id_column())
            .table("shop", "empty", Vec::new());

        let tables = collect_keyspaces(&cluster, Some("shop"), &ctx()).await.unwrap();
        assert_eq!(names(&tables), ["shop.orders"]);
    }

    #[tokio::test]
    async fn test_unlistable_keyspace_keeps_earlier_tables() {
        let mut cluster = FakeCluster::default()
            .table("audit", "events", id_column())
            .table("shop", "orders", id_column());
        cluster.unlistable.push("shop".to_string());

        let err = collect_keyspaces(&cluster, None, &ctx()).await.unwrap_err();
        match err {
            DataDictError::PartialIntrospection { context, partial, .. } => {
                assert!(context.contains("keyspace shop"));
                assert_eq!(
                    names(&partial),
                    ["audit.events", "keyspace_audit", "keyspace_shop"]
                );
            }
            other => panic!("expected partial introspection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_table_is_reported_with_the_rest() {
        let mut cluster = FakeCluster::default()
            .table("shop", "orders", id_column())
            .table("shop", "carts", id_column());
        cluster
            .unreadable
            .push(("shop".to_string(), "carts".to_string()));

        let err = collect_keyspaces(&cluster, Some("shop"), &ctx()).await.unwrap_err();
        match err {
            DataDictError::PartialIntrospection { context, partial, .. } => {
                assert!(context.contains("shop.carts"));
                assert_eq!(names(&partial), ["shop.orders"]);
            }
            other => panic!("expected partial introspection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_cluster_falls_back_to_cluster_info() {
        let tables = collect_keyspaces(&FakeCluster::default(), None, &ctx())
            .await
            .unwrap();
        assert_eq!(names(&tables), [CLUSTER_INFO_TABLE]);
        assert_eq!(
            tables[0].column("cluster_name").and_then(|c| c.extra.as_deref()),
            Some("Test Cluster")
        );
    }

    #[test]
    fn test_column_roles_map_to_key_flags() {
        let table = table_from_catalog(
            "shop",
            "orders",
            vec![
                CatalogColumn::new("v", "text", "regular", -1),
                CatalogColumn::new("k2", "timeuuid", "clustering", 0),
                CatalogColumn::new("k1", "uuid", "partition_key", 0),
            ],
        );

        let k1 = table.column("k1").unwrap();
        assert!(k1.is_primary_key);
        assert!(!k1.is_nullable);
        assert_eq!(k1.extra.as_deref(), Some("partition_key"));

        let k2 = table.column("k2").unwrap();
        assert!(k2.is_primary_key);
        assert!(!k2.is_nullable);
        assert_eq!(k2.extra.as_deref(), Some("clustering"));

        let v = table.column("v").unwrap();
        assert!(!v.is_primary_key);
        assert!(v.is_nullable);
        assert_eq!(v.extra.as_deref(), Some("regular"));
    }

    #[test]
    fn test_column_order() {
        let table = table_from_catalog(
            "ks",
            "events",
            vec![
                CatalogColumn::new("payload", "blob", "regular", -1),
                CatalogColumn::new("ts", "timestamp", "clustering", 1),
                CatalogColumn::new("bucket", "int", "partition_key", 1),
                CatalogColumn::new("day", "date", "clustering", 0),
                CatalogColumn::new("tenant", "uuid", "partition_key", 0),
                CatalogColumn::new("author", "text", "static", -1),
            ],
        );
        assert_eq!(
            table.column_names(),
            ["tenant", "bucket", "day", "ts", "author", "payload"]
        );
        assert_eq!(table.name, "ks.events");
        assert_eq!(table.relationships, Relationships::NotApplicable);
    }

    #[test]
    fn test_unknown_kind_is_regular() {
        assert_eq!(ColumnKind::from_catalog("compact_value"), ColumnKind::Regular);
        assert_eq!(ColumnKind::from_catalog("static"), ColumnKind::Static);
        assert!(!ColumnKind::Static.is_key());
    }

    #[test]
    fn test_system_keyspaces() {
        assert!(is_system_keyspace("system"));
        assert!(is_system_keyspace("system_schema"));
        assert!(is_system_keyspace("system_auth"));
        assert!(!is_system_keyspace("shop"));
    }

    #[test]
    fn test_keyspace_table() {
        let table = keyspace_table("shop");
        assert_eq!(table.name, "keyspace_shop");
        let name = table.column("keyspace_name").unwrap();
        assert!(name.is_primary_key);
        assert_eq!(name.extra.as_deref(), Some("shop"));
        assert_eq!(
            table.column("type").and_then(|c| c.extra.as_deref()),
            Some("keyspace")
        );
    }

    #[test]
    fn test_cluster_info_table() {
        let table = cluster_info_table(Some("Test Cluster"));
        assert_eq!(table.name, CLUSTER_INFO_TABLE);
        assert_eq!(
            table.column("cluster_name").and_then(|c| c.extra.as_deref()),
            Some("Test Cluster")
        );

        let unnamed = cluster_info_table(None);
        assert_eq!(
            unnamed.column("cluster_name").and_then(|c| c.extra.as_deref()),
            Some("cassandra_cluster")
        );
    }

    proptest! {
        #[test]
        fn prop_only_key_roles_become_primary_keys(
            kinds in proptest::collection::vec(
                prop_oneof![
                    Just("partition_key".to_string()),
                    Just("clustering".to_string()),
                    Just("regular".to_string()),
                    Just("static".to_string()),
                    "[a-z_]{1,12}",
                ],
                1..8,
            )
        ) {
            let columns: Vec<CatalogColumn> = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| CatalogColumn::new(format!("c{}", i), "text", kind, i32::try_from(i).unwrap()))
                .collect();
            let table = table_from_catalog("ks", "t", columns);

            prop_assert_eq!(table.columns().len(), kinds.len());
            for (i, kind) in kinds.iter().enumerate() {
                let column = table.column(&format!("c{}", i)).unwrap();
                let is_key = matches!(kind.as_str(), "partition_key" | "clustering");
                prop_assert_eq!(column.is_primary_key, is_key);
                prop_assert_eq!(column.is_nullable, !is_key);
            }
        }
    }
}
