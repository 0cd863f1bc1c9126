//! Cassandra catalog reader over the scylla driver.

use async_trait::async_trait;
use scylla::client::execution_profile::ExecutionProfile;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::deserialize::row::DeserializeRow;
use scylla::policies::load_balancing::DefaultPolicy;
use scylla::serialize::row::SerializeRow;

use super::{CatalogColumn, KeyspaceCatalog, collect_keyspaces, is_system_keyspace};
use crate::error::{BoxError, DataDictError, Result};
use crate::introspect::{IntrospectionContext, IntrospectionOptions, Introspector};
use crate::models::{BackendKind, Table};
use crate::resolver::{BackendExtras, ConnectionSpec, parse_contact_points};

const BACKEND: BackendKind = BackendKind::Cassandra;

/// Reads `system_schema` for one keyspace, or every user keyspace
#[derive(Debug, Clone, Copy, Default)]
pub struct CassandraIntrospector;

#[async_trait]
impl Introspector for CassandraIntrospector {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn introspect(
        &self,
        spec: &ConnectionSpec,
        ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>> {
        let session = connect(spec, &ctx.options).await?;
        let keyspace = match spec {
            ConnectionSpec::Discrete(params) => match &params.extras {
                BackendExtras::ColumnFamily { keyspace, .. } => keyspace.clone(),
                _ => None,
            },
            ConnectionSpec::Raw(_) => None,
        };
        collect_keyspaces(&session, keyspace.as_deref(), ctx).await
    }
}

/// Appends `port` to contact points that lack one
fn with_port(points: Vec<String>, port: u16) -> Vec<String> {
    points
        .into_iter()
        .map(|point| {
            if point.contains(':') {
                point
            } else {
                format!("{}:{}", point, port)
            }
        })
        .collect()
}

async fn connect(spec: &ConnectionSpec, options: &IntrospectionOptions) -> Result<Session> {
    let mut builder = SessionBuilder::new().connection_timeout(options.connect_timeout);

    match spec {
        ConnectionSpec::Discrete(params) => {
            let points = parse_contact_points(&params.host)?;
            builder = builder.known_nodes(with_port(points, params.port));

            if let Some(username) = params.credentials.username_opt() {
                builder = builder.user(username, params.credentials.password().unwrap_or(""));
            }
            if let BackendExtras::ColumnFamily {
                data_center: Some(dc),
                ..
            } = &params.extras
            {
                let policy = DefaultPolicy::builder()
                    .prefer_datacenter(dc.clone())
                    .build();
                let profile = ExecutionProfile::builder()
                    .load_balancing_policy(policy)
                    .build();
                builder = builder.default_execution_profile_handle(profile.into_handle());
            }
        }
        ConnectionSpec::Raw(raw) => {
            let points = parse_contact_points(raw.expose())?;
            builder = builder.known_nodes(with_port(points, BACKEND.default_port()));
        }
    }

    let target = spec.to_string();
    tokio::time::timeout(options.connect_timeout, builder.build())
        .await
        .map_err(|e| {
            DataDictError::connection_failed(BACKEND, format!("timed out connecting to {}", target), e)
        })?
        .map_err(|e| DataDictError::connection_failed(BACKEND, format!("cannot connect to {}", target), e))
}

async fn fetch<R>(
    session: &Session,
    cql: &str,
    values: impl SerializeRow,
    context: String,
) -> Result<Vec<R>>
where
    R: for<'frame, 'metadata> DeserializeRow<'frame, 'metadata>,
{
    let failed = |source: BoxError| DataDictError::Introspection {
        backend: BACKEND,
        context: context.clone(),
        source,
    };

    let result = session
        .query_unpaged(cql, values)
        .await
        .map_err(|e| failed(Box::new(e)))?;
    let rows = result.into_rows_result().map_err(|e| failed(Box::new(e)))?;
    rows.rows::<R>()
        .map_err(|e| failed(Box::new(e)))?
        .collect::<std::result::Result<Vec<R>, _>>()
        .map_err(|e| failed(Box::new(e)))
}

#[async_trait]
impl KeyspaceCatalog for Session {
    async fn user_keyspaces(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = fetch(
            self,
            "SELECT keyspace_name FROM system_schema.keyspaces",
            (),
            "Failed to list keyspaces".to_string(),
        )
        .await?;

        let mut keyspaces: Vec<String> = rows
            .into_iter()
            .map(|(name,)| name)
            .filter(|name| !is_system_keyspace(name))
            .collect();
        keyspaces.sort();
        Ok(keyspaces)
    }

    async fn table_names(&self, keyspace: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = fetch(
            self,
            "SELECT table_name FROM system_schema.tables WHERE keyspace_name = ?",
            (keyspace,),
            format!("Failed to list tables in keyspace '{}'", keyspace),
        )
        .await?;

        let mut names: Vec<String> = rows.into_iter().map(|(name,)| name).collect();
        names.sort();
        Ok(names)
    }

    async fn columns(&self, keyspace: &str, table: &str) -> Result<Vec<CatalogColumn>> {
        let rows: Vec<(String, String, String, i32)> = fetch(
            self,
            "SELECT column_name, type, kind, position FROM system_schema.columns \
             WHERE keyspace_name = ? AND table_name = ?",
            (keyspace, table),
            format!("Failed to collect columns for '{}.{}'", keyspace, table),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, kind, position)| {
                CatalogColumn::new(name, data_type, &kind, position)
            })
            .collect())
    }

    async fn cluster_name(&self) -> Option<String> {
        let rows: Vec<(Option<String>,)> = fetch(
            self,
            "SELECT cluster_name FROM system.local",
            (),
            "Failed to read cluster name".to_string(),
        )
        .await
        .map_err(|e| tracing::debug!("{}", e))
        .ok()?;
        rows.into_iter().next().and_then(|(name,)| name)
    }
}
