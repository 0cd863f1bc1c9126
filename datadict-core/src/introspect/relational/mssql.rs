//! SQL Server catalog source over a single tiberius connection.

use std::collections::HashSet;

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{CatalogColumn, CatalogSource, ForeignKeyRef, collect_relational};
use crate::error::{DataDictError, Result};
use crate::introspect::{IntrospectionContext, IntrospectionOptions, Introspector};
use crate::models::{BackendKind, Table};
use crate::resolver::ConnectionSpec;

const BACKEND: BackendKind = BackendKind::SqlServer;

type SqlClient = Client<Compat<TcpStream>>;

/// Introspects the login's default schema
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerIntrospector;

#[async_trait]
impl Introspector for SqlServerIntrospector {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn introspect(
        &self,
        spec: &ConnectionSpec,
        ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>> {
        let client = connect(spec, &ctx.options).await?;
        let database = spec.database_name().unwrap_or_default();

        let mut catalog = SqlServerCatalog { client };
        let result = collect_relational(&mut catalog, &database, ctx).await;

        if let Err(e) = catalog.client.close().await {
            tracing::debug!("SQL Server connection did not close cleanly: {}", e);
        }
        result
    }
}

fn client_config(spec: &ConnectionSpec) -> Result<Config> {
    match spec {
        ConnectionSpec::Discrete(params) => {
            let mut config = Config::new();
            config.host(&params.host);
            config.port(params.port);
            config.authentication(AuthMethod::sql_server(
                params.credentials.username(),
                params.credentials.password().unwrap_or(""),
            ));
            if let Some(database) = &params.database {
                config.database(database);
            }
            // Discrete parameters carry no certificate settings.
            config.trust_cert();
            Ok(config)
        }
        ConnectionSpec::Raw(raw) => Config::from_ado_string(raw.expose()).map_err(|e| {
            DataDictError::invalid_spec(format!("Unusable SQL Server connection string: {}", e))
        }),
    }
}

async fn connect(spec: &ConnectionSpec, options: &IntrospectionOptions) -> Result<SqlClient> {
    let config = client_config(spec)?;
    let target = spec.to_string();

    let attempt = {
        let target = target.clone();
        async move {
            let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
                DataDictError::connection_failed(BACKEND, format!("cannot reach {}", target), e)
            })?;
            tcp.set_nodelay(true).map_err(|e| {
                DataDictError::connection_failed(BACKEND, format!("cannot configure {}", target), e)
            })?;
            Client::connect(config, tcp.compat_write()).await.map_err(|e| {
                DataDictError::connection_failed(BACKEND, format!("login to {} failed", target), e)
            })
        }
    };

    tokio::time::timeout(options.connect_timeout, attempt)
        .await
        .map_err(|e| {
            DataDictError::connection_failed(BACKEND, format!("timed out connecting to {}", target), e)
        })?
}

fn query_failed(context: impl Into<String>) -> impl FnOnce(tiberius::error::Error) -> DataDictError {
    let context = context.into();
    move |e| DataDictError::introspection_failed(BACKEND, context, e)
}

fn text(row: &Row, idx: usize) -> Result<Option<String>> {
    row.try_get::<&str, _>(idx)
        .map(|value| value.map(str::to_string))
        .map_err(query_failed(format!("Failed to read text column {}", idx)))
}

struct SqlServerCatalog {
    client: SqlClient,
}

impl SqlServerCatalog {
    async fn rows(
        &mut self,
        sql: &str,
        params: &[&dyn ToSql],
        context: String,
    ) -> Result<Vec<Row>> {
        let stream = self
            .client
            .query(sql, params)
            .await
            .map_err(query_failed(context.clone()))?;
        stream.into_first_result().await.map_err(query_failed(context))
    }
}

#[async_trait]
impl CatalogSource for SqlServerCatalog {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn default_schema(&mut self) -> Result<String> {
        let rows = self
            .rows("SELECT SCHEMA_NAME()", &[], "Failed to read default schema".into())
            .await?;
        let schema = match rows.first() {
            Some(row) => text(row, 0)?,
            None => None,
        };
        Ok(schema.unwrap_or_else(|| "dbo".to_string()))
    }

    async fn base_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let sql = "SELECT TABLE_NAME
             FROM INFORMATION_SCHEMA.TABLES
             WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE'
             ORDER BY TABLE_NAME";
        let rows = self
            .rows(sql, &[&schema], format!("Failed to list tables in '{}'", schema))
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(name) = text(row, 0)? {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>> {
        let sql = "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE,
                    CAST(CHARACTER_MAXIMUM_LENGTH AS BIGINT)
             FROM INFORMATION_SCHEMA.COLUMNS
             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
             ORDER BY ORDINAL_POSITION";
        let rows = self
            .rows(
                sql,
                &[&schema, &table],
                format!("Failed to collect columns for '{}.{}'", schema, table),
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let max_length = row
                .try_get::<i64, _>(3)
                .map_err(query_failed("Failed to read CHARACTER_MAXIMUM_LENGTH"))?;
            columns.push(CatalogColumn {
                name: text(row, 0)?.unwrap_or_default(),
                data_type: text(row, 1)?.unwrap_or_default(),
                is_nullable: text(row, 2)?.is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                max_length,
            });
        }
        Ok(columns)
    }

    async fn primary_keys(&mut self, schema: &str) -> Result<HashSet<(String, String)>> {
        let sql = "SELECT kcu.TABLE_NAME, kcu.COLUMN_NAME
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
             JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                 ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                 AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
             WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = @P1";
        let rows = self
            .rows(sql, &[&schema], "Failed to collect primary keys".into())
            .await?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in &rows {
            if let (Some(table), Some(column)) = (text(row, 0)?, text(row, 1)?) {
                keys.insert((table, column));
            }
        }
        Ok(keys)
    }

    async fn foreign_keys(&mut self, schema: &str) -> Result<Vec<ForeignKeyRef>> {
        let sql = "SELECT
                 OBJECT_NAME(fkc.parent_object_id),
                 COL_NAME(fkc.parent_object_id, fkc.parent_column_id),
                 OBJECT_NAME(fkc.referenced_object_id)
             FROM sys.foreign_key_columns fkc
             JOIN sys.tables t ON fkc.parent_object_id = t.object_id
             WHERE SCHEMA_NAME(t.schema_id) = @P1
             ORDER BY t.name, fkc.constraint_object_id, fkc.constraint_column_id";
        let rows = self
            .rows(sql, &[&schema], "Failed to collect foreign keys".into())
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            if let (Some(table), Some(column), Some(referenced_table)) =
                (text(row, 0)?, text(row, 1)?, text(row, 2)?)
            {
                keys.push(ForeignKeyRef {
                    table,
                    column,
                    referenced_table,
                });
            }
        }
        Ok(keys)
    }

    async fn procedures_mentioning(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>> {
        // OBJECT_DEFINITION is NULL for encrypted procedures; those never match.
        let sql = "SELECT p.name, OBJECT_DEFINITION(p.object_id)
             FROM sys.procedures p
             WHERE SCHEMA_NAME(p.schema_id) = @P1
             AND CHARINDEX(@P2, OBJECT_DEFINITION(p.object_id)) > 0
             ORDER BY p.name";
        let rows = self
            .rows(
                sql,
                &[&schema, &table],
                format!("Failed to scan procedures for '{}'", table),
            )
            .await?;

        let mut procedures = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(name) = text(row, 0)? {
                procedures.push((name, text(row, 1)?.unwrap_or_default()));
            }
        }
        Ok(procedures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ConnectionRequest, resolve};
    use std::time::Duration;

    #[test]
    fn test_client_config_from_discrete_params() {
        let spec = resolve(
            BACKEND,
            &ConnectionRequest::new("sql01.corp")
                .with_database("Northwind")
                .with_user("sa")
                .with_password("secret"),
        )
        .unwrap();

        let config = client_config(&spec).unwrap();
        assert_eq!(config.get_addr(), "sql01.corp:1433");
    }

    #[test]
    fn test_client_config_from_ado_string() {
        let spec = resolve(
            BACKEND,
            &ConnectionRequest::raw(
                "Server=sql02.corp,14330;Database=Sales;User Id=reader;Password=secret;TrustServerCertificate=true",
            ),
        )
        .unwrap();

        let config = client_config(&spec).unwrap();
        assert_eq!(config.get_addr(), "sql02.corp:14330");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let spec = resolve(
            BACKEND,
            &ConnectionRequest::new("127.0.0.1")
                .with_port(1)
                .with_database("master")
                .with_password("secret"),
        )
        .unwrap();
        let options = IntrospectionOptions::default().with_connect_timeout(Duration::from_secs(2));

        let err = connect(&spec, &options).await.unwrap_err();
        assert!(matches!(err, DataDictError::Connection { .. }));
        assert!(!err.to_string().contains("secret"));
    }
}
