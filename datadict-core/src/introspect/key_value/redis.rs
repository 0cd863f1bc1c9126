//! Redis key sampler over a multiplexed async connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ConnectionAddr, RedisError};

use super::{KeyKind, KeyKindCounts, connection_info_table, data_types_table};
use crate::error::{DataDictError, Result};
use crate::introspect::helpers::annotate_tables;
use crate::introspect::{IntrospectionContext, IntrospectionOptions, Introspector};
use crate::models::{BackendKind, Table};
use crate::resolver::{BackendExtras, ConnectionSpec, DiscreteParams};

const BACKEND: BackendKind = BackendKind::Redis;

/// Keys requested per `SCAN` round trip
const SCAN_BATCH: usize = 100;

/// Next cursor and one batch of raw key names
type ScanReply = (u64, Vec<Vec<u8>>);

/// Samples key types from one logical database
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisIntrospector;

#[async_trait]
impl Introspector for RedisIntrospector {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn introspect(
        &self,
        spec: &ConnectionSpec,
        ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>> {
        let client = open_client(spec)?;
        let mut conn = connect(&client, spec, &ctx.options).await?;

        let counts =
            counts_or_degraded(sample_key_kinds(&mut conn, ctx.options.key_sample_limit).await)?;
        tracing::info!("Sampled {} Redis keys", counts.total());

        let info = client.get_connection_info();
        let (host, port, tls) = match &info.addr {
            ConnectionAddr::Tcp(host, port) => (host.clone(), *port, false),
            ConnectionAddr::TcpTls { host, port, .. } => (host.clone(), *port, true),
            other => (other.to_string(), 0, false),
        };
        let database = u32::try_from(info.redis.db).unwrap_or_default();

        let mut tables = vec![
            data_types_table(&counts),
            connection_info_table(database, &host, port, tls),
        ];
        annotate_tables(&mut tables, &ctx.enricher, false).await;
        Ok(tables)
    }
}

/// Builds a `redis://` or `rediss://` URL from discrete parameters
pub fn connection_url(params: &DiscreteParams) -> Result<String> {
    let (database, tls) = match params.extras {
        BackendExtras::KeyValue {
            database_index,
            use_tls,
        } => (database_index, use_tls),
        _ => (0, false),
    };
    let scheme = if tls { "rediss" } else { "redis" };

    let mut url = url::Url::parse(&format!("{}://{}:{}/{}", scheme, params.host, params.port, database))
        .map_err(|e| DataDictError::invalid_spec(format!("Invalid Redis host: {}", e)))?;

    if let Some(password) = params.credentials.password() {
        url.set_username(params.credentials.username())
            .and_then(|()| url.set_password(Some(password)))
            .map_err(|()| DataDictError::invalid_spec("Redis host cannot carry credentials"))?;
    }
    Ok(url.to_string())
}

/// Lost connections fail the run; any other error (e.g. `NOPERM` on `SCAN`)
/// degrades to a single assumed string key.
fn counts_or_degraded(
    sampled: std::result::Result<KeyKindCounts, RedisError>,
) -> Result<KeyKindCounts> {
    match sampled {
        Ok(counts) => Ok(counts),
        Err(e) if e.is_io_error() => Err(DataDictError::introspection_failed(
            BACKEND,
            "Failed to enumerate keys",
            e,
        )),
        Err(e) => {
            tracing::warn!("Key enumeration unavailable, reporting degraded counts: {}", e);
            Ok(KeyKindCounts::degraded())
        }
    }
}

fn open_client(spec: &ConnectionSpec) -> Result<Client> {
    let url = match spec {
        ConnectionSpec::Discrete(params) => zeroize::Zeroizing::new(connection_url(params)?),
        ConnectionSpec::Raw(raw) => zeroize::Zeroizing::new(raw.expose().to_string()),
    };
    Client::open(url.as_str()).map_err(|e| {
        DataDictError::invalid_spec(format!("Unusable Redis connection target {}: {}", spec, e))
    })
}

async fn connect(
    client: &Client,
    spec: &ConnectionSpec,
    options: &IntrospectionOptions,
) -> Result<MultiplexedConnection> {
    let target = spec.to_string();
    let mut conn = tokio::time::timeout(
        options.connect_timeout,
        client.get_multiplexed_async_connection(),
    )
    .await
    .map_err(|e| DataDictError::connection_failed(BACKEND, format!("timed out connecting to {}", target), e))?
    .map_err(|e| DataDictError::connection_failed(BACKEND, format!("cannot connect to {}", target), e))?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| DataDictError::connection_failed(BACKEND, format!("cannot reach {}", target), e))?;
    Ok(conn)
}

/// Scans up to `limit` keys and asks each one for its type.
///
/// Keys are binary-safe, so they stay raw bytes. Keys whose `TYPE` call
/// fails (expired or renamed mid-scan) are skipped.
async fn sample_key_kinds(
    conn: &mut MultiplexedConnection,
    limit: usize,
) -> std::result::Result<KeyKindCounts, RedisError> {
    let mut counts = KeyKindCounts::new();
    let mut sampled = 0usize;
    let mut cursor = 0u64;

    loop {
        let (next, keys): ScanReply = redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;

        for key in keys {
            if sampled >= limit {
                return Ok(counts);
            }
            sampled = sampled.saturating_add(1);

            let reply: std::result::Result<String, RedisError> =
                redis::cmd("TYPE").arg(key.as_slice()).query_async(conn).await;
            match reply {
                Ok(reply) => match KeyKind::from_type_reply(&reply) {
                    Some(kind) => counts.record(kind),
                    None => tracing::debug!(
                        "Key '{}' has uncounted type '{}'",
                        String::from_utf8_lossy(&key),
                        reply
                    ),
                },
                Err(e) if e.is_io_error() => return Err(e),
                Err(e) => tracing::debug!("Skipping key '{}': {}", String::from_utf8_lossy(&key), e),
            }
        }

        if next == 0 || sampled >= limit {
            return Ok(counts);
        }
        cursor = next;
    }
}
