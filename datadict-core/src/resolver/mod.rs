//! Connection spec resolution.
//!
//! Turns a loosely-typed [`ConnectionRequest`] into a [`ConnectionSpec`]:
//! either discrete parameters with the backend's default port applied, or a
//! raw descriptor validated for the target backend. Resolution never touches
//! the network.

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{DataDictError, Result, redact_database_url};
use crate::models::{BackendFamily, BackendKind};
use crate::security::Credentials;

/// Default authentication database for the document store
pub const DEFAULT_AUTH_SOURCE: &str = "admin";

/// Connection input as supplied by a caller.
///
/// Every field is optional at this stage; [`resolve`] decides what is
/// required for a given backend.
///
/// # Example
/// ```rust
/// use datadict_core::models::BackendKind;
/// use datadict_core::resolver::{ConnectionRequest, ConnectionSpec, resolve};
///
/// let request = ConnectionRequest::new("db.internal")
///     .with_database("sales")
///     .with_user("reader");
///
/// let spec = resolve(BackendKind::PostgreSql, &request).unwrap();
/// match spec {
///     ConnectionSpec::Discrete(params) => assert_eq!(params.port, 5432),
///     ConnectionSpec::Raw(_) => unreachable!(),
/// }
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionRequest {
    #[serde(alias = "host")]
    pub server: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub auth_source: Option<String>,
    pub keyspace: Option<String>,
    pub data_center: Option<String>,
    pub redis_database: Option<i64>,
    pub use_ssl: bool,
    pub connection_string: Option<String>,
}

impl ConnectionRequest {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            ..Default::default()
        }
    }

    /// Request carrying only a raw connection descriptor
    pub fn raw(descriptor: impl Into<String>) -> Self {
        Self {
            connection_string: Some(descriptor.into()),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_auth_source(mut self, auth_source: impl Into<String>) -> Self {
        self.auth_source = Some(auth_source.into());
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_data_center(mut self, data_center: impl Into<String>) -> Self {
        self.data_center = Some(data_center.into());
        self
    }

    pub fn with_redis_database(mut self, index: i64) -> Self {
        self.redis_database = Some(index);
        self
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_connection_string(mut self, descriptor: impl Into<String>) -> Self {
        self.connection_string = Some(descriptor.into());
        self
    }

    /// Names of discrete fields that carry a value
    fn supplied_discrete_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let text = [
            ("server", &self.server),
            ("database", &self.database),
            ("user", &self.user),
            ("password", &self.password),
            ("auth_source", &self.auth_source),
            ("keyspace", &self.keyspace),
            ("data_center", &self.data_center),
        ];
        for (name, value) in text {
            if non_blank(value.as_deref()).is_some() {
                fields.push(name);
            }
        }
        if self.port.is_some() {
            fields.push("port");
        }
        if self.redis_database.is_some() {
            fields.push("redis_database");
        }
        if self.use_ssl {
            fields.push("use_ssl");
        }
        fields
    }
}

impl std::fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("port", &self.port)
            .field("auth_source", &self.auth_source)
            .field("keyspace", &self.keyspace)
            .field("data_center", &self.data_center)
            .field("redis_database", &self.redis_database)
            .field("use_ssl", &self.use_ssl)
            .field(
                "connection_string",
                &self.connection_string.as_deref().map(redact_database_url),
            )
            .finish()
    }
}

/// Backend-specific parameters that only some families understand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendExtras {
    None,
    Document {
        auth_source: String,
    },
    ColumnFamily {
        keyspace: Option<String>,
        data_center: Option<String>,
    },
    KeyValue {
        database_index: u32,
        use_tls: bool,
    },
}

/// Discrete connection parameters with defaults applied
#[derive(Debug, Clone)]
pub struct DiscreteParams {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub credentials: Credentials,
    pub extras: BackendExtras,
}

impl std::fmt::Display for DiscreteParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(database) = &self.database {
            write!(f, "/{}", database)?;
        }
        Ok(())
    }
}

/// Raw connection descriptor, already validated for its backend.
///
/// The text is held in a zeroizing buffer and only ever displayed redacted.
#[derive(Clone)]
pub struct RawDescriptor {
    backend: BackendKind,
    text: Zeroizing<String>,
}

impl RawDescriptor {
    /// Full descriptor text, for handing to a driver. Never log it.
    pub fn expose(&self) -> &str {
        &self.text
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Database named by the descriptor, when its format can name one.
    ///
    /// Contact-point lists never carry a keyspace.
    pub fn database_name(&self) -> Option<String> {
        match self.backend {
            BackendKind::PostgreSql
            | BackendKind::MySql
            | BackendKind::MongoDb
            | BackendKind::Redis => {
                let url = url::Url::parse(&self.text).ok()?;
                let name = url.path().trim_start_matches('/');
                non_blank(Some(name)).map(str::to_string)
            }
            BackendKind::SqlServer => {
                let pairs = parse_ado_pairs(&self.text);
                ado_value(&pairs, &["database", "initial catalog"]).map(str::to_string)
            }
            BackendKind::Cassandra => None,
        }
    }
}

impl std::fmt::Debug for RawDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawDescriptor({})", redact_database_url(&self.text))
    }
}

impl std::fmt::Display for RawDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", redact_database_url(&self.text))
    }
}

/// Resolved connection target: discrete parameters or a raw descriptor
#[derive(Debug, Clone)]
pub enum ConnectionSpec {
    Discrete(DiscreteParams),
    Raw(RawDescriptor),
}

impl ConnectionSpec {
    /// Database or keyspace this target names, if any
    pub fn database_name(&self) -> Option<String> {
        match self {
            ConnectionSpec::Discrete(params) => match &params.extras {
                BackendExtras::ColumnFamily { keyspace, .. } => {
                    keyspace.clone().or_else(|| params.database.clone())
                }
                BackendExtras::KeyValue { database_index, .. } => {
                    Some(database_index.to_string())
                }
                _ => params.database.clone(),
            },
            ConnectionSpec::Raw(raw) => raw.database_name(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ConnectionSpec::Raw(_))
    }
}

impl std::fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionSpec::Discrete(params) => write!(f, "{}", params),
            ConnectionSpec::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

/// Resolves a request for `backend` into a connection target.
///
/// A non-blank raw descriptor takes precedence; any discrete fields that
/// were also supplied are ignored with a warning. Otherwise the backend's
/// required discrete fields must be present and the default port is applied.
///
/// # Errors
/// `InvalidSpec` when neither a usable descriptor nor the required fields
/// are present, or when a value is out of range.
pub fn resolve(backend: BackendKind, request: &ConnectionRequest) -> Result<ConnectionSpec> {
    if let Some(raw) = non_blank(request.connection_string.as_deref()) {
        let ignored = request.supplied_discrete_fields();
        if !ignored.is_empty() {
            tracing::warn!(
                "Raw {} connection descriptor supplied; ignoring discrete fields: {}",
                backend,
                ignored.join(", ")
            );
        }
        validate_raw(backend, raw)?;
        return Ok(ConnectionSpec::Raw(RawDescriptor {
            backend,
            text: Zeroizing::new(raw.to_string()),
        }));
    }

    resolve_discrete(backend, request).map(ConnectionSpec::Discrete)
}

fn resolve_discrete(backend: BackendKind, request: &ConnectionRequest) -> Result<DiscreteParams> {
    let host = non_blank(request.server.as_deref()).ok_or_else(|| {
        DataDictError::invalid_spec(format!(
            "{} requires a server or a connection string",
            backend
        ))
    })?;

    let database = non_blank(request.database.as_deref()).map(str::to_string);
    let needs_database = matches!(
        backend.family(),
        BackendFamily::Relational | BackendFamily::Document
    );
    if needs_database && database.is_none() {
        return Err(DataDictError::invalid_spec(format!(
            "{} requires a database name",
            backend
        )));
    }

    let port = match request.port {
        Some(0) => {
            return Err(DataDictError::invalid_spec(
                "port must be greater than 0",
            ));
        }
        Some(port) => port,
        None => backend.default_port(),
    };

    let extras = match backend.family() {
        BackendFamily::Relational => BackendExtras::None,
        BackendFamily::Document => BackendExtras::Document {
            auth_source: non_blank(request.auth_source.as_deref())
                .unwrap_or(DEFAULT_AUTH_SOURCE)
                .to_string(),
        },
        BackendFamily::ColumnFamily => BackendExtras::ColumnFamily {
            keyspace: non_blank(request.keyspace.as_deref()).map(str::to_string),
            data_center: non_blank(request.data_center.as_deref()).map(str::to_string),
        },
        BackendFamily::KeyValue => {
            let index = request.redis_database.unwrap_or(0);
            let database_index = u32::try_from(index).map_err(|_| {
                DataDictError::invalid_spec(format!(
                    "redis database index must be non-negative, got {}",
                    index
                ))
            })?;
            BackendExtras::KeyValue {
                database_index,
                use_tls: request.use_ssl,
            }
        }
    };

    let user = non_blank(request.user.as_deref()).unwrap_or_default();
    let credentials = Credentials::new(user.to_string(), request.password.clone());

    Ok(DiscreteParams {
        host: host.to_string(),
        port,
        database,
        credentials,
        extras,
    })
}

fn validate_raw(backend: BackendKind, raw: &str) -> Result<()> {
    match backend {
        BackendKind::PostgreSql => {
            validate_url(backend, raw, &["postgres", "postgresql"]).map(|_| ())
        }
        BackendKind::MySql => validate_url(backend, raw, &["mysql", "mariadb"]).map(|_| ()),
        BackendKind::MongoDb => {
            let url = validate_url(backend, raw, &["mongodb", "mongodb+srv"])?;
            if url.path().trim_start_matches('/').is_empty() {
                return Err(DataDictError::invalid_spec(
                    "MongoDB connection string must name a database",
                ));
            }
            Ok(())
        }
        BackendKind::Redis => validate_url(backend, raw, &["redis", "rediss"]).map(|_| ()),
        BackendKind::SqlServer => {
            let pairs = parse_ado_pairs(raw);
            let server = ado_value(
                &pairs,
                &["server", "data source", "address", "addr", "network address"],
            );
            if server.is_none() {
                return Err(DataDictError::invalid_spec(
                    "SQL Server connection string must contain a Server entry",
                ));
            }
            Ok(())
        }
        BackendKind::Cassandra => parse_contact_points(raw).map(|_| ()),
    }
}

fn validate_url(backend: BackendKind, raw: &str, schemes: &[&str]) -> Result<url::Url> {
    let url = url::Url::parse(raw).map_err(|e| {
        DataDictError::invalid_spec(format!(
            "{} connection string is not a valid URL: {}",
            backend, e
        ))
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(DataDictError::invalid_spec(format!(
            "{} connection string must use one of the schemes: {}",
            backend,
            schemes.join(", ")
        )));
    }
    if url.host_str().is_none_or(str::is_empty) && url.scheme() != "mongodb+srv" {
        return Err(DataDictError::invalid_spec(format!(
            "{} connection string must name a host",
            backend
        )));
    }
    Ok(url)
}

/// Splits a comma-separated `host[:port]` contact-point list.
///
/// # Errors
/// `InvalidSpec` for an empty entry or an unparsable/zero port.
pub fn parse_contact_points(raw: &str) -> Result<Vec<String>> {
    let mut points = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(DataDictError::invalid_spec(
                "contact point list contains an empty entry",
            ));
        }
        if let Some((host, port)) = entry.rsplit_once(':') {
            let port: u16 = port.parse().map_err(|_| {
                DataDictError::invalid_spec(format!("invalid port in contact point '{}'", entry))
            })?;
            if host.is_empty() || port == 0 {
                return Err(DataDictError::invalid_spec(format!(
                    "invalid contact point '{}'",
                    entry
                )));
            }
        }
        points.push(entry.to_string());
    }
    Ok(points)
}

/// Parses an ADO-style `Key=Value;` string into lowercased keys and values
pub(crate) fn parse_ado_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            (!key.is_empty()).then(|| (key, value.trim().to_string()))
        })
        .collect()
}

fn ado_value<'a>(pairs: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, value)| keys.contains(&key.as_str()) && !value.is_empty())
        .map(|(_, value)| value.as_str())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests;
