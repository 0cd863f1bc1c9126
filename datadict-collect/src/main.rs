//! Data dictionary collector.
//!
//! Resolves a connection from flags and environment, runs one
//! introspection, and writes the canonical model as JSON.
//!
//! # Security Guarantees
//! - Read-only database operations only
//! - Passwords, API keys and connection strings are never logged
//! - Credentials are dropped from the cache before exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use datadict_core::{
    BackendKind, CacheConfig, ConnectionRequest, CredentialCache, DictionaryRenderer,
    DictionaryService, Enricher, EnrichmentConfig, EnrichmentScope, ExportOptions,
    FieldTypeStrategy, IntrospectionOptions, JsonRenderer, OpenAiGenerator,
    logging::init_logging,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod output;

#[derive(Parser)]
#[command(name = "datadict-collect")]
#[command(about = "Build a data dictionary from a live database")]
#[command(version)]
#[command(long_about = "
datadict collector - canonical schema extraction with optional descriptions

Connects to one database, normalizes its structure into tables, columns,
key flags and relationships, and writes the result as JSON.

SUPPORTED BACKENDS:
- sqlserver   (discrete flags or an ADO-style connection string)
- postgresql  (discrete flags or postgres:// URL)
- mysql       (discrete flags or mysql:// URL)
- mongodb     (discrete flags or mongodb:// URL naming a database)
- cassandra   (discrete flags or a host[:port] contact-point list)
- redis       (discrete flags or redis:// / rediss:// URL)

EXAMPLES:
  datadict-collect --backend postgresql --server db01 --database shop --user reader
  datadict-collect --backend mongodb --connection-string mongodb://localhost/catalog --no-enrich
  datadict-collect --backend redis --server cache01 --redis-database 2 --ssl -o redis.json
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    collection: CollectionArgs,

    #[command(flatten)]
    enrichment: EnrichmentArgs,

    /// Output file path, or `-` for stdout
    #[arg(short, long, default_value = "datadict.json")]
    output: PathBuf,

    /// Document title recorded in the output
    #[arg(long, default_value = "Data Dictionary")]
    title: String,

    /// Document description recorded in the output
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Subcommand)]
enum Command {
    /// List backends and whether their drivers were compiled in
    List,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    quiet: bool,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Backend to introspect
    #[arg(short, long, env = "DATADICT_BACKEND")]
    backend: Option<BackendKind>,

    /// Host name, or a comma-separated contact-point list for Cassandra
    #[arg(long, alias = "host", env = "DATADICT_SERVER")]
    server: Option<String>,

    #[arg(long, env = "DATADICT_DATABASE")]
    database: Option<String>,

    #[arg(long, env = "DATADICT_USER")]
    user: Option<String>,

    #[arg(long, env = "DATADICT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "DATADICT_PORT")]
    port: Option<u16>,

    /// MongoDB authentication database
    #[arg(long)]
    auth_source: Option<String>,

    /// Cassandra keyspace; all user keyspaces when omitted
    #[arg(long)]
    keyspace: Option<String>,

    /// Preferred Cassandra data center
    #[arg(long)]
    data_center: Option<String>,

    /// Redis logical database index
    #[arg(long)]
    redis_database: Option<i64>,

    /// Use TLS for Redis
    #[arg(long)]
    ssl: bool,

    /// Raw connection descriptor; takes precedence over discrete flags
    #[arg(
        long,
        env = "DATADICT_CONNECTION_STRING",
        hide_env_values = true,
        help = "Connection string (credentials will be sanitized in logs)"
    )]
    connection_string: Option<String>,
}

#[derive(Args)]
struct CollectionArgs {
    /// Documents sampled per MongoDB collection
    #[arg(long, default_value = "10")]
    sample_size: u32,

    /// Keys sampled from Redis
    #[arg(long, default_value = "100")]
    key_limit: usize,

    /// How disagreeing document field types are reported (first, unanimous)
    #[arg(long, default_value = "first")]
    field_types: FieldTypeStrategy,

    /// Connection timeout in seconds
    #[arg(long, default_value = "30")]
    connect_timeout: u64,

    /// Overall deadline for the introspection in seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Skip generated example statements
    #[arg(long)]
    no_examples: bool,
}

#[derive(Args)]
struct EnrichmentArgs {
    /// Skip generated descriptions entirely
    #[arg(long)]
    no_enrich: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "DATADICT_ENRICHMENT_ENDPOINT", default_value = datadict_core::enrichment::DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long, env = "DATADICT_ENRICHMENT_MODEL", default_value = datadict_core::enrichment::DEFAULT_MODEL)]
    model: String,

    /// Concurrent description calls per table
    #[arg(long, default_value = "4")]
    max_concurrent_calls: usize,
}

impl ConnectionArgs {
    fn to_request(&self) -> ConnectionRequest {
        let mut request = match &self.server {
            Some(server) => ConnectionRequest::new(server.as_str()),
            None => ConnectionRequest::default(),
        };
        if let Some(database) = &self.database {
            request = request.with_database(database.as_str());
        }
        if let Some(user) = &self.user {
            request = request.with_user(user.as_str());
        }
        if let Some(password) = &self.password {
            request = request.with_password(password.as_str());
        }
        if let Some(port) = self.port {
            request = request.with_port(port);
        }
        if let Some(auth_source) = &self.auth_source {
            request = request.with_auth_source(auth_source.as_str());
        }
        if let Some(keyspace) = &self.keyspace {
            request = request.with_keyspace(keyspace.as_str());
        }
        if let Some(data_center) = &self.data_center {
            request = request.with_data_center(data_center.as_str());
        }
        if let Some(index) = self.redis_database {
            request = request.with_redis_database(index);
        }
        if let Some(descriptor) = &self.connection_string {
            request = request.with_connection_string(descriptor.as_str());
        }
        request.with_ssl(self.ssl)
    }
}

impl CollectionArgs {
    fn to_options(&self) -> IntrospectionOptions {
        let mut options = IntrospectionOptions::default()
            .with_document_sample_size(self.sample_size)
            .with_key_sample_limit(self.key_limit)
            .with_field_type_strategy(self.field_types)
            .with_examples(!self.no_examples)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout));
        if let Some(seconds) = self.deadline {
            options = options.with_deadline(Duration::from_secs(seconds));
        }
        options
    }
}

impl EnrichmentArgs {
    fn to_enricher(&self) -> anyhow::Result<Enricher> {
        if self.no_enrich {
            return Ok(Enricher::disabled());
        }
        let Some(api_key) = self.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            warn!("No API key configured; descriptions will be left empty");
            return Ok(Enricher::disabled());
        };

        let config = EnrichmentConfig::default()
            .with_endpoint(self.endpoint.as_str())
            .with_model(self.model.as_str())
            .with_max_concurrent_calls(self.max_concurrent_calls);
        config.validate()?;

        let generator = OpenAiGenerator::new(api_key, &config)?;
        Ok(Enricher::new(Arc::new(generator), EnrichmentScope::ephemeral()).with_config(&config))
    }
}

fn list_backends() {
    for backend in BackendKind::ALL {
        let status = if backend.is_enabled() {
            "available"
        } else {
            "not compiled in"
        };
        println!(
            "{:<12} default port {:<6} {}",
            backend.as_str(),
            backend.default_port(),
            status
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    if let Some(Command::List) = cli.command {
        list_backends();
        return Ok(());
    }

    let backend = cli
        .connection
        .backend
        .context("--backend is required (see `datadict-collect list`)")?;
    collect(backend, &cli).await
}

async fn collect(backend: BackendKind, cli: &Cli) -> anyhow::Result<()> {
    let request = cli.connection.to_request();
    let options = cli.collection.to_options();
    let enricher = cli.enrichment.to_enricher()?;
    let cache = CredentialCache::with_config(&CacheConfig::default())?;
    let service = DictionaryService::new(cache, enricher, options);

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling introspection");
            on_interrupt.cancel();
        }
    });

    info!("Starting {} introspection", backend);
    let (token, dictionary) = service
        .connect_with_cancellation(backend, &request, cancellation)
        .await
        .map_err(|e| {
            error!("Introspection failed: {}", e);
            e
        })?;
    service.disconnect(&token);

    info!(
        "✓ Collected {} tables with {} columns",
        dictionary.tables.len(),
        dictionary.column_count()
    );

    let export = ExportOptions::default()
        .with_title(cli.title.as_str())
        .with_description(cli.description.as_str())
        .with_examples(!cli.collection.no_examples);
    let bytes = JsonRenderer::pretty().render(&dictionary, &export)?;
    output::write(&cli.output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    if !output::is_stdout(&cli.output) {
        println!("Data dictionary written to {}", cli.output.display());
        println!("Database: {}", dictionary.database_name);
        println!("Tables: {}", dictionary.tables.len());
    }
    Ok(())
}
