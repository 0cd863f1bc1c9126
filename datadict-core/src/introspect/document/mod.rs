//! MongoDB introspection by document sampling.
//!
//! Each collection becomes one table whose columns are inferred from the
//! first few documents. Collections have no foreign keys, so relationships
//! are always reported as not applicable. The sampled documents themselves
//! become the table's example artifact, so no example statements are
//! generated for them.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Database};

use super::helpers::{annotate_table, placeholder_table};
use super::{IntrospectionContext, IntrospectionOptions, Introspector};
use crate::error::{DataDictError, Result};
use crate::models::{BackendKind, Relationships, Table};
use crate::resolver::{BackendExtras, ConnectionSpec, DiscreteParams};

pub mod schema_inference;
pub mod type_mapping;

use schema_inference::SchemaInferrer;

const BACKEND: BackendKind = BackendKind::MongoDb;

/// Samples every collection of one database
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoIntrospector;

#[async_trait]
impl Introspector for MongoIntrospector {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn introspect(
        &self,
        spec: &ConnectionSpec,
        ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>> {
        let database = spec.database_name().ok_or_else(|| {
            DataDictError::invalid_spec("MongoDB connection must name a database")
        })?;
        let options = client_options(spec, &ctx.options).await?;
        let client = Client::with_options(options).map_err(|e| {
            DataDictError::connection_failed(BACKEND, format!("cannot create client for {}", spec), e)
        })?;

        let result = collect(&client.database(&database), spec, ctx).await;

        client.shutdown().await;
        result
    }
}

/// Builds a `mongodb://` URI from discrete parameters.
///
/// Credentials are percent-encoded by the URL writer; `authSource` is only
/// added when a user is given.
pub fn connection_uri(params: &DiscreteParams) -> Result<String> {
    let mut url = url::Url::parse(&format!("mongodb://{}:{}/", params.host, params.port))
        .map_err(|e| DataDictError::invalid_spec(format!("Invalid MongoDB host: {}", e)))?;

    if let Some(database) = &params.database {
        url.set_path(database);
    }

    if let Some(username) = params.credentials.username_opt() {
        url.set_username(username)
            .and_then(|()| url.set_password(params.credentials.password()))
            .map_err(|()| DataDictError::invalid_spec("MongoDB host cannot carry credentials"))?;

        if let BackendExtras::Document { auth_source } = &params.extras {
            url.query_pairs_mut().append_pair("authSource", auth_source);
        }
    }

    Ok(url.to_string())
}

async fn client_options(spec: &ConnectionSpec, options: &IntrospectionOptions) -> Result<ClientOptions> {
    let uri = match spec {
        ConnectionSpec::Discrete(params) => zeroize::Zeroizing::new(connection_uri(params)?),
        ConnectionSpec::Raw(raw) => zeroize::Zeroizing::new(raw.expose().to_string()),
    };

    let mut client_options = ClientOptions::parse(uri.as_str()).await.map_err(|e| {
        DataDictError::invalid_spec(format!(
            "Failed to parse MongoDB connection options for {}: {}",
            spec,
            crate::error::redact_database_url(&e.to_string())
        ))
    })?;
    client_options.connect_timeout = Some(options.connect_timeout);
    client_options.server_selection_timeout = Some(options.connect_timeout);
    client_options.app_name = Some("datadict".to_string());
    Ok(client_options)
}

async fn collect(
    db: &Database,
    spec: &ConnectionSpec,
    ctx: &IntrospectionContext,
) -> Result<Vec<Table>> {
    db.run_command(doc! { "ping": 1 }).await.map_err(|e| {
        DataDictError::connection_failed(BACKEND, format!("cannot reach {}", spec), e)
    })?;

    let mut names = db.list_collection_names().await.map_err(|e| {
        DataDictError::introspection_failed(
            BACKEND,
            format!("Failed to list collections in '{}'", db.name()),
            e,
        )
    })?;
    names.retain(|name| !name.starts_with("system."));
    names.sort();
    tracing::info!("Found {} collections in '{}'", names.len(), db.name());

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let documents = sample_collection(db, &name, ctx.options.document_sample_size).await?;
        tracing::debug!("Sampled {} documents from '{}'", documents.len(), name);

        let mut table = table_from_sample(&name, &documents, ctx.options.field_type_strategy);
        annotate_table(&mut table, &ctx.enricher, false).await;
        tables.push(table);
    }

    if tables.is_empty() {
        tracing::warn!("Database '{}' has no collections; returning placeholder", db.name());
        tables.push(placeholder_table(BACKEND, db.name()));
    }
    Ok(tables)
}

async fn sample_collection(db: &Database, collection: &str, size: u32) -> Result<Vec<Document>> {
    let sample_failed = |e: mongodb::error::Error| {
        DataDictError::introspection_failed(
            BACKEND,
            format!("Failed to sample documents from '{}.{}'", db.name(), collection),
            e,
        )
    };

    let options = FindOptions::builder().limit(i64::from(size)).build();
    let mut cursor = db
        .collection::<Document>(collection)
        .find(doc! {})
        .with_options(options)
        .await
        .map_err(sample_failed)?;

    let mut documents = Vec::new();
    while cursor.advance().await.map_err(sample_failed)? {
        documents.push(cursor.deserialize_current().map_err(sample_failed)?);
    }
    Ok(documents)
}

/// Canonical table for one collection from its sampled documents
pub fn table_from_sample(
    collection: &str,
    documents: &[Document],
    strategy: crate::introspect::FieldTypeStrategy,
) -> Table {
    let mut inferrer = SchemaInferrer::new();
    for document in documents {
        inferrer.analyze_document(document);
    }

    let mut table = Table::new(collection).with_relationships(Relationships::NotApplicable);
    for column in inferrer.into_columns(strategy) {
        // Field names within one sample are already distinct.
        let _ = table.add_column(column);
    }
    if !documents.is_empty() {
        table.artifacts.example_statements = Some(example_documents(documents));
    }
    table
}

/// Sampled documents as relaxed extended JSON, one per line
pub fn example_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|document| {
            Bson::Document(document.clone())
                .into_relaxed_extjson()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
