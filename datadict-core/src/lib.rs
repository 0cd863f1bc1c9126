//! Schema normalization engine behind datadict.
//!
//! This crate turns six heterogeneous database backends into one canonical
//! model of tables, columns, key flags, and relationships, optionally
//! annotated with generated descriptions.
//!
//! # Security Guarantees
//! - Passwords and raw connection descriptors never reach logs, errors, or
//!   `Debug` output
//! - Stored credentials are addressed by unpredictable tokens and expire
//!   after a fixed TTL
//! - All database operations are read-only
//!
//! # Architecture
//! - `resolver`: connection requests into a discrete/raw connection spec
//! - `introspect`: one object-safe introspector per backend, chosen by a factory
//! - `enrichment`: description operations memoized per session
//! - `cache`: token store and enrichment memo sharing one lifecycle
//! - `service`: connect / generate / disconnect over the pieces above
//! - `export`: rendering seam for finished dictionaries

pub mod cache;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod introspect;
pub mod logging;
pub mod models;
pub mod resolver;
pub mod security;
pub mod service;

// Re-export commonly used types
pub use cache::{CacheConfig, CredentialCache, EnrichmentCache, EnrichmentScope};
pub use enrichment::{DescriptionGenerator, Enricher, EnrichmentConfig, OpenAiGenerator};
pub use error::{DataDictError, Result};
pub use export::{DictionaryRenderer, ExportOptions, JsonRenderer};
pub use introspect::{
    FieldTypeStrategy, IntrospectionContext, IntrospectionOptions, Introspector,
    create_introspector, introspect,
};
pub use models::{
    BackendFamily, BackendKind, Column, DataDictionary, Relationships, SampleArtifacts, Table,
};
pub use resolver::{ConnectionRequest, ConnectionSpec, resolve};
pub use service::DictionaryService;
