use super::*;
use crate::models::Column;
use crate::resolver::{ConnectionRequest, resolve};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Introspector that sleeps, then returns one table
struct SlowIntrospector {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowIntrospector {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Introspector for SlowIntrospector {
    fn backend(&self) -> BackendKind {
        BackendKind::PostgreSql
    }

    async fn introspect(
        &self,
        _spec: &ConnectionSpec,
        _ctx: &IntrospectionContext,
    ) -> Result<Vec<Table>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let table = Table::new("orders").with_column(Column::new("id", "integer").primary_key())?;
        Ok(vec![table])
    }
}

fn spec() -> ConnectionSpec {
    resolve(
        BackendKind::PostgreSql,
        &ConnectionRequest::new("localhost").with_database("shop"),
    )
    .unwrap()
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_default_options_are_valid() {
    let options = IntrospectionOptions::default();
    assert!(options.validate().is_ok());
    assert_eq!(options.document_sample_size, 10);
    assert_eq!(options.key_sample_limit, 100);
    assert_eq!(options.field_type_strategy, FieldTypeStrategy::FirstOccurrence);
    assert!(options.include_examples);
    assert_eq!(options.connect_timeout, Duration::from_secs(30));
    assert!(options.deadline.is_none());
}

#[test]
fn test_invalid_options_rejected() {
    let cases = [
        IntrospectionOptions::default().with_document_sample_size(0),
        IntrospectionOptions::default().with_document_sample_size(5000),
        IntrospectionOptions::default().with_key_sample_limit(0),
        IntrospectionOptions::default().with_connect_timeout(Duration::ZERO),
        IntrospectionOptions::default().with_deadline(Duration::ZERO),
    ];
    for options in cases {
        let err = options.validate().unwrap_err();
        assert!(matches!(err, DataDictError::Configuration { .. }));
    }
}

#[test]
fn test_field_type_strategy_parsing() {
    assert_eq!(
        "first".parse::<FieldTypeStrategy>().unwrap(),
        FieldTypeStrategy::FirstOccurrence
    );
    assert_eq!(
        " Unanimous ".parse::<FieldTypeStrategy>().unwrap(),
        FieldTypeStrategy::Unanimous
    );
    assert!("majority".parse::<FieldTypeStrategy>().is_err());
}

// =============================================================================
// Factory
// =============================================================================

#[test]
fn test_create_introspector_for_compiled_backends() {
    for backend in BackendKind::ALL {
        match create_introspector(backend) {
            Ok(introspector) => {
                assert!(backend.is_enabled());
                assert_eq!(introspector.backend(), backend);
            }
            Err(e) => {
                assert!(!backend.is_enabled());
                assert!(matches!(e, DataDictError::UnsupportedBackend { .. }));
            }
        }
    }
}

#[tokio::test]
async fn test_introspect_rejects_invalid_options_before_connecting() {
    let options = IntrospectionOptions::default().with_key_sample_limit(0);
    let ctx = IntrospectionContext::new(options, Enricher::disabled());

    let err = introspect(BackendKind::PostgreSql, &spec(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, DataDictError::Configuration { .. }));
}

// =============================================================================
// Deadline and cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_completes_within_deadline() {
    let introspector = SlowIntrospector::new(Duration::from_secs(5));
    let ctx = IntrospectionContext::new(
        IntrospectionOptions::default().with_deadline(Duration::from_secs(10)),
        Enricher::disabled(),
    );

    let tables = run(&introspector, &spec(), &ctx).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "orders");
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_exceeded() {
    let introspector = SlowIntrospector::new(Duration::from_secs(60));
    let ctx = IntrospectionContext::new(
        IntrospectionOptions::default().with_deadline(Duration::from_secs(10)),
        Enricher::disabled(),
    );

    let err = run(&introspector, &spec(), &ctx).await.unwrap_err();
    match err {
        DataDictError::DeadlineExceeded { backend, after } => {
            assert_eq!(backend, BackendKind::PostgreSql);
            assert_eq!(after, Duration::from_secs(10));
        }
        other => panic!("expected DeadlineExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_cancelled() {
    let introspector = SlowIntrospector::new(Duration::from_secs(60));
    let token = CancellationToken::new();
    let ctx = IntrospectionContext::default().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let err = run(&introspector, &spec(), &ctx).await.unwrap_err();
    assert!(matches!(err, DataDictError::Cancelled { .. }));
    assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_run_already_cancelled_skips_work() {
    let introspector = SlowIntrospector::new(Duration::from_secs(60));
    let token = CancellationToken::new();
    token.cancel();
    let ctx = IntrospectionContext::default().with_cancellation(token);

    let err = run(&introspector, &spec(), &ctx).await.unwrap_err();
    assert!(matches!(err, DataDictError::Cancelled { .. }));
    assert_eq!(introspector.calls.load(Ordering::SeqCst), 0);
}
