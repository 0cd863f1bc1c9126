//! Unit tests for connection spec resolution.

use super::*;

fn discrete(spec: ConnectionSpec) -> DiscreteParams {
    match spec {
        ConnectionSpec::Discrete(params) => params,
        ConnectionSpec::Raw(raw) => panic!("expected discrete params, got {:?}", raw),
    }
}

// =============================================================================
// Discrete parameters
// =============================================================================

#[test]
fn test_default_ports_applied() {
    for backend in BackendKind::ALL {
        let request = ConnectionRequest::new("db.internal").with_database("app");
        let params = discrete(resolve(backend, &request).unwrap());
        assert_eq!(params.port, backend.default_port(), "backend {}", backend);
        assert_eq!(params.host, "db.internal");
    }
}

#[test]
fn test_explicit_port_kept() {
    let request = ConnectionRequest::new("db")
        .with_database("app")
        .with_port(15432);
    let params = discrete(resolve(BackendKind::PostgreSql, &request).unwrap());
    assert_eq!(params.port, 15432);
}

#[test]
fn test_zero_port_is_invalid() {
    let request = ConnectionRequest::new("db").with_database("app").with_port(0);
    let err = resolve(BackendKind::MySql, &request).unwrap_err();
    assert!(matches!(err, DataDictError::InvalidSpec { .. }));
}

#[test]
fn test_missing_host_is_invalid() {
    let request = ConnectionRequest::default().with_database("app");
    for backend in BackendKind::ALL {
        let err = resolve(backend, &request).unwrap_err();
        assert!(matches!(err, DataDictError::InvalidSpec { .. }));
    }
}

#[test]
fn test_blank_host_is_invalid() {
    let request = ConnectionRequest::new("   ").with_database("app");
    assert!(resolve(BackendKind::SqlServer, &request).is_err());
}

#[test]
fn test_relational_and_document_require_database() {
    let request = ConnectionRequest::new("db");
    for backend in [
        BackendKind::SqlServer,
        BackendKind::PostgreSql,
        BackendKind::MySql,
        BackendKind::MongoDb,
    ] {
        let err = resolve(backend, &request).unwrap_err();
        assert!(err.to_string().contains("database name"), "{}", err);
    }
}

#[test]
fn test_cassandra_and_redis_need_only_host() {
    let request = ConnectionRequest::new("node1");
    assert!(resolve(BackendKind::Cassandra, &request).is_ok());
    assert!(resolve(BackendKind::Redis, &request).is_ok());
}

#[test]
fn test_document_auth_source_defaults_to_admin() {
    let request = ConnectionRequest::new("mongo").with_database("shop");
    let params = discrete(resolve(BackendKind::MongoDb, &request).unwrap());
    assert_eq!(
        params.extras,
        BackendExtras::Document {
            auth_source: "admin".to_string()
        }
    );

    let request = request.with_auth_source("shop");
    let params = discrete(resolve(BackendKind::MongoDb, &request).unwrap());
    assert_eq!(
        params.extras,
        BackendExtras::Document {
            auth_source: "shop".to_string()
        }
    );
}

#[test]
fn test_column_family_extras() {
    let request = ConnectionRequest::new("node1")
        .with_keyspace("inventory")
        .with_data_center("dc-east");
    let params = discrete(resolve(BackendKind::Cassandra, &request).unwrap());
    assert_eq!(
        params.extras,
        BackendExtras::ColumnFamily {
            keyspace: Some("inventory".to_string()),
            data_center: Some("dc-east".to_string()),
        }
    );
}

#[test]
fn test_key_value_extras() {
    let request = ConnectionRequest::new("cache")
        .with_redis_database(3)
        .with_ssl(true);
    let params = discrete(resolve(BackendKind::Redis, &request).unwrap());
    assert_eq!(
        params.extras,
        BackendExtras::KeyValue {
            database_index: 3,
            use_tls: true
        }
    );
}

#[test]
fn test_negative_redis_index_is_invalid() {
    let request = ConnectionRequest::new("cache").with_redis_database(-1);
    let err = resolve(BackendKind::Redis, &request).unwrap_err();
    assert!(matches!(err, DataDictError::InvalidSpec { .. }));
}

#[test]
fn test_credentials_carried() {
    let request = ConnectionRequest::new("db")
        .with_database("app")
        .with_user("reader")
        .with_password("pw");
    let params = discrete(resolve(BackendKind::SqlServer, &request).unwrap());
    assert_eq!(params.credentials.username(), "reader");
    assert_eq!(params.credentials.password(), Some("pw"));
}

// =============================================================================
// Raw descriptors
// =============================================================================

#[test]
fn test_raw_descriptor_takes_precedence() {
    let request = ConnectionRequest::new("ignored-host")
        .with_database("ignored")
        .with_port(1)
        .with_connection_string("postgres://u:p@real-host:5433/real_db");

    let spec = resolve(BackendKind::PostgreSql, &request).unwrap();
    assert!(spec.is_raw());
    assert_eq!(spec.database_name().as_deref(), Some("real_db"));
}

#[test]
fn test_blank_raw_descriptor_falls_back_to_discrete() {
    let request = ConnectionRequest::new("db")
        .with_database("app")
        .with_connection_string("   ");
    let spec = resolve(BackendKind::MySql, &request).unwrap();
    assert!(!spec.is_raw());
}

#[test]
fn test_raw_descriptor_scheme_checked() {
    let request = ConnectionRequest::raw("mysql://u@h/db");
    let err = resolve(BackendKind::PostgreSql, &request).unwrap_err();
    assert!(matches!(err, DataDictError::InvalidSpec { .. }));
    assert!(resolve(BackendKind::MySql, &request).is_ok());
}

#[test]
fn test_raw_mongo_requires_database() {
    assert!(resolve(BackendKind::MongoDb, &ConnectionRequest::raw("mongodb://h:27017")).is_err());
    assert!(resolve(BackendKind::MongoDb, &ConnectionRequest::raw("mongodb://h:27017/shop")).is_ok());
    assert!(
        resolve(
            BackendKind::MongoDb,
            &ConnectionRequest::raw("mongodb+srv://cluster.example.com/shop")
        )
        .is_ok()
    );
}

#[test]
fn test_raw_redis_schemes() {
    assert!(resolve(BackendKind::Redis, &ConnectionRequest::raw("redis://cache:6379/0")).is_ok());
    assert!(resolve(BackendKind::Redis, &ConnectionRequest::raw("rediss://cache:6380/1")).is_ok());
    assert!(resolve(BackendKind::Redis, &ConnectionRequest::raw("http://cache")).is_err());
}

#[test]
fn test_raw_sql_server_ado_string() {
    let request = ConnectionRequest::raw(
        "Server=tcp:sql.internal,1433;Database=Sales;User Id=sa;Password=secret;",
    );
    let spec = resolve(BackendKind::SqlServer, &request).unwrap();
    assert_eq!(spec.database_name().as_deref(), Some("Sales"));

    let missing = ConnectionRequest::raw("Database=Sales;User Id=sa;");
    assert!(resolve(BackendKind::SqlServer, &missing).is_err());
}

#[test]
fn test_raw_cassandra_contact_points() {
    let request = ConnectionRequest::raw("node1:9042, node2");
    assert!(resolve(BackendKind::Cassandra, &request).is_ok());

    assert!(resolve(BackendKind::Cassandra, &ConnectionRequest::raw("node1,,node2")).is_err());
    assert!(resolve(BackendKind::Cassandra, &ConnectionRequest::raw("node1:abc")).is_err());
    assert!(resolve(BackendKind::Cassandra, &ConnectionRequest::raw("node1:0")).is_err());
}

#[test]
fn test_raw_database_name_follows_backend_format() {
    let cluster = resolve(BackendKind::Cassandra, &ConnectionRequest::raw("cass1.internal:9042")).unwrap();
    assert_eq!(cluster.database_name(), None);

    let pg = resolve(BackendKind::PostgreSql, &ConnectionRequest::raw("postgres://u@h:5432/crm")).unwrap();
    assert_eq!(pg.database_name().as_deref(), Some("crm"));

    let redis = resolve(BackendKind::Redis, &ConnectionRequest::raw("redis://cache:6379/3")).unwrap();
    assert_eq!(redis.database_name().as_deref(), Some("3"));
}

#[test]
fn test_parse_contact_points() {
    let points = parse_contact_points("a:9042,b").unwrap();
    assert_eq!(points, vec!["a:9042".to_string(), "b".to_string()]);
}

// =============================================================================
// Redaction
// =============================================================================

#[test]
fn test_raw_descriptor_debug_is_redacted() {
    let request = ConnectionRequest::raw("postgres://u:topsecret@h/db");
    let spec = resolve(BackendKind::PostgreSql, &request).unwrap();

    assert!(!format!("{:?}", spec).contains("topsecret"));
    assert!(!spec.to_string().contains("topsecret"));
    assert!(!format!("{:?}", request).contains("topsecret"));
}

#[test]
fn test_request_debug_hides_password() {
    let request = ConnectionRequest::new("h").with_password("hunter2");
    let debug = format!("{:?}", request);
    assert!(!debug.contains("hunter2"));
}

#[test]
fn test_request_deserializes_with_host_alias() {
    let request: ConnectionRequest = serde_json::from_str(
        r#"{"host": "db", "database": "app", "redis_database": 2, "use_ssl": true}"#,
    )
    .unwrap();
    assert_eq!(request.server.as_deref(), Some("db"));
    assert_eq!(request.redis_database, Some(2));
    assert!(request.use_ssl);
}

#[test]
fn test_discrete_display_omits_credentials() {
    let request = ConnectionRequest::new("db")
        .with_database("app")
        .with_user("u")
        .with_password("p4ss");
    let spec = resolve(BackendKind::PostgreSql, &request).unwrap();
    assert_eq!(spec.to_string(), "db:5432/app");
}
