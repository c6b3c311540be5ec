//! Core infrastructure tests.

mod common;

use common::{create_local_config, create_minimal_config, kg, write_config};
use fred::core::config::{Config, ConfigOverrides};
use fred::core::error::FredError;
use fred::core::runtime::{ComponentHealth, Runtime};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = create_minimal_config();
    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.node.id, "nodeA");
    assert_eq!(config.node.host, "localhost");
    assert_eq!(config.node.peering_port, 5555);
    assert!(config.node.seed);
    assert_eq!(config.nameservice.mode, "none");
    assert_eq!(config.storage.adaptor, "memory");
    assert!(config.peering_enabled());
}

#[test]
fn validate_rejects_bad_node_id() {
    let file = write_config("[node]\nid = \"node A\"\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("node.id"));
}

#[test]
fn validate_rejects_bad_host() {
    let file = write_config("[node]\nid = \"nodeA\"\nhost = \"not a host\"\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn validate_etcd_needs_endpoints() {
    let file = write_config(
        r#"
[node]
id = "nodeA"

[nameservice]
mode = "etcd"
"#,
    );
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("endpoints"));
}

#[test]
fn validate_rejects_unknown_modes() {
    let bad = [
        "[node]\nid = \"nodeA\"\n[nameservice]\nmode = \"zookeeper\"\n",
        "[node]\nid = \"nodeA\"\n[storage]\nadaptor = \"badger\"\n",
        "[node]\nid = \"nodeA\"\n[telemetry]\nlog_level = \"loud\"\n",
        "[node]\nid = \"nodeA\"\n[peering]\nbind = \"nowhere\"\n",
        "[node]\nid = \"nodeA\"\n[peering]\nmax_frame_bytes = 16\n",
    ];
    for content in bad {
        let file = write_config(content);
        assert!(Config::from_file(file.path()).is_err(), "accepted: {}", content);
    }
}

#[test]
fn missing_file_is_an_error() {
    assert!(Config::from_file(std::path::Path::new("/nonexistent/fred.toml")).is_err());
}

#[test]
fn overrides_replace_values() {
    let file = create_minimal_config();
    let mut config = Config::from_file(file.path()).unwrap();

    config.apply_overrides(&ConfigOverrides {
        log_level: Some("debug".into()),
        peering_bind: Some(String::new()),
        node_id: Some("nodeQ".into()),
    });

    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.node.id, "nodeQ");
    assert!(!config.peering_enabled());
    config.validate().unwrap();
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_status_codes_survive_the_wire() {
    let errors = [
        FredError::not_found("x"),
        FredError::conflict("x"),
        FredError::not_ready("x"),
        FredError::invalid("x"),
    ];
    for err in errors {
        let rebuilt = FredError::from_status(err.status_code(), "x");
        assert_eq!(rebuilt, err);
    }
    assert_eq!(FredError::transport("peer", "x").status_code(), 502);
    assert!(FredError::transport("peer", "x").is_retriable());
    assert!(!FredError::conflict("x").is_retriable());
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test]
async fn runtime_starts_and_stops() {
    let file = create_local_config("nodeA", true, "memory");
    let config = Config::from_file(file.path()).unwrap();
    let mut runtime = Runtime::new(config).unwrap();
    assert!(!runtime.is_running());

    runtime.start().await.unwrap();
    assert!(runtime.is_running());
    assert!(runtime.is_ready());
    assert_eq!(runtime.health().nameservice, ComponentHealth::Healthy);
    assert_eq!(runtime.health().peering, ComponentHealth::Healthy);
    assert!(runtime.peering_addr().is_some());

    let services = runtime.services().unwrap();
    assert_eq!(services.replication.get_self().unwrap().id.as_str(), "nodeA");
    let ns = services.replication.nameservice().unwrap();
    let (address, port) = ns
        .get_node_address(&common::nid("nodeA"))
        .await
        .unwrap();
    assert_eq!(address.as_str(), "127.0.0.1");
    assert_eq!(port, 5555);

    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
    assert!(runtime.services().is_none());
    assert_eq!(runtime.health().storage, ComponentHealth::Stopped);
    assert_eq!(runtime.health().peering, ComponentHealth::Stopped);
}

#[tokio::test]
async fn runtime_for_tests_has_no_listener() {
    let file = create_local_config("nodeA", true, "none");
    let config = Config::from_file(file.path()).unwrap();
    let mut runtime = Runtime::new(config).unwrap();

    runtime.start_for_tests().await.unwrap();
    assert!(runtime.is_ready());
    assert_eq!(runtime.health().peering, ComponentHealth::Disabled);
    assert_eq!(runtime.health().nameservice, ComponentHealth::Disabled);
    assert!(runtime.peering_addr().is_none());

    let external = runtime.services().unwrap().external.clone();
    let kg1 = kg("kg1");
    external.create_keygroup(&kg1).await.unwrap();
    external.update(&kg1, "item", "v").await.unwrap();
    assert_eq!(external.read(&kg1, "item").unwrap()[0].value, "v");

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn unseeded_runtime_is_alive_but_not_ready() {
    let file = create_local_config("nodeA", false, "none");
    let config = Config::from_file(file.path()).unwrap();
    let mut runtime = Runtime::new(config).unwrap();

    runtime.start_for_tests().await.unwrap();
    assert!(runtime.is_alive());
    assert!(!runtime.is_ready());
    assert_eq!(runtime.health().replication, ComponentHealth::Degraded);
    assert!(runtime
        .services()
        .unwrap()
        .replication
        .get_self()
        .unwrap_err()
        .is_not_ready());

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_request_ends_run() {
    let file = create_local_config("nodeA", true, "none");
    let config = Config::from_file(file.path()).unwrap();
    let mut runtime = Runtime::new(config).unwrap();
    let mut rx = runtime.shutdown_receiver();

    runtime.shutdown();
    rx.changed().await.unwrap();
    assert!(*rx.borrow());

    // A pending shutdown makes run() start and stop straight away.
    runtime.run().await.unwrap();
    assert!(!runtime.is_running());
}
