//! Peering over real TCP listeners.

mod common;

use common::{create_local_config, kg, nid};
use fred::core::config::Config;
use fred::core::runtime::Runtime;
use fred::peering::{PeeringClient, TcpPeeringClient};
use fred::replication::{Address, Node};
use std::sync::atomic::Ordering;
use std::time::Duration;

async fn start(id: &str, seed: bool) -> Runtime {
    let file = create_local_config(id, seed, "none");
    let config = Config::from_file(file.path()).unwrap();
    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    runtime
}

fn client() -> TcpPeeringClient {
    TcpPeeringClient::new(
        4 * 1024 * 1024,
        Duration::from_millis(500),
        Duration::from_secs(1),
    )
}

// ============================================================================
// Runtime to runtime
// ============================================================================

#[tokio::test]
async fn relay_between_runtimes_over_tcp() {
    let mut a = start("nodeA", true).await;
    let mut b = start("nodeB", false).await;
    assert!(a.is_ready());
    assert!(!b.is_ready());

    let b_port = b.peering_addr().unwrap().port();
    let node_b = Node::parse("nodeB", "127.0.0.1", b_port).unwrap();
    let kg1 = kg("kg1");

    let a_services = a.services().unwrap().clone();
    let b_services = b.services().unwrap().clone();

    a_services.external.create_keygroup(&kg1).await.unwrap();
    a_services.external.add_nodes(vec![node_b]).await.unwrap();
    assert_eq!(b_services.replication.get_self().unwrap().port, b_port);

    a_services
        .external
        .add_keygroup_replica(&kg1, &nid("nodeB"))
        .await
        .unwrap();
    a_services
        .external
        .update(&kg1, "item", "over-the-wire")
        .await
        .unwrap();

    let items = b_services.data.read(&kg1, "item").unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].value, "over-the-wire");
    assert_eq!(items[0].version.get("nodeA"), 1);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
    assert!(a.peering_addr().is_none());
}

#[tokio::test]
async fn rejected_request_reports_status_code() {
    let mut b = start("nodeB", true).await;
    let port = b.peering_addr().unwrap().port();
    let address = Address::parse("127.0.0.1").unwrap();
    let client = client();

    let stranger = Node::parse("nodeZ", "127.0.0.1", 9).unwrap();
    let err = client
        .send_add_replica(&address, port, &kg("missing"), &stranger)
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert!(err.to_string().contains("404"));
    assert_eq!(client.metrics().requests_failed.load(Ordering::Relaxed), 1);

    client
        .send_create_keygroup(&address, port, &kg("kg1"), &[])
        .await
        .unwrap();
    assert_eq!(client.metrics().requests_ok.load(Ordering::Relaxed), 1);
    assert!(b
        .services()
        .unwrap()
        .replication
        .registry()
        .exists_keygroup(&kg("kg1")));

    b.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_runtime_is_unreachable() {
    let mut b = start("nodeB", true).await;
    let port = b.peering_addr().unwrap().port();
    b.stop().await.unwrap();

    let err = client()
        .send_delete_keygroup(&Address::parse("127.0.0.1").unwrap(), port, &kg("kg1"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}
