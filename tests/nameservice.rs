//! Name service tests with several nodes sharing one coordination store.

mod common;

use common::{kg, local_node, nid};
use fred::nameservice::{CoordinationStore, MemoryCoordinationStore, NameService};
use fred::replication::Address;
use std::sync::Arc;

fn clients(ids: &[&str]) -> (Arc<MemoryCoordinationStore>, Vec<NameService>) {
    let store = Arc::new(MemoryCoordinationStore::new());
    let clients = ids
        .iter()
        .map(|id| {
            let shared: Arc<dyn CoordinationStore> = store.clone();
            NameService::new(shared, nid(id))
        })
        .collect();
    (store, clients)
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn membership_is_shared_between_clients() {
    let (_, ns) = clients(&["nodeA", "nodeB"]);
    let kg1 = kg("kg1");

    ns[0]
        .register_self(&Address::parse("localhost").unwrap(), 9000)
        .await
        .unwrap();
    ns[1]
        .register_self(&Address::parse("10.0.0.2").unwrap(), 9001)
        .await
        .unwrap();

    ns[0].create_keygroup(&kg1).await.unwrap();
    assert!(ns[1].exists_keygroup(&kg1).await.unwrap());
    ns[1].join_keygroup(&kg1).await.unwrap();

    assert_eq!(
        ns[0].get_keygroup_members(&kg1, true).await.unwrap(),
        vec![nid("nodeB")]
    );
    assert_eq!(
        ns[1].get_keygroup_members(&kg1, false).await.unwrap(),
        vec![nid("nodeA"), nid("nodeB")]
    );
    assert!(ns[0].is_keygroup_member(&nid("nodeB"), &kg1).await.unwrap());

    ns[1].exit_keygroup(&kg1).await.unwrap();
    assert!(!ns[0].is_keygroup_member(&nid("nodeB"), &kg1).await.unwrap());
    assert!(ns[0]
        .get_keygroup_members(&kg1, true)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn second_create_conflicts_until_deleted() {
    let (_, ns) = clients(&["nodeA", "nodeB"]);
    let kg1 = kg("kg1");

    ns[0].create_keygroup(&kg1).await.unwrap();
    assert!(ns[1].create_keygroup(&kg1).await.unwrap_err().is_conflict());

    ns[0].delete_keygroup(&kg1).await.unwrap();
    assert!(!ns[1].exists_keygroup(&kg1).await.unwrap());
    assert!(ns[1].join_keygroup(&kg1).await.unwrap_err().is_not_found());

    ns[1].create_keygroup(&kg1).await.unwrap();
    assert_eq!(
        ns[0].get_keygroup_members(&kg1, false).await.unwrap(),
        vec![nid("nodeB")]
    );
}

#[tokio::test]
async fn joining_another_node_needs_its_address() {
    let (_, ns) = clients(&["nodeA"]);
    let kg1 = kg("kg1");
    ns[0].create_keygroup(&kg1).await.unwrap();

    let err = ns[0]
        .join_other_node_into_keygroup(&kg1, &nid("nodeB"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    ns[0]
        .register_other_node(&local_node("nodeB", 9001))
        .await
        .unwrap();
    ns[0]
        .join_other_node_into_keygroup(&kg1, &nid("nodeB"))
        .await
        .unwrap();
    assert!(ns[0].is_keygroup_member(&nid("nodeB"), &kg1).await.unwrap());
}

// ============================================================================
// Addresses
// ============================================================================

#[tokio::test]
async fn all_nodes_sorted_by_id() {
    let (_, ns) = clients(&["nodeA"]);

    ns[0].register_other_node(&local_node("nodeC", 9002)).await.unwrap();
    ns[0]
        .register_self(&Address::parse("::1").unwrap(), 9000)
        .await
        .unwrap();
    ns[0].register_other_node(&local_node("nodeB", 9001)).await.unwrap();

    let nodes = ns[0].get_all_nodes().await.unwrap();
    let ids: Vec<_> = nodes.iter().map(|n| n.id.to_string()).collect();
    assert_eq!(ids, vec!["nodeA", "nodeB", "nodeC"]);
    assert_eq!(nodes[0].address.as_str(), "::1");
    assert_eq!(nodes[0].port, 9000);

    let (address, port) = ns[0].get_node_address(&nid("nodeC")).await.unwrap();
    assert_eq!(address.as_str(), "localhost");
    assert_eq!(port, 9002);
}

#[tokio::test]
async fn malformed_address_record_is_decode_error() {
    let (store, ns) = clients(&["nodeA"]);
    store.put("node-nodeB-address", "not-an-endpoint").await.unwrap();

    let err = ns[0].get_node_address(&nid("nodeB")).await.unwrap_err();
    assert!(matches!(err, fred::FredError::Decode { .. }));
    assert!(ns[0]
        .get_node_address(&nid("nodeC"))
        .await
        .unwrap_err()
        .is_not_found());
}
