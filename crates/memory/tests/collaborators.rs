use std::collections::HashMap;

use tw_domain::config::{MemoryConfig, MemoryTransport};
use tw_memory::create_collaborators;

#[tokio::test]
async fn local_transport_round_trips_a_memory() {
    let collab = create_collaborators(&MemoryConfig::default()).unwrap();

    let mut metadata = HashMap::new();
    metadata.insert("topic".to_string(), serde_json::json!("editor"));
    let stored = collab
        .memory
        .create("User edits code in Helix", "preference", metadata)
        .await
        .unwrap();
    assert!(!stored.id.is_empty());

    let hits = collab.memory.search("which editor, helix?", 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, stored.id);
    assert_eq!(hits[0].metadata["topic"], "editor");

    assert!(collab.goals.list_active().await.unwrap().is_empty());
}

#[test]
fn rest_transport_builds_without_network() {
    let cfg = MemoryConfig {
        transport: MemoryTransport::Rest,
        ..Default::default()
    };
    assert!(create_collaborators(&cfg).is_ok());
}
