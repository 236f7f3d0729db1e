//! Graph traversal properties on the relational backend:
//!
//! - Traversal returns exactly the expected paths (scenario: A→B→C).
//! - Shortest path is BFS-optimal on an unweighted diamond graph.
//! - Depth validation fails fast with `InvalidValue`.
//! - Cycle safety: no returned path revisits a node.
//! - Termination: results stay within the configured limits.

#![cfg(feature = "relational")]

mod common;

use polystore::prelude::*;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn traversal_on_a_chain() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    for id in ["A", "B", "C"] {
        store.add_node(GraphNode::new(id, "Station")).unwrap();
    }
    store.add_edge(GraphEdge::new("A", "B", "CONNECTS")).unwrap();
    store.add_edge(GraphEdge::new("B", "C", "CONNECTS")).unwrap();

    let mut pattern = TraversalPattern::new("A", Direction::Outgoing, 2);
    pattern.edge_types = Some(vec!["CONNECTS".to_owned()]);
    let paths = store.traverse(&pattern).unwrap();

    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].node_ids(), vec!["A", "B"]);
    assert_eq!(paths[1].node_ids(), vec!["A", "B", "C"]);
    assert_eq!(paths[0].length(), 1);
    assert_eq!(paths[1].length(), 2);
    // Edge accumulators carry the real edges.
    assert_eq!(paths[1].edges[1].edge_type, "CONNECTS");
}

#[test]
fn traversal_respects_edge_type_filter() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    for id in ["A", "B", "C"] {
        store.add_node(GraphNode::new(id, "Station")).unwrap();
    }
    store.add_edge(GraphEdge::new("A", "B", "CONNECTS")).unwrap();
    store.add_edge(GraphEdge::new("A", "C", "IGNORES")).unwrap();

    let mut pattern = TraversalPattern::new("A", Direction::Outgoing, 3);
    pattern.edge_types = Some(vec!["CONNECTS".to_owned()]);
    let paths = store.traverse(&pattern).unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].node_ids(), vec!["A", "B"]);
}

#[test]
fn incoming_direction_walks_reverse_edges() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    for id in ["A", "B"] {
        store.add_node(GraphNode::new(id, "Station")).unwrap();
    }
    store.add_edge(GraphEdge::new("A", "B", "CONNECTS")).unwrap();

    let pattern = TraversalPattern::new("B", Direction::Incoming, 1);
    let paths = store.traverse(&pattern).unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].node_ids(), vec!["B", "A"]);
}

#[test]
fn shortest_path_is_bfs_optimal() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    common::seed_diamond_graph(&store);

    let path = store.shortest_path("A", "C", None).unwrap().expect("path exists");
    assert_eq!(path.length(), 2);
    assert_eq!(path.nodes.len(), 3);
    assert_eq!(path.nodes[0].id, "A");
    assert_eq!(path.nodes[2].id, "C");
    // The middle node is either branch of the diamond.
    assert!(path.nodes[1].id == "B" || path.nodes[1].id == "D");
    // Every hop is backed by a real edge.
    assert_eq!(path.edges.len(), 2);
}

#[test]
fn shortest_path_absent_when_disconnected() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    store.add_node(GraphNode::new("lonely", "Station")).unwrap();
    store.add_node(GraphNode::new("island", "Station")).unwrap();
    assert!(store.shortest_path("lonely", "island", None).unwrap().is_none());
}

#[test]
fn depth_validation_fails_fast() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    let err = store.find_connected("x", 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    let err = store.find_connected("x", 51).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);

    let pattern = TraversalPattern::new("x", Direction::Both, 0);
    assert_eq!(store.traverse(&pattern).unwrap_err().kind(), ErrorKind::InvalidValue);
}

#[test]
fn cycles_never_revisit_a_node() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    for id in ["A", "B", "C"] {
        store.add_node(GraphNode::new(id, "Station")).unwrap();
    }
    // A -> B -> A cycle, plus an exit edge.
    store.add_edge(GraphEdge::new("A", "B", "LOOP")).unwrap();
    store.add_edge(GraphEdge::new("B", "A", "LOOP")).unwrap();
    store.add_edge(GraphEdge::new("B", "C", "LOOP")).unwrap();

    let pattern = TraversalPattern::new("A", Direction::Outgoing, 10);
    let paths = store.traverse(&pattern).unwrap();
    assert!(!paths.is_empty());
    for path in &paths {
        let mut seen = std::collections::HashSet::new();
        for id in path.node_ids() {
            assert!(seen.insert(id.to_owned()), "path revisits {id}");
        }
    }
}

#[test]
fn traversal_terminates_within_result_limit() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    // A fan: root connects to 20 leaves.
    store.add_node(GraphNode::new("root", "Station")).unwrap();
    for i in 0..20 {
        let leaf = format!("leaf_{i}");
        store.add_node(GraphNode::new(&leaf, "Station")).unwrap();
        store.add_edge(GraphEdge::new("root", &leaf, "CONNECTS")).unwrap();
    }
    let mut pattern = TraversalPattern::new("root", Direction::Outgoing, 5);
    pattern.result_limit = Some(7);
    let paths = store.traverse(&pattern).unwrap();
    assert_eq!(paths.len(), 7);
}

#[test]
fn find_connected_excludes_start_and_respects_depth() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    common::seed_diamond_graph(&store);

    let mut direct: Vec<String> = store
        .find_connected("A", 1)
        .unwrap()
        .into_iter()
        .map(|node| node.id)
        .collect();
    direct.sort();
    assert_eq!(direct, ["B", "D"]);

    let mut all: Vec<String> = store
        .find_connected("A", 2)
        .unwrap()
        .into_iter()
        .map(|node| node.id)
        .collect();
    all.sort();
    assert_eq!(all, ["B", "C", "D"]);
    assert!(!all.contains(&"A".to_owned()));
}

#[test]
fn deleting_a_node_cascades_its_edges() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    common::seed_diamond_graph(&store);

    assert!(store.delete_node("B").unwrap());
    assert!(!store.delete_node("B").unwrap(), "second delete reports absence");
    assert!(store.get_edge("A", "B", "CONNECTS").unwrap().is_none());
    assert!(store.get_edge("B", "C", "CONNECTS").unwrap().is_none());

    // The other branch still routes.
    let path = store.shortest_path("A", "C", None).unwrap().expect("diamond has a second branch");
    assert_eq!(path.nodes[1].id, "D");
}

#[test]
fn node_and_edge_crud() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    let node = GraphNode::new("n1", "Person").with_property("name", json!("Ada"));
    store.add_node(node).unwrap();

    let fetched = store.get_node("n1").unwrap().unwrap();
    assert_eq!(fetched.node_type, "Person");
    assert_eq!(fetched.properties["name"], json!("Ada"));

    let mut update = serde_json::Map::new();
    update.insert("name".into(), json!("Grace"));
    assert!(store.update_node("n1", update).unwrap());
    assert_eq!(store.get_node("n1").unwrap().unwrap().properties["name"], json!("Grace"));

    store.add_node(GraphNode::new("n2", "Person")).unwrap();
    let mut edge = GraphEdge::new("n1", "n2", "KNOWS");
    edge.properties.insert("since".into(), json!(1999));
    store.add_edge(edge).unwrap();

    let edges = store.get_edges("n1", None).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].properties["since"], json!(1999));

    let mut update = serde_json::Map::new();
    update.insert("since".into(), json!(2001));
    assert!(store.update_edge("n1", "n2", "KNOWS", update).unwrap());
    assert_eq!(
        store.get_edge("n1", "n2", "KNOWS").unwrap().unwrap().properties["since"],
        json!(2001)
    );

    assert!(store.delete_edge("n1", "n2", "KNOWS").unwrap());
    assert!(!store.delete_edge("n1", "n2", "KNOWS").unwrap());
}

#[test]
fn edges_to_missing_endpoints_are_write_failures() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    store.add_node(GraphNode::new("present", "Station")).unwrap();
    let err = store
        .add_edge(GraphEdge::new("present", "ghost", "CONNECTS"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteFailed);
}

#[test]
fn query_nodes_by_type_and_property() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    store
        .add_node(GraphNode::new("p1", "Person").with_property("city", json!("Lagos")))
        .unwrap();
    store
        .add_node(GraphNode::new("p2", "Person").with_property("city", json!("Accra")))
        .unwrap();
    store.add_node(GraphNode::new("s1", "Station")).unwrap();

    let people = store.query_nodes(Some("Person"), &serde_json::Map::new()).unwrap();
    assert_eq!(people.len(), 2);

    let mut filters = serde_json::Map::new();
    filters.insert("city".into(), json!("Lagos"));
    let lagos = store.query_nodes(Some("Person"), &filters).unwrap();
    assert_eq!(lagos.len(), 1);
    assert_eq!(lagos[0].id, "p1");

    // Hostile filter fields are rejected, not interpolated.
    let mut hostile = serde_json::Map::new();
    hostile.insert("city') OR 1=1 --".into(), json!("x"));
    assert!(store.query_nodes(None, &hostile).is_err());
}

#[test]
fn pattern_match_and_stats_and_bulk() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    common::seed_diamond_graph(&store);

    let pattern = GraphPattern {
        edge_type: Some("CONNECTS".to_owned()),
        node_type: Some("Station".to_owned()),
        ..GraphPattern::default()
    };
    let matches = store.find_by_pattern(&pattern).unwrap();
    assert_eq!(matches.len(), 4);
    assert!(matches.iter().all(|p| p.nodes.len() == 2 && p.edges.len() == 1));

    let stats = store.get_graph_stats().unwrap();
    assert_eq!(stats.node_count, 4);
    assert_eq!(stats.edge_count, 4);
    assert_eq!(stats.nodes_by_type["Station"], json!(4));
    assert_eq!(stats.edges_by_type["CONNECTS"], json!(4));

    let result = store
        .batch_graph_operations(vec![
            GraphOperation::AddNode(GraphNode::new("E", "Station")),
            GraphOperation::AddEdge(GraphEdge::new("C", "E", "CONNECTS")),
            GraphOperation::DeleteNode { id: "ghost".to_owned() },
        ])
        .unwrap();
    assert!(result.success, "delete of a missing node is false, not an error");
    assert_eq!(result.operations, 3);
    assert_eq!(store.get_graph_stats().unwrap().node_count, 5);
}

#[test]
fn stream_episodes_links_sequentially() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    let episodes: Vec<serde_json::Map<String, serde_json::Value>> = (0..3)
        .map(|i| {
            let mut map = serde_json::Map::new();
            map.insert("seq".into(), json!(i));
            map
        })
        .collect();
    let ids = store.stream_episodes("episode", episodes).unwrap();
    assert_eq!(ids.len(), 3);
    let edge = store.get_edge(&ids[0], &ids[1], "FOLLOWS").unwrap();
    assert!(edge.is_some());
    let edge = store.get_edge(&ids[1], &ids[2], "FOLLOWS").unwrap();
    assert!(edge.is_some());
}

#[test]
fn expression_indexes_are_created_and_listed() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    let name = store.create_index("Person", "city").unwrap();
    let indexes = store.list_indexes().unwrap();
    assert!(indexes.contains(&name), "{indexes:?}");
    assert!(store.create_index("bad type!", "city").is_err());
}

#[test]
fn execute_query_returns_envelope() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    common::seed_diamond_graph(&store);

    let envelope = store.execute_query(
        "SELECT id FROM nodes WHERE node_type = ? ORDER BY id",
        &[json!("Station")],
    );
    assert!(envelope.is_ok());
    assert_eq!(envelope.data.len(), 4);
    assert_eq!(envelope.data[0]["id"], json!("A"));
    assert!(!envelope.metadata.from_cache);

    let envelope = store.execute_query("SELECT * FROM no_such_table", &[]);
    assert!(!envelope.is_ok());
    assert!(envelope.data.is_empty());
}
