//! The native-graph client adapter, driven against an in-process mock
//! engine: every statement goes through the safe builder (ids and values
//! in the parameter map, only validated bounds in the text), and rows
//! decode into the same path shape the relational backend produces.

mod common;

use std::collections::VecDeque;

use parking_lot::Mutex;
use polystore::cypher::CypherStatement;
use polystore::prelude::*;
use serde_json::{json, Value};

/// Records executed statements and replays canned responses in order.
#[derive(Default)]
struct MockClient {
    statements: Mutex<Vec<CypherStatement>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
    transactions: Mutex<Vec<&'static str>>,
}

impl MockClient {
    fn queue_response(&self, rows: Vec<Row>) {
        self.responses.lock().push_back(rows);
    }

    fn executed(&self) -> Vec<CypherStatement> {
        self.statements.lock().clone()
    }
}

impl GraphClient for MockClient {
    fn execute(&self, statement: &CypherStatement) -> StorageResult<Vec<Row>> {
        self.statements.lock().push(statement.clone());
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }

    fn begin_transaction(&self) -> StorageResult<()> {
        self.transactions.lock().push("begin");
        Ok(())
    }

    fn commit_transaction(&self) -> StorageResult<()> {
        self.transactions.lock().push("commit");
        Ok(())
    }

    fn rollback_transaction(&self) -> StorageResult<()> {
        self.transactions.lock().push("rollback");
        Ok(())
    }
}

fn store() -> GraphClientStore<MockClient> {
    GraphClientStore::new(
        MockClient::default(),
        GraphClientConfig::builder().database("bolt://localhost:7687").build(),
    )
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[test]
fn add_node_parameterizes_everything() {
    let store = store();
    store
        .add_node(GraphNode::new("n1", "Person").with_property("name", json!("Ada")))
        .unwrap();

    let executed = store.client().executed();
    assert_eq!(executed.len(), 1);
    let statement = &executed[0];
    assert!(statement.text.contains("MERGE"));
    assert_eq!(statement.params["id"], json!("n1"));
    assert_eq!(statement.params["type"], json!("Person"));
    // The property payload travels as a parameter, never in the text.
    assert!(!statement.text.contains("Ada"));
    assert_eq!(statement.params["data"]["name"], json!("Ada"));
}

#[test]
fn traversal_statement_embeds_only_bounds() {
    let store = store();
    let mut pattern = TraversalPattern::new("start'); DETACH DELETE n; //", Direction::Outgoing, 3);
    pattern.edge_types = Some(vec!["CONNECTS".to_owned()]);
    store.traverse(&pattern).unwrap();

    let executed = store.client().executed();
    let statement = &executed[0];
    assert!(statement.text.contains("*1..3"));
    assert!(statement.text.contains("LIMIT 100"));
    assert!(!statement.text.contains("DETACH DELETE n"));
    assert_eq!(statement.params["start"], json!("start'); DETACH DELETE n; //"));
}

#[test]
fn traversal_rows_decode_to_shared_path_shape() {
    let store = store();
    let path_value = json!({
        "nodes": [
            {"id": "A", "type": "Station", "data": {"label": "A"}},
            {"id": "B", "type": "Station", "data": {}}
        ],
        "edges": [
            {"from": "A", "to": "B", "type": "CONNECTS", "data": {"weight": 2}}
        ]
    });
    store
        .client()
        .queue_response(vec![row(&[("p", path_value), ("path_length", json!(1))])]);

    let paths = store
        .traverse(&TraversalPattern::new("A", Direction::Outgoing, 2))
        .unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].node_ids(), vec!["A", "B"]);
    assert_eq!(paths[0].length(), 1);
    assert_eq!(paths[0].edges[0].edge_type, "CONNECTS");
    assert_eq!(paths[0].edges[0].properties["weight"], json!(2));
}

#[test]
fn undecodable_rows_are_dropped_not_fatal() {
    let store = store();
    store.client().queue_response(vec![
        row(&[("p", json!({"nodes": "not-an-array"}))]),
        row(&[("unrelated", json!(1))]),
    ]);
    let paths = store
        .traverse(&TraversalPattern::new("A", Direction::Both, 2))
        .unwrap();
    assert!(paths.is_empty());
}

#[test]
fn shortest_path_defaults_limit_one() {
    let store = store();
    store.client().queue_response(vec![row(&[(
        "p",
        json!({
            "nodes": [
                {"id": "A", "type": "T", "data": {}},
                {"id": "C", "type": "T", "data": {}}
            ],
            "edges": [{"from": "A", "to": "C", "type": "E", "data": {}}]
        }),
    )])]);
    let path = store.shortest_path("A", "C", None).unwrap().unwrap();
    assert_eq!(path.length(), 1);

    let executed = store.client().executed();
    assert!(executed[0].text.contains("shortestPath"));
    assert!(executed[0].text.ends_with("LIMIT 1"));
}

#[test]
fn depth_validation_matches_the_relational_backend() {
    let store = store();
    assert_eq!(
        store.find_connected("x", 0).unwrap_err().kind(),
        ErrorKind::InvalidValue
    );
    assert_eq!(
        store.find_connected("x", 51).unwrap_err().kind(),
        ErrorKind::InvalidValue
    );
    // Nothing reached the engine.
    assert!(store.client().executed().is_empty());
}

#[test]
fn delete_node_reports_absence() {
    let store = store();
    // get_node lookup returns nothing.
    store.client().queue_response(Vec::new());
    assert!(!store.delete_node("ghost").unwrap());

    // Present node: lookup row, then the delete statement.
    store
        .client()
        .queue_response(vec![row(&[("n", json!({"id": "n1", "type": "T", "data": {}}))])]);
    assert!(store.delete_node("n1").unwrap());
    let executed = store.client().executed();
    assert!(executed.last().unwrap().text.contains("DETACH DELETE"));
}

#[test]
fn transactions_drive_the_client_session() {
    let store = store();
    GraphStorage::transaction(&store, &mut || {
        store.add_node(GraphNode::new("n1", "T"))?;
        Ok(())
    })
    .unwrap();
    assert_eq!(*store.client().transactions.lock(), vec!["begin", "commit"]);

    let result = GraphStorage::transaction(&store, &mut || {
        Err(StorageError::write_failed("abort"))
    });
    assert!(result.is_err());
    assert_eq!(
        *store.client().transactions.lock(),
        vec!["begin", "commit", "begin", "rollback"]
    );
}

#[test]
fn unsupported_capabilities_answer_not_implemented() {
    let store = store();
    assert_eq!(
        store.create_index("Person", "name").unwrap_err().kind(),
        ErrorKind::NotImplemented
    );
    assert_eq!(store.list_indexes().unwrap_err().kind(), ErrorKind::NotImplemented);
}

#[test]
fn execute_query_converts_positional_placeholders() {
    let store = store();
    store.client().queue_response(vec![row(&[("n", json!(1))])]);
    let envelope = store.execute_query("MATCH (n) WHERE n.id = ? RETURN n LIMIT ?", &[json!("a"), json!(5)]);
    assert!(envelope.is_ok());

    let executed = store.client().executed();
    assert!(executed[0].text.contains("$1"));
    assert!(executed[0].text.contains("$2"));
    assert_eq!(executed[0].params["1"], json!("a"));
    assert_eq!(executed[0].params["2"], json!(5));
}

#[test]
fn graph_stats_decode_counts() {
    let store = store();
    store.client().queue_response(vec![row(&[("n", json!(7))])]);
    store.client().queue_response(vec![row(&[("n", json!(9))])]);
    store
        .client()
        .queue_response(vec![row(&[("kind", json!("Person")), ("n", json!(7))])]);
    store
        .client()
        .queue_response(vec![row(&[("kind", json!("KNOWS")), ("n", json!(9))])]);

    let stats = store.get_graph_stats().unwrap();
    assert_eq!(stats.node_count, 7);
    assert_eq!(stats.edge_count, 9);
    assert_eq!(stats.nodes_by_type["Person"], json!(7));
    assert_eq!(stats.edges_by_type["KNOWS"], json!(9));
}
