//! Semantic/OLAP surface on the columnar backend: declarative queries,
//! aggregation, grouping, materialized views, search indexes, schema
//! introspection, and the error envelope contract.

#![cfg(feature = "columnar")]

mod common;

use polystore::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn seed_sales(store: &ColumnarStore) {
    store
        .define_schema(
            "sales",
            &[
                ColumnDef { name: "region".into(), column_type: ColumnType::Text },
                ColumnDef { name: "amount".into(), column_type: ColumnType::Integer },
                ColumnDef { name: "product".into(), column_type: ColumnType::Text },
            ],
        )
        .unwrap();
    for (region, amount, product) in [
        ("west", 100, "widget"),
        ("west", 250, "gadget"),
        ("east", 75, "widget"),
        ("east", 30, "doohickey"),
        ("north", 500, "gadget"),
    ] {
        let envelope = store.execute_sql(
            "INSERT INTO sales (region, amount, product) VALUES (?, ?, ?)",
            &[json!(region), json!(amount), json!(product)],
        );
        assert!(envelope.is_ok(), "{:?}", envelope.errors);
    }
}

#[test]
fn declarative_query_with_filters_and_order() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);

    let query = SemanticQuery::from_table("sales")
        .select("region")
        .select("amount")
        .filter(Filter::new("amount", FilterOperator::Ge, json!(100)))
        .order_by("amount", true)
        .limit(2);
    let envelope = store.query(&query);
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data.len(), 2);
    assert_eq!(envelope.data[0]["amount"], json!(500));
    assert_eq!(envelope.data[1]["amount"], json!(250));
}

#[test]
fn grouped_aggregation() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);

    let envelope = store.group_by(
        "sales",
        &["region".to_owned()],
        &[
            Aggregation::new(AggregateOp::Sum, "amount"),
            Aggregation::new(AggregateOp::Count, "*").with_alias("n_rows"),
        ],
        &[],
    );
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data.len(), 3);
    let west = envelope
        .data
        .iter()
        .find(|row| row["region"] == json!("west"))
        .unwrap();
    assert_eq!(west["sum_amount"], json!(350));
    assert_eq!(west["n_rows"], json!(2));
}

#[test]
fn single_aggregates() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);

    let total = store.aggregate("sales", AggregateOp::Sum, "amount", &[]).unwrap();
    assert_eq!(total, json!(955));

    let west_max = store
        .aggregate(
            "sales",
            AggregateOp::Max,
            "amount",
            &[Filter::new("region", FilterOperator::Eq, json!("west"))],
        )
        .unwrap();
    assert_eq!(west_max, json!(250));

    let count = store.aggregate("sales", AggregateOp::Count, "*", &[]).unwrap();
    assert_eq!(count, json!(5));
}

/// Scenario: querying a missing table returns the error envelope, it does
/// not unwind.
#[test]
fn missing_table_produces_error_envelope() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);

    let envelope = store.query(&SemanticQuery::from_table("no_such_table"));
    assert!(!envelope.is_ok());
    assert!(envelope.data.is_empty());
    assert!(envelope.errors[0].contains("no_such_table"), "{:?}", envelope.errors);
    assert!(!envelope.metadata.from_cache);
}

#[test]
fn hostile_query_identifiers_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    let envelope = store.query(&SemanticQuery::from_table("sales; DROP TABLE sales"));
    assert!(!envelope.is_ok());
    assert!(envelope.errors[0].contains("identifier"), "{:?}", envelope.errors);
}

#[test]
fn materialized_view_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);

    store
        .create_materialized_view(
            "region_totals",
            "SELECT region, SUM(amount) AS total FROM sales GROUP BY region",
        )
        .unwrap();
    assert_eq!(store.list_materialized_views().unwrap(), vec!["region_totals".to_owned()]);

    let envelope = store.query_materialized_view("region_totals");
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data.len(), 3);

    // New base rows appear only after refresh.
    let insert = store.execute_sql(
        "INSERT INTO sales (region, amount, product) VALUES (?, ?, ?)",
        &[json!("south"), json!(40), json!("widget")],
    );
    assert!(insert.is_ok(), "{:?}", insert.errors);
    assert_eq!(store.query_materialized_view("region_totals").data.len(), 3);
    store.refresh_materialized_view("region_totals").unwrap();
    assert_eq!(store.query_materialized_view("region_totals").data.len(), 4);

    store.drop_materialized_view("region_totals").unwrap();
    assert!(store.list_materialized_views().unwrap().is_empty());
    assert!(!store.query_materialized_view("region_totals").is_ok());

    assert!(store.refresh_materialized_view("never_registered").is_err());
}

#[test]
fn search_index_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);

    // Searching without an index is an envelope failure.
    assert!(!store.search("sales", "widget", None).is_ok());

    store
        .create_search_index("sales", &["product".to_owned(), "region".to_owned()])
        .unwrap();
    let envelope = store.search("sales", "widget", None);
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data.len(), 2);

    // Substring matching across the indexed columns.
    let envelope = store.search("sales", "east", None);
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data.len(), 2);

    // LIKE wildcards in the term are literal characters, not patterns.
    let envelope = store.search("sales", "%", None);
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert!(envelope.data.is_empty());

    store.drop_search_index("sales").unwrap();
    assert!(!store.search("sales", "widget", None).is_ok());
}

#[test]
fn schema_definition_and_introspection() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    store
        .define_schema(
            "events",
            &[
                ColumnDef { name: "id".into(), column_type: ColumnType::Integer },
                ColumnDef { name: "label".into(), column_type: ColumnType::Text },
                ColumnDef { name: "score".into(), column_type: ColumnType::Real },
                ColumnDef { name: "active".into(), column_type: ColumnType::Boolean },
            ],
        )
        .unwrap();

    let schema = store.get_schema("events").unwrap();
    assert_eq!(schema.len(), 4);
    assert_eq!(schema[0].name, "id");
    assert_eq!(schema[0].column_type, ColumnType::Integer);
    assert_eq!(schema[2].column_type, ColumnType::Real);
    assert_eq!(schema[3].column_type, ColumnType::Boolean);

    let err = store
        .define_schema("events; --", &[ColumnDef { name: "id".into(), column_type: ColumnType::Integer }])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn explain_returns_a_plan() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    seed_sales(&store);
    let envelope = store.explain_query("SELECT region FROM sales WHERE amount > 100");
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert!(!envelope.data.is_empty());
}

/// The relational backend implements the query surface but leaves
/// materialized views at the `NotImplemented` default.
#[cfg(feature = "relational")]
#[test]
fn relational_semantic_surface() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);

    let envelope = store.execute_sql(
        "CREATE TABLE readings (sensor TEXT, reading BIGINT)",
        &[],
    );
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    for (sensor, reading) in [("a", 10), ("a", 20), ("b", 5)] {
        let insert = store.execute_sql(
            "INSERT INTO readings (sensor, reading) VALUES (?, ?)",
            &[json!(sensor), json!(reading)],
        );
        assert!(insert.is_ok(), "{:?}", insert.errors);
    }

    let avg = store.aggregate("readings", AggregateOp::Avg, "reading", &[]).unwrap();
    let avg = avg.as_f64().unwrap();
    assert!((avg - 35.0 / 3.0).abs() < 1e-9, "{avg}");

    let err = store.create_materialized_view("mv", "SELECT 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(store.list_materialized_views().unwrap_err().kind(), ErrorKind::NotImplemented);
}
