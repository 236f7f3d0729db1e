//! Translation of [`SemanticQuery`] objects into parameterized SQL.
//!
//! Clause order is fixed — `SELECT → FROM → WHERE → GROUP BY → ORDER BY →
//! LIMIT → OFFSET` — and every identifier in the query passes validation
//! before it reaches the statement. Filter values bind positionally; the
//! only literals are the integer LIMIT/OFFSET bounds, which are integers
//! by type.

use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::SqlParam;
use crate::sql::SqlStatement;
use crate::traits::semantic::{
    Aggregation, Filter, FilterOperator, SemanticQuery,
};

/// Render the SELECT list: plain columns first, aggregations after,
/// aliased `{op}_{field}` unless an explicit alias is given.
fn render_select(query: &SemanticQuery) -> StorageResult<String> {
    let mut items = Vec::new();
    for column in &query.select {
        ident::validate(column)?;
        items.push(column.clone());
    }
    for aggregation in &query.aggregations {
        items.push(render_aggregation(aggregation)?);
    }
    if items.is_empty() {
        return Ok("*".to_owned());
    }
    Ok(items.join(", "))
}

fn render_aggregation(aggregation: &Aggregation) -> StorageResult<String> {
    let target = if aggregation.field == "*" {
        "*".to_owned()
    } else {
        ident::validate(&aggregation.field)?;
        aggregation.field.clone()
    };
    let alias = aggregation.output_name();
    let alias = if alias.contains('*') {
        // count(*) with no explicit alias.
        format!("{}_all", aggregation.operator)
    } else {
        alias
    };
    ident::validate(&alias)?;
    Ok(format!("{}({target}) AS {alias}", aggregation.operator))
}

/// Render one filter comparison, pushing its bound values onto `params`.
fn render_filter(filter: &Filter, params: &mut Vec<SqlParam>) -> StorageResult<String> {
    ident::validate(&filter.field)?;
    match filter.operator {
        FilterOperator::In => {
            let Value::Array(items) = &filter.value else {
                return Err(StorageError::invalid_value(format!(
                    "IN filter on '{}' requires an array value",
                    filter.field
                )));
            };
            if items.is_empty() {
                return Err(StorageError::invalid_value(format!(
                    "IN filter on '{}' requires a non-empty array",
                    filter.field
                )));
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            params.extend(items.iter().map(SqlParam::from_value));
            Ok(format!("{} IN ({placeholders})", filter.field))
        }
        operator => {
            params.push(SqlParam::from_value(&filter.value));
            Ok(format!("{} {operator} ?", filter.field))
        }
    }
}

/// Build the full statement for a semantic query.
pub fn build(query: &SemanticQuery) -> StorageResult<SqlStatement> {
    ident::validate(&query.from)?;

    let mut sql = format!("SELECT {} FROM {}", render_select(query)?, query.from);
    let mut params = Vec::new();

    if !query.filters.is_empty() {
        let mut clauses = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            clauses.push(render_filter(filter, &mut params)?);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !query.group_by.is_empty() {
        for column in &query.group_by {
            ident::validate(column)?;
        }
        sql.push_str(" GROUP BY ");
        sql.push_str(&query.group_by.join(", "));
    }

    if !query.order_by.is_empty() {
        let mut terms = Vec::with_capacity(query.order_by.len());
        for order in &query.order_by {
            ident::validate(&order.field)?;
            terms.push(format!(
                "{} {}",
                order.field,
                if order.descending { "DESC" } else { "ASC" }
            ));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    Ok(SqlStatement::new(sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::semantic::AggregateOp;
    use serde_json::json;

    #[test]
    fn plain_query_selects_everything() {
        let statement = build(&SemanticQuery::from_table("events")).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM events");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn clause_order_is_fixed() {
        let query = SemanticQuery::from_table("sales")
            .select("region")
            .filter(Filter::new("amount", FilterOperator::Gt, json!(100)))
            .group_by("region")
            .aggregate(Aggregation::new(AggregateOp::Sum, "amount"))
            .order_by("region", false)
            .limit(20)
            .offset(40);
        let statement = build(&query).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT region, sum(amount) AS sum_amount FROM sales \
             WHERE amount > ? GROUP BY region ORDER BY region ASC LIMIT 20 OFFSET 40"
        );
        assert_eq!(statement.params, vec![SqlParam::Integer(100)]);
    }

    #[test]
    fn aggregation_alias_override() {
        let query = SemanticQuery::from_table("sales")
            .aggregate(Aggregation::new(AggregateOp::Avg, "amount").with_alias("mean"));
        let statement = build(&query).unwrap();
        assert_eq!(statement.sql, "SELECT avg(amount) AS mean FROM sales");
    }

    #[test]
    fn count_star_gets_a_safe_alias() {
        let query = SemanticQuery::from_table("sales")
            .aggregate(Aggregation::new(AggregateOp::Count, "*"));
        let statement = build(&query).unwrap();
        assert_eq!(statement.sql, "SELECT count(*) AS count_all FROM sales");
    }

    #[test]
    fn in_filter_expands_placeholders() {
        let query = SemanticQuery::from_table("events").filter(Filter::new(
            "kind",
            FilterOperator::In,
            json!(["click", "view"]),
        ));
        let statement = build(&query).unwrap();
        assert!(statement.sql.ends_with("WHERE kind IN (?, ?)"));
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn in_filter_requires_array() {
        let query = SemanticQuery::from_table("events")
            .filter(Filter::new("kind", FilterOperator::In, json!("click")));
        assert!(build(&query).is_err());
    }

    #[test]
    fn hostile_identifiers_are_rejected() {
        assert!(build(&SemanticQuery::from_table("events; DROP TABLE x")).is_err());
        let query = SemanticQuery::from_table("events").select("a, b FROM secrets --");
        assert!(build(&query).is_err());
        let query = SemanticQuery::from_table("events")
            .filter(Filter::new("kind = '' OR 1=1", FilterOperator::Eq, json!(1)));
        assert!(build(&query).is_err());
    }

    #[test]
    fn values_never_reach_statement_text() {
        let hostile = "'; DROP TABLE users; --";
        let query = SemanticQuery::from_table("events")
            .filter(Filter::new("name", FilterOperator::Eq, json!(hostile)));
        let statement = build(&query).unwrap();
        assert!(!statement.sql.contains("DROP TABLE users"));
        assert_eq!(statement.params, vec![SqlParam::Text(hostile.into())]);
    }
}
