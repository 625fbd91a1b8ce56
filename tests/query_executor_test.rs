mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{MockTransport, accounts_handler, demo_supergraph, entities, reviews_handler, supergraph};
use gangway::error::{ExecutionError, FetchError};
use gangway::operation::parse_operation;
use gangway::query_executor::{ExecutionContext, ExecutionResult, ExecutorConfig, NodeOutcome};
use gangway::query_plan::{NodeId, QueryPlan};
use gangway::query_planner::plan;
use gangway::{PlanExecutor, QueryExecutor, Supergraph};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

fn planned(query: &str, supergraph: &Supergraph) -> QueryPlan {
    let operation = parse_operation(query, None, &Map::new()).unwrap();
    plan(operation, supergraph).unwrap()
}

async fn run(
    transport: Arc<MockTransport>,
    config: ExecutorConfig,
    query: &str,
) -> Result<ExecutionResult, ExecutionError> {
    let supergraph = demo_supergraph();
    let plan = planned(query, &supergraph);
    PlanExecutor::new(transport, config)
        .execute_plan(&plan, &supergraph, ExecutionContext::default())
        .await
}

fn review_transport() -> MockTransport {
    MockTransport::new()
        .on("reviews", reviews_handler)
        .on("accounts", accounts_handler)
}

#[tokio::test]
async fn merges_entity_results_into_the_response() {
    let transport = Arc::new(review_transport());
    let result = run(
        transport.clone(),
        ExecutorConfig::default(),
        "{ reviews { body author { name } } }",
    )
    .await
    .unwrap();

    assert_eq!(
        result.data,
        json!({
            "reviews": [
                { "body": "Love it", "author": { "name": "Ada Lovelace" } },
                { "body": "Too expensive", "author": { "name": "Alan Turing" } },
                { "body": "Could be better", "author": { "name": "Ada Lovelace" } }
            ]
        })
    );
    assert!(result.errors.is_empty());
    assert_eq!(result.stats.fetch_count, 2);
    assert_eq!(
        result.outcomes,
        vec![(NodeId(0), NodeOutcome::Success), (NodeId(1), NodeOutcome::Success)]
    );

    // Three authors, two distinct users: one batched request.
    let sent = transport.requests_to("accounts");
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].variables["representations"],
        json!([
            { "__typename": "User", "id": "1" },
            { "__typename": "User", "id": "2" }
        ])
    );
}

#[tokio::test]
async fn response_keeps_the_client_field_order() {
    let transport = Arc::new(review_transport());
    let result = run(
        transport,
        ExecutorConfig::default(),
        "{ topReview { author { name } body } }",
    )
    .await
    .unwrap();
    assert_eq!(
        result.data.to_string(),
        r#"{"topReview":{"author":{"name":"Ada Lovelace"},"body":"Love it"}}"#
    );
}

#[tokio::test]
async fn root_fetch_failure_only_nulls_its_fields() {
    let transport = Arc::new(MockTransport::new().on("reviews", reviews_handler).on(
        "accounts",
        |_| {
            Err(FetchError::Request {
                subgraph: "accounts".to_string(),
                reason: "connection refused".to_string(),
            })
        },
    ));
    let result = run(transport, ExecutorConfig::default(), "{ me { name } reviews { body } }")
        .await
        .unwrap();

    assert_eq!(
        result.data,
        json!({
            "me": null,
            "reviews": [{ "body": "Love it" }, { "body": "Too expensive" }, { "body": "Could be better" }]
        })
    );
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.path, Some(vec![json!("me")]));
    assert_eq!(error.code(), Some("SUBREQUEST_HTTP_ERROR"));
    assert_eq!(error.extensions["serviceName"], json!("accounts"));
    assert_eq!(error.message, "request to subgraph `accounts` failed");
    assert_eq!(result.stats.failed_fetches, 1);
}

#[tokio::test]
async fn panicking_fetch_fails_its_node_and_skips_dependents() {
    let transport = Arc::new(
        MockTransport::new()
            .on("accounts", |_| -> Result<Value, FetchError> { panic!("accounts handler crashed") })
            .on("products", |_| Ok(json!({ "data": { "topProducts": [{ "name": "Table" }] } }))),
    );
    let result = run(
        transport,
        ExecutorConfig::default(),
        "{ me { reviews { body } } topProducts { name } }",
    )
    .await
    .unwrap();

    assert_eq!(result.data, json!({ "me": null, "topProducts": [{ "name": "Table" }] }));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].path, Some(vec![json!("me")]));
    assert_eq!(result.errors[0].message, "request to subgraph `accounts` failed");
    assert_eq!(result.errors[0].extensions["serviceName"], json!("accounts"));
    assert!(matches!(
        &result.outcomes[0],
        (NodeId(0), NodeOutcome::Failed(FetchError::Request { subgraph, .. })) if subgraph == "accounts"
    ));
    assert_eq!(result.outcomes[1], (NodeId(1), NodeOutcome::Skipped));
    assert_eq!(result.outcomes[2], (NodeId(2), NodeOutcome::Success));
    assert_eq!(result.stats.failed_fetches, 1);
}

#[tokio::test]
async fn entity_fetch_failure_reports_each_location() {
    let transport = Arc::new(MockTransport::new().on("reviews", reviews_handler).on(
        "accounts",
        |_| {
            Err(FetchError::Status {
                subgraph: "accounts".to_string(),
                status: 503,
            })
        },
    ));
    let result = run(transport, ExecutorConfig::default(), "{ reviews { author { name } } }")
        .await
        .unwrap();

    assert_eq!(
        result.data,
        json!({
            "reviews": [
                { "author": { "name": null } },
                { "author": { "name": null } },
                { "author": { "name": null } }
            ]
        })
    );
    let paths: Vec<Option<Vec<Value>>> = result.errors.iter().map(|error| error.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            Some(vec![json!("reviews"), json!(0), json!("author"), json!("name")]),
            Some(vec![json!("reviews"), json!(1), json!("author"), json!("name")]),
            Some(vec![json!("reviews"), json!(2), json!("author"), json!("name")]),
        ]
    );
    assert_eq!(
        result.errors[0].message,
        "subgraph `accounts` responded with HTTP status 503"
    );
}

#[tokio::test]
async fn dependents_of_a_failed_fetch_are_skipped() {
    let transport = Arc::new(MockTransport::new().on("accounts", accounts_handler).on(
        "reviews",
        |_| {
            Err(FetchError::Decode {
                subgraph: "reviews".to_string(),
                reason: "expected value".to_string(),
            })
        },
    ));
    let result = run(transport.clone(), ExecutorConfig::default(), "{ reviews { author { name } } }")
        .await
        .unwrap();

    assert_eq!(result.data, json!({ "reviews": null }));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.outcomes[1], (NodeId(1), NodeOutcome::Skipped));
    assert!(transport.requests_to("accounts").is_empty());
}

#[tokio::test]
async fn entity_errors_are_mapped_back_to_response_paths() {
    let transport = Arc::new(MockTransport::new().on("reviews", reviews_handler).on(
        "accounts",
        |_| {
            Ok(json!({
                "data": { "_entities": [{ "name": "Ada Lovelace" }, null] },
                "errors": [{
                    "message": "user 2 is private",
                    "path": ["_entities", 1, "name"],
                    "extensions": { "code": "FORBIDDEN" }
                }]
            }))
        },
    ));
    let config = ExecutorConfig {
        include_subgraph_errors: true,
        ..ExecutorConfig::default()
    };
    let result = run(transport, config, "{ reviews { author { name } } }")
        .await
        .unwrap();

    assert_eq!(
        result.data["reviews"][0]["author"]["name"],
        json!("Ada Lovelace")
    );
    assert_eq!(result.data["reviews"][1]["author"]["name"], Value::Null);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "user 2 is private");
    assert_eq!(result.errors[0].code(), Some("FORBIDDEN"));
    assert_eq!(
        result.errors[0].path,
        Some(vec![json!("reviews"), json!(1), json!("author"), json!("name")])
    );
    assert_eq!(result.outcomes[1], (NodeId(1), NodeOutcome::SubgraphErrors(1)));
}

#[tokio::test]
async fn subgraph_error_messages_are_redacted_by_default() {
    let transport = Arc::new(MockTransport::new().on("reviews", |_| {
        Ok(json!({
            "data": { "reviews": [] },
            "errors": [{
                "message": "db timeout on shard 7",
                "path": ["reviews"],
                "extensions": { "code": "DOWNSTREAM", "stacktrace": ["at db.rs:12"] }
            }]
        }))
    }));
    let result = run(transport, ExecutorConfig::default(), "{ reviews { body } }")
        .await
        .unwrap();

    assert_eq!(result.data, json!({ "reviews": [] }));
    let error = &result.errors[0];
    assert_eq!(error.message, "Subgraph errors redacted");
    assert_eq!(error.path, Some(vec![json!("reviews")]));
    let extension_keys: Vec<&str> = error.extensions.keys().map(String::as_str).collect();
    assert_eq!(extension_keys, vec!["code", "serviceName"]);
    assert_eq!(error.code(), Some("DOWNSTREAM"));
}

#[tokio::test]
async fn requires_fields_are_sent_in_representations() {
    let transport = Arc::new(
        MockTransport::new()
            .on("products", |_| {
                Ok(json!({
                    "data": {
                        "topProducts": [
                            { "name": "Table", "__typename": "Product", "upc": "1", "price": 899, "weight": 100 },
                            { "name": "Couch", "__typename": "Product", "upc": "2", "price": 1299, "weight": 1000 }
                        ]
                    }
                }))
            })
            .on("inventory", |request| {
                Ok(entities(request, |representation| {
                    let weight = representation["weight"].as_i64().unwrap_or_default();
                    json!({ "shippingEstimate": weight / 2 })
                }))
            }),
    );
    let result = run(
        transport.clone(),
        ExecutorConfig::default(),
        "{ topProducts { name shippingEstimate } }",
    )
    .await
    .unwrap();

    assert_eq!(
        result.data,
        json!({
            "topProducts": [
                { "name": "Table", "shippingEstimate": 50 },
                { "name": "Couch", "shippingEstimate": 500 }
            ]
        })
    );
    let sent = transport.requests_to("inventory");
    assert_eq!(
        sent[0].variables["representations"][0].to_string(),
        r#"{"__typename":"Product","upc":"1","price":899,"weight":100}"#
    );
}

#[tokio::test]
async fn aliased_client_fields_do_not_leak_into_representations() {
    let transport = Arc::new(
        MockTransport::new()
            .on("products", |_| {
                Ok(json!({
                    "data": {
                        "topProducts": [
                            { "upc": "Table", "__typename": "Product", "_gangway_upc": "1" }
                        ]
                    }
                }))
            })
            .on("reviews", |request| {
                Ok(entities(request, |representation| {
                    let body = match representation["upc"].as_str() {
                        Some("1") => "Sturdy",
                        _ => "wrong product",
                    };
                    json!({ "reviews": [{ "body": body }] })
                }))
            }),
    );
    let result = run(
        transport.clone(),
        ExecutorConfig::default(),
        "{ topProducts { upc: name reviews { body } } }",
    )
    .await
    .unwrap();

    assert_eq!(
        result.data,
        json!({ "topProducts": [{ "upc": "Table", "reviews": [{ "body": "Sturdy" }] }] })
    );
    assert_eq!(
        transport.requests_to("reviews")[0].variables["representations"],
        json!([{ "__typename": "Product", "upc": "1" }])
    );
}

#[tokio::test]
async fn repeated_entities_are_served_from_the_cache() {
    let transport = Arc::new(review_transport());
    let config = ExecutorConfig {
        max_concurrency: 1,
        ..ExecutorConfig::default()
    };
    let result = run(
        transport.clone(),
        config,
        "{ reviews { author { name } } topReview { author { name } } }",
    )
    .await
    .unwrap();

    assert_eq!(
        result.data["topReview"],
        json!({ "author": { "name": "Ada Lovelace" } })
    );
    assert_eq!(transport.requests_to("accounts").len(), 1);
    assert_eq!(result.stats.cache_hits, 1);
    assert_eq!(result.stats.cache_misses, 2);
    assert_eq!(result.stats.fetch_count, 2);
}

#[tokio::test]
async fn non_null_violations_propagate_to_the_parent() {
    let supergraph = supergraph(&[(
        "catalog",
        "type Query { item: Item } type Item { id: ID! title: String }",
    )]);
    let transport = Arc::new(MockTransport::new().on("catalog", |_| {
        Ok(json!({ "data": { "item": { "id": null, "title": "Lamp" } } }))
    }));
    let plan = planned("{ item { id title } }", &supergraph);
    let result = PlanExecutor::new(transport, ExecutorConfig::default())
        .execute_plan(&plan, &supergraph, ExecutionContext::default())
        .await
        .unwrap();

    assert_eq!(result.data, json!({ "item": null }));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "Cannot return null for non-nullable field");
    assert_eq!(result.errors[0].path, Some(vec![json!("item"), json!("id")]));
}

#[tokio::test]
async fn slow_subgraphs_time_out() {
    let transport = Arc::new(review_transport().delay("accounts", Duration::from_secs(5)));
    let config = ExecutorConfig {
        fetch_timeout: Duration::from_millis(50),
        ..ExecutorConfig::default()
    };
    let result = run(transport, config, "{ me { name } reviews { body } }")
        .await
        .unwrap();

    assert_eq!(result.data["me"], Value::Null);
    assert_eq!(result.data["reviews"][0]["body"], json!("Love it"));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code(), Some("SUBREQUEST_TIMEOUT"));
    assert_eq!(result.errors[0].path, Some(vec![json!("me")]));
}

#[tokio::test]
async fn cancellation_stops_dispatching() {
    let transport = Arc::new(
        review_transport()
            .delay("reviews", Duration::from_secs(10))
            .delay("accounts", Duration::from_secs(10)),
    );
    let supergraph = demo_supergraph();
    let plan = planned("{ me { name } reviews { author { name } } }", &supergraph);
    let executor = PlanExecutor::new(transport.clone(), ExecutorConfig::default());

    let token = CancellationToken::new();
    let context = ExecutionContext {
        cancellation: token.clone(),
        ..ExecutionContext::default()
    };
    let canceller = async {
        while transport.dispatch_count() < 2 {
            tokio::task::yield_now().await;
        }
        token.cancel();
    };
    let (result, ()) = tokio::join!(executor.execute_plan(&plan, &supergraph, context), canceller);

    // Both root fetches were in flight; the entity fetch behind `reviews`
    // never goes out.
    assert_eq!(result, Err(ExecutionError::Cancelled));
    assert_eq!(transport.dispatch_count(), 2);
    assert_eq!(transport.requests_to("accounts").len(), 1);
}

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    let transport = Arc::new(review_transport());
    let supergraph = demo_supergraph();
    let plan = planned("{ reviews { body } }", &supergraph);
    let token = CancellationToken::new();
    token.cancel();
    let context = ExecutionContext {
        cancellation: token,
        ..ExecutionContext::default()
    };

    let result = PlanExecutor::new(transport.clone(), ExecutorConfig::default())
        .execute_plan(&plan, &supergraph, context)
        .await;
    assert_eq!(result, Err(ExecutionError::Cancelled));
    assert_eq!(transport.dispatch_count(), 0);
}

#[tokio::test]
async fn deadline_aborts_the_execution() {
    let transport = Arc::new(review_transport().delay("reviews", Duration::from_secs(10)));
    let supergraph = demo_supergraph();
    let plan = planned("{ reviews { body } }", &supergraph);
    let context = ExecutionContext {
        deadline: Some(tokio::time::Instant::now() + Duration::from_millis(50)),
        ..ExecutionContext::default()
    };

    let result = PlanExecutor::new(transport, ExecutorConfig::default())
        .execute_plan(&plan, &supergraph, context)
        .await;
    assert_eq!(result, Err(ExecutionError::DeadlineExceeded));
}

#[tokio::test]
async fn forwards_headers_and_variables() {
    let transport = Arc::new(MockTransport::new().on("products", |request| {
        let first = request.variables["first"].as_u64().unwrap_or_default() as usize;
        let names = ["Table", "Couch", "Chair"];
        let products: Vec<Value> = names
            .iter()
            .take(first)
            .map(|name| json!({ "name": name }))
            .collect();
        Ok(json!({ "data": { "topProducts": products } }))
    }));
    let supergraph = demo_supergraph();
    let operation = parse_operation(
        "query Top($first: Int) { topProducts(first: $first) { name } }",
        None,
        &Map::new(),
    )
    .unwrap();
    let plan = plan(operation, &supergraph).unwrap();

    let mut variables = Map::new();
    variables.insert("first".to_string(), json!(2));
    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Bearer token".to_string());
    let context = ExecutionContext {
        variables,
        headers,
        ..ExecutionContext::default()
    };

    let result = PlanExecutor::new(transport.clone(), ExecutorConfig::default())
        .execute_plan(&plan, &supergraph, context)
        .await
        .unwrap();

    assert_eq!(
        result.data,
        json!({ "topProducts": [{ "name": "Table" }, { "name": "Couch" }] })
    );
    assert_eq!(
        transport.headers_sent()[0].get("authorization").map(String::as_str),
        Some("Bearer token")
    );
}
