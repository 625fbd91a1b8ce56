#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gangway::error::FetchError;
use gangway::supergraph::SubgraphInfo;
use gangway::transport::{SubgraphRequest, SubgraphResponse, Transport};
use gangway::{SubgraphSchema, Supergraph, compose};
use serde_json::{Value, json};

pub const ACCOUNTS_SDL: &str = r#"
type Query {
  me: User
  user(id: ID!): User
}

type Mutation {
  login(username: String!): User
}

type User @key(fields: "id") {
  id: ID!
  name: String
  username: String
}
"#;

pub const REVIEWS_SDL: &str = r#"
type Query {
  reviews: [Review]
  topReview: Review
}

type Mutation {
  addReview(body: String!): Review
}

type Review @key(fields: "id") {
  id: ID!
  body: String
  author: User @provides(fields: "id")
  product: Product
}

extend type User @key(fields: "id") {
  id: ID! @external
  reviews: [Review]
}

extend type Product @key(fields: "upc") {
  upc: String! @external
  reviews: [Review]
}
"#;

pub const PRODUCTS_SDL: &str = r#"
type Query {
  topProducts(first: Int = 5): [Product]
}

type Product @key(fields: "upc") {
  upc: String!
  name: String
  price: Int
  weight: Int
}
"#;

pub const INVENTORY_SDL: &str = r#"
extend type Product @key(fields: "upc") {
  upc: String! @external
  price: Int @external
  weight: Int @external
  inStock: Boolean
  shippingEstimate: Int @requires(fields: "price weight")
}
"#;

pub fn subgraph(name: &str, sdl: &str) -> SubgraphSchema {
    SubgraphSchema::parse(name, format!("http://{}.test/graphql", name), sdl).unwrap()
}

pub fn supergraph(subgraphs: &[(&str, &str)]) -> Supergraph {
    let schemas: Vec<SubgraphSchema> = subgraphs
        .iter()
        .map(|(name, sdl)| subgraph(name, sdl))
        .collect();
    compose(&schemas).unwrap()
}

/// The four demo subgraphs: accounts, reviews, products and inventory.
pub fn demo_supergraph() -> Supergraph {
    supergraph(&[
        ("accounts", ACCOUNTS_SDL),
        ("reviews", REVIEWS_SDL),
        ("products", PRODUCTS_SDL),
        ("inventory", INVENTORY_SDL),
    ])
}

type Handler = Box<dyn Fn(&SubgraphRequest) -> Result<Value, FetchError> + Send + Sync>;

/// Scripted subgraphs. Every request is recorded before the optional delay,
/// so a test can observe dispatches of requests that never complete.
#[derive(Default)]
pub struct MockTransport {
    handlers: HashMap<String, Handler>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<(String, SubgraphRequest, HashMap<String, String>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `handler` returns the full response body (`data` and `errors`).
    pub fn on(
        mut self,
        subgraph: &str,
        handler: impl Fn(&SubgraphRequest) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(subgraph.to_string(), Box::new(handler));
        self
    }

    pub fn delay(mut self, subgraph: &str, delay: Duration) -> Self {
        self.delays.insert(subgraph.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Vec<(String, SubgraphRequest)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(subgraph, request, _)| (subgraph.clone(), request.clone()))
            .collect()
    }

    pub fn requests_to(&self, subgraph: &str) -> Vec<SubgraphRequest> {
        self.requests()
            .into_iter()
            .filter(|(name, _)| name == subgraph)
            .map(|(_, request)| request)
            .collect()
    }

    pub fn headers_sent(&self) -> Vec<HashMap<String, String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, headers)| headers.clone())
            .collect()
    }

    pub fn dispatch_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        subgraph: &SubgraphInfo,
        request: SubgraphRequest,
        headers: &HashMap<String, String>,
    ) -> Result<SubgraphResponse, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((subgraph.name.clone(), request.clone(), headers.clone()));
        if let Some(delay) = self.delays.get(&subgraph.name) {
            tokio::time::sleep(*delay).await;
        }
        let handler = self
            .handlers
            .get(&subgraph.name)
            .ok_or_else(|| FetchError::UnknownSubgraph(subgraph.name.clone()))?;
        let body = handler(&request)?;
        serde_json::from_value(body).map_err(|e| FetchError::Decode {
            subgraph: subgraph.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Answers an `_entities` request by mapping each representation.
pub fn entities(request: &SubgraphRequest, resolve: impl Fn(&Value) -> Value) -> Value {
    let representations = request
        .variables
        .get("representations")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let resolved: Vec<Value> = representations.iter().map(resolve).collect();
    json!({ "data": { "_entities": resolved } })
}

pub fn user_name(id: &str) -> &'static str {
    match id {
        "1" => "Ada Lovelace",
        "2" => "Alan Turing",
        _ => "Grace Hopper",
    }
}

/// accounts: resolves `User` entities and the `me` root field.
pub fn accounts_handler(request: &SubgraphRequest) -> Result<Value, FetchError> {
    if request.variables.contains_key("representations") {
        return Ok(entities(request, |representation| {
            let id = representation["id"].as_str().unwrap_or_default();
            json!({ "name": user_name(id), "username": format!("@user{}", id) })
        }));
    }
    Ok(json!({ "data": { "me": { "name": "Ada Lovelace", "id": "1" } } }))
}

/// reviews: three reviews by two authors.
pub fn reviews_handler(_request: &SubgraphRequest) -> Result<Value, FetchError> {
    Ok(json!({
        "data": {
            "reviews": [
                { "body": "Love it", "author": { "__typename": "User", "id": "1" } },
                { "body": "Too expensive", "author": { "__typename": "User", "id": "2" } },
                { "body": "Could be better", "author": { "__typename": "User", "id": "1" } }
            ],
            "topReview": { "body": "Love it", "author": { "__typename": "User", "id": "1" } }
        }
    }))
}
