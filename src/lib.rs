pub mod composition;
pub mod config;
pub mod entity_cache;
pub mod error;
pub mod federation_gateway;
pub mod metrics;
pub mod operation;
pub mod query_executor;
pub mod query_plan;
pub mod query_planner;
pub mod schema_registry;
pub mod sdl;
pub mod supergraph;
pub mod transport;
pub mod type_graph;

pub use composition::{SubgraphSchema, compose};
pub use error::GraphQLError;
pub use federation_gateway::FederationGateway;
pub use query_executor::{PlanExecutor, QueryExecutor};
pub use query_plan::QueryPlan;
pub use query_planner::{FederatedQueryPlanner, QueryPlanner};
pub use schema_registry::{InMemorySchemaRegistry, SchemaRegistry, SchemaSource, SubgraphDefinition};
pub use supergraph::Supergraph;
pub use transport::{HttpTransport, Transport};
pub use type_graph::TypeGraph;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName", alias = "operation_name")]
    pub operation_name: Option<String>,
    /// Headers forwarded to subgraphs.
    #[serde(skip)]
    pub auth_headers: HashMap<String, String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..GraphQLRequest::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    /// A response with no data and a single top-level error.
    pub fn error(error: GraphQLError) -> Self {
        GraphQLResponse {
            data: None,
            errors: vec![error],
        }
    }
}
