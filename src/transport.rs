use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::FetchError;
use crate::supergraph::SubgraphInfo;

/// A GraphQL request sent to one subgraph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubgraphRequest {
    pub query: String,
    pub variables: Map<String, Value>,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

/// The body of a subgraph's GraphQL response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubgraphResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

/// Sends sub-requests to subgraphs. Injected into the executor so tests and
/// embedders can replace the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        subgraph: &SubgraphInfo,
        request: SubgraphRequest,
        headers: &HashMap<String, String>,
    ) -> Result<SubgraphResponse, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpTransport { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        subgraph: &SubgraphInfo,
        request: SubgraphRequest,
        headers: &HashMap<String, String>,
    ) -> Result<SubgraphResponse, FetchError> {
        trace!(subgraph = %subgraph.name, query = %request.query, "sending subgraph request");

        let mut builder = self
            .client
            .post(&subgraph.url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                subgraph: subgraph.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                subgraph: subgraph.name.clone(),
                status: status.as_u16(),
            });
        }

        response
            .json::<SubgraphResponse>()
            .await
            .map_err(|e| FetchError::Decode {
                subgraph: subgraph.name.clone(),
                reason: e.to_string(),
            })
    }
}
