use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::{ExecutionError, GraphQLError, RegistryError};
use crate::metrics::{ExecutionSummary, MetricsSink, NoopMetricsSink};
use crate::query_executor::{ExecutionContext, QueryExecutor};
use crate::query_planner::QueryPlanner;
use crate::schema_registry::{SchemaRegistry, SchemaSource, SubgraphDefinition};
use crate::supergraph::Supergraph;
use crate::{GraphQLRequest, GraphQLResponse};

/// Runs client requests through snapshot, plan, execute and report.
pub struct FederationGateway {
    schema_registry: Arc<dyn SchemaRegistry>,
    query_planner: Arc<dyn QueryPlanner + Send + Sync>,
    query_executor: Arc<dyn QueryExecutor + Send + Sync>,
    metrics: Arc<dyn MetricsSink>,
    request_timeout: Option<Duration>,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Box<dyn SchemaRegistry>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        query_executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        FederationGateway {
            schema_registry: Arc::from(schema_registry),
            query_planner: Arc::from(query_planner),
            query_executor: Arc::from(query_executor),
            metrics: Arc::new(NoopMetricsSink),
            request_timeout: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Deadline applied to every execution.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub async fn process_request(
        &self,
        request: GraphQLRequest,
        cancellation: CancellationToken,
    ) -> GraphQLResponse {
        let span = info_span!("request", operation = request.operation_name.as_deref().unwrap_or(""));
        self.run(request, cancellation).instrument(span).await
    }

    async fn run(&self, request: GraphQLRequest, cancellation: CancellationToken) -> GraphQLResponse {
        let started = Instant::now();
        let mut summary = ExecutionSummary {
            operation_name: request.operation_name.clone(),
            ..ExecutionSummary::default()
        };

        // Each request keeps the snapshot it started with, even if a reload
        // swaps the supergraph meanwhile.
        let schema = match self.schema_registry.get_schema().await {
            Ok(schema) => schema,
            Err(err) => {
                error!(error = %err, "no supergraph available");
                return self.finish(summary, started, GraphQLResponse::error(GraphQLError::from(&err))).await;
            }
        };

        let plan = match self.query_planner.plan_query(&request, &schema).await {
            Ok(plan) => plan,
            Err(err) => {
                debug!(error = %err, "query planning failed");
                return self.finish(summary, started, GraphQLResponse::error(GraphQLError::from(&err))).await;
            }
        };

        let context = ExecutionContext {
            variables: request
                .variables
                .as_ref()
                .and_then(|variables| variables.as_object())
                .cloned()
                .unwrap_or_default(),
            headers: request.auth_headers.clone(),
            cancellation,
            deadline: self.request_timeout.map(|timeout| started + timeout),
        };

        let response = match self.query_executor.execute_plan(&plan, &schema, context).await {
            Ok(result) => {
                summary.fetch_count = result.stats.fetch_count;
                summary.failed_fetches = result.stats.failed_fetches;
                summary.cache_hits = result.stats.cache_hits;
                GraphQLResponse {
                    data: Some(result.data),
                    errors: result.errors,
                }
            }
            Err(err) => {
                info!(error = %err, "request aborted");
                summary.cancelled = matches!(err, ExecutionError::Cancelled);
                GraphQLResponse::error(GraphQLError::from(&err))
            }
        };
        self.finish(summary, started, response).await
    }

    async fn finish(
        &self,
        mut summary: ExecutionSummary,
        started: Instant,
        response: GraphQLResponse,
    ) -> GraphQLResponse {
        summary.duration = started.elapsed();
        summary.error_count = response.errors.len();
        self.metrics.report(&summary).await;
        response
    }

    pub async fn register_service(
        &self,
        service: SubgraphDefinition,
    ) -> Result<Arc<Supergraph>, RegistryError> {
        self.schema_registry.register_service(service).await
    }

    /// Loads every subgraph from `source` and swaps in the recomposed
    /// supergraph.
    pub async fn load_schemas(
        &self,
        source: &dyn SchemaSource,
    ) -> Result<Arc<Supergraph>, RegistryError> {
        self.schema_registry.reload(source).await
    }

    pub async fn supergraph(&self) -> Result<Arc<Supergraph>, RegistryError> {
        self.schema_registry.get_schema().await
    }
}
