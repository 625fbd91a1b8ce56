//! Plan execution: dispatches fetch nodes in dependency order, merges
//! their results into one data tree and shapes the client response.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity_cache::{EntityCache, EntityCacheKey, canonical_json};
use crate::error::{ExecutionError, FetchError, GraphQLError};
use crate::operation::{OperationKind, Selection};
use crate::query_plan::{
    FetchKind, FetchNode, FetchSelection, NodeId, PathSegment, QueryPlan, shadow_alias,
};
use crate::supergraph::Supergraph;
use crate::transport::{SubgraphRequest, SubgraphResponse, Transport};
use crate::type_graph::{FieldSet, TypeGraph, TypeRef};

const REDACTED: &str = "Subgraph errors redacted";

#[async_trait]
pub trait QueryExecutor {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        schema: &Supergraph,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, ExecutionError>;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub fetch_timeout: Duration,
    pub max_concurrency: usize,
    pub include_subgraph_errors: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            fetch_timeout: Duration::from_secs(30),
            max_concurrency: 16,
            include_subgraph_errors: false,
        }
    }
}

/// Per-request inputs of one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub variables: Map<String, Value>,
    /// Forwarded to every subgraph request.
    pub headers: HashMap<String, String>,
    pub cancellation: CancellationToken,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Success,
    /// The subgraph answered but reported GraphQL errors.
    SubgraphErrors(usize),
    Failed(FetchError),
    /// Not dispatched: nothing to resolve, or a dependency failed.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub fetch_count: usize,
    pub failed_fetches: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Shaped like the client's selection set; `Null` when a non-null root
    /// field could not be resolved.
    pub data: Value,
    pub errors: Vec<GraphQLError>,
    pub outcomes: Vec<(NodeId, NodeOutcome)>,
    pub stats: ExecutionStats,
}

pub struct PlanExecutor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        PlanExecutor { transport, config }
    }
}

#[async_trait]
impl QueryExecutor for PlanExecutor {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        schema: &Supergraph,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        let token = context.cancellation.clone();
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let headers = Arc::new(context.headers);
        let mut execution = Execution::new(plan, schema, &self.config, &context.variables);
        let mut pending: Vec<usize> = plan.nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut ready: VecDeque<NodeId> = plan
            .nodes
            .iter()
            .filter(|node| node.depends_on.is_empty())
            .map(|node| node.id)
            .collect();
        let mut in_flight: JoinSet<Result<SubgraphResponse, FetchError>> = JoinSet::new();
        let mut tasks: HashMap<task::Id, NodeId> = HashMap::new();
        let mut dispatched: HashMap<NodeId, Dispatch> = HashMap::new();
        let max_concurrency = self.config.max_concurrency.max(1);

        let deadline_at = context.deadline;
        let deadline = async move {
            match deadline_at {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            while in_flight.len() < max_concurrency {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                if token.is_cancelled() {
                    in_flight.abort_all();
                    return Err(ExecutionError::Cancelled);
                }

                let node = plan.node(id);
                let (dispatch, request) = match execution.prepare(node) {
                    Prepared::Done(outcome) => {
                        execution.finish(id, outcome);
                        release(plan, id, &mut pending, &mut ready);
                        continue;
                    }
                    Prepared::Fetch(dispatch, request) => (dispatch, request),
                };
                let Some(subgraph) = schema.subgraph(&node.subgraph).cloned() else {
                    let err = FetchError::UnknownSubgraph(node.subgraph.clone());
                    execution.record_failure(node, &dispatch, &err);
                    execution.finish(id, NodeOutcome::Failed(err));
                    release(plan, id, &mut pending, &mut ready);
                    continue;
                };

                debug!(node = %id, subgraph = %subgraph.name, "dispatching fetch");
                let transport = self.transport.clone();
                let headers = headers.clone();
                let timeout = self.config.fetch_timeout;
                let handle = in_flight.spawn(async move {
                    tokio::time::timeout(timeout, transport.fetch(&subgraph, request, &headers))
                        .await
                        .unwrap_or_else(|_| {
                            Err(FetchError::Timeout {
                                subgraph: subgraph.name.clone(),
                                timeout_ms: timeout.as_millis() as u64,
                            })
                        })
                });
                tasks.insert(handle.id(), id);
                dispatched.insert(id, dispatch);
            }

            if in_flight.is_empty() {
                if ready.is_empty() {
                    break;
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(in_flight = in_flight.len(), "execution cancelled");
                    in_flight.abort_all();
                    return Err(ExecutionError::Cancelled);
                }
                _ = &mut deadline => {
                    info!(in_flight = in_flight.len(), "execution deadline exceeded");
                    in_flight.abort_all();
                    return Err(ExecutionError::DeadlineExceeded);
                }
                joined = in_flight.join_next_with_id() => {
                    let (task_id, result) = match joined {
                        Some(Ok((task_id, result))) => (task_id, result),
                        Some(Err(err)) => {
                            warn!(error = %err, "fetch task failed");
                            let reason = if err.is_panic() { "fetch task panicked" } else { "fetch task was aborted" };
                            let node = tasks.get(&err.id()).map(|id| plan.node(*id));
                            let subgraph = node.map(|node| node.subgraph.clone()).unwrap_or_default();
                            (
                                err.id(),
                                Err(FetchError::Request {
                                    subgraph,
                                    reason: reason.to_string(),
                                }),
                            )
                        }
                        None => continue,
                    };
                    let Some(id) = tasks.remove(&task_id) else {
                        continue;
                    };
                    if let Some(dispatch) = dispatched.remove(&id) {
                        let outcome = execution.complete(plan.node(id), dispatch, result);
                        execution.finish(id, outcome);
                    }
                    release(plan, id, &mut pending, &mut ready);
                }
            }
        }

        Ok(execution.into_result())
    }
}

/// Marks `id` complete and queues children whose dependencies are all done.
fn release(plan: &QueryPlan, id: NodeId, pending: &mut [usize], ready: &mut VecDeque<NodeId>) {
    for child in &plan.node(id).children {
        pending[child.0] -= 1;
        if pending[child.0] == 0 {
            ready.push_back(*child);
        }
    }
}

/// Bookkeeping for an entity fetch: where each entity lives in the data
/// tree and which deduplicated representation it maps to.
struct EntityBatch {
    locations: Vec<(Vec<Value>, usize)>,
    resolved: Vec<Option<Value>>,
    cache_keys: Vec<EntityCacheKey>,
    /// Representation indices in the order they were sent.
    fetched: Vec<usize>,
}

enum Dispatch {
    Root,
    Entity(EntityBatch),
}

enum Prepared {
    Fetch(Dispatch, SubgraphRequest),
    Done(NodeOutcome),
}

struct Execution<'a> {
    plan: &'a QueryPlan,
    schema: &'a Supergraph,
    config: &'a ExecutorConfig,
    variables: &'a Map<String, Value>,
    data: Value,
    errors: Vec<GraphQLError>,
    cache: EntityCache,
    outcomes: Vec<Option<NodeOutcome>>,
    stats: ExecutionStats,
}

impl<'a> Execution<'a> {
    fn new(
        plan: &'a QueryPlan,
        schema: &'a Supergraph,
        config: &'a ExecutorConfig,
        variables: &'a Map<String, Value>,
    ) -> Self {
        Execution {
            plan,
            schema,
            config,
            variables,
            data: Value::Object(Map::new()),
            errors: Vec::new(),
            cache: EntityCache::new(),
            outcomes: vec![None; plan.len()],
            stats: ExecutionStats::default(),
        }
    }

    fn finish(&mut self, id: NodeId, outcome: NodeOutcome) {
        if let NodeOutcome::Failed(_) = outcome {
            self.stats.failed_fetches += 1;
        }
        self.outcomes[id.0] = Some(outcome);
    }

    fn request(&self, node: &FetchNode, representations: Option<Vec<Value>>) -> SubgraphRequest {
        let mut variables = Map::new();
        if let Some(representations) = representations {
            variables.insert("representations".to_string(), Value::Array(representations));
        }
        for name in &node.variable_usages {
            if let Some(value) = self.variables.get(name) {
                variables.insert(name.clone(), value.clone());
            }
        }
        SubgraphRequest {
            query: node.operation.clone(),
            variables,
            operation_name: None,
        }
    }

    /// Builds the sub-request for a node from the data merged so far.
    fn prepare(&mut self, node: &FetchNode) -> Prepared {
        let FetchKind::Entity {
            type_name,
            path,
            requires,
        } = &node.kind
        else {
            return Prepared::Fetch(Dispatch::Root, self.request(node, None));
        };

        let dependency_failed = node.depends_on.iter().any(|dependency| {
            matches!(
                self.outcomes[dependency.0],
                Some(NodeOutcome::Failed(_)) | Some(NodeOutcome::Skipped) | None
            )
        });
        if dependency_failed {
            return Prepared::Done(NodeOutcome::Skipped);
        }

        let mut paths = Vec::new();
        collect_locations(&self.schema.schema, &self.data, path, type_name, &mut Vec::new(), &mut paths);
        if paths.is_empty() {
            return Prepared::Done(NodeOutcome::Skipped);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut representations: Vec<Value> = Vec::new();
        let mut locations = Vec::with_capacity(paths.len());
        for location in paths {
            let Some(entity) = value_at(&self.data, &location) else {
                continue;
            };
            let representation = representation(type_name, requires, entity);
            let index = *seen.entry(canonical_json(&representation)).or_insert_with(|| {
                representations.push(representation);
                representations.len() - 1
            });
            locations.push((location, index));
        }

        let mut batch = EntityBatch {
            locations,
            resolved: Vec::with_capacity(representations.len()),
            cache_keys: Vec::with_capacity(representations.len()),
            fetched: Vec::new(),
        };
        let mut to_send = Vec::new();
        for (index, representation) in representations.into_iter().enumerate() {
            let key = EntityCacheKey::new(&node.subgraph, &node.operation, type_name, &representation);
            let cached = self.cache.get(&key);
            if cached.is_none() {
                batch.fetched.push(index);
                to_send.push(representation);
            }
            batch.resolved.push(cached);
            batch.cache_keys.push(key);
        }

        if to_send.is_empty() {
            debug!(node = %node.id, "entity fetch served from cache");
            self.apply_entities(&batch);
            return Prepared::Done(NodeOutcome::Success);
        }
        Prepared::Fetch(Dispatch::Entity(batch), self.request(node, Some(to_send)))
    }

    /// Merges a finished fetch into the data tree.
    fn complete(
        &mut self,
        node: &FetchNode,
        dispatch: Dispatch,
        result: Result<SubgraphResponse, FetchError>,
    ) -> NodeOutcome {
        self.stats.fetch_count += 1;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(node = %node.id, subgraph = %node.subgraph, error = %err, "subgraph fetch failed");
                self.record_failure(node, &dispatch, &err);
                return NodeOutcome::Failed(err);
            }
        };

        let error_count = response.errors.len();
        match dispatch {
            Dispatch::Root => {
                if let Some(data @ Value::Object(_)) = response.data {
                    merge_value(&mut self.data, data);
                }
                for error in &response.errors {
                    let path = error.get("path").and_then(Value::as_array).cloned();
                    let sanitized = self.sanitize(error, &node.subgraph, path);
                    self.errors.push(sanitized);
                }
            }
            Dispatch::Entity(mut batch) => {
                let entities = response
                    .data
                    .as_ref()
                    .and_then(|data| data.get("_entities"))
                    .and_then(Value::as_array);
                match entities {
                    Some(entities) => {
                        for (position, index) in batch.fetched.iter().enumerate() {
                            if let Some(entity @ Value::Object(_)) = entities.get(position) {
                                batch.resolved[*index] = Some(entity.clone());
                                self.cache.insert(batch.cache_keys[*index].clone(), entity.clone());
                            }
                        }
                        self.apply_entities(&batch);
                    }
                    None if response.errors.is_empty() => {
                        let err = FetchError::Decode {
                            subgraph: node.subgraph.clone(),
                            reason: "response is missing `_entities`".to_string(),
                        };
                        warn!(node = %node.id, error = %err, "subgraph fetch failed");
                        let dispatch = Dispatch::Entity(batch);
                        self.record_failure(node, &dispatch, &err);
                        return NodeOutcome::Failed(err);
                    }
                    None => {}
                }
                for error in &response.errors {
                    self.remap_entity_error(node, &batch, error);
                }
            }
        }

        if error_count > 0 {
            NodeOutcome::SubgraphErrors(error_count)
        } else {
            NodeOutcome::Success
        }
    }

    fn apply_entities(&mut self, batch: &EntityBatch) {
        for (location, index) in &batch.locations {
            let Some(resolved) = &batch.resolved[*index] else {
                continue;
            };
            if let Some(target) = value_at_mut(&mut self.data, location) {
                merge_value(target, resolved.clone());
            }
        }
    }

    /// Maps `_entities.<i>.rest` error paths onto every location that
    /// shared representation `i`.
    fn remap_entity_error(&mut self, node: &FetchNode, batch: &EntityBatch, error: &Value) {
        let path = error.get("path").and_then(Value::as_array);
        let target = path.and_then(|path| match path.as_slice() {
            [Value::String(root), Value::Number(position), rest @ ..] if root == "_entities" => position
                .as_u64()
                .and_then(|position| batch.fetched.get(position as usize))
                .map(|index| (*index, rest.to_vec())),
            _ => None,
        });

        for (location, index) in &batch.locations {
            let path = match &target {
                Some((wanted, rest)) if wanted == index => {
                    let mut path = location.clone();
                    path.extend(rest.iter().cloned());
                    path
                }
                Some(_) => continue,
                None => location.clone(),
            };
            let sanitized = self.sanitize(error, &node.subgraph, Some(path));
            self.errors.push(sanitized);
        }
    }

    /// Only message, path, code and service name reach the client.
    fn sanitize(&self, error: &Value, subgraph: &str, path: Option<Vec<Value>>) -> GraphQLError {
        let message = if self.config.include_subgraph_errors {
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subgraph error")
        } else {
            REDACTED
        };
        let code = error
            .pointer("/extensions/code")
            .and_then(Value::as_str)
            .unwrap_or("SUBREQUEST_ERROR");
        let sanitized = GraphQLError::new(message, code)
            .with_extension("serviceName", Value::String(subgraph.to_string()));
        match path {
            Some(path) => sanitized.with_path(path),
            None => sanitized,
        }
    }

    /// One error per response location the failed node would have filled.
    fn record_failure(&mut self, node: &FetchNode, dispatch: &Dispatch, err: &FetchError) {
        let message = match err {
            FetchError::Timeout { .. } | FetchError::Status { .. } => err.to_string(),
            _ if self.config.include_subgraph_errors => err.to_string(),
            _ => format!("request to subgraph `{}` failed", err.subgraph()),
        };
        let error = GraphQLError::new(message, err.code())
            .with_extension("serviceName", Value::String(node.subgraph.clone()));

        let keys: Vec<&str> = node
            .selections
            .iter()
            .filter_map(|selection| match selection {
                FetchSelection::Field { alias, name, .. } if name != "__typename" => {
                    Some(alias.as_deref().unwrap_or(name))
                }
                _ => None,
            })
            .collect();

        match dispatch {
            Dispatch::Root => {
                for key in keys {
                    self.errors
                        .push(error.clone().with_path(vec![Value::String(key.to_string())]));
                }
            }
            Dispatch::Entity(batch) => {
                for (location, _) in &batch.locations {
                    let mut path = location.clone();
                    if let Some(key) = keys.first() {
                        path.push(Value::String(key.to_string()));
                    }
                    self.errors.push(error.clone().with_path(path));
                }
            }
        }
    }

    fn into_result(self) -> ExecutionResult {
        let plan = self.plan;
        let schema = &self.schema.schema;
        let root_type = match plan.operation.kind {
            OperationKind::Query => self.schema.query_type(),
            OperationKind::Mutation => self.schema.mutation_type().unwrap_or("Mutation"),
        };

        let mut errors = self.errors;
        let empty = Map::new();
        let source = self.data.as_object().unwrap_or(&empty);
        let mut projector = Projector {
            schema,
            errors: &mut errors,
        };
        let data = match projector.selections(root_type, &plan.operation.selections, source, &mut Vec::new()) {
            Ok(data) => Value::Object(data),
            Err(Nulled) => Value::Null,
        };

        let mut stats = self.stats;
        stats.cache_hits = self.cache.hits();
        stats.cache_misses = self.cache.misses();

        ExecutionResult {
            data,
            errors,
            outcomes: self
                .outcomes
                .into_iter()
                .enumerate()
                .map(|(index, outcome)| (NodeId(index), outcome.unwrap_or(NodeOutcome::Skipped)))
                .collect(),
            stats,
        }
    }
}

fn representation(type_name: &str, requires: &FieldSet, entity: &Value) -> Value {
    let typename = entity
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or(type_name);
    let mut representation = Map::new();
    representation.insert("__typename".to_string(), Value::String(typename.to_string()));
    if let Value::Object(fields) = requires.project(entity, &shadow_alias) {
        for (key, value) in fields {
            representation.insert(key, value);
        }
    }
    Value::Object(representation)
}

/// Response paths of every object at `segments` whose type satisfies
/// `type_name`. Lists are flattened.
fn collect_locations(
    schema: &TypeGraph,
    value: &Value,
    segments: &[PathSegment],
    type_name: &str,
    path: &mut Vec<Value>,
    out: &mut Vec<Vec<Value>>,
) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(Value::from(index));
                collect_locations(schema, item, segments, type_name, path, out);
                path.pop();
            }
        }
        Value::Object(object) => {
            let typename = object.get("__typename").and_then(Value::as_str);
            match segments.split_first() {
                None => {
                    if typename.is_none_or(|typename| schema.satisfies(typename, type_name)) {
                        out.push(path.clone());
                    }
                }
                Some((PathSegment::Field(key), rest)) => {
                    if let Some(child) = object.get(key) {
                        path.push(Value::String(key.clone()));
                        collect_locations(schema, child, rest, type_name, path, out);
                        path.pop();
                    }
                }
                Some((PathSegment::TypeCondition(condition), rest)) => {
                    if typename.is_none_or(|typename| schema.satisfies(typename, condition)) {
                        collect_locations(schema, value, rest, type_name, path, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn value_at<'v>(mut value: &'v Value, path: &[Value]) -> Option<&'v Value> {
    for segment in path {
        value = match segment {
            Value::String(key) => value.as_object()?.get(key)?,
            Value::Number(index) => value.as_array()?.get(index.as_u64()? as usize)?,
            _ => return None,
        };
    }
    Some(value)
}

fn value_at_mut<'v>(mut value: &'v mut Value, path: &[Value]) -> Option<&'v mut Value> {
    for segment in path {
        value = match segment {
            Value::String(key) => value.as_object_mut()?.get_mut(key)?,
            Value::Number(index) => value.as_array_mut()?.get_mut(index.as_u64()? as usize)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Deep merge keeping the key order of `target`.
fn merge_value(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (existing, value) in target.iter_mut().zip(source) {
                merge_value(existing, value);
            }
        }
        (target, source) => {
            if !source.is_null() || target.is_null() {
                *target = source;
            }
        }
    }
}

/// A non-null field resolved to null; its parent must become null.
struct Nulled;

/// Walks the client operation over the merged data, producing fields in
/// selection order and applying null propagation.
struct Projector<'p> {
    schema: &'p TypeGraph,
    errors: &'p mut Vec<GraphQLError>,
}

impl<'p> Projector<'p> {
    fn selections(
        &mut self,
        parent_type: &str,
        selections: &[Selection],
        source: &Map<String, Value>,
        path: &mut Vec<Value>,
    ) -> Result<Map<String, Value>, Nulled> {
        let runtime_type = source
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(parent_type)
            .to_string();
        let mut out = Map::new();

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let key = field.response_key();
                    if field.name == "__typename" {
                        insert_merged(&mut out, key, Value::String(runtime_type.clone()));
                        continue;
                    }
                    let raw = source.get(key).unwrap_or(&Value::Null);
                    path.push(Value::String(key.to_string()));
                    let value = match self.schema.field(parent_type, &field.name) {
                        Some(definition) => self.complete(&definition.ty, &field.selections, raw, path),
                        None => Ok(raw.clone()),
                    };
                    path.pop();
                    insert_merged(&mut out, key, value?);
                }
                Selection::InlineFragment {
                    type_condition,
                    selections,
                } => {
                    let applies = type_condition
                        .as_deref()
                        .is_none_or(|condition| self.schema.satisfies(&runtime_type, condition));
                    if applies {
                        let scope = type_condition.as_deref().unwrap_or(parent_type);
                        for (key, value) in self.selections(scope, selections, source, path)? {
                            insert_merged(&mut out, &key, value);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn complete(
        &mut self,
        ty: &TypeRef,
        selections: &[Selection],
        raw: &Value,
        path: &mut Vec<Value>,
    ) -> Result<Value, Nulled> {
        match ty {
            TypeRef::NonNull(inner) => {
                let value = self.complete(inner, selections, raw, path)?;
                if value.is_null() {
                    self.null_error(path);
                    return Err(Nulled);
                }
                Ok(value)
            }
            TypeRef::List(inner) => {
                let Value::Array(items) = raw else {
                    return Ok(Value::Null);
                };
                let mut completed = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(Value::from(index));
                    let value = self.complete(inner, selections, item, path);
                    path.pop();
                    match value {
                        Ok(value) => completed.push(value),
                        Err(Nulled) => return Ok(Value::Null),
                    }
                }
                Ok(Value::Array(completed))
            }
            TypeRef::Named(name) => match raw {
                Value::Null => Ok(Value::Null),
                Value::Object(object) if !selections.is_empty() => {
                    match self.selections(name, selections, object, path) {
                        Ok(projected) => Ok(Value::Object(projected)),
                        Err(Nulled) => Ok(Value::Null),
                    }
                }
                other => Ok(other.clone()),
            },
        }
    }

    fn null_error(&mut self, path: &[Value]) {
        let covered = self.errors.iter().any(|error| {
            error
                .path
                .as_ref()
                .is_some_and(|existing| existing.starts_with(path) || path.starts_with(existing))
        });
        if !covered {
            self.errors.push(
                GraphQLError::new("Cannot return null for non-nullable field", "INTERNAL_SERVER_ERROR")
                    .with_path(path.to_vec()),
            );
        }
    }
}

fn insert_merged(out: &mut Map<String, Value>, key: &str, value: Value) {
    match out.get_mut(key) {
        Some(existing) => merge_value(existing, value),
        None => {
            out.insert(key.to_string(), value);
        }
    }
}
