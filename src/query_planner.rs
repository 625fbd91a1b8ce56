use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PlanError;
use crate::operation::{self, Field, Operation, OperationKind, Selection};
use crate::query_plan::{
    FetchKind, FetchNode, FetchSelection, NodeId, PathSegment, QueryPlan, add_field_set,
    add_selection,
};
use crate::supergraph::Supergraph;
use crate::type_graph::FieldSet;
use crate::GraphQLRequest;

#[async_trait]
pub trait QueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &Supergraph,
    ) -> Result<QueryPlan, PlanError>;
}

pub struct FederatedQueryPlanner;

impl FederatedQueryPlanner {
    pub fn new() -> Self {
        FederatedQueryPlanner
    }
}

impl Default for FederatedQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for FederatedQueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &Supergraph,
    ) -> Result<QueryPlan, PlanError> {
        let variables = request
            .variables
            .as_ref()
            .and_then(|variables| variables.as_object())
            .cloned()
            .unwrap_or_default();
        let operation = operation::parse_operation(
            &request.query,
            request.operation_name.as_deref(),
            &variables,
        )?;
        let plan = plan(operation, schema)?;
        debug!(
            nodes = plan.len(),
            operation = ?plan.operation.name,
            "planned operation"
        );
        Ok(plan)
    }
}

/// Builds the fetch DAG for a normalised operation.
pub fn plan(operation: Operation, supergraph: &Supergraph) -> Result<QueryPlan, PlanError> {
    let mut builder = PlanBuilder {
        supergraph,
        nodes: Vec::new(),
        entity_nodes: HashMap::new(),
        requires_stack: Vec::new(),
    };

    let root_type = match operation.kind {
        OperationKind::Query => supergraph.query_type().to_string(),
        OperationKind::Mutation => match supergraph.mutation_type() {
            Some(mutation) => mutation.to_string(),
            None => {
                return Err(PlanError::UnresolvableField {
                    path: root_fields(&operation.selections, "Mutation")
                        .first()
                        .map(|field| vec![field.response_key().to_string()])
                        .unwrap_or_default(),
                });
            }
        },
    };
    builder.plan_root(&operation.selections, &root_type, operation.kind)?;

    let mut plan = QueryPlan {
        operation,
        nodes: builder.nodes,
    };
    plan.finalize()?;
    Ok(plan)
}

/// Root fields with root-level fragments flattened away.
fn root_fields<'o>(selections: &'o [Selection], root_type: &str) -> Vec<&'o Field> {
    let mut fields = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => fields.push(field),
            Selection::InlineFragment {
                type_condition,
                selections,
            } => {
                if type_condition.as_deref().is_none_or(|name| name == root_type) {
                    fields.extend(root_fields(selections, root_type));
                }
            }
        }
    }
    fields
}

/// Locates a nested selection list inside a fetch node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchStep {
    Field(String),
    Fragment(String),
}

impl FetchStep {
    fn matches(&self, selection: &FetchSelection) -> bool {
        match (self, selection) {
            (FetchStep::Field(key), FetchSelection::Field { alias, name, .. }) => {
                alias.as_deref().unwrap_or(name) == key
            }
            (FetchStep::Fragment(condition), FetchSelection::InlineFragment { type_condition, .. }) => {
                condition == type_condition
            }
            _ => false,
        }
    }

    fn empty_selection(&self) -> FetchSelection {
        match self {
            FetchStep::Field(key) => FetchSelection::field(key.clone()),
            FetchStep::Fragment(condition) => FetchSelection::InlineFragment {
                type_condition: condition.clone(),
                selections: Vec::new(),
            },
        }
    }
}

fn selections_at<'n>(
    mut selections: &'n mut Vec<FetchSelection>,
    steps: &[FetchStep],
) -> &'n mut Vec<FetchSelection> {
    for step in steps {
        let index = match selections.iter().position(|selection| step.matches(selection)) {
            Some(index) => index,
            None => {
                selections.push(step.empty_selection());
                selections.len() - 1
            }
        };
        selections = selections[index].selections_mut();
    }
    selections
}

/// Where a selection list is being planned.
#[derive(Clone)]
struct Scope<'p> {
    node: NodeId,
    parent_type: String,
    response_path: Vec<PathSegment>,
    fetch_path: Vec<FetchStep>,
    provided: Option<&'p FieldSet>,
}

impl<'p> Scope<'p> {
    fn client_path(&self, key: &str) -> Vec<String> {
        self.response_path
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Field(key) => Some(key.clone()),
                PathSegment::TypeCondition(_) => None,
            })
            .chain(std::iter::once(key.to_string()))
            .collect()
    }

    fn enter_field(&self, node: NodeId, key: &str, parent_type: &str, provided: Option<&'p FieldSet>, from_root: bool) -> Scope<'p> {
        let mut response_path = self.response_path.clone();
        response_path.push(PathSegment::Field(key.to_string()));
        let mut fetch_path = if from_root { Vec::new() } else { self.fetch_path.clone() };
        fetch_path.push(FetchStep::Field(key.to_string()));
        Scope {
            node,
            parent_type: parent_type.to_string(),
            response_path,
            fetch_path,
            provided,
        }
    }
}

type EntityNodeKey = (NodeId, Vec<PathSegment>, String, String);

struct PlanBuilder<'s> {
    supergraph: &'s Supergraph,
    nodes: Vec<FetchNode>,
    entity_nodes: HashMap<EntityNodeKey, NodeId>,
    /// `(type, field, subgraph)` whose `@requires` is being planned.
    requires_stack: Vec<(String, String, String)>,
}

impl<'s> PlanBuilder<'s> {
    fn new_node(&mut self, subgraph: &str, kind: FetchKind, depends_on: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(FetchNode {
            id,
            subgraph: subgraph.to_string(),
            kind,
            selections: Vec::new(),
            depends_on,
            children: Vec::new(),
            variable_usages: Vec::new(),
            operation: String::new(),
        });
        id
    }

    fn add(&mut self, node: NodeId, steps: &[FetchStep], selection: FetchSelection) {
        let target = selections_at(&mut self.nodes[node.0].selections, steps);
        add_selection(target, selection);
    }

    fn plan_root(
        &mut self,
        selections: &[Selection],
        root_type: &str,
        kind: OperationKind,
    ) -> Result<(), PlanError> {
        let supergraph = self.supergraph;
        let mut root_nodes: Vec<NodeId> = Vec::new();
        for field in root_fields(selections, root_type) {
            if field.name == "__typename" {
                continue;
            }
            let key = field.response_key();
            let unresolvable = || PlanError::UnresolvableField {
                path: vec![key.to_string()],
            };
            let annotation = supergraph
                .annotation(root_type, &field.name)
                .filter(|annotation| !annotation.sources.is_empty())
                .ok_or_else(unresolvable)?;
            let field_def = supergraph
                .schema
                .field(root_type, &field.name)
                .ok_or_else(unresolvable)?;

            let node = match kind {
                OperationKind::Query => root_nodes
                    .iter()
                    .copied()
                    .find(|node| annotation.sources.contains(&self.nodes[node.0].subgraph)),
                // Mutations run in selection order, so only contiguous fields share a fetch.
                OperationKind::Mutation => root_nodes
                    .last()
                    .copied()
                    .filter(|node| annotation.sources.contains(&self.nodes[node.0].subgraph)),
            };
            let node = match node {
                Some(node) => node,
                None => {
                    let depends_on = match kind {
                        OperationKind::Query => Vec::new(),
                        OperationKind::Mutation => (0..self.nodes.len()).map(NodeId).collect(),
                    };
                    let node = self.new_node(&annotation.sources[0], FetchKind::Root(kind), depends_on);
                    root_nodes.push(node);
                    node
                }
            };

            let subgraph = self.nodes[node.0].subgraph.clone();
            self.add(
                node,
                &[],
                FetchSelection::Field {
                    alias: field.alias.clone(),
                    name: field.name.clone(),
                    arguments: field.arguments.clone(),
                    selections: Vec::new(),
                },
            );
            if !field.selections.is_empty() {
                let root_scope = Scope {
                    node,
                    parent_type: root_type.to_string(),
                    response_path: Vec::new(),
                    fetch_path: Vec::new(),
                    provided: None,
                };
                let scope = root_scope.enter_field(
                    node,
                    key,
                    field_def.ty.name(),
                    annotation.provides.get(&subgraph),
                    false,
                );
                self.plan_selections(&scope, &field.selections, &mut Vec::new())?;
            }
        }
        Ok(())
    }

    /// Plans `selections` on `scope.parent_type`. Every node that ends up
    /// holding one of the fields is recorded in `placed`.
    fn plan_selections(
        &mut self,
        scope: &Scope<'s>,
        selections: &[Selection],
        placed: &mut Vec<NodeId>,
    ) -> Result<(), PlanError> {
        let supergraph = self.supergraph;
        let schema = &supergraph.schema;
        let parent_def = schema
            .get(&scope.parent_type)
            .ok_or_else(|| PlanError::UnresolvableField {
                path: scope.client_path(&scope.parent_type),
            })?;
        if parent_def.is_abstract() {
            self.add(scope.node, &scope.fetch_path, FetchSelection::field("__typename"));
        }

        for selection in selections {
            match selection {
                Selection::InlineFragment {
                    type_condition,
                    selections,
                } => match type_condition {
                    Some(condition) if *condition != scope.parent_type => {
                        if schema.get(condition).is_none() {
                            return Err(PlanError::UnresolvableField {
                                path: scope.client_path(&format!("... on {}", condition)),
                            });
                        }
                        self.add(
                            scope.node,
                            &scope.fetch_path,
                            FetchSelection::InlineFragment {
                                type_condition: condition.clone(),
                                selections: Vec::new(),
                            },
                        );
                        let mut inner = scope.clone();
                        inner.parent_type = condition.clone();
                        inner
                            .response_path
                            .push(PathSegment::TypeCondition(condition.clone()));
                        inner.fetch_path.push(FetchStep::Fragment(condition.clone()));
                        self.plan_selections(&inner, selections, placed)?;
                    }
                    _ => self.plan_selections(scope, selections, placed)?,
                },
                Selection::Field(field) => self.plan_field(scope, field, placed)?,
            }
        }
        Ok(())
    }

    fn plan_field(
        &mut self,
        scope: &Scope<'s>,
        field: &Field,
        placed: &mut Vec<NodeId>,
    ) -> Result<(), PlanError> {
        let supergraph = self.supergraph;
        let key = field.response_key();
        if field.name == "__typename" {
            self.add(scope.node, &scope.fetch_path, FetchSelection::field("__typename"));
            push_unique(placed, scope.node);
            return Ok(());
        }

        let unresolvable = || PlanError::UnresolvableField {
            path: scope.client_path(key),
        };
        let field_def = supergraph
            .schema
            .field(&scope.parent_type, &field.name)
            .ok_or_else(unresolvable)?;
        let annotation = supergraph
            .annotation(&scope.parent_type, &field.name)
            .ok_or_else(unresolvable)?;
        let return_type = field_def.ty.name();
        let current = self.nodes[scope.node.0].subgraph.clone();

        let resolves_locally = annotation.sources.contains(&current);
        let local = resolves_locally
            || scope.provided.is_some_and(|provided| provided.contains(&field.name))
            || supergraph
                .entity(&scope.parent_type)
                .is_some_and(|entity| entity.declares_key_field(&current, &field.name));
        let local_requires = if resolves_locally {
            annotation.requires.get(&current)
        } else {
            None
        };

        let selection = FetchSelection::Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            selections: Vec::new(),
        };

        if local && local_requires.is_none() {
            self.add(scope.node, &scope.fetch_path, selection);
            push_unique(placed, scope.node);
            if !field.selections.is_empty() {
                let provided = self.nested_provided(scope, &field.name, annotation.provides.get(&current), resolves_locally);
                let inner = scope.enter_field(scope.node, key, return_type, provided, false);
                self.plan_selections(&inner, &field.selections, &mut Vec::new())?;
            }
            return Ok(());
        }

        // The field lives in another subgraph (or needs `@requires` data):
        // jump through the entity's key.
        let (target, entity_key) = annotation
            .sources
            .iter()
            .find_map(|candidate| {
                self.pick_key(scope, candidate, &current)
                    .map(|key| (candidate.clone(), key))
            })
            .ok_or_else(unresolvable)?;
        let child = self.entity_node(scope, &target, &entity_key);

        if let Some(required) = annotation.requires.get(&target) {
            self.plan_requires(scope, child, &field.name, &target, required)?;
        }

        self.add(child, &[], selection);
        push_unique(placed, child);
        if !field.selections.is_empty() {
            let inner = scope.enter_field(child, key, return_type, annotation.provides.get(&target), true);
            self.plan_selections(&inner, &field.selections, &mut Vec::new())?;
        }
        Ok(())
    }

    /// What the current subgraph provides below `field`: the nested part of
    /// an enclosing `@provides` plus the field's own `@provides`.
    fn nested_provided(
        &self,
        scope: &Scope<'s>,
        field: &str,
        own: Option<&'s FieldSet>,
        resolves_locally: bool,
    ) -> Option<&'s FieldSet> {
        let inherited = scope
            .provided
            .and_then(|provided| provided.get(field))
            .map(|item| &item.selections)
            .filter(|selections| !selections.is_empty());
        match (inherited, own.filter(|_| resolves_locally)) {
            (Some(inherited), _) => Some(inherited),
            (None, own) => own,
        }
    }

    /// A key of `target` for the entity at `scope` that `current` can emit.
    fn pick_key(&self, scope: &Scope<'s>, target: &str, current: &str) -> Option<FieldSet> {
        let entity = self.supergraph.entity(&scope.parent_type)?;
        entity
            .resolvable_keys(target)
            .find(|key| {
                key.iter().all(|item| {
                    self.supergraph
                        .annotation(&scope.parent_type, &item.name)
                        .is_some_and(|annotation| annotation.sources.iter().any(|s| s == current))
                        || entity.declares_key_field(current, &item.name)
                        || scope.provided.is_some_and(|provided| provided.contains(&item.name))
                })
            })
            .cloned()
    }

    /// Finds or creates the `_entities` fetch below `scope.node` and makes
    /// the parent select the representation fields.
    fn entity_node(&mut self, scope: &Scope<'s>, target: &str, key: &FieldSet) -> NodeId {
        let lookup = (
            scope.node,
            scope.response_path.clone(),
            target.to_string(),
            scope.parent_type.clone(),
        );
        let child = match self.entity_nodes.get(&lookup) {
            Some(child) => *child,
            None => {
                let child = self.new_node(
                    target,
                    FetchKind::Entity {
                        type_name: scope.parent_type.clone(),
                        path: scope.response_path.clone(),
                        requires: FieldSet::default(),
                    },
                    vec![scope.node],
                );
                self.entity_nodes.insert(lookup, child);
                child
            }
        };
        if let FetchKind::Entity { requires, .. } = &mut self.nodes[child.0].kind {
            requires.merge(key);
        }
        let parent_selections = selections_at(&mut self.nodes[scope.node.0].selections, &scope.fetch_path);
        add_selection(parent_selections, FetchSelection::field("__typename"));
        add_field_set(parent_selections, key);
        child
    }

    /// Plans the fields `child` requires from its parent's scope and adds
    /// dependency edges to whichever nodes produce them.
    fn plan_requires(
        &mut self,
        scope: &Scope<'s>,
        child: NodeId,
        field: &str,
        target: &str,
        required: &FieldSet,
    ) -> Result<(), PlanError> {
        let frame = (scope.parent_type.clone(), field.to_string(), target.to_string());
        if self.requires_stack.contains(&frame) {
            return Err(PlanError::CircularDependency);
        }
        self.requires_stack.push(frame);

        let selections = field_set_selections(required);
        let mut producers = Vec::new();
        let result = self.plan_selections(scope, &selections, &mut producers);
        self.requires_stack.pop();
        result?;

        for producer in producers {
            if producer == child {
                return Err(PlanError::CircularDependency);
            }
            self.nodes[child.0].depends_on.push(producer);
        }
        if let FetchKind::Entity { requires, .. } = &mut self.nodes[child.0].kind {
            requires.merge(required);
        }
        Ok(())
    }
}

fn push_unique(placed: &mut Vec<NodeId>, node: NodeId) {
    if !placed.contains(&node) {
        placed.push(node);
    }
}

fn field_set_selections(set: &FieldSet) -> Vec<Selection> {
    set.iter()
        .map(|item| {
            Selection::Field(Field {
                alias: None,
                name: item.name.clone(),
                arguments: Vec::new(),
                selections: field_set_selections(&item.selections),
            })
        })
        .collect()
}
