//! Query plans: an arena of fetch nodes with dependency edges as indices.

use std::collections::BTreeSet;
use std::fmt::{self, Write};

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::PlanError;
use crate::operation::{Operation, OperationKind};
use crate::type_graph::{FieldSet, InputValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One step of a response path. Lists are traversed implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    TypeCondition(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(key) => f.write_str(key),
            PathSegment::TypeCondition(name) => write!(f, "... on {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchSelection {
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<(String, InputValue)>,
        selections: Vec<FetchSelection>,
    },
    InlineFragment {
        type_condition: String,
        selections: Vec<FetchSelection>,
    },
}

impl FetchSelection {
    pub fn field(name: impl Into<String>) -> Self {
        FetchSelection::Field {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selections: Vec::new(),
        }
    }

    fn response_key(&self) -> Option<&str> {
        match self {
            FetchSelection::Field { alias, name, .. } => Some(alias.as_deref().unwrap_or(name)),
            FetchSelection::InlineFragment { .. } => None,
        }
    }

    pub(crate) fn selections_mut(&mut self) -> &mut Vec<FetchSelection> {
        match self {
            FetchSelection::Field { selections, .. }
            | FetchSelection::InlineFragment { selections, .. } => selections,
        }
    }

    fn into_selections(self) -> Vec<FetchSelection> {
        match self {
            FetchSelection::Field { selections, .. }
            | FetchSelection::InlineFragment { selections, .. } => selections,
        }
    }

    /// No alias and no arguments: the shape of fields the planner adds
    /// for keys and `@requires`.
    fn is_plain(&self) -> bool {
        matches!(self, FetchSelection::Field { alias: None, arguments, .. } if arguments.is_empty())
    }

    fn shadowed(self) -> FetchSelection {
        match self {
            FetchSelection::Field {
                name,
                arguments,
                selections,
                ..
            } => FetchSelection::Field {
                alias: Some(shadow_alias(&name)),
                name,
                arguments,
                selections,
            },
            fragment => fragment,
        }
    }
}

/// Response key of a key or `@requires` field whose plain name is taken by
/// a different client field.
pub fn shadow_alias(name: &str) -> String {
    format!("_gangway_{}", name)
}

/// Adds `selection` to `selections`, merging with the same field under the
/// same response key or a fragment on the same type. A plain field whose
/// response key is already used by a different field moves to its shadow
/// alias.
pub(crate) fn add_selection(selections: &mut Vec<FetchSelection>, selection: FetchSelection) {
    let Some(index) = selections
        .iter()
        .position(|candidate| same_slot(candidate, &selection))
    else {
        selections.push(selection);
        return;
    };

    if !same_field(&selections[index], &selection) {
        if selection.is_plain() {
            add_selection(selections, selection.shadowed());
        } else if selections[index].is_plain() {
            let displaced = std::mem::replace(&mut selections[index], selection);
            add_selection(selections, displaced.shadowed());
        } else {
            selections.push(selection);
        }
        return;
    }

    let existing = selections[index].selections_mut();
    for child in selection.into_selections() {
        add_selection(existing, child);
    }
}

fn same_slot(a: &FetchSelection, b: &FetchSelection) -> bool {
    match (a, b) {
        (FetchSelection::Field { .. }, FetchSelection::Field { .. }) => {
            a.response_key() == b.response_key()
        }
        (
            FetchSelection::InlineFragment {
                type_condition: left,
                ..
            },
            FetchSelection::InlineFragment {
                type_condition: right,
                ..
            },
        ) => left == right,
        _ => false,
    }
}

fn same_field(a: &FetchSelection, b: &FetchSelection) -> bool {
    match (a, b) {
        (
            FetchSelection::Field {
                name: left,
                arguments: left_arguments,
                ..
            },
            FetchSelection::Field {
                name: right,
                arguments: right_arguments,
                ..
            },
        ) => left == right && left_arguments == right_arguments,
        _ => true,
    }
}

/// Adds the fields of a field set (`@key`, `@requires`) as selections.
pub(crate) fn add_field_set(selections: &mut Vec<FetchSelection>, set: &FieldSet) {
    for item in set.iter() {
        let mut inner = Vec::new();
        if !item.selections.is_empty() {
            inner.push(FetchSelection::field("__typename"));
            add_field_set(&mut inner, &item.selections);
        }
        add_selection(
            selections,
            FetchSelection::Field {
                alias: None,
                name: item.name.clone(),
                arguments: Vec::new(),
                selections: inner,
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchKind {
    /// Fetches root fields of the operation.
    Root(OperationKind),
    /// Resolves entities found at `path` through `_entities`.
    Entity {
        type_name: String,
        path: Vec<PathSegment>,
        /// Selection sent as each representation.
        requires: FieldSet,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchNode {
    pub id: NodeId,
    pub subgraph: String,
    pub kind: FetchKind,
    pub selections: Vec<FetchSelection>,
    /// Nodes that must complete before this one can build its variables.
    pub depends_on: Vec<NodeId>,
    /// Nodes that depend on this one.
    pub children: Vec<NodeId>,
    pub variable_usages: Vec<String>,
    pub operation: String,
}

impl FetchNode {
    pub fn is_entity_fetch(&self) -> bool {
        matches!(self.kind, FetchKind::Entity { .. })
    }

    pub fn path(&self) -> &[PathSegment] {
        match &self.kind {
            FetchKind::Root(_) => &[],
            FetchKind::Entity { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// The normalised client operation, used to shape the final response.
    pub operation: Operation,
    pub nodes: Vec<FetchNode>,
}

impl QueryPlan {
    pub fn node(&self, id: NodeId) -> &FetchNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependency order, lowest id first among ready nodes. Fails on cycles.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, PlanError> {
        Ok(self.parallel_groups()?.into_iter().flatten().collect())
    }

    /// Groups of plan-parallel nodes; every node of a group only depends
    /// on nodes of earlier groups.
    pub fn parallel_groups(&self) -> Result<Vec<Vec<NodeId>>, PlanError> {
        let mut pending: Vec<usize> = self.nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut ready: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.depends_on.is_empty())
            .map(|node| node.id)
            .collect();
        let mut groups = Vec::new();
        let mut scheduled = 0;
        while !ready.is_empty() {
            let group: Vec<NodeId> = std::mem::take(&mut ready).into_iter().collect();
            for id in &group {
                for child in &self.nodes[id.0].children {
                    pending[child.0] -= 1;
                    if pending[child.0] == 0 {
                        ready.insert(*child);
                    }
                }
            }
            scheduled += group.len();
            groups.push(group);
        }
        if scheduled != self.nodes.len() {
            return Err(PlanError::CircularDependency);
        }
        Ok(groups)
    }

    /// Links children, collects variable usages and renders every
    /// sub-operation. Called once planning is complete.
    pub(crate) fn finalize(&mut self) -> Result<(), PlanError> {
        for node in &mut self.nodes {
            node.depends_on.sort();
            node.depends_on.dedup();
            node.children.clear();
        }
        for index in 0..self.nodes.len() {
            let depends_on = self.nodes[index].depends_on.clone();
            for parent in depends_on {
                if parent.0 == index {
                    return Err(PlanError::CircularDependency);
                }
                self.nodes[parent.0].children.push(NodeId(index));
            }
        }
        self.parallel_groups()?;

        for node in &mut self.nodes {
            let mut usages = Vec::new();
            collect_variables(&node.selections, &mut usages);
            let mut seen = BTreeSet::new();
            usages.retain(|name| seen.insert(name.clone()));
            node.variable_usages = usages;
            node.operation = render_operation(&self.operation, node);
        }
        Ok(())
    }

    /// A readable JSON rendition of the plan.
    pub fn to_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|node| {
                let mut entry = json!({
                    "id": node.id.0,
                    "kind": if node.is_entity_fetch() { "EntityFetch" } else { "Fetch" },
                    "serviceName": node.subgraph,
                    "operation": node.operation,
                    "dependsOn": node.depends_on.iter().map(|id| id.0).collect::<Vec<_>>(),
                    "variableUsages": node.variable_usages,
                });
                if let FetchKind::Entity {
                    type_name,
                    path,
                    requires,
                } = &node.kind
                {
                    entry["typeName"] = json!(type_name);
                    entry["path"] = json!(path.iter().map(ToString::to_string).collect::<Vec<_>>());
                    entry["requires"] = json!(requires.to_string());
                }
                entry
            })
            .collect();
        json!({ "kind": "QueryPlan", "nodes": nodes })
    }
}

fn collect_variables(selections: &[FetchSelection], out: &mut Vec<String>) {
    for selection in selections {
        match selection {
            FetchSelection::Field {
                arguments,
                selections,
                ..
            } => {
                for (_, value) in arguments {
                    let mut names = Vec::new();
                    value.variables(&mut names);
                    out.extend(names.into_iter().map(str::to_string));
                }
                collect_variables(selections, out);
            }
            FetchSelection::InlineFragment { selections, .. } => collect_variables(selections, out),
        }
    }
}

fn render_operation(operation: &Operation, node: &FetchNode) -> String {
    let mut definitions = Vec::new();
    if node.is_entity_fetch() {
        definitions.push("$representations:[_Any!]!".to_string());
    }
    for name in &node.variable_usages {
        if let Some(variable) = operation.variable(name) {
            let mut definition = format!("${}:{}", variable.name, variable.ty);
            if let Some(default) = &variable.default_value {
                let _ = write!(definition, "={}", default);
            }
            definitions.push(definition);
        }
    }

    let mut out = String::new();
    let keyword = match &node.kind {
        FetchKind::Root(kind) => kind.keyword(),
        FetchKind::Entity { .. } => "query",
    };
    if !definitions.is_empty() || keyword != "query" {
        out.push_str(keyword);
        if !definitions.is_empty() {
            let _ = write!(out, "({})", definitions.join(","));
        }
    }
    match &node.kind {
        FetchKind::Root(_) => render_selections(&mut out, &node.selections),
        FetchKind::Entity { type_name, .. } => {
            out.push_str("{_entities(representations:$representations){...on ");
            out.push_str(type_name);
            render_selections(&mut out, &node.selections);
            out.push_str("}}");
        }
    }
    out
}

fn render_selections(out: &mut String, selections: &[FetchSelection]) {
    out.push('{');
    for (index, selection) in selections.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        match selection {
            FetchSelection::Field {
                alias,
                name,
                arguments,
                selections,
            } => {
                if let Some(alias) = alias {
                    let _ = write!(out, "{}:", alias);
                }
                out.push_str(name);
                if !arguments.is_empty() {
                    let rendered: Vec<String> = arguments
                        .iter()
                        .map(|(name, value)| format!("{}:{}", name, value))
                        .collect();
                    let _ = write!(out, "({})", rendered.join(","));
                }
                if !selections.is_empty() {
                    render_selections(out, selections);
                }
            }
            FetchSelection::InlineFragment {
                type_condition,
                selections,
            } => {
                let _ = write!(out, "...on {}", type_condition);
                render_selections(out, selections);
            }
        }
    }
    out.push('}');
}
