//! Client operation normalisation.
//!
//! Turns a parsed GraphQL document into a single [`Operation`] with
//! fragment spreads inlined and `@skip`/`@include` already applied, so the
//! planner and the response projection walk one plain selection tree.

use std::collections::{HashMap, HashSet};

use graphql_parser::query::{
    self as ast, Definition, FragmentDefinition, OperationDefinition, TypeCondition,
};
use serde_json::{Map, Value};

use crate::error::PlanError;
use crate::type_graph::{InputValue, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selections: Vec<Selection>,
}

impl Field {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment {
        type_condition: Option<String>,
        selections: Vec<Selection>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selections: Vec<Selection>,
}

impl Operation {
    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|variable| variable.name == name)
    }
}

/// Parses `query` and extracts the operation to run.
pub fn parse_operation(
    query: &str,
    operation_name: Option<&str>,
    variables: &Map<String, Value>,
) -> Result<Operation, PlanError> {
    let document = graphql_parser::parse_query::<String>(query)
        .map_err(|e| PlanError::InvalidQuery(e.to_string()))?;

    let mut fragments = HashMap::new();
    let mut operations = Vec::new();
    for definition in &document.definitions {
        match definition {
            Definition::Fragment(fragment) => {
                fragments.insert(fragment.name.as_str(), fragment);
            }
            Definition::Operation(operation) => operations.push(operation),
        }
    }

    let operation = select_operation(&operations, operation_name)?;
    let (kind, name, variable_definitions, selection_set) = match operation {
        OperationDefinition::SelectionSet(set) => (OperationKind::Query, None, &[][..], set),
        OperationDefinition::Query(query) => (
            OperationKind::Query,
            query.name.clone(),
            &query.variable_definitions[..],
            &query.selection_set,
        ),
        OperationDefinition::Mutation(mutation) => (
            OperationKind::Mutation,
            mutation.name.clone(),
            &mutation.variable_definitions[..],
            &mutation.selection_set,
        ),
        OperationDefinition::Subscription(_) => {
            return Err(PlanError::UnsupportedOperation(
                "subscriptions are not supported".to_string(),
            ));
        }
    };

    let definitions: Vec<VariableDefinition> = variable_definitions
        .iter()
        .map(|definition| VariableDefinition {
            name: definition.name.clone(),
            ty: TypeRef::from_ast(&definition.var_type),
            default_value: definition.default_value.as_ref().map(InputValue::from_ast),
        })
        .collect();

    // Defaults apply when evaluating @skip/@include.
    let mut effective = variables.clone();
    for definition in &definitions {
        if let Some(default) = &definition.default_value {
            effective
                .entry(definition.name.clone())
                .or_insert_with(|| default.to_json(&Map::new()));
        }
    }

    let normalizer = Normalizer {
        fragments,
        variables: &effective,
    };
    let selections = normalizer.selection_set(selection_set, &mut HashSet::new())?;

    Ok(Operation {
        kind,
        name,
        variables: definitions,
        selections,
    })
}

fn select_operation<'d, 'a>(
    operations: &[&'d OperationDefinition<'a, String>],
    operation_name: Option<&str>,
) -> Result<&'d OperationDefinition<'a, String>, PlanError> {
    match operation_name {
        Some(wanted) => operations
            .iter()
            .copied()
            .find(|operation| operation_name_of(operation) == Some(wanted))
            .ok_or_else(|| PlanError::UnknownOperation(format!("no operation named `{}`", wanted))),
        None => match operations {
            [single] => Ok(*single),
            [] => Err(PlanError::UnknownOperation(
                "document contains no operation".to_string(),
            )),
            _ => Err(PlanError::UnknownOperation(
                "an operation name is required when the document contains several operations"
                    .to_string(),
            )),
        },
    }
}

fn operation_name_of<'o>(operation: &'o OperationDefinition<'_, String>) -> Option<&'o str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

struct Normalizer<'d, 'a> {
    fragments: HashMap<&'d str, &'d FragmentDefinition<'a, String>>,
    variables: &'d Map<String, Value>,
}

impl<'d, 'a> Normalizer<'d, 'a> {
    fn selection_set(
        &self,
        set: &ast::SelectionSet<'a, String>,
        visiting: &mut HashSet<String>,
    ) -> Result<Vec<Selection>, PlanError> {
        let mut selections = Vec::with_capacity(set.items.len());
        for item in &set.items {
            match item {
                ast::Selection::Field(field) => {
                    if !self.included(&field.directives) {
                        continue;
                    }
                    selections.push(Selection::Field(Field {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field
                            .arguments
                            .iter()
                            .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                            .collect(),
                        selections: self.selection_set(&field.selection_set, visiting)?,
                    }));
                }
                ast::Selection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives) {
                        continue;
                    }
                    selections.push(Selection::InlineFragment {
                        type_condition: fragment
                            .type_condition
                            .as_ref()
                            .map(|TypeCondition::On(name)| name.clone()),
                        selections: self.selection_set(&fragment.selection_set, visiting)?,
                    });
                }
                ast::Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives) {
                        continue;
                    }
                    let name = spread.fragment_name.as_str();
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| PlanError::UnknownFragment(name.to_string()))?;
                    if !visiting.insert(name.to_string()) {
                        return Err(PlanError::FragmentCycle(name.to_string()));
                    }
                    let TypeCondition::On(type_condition) = &fragment.type_condition;
                    let inner = self.selection_set(&fragment.selection_set, visiting)?;
                    visiting.remove(name);
                    selections.push(Selection::InlineFragment {
                        type_condition: Some(type_condition.clone()),
                        selections: inner,
                    });
                }
            }
        }
        Ok(selections)
    }

    fn included(&self, directives: &[ast::Directive<'a, String>]) -> bool {
        directives.iter().all(|directive| {
            let condition = || {
                directive
                    .arguments
                    .iter()
                    .find(|(name, _)| name == "if")
                    .map(|(_, value)| InputValue::from_ast(value).to_json(self.variables))
                    .and_then(|value| value.as_bool())
            };
            match directive.name.as_str() {
                "skip" => condition() != Some(true),
                "include" => condition() != Some(false),
                _ => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_names(selections: &[Selection]) -> Vec<String> {
        selections
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => field.response_key().to_string(),
                Selection::InlineFragment { type_condition, .. } => {
                    format!("... on {}", type_condition.as_deref().unwrap_or("?"))
                }
            })
            .collect()
    }

    #[test]
    fn inlines_fragment_spreads() {
        let operation = parse_operation(
            "query Me { me { ...UserParts } } fragment UserParts on User { id name }",
            None,
            &Map::new(),
        )
        .unwrap();
        assert_eq!(operation.name.as_deref(), Some("Me"));
        let Selection::Field(me) = &operation.selections[0] else {
            panic!("expected field");
        };
        assert_eq!(field_names(&me.selections), vec!["... on User"]);
    }

    #[test]
    fn applies_skip_and_include() {
        let variables = json!({"withName": false}).as_object().cloned().unwrap();
        let operation = parse_operation(
            "query($withName: Boolean!, $withId: Boolean = true) { id @include(if: $withId) name @include(if: $withName) age @skip(if: true) }",
            None,
            &variables,
        )
        .unwrap();
        assert_eq!(field_names(&operation.selections), vec!["id"]);
    }

    #[test]
    fn requires_operation_name_for_multiple_operations() {
        let query = "query A { a } query B { b }";
        assert!(matches!(
            parse_operation(query, None, &Map::new()),
            Err(PlanError::UnknownOperation(_))
        ));
        let operation = parse_operation(query, Some("B"), &Map::new()).unwrap();
        assert_eq!(field_names(&operation.selections), vec!["b"]);
    }

    #[test]
    fn rejects_fragment_cycles_and_subscriptions() {
        let cyclic = "{ ...A } fragment A on Query { ...B } fragment B on Query { ...A }";
        assert!(matches!(
            parse_operation(cyclic, None, &Map::new()),
            Err(PlanError::FragmentCycle(_))
        ));
        assert!(matches!(
            parse_operation("subscription { ticks }", None, &Map::new()),
            Err(PlanError::UnsupportedOperation(_))
        ));
    }
}
