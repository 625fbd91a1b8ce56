//! The composed supergraph: one merged type graph plus, per field, which
//! subgraphs can resolve it and what they need to do so.

use std::collections::BTreeMap;

use crate::type_graph::{Directive, FieldSet, InputValue, KeyDirective, TypeGraph, write_type};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphInfo {
    pub name: String,
    pub url: String,
}

/// Ownership annotation of a single supergraph field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldAnnotation {
    /// Subgraphs that resolve the field themselves, sorted by name.
    pub sources: Vec<String>,
    /// Subgraphs that declare the field `@external`.
    pub external_in: Vec<String>,
    pub requires: BTreeMap<String, FieldSet>,
    pub provides: BTreeMap<String, FieldSet>,
}

/// Key information of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    /// The subgraph providing the base definition.
    pub owner: String,
    /// Every `@key` each subgraph declares for the entity.
    pub keys: BTreeMap<String, Vec<KeyDirective>>,
}

impl EntityInfo {
    /// Keys the subgraph can resolve the entity by through `_entities`.
    pub fn resolvable_keys<'a>(&'a self, subgraph: &str) -> impl Iterator<Item = &'a FieldSet> {
        self.keys
            .get(subgraph)
            .into_iter()
            .flatten()
            .filter(|key| key.resolvable)
            .map(|key| &key.fields)
    }

    /// Whether the subgraph can emit `field` as part of an entity reference.
    pub fn declares_key_field(&self, subgraph: &str, field: &str) -> bool {
        self.keys
            .get(subgraph)
            .is_some_and(|keys| keys.iter().any(|key| key.fields.contains(field)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Supergraph {
    pub schema: TypeGraph,
    pub subgraphs: BTreeMap<String, SubgraphInfo>,
    pub fields: BTreeMap<String, BTreeMap<String, FieldAnnotation>>,
    pub entities: BTreeMap<String, EntityInfo>,
    /// Subgraphs declaring each type, sorted by name.
    pub type_sources: BTreeMap<String, Vec<String>>,
}

impl Supergraph {
    pub fn annotation(&self, type_name: &str, field: &str) -> Option<&FieldAnnotation> {
        self.fields.get(type_name)?.get(field)
    }

    pub fn entity(&self, type_name: &str) -> Option<&EntityInfo> {
        self.entities.get(type_name)
    }

    pub fn subgraph(&self, name: &str) -> Option<&SubgraphInfo> {
        self.subgraphs.get(name)
    }

    pub fn query_type(&self) -> &str {
        &self.schema.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.schema.mutation_type()
    }

    /// Prints the merged schema with `@join__*` ownership annotations.
    /// The output is fully determined by the composed subgraphs.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();
        out.push_str("schema {\n");
        out.push_str(&format!("  query: {}\n", self.schema.query_type));
        if let Some(mutation) = self.mutation_type() {
            out.push_str(&format!("  mutation: {}\n", mutation));
        }
        out.push_str("}\n\n");

        out.push_str("enum join__Graph {\n");
        for subgraph in self.subgraphs.values() {
            out.push_str(&format!(
                "  {} @join__graph(name: {}, url: {})\n",
                graph_enum_name(&subgraph.name),
                InputValue::String(subgraph.name.clone()),
                InputValue::String(subgraph.url.clone()),
            ));
        }
        out.push_str("}\n");

        for def in self.schema.types.values() {
            let mut extra = Vec::new();
            if let Some(entity) = self.entities.get(&def.name) {
                extra.push(join_directive("join__owner", &entity.owner, Vec::new()));
                for (subgraph, keys) in &entity.keys {
                    for key in keys {
                        let mut arguments = vec![(
                            "key".to_string(),
                            InputValue::String(key.fields.to_string()),
                        )];
                        if !key.resolvable {
                            arguments.push(("resolvable".to_string(), InputValue::Boolean(false)));
                        }
                        extra.push(join_directive("join__type", subgraph, arguments));
                    }
                }
            } else if let Some(sources) = self.type_sources.get(&def.name) {
                for subgraph in sources {
                    extra.push(join_directive("join__type", subgraph, Vec::new()));
                }
            }

            let annotations = self.fields.get(&def.name);
            let field_extra = |field: &crate::type_graph::FieldDef| -> Vec<Directive> {
                let Some(annotation) = annotations.and_then(|fields| fields.get(&field.name))
                else {
                    return Vec::new();
                };
                let mut directives = Vec::new();
                for subgraph in &annotation.sources {
                    let mut arguments = Vec::new();
                    if let Some(requires) = annotation.requires.get(subgraph) {
                        arguments.push((
                            "requires".to_string(),
                            InputValue::String(requires.to_string()),
                        ));
                    }
                    if let Some(provides) = annotation.provides.get(subgraph) {
                        arguments.push((
                            "provides".to_string(),
                            InputValue::String(provides.to_string()),
                        ));
                    }
                    directives.push(join_directive("join__field", subgraph, arguments));
                }
                for subgraph in &annotation.external_in {
                    let mut arguments = vec![("external".to_string(), InputValue::Boolean(true))];
                    if let Some(provides) = annotation.provides.get(subgraph) {
                        arguments.push((
                            "provides".to_string(),
                            InputValue::String(provides.to_string()),
                        ));
                    }
                    directives.push(join_directive("join__field", subgraph, arguments));
                }
                directives
            };

            out.push('\n');
            write_type(&mut out, def, &extra, &field_extra);
        }
        out
    }
}

fn graph_enum_name(subgraph: &str) -> String {
    subgraph
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn join_directive(name: &str, subgraph: &str, mut arguments: Vec<(String, InputValue)>) -> Directive {
    arguments.insert(
        0,
        (
            "graph".to_string(),
            InputValue::Enum(graph_enum_name(subgraph)),
        ),
    );
    Directive {
        name: name.to_string(),
        arguments,
    }
}
