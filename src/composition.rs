//! Schema composition: N subgraph type graphs into one [`Supergraph`].
//!
//! Subgraphs are always visited sorted by name, so the result never
//! depends on registration order. Every conflict is collected before
//! composition gives up.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CompositionError, CompositionErrorKind, CompositionErrors, ParseError};
use crate::sdl;
use crate::supergraph::{EntityInfo, FieldAnnotation, SubgraphInfo, Supergraph};
use crate::type_graph::{FieldDef, FieldSet, TypeDef, TypeGraph, TypeKind, TypeRef};

/// A parsed subgraph schema and where to reach the subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphSchema {
    pub name: String,
    pub url: String,
    pub graph: TypeGraph,
}

impl SubgraphSchema {
    pub fn parse(
        name: impl Into<String>,
        url: impl Into<String>,
        sdl_text: &str,
    ) -> Result<Self, ParseError> {
        Ok(SubgraphSchema {
            name: name.into(),
            url: url.into(),
            graph: sdl::parse(sdl_text)?,
        })
    }
}

pub fn compose(subgraphs: &[SubgraphSchema]) -> Result<Supergraph, CompositionErrors> {
    let mut composer = Composer::default();

    let mut sorted: Vec<&SubgraphSchema> = subgraphs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let mut graphs: Vec<(&str, TypeGraph)> = Vec::with_capacity(sorted.len());
    for subgraph in sorted {
        if composer.subgraphs.contains_key(&subgraph.name) {
            composer.error(
                CompositionErrorKind::DuplicateSubgraph,
                &subgraph.name,
                None,
                vec![subgraph.name.clone()],
                format!("subgraph `{}` is registered more than once", subgraph.name),
            );
            continue;
        }
        composer.subgraphs.insert(
            subgraph.name.clone(),
            SubgraphInfo {
                name: subgraph.name.clone(),
                url: subgraph.url.clone(),
            },
        );
        graphs.push((&subgraph.name, normalize_roots(&subgraph.graph)));
    }

    let type_names: BTreeSet<&str> = graphs
        .iter()
        .flat_map(|(_, graph)| graph.types.keys().map(String::as_str))
        .collect();
    for type_name in type_names {
        let defs: Vec<(&str, &TypeDef)> = graphs
            .iter()
            .filter_map(|(subgraph, graph)| graph.get(type_name).map(|def| (*subgraph, def)))
            .collect();
        composer.merge_type(type_name, &defs);
    }
    composer.validate_field_sets();
    composer.validate_references();
    composer.require_query_root(graphs.is_empty());
    composer.finish()
}

/// Renames custom root operation types to `Query` and `Mutation`.
fn normalize_roots(graph: &TypeGraph) -> TypeGraph {
    let mut renames = BTreeMap::new();
    if graph.query_type != "Query" {
        renames.insert(graph.query_type.clone(), "Query".to_string());
    }
    if let Some(mutation) = graph.mutation_type() {
        if mutation != "Mutation" {
            renames.insert(mutation.to_string(), "Mutation".to_string());
        }
    }
    let mutation_type = graph.mutation_type().map(|_| "Mutation".to_string());
    if renames.is_empty() {
        let mut graph = graph.clone();
        graph.mutation_type = mutation_type;
        return graph;
    }

    let rename = |name: &str| renames.get(name).cloned().unwrap_or_else(|| name.to_string());
    let types = graph
        .types
        .values()
        .map(|def| {
            let mut def = def.clone();
            def.name = rename(&def.name);
            for field in &mut def.fields {
                field.ty = rename_ref(&field.ty, &rename);
            }
            (def.name.clone(), def)
        })
        .collect();
    TypeGraph {
        query_type: "Query".to_string(),
        mutation_type,
        types,
    }
}

fn rename_ref(ty: &TypeRef, rename: &dyn Fn(&str) -> String) -> TypeRef {
    match ty {
        TypeRef::Named(name) => TypeRef::Named(rename(name)),
        TypeRef::List(inner) => TypeRef::List(Box::new(rename_ref(inner, rename))),
        TypeRef::NonNull(inner) => TypeRef::NonNull(Box::new(rename_ref(inner, rename))),
    }
}

#[derive(Default)]
struct Composer {
    subgraphs: BTreeMap<String, SubgraphInfo>,
    schema: TypeGraph,
    fields: BTreeMap<String, BTreeMap<String, FieldAnnotation>>,
    entities: BTreeMap<String, EntityInfo>,
    type_sources: BTreeMap<String, Vec<String>>,
    errors: Vec<CompositionError>,
}

impl Composer {
    fn error(
        &mut self,
        kind: CompositionErrorKind,
        type_name: &str,
        field: Option<&str>,
        subgraphs: Vec<String>,
        message: String,
    ) {
        self.errors.push(CompositionError {
            kind,
            type_name: type_name.to_string(),
            field: field.map(str::to_string),
            subgraphs,
            message,
        });
    }

    fn merge_type(&mut self, type_name: &str, defs: &[(&str, &TypeDef)]) {
        let Some((_, first)) = defs.first() else {
            return;
        };
        let names = |defs: &[(&str, &TypeDef)]| -> Vec<String> {
            defs.iter().map(|(subgraph, _)| subgraph.to_string()).collect()
        };

        if defs.iter().any(|(_, def)| def.kind != first.kind) {
            let kinds: Vec<String> = defs
                .iter()
                .map(|(subgraph, def)| format!("{} in {}", def.kind, subgraph))
                .collect();
            self.error(
                CompositionErrorKind::TypeKindMismatch,
                type_name,
                None,
                names(defs),
                format!("`{}` is declared with different kinds: {}", type_name, kinds.join(", ")),
            );
            return;
        }

        let ordered = match self.merge_entity(type_name, defs) {
            Some(owner) => {
                let mut ordered: Vec<(&str, &TypeDef)> =
                    defs.iter().copied().filter(|(s, _)| *s == owner).collect();
                ordered.extend(defs.iter().copied().filter(|(s, _)| *s != owner));
                ordered
            }
            None => defs.to_vec(),
        };

        let mut merged = TypeDef::new(type_name, first.kind);
        let mut annotations: BTreeMap<String, FieldAnnotation> = BTreeMap::new();
        let mut signatures: BTreeMap<String, BTreeMap<TypeRef, Vec<String>>> = BTreeMap::new();

        for (subgraph, def) in &ordered {
            if merged.description.is_none() {
                merged.description = def.description.clone();
            }
            for interface in &def.implements {
                if !merged.implements.contains(interface) {
                    merged.implements.push(interface.clone());
                }
            }
            for member in &def.members {
                if !merged.members.contains(member) {
                    merged.members.push(member.clone());
                }
            }
            for value in &def.values {
                if !merged.values.iter().any(|v| v.name == value.name) {
                    merged.values.push(value.clone());
                }
            }
            for directive in &def.directives {
                if !merged.directives.contains(directive) {
                    merged.directives.push(directive.clone());
                }
            }

            for field in &def.fields {
                signatures
                    .entry(field.name.clone())
                    .or_default()
                    .entry(field.ty.clone())
                    .or_default()
                    .push(subgraph.to_string());

                match merged.fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => {
                        self.merge_arguments(type_name, existing, field, subgraph);
                        if existing.description.is_none() {
                            existing.description = field.description.clone();
                        }
                    }
                    None => merged.fields.push(strip_federation(field)),
                }

                if def.kind == TypeKind::InputObject {
                    continue;
                }
                let annotation = annotations.entry(field.name.clone()).or_default();
                if field.external {
                    annotation.external_in.push(subgraph.to_string());
                } else {
                    annotation.sources.push(subgraph.to_string());
                }
                if let Some(requires) = &field.requires {
                    annotation.requires.insert(subgraph.to_string(), requires.clone());
                }
                if let Some(provides) = &field.provides {
                    annotation.provides.insert(subgraph.to_string(), provides.clone());
                }
            }
        }

        for (field, by_type) in &signatures {
            if by_type.len() > 1 {
                let mut subgraphs: Vec<String> = by_type.values().flatten().cloned().collect();
                subgraphs.sort();
                let described: Vec<String> = by_type
                    .iter()
                    .map(|(ty, subgraphs)| format!("{} in {}", ty, subgraphs.join(", ")))
                    .collect();
                self.error(
                    CompositionErrorKind::FieldTypeMismatch,
                    type_name,
                    Some(field),
                    subgraphs,
                    format!(
                        "`{}.{}` has conflicting types: {}",
                        type_name,
                        field,
                        described.join("; ")
                    ),
                );
            }
        }

        for (field, annotation) in &mut annotations {
            annotation.sources.sort();
            annotation.external_in.sort();
            if annotation.sources.is_empty() {
                let subgraphs = annotation.external_in.clone();
                self.error(
                    CompositionErrorKind::UnresolvableExternalField,
                    type_name,
                    Some(field),
                    subgraphs,
                    format!(
                        "`{}.{}` is @external in every subgraph that declares it",
                        type_name, field
                    ),
                );
            }
        }

        let mut sources = names(defs);
        sources.sort();
        self.type_sources.insert(type_name.to_string(), sources);
        if !annotations.is_empty() {
            self.fields.insert(type_name.to_string(), annotations);
        }
        self.schema.types.insert(type_name.to_string(), merged);
        if type_name == "Mutation" {
            self.schema.mutation_type = Some("Mutation".to_string());
        }
    }

    /// Checks entity ownership and key agreement. Returns the owner.
    fn merge_entity<'a>(&mut self, type_name: &str, defs: &[(&'a str, &TypeDef)]) -> Option<&'a str> {
        if !defs.iter().any(|(_, def)| def.is_entity()) {
            return None;
        }
        let all: Vec<String> = defs.iter().map(|(s, _)| s.to_string()).collect();
        let bases: Vec<&str> = defs
            .iter()
            .filter(|(_, def)| !def.extension)
            .map(|(subgraph, _)| *subgraph)
            .collect();

        let owner = match bases.as_slice() {
            [] => {
                self.error(
                    CompositionErrorKind::MissingEntityOwner,
                    type_name,
                    None,
                    all,
                    format!("entity `{}` is only ever extended, no subgraph defines it", type_name),
                );
                return None;
            }
            [owner] => *owner,
            many => {
                self.error(
                    CompositionErrorKind::MultipleEntityOwners,
                    type_name,
                    None,
                    many.iter().map(|s| s.to_string()).collect(),
                    format!(
                        "entity `{}` is defined by more than one subgraph: {}",
                        type_name,
                        many.join(", ")
                    ),
                );
                return None;
            }
        };

        let owner_keys: Vec<FieldSet> = defs
            .iter()
            .find(|(subgraph, _)| *subgraph == owner)
            .map(|(_, def)| def.keys.iter().map(|key| key.fields.clone()).collect())
            .unwrap_or_default();
        if owner_keys.is_empty() {
            self.error(
                CompositionErrorKind::KeyMismatch,
                type_name,
                None,
                vec![owner.to_string()],
                format!("owner `{}` of entity `{}` declares no @key", owner, type_name),
            );
        }

        let mut keys = BTreeMap::new();
        for (subgraph, def) in defs {
            if *subgraph != owner {
                if def.keys.is_empty() {
                    self.error(
                        CompositionErrorKind::KeyMismatch,
                        type_name,
                        None,
                        vec![owner.to_string(), subgraph.to_string()],
                        format!(
                            "`{}` extends entity `{}` without declaring a @key",
                            subgraph, type_name
                        ),
                    );
                }
                for key in &def.keys {
                    if !owner_keys.contains(&key.fields) {
                        self.error(
                            CompositionErrorKind::KeyMismatch,
                            type_name,
                            None,
                            vec![owner.to_string(), subgraph.to_string()],
                            format!(
                                "`{}` declares @key(fields: \"{}\") on `{}` which `{}` does not",
                                subgraph, key.fields, type_name, owner
                            ),
                        );
                    }
                }
            }
            if !def.keys.is_empty() {
                keys.insert(subgraph.to_string(), def.keys.clone());
            }
        }

        self.entities.insert(
            type_name.to_string(),
            EntityInfo {
                owner: owner.to_string(),
                keys,
            },
        );
        Some(owner)
    }

    fn merge_arguments(&mut self, type_name: &str, existing: &mut FieldDef, field: &FieldDef, subgraph: &str) {
        for argument in &field.arguments {
            match existing.argument(&argument.name) {
                Some(known) if known.ty != argument.ty => {
                    let message = format!(
                        "argument `{}.{}({}:)` is `{}` in one subgraph and `{}` in `{}`",
                        type_name, field.name, argument.name, known.ty, argument.ty, subgraph
                    );
                    self.error(
                        CompositionErrorKind::ArgumentTypeMismatch,
                        type_name,
                        Some(&field.name),
                        vec![subgraph.to_string()],
                        message,
                    );
                }
                Some(_) => {}
                None => existing.arguments.push(argument.clone()),
            }
        }
    }

    /// `@requires` must name resolvable fields of the same type and
    /// `@provides` must name fields of the returned type.
    fn validate_field_sets(&mut self) {
        let mut problems = Vec::new();
        for (type_name, fields) in &self.fields {
            for (field_name, annotation) in fields {
                for (subgraph, requires) in &annotation.requires {
                    for item in requires.iter() {
                        let resolvable = self
                            .fields
                            .get(type_name)
                            .and_then(|fields| fields.get(&item.name))
                            .is_some_and(|required| !required.sources.is_empty());
                        if !resolvable {
                            problems.push((
                                CompositionErrorKind::InvalidRequires,
                                type_name.clone(),
                                field_name.clone(),
                                subgraph.clone(),
                                format!(
                                    "`{}.{}` requires `{}` which no subgraph resolves",
                                    type_name, field_name, item.name
                                ),
                            ));
                        }
                    }
                }
                let Some(return_type) = self
                    .schema
                    .field(type_name, field_name)
                    .map(|field| field.ty.name().to_string())
                else {
                    continue;
                };
                for (subgraph, provides) in &annotation.provides {
                    for item in provides.iter() {
                        if self.schema.field(&return_type, &item.name).is_none() {
                            problems.push((
                                CompositionErrorKind::InvalidProvides,
                                type_name.clone(),
                                field_name.clone(),
                                subgraph.clone(),
                                format!(
                                    "`{}.{}` provides `{}.{}` which does not exist",
                                    type_name, field_name, return_type, item.name
                                ),
                            ));
                        }
                    }
                }
            }
        }
        for (kind, type_name, field, subgraph, message) in problems {
            self.error(kind, &type_name, Some(&field), vec![subgraph], message);
        }
    }

    fn validate_references(&mut self) {
        let mut problems = Vec::new();
        for def in self.schema.types.values() {
            for field in &def.fields {
                if !self.schema.resolves(field.ty.name()) {
                    problems.push((def.name.clone(), field.name.clone(), field.ty.name().to_string()));
                }
            }
        }
        for (type_name, field, missing) in problems {
            let subgraphs = self.type_sources.get(&type_name).cloned().unwrap_or_default();
            self.error(
                CompositionErrorKind::UndefinedType,
                &type_name,
                Some(&field),
                subgraphs,
                format!("`{}.{}` references undefined type `{}`", type_name, field, missing),
            );
        }
    }

    /// A supergraph nobody can query is never a valid result.
    fn require_query_root(&mut self, no_subgraphs: bool) {
        if no_subgraphs {
            self.error(
                CompositionErrorKind::MissingQueryType,
                "Query",
                None,
                Vec::new(),
                "there are no subgraphs to compose".to_string(),
            );
        } else if self.schema.get("Query").is_none() {
            let subgraphs = self.subgraphs.keys().cloned().collect();
            self.error(
                CompositionErrorKind::MissingQueryType,
                "Query",
                None,
                subgraphs,
                "no subgraph defines a `Query` root type".to_string(),
            );
        }
    }

    fn finish(self) -> Result<Supergraph, CompositionErrors> {
        if !self.errors.is_empty() {
            return Err(CompositionErrors(self.errors));
        }
        Ok(Supergraph {
            schema: self.schema,
            subgraphs: self.subgraphs,
            fields: self.fields,
            entities: self.entities,
            type_sources: self.type_sources,
        })
    }
}

fn strip_federation(field: &FieldDef) -> FieldDef {
    let mut field = field.clone();
    field.external = false;
    field.requires = None;
    field.provides = None;
    field
}
