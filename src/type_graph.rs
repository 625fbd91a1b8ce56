//! In-memory type graph for a single subgraph (or the merged supergraph).
//!
//! Federation directives (`@key`, `@extends`, `@external`, `@requires`,
//! `@provides`) are lifted out of the raw directive lists into typed
//! annotations; every other directive is kept verbatim and printed back.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use graphql_parser::query::{Definition, OperationDefinition, Selection};
use serde_json::{Map, Value};

pub const BUILTIN_SCALARS: [&str; 5] = ["Boolean", "Float", "ID", "Int", "String"];

/// A reference to a type from a field or argument, e.g. `[User!]!`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    /// The innermost named type.
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.name(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
            TypeRef::Named(_) => false,
        }
    }

    pub(crate) fn from_ast(ty: &graphql_parser::schema::Type<'_, String>) -> Self {
        use graphql_parser::schema::Type;
        match ty {
            Type::NamedType(name) => TypeRef::Named(name.clone()),
            Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

/// A GraphQL value literal, as written in SDL directive arguments or in
/// operation field arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    pub(crate) fn from_ast(value: &graphql_parser::query::Value<'_, String>) -> Self {
        use graphql_parser::query::Value as Ast;
        match value {
            Ast::Variable(name) => InputValue::Variable(name.clone()),
            Ast::Int(number) => InputValue::Int(number.as_i64().unwrap_or_default()),
            Ast::Float(float) => InputValue::Float(*float),
            Ast::String(string) => InputValue::String(string.clone()),
            Ast::Boolean(boolean) => InputValue::Boolean(*boolean),
            Ast::Null => InputValue::Null,
            Ast::Enum(name) => InputValue::Enum(name.clone()),
            Ast::List(items) => InputValue::List(items.iter().map(InputValue::from_ast).collect()),
            Ast::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::String(string) => Some(string),
            _ => None,
        }
    }

    /// Resolves the literal to JSON, substituting variables.
    pub fn to_json(&self, variables: &Map<String, Value>) -> Value {
        match self {
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            InputValue::Int(int) => Value::from(*int),
            InputValue::Float(float) => Value::from(*float),
            InputValue::String(string) | InputValue::Enum(string) => Value::String(string.clone()),
            InputValue::Boolean(boolean) => Value::Bool(*boolean),
            InputValue::Null => Value::Null,
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }

    /// Collects the names of all variables referenced by this value.
    pub fn variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            InputValue::Variable(name) => out.push(name),
            InputValue::List(items) => items.iter().for_each(|item| item.variables(out)),
            InputValue::Object(fields) => fields.iter().for_each(|(_, value)| value.variables(out)),
            _ => {}
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${}", name),
            InputValue::Int(int) => write!(f, "{}", int),
            InputValue::Float(float) if float.is_finite() && float.fract() == 0.0 => {
                write!(f, "{:.1}", float)
            }
            InputValue::Float(float) => write!(f, "{}", float),
            InputValue::String(string) => f.write_str(&quote(string)),
            InputValue::Boolean(boolean) => write!(f, "{}", boolean),
            InputValue::Null => f.write_str("null"),
            InputValue::Enum(name) => f.write_str(name),
            InputValue::List(items) => {
                f.write_char('[')?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_char(']')
            }
            InputValue::Object(fields) => {
                f.write_char('{')?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_char('}')
            }
        }
    }
}

/// Quotes a string as a GraphQL string literal.
pub(crate) fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// A directive application, kept as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
}

impl Directive {
    pub fn argument(&self, name: &str) -> Option<&InputValue> {
        self.arguments
            .iter()
            .find(|(argument, _)| argument == name)
            .map(|(_, value)| value)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.arguments.is_empty() {
            f.write_char('(')?;
            for (index, (name, value)) in self.arguments.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {}", name, value)?;
            }
            f.write_char(')')?;
        }
        Ok(())
    }
}

/// A selection of fields used by `@key`, `@requires` and `@provides`,
/// e.g. `id organization { id }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSet(pub Vec<FieldSetItem>);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSetItem {
    pub name: String,
    pub selections: FieldSet,
}

impl FieldSet {
    pub fn parse(source: &str) -> Result<FieldSet, String> {
        let wrapped = format!("{{{}}}", source);
        let document = graphql_parser::parse_query::<String>(&wrapped)
            .map_err(|e| format!("invalid field set \"{}\": {}", source, e))?;
        let mut sets = document.definitions.iter().filter_map(|definition| match definition {
            Definition::Operation(OperationDefinition::SelectionSet(set)) => Some(set),
            _ => None,
        });
        let set = sets
            .next()
            .ok_or_else(|| format!("invalid field set \"{}\"", source))?;
        let field_set = Self::from_selection_set(source, set)?;
        if field_set.is_empty() {
            return Err(format!("field set \"{}\" is empty", source));
        }
        Ok(field_set)
    }

    fn from_selection_set(
        source: &str,
        set: &graphql_parser::query::SelectionSet<'_, String>,
    ) -> Result<FieldSet, String> {
        let mut items = Vec::new();
        for selection in &set.items {
            match selection {
                Selection::Field(field) if field.alias.is_none() && field.arguments.is_empty() => {
                    items.push(FieldSetItem {
                        name: field.name.clone(),
                        selections: Self::from_selection_set(source, &field.selection_set)?,
                    });
                }
                _ => {
                    return Err(format!(
                        "field set \"{}\" may only contain plain fields",
                        source
                    ));
                }
            }
        }
        Ok(FieldSet(items))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSetItem> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSetItem> {
        self.0.iter().find(|item| item.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds every field of `other` not yet present, recursively.
    pub fn merge(&mut self, other: &FieldSet) {
        for item in &other.0 {
            match self.0.iter_mut().find(|existing| existing.name == item.name) {
                Some(existing) => existing.selections.merge(&item.selections),
                None => self.0.push(item.clone()),
            }
        }
    }

    /// Copies the selected members out of a JSON object. A member stored
    /// under `alias(name)` wins over one stored under its plain name.
    pub fn project(&self, value: &Value, alias: &dyn Fn(&str) -> String) -> Value {
        match value {
            Value::Object(object) => {
                let mut projected = Map::new();
                for item in &self.0 {
                    let member = object
                        .get(&alias(&item.name))
                        .or_else(|| object.get(&item.name))
                        .cloned()
                        .unwrap_or(Value::Null);
                    let member = if item.selections.is_empty() {
                        member
                    } else {
                        item.selections.project(&member, alias)
                    };
                    projected.insert(item.name.clone(), member);
                }
                Value::Object(projected)
            }
            Value::Array(items) => Value::Array(items.iter().map(|item| self.project(item, alias)).collect()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, item) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_char(' ')?;
            }
            f.write_str(&item.name)?;
            if !item.selections.is_empty() {
                write!(f, " {{ {} }}", item.selections)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
    pub directives: Vec<Directive>,
}

/// A field of an object, interface or input object type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDef>,
    /// Only meaningful for input object fields.
    pub default_value: Option<InputValue>,
    pub directives: Vec<Directive>,
    pub external: bool,
    pub requires: Option<FieldSet>,
    pub provides: Option<FieldSet>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        FieldDef {
            name: name.into(),
            description: None,
            ty,
            arguments: Vec::new(),
            default_value: None,
            directives: Vec::new(),
            external: false,
            requires: None,
            provides: None,
        }
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDef> {
        self.arguments.iter().find(|argument| argument.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Object => "type",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::InputObject => "input",
        })
    }
}

/// `@key(fields: "...", resolvable: ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDirective {
    pub fields: FieldSet,
    pub resolvable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub implements: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub members: Vec<String>,
    pub values: Vec<EnumValueDef>,
    pub directives: Vec<Directive>,
    pub keys: Vec<KeyDirective>,
    /// Declared with `extend type` or `@extends`.
    pub extension: bool,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDef {
            name: name.into(),
            kind,
            description: None,
            implements: Vec::new(),
            fields: Vec::new(),
            members: Vec::new(),
            values: Vec::new(),
            directives: Vec::new(),
            keys: Vec::new(),
            extension: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }
}

/// Mapping from type name to definition, plus the root operation types.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeGraph {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub types: BTreeMap<String, TypeDef>,
}

impl Default for TypeGraph {
    fn default() -> Self {
        TypeGraph {
            query_type: "Query".to_string(),
            mutation_type: None,
            types: BTreeMap::new(),
        }
    }
}

impl TypeGraph {
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.field(field_name)
    }

    /// Whether a named type reference resolves within this graph.
    pub fn resolves(&self, name: &str) -> bool {
        self.types.contains_key(name) || BUILTIN_SCALARS.contains(&name)
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type
            .as_deref()
            .filter(|name| self.types.contains_key(*name))
    }

    /// Whether an object of type `concrete` satisfies a type condition.
    pub fn satisfies(&self, concrete: &str, condition: &str) -> bool {
        if concrete == condition {
            return true;
        }
        match self.types.get(condition) {
            Some(def) if def.kind == TypeKind::Union => def.members.iter().any(|m| m == concrete),
            Some(def) if def.kind == TypeKind::Interface => self
                .types
                .get(concrete)
                .is_some_and(|object| object.implements.iter().any(|i| i == condition)),
            _ => false,
        }
    }

    /// Prints the graph as SDL. Parsing the output yields an equal graph.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();
        let default_mutation = self.mutation_type.as_deref().is_none_or(|m| m == "Mutation");
        if self.query_type != "Query" || !default_mutation {
            let _ = write!(out, "schema {{\n  query: {}\n", self.query_type);
            if let Some(mutation) = &self.mutation_type {
                let _ = writeln!(out, "  mutation: {}", mutation);
            }
            out.push_str("}\n\n");
        }
        for def in self.types.values() {
            write_type(&mut out, def, &[], &|_| Vec::new());
            out.push('\n');
        }
        out
    }
}

fn write_description(out: &mut String, description: &Option<String>, indent: &str) {
    if let Some(description) = description {
        let _ = writeln!(out, "{}{}", indent, quote(description));
    }
}

fn write_directives(out: &mut String, directives: &[Directive]) {
    for directive in directives {
        let _ = write!(out, " {}", directive);
    }
}

/// Writes one type definition. `extra` directives are appended to the
/// type header and `field_extra` supplies per-field ones; the supergraph
/// printer uses both for ownership annotations.
pub(crate) fn write_type(
    out: &mut String,
    def: &TypeDef,
    extra: &[Directive],
    field_extra: &dyn Fn(&FieldDef) -> Vec<Directive>,
) {
    write_description(out, &def.description, "");
    if def.extension {
        out.push_str("extend ");
    }
    let _ = write!(out, "{} {}", def.kind, def.name);
    if !def.implements.is_empty() {
        let _ = write!(out, " implements {}", def.implements.join(" & "));
    }
    for key in &def.keys {
        let _ = write!(out, " @key(fields: {}", quote(&key.fields.to_string()));
        if !key.resolvable {
            out.push_str(", resolvable: false");
        }
        out.push(')');
    }
    write_directives(out, &def.directives);
    write_directives(out, extra);
    match def.kind {
        TypeKind::Scalar => out.push('\n'),
        TypeKind::Union => {
            if !def.members.is_empty() {
                let _ = write!(out, " = {}", def.members.join(" | "));
            }
            out.push('\n');
        }
        TypeKind::Enum => {
            if def.values.is_empty() {
                out.push('\n');
                return;
            }
            out.push_str(" {\n");
            for value in &def.values {
                write_description(out, &value.description, "  ");
                let _ = write!(out, "  {}", value.name);
                write_directives(out, &value.directives);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::Object | TypeKind::Interface | TypeKind::InputObject => {
            if def.fields.is_empty() {
                out.push('\n');
                return;
            }
            out.push_str(" {\n");
            for field in &def.fields {
                write_field(out, field, &field_extra(field));
            }
            out.push_str("}\n");
        }
    }
}

fn write_field(out: &mut String, field: &FieldDef, extra: &[Directive]) {
    write_description(out, &field.description, "  ");
    let _ = write!(out, "  {}", field.name);
    if !field.arguments.is_empty() {
        out.push('(');
        for (index, argument) in field.arguments.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            if let Some(description) = &argument.description {
                let _ = write!(out, "{} ", quote(description));
            }
            let _ = write!(out, "{}: {}", argument.name, argument.ty);
            if let Some(default) = &argument.default_value {
                let _ = write!(out, " = {}", default);
            }
            write_directives(out, &argument.directives);
        }
        out.push(')');
    }
    let _ = write!(out, ": {}", field.ty);
    if let Some(default) = &field.default_value {
        let _ = write!(out, " = {}", default);
    }
    if field.external {
        out.push_str(" @external");
    }
    if let Some(requires) = &field.requires {
        let _ = write!(out, " @requires(fields: {})", quote(&requires.to_string()));
    }
    if let Some(provides) = &field.provides {
        let _ = write!(out, " @provides(fields: {})", quote(&provides.to_string()));
    }
    write_directives(out, &field.directives);
    write_directives(out, extra);
    out.push('\n');
}
