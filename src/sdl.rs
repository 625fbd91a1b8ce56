//! SDL parser: subgraph schema text to [`TypeGraph`].

use std::collections::HashMap;

use graphql_parser::Pos;
use graphql_parser::schema::{self as ast, Definition, TypeDefinition, TypeExtension};

use crate::error::ParseError;
use crate::type_graph::{
    ArgumentDef, Directive, EnumValueDef, FieldDef, FieldSet, InputValue, KeyDirective, TypeDef,
    TypeGraph, TypeKind, TypeRef,
};

/// Federation plumbing that subgraphs expose but the gateway never plans over.
const FEDERATION_TYPES: [&str; 4] = ["_Any", "_Entity", "_FieldSet", "_Service"];
const FEDERATION_ROOT_FIELDS: [&str; 2] = ["_entities", "_service"];

type Ast<'a> = ast::Document<'a, String>;

/// Parses subgraph SDL, lifting federation directives into typed
/// annotations. Unknown directives are preserved untouched.
pub fn parse(sdl: &str) -> Result<TypeGraph, ParseError> {
    let document: Ast<'_> = graphql_parser::parse_schema::<String>(sdl).map_err(|e| {
        let message = e.to_string();
        let (line, column) = locate(&message);
        ParseError::new(line, column, message)
    })?;

    let mut builder = GraphBuilder::default();
    for definition in &document.definitions {
        match definition {
            Definition::SchemaDefinition(schema) => {
                if let Some(query) = &schema.query {
                    builder.query_type = Some(query.clone());
                }
                if let Some(mutation) = &schema.mutation {
                    builder.mutation_type = Some(mutation.clone());
                }
            }
            Definition::TypeDefinition(def) => builder.add_definition(def)?,
            Definition::TypeExtension(ext) => builder.add_extension(ext)?,
            Definition::DirectiveDefinition(_) => {}
        }
    }
    builder.finish()
}

/// Recovers the `line:column` from a parser error message.
fn locate(message: &str) -> (usize, usize) {
    let Some(index) = message.find(" at ") else {
        return (0, 0);
    };
    let rest = &message[index + 4..];
    let position: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':')
        .collect();
    let mut parts = position.split(':');
    let line = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let column = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (line, column)
}

fn error_at(pos: Pos, message: impl Into<String>) -> ParseError {
    ParseError::new(pos.line, pos.column, message)
}

#[derive(Default)]
struct GraphBuilder {
    query_type: Option<String>,
    mutation_type: Option<String>,
    types: HashMap<String, TypeDef>,
    /// Types seen only through `extend` so far.
    extension_only: HashMap<String, bool>,
    positions: HashMap<String, Pos>,
}

impl GraphBuilder {
    fn add_definition(&mut self, def: &TypeDefinition<'_, String>) -> Result<(), ParseError> {
        let (pos, mut type_def) = match def {
            TypeDefinition::Scalar(scalar) => {
                let mut type_def = TypeDef::new(scalar.name.clone(), TypeKind::Scalar);
                type_def.description = scalar.description.clone();
                self.apply_type_directives(&mut type_def, &scalar.directives)?;
                (scalar.position, type_def)
            }
            TypeDefinition::Object(object) => {
                let mut type_def = TypeDef::new(object.name.clone(), TypeKind::Object);
                type_def.description = object.description.clone();
                type_def.implements = object.implements_interfaces.clone();
                self.apply_type_directives(&mut type_def, &object.directives)?;
                type_def.fields = self.convert_fields(&object.name, &object.fields)?;
                (object.position, type_def)
            }
            TypeDefinition::Interface(interface) => {
                let mut type_def = TypeDef::new(interface.name.clone(), TypeKind::Interface);
                type_def.description = interface.description.clone();
                self.apply_type_directives(&mut type_def, &interface.directives)?;
                type_def.fields = self.convert_fields(&interface.name, &interface.fields)?;
                (interface.position, type_def)
            }
            TypeDefinition::Union(union) => {
                let mut type_def = TypeDef::new(union.name.clone(), TypeKind::Union);
                type_def.description = union.description.clone();
                type_def.members = union.types.clone();
                self.apply_type_directives(&mut type_def, &union.directives)?;
                (union.position, type_def)
            }
            TypeDefinition::Enum(enumeration) => {
                let mut type_def = TypeDef::new(enumeration.name.clone(), TypeKind::Enum);
                type_def.description = enumeration.description.clone();
                type_def.values = convert_enum_values(&enumeration.values);
                self.apply_type_directives(&mut type_def, &enumeration.directives)?;
                (enumeration.position, type_def)
            }
            TypeDefinition::InputObject(input) => {
                let mut type_def = TypeDef::new(input.name.clone(), TypeKind::InputObject);
                type_def.description = input.description.clone();
                self.apply_type_directives(&mut type_def, &input.directives)?;
                type_def.fields = self.convert_input_fields(&input.name, &input.fields)?;
                (input.position, type_def)
            }
        };

        let name = type_def.name.clone();
        match self.extension_only.get(&name) {
            Some(true) => {
                // Extensions were declared earlier in the same document.
                if let Some(extension) = self.types.remove(&name) {
                    merge_into(&mut type_def, extension, pos)?;
                }
            }
            Some(false) => {
                return Err(error_at(pos, format!("duplicate definition of type `{}`", name)));
            }
            None => {}
        }
        self.extension_only.insert(name.clone(), false);
        self.positions.insert(name.clone(), pos);
        self.types.insert(name, type_def);
        Ok(())
    }

    fn add_extension(&mut self, ext: &TypeExtension<'_, String>) -> Result<(), ParseError> {
        let (pos, mut type_def) = match ext {
            TypeExtension::Scalar(scalar) => {
                let mut type_def = TypeDef::new(scalar.name.clone(), TypeKind::Scalar);
                self.apply_type_directives(&mut type_def, &scalar.directives)?;
                (scalar.position, type_def)
            }
            TypeExtension::Object(object) => {
                let mut type_def = TypeDef::new(object.name.clone(), TypeKind::Object);
                type_def.implements = object.implements_interfaces.clone();
                self.apply_type_directives(&mut type_def, &object.directives)?;
                type_def.fields = self.convert_fields(&object.name, &object.fields)?;
                (object.position, type_def)
            }
            TypeExtension::Interface(interface) => {
                let mut type_def = TypeDef::new(interface.name.clone(), TypeKind::Interface);
                self.apply_type_directives(&mut type_def, &interface.directives)?;
                type_def.fields = self.convert_fields(&interface.name, &interface.fields)?;
                (interface.position, type_def)
            }
            TypeExtension::Union(union) => {
                let mut type_def = TypeDef::new(union.name.clone(), TypeKind::Union);
                type_def.members = union.types.clone();
                self.apply_type_directives(&mut type_def, &union.directives)?;
                (union.position, type_def)
            }
            TypeExtension::Enum(enumeration) => {
                let mut type_def = TypeDef::new(enumeration.name.clone(), TypeKind::Enum);
                type_def.values = convert_enum_values(&enumeration.values);
                self.apply_type_directives(&mut type_def, &enumeration.directives)?;
                (enumeration.position, type_def)
            }
            TypeExtension::InputObject(input) => {
                let mut type_def = TypeDef::new(input.name.clone(), TypeKind::InputObject);
                self.apply_type_directives(&mut type_def, &input.directives)?;
                type_def.fields = self.convert_input_fields(&input.name, &input.fields)?;
                (input.position, type_def)
            }
        };
        type_def.extension = true;

        let name = type_def.name.clone();
        match self.types.get_mut(&name) {
            Some(existing) => merge_into(existing, type_def, pos)?,
            None => {
                self.extension_only.insert(name.clone(), true);
                self.positions.insert(name.clone(), pos);
                self.types.insert(name, type_def);
            }
        }
        Ok(())
    }

    fn apply_type_directives(
        &self,
        type_def: &mut TypeDef,
        directives: &[ast::Directive<'_, String>],
    ) -> Result<(), ParseError> {
        for directive in directives {
            match directive.name.as_str() {
                "key" => {
                    check_arguments(directive, &["fields", "resolvable"])?;
                    let fields = field_set_argument(directive, "fields")?.ok_or_else(|| {
                        error_at(directive.position, "@key requires a `fields` argument")
                    })?;
                    let resolvable = match directive
                        .arguments
                        .iter()
                        .find(|(name, _)| name == "resolvable")
                    {
                        Some((_, ast::Value::Boolean(value))) => *value,
                        Some(_) => {
                            return Err(error_at(
                                directive.position,
                                "@key(resolvable:) must be a boolean",
                            ));
                        }
                        None => true,
                    };
                    type_def.keys.push(KeyDirective { fields, resolvable });
                }
                "extends" => {
                    check_arguments(directive, &[])?;
                    type_def.extension = true;
                }
                _ => type_def.directives.push(convert_directive(directive)),
            }
        }
        Ok(())
    }

    fn convert_fields(
        &mut self,
        type_name: &str,
        fields: &[ast::Field<'_, String>],
    ) -> Result<Vec<FieldDef>, ParseError> {
        let mut converted = Vec::with_capacity(fields.len());
        for field in fields {
            let mut field_def = FieldDef::new(field.name.clone(), TypeRef::from_ast(&field.field_type));
            field_def.description = field.description.clone();
            field_def.arguments = field.arguments.iter().map(convert_argument).collect();
            for directive in &field.directives {
                match directive.name.as_str() {
                    "external" => {
                        check_arguments(directive, &["reason"])?;
                        field_def.external = true;
                    }
                    "requires" => {
                        check_arguments(directive, &["fields"])?;
                        field_def.requires = field_set_argument(directive, "fields")?;
                        if field_def.requires.is_none() {
                            return Err(error_at(
                                directive.position,
                                "@requires requires a `fields` argument",
                            ));
                        }
                    }
                    "provides" => {
                        check_arguments(directive, &["fields"])?;
                        field_def.provides = field_set_argument(directive, "fields")?;
                        if field_def.provides.is_none() {
                            return Err(error_at(
                                directive.position,
                                "@provides requires a `fields` argument",
                            ));
                        }
                    }
                    _ => field_def.directives.push(convert_directive(directive)),
                }
            }
            self.positions
                .insert(format!("{}.{}", type_name, field.name), field.position);
            converted.push(field_def);
        }
        Ok(converted)
    }

    fn convert_input_fields(
        &mut self,
        type_name: &str,
        fields: &[ast::InputValue<'_, String>],
    ) -> Result<Vec<FieldDef>, ParseError> {
        Ok(fields
            .iter()
            .map(|field| {
                self.positions
                    .insert(format!("{}.{}", type_name, field.name), field.position);
                let mut field_def =
                    FieldDef::new(field.name.clone(), TypeRef::from_ast(&field.value_type));
                field_def.description = field.description.clone();
                field_def.default_value = field.default_value.as_ref().map(InputValue::from_ast);
                field_def.directives = field.directives.iter().map(convert_directive).collect();
                field_def
            })
            .collect())
    }

    fn position(&self, key: &str) -> Pos {
        self.positions
            .get(key)
            .copied()
            .unwrap_or(Pos { line: 0, column: 0 })
    }

    fn finish(mut self) -> Result<TypeGraph, ParseError> {
        for name in FEDERATION_TYPES {
            self.types.remove(name);
        }
        let query_type = self.query_type.take().unwrap_or_else(|| "Query".to_string());
        if let Some(query) = self.types.get_mut(&query_type) {
            query
                .fields
                .retain(|field| !FEDERATION_ROOT_FIELDS.contains(&field.name.as_str()));
        }
        let mutation_type = self
            .mutation_type
            .take()
            .or_else(|| self.types.contains_key("Mutation").then(|| "Mutation".to_string()));

        let graph = TypeGraph {
            query_type,
            mutation_type,
            types: self.types.drain().collect(),
        };
        self.validate(&graph)?;
        Ok(graph)
    }

    /// Every reference must resolve and every field set must name declared fields.
    fn validate(&self, graph: &TypeGraph) -> Result<(), ParseError> {
        for def in graph.types.values() {
            let type_pos = self.position(&def.name);
            for interface in &def.implements {
                if !graph.resolves(interface) {
                    return Err(error_at(
                        type_pos,
                        format!("type `{}` implements unknown interface `{}`", def.name, interface),
                    ));
                }
            }
            for member in &def.members {
                if !graph.resolves(member) {
                    return Err(error_at(
                        type_pos,
                        format!("union `{}` references unknown type `{}`", def.name, member),
                    ));
                }
            }
            for field in &def.fields {
                let pos = self.position(&format!("{}.{}", def.name, field.name));
                if !graph.resolves(field.ty.name()) {
                    return Err(error_at(
                        pos,
                        format!(
                            "unknown type `{}` referenced by `{}.{}`",
                            field.ty.name(),
                            def.name,
                            field.name
                        ),
                    ));
                }
                for argument in &field.arguments {
                    if !graph.resolves(argument.ty.name()) {
                        return Err(error_at(
                            pos,
                            format!(
                                "unknown type `{}` referenced by argument `{}.{}({}:)`",
                                argument.ty.name(),
                                def.name,
                                field.name,
                                argument.name
                            ),
                        ));
                    }
                }
                if let Some(requires) = &field.requires {
                    check_field_set(graph, &def.name, requires, pos, "@requires")?;
                }
                if let Some(provides) = &field.provides {
                    check_field_set(graph, field.ty.name(), provides, pos, "@provides")?;
                }
            }
            for key in &def.keys {
                check_field_set(graph, &def.name, &key.fields, type_pos, "@key")?;
            }
        }
        Ok(())
    }
}

fn check_field_set(
    graph: &TypeGraph,
    type_name: &str,
    set: &FieldSet,
    pos: Pos,
    directive: &str,
) -> Result<(), ParseError> {
    for item in set.iter() {
        let field = graph.field(type_name, &item.name).ok_or_else(|| {
            error_at(
                pos,
                format!(
                    "{}(fields: \"{}\") references `{}.{}` which is not declared",
                    directive, set, type_name, item.name
                ),
            )
        })?;
        if !item.selections.is_empty() {
            check_field_set(graph, field.ty.name(), &item.selections, pos, directive)?;
        }
    }
    Ok(())
}

fn merge_into(target: &mut TypeDef, source: TypeDef, pos: Pos) -> Result<(), ParseError> {
    if target.kind != source.kind {
        return Err(error_at(
            pos,
            format!(
                "cannot extend {} `{}` as {}",
                target.kind, target.name, source.kind
            ),
        ));
    }
    for field in source.fields {
        if target.field(&field.name).is_some() {
            return Err(error_at(
                pos,
                format!("field `{}.{}` is declared twice", target.name, field.name),
            ));
        }
        target.fields.push(field);
    }
    for interface in source.implements {
        if !target.implements.contains(&interface) {
            target.implements.push(interface);
        }
    }
    for member in source.members {
        if !target.members.contains(&member) {
            target.members.push(member);
        }
    }
    target.values.extend(source.values);
    target.directives.extend(source.directives);
    target.keys.extend(source.keys);
    if target.description.is_none() {
        target.description = source.description;
    }
    Ok(())
}

fn check_arguments(
    directive: &ast::Directive<'_, String>,
    allowed: &[&str],
) -> Result<(), ParseError> {
    for (name, _) in &directive.arguments {
        if !allowed.contains(&name.as_str()) {
            return Err(error_at(
                directive.position,
                format!("unknown argument `{}` on @{}", name, directive.name),
            ));
        }
    }
    Ok(())
}

fn field_set_argument(
    directive: &ast::Directive<'_, String>,
    argument: &str,
) -> Result<Option<FieldSet>, ParseError> {
    match directive.arguments.iter().find(|(name, _)| name == argument) {
        Some((_, ast::Value::String(source))) => FieldSet::parse(source)
            .map(Some)
            .map_err(|message| error_at(directive.position, message)),
        Some(_) => Err(error_at(
            directive.position,
            format!("@{}({}:) must be a string", directive.name, argument),
        )),
        None => Ok(None),
    }
}

fn convert_directive(directive: &ast::Directive<'_, String>) -> Directive {
    Directive {
        name: directive.name.clone(),
        arguments: directive
            .arguments
            .iter()
            .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
            .collect(),
    }
}

fn convert_argument(argument: &ast::InputValue<'_, String>) -> ArgumentDef {
    ArgumentDef {
        name: argument.name.clone(),
        description: argument.description.clone(),
        ty: TypeRef::from_ast(&argument.value_type),
        default_value: argument.default_value.as_ref().map(InputValue::from_ast),
        directives: argument.directives.iter().map(convert_directive).collect(),
    }
}

fn convert_enum_values(values: &[ast::EnumValue<'_, String>]) -> Vec<EnumValueDef> {
    values
        .iter()
        .map(|value| EnumValueDef {
            name: value.name.clone(),
            description: value.description.clone(),
            directives: value.directives.iter().map(convert_directive).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_reads_parser_positions() {
        assert_eq!(locate("schema parse error: Parse error at 3:14\nUnexpected"), (3, 14));
        assert_eq!(locate("no position here"), (0, 0));
    }
}
