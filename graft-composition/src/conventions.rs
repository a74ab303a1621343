//! Semantic convention analysis: infers type-merge resolvers from
//! `ById` / `ByIds` style root field names.
//!
//! For an object type `User { id: ID }`, root fields shaped like
//! `user(id: ID)`, `userById(id: ID)` or `getUsersByIds(ids: [ID])` are
//! recognized as entity lookups. The analyzer attaches a `@resolver`
//! recording the lookup operation and, for every other subgraph that also
//! defines the type, a `@variable` telling the dispatcher how to compute
//! the lookup argument from an already fetched entity. Inference is
//! best-effort: an unmatched field simply contributes nothing.

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use heck::ToPascalCase;
use heck::ToSnakeCase;

use crate::annotations;
use crate::annotations::push_unique_component;
use crate::annotations::push_variable_component;
use crate::annotations::ResolverAnnotation;
use crate::annotations::ResolverKind;
use crate::annotations::VariableAnnotation;
use crate::rewrite;

/// One schema element the analyzer decided to attach.
enum Inferred {
    Resolver(ResolverAnnotation),
    Variable(VariableAnnotation),
}

/// A root field, snapshotted so the schema can be mutated afterwards.
struct RootField {
    name: Name,
    /// The field's name in the subgraph's own schema, read back from its
    /// `@source` annotation. Transforms may have renamed the field since.
    original_name: String,
    return_type: Name,
    arguments: Vec<(Name, ast::Type)>,
}

/// Scans the query root of `schema` and attaches convention-inferred
/// `@resolver` / `@variable` annotations to matching object types.
///
/// `peers` holds the original input schema of every subgraph in the
/// composition, keyed by subgraph name; variables are attached for every
/// peer other than `subgraph_name` that declares the matched type and
/// field. Runs once before and once after transforms; re-derived
/// annotations that already exist are not duplicated.
pub(crate) fn attach_semantic_conventions(
    schema: &mut Schema,
    subgraph_name: &str,
    peers: &[(&str, &Schema)],
) {
    let Some(query_name) = schema.root_operation(ast::OperationType::Query).cloned() else {
        return;
    };
    let Some(query_type) = schema.get_object(&query_name) else {
        return;
    };
    let query_fields: Vec<RootField> = query_type
        .fields
        .iter()
        .map(|(name, field)| RootField {
            name: name.clone(),
            original_name: original_field_name(&field.directives, subgraph_name)
                .unwrap_or_else(|| name.to_string()),
            return_type: field.ty.inner_named_type().clone(),
            arguments: field
                .arguments
                .iter()
                .map(|argument| (argument.name.clone(), (*argument.ty).clone()))
                .collect(),
        })
        .collect();

    let root_names = rewrite::root_type_names(schema);
    let candidates: Vec<Name> = schema
        .types
        .iter()
        .filter(|(name, ty)| {
            matches!(ty, ExtendedType::Object(_))
                && !root_names.contains(*name)
                && !rewrite::is_built_in_type(name)
        })
        .map(|(name, _)| name.clone())
        .collect();

    for type_name in candidates {
        let inferred = infer_for_type(schema, &type_name, &query_fields, subgraph_name, peers);
        if inferred.is_empty() {
            continue;
        }
        let Some(ExtendedType::Object(object)) = schema.types.get_mut(&type_name) else {
            continue;
        };
        let object = object.make_mut();
        for item in inferred {
            match item {
                Inferred::Resolver(resolver) => {
                    push_unique_component(&mut object.directives, resolver.to_directive());
                }
                Inferred::Variable(variable) => {
                    push_variable_component(&mut object.directives, &variable);
                }
            }
        }
    }
}

fn infer_for_type(
    schema: &Schema,
    type_name: &Name,
    query_fields: &[RootField],
    subgraph_name: &str,
    peers: &[(&str, &Schema)],
) -> Vec<Inferred> {
    let Some(object) = schema.get_object(type_name) else {
        return Vec::new();
    };
    let type_fields: Vec<(Name, Name)> = object
        .fields
        .iter()
        .map(|(name, field)| (name.clone(), field.ty.inner_named_type().clone()))
        .collect();

    let mut inferred = Vec::new();
    for query_field in query_fields {
        if query_field.return_type != *type_name {
            continue;
        }
        for (field_name, field_type) in &type_fields {
            let Some((argument_name, argument_type)) = query_field
                .arguments
                .iter()
                .find(|(_, ty)| ty.inner_named_type() == field_type)
            else {
                continue;
            };
            let Some(kind) = match_convention(&query_field.name, type_name, field_name) else {
                continue;
            };
            let operation_name = match kind {
                ResolverKind::Fetch => format!("{type_name}_by_{field_name}").to_pascal_case(),
                ResolverKind::Batch => format!("{type_name}s_by_{field_name}s").to_pascal_case(),
            };
            let variable_name = format!("{type_name}_{field_name}");
            let operation = format!(
                "query {operation_name}(${variable_name}: {argument_type}) {{ {original}({argument_name}: ${variable_name}) }}",
                original = query_field.original_name,
            );
            inferred.push(Inferred::Resolver(
                ResolverAnnotation::new(subgraph_name, operation).with_kind(kind),
            ));
            for (peer_name, peer_schema) in peers {
                if *peer_name == subgraph_name {
                    continue;
                }
                let declares_field = peer_schema
                    .get_object(type_name)
                    .is_some_and(|peer_type| peer_type.fields.contains_key(field_name));
                if declares_field {
                    inferred.push(Inferred::Variable(VariableAnnotation::new(
                        *peer_name,
                        variable_name.clone(),
                        field_name.as_str(),
                    )));
                }
            }
        }
    }
    inferred
}

/// Matches a root field name against the lookup naming patterns.
///
/// Comparison happens in snake case, so `userById`, `user_by_id` and
/// `USER_BY_ID` all match. Plural forms are plain `s` appends on the raw
/// names before case folding.
fn match_convention(query_field: &Name, type_name: &Name, field_name: &Name) -> Option<ResolverKind> {
    let query_snake = query_field.to_snake_case();
    let fetch_patterns = [
        type_name.to_string(),
        format!("get_{type_name}_by_{field_name}"),
        format!("{type_name}_by_{field_name}"),
    ];
    if fetch_patterns
        .iter()
        .any(|pattern| pattern.to_snake_case() == query_snake)
    {
        return Some(ResolverKind::Fetch);
    }
    let batch_patterns = [
        format!("{type_name}s"),
        format!("get_{type_name}s_by_{field_name}"),
        format!("{type_name}s_by_{field_name}"),
        format!("get_{type_name}s_by_{field_name}s"),
        format!("{type_name}s_by_{field_name}s"),
    ];
    if batch_patterns
        .iter()
        .any(|pattern| pattern.to_snake_case() == query_snake)
    {
        return Some(ResolverKind::Batch);
    }
    None
}

fn original_field_name(directives: &ast::DirectiveList, subgraph_name: &str) -> Option<String> {
    annotations::sources_on_field(directives)
        .ok()?
        .into_iter()
        .find(|source| source.subgraph == subgraph_name)
        .map(|source| source.name)
}
