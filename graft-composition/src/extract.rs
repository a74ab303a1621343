//! Rebuilds one subgraph's local schema out of a supergraph.
//!
//! Extraction is the composer's inverse: it needs nothing but the
//! supergraph itself, so the runtime can materialize any subgraph's schema
//! on demand long after the original inputs are gone. Directive
//! applications scoped to other subgraphs are dropped, elements owned by
//! other subgraphs disappear, and `@source` annotations undo any
//! composition-time renames.

use apollo_compiler::ast;
use apollo_compiler::schema;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::Directive;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use indexmap::IndexSet;

use crate::annotations::sources_on_field;
use crate::annotations::sources_on_type;
use crate::annotations::SOURCE_DIRECTIVE_NAME;
use crate::error::AnnotationError;
use crate::rewrite;
use crate::transforms;

/// Filters `supergraph` down to the local schema of `subgraph_name`.
///
/// The result is a plain (non-executable) schema: it may lack a query
/// root if the subgraph only contributed mutations, and it keeps the
/// subgraph's own annotations so recomposing it is idempotent.
pub fn extract_subgraph(
    supergraph: &Schema,
    subgraph_name: &str,
) -> Result<Schema, AnnotationError> {
    let mut schema = supergraph.clone();

    // Type-level pass: element sourced elsewhere means drop, sourced here
    // under another name means rename back, no source means pass through.
    let mut dropped: Vec<Name> = Vec::new();
    let mut renames: Vec<(Name, Name)> = Vec::new();
    for (name, ty) in &schema.types {
        if rewrite::is_built_in_type(name) {
            continue;
        }
        let sources = sources_on_type(ty.directives())?;
        if sources.is_empty() {
            continue;
        }
        match sources.iter().find(|source| source.subgraph == subgraph_name) {
            None => dropped.push(name.clone()),
            Some(source) => {
                if source.name != name.as_str() {
                    renames.push((name.clone(), parse_name(&source.name)?));
                }
            }
        }
    }
    for name in &dropped {
        schema.types.shift_remove(name);
    }

    for ty in schema.types.values_mut() {
        match ty {
            ExtendedType::Object(object) => {
                let object = object.make_mut();
                filter_component_directives(&mut object.directives, subgraph_name);
                object.fields = filter_fields(std::mem::take(&mut object.fields), subgraph_name)?;
            }
            ExtendedType::Interface(interface) => {
                let interface = interface.make_mut();
                filter_component_directives(&mut interface.directives, subgraph_name);
                interface.fields =
                    filter_fields(std::mem::take(&mut interface.fields), subgraph_name)?;
            }
            ExtendedType::Enum(enum_) => {
                let enum_ = enum_.make_mut();
                filter_component_directives(&mut enum_.directives, subgraph_name);
                enum_.values =
                    filter_enum_values(std::mem::take(&mut enum_.values), subgraph_name)?;
            }
            ExtendedType::Union(union_) => {
                let union_ = union_.make_mut();
                filter_component_directives(&mut union_.directives, subgraph_name);
            }
            ExtendedType::Scalar(scalar) => {
                let scalar = scalar.make_mut();
                filter_component_directives(&mut scalar.directives, subgraph_name);
            }
            ExtendedType::InputObject(input_object) => {
                let input_object = input_object.make_mut();
                filter_component_directives(&mut input_object.directives, subgraph_name);
                input_object.fields =
                    filter_input_fields(std::mem::take(&mut input_object.fields), subgraph_name)?;
            }
        }
    }

    // Undoing type renames also rewrites argument types, union members and
    // interface lists, which carry no annotations of their own.
    for (current, original) in renames {
        rewrite::rename_type(&mut schema, &current, &original);
    }

    filter_component_directives(
        &mut schema.schema_definition.make_mut().directives,
        subgraph_name,
    );

    // Joins declared by hand in extra type definitions carry no `@source`,
    // so their fields can reference types this subgraph never had.
    transforms::prune_dangling(&mut schema, &IndexSet::new());

    let present: IndexSet<Name> = schema.types.keys().cloned().collect();
    let definition = schema.schema_definition.make_mut();
    for slot in [
        &mut definition.query,
        &mut definition.mutation,
        &mut definition.subscription,
    ] {
        if slot.as_ref().is_some_and(|root| !present.contains(&root.name)) {
            *slot = None;
        }
    }

    Ok(schema)
}

/// A directive application survives when it has no `subgraph:` argument or
/// when that argument names this subgraph.
fn keep_directive(directive: &Directive, subgraph_name: &str) -> bool {
    match directive
        .specified_argument_by_name("subgraph")
        .and_then(|value| value.as_str())
    {
        Some(subgraph) => subgraph == subgraph_name,
        None => true,
    }
}

fn filter_component_directives(list: &mut schema::DirectiveList, subgraph_name: &str) {
    list.retain(|directive| keep_directive(directive, subgraph_name));
}

fn filter_node_directives(list: &mut ast::DirectiveList, subgraph_name: &str) {
    list.retain(|directive| keep_directive(directive, subgraph_name));
}

fn filter_fields(
    fields: IndexMap<Name, Component<ast::FieldDefinition>>,
    subgraph_name: &str,
) -> Result<IndexMap<Name, Component<ast::FieldDefinition>>, AnnotationError> {
    let mut kept = IndexMap::default();
    for (name, mut field) in fields {
        let Some(original) = element_decision(&field.directives, &name, subgraph_name)? else {
            continue;
        };
        let inner = field.make_mut();
        inner.name = original.clone();
        filter_node_directives(&mut inner.directives, subgraph_name);
        for argument in inner.arguments.iter_mut() {
            let argument = argument.make_mut();
            filter_node_directives(&mut argument.directives, subgraph_name);
        }
        kept.entry(original).or_insert(field);
    }
    Ok(kept)
}

fn filter_input_fields(
    fields: IndexMap<Name, Component<ast::InputValueDefinition>>,
    subgraph_name: &str,
) -> Result<IndexMap<Name, Component<ast::InputValueDefinition>>, AnnotationError> {
    let mut kept = IndexMap::default();
    for (name, mut field) in fields {
        let Some(original) = element_decision(&field.directives, &name, subgraph_name)? else {
            continue;
        };
        let inner = field.make_mut();
        inner.name = original.clone();
        filter_node_directives(&mut inner.directives, subgraph_name);
        kept.entry(original).or_insert(field);
    }
    Ok(kept)
}

fn filter_enum_values(
    values: IndexMap<Name, Component<ast::EnumValueDefinition>>,
    subgraph_name: &str,
) -> Result<IndexMap<Name, Component<ast::EnumValueDefinition>>, AnnotationError> {
    let mut kept = IndexMap::default();
    for (name, mut value) in values {
        let Some(original) = element_decision(&value.directives, &name, subgraph_name)? else {
            continue;
        };
        let inner = value.make_mut();
        inner.value = original.clone();
        filter_node_directives(&mut inner.directives, subgraph_name);
        kept.entry(original).or_insert(value);
    }
    Ok(kept)
}

/// `None` to drop the element, otherwise the name it should carry in the
/// extracted schema.
fn element_decision(
    directives: &ast::DirectiveList,
    current: &Name,
    subgraph_name: &str,
) -> Result<Option<Name>, AnnotationError> {
    let sources = sources_on_field(directives)?;
    if sources.is_empty() {
        return Ok(Some(current.clone()));
    }
    match sources.iter().find(|source| source.subgraph == subgraph_name) {
        None => Ok(None),
        Some(source) if source.name == current.as_str() => Ok(Some(current.clone())),
        Some(source) => Ok(Some(parse_name(&source.name)?)),
    }
}

fn parse_name(value: &str) -> Result<Name, AnnotationError> {
    Name::new(value).map_err(|_| AnnotationError::InvalidArgument {
        directive: SOURCE_DIRECTIVE_NAME,
        argument: "name",
        expected: "a GraphQL name",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose_subgraphs;
    use crate::compose::CompositionOptions;
    use crate::compose::Subgraph;
    use crate::transforms::Prefix;
    use crate::transport::TransportEntry;

    fn composed(subgraphs: Vec<Subgraph>) -> Schema {
        compose_subgraphs(subgraphs, &CompositionOptions::default())
            .unwrap()
            .schema
            .into_inner()
    }

    #[test]
    fn restores_names_a_transform_changed() {
        let supergraph = composed(vec![Subgraph::parse(
            "inventory",
            "type Query { product: Product } type Product { sku: ID price: Int }",
        )
        .unwrap()
        .with_transform(Prefix::new("Inv_"))]);
        assert!(supergraph.types.contains_key("Inv_Product"));

        let extracted = extract_subgraph(&supergraph, "inventory").unwrap();
        let product = extracted.get_object("Product").unwrap();
        assert!(product.fields.contains_key("sku"));
        assert!(!extracted.types.contains_key("Inv_Product"));
        assert_eq!(
            extracted.get_object("Query").unwrap().fields["product"]
                .ty
                .to_string(),
            "Product"
        );
    }

    #[test]
    fn drops_types_and_fields_owned_elsewhere() {
        let supergraph = composed(vec![
            Subgraph::parse(
                "users",
                "type Query { user: User } type User { id: ID name: String }",
            )
            .unwrap(),
            Subgraph::parse(
                "reviews",
                "type Query { review: Review } type User { id: ID rating: Int } type Review { id: ID }",
            )
            .unwrap(),
        ]);

        let extracted = extract_subgraph(&supergraph, "users").unwrap();
        assert!(!extracted.types.contains_key("Review"));
        let user = extracted.get_object("User").unwrap();
        assert!(user.fields.contains_key("id"));
        assert!(user.fields.contains_key("name"));
        assert!(!user.fields.contains_key("rating"));
        let query = extracted.get_object("Query").unwrap();
        assert!(query.fields.contains_key("user"));
        assert!(!query.fields.contains_key("review"));
    }

    #[test]
    fn keeps_only_this_subgraphs_directives() {
        let supergraph = composed(vec![
            Subgraph::parse(
                "users",
                "type Query { userById(id: ID): User } type User { id: ID }",
            )
            .unwrap(),
            Subgraph::parse("posts", "type Query { posts: [Post] } type User { id: ID } type Post { id: ID }")
                .unwrap(),
        ]);

        let extracted = extract_subgraph(&supergraph, "users").unwrap();
        let user = extracted.get_object("User").unwrap();
        for directive in user.directives.iter() {
            let subgraph = directive
                .specified_argument_by_name("subgraph")
                .and_then(|value| value.as_str());
            assert_eq!(subgraph, Some("users"), "leaked {}", **directive);
        }
    }

    #[test]
    fn transport_entries_follow_their_subgraph() {
        let supergraph = composed(vec![
            Subgraph::parse("users", "type Query { user: ID }")
                .unwrap()
                .with_transport(TransportEntry::new("users", "http", "http://users/graphql")),
            Subgraph::parse("posts", "type Query { post: ID }")
                .unwrap()
                .with_transport(TransportEntry::new("posts", "http", "http://posts/graphql")),
        ]);

        let extracted = extract_subgraph(&supergraph, "posts").unwrap();
        let transports = crate::transport::subgraph_transport_map(&extracted).unwrap();
        assert_eq!(transports.len(), 1);
        assert!(transports.contains_key("posts"));
    }

    #[test]
    fn roots_emptied_by_extraction_disappear() {
        let supergraph = composed(vec![
            Subgraph::parse(
                "accounts",
                "type Query { me: ID } type Mutation { deleteMe: Boolean }",
            )
            .unwrap(),
            Subgraph::parse("search", "type Query { find(term: String): ID }").unwrap(),
        ]);

        let extracted = extract_subgraph(&supergraph, "search").unwrap();
        assert!(!extracted.types.contains_key("Mutation"));
        assert!(extracted
            .root_operation(ast::OperationType::Mutation)
            .is_none());
        assert!(extracted.get_object("Query").unwrap().fields.contains_key("find"));
    }

    #[test]
    fn unsourced_extra_types_pass_through_everywhere() {
        let supergraph = compose_subgraphs(
            vec![
                Subgraph::parse("users", "type Query { user: ID }").unwrap(),
                Subgraph::parse("posts", "type Query { post: ID }").unwrap(),
            ],
            &CompositionOptions {
                extra_type_defs: Some("type Shared { marker: Boolean }".to_string()),
            },
        )
        .unwrap()
        .schema
        .into_inner();

        for subgraph in ["users", "posts"] {
            let extracted = extract_subgraph(&supergraph, subgraph).unwrap();
            assert!(extracted.types.contains_key("Shared"), "{subgraph}");
        }
    }
}
