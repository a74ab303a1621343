//! Composition: N annotated subgraph schemas in, one supergraph out.
//!
//! Each subgraph is canonicalized (root types renamed to `Query` /
//! `Mutation` / `Subscription`), annotated with `@source` provenance and
//! `@resolver` operations, run through the semantic convention analyzer,
//! transformed, analyzed again, and finally unioned with its peers. The
//! result serializes to plain SDL: parsing that SDL back yields the same
//! directive metadata, which is what the runtime crate consumes.

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use indexmap::IndexSet;

use crate::annotations;
use crate::annotations::push_unique_component;
use crate::annotations::set_directive_component;
use crate::annotations::set_directive_node;
use crate::annotations::ResolverAnnotation;
use crate::annotations::SourceAnnotation;
use crate::conventions;
use crate::error::CompositionError;
use crate::merge::Merger;
use crate::rewrite;
use crate::transforms::SubgraphTransform;
use crate::transport::TransportEntry;

/// One subgraph handed to composition: a validated schema plus the
/// transforms and transport wiring that belong to it.
pub struct Subgraph {
    pub name: String,
    pub schema: Valid<Schema>,
    pub transforms: Vec<Box<dyn SubgraphTransform>>,
    pub transport: Option<TransportEntry>,
}

impl Subgraph {
    pub fn new(name: impl Into<String>, schema: Valid<Schema>) -> Self {
        Self {
            name: name.into(),
            schema,
            transforms: Vec::new(),
            transport: None,
        }
    }

    /// Parses and validates `sdl` as this subgraph's schema.
    pub fn parse(name: impl Into<String>, sdl: &str) -> Result<Self, CompositionError> {
        let name = name.into();
        let schema = Schema::parse_and_validate(sdl, format!("{name}.graphql")).map_err(
            |errors| CompositionError::InvalidSubgraphSchema {
                subgraph: name.clone(),
                message: errors.to_string(),
            },
        )?;
        Ok(Self::new(name, schema))
    }

    pub fn with_transform(mut self, transform: impl SubgraphTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn with_transport(mut self, transport: TransportEntry) -> Self {
        self.transport = Some(transport);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompositionOptions {
    /// Extra SDL merged after the union, e.g. hand-written `extend type`
    /// blocks declaring cross-subgraph join fields.
    pub extra_type_defs: Option<String>,
}

/// The composed, annotation-carrying schema.
#[derive(Debug, Clone)]
pub struct Supergraph {
    pub schema: Valid<Schema>,
    /// Non-fatal shape conflicts observed while merging.
    pub hints: Vec<String>,
}

impl Supergraph {
    /// Re-reads a supergraph previously emitted by [`Supergraph::to_sdl`].
    pub fn parse(sdl: &str) -> Result<Self, CompositionError> {
        let schema = Schema::parse(sdl, "supergraph.graphql").map_err(|errors| {
            CompositionError::InvalidSupergraph {
                message: errors.to_string(),
            }
        })?;
        Ok(Self {
            schema: Valid::assume_valid(schema),
            hints: Vec::new(),
        })
    }

    pub fn to_sdl(&self) -> String {
        self.schema.to_string()
    }
}

/// Composes the subgraphs, in input order, into a supergraph.
pub fn compose_subgraphs(
    subgraphs: Vec<Subgraph>,
    options: &CompositionOptions,
) -> Result<Supergraph, CompositionError> {
    if subgraphs.is_empty() {
        return Err(CompositionError::NoSubgraphs);
    }
    let mut seen = IndexSet::new();
    for subgraph in &subgraphs {
        if !seen.insert(subgraph.name.clone()) {
            return Err(CompositionError::DuplicateSubgraphName {
                name: subgraph.name.clone(),
            });
        }
    }

    let peers: Vec<(&str, &Schema)> = subgraphs
        .iter()
        .map(|subgraph| (subgraph.name.as_str(), &*subgraph.schema))
        .collect();

    let mut annotated = Vec::with_capacity(subgraphs.len());
    for subgraph in &subgraphs {
        tracing::debug!(subgraph = %subgraph.name, "annotating subgraph");
        let mut schema = subgraph.schema.clone().into_inner();
        canonicalize_root_types(&mut schema);
        annotate_sources(&mut schema, &subgraph.name);
        attach_root_resolvers(&mut schema, &subgraph.name);
        conventions::attach_semantic_conventions(&mut schema, &subgraph.name, &peers);
        for transform in &subgraph.transforms {
            schema = transform.transform(schema, &subgraph.name);
        }
        conventions::attach_semantic_conventions(&mut schema, &subgraph.name, &peers);
        annotated.push(schema);
    }

    let mut merger = Merger::new();
    let mut annotated = annotated.into_iter();
    let Some(mut merged) = annotated.next() else {
        return Err(CompositionError::NoSubgraphs);
    };
    for schema in annotated {
        merger.merge_into(&mut merged, schema);
    }

    if let Some(extra) = &options.extra_type_defs {
        ast::Document::parse(extra.clone(), "extra_type_defs.graphql").map_err(|errors| {
            CompositionError::InvalidExtraTypeDefs {
                message: errors.to_string(),
            }
        })?;
    }

    ensure_root_pointers(&mut merged);
    for subgraph in &subgraphs {
        if let Some(transport) = &subgraph.transport {
            let mut entry = transport.clone();
            entry.subgraph = subgraph.name.clone();
            let directive = entry.to_directive()?;
            push_unique_component(
                &mut merged.schema_definition.make_mut().directives,
                directive,
            );
        }
    }

    let mut sdl = merged.to_string();
    if let Some(extra) = &options.extra_type_defs {
        sdl.push('\n');
        sdl.push_str(extra);
    }
    if !merged
        .directive_definitions
        .contains_key(annotations::SOURCE_DIRECTIVE_NAME)
    {
        sdl.push('\n');
        sdl.push_str(annotations::ANNOTATION_DEFINITIONS_SDL);
    }
    let supergraph = Schema::parse(sdl, "supergraph.graphql").map_err(|errors| {
        CompositionError::InvalidSupergraph {
            message: errors.to_string(),
        }
    })?;

    Ok(Supergraph {
        schema: Valid::assume_valid(supergraph),
        hints: merger.into_hints(),
    })
}

fn canonicalize_root_types(schema: &mut Schema) {
    for operation_type in [
        ast::OperationType::Query,
        ast::OperationType::Mutation,
        ast::OperationType::Subscription,
    ] {
        let Some(current) = schema.root_operation(operation_type).cloned() else {
            continue;
        };
        let canonical = rewrite::canonical_root_name(operation_type);
        if current != canonical {
            rewrite::rename_type(schema, &current, &canonical);
        }
    }
}

/// Attaches `@source` provenance to every non-root, non-built-in element.
/// Fields record their printed type so extraction can restore it after
/// transforms rename the types it mentions. Any pre-existing `@source` on
/// an element is replaced, keeping re-composition idempotent.
fn annotate_sources(schema: &mut Schema, subgraph_name: &str) {
    let roots = rewrite::root_type_names(schema);
    for (type_name, ty) in schema.types.iter_mut() {
        if rewrite::is_built_in_type(type_name) {
            continue;
        }
        let type_source = SourceAnnotation::new(subgraph_name, type_name.as_str());
        match ty {
            ExtendedType::Object(object) => {
                let object = object.make_mut();
                if !roots.contains(type_name) {
                    set_directive_component(&mut object.directives, type_source.to_directive());
                }
                for (field_name, field) in object.fields.iter_mut() {
                    let printed = field.ty.to_string();
                    let field = field.make_mut();
                    set_directive_node(
                        &mut field.directives,
                        SourceAnnotation::new(subgraph_name, field_name.as_str())
                            .with_type(printed)
                            .to_directive(),
                    );
                }
            }
            ExtendedType::Interface(interface) => {
                let interface = interface.make_mut();
                set_directive_component(&mut interface.directives, type_source.to_directive());
                for (field_name, field) in interface.fields.iter_mut() {
                    let printed = field.ty.to_string();
                    let field = field.make_mut();
                    set_directive_node(
                        &mut field.directives,
                        SourceAnnotation::new(subgraph_name, field_name.as_str())
                            .with_type(printed)
                            .to_directive(),
                    );
                }
            }
            ExtendedType::Enum(enum_) => {
                let enum_ = enum_.make_mut();
                set_directive_component(&mut enum_.directives, type_source.to_directive());
                for (value_name, value) in enum_.values.iter_mut() {
                    let value = value.make_mut();
                    set_directive_node(
                        &mut value.directives,
                        SourceAnnotation::new(subgraph_name, value_name.as_str()).to_directive(),
                    );
                }
            }
            ExtendedType::Union(union_) => {
                let union_ = union_.make_mut();
                set_directive_component(&mut union_.directives, type_source.to_directive());
            }
            ExtendedType::Scalar(scalar) => {
                let scalar = scalar.make_mut();
                set_directive_component(&mut scalar.directives, type_source.to_directive());
            }
            ExtendedType::InputObject(input_object) => {
                let input_object = input_object.make_mut();
                set_directive_component(&mut input_object.directives, type_source.to_directive());
                for (field_name, field) in input_object.fields.iter_mut() {
                    let printed = field.ty.to_string();
                    let field = field.make_mut();
                    set_directive_node(
                        &mut field.directives,
                        SourceAnnotation::new(subgraph_name, field_name.as_str())
                            .with_type(printed)
                            .to_directive(),
                    );
                }
            }
        }
    }
}

/// Attaches a `@resolver` to every root field re-issuing that field with
/// its declared arguments as variables, so the dispatcher can call back
/// into the owning subgraph for any top-level selection.
fn attach_root_resolvers(schema: &mut Schema, subgraph_name: &str) {
    for (label, operation_type) in [
        ("query", ast::OperationType::Query),
        ("mutation", ast::OperationType::Mutation),
        ("subscription", ast::OperationType::Subscription),
    ] {
        let Some(root_name) = schema.root_operation(operation_type).cloned() else {
            continue;
        };
        let Some(ExtendedType::Object(object)) = schema.types.get_mut(&root_name) else {
            continue;
        };
        let object = object.make_mut();
        for (field_name, field) in object.fields.iter_mut() {
            let operation_name = if operation_type == ast::OperationType::Query {
                field_name.to_string()
            } else {
                format!("{label}{field_name}")
            };
            let operation = synthesize_root_operation(label, &operation_name, field_name, field);
            let field = field.make_mut();
            set_directive_node(
                &mut field.directives,
                ResolverAnnotation::new(subgraph_name, operation).to_directive(),
            );
        }
    }
}

fn synthesize_root_operation(
    label: &str,
    operation_name: &str,
    field_name: &str,
    field: &ast::FieldDefinition,
) -> String {
    let mut variable_definitions = Vec::new();
    let mut field_arguments = Vec::new();
    for argument in &field.arguments {
        let mut definition = format!("${}: {}", argument.name, argument.ty);
        if let Some(default) = &argument.default_value {
            definition.push_str(&format!(" = {default}"));
        }
        variable_definitions.push(definition);
        field_arguments.push(format!("{}: ${}", argument.name, argument.name));
    }
    let variables = if variable_definitions.is_empty() {
        String::new()
    } else {
        format!("({})", variable_definitions.join(", "))
    };
    let arguments = if field_arguments.is_empty() {
        String::new()
    } else {
        format!("({})", field_arguments.join(", "))
    };
    format!("{label} {operation_name}{variables} {{ {field_name}{arguments} }}")
}

/// Fills in missing schema-definition root pointers by the conventional
/// names, but only when no root is declared at all, mirroring GraphQL's
/// implicit schema definition rule.
fn ensure_root_pointers(schema: &mut Schema) {
    let definition = &schema.schema_definition;
    if definition.query.is_some() || definition.mutation.is_some() || definition.subscription.is_some()
    {
        return;
    }
    let has_query = schema.types.contains_key("Query");
    let has_mutation = schema.types.contains_key("Mutation");
    let has_subscription = schema.types.contains_key("Subscription");
    let definition = schema.schema_definition.make_mut();
    if has_query {
        definition.query = Some(apollo_compiler::name!("Query").into());
    }
    if has_mutation {
        definition.mutation = Some(apollo_compiler::name!("Mutation").into());
    }
    if has_subscription {
        definition.subscription = Some(apollo_compiler::name!("Subscription").into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::resolvers_on_field;
    use crate::annotations::sources_on_field;
    use crate::annotations::sources_on_type;

    fn subgraph(name: &str, sdl: &str) -> Subgraph {
        Subgraph::parse(name, sdl).unwrap()
    }

    #[test]
    fn single_subgraph_gets_sources_and_root_resolvers() {
        let supergraph = compose_subgraphs(
            vec![subgraph(
                "users",
                r#"
                type Query { user(id: ID!): User }
                type User { id: ID! name: String }
                "#,
            )],
            &CompositionOptions::default(),
        )
        .unwrap();

        let schema = &supergraph.schema;
        let user = schema.get_object("User").unwrap();
        let sources = sources_on_type(&user.directives).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].subgraph, "users");
        assert_eq!(sources[0].name, "User");

        let query = schema.get_object("Query").unwrap();
        assert!(sources_on_type(&query.directives).unwrap().is_empty());
        let field = &query.fields["user"];
        let field_sources = sources_on_field(&field.directives).unwrap();
        assert_eq!(field_sources[0].name, "user");
        assert_eq!(field_sources[0].ty.as_deref(), Some("User"));
        let resolvers = resolvers_on_field(&field.directives).unwrap();
        assert_eq!(
            resolvers[0].operation,
            "query user($id: ID!) { user(id: $id) }"
        );
        assert_eq!(resolvers[0].kind, None);
    }

    #[test]
    fn root_types_are_canonicalized() {
        let supergraph = compose_subgraphs(
            vec![subgraph(
                "users",
                r#"
                schema { query: RootQuery mutation: RootMutation }
                type RootQuery { user: User }
                type RootMutation { makeUser(name: String = "anonymous"): User }
                type User { id: ID }
                "#,
            )],
            &CompositionOptions::default(),
        )
        .unwrap();

        let schema = &supergraph.schema;
        assert!(schema.get_object("Query").is_some());
        assert!(schema.get_object("Mutation").is_some());
        assert!(schema.get_object("RootQuery").is_none());
        let mutation = schema.get_object("Mutation").unwrap();
        let resolvers = resolvers_on_field(&mutation.fields["makeUser"].directives).unwrap();
        assert_eq!(
            resolvers[0].operation,
            r#"mutation mutationmakeUser($name: String = "anonymous") { makeUser(name: $name) }"#
        );
    }

    #[test]
    fn zero_subgraphs_is_an_error() {
        let error = compose_subgraphs(Vec::new(), &CompositionOptions::default()).unwrap_err();
        assert!(matches!(error, CompositionError::NoSubgraphs));
    }

    #[test]
    fn duplicate_subgraph_names_are_rejected() {
        let error = compose_subgraphs(
            vec![
                subgraph("users", "type Query { a: ID }"),
                subgraph("users", "type Query { b: ID }"),
            ],
            &CompositionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompositionError::DuplicateSubgraphName { name } if name == "users"
        ));
    }

    #[test]
    fn transport_entries_land_on_the_schema_definition() {
        let supergraph = compose_subgraphs(
            vec![subgraph("users", "type Query { ok: Boolean }").with_transport(
                TransportEntry::new("ignored", "http", "http://users.internal/graphql"),
            )],
            &CompositionOptions::default(),
        )
        .unwrap();

        let transports =
            crate::transport::subgraph_transport_map(&supergraph.schema).unwrap();
        let entry = transports.get("users").unwrap();
        assert_eq!(entry.kind, "http");
        assert_eq!(entry.location, "http://users.internal/graphql");
    }

    #[test]
    fn extra_type_defs_extend_merged_types() {
        let supergraph = compose_subgraphs(
            vec![subgraph("users", "type Query { user: User } type User { id: ID }")],
            &CompositionOptions {
                extra_type_defs: Some(
                    r#"extend type User { score: Int @resolver(subgraph: "scores", operation: "query s($User_id: ID) { score(id: $User_id) }") }"#
                        .to_string(),
                ),
            },
        )
        .unwrap();

        let user = supergraph.schema.get_object("User").unwrap();
        let score = &user.fields["score"];
        let resolvers = resolvers_on_field(&score.directives).unwrap();
        assert_eq!(resolvers[0].subgraph, "scores");
    }

    #[test]
    fn malformed_extra_type_defs_fail_composition() {
        let error = compose_subgraphs(
            vec![subgraph("users", "type Query { ok: Boolean }")],
            &CompositionOptions {
                extra_type_defs: Some("type Broken {".to_string()),
            },
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompositionError::InvalidExtraTypeDefs { .. }
        ));
    }

    #[test]
    fn supergraph_sdl_round_trips() {
        let supergraph = compose_subgraphs(
            vec![subgraph(
                "users",
                "type Query { userById(id: ID): User } type User { id: ID }",
            )],
            &CompositionOptions::default(),
        )
        .unwrap();
        let reparsed = Supergraph::parse(&supergraph.to_sdl()).unwrap();
        let user = reparsed.schema.get_object("User").unwrap();
        assert!(!sources_on_type(&user.directives).unwrap().is_empty());
        assert!(user.directives.has("resolver"));
    }
}
