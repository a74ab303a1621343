use apollo_compiler::validation::Valid;
use graft_composition::annotations::resolvers_on_field;
use graft_composition::annotations::resolvers_on_type;
use graft_composition::annotations::sources_on_field;
use graft_composition::annotations::sources_on_type;
use graft_composition::annotations::variables_on_type;
use graft_composition::compose_subgraphs;
use graft_composition::extract_subgraph;
use graft_composition::transforms::NamingCase;
use graft_composition::transforms::NamingConvention;
use graft_composition::CompositionOptions;
use graft_composition::ResolverKind;
use graft_composition::Subgraph;
use graft_composition::Supergraph;
use graft_composition::TransportEntry;

fn compose(subgraphs: Vec<Subgraph>) -> Supergraph {
    compose_subgraphs(subgraphs, &CompositionOptions::default()).unwrap()
}

fn subgraph(name: &str, sdl: &str) -> Subgraph {
    Subgraph::parse(name, sdl).unwrap()
}

#[test]
fn id_lookup_field_becomes_fetch_resolver() {
    let supergraph = compose(vec![subgraph(
        "users",
        r#"
        type Query { userById(id: ID): User }
        type User { id: ID name: String }
        "#,
    )]);

    let user = supergraph.schema.get_object("User").unwrap();
    let resolvers = resolvers_on_type(&user.directives).unwrap();
    let fetch = resolvers
        .iter()
        .find(|resolver| resolver.kind == Some(ResolverKind::Fetch))
        .unwrap();
    assert_eq!(fetch.subgraph, "users");
    assert_eq!(
        fetch.operation,
        "query UserById($User_id: ID) { userById(id: $User_id) }"
    );
}

#[test]
fn plural_id_lookup_becomes_batch_resolver_with_list_variable() {
    let supergraph = compose(vec![subgraph(
        "users",
        r#"
        type Query { usersByIds(ids: [ID]): [User] }
        type User { id: ID }
        "#,
    )]);

    let user = supergraph.schema.get_object("User").unwrap();
    let resolvers = resolvers_on_type(&user.directives).unwrap();
    let batch = resolvers
        .iter()
        .find(|resolver| resolver.kind == Some(ResolverKind::Batch))
        .unwrap();
    assert_eq!(
        batch.operation,
        "query UsersByIds($User_id: [ID]) { usersByIds(ids: $User_id) }"
    );
}

#[test]
fn join_variables_attach_for_the_subgraphs_without_the_resolver() {
    let supergraph = compose(vec![
        subgraph(
            "users",
            r#"
            type Query { userById(id: ID): User }
            type User { id: ID name: String }
            "#,
        ),
        subgraph(
            "reviews",
            r#"
            type Query { topReviewers: [User] }
            type User { id: ID rating: Int }
            "#,
        ),
    ]);

    let user = supergraph.schema.get_object("User").unwrap();
    let variables = variables_on_type(&user.directives).unwrap();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].subgraph, "reviews");
    assert_eq!(variables[0].name, "User_id");
    assert_eq!(variables[0].select, "id");
}

#[test]
fn extraction_undoes_naming_transforms() {
    let supergraph = compose(vec![subgraph(
        "catalog",
        r#"
        type Query { product_by_id(id: ID): product_item }
        type product_item { item_id: ID display_name: String }
        "#,
    )
    .with_transform(NamingConvention {
        type_names: Some(NamingCase::Pascal),
        field_names: Some(NamingCase::Camel),
        enum_values: None,
    })]);

    assert!(supergraph.schema.types.contains_key("ProductItem"));
    let query = supergraph.schema.get_object("Query").unwrap();
    assert!(query.fields.contains_key("productById"));

    let extracted = extract_subgraph(&supergraph.schema, "catalog").unwrap();
    let product = extracted.get_object("product_item").unwrap();
    assert!(product.fields.contains_key("item_id"));
    assert!(product.fields.contains_key("display_name"));
    let query = extracted.get_object("Query").unwrap();
    assert!(query.fields.contains_key("product_by_id"));
    assert_eq!(
        query.fields["product_by_id"].ty.to_string(),
        "product_item"
    );
}

#[test]
fn extract_then_recompose_reproduces_annotation_sets() {
    let sdl = r#"
    type Query { userById(id: ID): User }
    type User { id: ID name: String }
    "#;
    let first = compose(vec![subgraph("users", sdl)]);

    let extracted = extract_subgraph(&first.schema, "users").unwrap();
    let second = compose(vec![Subgraph::new(
        "users",
        Valid::assume_valid(extracted),
    )]);

    let first_user = first.schema.get_object("User").unwrap();
    let second_user = second.schema.get_object("User").unwrap();
    assert_eq!(
        sources_on_type(&first_user.directives).unwrap(),
        sources_on_type(&second_user.directives).unwrap(),
    );
    assert_eq!(
        resolvers_on_type(&first_user.directives).unwrap(),
        resolvers_on_type(&second_user.directives).unwrap(),
    );

    let first_field = &first.schema.get_object("Query").unwrap().fields["userById"];
    let second_field = &second.schema.get_object("Query").unwrap().fields["userById"];
    assert_eq!(
        sources_on_field(&first_field.directives).unwrap(),
        sources_on_field(&second_field.directives).unwrap(),
    );
    assert_eq!(
        resolvers_on_field(&first_field.directives).unwrap(),
        resolvers_on_field(&second_field.directives).unwrap(),
    );
}

#[test]
fn shared_types_union_their_annotations_without_duplicates() {
    let supergraph = compose(vec![
        subgraph(
            "library",
            "type Query { media: Media } union Media = Book type Book { id: ID }",
        ),
        subgraph(
            "cinema",
            "type Query { featured: Media } union Media = Film type Film { id: ID }",
        ),
    ]);

    let media = supergraph.schema.get_union("Media").unwrap();
    let members: Vec<_> = media.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(members, ["Book", "Film"]);
    let mut subgraphs: Vec<_> = sources_on_type(&media.directives)
        .unwrap()
        .into_iter()
        .map(|source| source.subgraph)
        .collect();
    subgraphs.sort();
    assert_eq!(subgraphs, ["cinema", "library"]);
}

#[test]
fn supergraph_sdl_round_trips_with_identical_metadata() {
    let original = compose(vec![
        subgraph(
            "users",
            "type Query { userById(id: ID): User } type User { id: ID }",
        )
        .with_transport(
            TransportEntry::new("users", "http", "http://users.internal/graphql")
                .with_header("authorization", "{context.headers.authorization}"),
        ),
        subgraph(
            "reviews",
            "type Query { reviews: [Review] } type Review { id: ID author: User } type User { id: ID }",
        )
        .with_transport(TransportEntry::new(
            "reviews",
            "http",
            "http://reviews.internal/graphql",
        )),
    ]);

    let reparsed = Supergraph::parse(&original.to_sdl()).unwrap();

    let before = graft_composition::transport::subgraph_transport_map(&original.schema).unwrap();
    let after = graft_composition::transport::subgraph_transport_map(&reparsed.schema).unwrap();
    assert_eq!(before, after);
    assert_eq!(before["users"].headers.len(), 1);

    for (name, ty) in reparsed.schema.types.iter() {
        let Some(original_ty) = original.schema.types.get(name) else {
            panic!("type {name} appeared from nowhere");
        };
        assert_eq!(
            sources_on_type(original_ty.directives()).unwrap(),
            sources_on_type(ty.directives()).unwrap(),
            "sources changed on {name}"
        );
        assert_eq!(
            resolvers_on_type(original_ty.directives()).unwrap(),
            resolvers_on_type(ty.directives()).unwrap(),
            "resolvers changed on {name}"
        );
    }
}
