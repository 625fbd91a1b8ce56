mod common;

use common::{ACCOUNTS_SDL, INVENTORY_SDL, PRODUCTS_SDL, REVIEWS_SDL, subgraph};
use gangway::compose;
use gangway::error::CompositionErrorKind;
use pretty_assertions::assert_eq;

#[test]
fn composes_the_demo_subgraphs() {
    let supergraph = compose(&[
        subgraph("accounts", ACCOUNTS_SDL),
        subgraph("reviews", REVIEWS_SDL),
        subgraph("products", PRODUCTS_SDL),
        subgraph("inventory", INVENTORY_SDL),
    ])
    .unwrap();

    let user = supergraph.entity("User").unwrap();
    assert_eq!(user.owner, "accounts");
    assert_eq!(user.resolvable_keys("reviews").count(), 1);

    let product = supergraph.entity("Product").unwrap();
    assert_eq!(product.owner, "products");

    let price = supergraph.annotation("Product", "price").unwrap();
    assert_eq!(price.sources, vec!["products".to_string()]);
    assert_eq!(price.external_in, vec!["inventory".to_string()]);

    let shipping = supergraph.annotation("Product", "shippingEstimate").unwrap();
    assert_eq!(shipping.sources, vec!["inventory".to_string()]);
    assert_eq!(shipping.requires["inventory"].to_string(), "price weight");

    let author = supergraph.annotation("Review", "author").unwrap();
    assert_eq!(author.provides["reviews"].to_string(), "id");

    assert_eq!(supergraph.mutation_type(), Some("Mutation"));
    let query_fields: Vec<&str> = supergraph
        .schema
        .get("Query")
        .unwrap()
        .fields
        .iter()
        .map(|field| field.name.as_str())
        .collect();
    assert_eq!(query_fields, vec!["me", "user", "topProducts", "reviews", "topReview"]);

    let sdl = supergraph.to_sdl();
    assert!(sdl.contains("ACCOUNTS @join__graph(name: \"accounts\", url: \"http://accounts.test/graphql\")"));
    assert!(sdl.contains("@join__field(graph: INVENTORY, requires: \"price weight\")"));
    assert!(sdl.contains("@join__owner(graph: PRODUCTS)"));
}

#[test]
fn composition_does_not_depend_on_subgraph_order() {
    let forward = compose(&[
        subgraph("accounts", ACCOUNTS_SDL),
        subgraph("products", PRODUCTS_SDL),
        subgraph("reviews", REVIEWS_SDL),
    ])
    .unwrap();
    let shuffled = compose(&[
        subgraph("reviews", REVIEWS_SDL),
        subgraph("accounts", ACCOUNTS_SDL),
        subgraph("products", PRODUCTS_SDL),
    ])
    .unwrap();
    assert_eq!(forward, shuffled);
    assert_eq!(forward.to_sdl(), shuffled.to_sdl());
}

#[test]
fn composing_twice_gives_the_same_supergraph() {
    let subgraphs = vec![
        subgraph("accounts", ACCOUNTS_SDL),
        subgraph("products", PRODUCTS_SDL),
        subgraph("reviews", REVIEWS_SDL),
        subgraph("inventory", INVENTORY_SDL),
    ];
    let first = compose(&subgraphs).unwrap();
    let second = compose(&subgraphs).unwrap();
    assert_eq!(first.to_sdl(), second.to_sdl());
}

#[test]
fn reports_every_conflict() {
    let left = subgraph(
        "left",
        r#"
        type Query { users: [User] }
        type User @key(fields: "id") { id: ID! age: Int }
        "#,
    );
    let right = subgraph(
        "right",
        r#"
        type Query { stores: [Store] }
        extend type User @key(fields: "id") { id: ID! @external age: String }
        extend type Store @key(fields: "id") { id: ID! @external name: String }
        "#,
    );

    let errors = compose(&[left, right]).unwrap_err();
    let kinds: Vec<CompositionErrorKind> = errors.iter().map(|error| error.kind).collect();
    assert!(kinds.contains(&CompositionErrorKind::FieldTypeMismatch), "{}", errors);
    assert!(kinds.contains(&CompositionErrorKind::MissingEntityOwner), "{}", errors);
    assert!(kinds.contains(&CompositionErrorKind::UnresolvableExternalField), "{}", errors);

    let mismatch = errors
        .iter()
        .find(|error| error.kind == CompositionErrorKind::FieldTypeMismatch)
        .unwrap();
    assert_eq!(mismatch.type_name, "User");
    assert_eq!(mismatch.field.as_deref(), Some("age"));
    assert_eq!(mismatch.subgraphs, vec!["left".to_string(), "right".to_string()]);
}

#[test]
fn extensions_must_use_an_owner_key() {
    let owner = subgraph(
        "accounts",
        r#"
        type Query { me: User }
        type User @key(fields: "id") { id: ID! email: String }
        "#,
    );
    let extender = subgraph(
        "billing",
        r#"
        extend type User @key(fields: "email") { email: String @external balance: Int }
        "#,
    );
    let errors = compose(&[owner, extender]).unwrap_err();
    let error = errors
        .iter()
        .find(|error| error.kind == CompositionErrorKind::KeyMismatch)
        .unwrap();
    assert_eq!(error.type_name, "User");
    assert_eq!(error.subgraphs, vec!["accounts".to_string(), "billing".to_string()]);
}

#[test]
fn rejects_two_owners() {
    let errors = compose(&[
        subgraph("a", r#"type Query { x: User } type User @key(fields: "id") { id: ID! }"#),
        subgraph("b", r#"type User @key(fields: "id") { id: ID! }"#),
    ])
    .unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.0[0].kind, CompositionErrorKind::MultipleEntityOwners);
}

#[test]
fn rejects_duplicate_subgraph_names() {
    let errors = compose(&[
        subgraph("accounts", ACCOUNTS_SDL),
        subgraph("accounts", ACCOUNTS_SDL),
    ])
    .unwrap_err();
    assert_eq!(errors.0[0].kind, CompositionErrorKind::DuplicateSubgraph);
}

#[test]
fn renames_custom_root_types() {
    let supergraph = compose(&[subgraph(
        "accounts",
        r#"
        schema { query: RootQuery }
        type RootQuery { me: User }
        type User { id: ID! }
        "#,
    )])
    .unwrap();
    assert!(supergraph.schema.get("RootQuery").is_none());
    assert!(supergraph.annotation("Query", "me").is_some());
}

#[test]
fn needs_a_query_root() {
    let errors = compose(&[]).unwrap_err();
    assert_eq!(errors.0[0].kind, CompositionErrorKind::MissingQueryType);

    let errors = compose(&[subgraph("types", "type User { id: ID! }")]).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.0[0].kind, CompositionErrorKind::MissingQueryType);
    assert_eq!(errors.0[0].subgraphs, vec!["types".to_string()]);
}
