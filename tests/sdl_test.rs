use gangway::sdl;
use gangway::type_graph::{TypeKind, TypeRef};
use pretty_assertions::assert_eq;

const USERS_SDL: &str = r#"
"A registered account"
type User @key(fields: "id") @key(fields: "email", resolvable: false) {
  id: ID!
  email: String!
  "Display name"
  name(format: NameFormat = FULL): String @deprecated(reason: "use displayName")
  friends(first: Int = 10): [User!]!
  org: Organization
}

type Organization @key(fields: "id") {
  id: ID!
  members: [User]
}

enum NameFormat {
  FULL
  SHORT
}

input UserFilter {
  nameContains: String
  limit: Int = 20
}

union SearchResult = User | Organization

interface Node {
  id: ID!
}

extend type Product @key(fields: "upc") {
  upc: String! @external
  weight: Int @external
  shippingEstimate: Int @requires(fields: "weight")
  owner: User @provides(fields: "email")
}

type Query {
  me: User
  search(filter: UserFilter): [SearchResult]
  _service: _Service!
  _entities(representations: [_Any!]!): [_Entity]!
}

scalar _Any
scalar _FieldSet
union _Entity = User | Organization
type _Service {
  sdl: String
}
"#;

#[test]
fn parses_federation_annotations() {
    let graph = sdl::parse(USERS_SDL).unwrap();

    let user = graph.get("User").unwrap();
    assert_eq!(user.kind, TypeKind::Object);
    assert_eq!(user.keys.len(), 2);
    assert_eq!(user.keys[0].fields.to_string(), "id");
    assert!(user.keys[0].resolvable);
    assert!(!user.keys[1].resolvable);
    assert_eq!(user.description.as_deref(), Some("A registered account"));

    let product = graph.get("Product").unwrap();
    assert!(product.extension);
    assert!(product.field("upc").unwrap().external);
    assert_eq!(
        product
            .field("shippingEstimate")
            .unwrap()
            .requires
            .as_ref()
            .unwrap()
            .to_string(),
        "weight"
    );
    assert_eq!(
        product.field("owner").unwrap().provides.as_ref().unwrap().to_string(),
        "email"
    );

    let friends = graph.field("User", "friends").unwrap();
    assert_eq!(friends.ty.to_string(), "[User!]!");
    assert_eq!(friends.arguments[0].ty, TypeRef::named("Int"));
}

#[test]
fn strips_federation_plumbing() {
    let graph = sdl::parse(USERS_SDL).unwrap();
    for name in ["_Any", "_FieldSet", "_Entity", "_Service"] {
        assert!(graph.get(name).is_none(), "{} should be stripped", name);
    }
    let query = graph.get("Query").unwrap();
    let fields: Vec<&str> = query.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(fields, vec!["me", "search"]);
}

#[test]
fn keeps_unknown_directives() {
    let graph = sdl::parse(
        r#"
        type Query { me: User @cacheControl(maxAge: 30) }
        type User @shareable { id: ID! }
        "#,
    )
    .unwrap();
    let me = graph.field("Query", "me").unwrap();
    assert_eq!(me.directives.len(), 1);
    assert_eq!(me.directives[0].to_string(), "@cacheControl(maxAge: 30)");
    assert_eq!(graph.get("User").unwrap().directives[0].name, "shareable");
}

#[test]
fn printed_schema_parses_back_to_the_same_graph() {
    let graph = sdl::parse(USERS_SDL).unwrap();
    let printed = graph.to_sdl();
    let reparsed = sdl::parse(&printed).unwrap();
    assert_eq!(reparsed, graph);
    assert_eq!(reparsed.to_sdl(), printed);
}

#[test]
fn extensions_merge_into_a_single_type() {
    let graph = sdl::parse(
        r#"
        type Query { a: String }
        extend type Query { b: String }
        "#,
    )
    .unwrap();
    let query = graph.get("Query").unwrap();
    assert_eq!(query.fields.len(), 2);
    assert!(!query.extension);
}

#[test]
fn syntax_errors_carry_a_position() {
    let err = sdl::parse("type Query {\n  me: User\n  broken(: String\n}\n").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.column > 0);
}

#[test]
fn rejects_unknown_federation_directive_arguments() {
    let err = sdl::parse(
        r#"type Query { me: User }
type User @key(fields: "id", shape: "round") { id: ID! }
"#,
    )
    .unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("unknown argument `shape` on @key"), "{}", err.message);
}

#[test]
fn rejects_undeclared_key_fields() {
    let err = sdl::parse(r#"type User @key(fields: "uuid") { id: ID! }"#).unwrap_err();
    assert!(err.message.contains("`User.uuid`"), "{}", err.message);
}

#[test]
fn rejects_unknown_type_references() {
    let err = sdl::parse("type Query {\n  me: Account\n}\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("unknown type `Account`"), "{}", err.message);
}
