use serde::{Deserialize, Serialize};
use trellis::datatype::{Value, ValueKind};
use trellis::persist::{Database, PersistenceMode};
use trellis::query::Filter;
use trellis::session::Session;

fn must_open_session() -> Session {
    Session::open(PersistenceMode::InMemory).expect("error starting database")
}

#[test]
fn set_done_load_round_trip() {
    let mut s = must_open_session();

    s.set("user:Bob123", "user:Email", "bob@example.com")
        .expect("error changing the user email");
    s.done().expect("commit");

    let bob = s.load_resource("user:Bob123").expect("error loading resource");
    assert_eq!(bob.id(), "user:Bob123");
    assert_eq!(
        bob.get("user:Email").and_then(|v| v.as_str()),
        Some("bob@example.com")
    );
    assert_eq!(
        bob.facts()[0].kind(),
        ValueKind::String,
        "kind should be inferred from the value"
    );
}

#[test]
fn find_resource_by_filter() {
    let mut s = must_open_session();
    s.set("user:Bob123", "user:Email", "bob@example.com").expect("set");
    s.set("user:Tom456", "user:Email", "tom@example.com").expect("set");
    s.done().expect("commit");

    let found = s
        .find_resource(vec![Filter::new("user:Email", "bob@example.com")])
        .expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), "user:Bob123");

    let nobody = s
        .find_resource(vec![Filter::new("user:Email", "nobody@example.com")])
        .expect("an empty match is not an error at the session level");
    assert!(nobody.is_empty());
}

#[test]
fn set_many_and_typed_values() {
    let mut s = must_open_session();
    s.set_many(
        "user:Bob123",
        &[
            ("user:Name", Value::from("Bob")),
            ("user:Age", Value::from(42)),
            ("user:Score", Value::from(0.75)),
        ],
    )
    .expect("set_many");
    s.done().expect("commit");

    let bob = s.load_resource("user:Bob123").expect("load");
    assert_eq!(bob.len(), 3);
    assert_eq!(bob.get("user:Age").and_then(|v| v.as_int()), Some(42));
    assert_eq!(bob.get("user:Score").and_then(|v| v.as_double()), Some(0.75));
    assert_eq!(s.get("user:Bob123", "user:Name").expect("get"), Some(Value::from("Bob")));
}

#[test]
fn link_stores_a_reference_fact() {
    let mut s = must_open_session();
    s.link("user:Bob123", "user:Knows", "user:Tom456").expect("link");
    s.done().expect("commit");

    let bob = s.load_resource("user:Bob123").expect("load");
    assert_eq!(
        bob.get("user:Knows").and_then(|v| v.as_reference()),
        Some("user:Tom456")
    );
    assert_eq!(bob.facts()[0].kind(), ValueKind::Reference);

    // references live in their own slot, so a string filter must miss them
    let by_ref = s
        .find_resource(vec![
            Filter::new("user:Knows", "user:Tom456").with_kind(ValueKind::Reference),
        ])
        .expect("find by reference");
    assert_eq!(by_ref.len(), 1);
    let by_text = s
        .find_resource(vec![Filter::new("user:Knows", "user:Tom456")])
        .expect("find by text");
    assert!(by_text.is_empty());
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Address {
    street: String,
    number: i64,
}

#[test]
fn document_round_trip() {
    let mut s = must_open_session();
    let home = Address {
        street: "Elm Street".into(),
        number: 13,
    };
    s.set(
        "user:Bob123",
        "user:Address",
        Value::document(&home).expect("encode"),
    )
    .expect("set document");
    s.done().expect("commit");

    let bob = s.load_resource("user:Bob123").expect("load");
    let mut restored = Address::default();
    bob.decode_document("user:Address", &mut restored).expect("decode");
    assert_eq!(restored, home);

    let fact = &bob.facts()[0];
    assert_eq!(fact.kind(), ValueKind::Document);
    let mut via_fact = Address::default();
    fact.decode_document(&mut via_fact).expect("decode via fact");
    assert_eq!(via_fact, home);
}

#[test]
fn missing_resource_loads_empty() {
    let mut s = must_open_session();
    let ghost = s.load_resource("user:Nobody").expect("load");
    assert!(ghost.is_empty());
}

#[test]
fn custom_placement_routes_by_prefix() {
    struct ByPrefix;
    impl trellis::ring::Placement for ByPrefix {
        fn shard_for(&self, prefix: &str) -> String {
            format!("ring_{}", prefix)
        }
        fn shards(&self) -> Vec<String> {
            vec![String::from("ring_user")]
        }
    }
    let db = Database::from_placement_strategy(PersistenceMode::InMemory, Box::new(ByPrefix))
        .expect("open");
    let mut s = Session::new(db);
    s.set("user:Bob123", "user:Name", "Bob").expect("set");
    s.done().expect("commit");
    let bob = s.load_resource("user:Bob123").expect("load");
    assert_eq!(bob.get("user:Name"), Some(&Value::from("Bob")));
}
