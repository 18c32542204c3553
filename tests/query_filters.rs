use trellis::error::TrellisError;
use trellis::persist::{Database, PersistenceMode};
use trellis::query::{Filter, Op};
use trellis::session::Session;

fn seeded_session() -> Session {
    let db = Database::new(PersistenceMode::InMemory).expect("open");
    let mut s = Session::new(db);
    s.set("user:A", "user:Email", "x@example.com").expect("set");
    s.set("user:A", "user:Email", "x@example.com").expect("set");
    s.set("user:A", "user:Age", 30).expect("set");
    s.set("user:B", "user:Email", "y@example.com").expect("set");
    s.set("user:B", "user:Age", 40).expect("set");
    s.done().expect("commit");
    s
}

#[test]
fn duplicate_hits_collapse_to_one_resource() {
    let mut s = seeded_session();
    // user:A asserts the same email twice; it must still come back once
    let found = s
        .find_resource(vec![Filter::new("user:Email", "x@example.com")])
        .expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), "user:A");
    assert_eq!(
        found[0].get_all("user:Email").len(),
        2,
        "the aggregate still carries the full history"
    );
}

#[test]
fn filters_are_conjunctive() {
    let mut s = seeded_session();
    let found = s
        .find_resource(vec![
            Filter::new("user:Age", 0).with_op(Op::Greater),
            Filter::new("user:Age", 35).with_op(Op::Greater),
        ])
        .expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), "user:B");
}

#[test]
fn comparison_operators() {
    let mut s = seeded_session();
    let younger = s
        .find_resource(vec![Filter::new("user:Age", 40).with_op(Op::Less)])
        .expect("find");
    assert_eq!(younger.len(), 1);
    assert_eq!(younger[0].id(), "user:A");

    let not_thirty = s
        .find_resource(vec![Filter::new("user:Age", 30).with_op(Op::NotEquals)])
        .expect("find");
    assert_eq!(not_thirty.len(), 1);
    assert_eq!(not_thirty[0].id(), "user:B");

    let everyone = s
        .find_resource(vec![Filter::new("user:Age", 30).with_op(Op::GreaterEquals)])
        .expect("find");
    assert_eq!(everyone.len(), 2);
}

#[test]
fn a_query_needs_at_least_one_filter() {
    let s = seeded_session();
    let mut q = s.database().new_query();
    assert_eq!(q.exec(), Err(TrellisError::AtLeastOneFilterRequired));
}

#[test]
fn an_empty_id_set_surfaces_no_matching_data() {
    let s = seeded_session();
    let mut q = s.database().new_query();
    q.add_filter(Filter::new("user:Email", "missing@example.com"));
    assert_eq!(q.exec(), Err(TrellisError::NoMatchingData));
}

#[test]
fn results_are_grouped_and_time_ordered() {
    let s = seeded_session();
    let mut q = s.database().new_query();
    q.add_filter(Filter::new("user:Age", 0).with_op(Op::Greater));
    q.exec().expect("exec");
    let facts = q.result();
    assert_eq!(facts.len(), 5, "all facts of every matching resource");
    // ordered by identity first, time ascending within a resource
    let mut seen = Vec::new();
    for fact in facts {
        if seen.last().map(String::as_str) != Some(fact.resource()) {
            seen.push(fact.resource().to_owned());
        }
    }
    assert_eq!(seen.len(), 2, "each resource's facts are contiguous");

    let mut copy = s.database().new_query();
    copy.copy_filters_from(&q);
    copy.exec().expect("exec of copied filters");
    assert_eq!(copy.result().len(), facts.len());
    q.done();
    copy.done();
}

#[test]
fn disjoint_filters_intersect_to_nothing() {
    let mut s = seeded_session();
    // both filters match something, but never the same resource
    let found = s
        .find_resource(vec![
            Filter::new("user:Email", "x@example.com"),
            Filter::new("user:Age", 40),
        ])
        .expect("find");
    assert!(found.is_empty());
}
