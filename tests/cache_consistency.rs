use trellis::datatype::Value;
use trellis::persist::{Database, PersistenceMode};
use trellis::session::Session;
use trellis::settings::Settings;

fn must_open_db() -> Database {
    Database::new(PersistenceMode::InMemory).expect("error opening database")
}

#[test]
fn abort_evicts_the_cache() {
    let mut s = Session::new(must_open_db());
    s.set("user:A", "user:Name", "committed").expect("set");
    s.done().expect("commit");

    s.set("user:A", "user:Name", "doomed").expect("set");
    let cached = s.load_resource("user:A").expect("load");
    assert_eq!(cached.get("user:Name"), Some(&Value::from("doomed")));
    s.abort().expect("abort");

    // the cache is cold again, so this is a fresh fetch of committed state
    let reloaded = s.load_resource("user:A").expect("load");
    assert_eq!(reloaded.get("user:Name"), Some(&Value::from("committed")));
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn failed_done_evicts_the_cache() {
    let mut s = Session::new(must_open_db());
    s.set("user:A", "user:Name", "committed").expect("set");
    s.done().expect("commit");

    s.set("user:A", "user:Name", "doomed").expect("set");
    let failed = s.set("noprefix", "user:Name", "broken");
    assert!(failed.is_err());
    assert!(s.done().is_err(), "the latched error forces a rollback");

    // the rolled-back fact must not linger in the cached aggregate
    let reloaded = s.load_resource("user:A").expect("load");
    assert_eq!(reloaded.get("user:Name"), Some(&Value::from("committed")));
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn purge_then_load_is_empty() {
    let mut s = Session::new(must_open_db());
    s.set("user:A", "user:Name", "Bob").expect("set");
    s.done().expect("commit");
    assert!(!s.load_resource("user:A").expect("load").is_empty());

    s.purge("user:A").expect("purge");
    s.done().expect("commit");
    let gone = s.load_resource("user:A").expect("load");
    assert!(gone.is_empty(), "the cached aggregate must not survive a purge");
}

#[test]
fn empty_results_are_never_cached() {
    let db = must_open_db();
    let mut s = Session::new(db.clone());
    let ghost = s.load_resource("user:Late").expect("load");
    assert!(ghost.is_empty());

    // write through a second session; no session-level invalidation runs
    let mut writer = s.split();
    writer.set("user:Late", "user:Name", "finally").expect("set");
    writer.done().expect("commit");

    let found = s.load_resource("user:Late").expect("load");
    assert_eq!(found.get("user:Name"), Some(&Value::from("finally")));
}

#[test]
fn split_sessions_have_independent_caches() {
    let mut a = Session::new(must_open_db());
    a.set("user:A", "user:Name", "one").expect("set");
    a.done().expect("commit");

    let mut b = a.split();
    assert_eq!(
        b.load_resource("user:A").expect("load").get("user:Name"),
        Some(&Value::from("one"))
    );

    b.set("user:A", "user:Name", "two").expect("set");
    b.done().expect("commit");

    // a's cache still holds the old snapshot until it refetches
    assert_eq!(
        a.load_resource("user:A").expect("load").get("user:Name"),
        Some(&Value::from("one"))
    );
    let mut fresh = a.split();
    assert_eq!(
        fresh.load_resource("user:A").expect("load").get("user:Name"),
        Some(&Value::from("two"))
    );
}

#[test]
fn session_from_default_settings() {
    let settings = Settings::default();
    let mut s = Session::from_settings(&settings).expect("open from settings");
    s.set("user:A", "user:Name", "Bob").expect("set");
    s.done().expect("commit");
    assert_eq!(
        s.get("user:A", "user:Name").expect("get"),
        Some(Value::from("Bob"))
    );
}

#[test]
fn bounded_session_cache_still_reads_correctly() {
    let db = must_open_db();
    let mut s = Session::with_cache_capacity(db, 2);
    for i in 0..5 {
        s.set(&format!("user:U{i}"), "user:Seq", i).expect("set");
    }
    s.done().expect("commit");
    // entries evicted from the small cache are refetched transparently
    for i in 0..5 {
        assert_eq!(
            s.get(&format!("user:U{i}"), "user:Seq").expect("get"),
            Some(Value::from(i))
        );
    }
}
