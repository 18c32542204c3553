//! Trellis – an embeddable triple-store / graph-document engine on SQLite.
//!
//! Trellis layers a schema-less, append-only attribute model on a
//! conventional relational substrate. A *resource* (graph node) is
//! identified by a `prefix:localname` URL; every statement about it is a
//! [`construct::Fact`]: a timestamped, typed assertion
//! `(resource, subject, value)` rather than a fixed column. That gives
//! RDF-like flexibility while ordinary rows and indexes provide
//! durability and queryability.
//!
//! ## Modules
//! * [`datatype`] – The [`datatype::Value`] / [`datatype::ValueKind`] model
//!   and the document column codec.
//! * [`construct`] – [`construct::Fact`] and the [`construct::Resource`]
//!   aggregate (facts sorted by subject and time).
//! * [`ring`] – Placement of namespace prefixes onto physical table pairs,
//!   with a pluggable [`ring::Placement`] strategy.
//! * [`persist`] – The [`persist::Database`] handle: SQLite connection,
//!   lazy shard bootstrap, index management.
//! * [`changeset`] – The transactional write scope with get-or-create
//!   identities and sticky-first-error semantics.
//! * [`query`] – Resource fetch and conjunctive filter search via sorted
//!   id-set intersection.
//! * [`session`] – The caching, single-writer façade most callers use.
//! * [`settings`] – Optional file-based configuration.
//!
//! ## Quick Start
//! ```
//! use trellis::persist::{Database, PersistenceMode};
//! use trellis::session::Session;
//!
//! let db = Database::new(PersistenceMode::InMemory).unwrap();
//! let mut session = Session::new(db);
//! session.set("user:Bob123", "user:Email", "bob@example.com").unwrap();
//! session.done().unwrap();
//! let bob = session.load_resource("user:Bob123").unwrap();
//! assert_eq!(
//!     bob.get("user:Email").and_then(|v| v.as_str()),
//!     Some("bob@example.com")
//! );
//! ```
//!
//! ## Status
//! The single-ring placement is a deliberate placeholder: the
//! [`ring::Placement`] trait is the seam where consistent-hashing
//! partitioning would plug in without touching changeset or query code.

pub mod changeset;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod persist;
pub mod query;
pub mod ring;
pub mod session;
pub mod settings;
