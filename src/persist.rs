// used for persistence
use rusqlite::{Connection, OpenFlags};

use std::collections::HashSet;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use seahash::SeaHasher;
use tracing::{debug, info};

use crate::changeset::Changeset;
use crate::error::{Result, TrellisError};
use crate::query::Query;
use crate::ring::{Directory, Placement, SYSTEM_RING, TablePair, shard_schema};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Where the relational substrate lives.
#[derive(Debug, Clone)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// distinguishes the shared-cache URIs of in-memory databases opened in
// the same process
static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

fn connect(uri: &str) -> Result<Connection> {
    let conn = Connection::open_with_flags(uri, OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI)?;
    // a writer waiting on another's transaction retries instead of
    // failing outright
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

struct DatabaseInner {
    // anchor connection: ambient reads, bootstrap at open, index
    // management. For in-memory mode it also pins the shared-cache
    // database for the lifetime of the handle.
    conn: Mutex<Connection>,
    uri: String,
    directory: Directory,
    // rings whose schema has been ensured in this process; populated
    // lazily on first route, evicted only when a changeset rolls its
    // bootstrap DDL back
    catalog: RwLock<HashSet<String, OtherHasher>>,
}

/// The shared handle to the relational substrate. Cheap to clone; safe to
/// share across sessions. Owns the anchor connection, the placement
/// directory, and the catalog of bootstrapped rings. Transactional scopes
/// get a private connection each through [`Database::begin`].
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(mode: PersistenceMode) -> Result<Database> {
        Self::with_placement(mode, Directory::default())
    }

    /// Open with a custom placement strategy wrapped in a directory.
    pub fn with_placement(mode: PersistenceMode, directory: Directory) -> Result<Database> {
        let uri = match &mode {
            // named shared-cache database, so every connection this
            // handle opens sees the same in-memory data
            PersistenceMode::InMemory => format!(
                "file:trellis-mem-{}?mode=memory&cache=shared",
                MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
            PersistenceMode::File(path) => path.clone(),
        };
        let conn = connect(&uri)?;
        let db = Database {
            inner: Arc::new(DatabaseInner {
                conn: Mutex::new(conn),
                uri,
                directory,
                catalog: RwLock::new(HashSet::default()),
            }),
        };
        // the system ring must always exist, since it could be used to
        // store metadata about the other rings
        db.ensure_shard(SYSTEM_RING)?;
        for shard in db.inner.directory.all_shards() {
            db.ensure_shard(&shard)?;
        }
        info!(?mode, "database open");
        Ok(db)
    }

    pub fn from_placement_strategy(
        mode: PersistenceMode,
        placement: Box<dyn Placement>,
    ) -> Result<Database> {
        Self::with_placement(mode, Directory::new(placement))
    }

    pub(crate) fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.inner.conn.lock()?;
        op(&conn)
    }

    /// A private connection to the same database, for transactional
    /// scopes.
    pub(crate) fn open_connection(&self) -> Result<Connection> {
        connect(&self.inner.uri)
    }

    pub(crate) fn directory(&self) -> &Directory {
        &self.inner.directory
    }

    pub(crate) fn shard_known(&self, shard: &str) -> Result<bool> {
        Ok(self.inner.catalog.read()?.contains(shard))
    }

    pub(crate) fn mark_shard(&self, shard: &str) -> Result<()> {
        self.inner.catalog.write()?.insert(shard.to_owned());
        Ok(())
    }

    pub(crate) fn forget_shard(&self, shard: &str) -> Result<()> {
        self.inner.catalog.write()?.remove(shard);
        Ok(())
    }

    /// Resolve the table pair for a resource URL, bootstrapping the ring's
    /// schema on first contact.
    pub fn tables_for(&self, url: &str) -> Result<TablePair> {
        let shard = self.inner.directory.shard_for_url(url)?;
        self.ensure_shard(&shard)?;
        Ok(TablePair::for_shard(&shard))
    }

    /// Idempotently create a ring's identity and fact tables.
    pub fn ensure_shard(&self, shard: &str) -> Result<()> {
        {
            let ensured = self.inner.catalog.read()?;
            if ensured.contains(shard) {
                return Ok(());
            }
        }
        let mut ensured = self.inner.catalog.write()?;
        if !ensured.contains(shard) {
            self.with_conn(|conn| {
                conn.execute_batch(&shard_schema(shard))?;
                Ok(())
            })?;
            ensured.insert(shard.to_owned());
            debug!(shard, "ring schema ensured");
        }
        Ok(())
    }

    /// Open a transactional write scope.
    pub fn begin(&self) -> Result<Changeset> {
        Changeset::begin(self.clone())
    }

    /// A query over the ambient connection.
    pub fn new_query(&self) -> Query {
        Query::new(self.clone())
    }

    /// Empty every ring's tables. Identities are gone afterwards.
    pub fn truncate_all(&self) -> Result<()> {
        for shard in self.inner.directory.all_shards() {
            self.ensure_shard(&shard)?;
            let TablePair { resource, fact } = TablePair::for_shard(&shard);
            self.with_conn(|conn| {
                conn.execute_batch(&format!("delete from {fact}; delete from {resource};"))?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn index_name(table: &str, name: &str) -> String {
        format!("idx_{}_{}", table, name)
    }

    pub fn index_exists(&self, table: &str, name: &str) -> Result<bool> {
        let index = Self::index_name(table, name);
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "select 1 from sqlite_master where type = 'index' and tbl_name = ?1 and name = ?2",
                    rusqlite::params![table, index],
                    |_| Ok(()),
                )
                .map(|_| true);
            match found {
                Ok(found) => Ok(found),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn create_index(&self, table: &str, name: &str, columns: &[&str]) -> Result<()> {
        self.make_index(table, name, false, columns)
    }

    pub fn unique_index(&self, table: &str, name: &str, columns: &[&str]) -> Result<()> {
        self.make_index(table, name, true, columns)
    }

    fn make_index(&self, table: &str, name: &str, unique: bool, columns: &[&str]) -> Result<()> {
        if self.index_exists(table, name)? {
            return Err(TrellisError::IndexAlreadyExists(Self::index_name(
                table, name,
            )));
        }
        let unique = if unique { "unique " } else { "" };
        let cmd = format!(
            "create {}index {} on {} ({})",
            unique,
            Self::index_name(table, name),
            table,
            columns.join(", ")
        );
        self.with_conn(|conn| {
            conn.execute_batch(&cmd)?;
            Ok(())
        })
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!("drop index {}", Self::index_name(table, name)))?;
            Ok(())
        })
    }
}
