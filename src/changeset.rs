//! The transactional write scope.
//!
//! A changeset owns one substrate transaction from `begin` until `done` or
//! `abort`. Save and purge calls latch their first error; once anything has
//! been latched, `done` refuses to commit and rolls back instead. Callers
//! must check both individual call results and the latch before trusting a
//! multi-step write.

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use std::sync::{Arc, Mutex};

use crate::construct::{Fact, Identity};
use crate::error::{Result, TrellisError};
use crate::persist::Database;
use crate::query::Query;
use crate::ring::{TablePair, shard_schema};

pub struct Changeset {
    db: Database,
    conn: Arc<Mutex<Connection>>,
    // rings this changeset bootstrapped inside its transaction; rolled
    // out of the catalog again if the transaction rolls back
    bootstrapped: Vec<String>,
    first_err: Option<TrellisError>,
    finished: bool,
}

fn new_identity() -> Result<Identity> {
    // identities are derived from the monotonic clock; collisions fall
    // into the unique-constraint retry in ensure_resource
    Utc::now()
        .timestamp_nanos_opt()
        .ok_or_else(|| TrellisError::Persistence(String::from("clock outside identity range")))
}

impl Changeset {
    pub(crate) fn begin(db: Database) -> Result<Changeset> {
        // a private connection per changeset: writers never share
        // transaction state, and ambient readers on the anchor connection
        // never observe in-flight rows
        let conn = db.open_connection()?;
        conn.execute_batch("begin immediate")?;
        debug!("changeset open");
        Ok(Self {
            db,
            conn: Arc::new(Mutex::new(conn)),
            bootstrapped: Vec::new(),
            first_err: None,
            finished: false,
        })
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock()?;
        op(&conn)
    }

    /// Route a URL to its table pair, bootstrapping a previously unseen
    /// ring on this changeset's connection. The DDL is part of the
    /// transaction; a rollback undoes it and the catalog entry with it.
    fn tables_for(&mut self, url: &str) -> Result<TablePair> {
        let shard = self.db.directory().shard_for_url(url)?;
        if !self.db.shard_known(&shard)? {
            self.with_conn(|conn| {
                conn.execute_batch(&shard_schema(&shard))?;
                Ok(())
            })?;
            self.db.mark_shard(&shard)?;
            self.bootstrapped.push(shard.clone());
            debug!(shard = shard.as_str(), "ring schema bootstrapped");
        }
        Ok(TablePair::for_shard(&shard))
    }

    /// Append one fact, creating the owning resource's identity if it does
    /// not exist yet. Returns the fact with its resolved timestamp.
    pub fn save(&mut self, fact: &Fact) -> Result<Fact> {
        let result = self.try_save(fact);
        self.latch(result)
    }

    fn try_save(&mut self, fact: &Fact) -> Result<Fact> {
        let tables = self.tables_for(fact.resource())?;
        let id = self.ensure_resource(fact.resource(), &tables)?;
        let stamped = fact.stamped(Utc::now());
        let (valint, valdouble, valtext, valdoc, valref) = stamped.value().slots();
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "insert into {} (resid, subject, valtype, at, valint, valdouble, valtext, valdoc, valref) \
                     values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    tables.fact
                ),
                params![
                    id,
                    stamped.subject(),
                    stamped.kind().code(),
                    stamped.at(),
                    valint,
                    valdouble,
                    valtext,
                    valdoc,
                    valref
                ],
            )?;
            Ok(())
        })?;
        debug!(resource = stamped.resource(), subject = stamped.subject(), "fact saved");
        Ok(stamped)
    }

    /// Get-or-create the surrogate identity for a resource URL. A
    /// concurrent writer may win the insert; the unique key on the URL
    /// turns that race into a retried lookup.
    fn ensure_resource(&mut self, url: &str, tables: &TablePair) -> Result<Identity> {
        let select = format!(
            "select resid from {} where resource = ?1",
            tables.resource
        );
        let insert = format!(
            "insert into {} (resource, resid) values (?1, ?2)",
            tables.resource
        );
        for _ in 0..3 {
            let found = self.with_conn(|conn| {
                match conn.query_row(&select, params![url], |row| row.get::<_, Identity>(0)) {
                    Ok(id) => Ok(Some(id)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })?;
            if let Some(id) = found {
                return Ok(id);
            }
            let id = new_identity()?;
            let inserted = self.with_conn(|conn| {
                match conn.execute(&insert, params![url, id]) {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })?;
            if inserted {
                return Ok(id);
            }
        }
        Err(TrellisError::Persistence(format!(
            "identity creation for '{}' kept losing the insert race",
            url
        )))
    }

    /// Delete all facts of a resource, then its identity. Purging a
    /// resource that never existed is a no-op.
    pub fn purge(&mut self, url: &str) -> Result<()> {
        let result = self.try_purge(url);
        self.latch(result)
    }

    fn try_purge(&mut self, url: &str) -> Result<()> {
        let tables = self.tables_for(url)?;
        let found = self.with_conn(|conn| {
            match conn.query_row(
                &format!("select resid from {} where resource = ?1", tables.resource),
                params![url],
                |row| row.get::<_, Identity>(0),
            ) {
                Ok(id) => Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;
        let Some(id) = found else {
            return Ok(());
        };
        self.with_conn(|conn| {
            conn.execute(
                &format!("delete from {} where resid = ?1", tables.fact),
                params![id],
            )?;
            conn.execute(
                &format!("delete from {} where resid = ?1", tables.resource),
                params![id],
            )?;
            Ok(())
        })?;
        debug!(resource = url, "resource purged");
        Ok(())
    }

    /// A query that observes the writes of this changeset.
    pub fn new_query(&self) -> Query {
        Query::bound(self.db.clone(), Arc::clone(&self.conn))
    }

    /// The first error any save or purge in this changeset produced.
    pub fn err(&self) -> Option<&TrellisError> {
        self.first_err.as_ref()
    }

    fn latch<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.first_err.is_none() {
                self.first_err = Some(e.clone());
            }
        }
        result
    }

    /// Commit if no error was ever latched, otherwise roll back and return
    /// the latched error.
    pub fn done(mut self) -> Result<()> {
        self.finished = true;
        if let Some(latched) = self.first_err.take() {
            self.rollback()?;
            debug!(error = %latched, "changeset rolled back");
            return Err(latched);
        }
        self.with_conn(|conn| {
            conn.execute_batch("commit")?;
            Ok(())
        })?;
        debug!("changeset committed");
        Ok(())
    }

    /// Roll back unconditionally.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.rollback()
    }

    fn rollback(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("rollback")?;
            Ok(())
        })?;
        // the rollback undid any bootstrap DDL this changeset ran
        for shard in &self.bootstrapped {
            self.db.forget_shard(shard)?;
        }
        Ok(())
    }
}

impl Drop for Changeset {
    fn drop(&mut self) {
        if !self.finished {
            warn!("changeset dropped without done or abort, rolling back");
            let _ = self.rollback();
        }
    }
}
