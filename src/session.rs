//! The client-facing façade: a database handle, at most one open
//! changeset, and a bounded read-through cache of resource aggregates.
//!
//! A session is a single writer. It is not meant to be shared between
//! threads; concurrent writers take independent sessions over the same
//! [`Database`] handle (see [`Session::split`]).

use std::collections::HashMap;

use tracing::debug;

use crate::changeset::Changeset;
use crate::construct::{Fact, Resource};
use crate::datatype::Value;
use crate::error::{Result, TrellisError};
use crate::persist::{Database, OtherHasher, PersistenceMode};
use crate::query::Filter;
use crate::settings::Settings;

// ------------- ResourceCache -------------
/// Bounded cache of resource aggregates keyed by URL. Capacity 0 keeps
/// everything; otherwise the least recently touched entry is evicted.
struct ResourceCache {
    entries: HashMap<String, (u64, Resource), OtherHasher>,
    capacity: usize,
    tick: u64,
}

impl ResourceCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::default(),
            capacity,
            tick: 0,
        }
    }
    fn get(&mut self, url: &str) -> Option<&Resource> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(url).map(|entry| {
            entry.0 = tick;
            &entry.1
        })
    }
    fn get_mut(&mut self, url: &str) -> Option<&mut Resource> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(url).map(|entry| {
            entry.0 = tick;
            &mut entry.1
        })
    }
    fn put(&mut self, url: String, resource: Resource) {
        self.tick += 1;
        self.entries.insert(url, (self.tick, resource));
        if self.capacity > 0 && self.entries.len() > self.capacity {
            if let Some(coldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (tick, _))| *tick)
                .map(|(url, _)| url.clone())
            {
                self.entries.remove(&coldest);
            }
        }
    }
    fn remove(&mut self, url: &str) {
        self.entries.remove(url);
    }
    fn clear(&mut self) {
        self.entries.clear();
    }
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ------------- Session -------------
pub struct Session {
    db: Database,
    changeset: Option<Changeset>,
    cache: ResourceCache,
}

impl Session {
    pub fn new(db: Database) -> Session {
        Self::with_cache_capacity(db, 0)
    }

    pub fn with_cache_capacity(db: Database, capacity: usize) -> Session {
        Session {
            db,
            changeset: None,
            cache: ResourceCache::new(capacity),
        }
    }

    /// Open a fresh database and bind a session to it.
    pub fn open(mode: PersistenceMode) -> Result<Session> {
        Ok(Session::new(Database::new(mode)?))
    }

    pub fn from_settings(settings: &Settings) -> Result<Session> {
        let db = Database::new(settings.persistence_mode())?;
        Ok(Session::with_cache_capacity(db, settings.cache_capacity))
    }

    /// An independent session over the same database handle: its own
    /// cache, its own changeset slot, no shared mutable state.
    pub fn split(&self) -> Session {
        Session::with_cache_capacity(self.db.clone(), self.cache.capacity)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Assert one fact about a resource.
    pub fn set(&mut self, url: &str, subject: &str, value: impl Into<Value>) -> Result<()> {
        self.add_fact(Fact::new(url, subject, value.into()))
    }

    /// Assert several facts about one resource, in call order.
    pub fn set_many(&mut self, url: &str, changes: &[(&str, Value)]) -> Result<()> {
        for (subject, value) in changes {
            self.add_fact(Fact::new(url, *subject, value.clone()))?;
        }
        Ok(())
    }

    /// Assert a reference-kind fact linking two resources.
    pub fn link(&mut self, from: &str, subject: &str, to: &str) -> Result<()> {
        self.add_fact(Fact::new(from, subject, Value::Reference(to.to_owned())))
    }

    /// Remove a resource and all its facts.
    pub fn purge(&mut self, url: &str) -> Result<()> {
        self.begin_changes()?.purge(url)?;
        self.cache.remove(url);
        Ok(())
    }

    /// Close the open changeset, committing unless it latched an error.
    /// A rollback evicts the whole cache, which may hold facts of the
    /// discarded transaction.
    pub fn done(&mut self) -> Result<()> {
        match self.changeset.take() {
            Some(changeset) => {
                let result = changeset.done();
                if result.is_err() {
                    self.cache.clear();
                    debug!("changeset rolled back, cache evicted");
                }
                result
            }
            None => Ok(()),
        }
    }

    /// Roll back the open changeset. The whole cache is evicted, since
    /// any cached aggregate might reflect writes of the aborted
    /// transaction.
    pub fn abort(&mut self) -> Result<()> {
        match self.changeset.take() {
            Some(changeset) => {
                self.cache.clear();
                debug!("session aborted, cache evicted");
                changeset.abort()
            }
            None => Ok(()),
        }
    }

    /// The open changeset's latched error, if any.
    pub fn err(&self) -> Option<&TrellisError> {
        self.changeset.as_ref().and_then(|changeset| changeset.err())
    }

    /// The resource's aggregate, from cache when possible. The returned
    /// aggregate is a snapshot.
    pub fn load_resource(&mut self, url: &str) -> Result<Resource> {
        if let Some(resource) = self.cache.get(url) {
            return Ok(resource.clone());
        }
        self.fetch_and_cache(url)
    }

    /// The latest value asserted for `(url, subject)`.
    pub fn get(&mut self, url: &str, subject: &str) -> Result<Option<Value>> {
        Ok(self.load_resource(url)?.get(subject).cloned())
    }

    /// Every resource satisfying all filters, as fresh (uncached)
    /// aggregates. Runs inside the open changeset's transaction if there
    /// is one.
    pub fn find_resource(&mut self, filters: Vec<Filter>) -> Result<Vec<Resource>> {
        let mut query = match &self.changeset {
            Some(changeset) => changeset.new_query(),
            None => self.db.new_query(),
        };
        for filter in filters {
            query.add_filter(filter);
        }
        match query.exec() {
            // "nothing matched" is an answer at this level, not a failure
            Err(TrellisError::NoMatchingData) => return Ok(Vec::new()),
            other => other?,
        }
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Resource, OtherHasher> = HashMap::default();
        for fact in query.into_result() {
            let url = fact.resource().to_owned();
            grouped
                .entry(url.clone())
                .or_insert_with(|| {
                    order.push(url.clone());
                    Resource::new(url.clone())
                })
                .add(fact);
        }
        Ok(order
            .into_iter()
            .filter_map(|url| grouped.remove(&url))
            .collect())
    }

    fn add_fact(&mut self, fact: Fact) -> Result<()> {
        let saved = self.begin_changes()?.save(&fact)?;
        self.update_cache(saved)
    }

    fn begin_changes(&mut self) -> Result<&mut Changeset> {
        if self.changeset.is_none() {
            self.changeset = Some(self.db.begin()?);
            debug!("session changeset open");
        }
        match self.changeset.as_mut() {
            Some(changeset) => Ok(changeset),
            None => unreachable!("changeset was just opened"),
        }
    }

    fn update_cache(&mut self, fact: Fact) -> Result<()> {
        // an already cached aggregate takes the new fact directly; on a
        // miss the fetch below runs on the changeset's connection and so
        // already observes the write, caching the fetch result is enough
        if let Some(resource) = self.cache.get_mut(fact.resource()) {
            resource.add(fact);
            return Ok(());
        }
        let url = fact.resource().to_owned();
        self.fetch_and_cache(&url).map(|_| ())
    }

    fn fetch_and_cache(&mut self, url: &str) -> Result<Resource> {
        // with a changeset open the fetch must observe its in-flight
        // writes, so it runs on the changeset's connection
        let mut query = match &self.changeset {
            Some(changeset) => changeset.new_query(),
            None => self.db.new_query(),
        };
        query.fetch_resource(url)?;
        let mut resource = Resource::new(url);
        resource.update(query.into_result());
        // cache only when there is data; a cached empty aggregate would
        // mask a resource created by a later write
        if !resource.is_empty() {
            self.cache.put(url.to_owned(), resource.clone());
        }
        Ok(resource)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_evicts_least_recently_touched() {
        let mut cache = ResourceCache::new(2);
        cache.put("a:1".into(), Resource::new("a:1"));
        cache.put("b:1".into(), Resource::new("b:1"));
        assert!(cache.get("a:1").is_some());
        cache.put("c:1".into(), Resource::new("c:1"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b:1").is_none(), "b:1 was the coldest entry");
        assert!(cache.get("a:1").is_some());
        assert!(cache.get("c:1").is_some());
    }

    #[test]
    fn unbounded_cache_keeps_everything() {
        let mut cache = ResourceCache::new(0);
        for i in 0..100 {
            let mut res = Resource::new(format!("r:{i}"));
            res.add(Fact::new(format!("r:{i}"), "n", Value::from(i)));
            cache.put(format!("r:{i}"), res);
        }
        assert_eq!(cache.len(), 100);
    }
}
