//! Resource placement: mapping a resource URL's namespace prefix to the
//! physical table pair of a shard ("ring").
//!
//! The default placement routes everything except the reserved system
//! prefix to a single ring. Real partitioning (consistent hashing across
//! many rings) plugs in through [`Placement`] without touching the
//! changeset or query code.

use crate::error::{Result, TrellisError};

/// The reserved prefix for engine metadata resources.
pub const SYSTEM_PREFIX: &str = "sys";
/// The ring that holds metadata about the other rings.
pub const SYSTEM_RING: &str = "ring_sys";
/// The single data ring used by the default placement.
pub const DEFAULT_RING: &str = "ring0";

/// Decides which ring a namespace prefix lives on.
pub trait Placement: Send + Sync {
    fn shard_for(&self, prefix: &str) -> String;
    /// Every ring that can hold data, the system ring excluded.
    fn shards(&self) -> Vec<String>;
}

/// Default placement: one ring for everything.
#[derive(Debug, Default)]
pub struct SingleShard;

impl Placement for SingleShard {
    fn shard_for(&self, prefix: &str) -> String {
        if prefix == SYSTEM_PREFIX {
            String::from(SYSTEM_RING)
        } else {
            String::from(DEFAULT_RING)
        }
    }
    fn shards(&self) -> Vec<String> {
        vec![String::from(DEFAULT_RING)]
    }
}

/// The physical table names of one ring: the resource-identity table and
/// the fact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePair {
    pub resource: String,
    pub fact: String,
}

impl TablePair {
    pub fn for_shard(shard: &str) -> TablePair {
        TablePair {
            resource: format!("{}_res", shard),
            fact: format!("{}_rdf", shard),
        }
    }
}

/// Split a `prefix:localname` URL into its parts.
pub fn split_url(url: &str) -> Result<(&str, &str)> {
    match url.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() => Ok((prefix, local)),
        _ => Err(TrellisError::MissingPrefix(url.to_owned())),
    }
}

/// Routes resource URLs to table pairs through a placement strategy.
pub struct Directory {
    placement: Box<dyn Placement>,
}

impl Directory {
    pub fn new(placement: Box<dyn Placement>) -> Self {
        Self { placement }
    }
    pub fn shard_for_url(&self, url: &str) -> Result<String> {
        let (prefix, _) = split_url(url)?;
        Ok(self.placement.shard_for(prefix))
    }
    pub fn tables_for(&self, url: &str) -> Result<TablePair> {
        Ok(TablePair::for_shard(&self.shard_for_url(url)?))
    }
    pub fn tables_for_prefix(&self, prefix: &str) -> TablePair {
        TablePair::for_shard(&self.placement.shard_for(prefix))
    }
    /// The table pair filter queries run against. Until a placement with
    /// more than one ring exists, every filterable fact lives here; a
    /// multi-ring placement needs a union over all shards instead.
    pub fn default_tables(&self) -> TablePair {
        TablePair::for_shard(DEFAULT_RING)
    }
    /// All data rings plus the system ring.
    pub fn all_shards(&self) -> Vec<String> {
        let mut shards = vec![String::from(SYSTEM_RING)];
        shards.extend(self.placement.shards());
        shards
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new(Box::new(SingleShard))
    }
}

/// Idempotent DDL for one ring's table pair.
pub fn shard_schema(shard: &str) -> String {
    let TablePair { resource, fact } = TablePair::for_shard(shard);
    format!(
        "
        create table if not exists {resource} (
            resource text not null,
            resid integer not null,
            constraint unique_{resource}_resource primary key (
                resource
            )
        );
        create index if not exists idx_{resource}_resid on {resource} (resid);
        create table if not exists {fact} (
            resid integer not null,
            subject text not null,
            valtype integer not null,
            at text not null,
            valint integer null,
            valdouble real null,
            valtext text null,
            valdoc text null,
            valref text null
        );
        create index if not exists idx_{fact}_resid on {fact} (resid);
        create index if not exists idx_{fact}_subject on {fact} (subject);
        create index if not exists idx_{fact}_at on {fact} (at);
        create index if not exists idx_{fact}_valref on {fact} (valref);
        "
    )
}
