//! The read side: fetching whole resources and conjunctive filter search.
//!
//! Filter evaluation retrieves one sorted identity set per filter and
//! intersects them with binary searches, which is pragmatic for the
//! small-to-moderate sets the engine is built for.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params, params_from_iter};

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::construct::{Fact, Identity};
use crate::datatype::{Value, ValueKind};
use crate::error::{Result, TrellisError};
use crate::persist::Database;

// ------------- Op -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    Equals,
    Greater,
    Less,
    GreaterEquals,
    LessEquals,
    NotEquals,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Equals => "=",
            Op::Greater => ">",
            Op::Less => "<",
            Op::GreaterEquals => ">=",
            Op::LessEquals => "<=",
            Op::NotEquals => "!=",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

// ------------- Filter -------------
/// One conjunctive predicate: `subject = ? and <typed column> <op> ?`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub subject: String,
    pub op: Op,
    /// Overrides the column choice; inferred from the value when absent.
    pub kind: Option<ValueKind>,
    pub value: Value,
}

impl Filter {
    pub fn new(subject: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            op: Op::default(),
            kind: None,
            value: value.into(),
        }
    }
    pub fn with_op(mut self, op: Op) -> Self {
        self.op = op;
        self
    }
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }
    fn column(&self) -> Result<&'static str> {
        let kind = self.kind.unwrap_or_else(|| self.value.kind());
        kind.column()
            .ok_or_else(|| TrellisError::CannotFilterOnKind(kind.to_string()))
    }
    fn clause(&self, tbl: &str) -> Result<String> {
        Ok(format!(
            "{}.subject = ?1 and {}.{} {} ?2",
            tbl,
            tbl,
            self.column()?,
            self.op.as_sql()
        ))
    }
}

// ------------- Query -------------
/// A read scope accumulating filters and producing an ordered fact
/// sequence. Bound either to the ambient connection or, through
/// `Changeset::new_query`, to a live changeset's transaction.
pub struct Query {
    db: Database,
    // a transaction's connection when changeset-bound, the handle's
    // anchor connection otherwise
    conn: Option<Arc<Mutex<Connection>>>,
    filters: Vec<Filter>,
    result: Vec<Fact>,
}

const FACT_COLUMNS: &str = "res.resource, rdf.resid, rdf.subject, rdf.valtype, rdf.at, \
     rdf.valint, rdf.valdouble, rdf.valtext, rdf.valdoc, rdf.valref";

fn fact_from_row(row: &Row) -> Result<Fact> {
    let resource: String = row.get(0)?;
    let subject: String = row.get(2)?;
    let code: i64 = row.get(3)?;
    let at: DateTime<Utc> = row.get(4)?;
    let kind = ValueKind::from_code(code).ok_or_else(|| {
        TrellisError::DataCorruption(format!(
            "fact row for '{}' carries value kind code {}",
            resource, code
        ))
    })?;
    if !kind.is_valid() {
        return Err(TrellisError::InvalidValueKind);
    }
    let value = match kind {
        ValueKind::Int => Value::Int(row.get(5)?),
        ValueKind::Double => Value::Double(row.get(6)?),
        ValueKind::String => Value::String(row.get(7)?),
        ValueKind::Document => {
            let payload: Option<String> = row.get(8)?;
            match payload {
                Some(text) if !text.is_empty() => Value::Document(
                    serde_json::from_str(&text)
                        .map_err(|e| TrellisError::DataCorruption(e.to_string()))?,
                ),
                _ => Value::Document(serde_json::Value::Null),
            }
        }
        ValueKind::Reference => Value::Reference(row.get(9)?),
        ValueKind::Invalid => unreachable!("invalid kind filtered above"),
    };
    Ok(Fact::restored(resource, subject, value, at))
}

impl Query {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            conn: None,
            filters: Vec::new(),
            result: Vec::new(),
        }
    }

    pub(crate) fn bound(db: Database, conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            conn: Some(conn),
            filters: Vec::new(),
            result: Vec::new(),
        }
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.conn {
            Some(conn) => {
                let conn = conn.lock()?;
                op(&conn)
            }
            None => self.db.with_conn(op),
        }
    }

    pub fn add_filter(&mut self, filter: Filter) -> &mut Query {
        self.filters.push(filter);
        self
    }

    pub fn copy_filters_from(&mut self, other: &Query) -> &mut Query {
        self.filters = other.filters.clone();
        self
    }

    pub fn result(&self) -> &[Fact] {
        &self.result
    }

    pub fn into_result(self) -> Vec<Fact> {
        self.result
    }

    /// All facts of one resource, ordered by timestamp ascending. A
    /// resource that does not exist yields an empty result.
    pub fn fetch_resource(&mut self, url: &str) -> Result<()> {
        let tables = self.db.tables_for(url)?;
        let sql = format!(
            "select {FACT_COLUMNS} from {} res inner join {} rdf on res.resid = rdf.resid \
             where res.resource = ?1 order by rdf.at",
            tables.resource, tables.fact
        );
        self.result = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![url])?;
            let mut facts = Vec::new();
            while let Some(row) = rows.next()? {
                facts.push(fact_from_row(row)?);
            }
            Ok(facts)
        })?;
        Ok(())
    }

    /// Evaluate all filters conjunctively and materialize the facts of
    /// every resource satisfying them.
    pub fn exec(&mut self) -> Result<()> {
        if self.filters.is_empty() {
            return Err(TrellisError::AtLeastOneFilterRequired);
        }
        let id_sets = self.fetch_id_sets()?;
        let ids = intersect(&id_sets);
        if ids.is_empty() {
            self.result.clear();
            return Ok(());
        }
        self.rebuild_resources(&ids)
    }

    /// One sorted, de-duplicated identity set per filter. An empty set
    /// short-circuits the whole query with `NoMatchingData`.
    fn fetch_id_sets(&self) -> Result<Vec<Vec<Identity>>> {
        // filters run against the default ring only; a placement with more
        // than one data ring needs a union over all fact tables here
        let tables = self.db.directory().default_tables();
        let mut sets = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let sql = format!(
                "select rdf.resid from {} rdf where {}",
                tables.fact,
                filter.clause("rdf")?
            );
            let mut ids: Vec<Identity> = self.with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![filter.subject, filter.value])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(row.get(0)?);
                }
                Ok(ids)
            })?;
            if ids.is_empty() {
                return Err(TrellisError::NoMatchingData);
            }
            ids.sort_unstable();
            ids.dedup();
            sets.push(ids);
        }
        Ok(sets)
    }

    fn rebuild_resources(&mut self, ids: &[Identity]) -> Result<()> {
        let tables = self.db.directory().default_tables();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "select {FACT_COLUMNS} from {} res inner join {} rdf on res.resid = rdf.resid \
             where rdf.resid in ({placeholders}) order by rdf.resid, rdf.at",
            tables.resource, tables.fact
        );
        self.result = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(ids.iter()))?;
            let mut facts = Vec::new();
            while let Some(row) = rows.next()? {
                facts.push(fact_from_row(row)?);
            }
            Ok(facts)
        })?;
        Ok(())
    }

    /// Release query-owned resources. Queries borrow a shared connection,
    /// so there is nothing to close.
    pub fn done(self) {}
}

/// Intersect sorted, de-duplicated identity sets.
fn intersect(sets: &[Vec<Identity>]) -> Vec<Identity> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .copied()
        .filter(|id| rest.iter().all(|ids| ids.binary_search(id).is_ok()))
        .collect()
}
