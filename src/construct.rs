// used for timestamps on facts
use chrono::{DateTime, Utc};

// custom made ordering for facts within an aggregate
use std::cmp::Ordering;

// used to print out readable forms of a construct
use std::fmt;

use serde::de::DeserializeOwned;

use crate::datatype::{Value, ValueKind};
use crate::error::{Result, TrellisError};

// ------------- Identity -------------
/// The surrogate identity of a resource. Assigned once on first write,
/// strictly increasing, never reused.
pub type Identity = i64;

// ------------- Fact -------------
/// An immutable, timestamped, typed attribute assertion about a resource.
///
/// Facts are append-only: a logical update of a subject is a new fact with
/// a newer timestamp. The current value of `(resource, subject)` is the
/// fact with the latest timestamp for that pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    resource: String,
    subject: String,
    value: Value,
    at: DateTime<Utc>,
}

impl Fact {
    /// A fact to be saved. The timestamp is provisional until a changeset
    /// stamps it during `save`.
    pub fn new(resource: impl Into<String>, subject: impl Into<String>, value: Value) -> Self {
        Self {
            resource: resource.into(),
            subject: subject.into(),
            value,
            at: Utc::now(),
        }
    }
    pub(crate) fn restored(
        resource: String,
        subject: String,
        value: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource,
            subject,
            value,
            at,
        }
    }
    // It's intentional to encapsulate the fields in the struct and only
    // expose them using "getters", because this yields true immutability
    // for facts after creation.
    pub fn resource(&self) -> &str {
        &self.resource
    }
    pub fn subject(&self) -> &str {
        &self.subject
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
    pub(crate) fn stamped(&self, at: DateTime<Utc>) -> Fact {
        let mut fact = self.clone();
        fact.at = at;
        fact
    }
    /// Deserialize this fact's document payload into a caller-supplied
    /// shape. A null document body leaves the shape untouched.
    pub fn decode_document<T: DeserializeOwned>(&self, out: &mut T) -> Result<()> {
        match &self.value {
            Value::Document(doc) => {
                if doc.is_null() {
                    return Ok(());
                }
                *out = serde_json::from_value(doc.clone())?;
                Ok(())
            }
            _ => Err(TrellisError::NotADocument),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}::<{}>, {}]",
            self.resource,
            self.subject,
            self.value,
            self.kind(),
            self.at
        )
    }
}

fn fact_order(a: &Fact, b: &Fact) -> Ordering {
    match a.subject.cmp(&b.subject) {
        Ordering::Equal => a.at.cmp(&b.at),
        other => other,
    }
}

// ------------- Resource -------------
/// The in-memory aggregate of one resource: its URL and every fact known
/// about it, sorted by `(subject, timestamp)` ascending.
///
/// Aggregates handed out by a session are snapshots; they do not reflect
/// later writes unless re-fetched.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    id: String,
    facts: Vec<Fact>,
}

impl Resource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            facts: Vec::new(),
        }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
    pub fn len(&self) -> usize {
        self.facts.len()
    }
    /// The current (latest) value asserted for a subject.
    pub fn get(&self, subject: &str) -> Option<&Value> {
        // the list is sorted by (subject, at) ascending, so the last
        // matching fact carries the latest value
        self.facts
            .iter()
            .rev()
            .find(|fact| fact.subject == subject)
            .map(|fact| &fact.value)
    }
    /// Every value ever asserted for a subject, oldest first.
    pub fn get_all(&self, subject: &str) -> Vec<&Value> {
        self.facts
            .iter()
            .filter(|fact| fact.subject == subject)
            .map(|fact| &fact.value)
            .collect()
    }
    /// Bulk merge of freshly fetched facts.
    pub fn update(&mut self, facts: Vec<Fact>) {
        self.facts.extend(facts);
        self.facts.sort_by(fact_order);
    }
    /// Append a single known fact, keeping the aggregate sorted.
    pub fn add(&mut self, fact: Fact) {
        self.facts.push(fact);
        self.facts.sort_by(fact_order);
    }
    /// Decode the latest document asserted for a subject into `out`. A
    /// null document body leaves the shape untouched.
    pub fn decode_document<T: DeserializeOwned>(&self, subject: &str, out: &mut T) -> Result<()> {
        match self.get(subject) {
            Some(Value::Document(doc)) => {
                if doc.is_null() {
                    return Ok(());
                }
                *out = serde_json::from_value(doc.clone())?;
                Ok(())
            }
            Some(_) => Err(TrellisError::NotADocument),
            None => Err(TrellisError::NoMatchingData),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} {{", self.id)?;
        for fact in &self.facts {
            writeln!(f, "  {}", fact)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact_at(subject: &str, value: Value, secs: i64) -> Fact {
        Fact::restored(
            "test:r".into(),
            subject.into(),
            value,
            DateTime::from_timestamp(secs, 0).unwrap(),
        )
    }

    #[test]
    fn latest_value_wins() {
        let mut res = Resource::new("test:r");
        res.update(vec![
            fact_at("name", Value::from("new"), 20),
            fact_at("name", Value::from("old"), 10),
            fact_at("age", Value::from(40), 15),
        ]);
        assert_eq!(res.get("name"), Some(&Value::from("new")));
        assert_eq!(res.get_all("name").len(), 2);
        assert_eq!(res.get_all("name")[0], &Value::from("old"));
        assert_eq!(res.get("missing"), None);
    }

    #[test]
    fn aggregate_stays_sorted_after_add() {
        let mut res = Resource::new("test:r");
        res.add(fact_at("b", Value::from(2), 5));
        res.add(fact_at("a", Value::from(1), 9));
        let subjects: Vec<&str> = res.facts().iter().map(|f| f.subject()).collect();
        assert_eq!(subjects, vec!["a", "b"]);
    }

    #[test]
    fn decode_document_rejects_other_kinds() {
        let fact = fact_at("name", Value::from("text"), 1);
        let mut out = serde_json::Value::Null;
        assert_eq!(
            fact.decode_document(&mut out),
            Err(TrellisError::NotADocument)
        );
    }
}
