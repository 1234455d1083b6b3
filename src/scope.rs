use super::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::coordinator::QueuedDispatch;
use crate::mutation::apply_statements;
use crate::scalar::scalar_eq;

/// Stable handle for a scope record, allocated when the scope element is
/// first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Field name to scalar mapping carried by a scope attribute. Field order is
/// the order of the serialized object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeState {
    fields: Map<String, Value>,
}

impl ScopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object.
    pub fn from_json(src: &str) -> Result<Self> {
        parse_state(src).map_err(|message| Error::StateDeserialization {
            scope: truncate_chars(src, 60),
            message,
        })
    }

    /// Compact JSON in field order.
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for ScopeState {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(key, value)| other.fields.get(key).is_some_and(|o| scalar_eq(value, o)))
    }
}

impl From<Map<String, Value>> for ScopeState {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn parse_state(src: &str) -> std::result::Result<ScopeState, String> {
    match serde_json::from_str::<Value>(src) {
        Ok(Value::Object(fields)) => Ok(ScopeState { fields }),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(err) => Err(err.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What a prediction did to a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Speculation {
    pub before: ScopeState,
    pub after: ScopeState,
    pub report: BatchReport,
}

#[derive(Debug)]
pub(crate) struct ScopeRecord {
    pub(crate) id: ScopeId,
    pub(crate) node: NodeId,
    pub(crate) state: ScopeState,
    pub(crate) serialized: String,
    pub(crate) busy: bool,
    pub(crate) queue: VecDeque<QueuedDispatch>,
}

/// Registry of scope records keyed by [`ScopeId`].
#[derive(Debug)]
pub(crate) struct ScopeStore {
    attr: String,
    records: BTreeMap<ScopeId, ScopeRecord>,
    by_node: HashMap<NodeId, ScopeId>,
    next_id: u64,
}

impl ScopeStore {
    pub(crate) fn new(attr: &str) -> Self {
        Self {
            attr: attr.to_string(),
            records: BTreeMap::new(),
            by_node: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn ids(&self) -> Vec<ScopeId> {
        self.records.keys().copied().collect()
    }

    pub(crate) fn state(&self, id: ScopeId) -> Option<&ScopeState> {
        self.records.get(&id).map(|r| &r.state)
    }

    pub(crate) fn node(&self, id: ScopeId) -> Option<NodeId> {
        self.records.get(&id).map(|r| r.node)
    }

    pub(crate) fn record_mut(&mut self, id: ScopeId) -> Option<&mut ScopeRecord> {
        self.records.get_mut(&id)
    }

    pub(crate) fn is_live(&self, dom: &Dom, id: ScopeId) -> bool {
        self.records
            .get(&id)
            .is_some_and(|r| dom.is_connected(r.node) && dom.has_attr(r.node, &self.attr))
    }

    /// Returns the record for `node`, creating it on first encounter and
    /// re-reading the attribute when it changed behind the store's back.
    pub(crate) fn load(&mut self, dom: &Dom, node: NodeId) -> Result<ScopeId> {
        let Some(raw) = dom.attr(node, &self.attr) else {
            return Err(Error::StateDeserialization {
                scope: describe_node(dom, node),
                message: format!("missing {} attribute", self.attr),
            });
        };

        if let Some(&id) = self.by_node.get(&node) {
            let Some(record) = self.records.get_mut(&id) else {
                return Err(Error::Runtime(format!("dangling scope index for {id}")));
            };
            if record.serialized != raw {
                match parse_state(&raw) {
                    Ok(state) => {
                        record.state = state;
                        record.serialized = raw;
                    }
                    Err(message) => {
                        self.evict(id);
                        return Err(Error::StateDeserialization {
                            scope: describe_node(dom, node),
                            message,
                        });
                    }
                }
            }
            return Ok(id);
        }

        let state = parse_state(&raw).map_err(|message| Error::StateDeserialization {
            scope: describe_node(dom, node),
            message,
        })?;
        let id = ScopeId(self.next_id);
        self.next_id += 1;
        self.records.insert(
            id,
            ScopeRecord {
                id,
                node,
                state,
                serialized: raw,
                busy: false,
                queue: VecDeque::new(),
            },
        );
        self.by_node.insert(node, id);
        Ok(id)
    }

    /// Snapshots the state, applies the batch and writes the result back to
    /// the attribute. `None` only when the scope cannot be resolved.
    pub(crate) fn speculative_apply(
        &mut self,
        dom: &mut Dom,
        id: ScopeId,
        statements: &str,
    ) -> Option<Speculation> {
        let record = self.records.get(&id)?;
        if !dom.is_connected(record.node) {
            return None;
        }
        let before = record.state.clone();
        let mut after = before.clone();
        let report = apply_statements(&mut after, statements);
        self.write(dom, id, after.clone()).ok()?;
        Some(Speculation {
            before,
            after,
            report,
        })
    }

    pub(crate) fn commit(&mut self, dom: &mut Dom, id: ScopeId, state: ScopeState) -> Result<()> {
        self.write(dom, id, state)
    }

    pub(crate) fn rollback(
        &mut self,
        dom: &mut Dom,
        id: ScopeId,
        snapshot: &ScopeState,
    ) -> Result<()> {
        self.write(dom, id, snapshot.clone())
    }

    fn write(&mut self, dom: &mut Dom, id: ScopeId, state: ScopeState) -> Result<()> {
        let Some(record) = self.records.get_mut(&id) else {
            return Err(Error::Runtime(format!("unknown {id}")));
        };
        let serialized = state.to_json();
        dom.set_attr(record.node, &self.attr, &serialized)?;
        record.state = state;
        record.serialized = serialized;
        Ok(())
    }

    /// Evicts records whose element left the document or lost the scope
    /// attribute. Returns the number of evicted records.
    pub(crate) fn sweep(&mut self, dom: &Dom) -> usize {
        let stale = self
            .records
            .values()
            .filter(|r| !dom.is_connected(r.node) || !dom.has_attr(r.node, &self.attr))
            .map(|r| r.id)
            .collect::<Vec<_>>();
        for id in &stale {
            self.evict(*id);
        }
        stale.len()
    }

    fn evict(&mut self, id: ScopeId) {
        if let Some(record) = self.records.remove(&id) {
            self.by_node.remove(&record.node);
        }
    }
}

pub(crate) fn describe_node(dom: &Dom, node: NodeId) -> String {
    let tag = dom.tag_name(node).unwrap_or("#node");
    match dom.attr(node, "id") {
        Some(id) => format!("<{tag} id=\"{id}\">"),
        None => format!("<{tag}>"),
    }
}
