//! Cells: the per-record map from field id to value.
//!
//! A key which is absent from the map means the cell is empty.  We never store "present but null": JSON null is the
//! sentinel for removing a key when applying a [CellDelta].
use std::collections::BTreeMap;

use log::*;
use serde_json::Value;

use crate::{Error, Result};

/// The cells of a record, keyed by field id.
pub type Cells = BTreeMap<String, Value>;

/// Serialize cells for storage.
pub fn encode_cells(cells: &Cells) -> String {
    // A map with string keys and JSON values always serializes.
    serde_json::to_string(cells).unwrap_or_else(|_| "{}".to_string())
}

/// Deserialize stored cells.
///
/// Anything which isn't a JSON object decodes as no cells at all.  One corrupt row shouldn't take down a whole
/// listing, so this logs rather than failing.
pub fn decode_cells(raw: &str) -> Cells {
    if raw.trim().is_empty() {
        return Cells::new();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        Ok(Value::Null) => Cells::new(),
        Ok(other) => {
            warn!(
                "Stored cells are a JSON {} rather than an object; treating as empty",
                json_kind(&other)
            );
            Cells::new()
        }
        Err(e) => {
            warn!("Unable to parse stored cells, treating as empty: {}", e);
            Cells::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keep only the listed fields.  An empty list keeps everything.
pub fn project_cells(cells: Cells, fields: &[String]) -> Cells {
    if fields.is_empty() {
        return cells;
    }

    cells
        .into_iter()
        .filter(|(k, _)| fields.iter().any(|f| f == k))
        .collect()
}

/// One change to one cell.
#[derive(Clone, Debug, PartialEq)]
pub enum CellPatch {
    Set(Value),
    Remove,
}

impl From<Value> for CellPatch {
    fn from(value: Value) -> Self {
        if value.is_null() {
            CellPatch::Remove
        } else {
            CellPatch::Set(value)
        }
    }
}

/// A partial update to a record's cells.
///
/// Fields not mentioned are left alone.  On the wire this is a JSON object where `null` removes the key.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct CellDelta {
    changes: BTreeMap<String, CellPatch>,
}

impl CellDelta {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builder-style set.  Setting null is the same as [CellDelta::remove].
    pub fn set(mut self, field_id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field_id.into(), CellPatch::from(value.into()));
        self
    }

    pub fn remove(mut self, field_id: impl Into<String>) -> Self {
        self.insert(field_id.into(), CellPatch::Remove);
        self
    }

    pub fn insert(&mut self, field_id: String, patch: CellPatch) {
        self.changes.insert(field_id, patch);
    }

    /// Build a delta from an arbitrary JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect::<BTreeMap<_, _>>().into()),
            _ => Err(Error::InvalidArgument(
                "a cell delta must be a JSON object".into(),
            )),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellPatch)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Merge this delta into some cells.
    pub fn apply(&self, cells: &mut Cells) {
        for (field_id, patch) in self.changes.iter() {
            match patch {
                CellPatch::Set(v) => {
                    cells.insert(field_id.clone(), v.clone());
                }
                CellPatch::Remove => {
                    cells.remove(field_id);
                }
            }
        }
    }

    /// Fold another delta on top of this one; the later delta wins per field.
    pub fn merge(&mut self, later: CellDelta) {
        self.changes.extend(later.changes);
    }
}

impl From<BTreeMap<String, Value>> for CellDelta {
    fn from(map: BTreeMap<String, Value>) -> Self {
        CellDelta {
            changes: map
                .into_iter()
                .map(|(k, v)| (k, CellPatch::from(v)))
                .collect(),
        }
    }
}

impl From<CellDelta> for BTreeMap<String, Value> {
    fn from(delta: CellDelta) -> Self {
        delta
            .changes
            .into_iter()
            .map(|(k, v)| match v {
                CellPatch::Set(v) => (k, v),
                CellPatch::Remove => (k, Value::Null),
            })
            .collect()
    }
}
