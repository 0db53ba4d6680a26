//! Converting cells to and from the flat text used by CSV import and export.
//!
//! For any string this module produces, parsing it back yields the same cell, and formatting that again yields the
//! same string.  Select cells are stored as choice ids but written as choice names, so both directions take the
//! field's [Choices].
use std::collections::HashMap;

use serde_json::Value;

use crate::{Field, FieldType};

/// The choices of a select field, indexed both ways.
#[derive(Clone, Debug, Default)]
pub struct Choices {
    names_by_id: HashMap<String, String>,
    ids_by_name: HashMap<String, String>,
}

impl Choices {
    /// Build from `(id, name)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut ret: Choices = Default::default();
        for (id, name) in pairs {
            ret.ids_by_name.insert(name.clone(), id.clone());
            ret.names_by_id.insert(id, name);
        }
        ret
    }

    /// Read the choices out of a field's options, which look like `{"choices": [{"id": .., "name": ..}]}`.
    pub fn from_field(field: &Field) -> Self {
        let pairs = field
            .options
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|c| {
                        let id = c.get("id")?.as_str()?;
                        let name = c.get("name")?.as_str()?;
                        Some((id.to_string(), name.to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Choices::new(pairs)
    }

    fn name_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.names_by_id.get(id).map(String::as_str).unwrap_or(id)
    }

    fn id_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.ids_by_name.get(name).map(String::as_str).unwrap_or(name)
    }
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|x| !x.is_empty())
}

/// Parse CSV text into a cell.  None means the cell is empty, including when the text doesn't fit the field.
pub fn parse_cell_value(text: &str, field: &Field, choices: &Choices) -> Option<Value> {
    if text.is_empty() {
        return None;
    }

    let value = match field.field_type {
        FieldType::SingleSelect => Value::String(choices.id_of(text).to_string()),
        FieldType::MultiSelect => Value::Array(
            split_list(text)
                .map(|name| Value::String(choices.id_of(name).to_string()))
                .collect(),
        ),
        FieldType::Checkbox => Value::Bool(matches!(text, "true" | "1" | "yes")),
        FieldType::Number | FieldType::Currency | FieldType::Percent | FieldType::Rating => {
            let x = text.trim().parse::<f64>().ok().filter(|x| x.is_finite())?;
            serde_json::Number::from_f64(x).map(Value::Number)?
        }
        FieldType::Duration => Value::from(text.trim().parse::<i64>().ok()?),
        FieldType::Attachment => match serde_json::from_str::<Value>(text).ok()? {
            v @ Value::Array(_) => v,
            _ => return None,
        },
        FieldType::Collaborator => Value::Array(
            split_list(text)
                .map(|id| Value::String(id.to_string()))
                .collect(),
        ),
        _ => Value::String(text.to_string()),
    };

    Some(value)
}

/// Format a cell as CSV text.
pub fn format_cell_value(value: &Value, field: &Field, choices: &Choices) -> String {
    match (&field.field_type, value) {
        (_, Value::Null) => String::new(),
        (FieldType::SingleSelect, Value::String(id)) => choices.name_of(id).to_string(),
        (FieldType::MultiSelect, Value::Array(ids)) => ids
            .iter()
            .map(|id| match id {
                Value::String(s) => choices.name_of(s).to_string(),
                other => plain(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        (FieldType::Collaborator, Value::Array(ids)) => ids
            .iter()
            .map(plain)
            .collect::<Vec<_>>()
            .join(","),
        (FieldType::Attachment, v) => v.to_string(),
        (t, Value::Number(n)) if t.is_numeric() => format_number(n),
        _ => plain(value),
    }
}

/// Integral numbers print without a fractional part.
fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }

    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
