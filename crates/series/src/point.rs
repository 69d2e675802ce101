//! Stream points and meta-key derivation.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use smallvec::SmallVec;

pub const DEFAULT_SERIES_FIELD: &str = "series";

/// Sorted names of the fields that identify a point within its stream.
pub type MetaFields = SmallVec<[String; 8]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Field holding the nested series.
    pub series_field: String,
    /// Row/sequence fields that never take part in the meta-key.
    pub reserved: Vec<String>,
    /// Window for this stream; `None` follows the store-wide window.
    pub window: Option<usize>,
    /// Opaque registration blob, echoed back in views.
    pub meta: Option<Value>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            series_field: DEFAULT_SERIES_FIELD.to_string(),
            reserved: vec!["id".to_string(), "rowId".to_string(), "seq".to_string()],
            window: None,
            meta: None,
        }
    }
}

impl StreamConfig {
    fn is_reserved(&self, field: &str) -> bool {
        field == self.series_field || self.reserved.iter().any(|r| r == field)
    }

    /// Meta fields are every non-reserved, non-array top-level field.
    pub fn infer_meta_fields(&self, point: &Map<String, Value>) -> MetaFields {
        let mut out: MetaFields = point
            .iter()
            .filter(|(k, v)| !self.is_reserved(k) && !v.is_array())
            .map(|(k, _)| k.clone())
            .collect();
        out.sort_unstable();
        out
    }
}

/// Deterministic key from the meta-field values (missing renders as `null`).
pub fn meta_key(point: &Map<String, Value>, fields: &[String]) -> String {
    let mut out = String::from("[");
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        stable_stringify(point.get(f).unwrap_or(&Value::Null), &mut out);
    }
    out.push(']');
    out
}

/// JSON rendering with object keys sorted at every depth.
pub fn stable_stringify(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*k).clone()).to_string());
                out.push(':');
                stable_stringify(&map[k.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stable_stringify(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// One accumulated point: its meta-key, the first-seen fields and the
/// merged series.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPoint {
    key: String,
    series_field: String,
    fields: Map<String, Value>,
    series: Vec<Value>,
}

impl StreamPoint {
    pub(crate) fn new(key: String, series_field: &str, mut fields: Map<String, Value>) -> Self {
        let series = into_items(fields.remove(series_field));
        Self { key, series_field: series_field.to_string(), fields, series }
    }

    pub fn key(&self) -> &str { &self.key }
    /// Fields other than the series.
    pub fn fields(&self) -> &Map<String, Value> { &self.fields }
    pub fn series(&self) -> &[Value] { &self.series }
    pub(crate) fn series_mut(&mut self) -> &mut Vec<Value> { &mut self.series }

    /// Append the incoming series, plus every other array field this point
    /// also holds as an array.
    pub(crate) fn absorb(&mut self, mut incoming: Map<String, Value>) -> usize {
        let items = into_items(incoming.remove(&self.series_field));
        let appended = items.len();
        self.series.extend(items);
        for (k, v) in incoming {
            if let (Value::Array(items), Some(Value::Array(mine))) = (v, self.fields.get_mut(&k)) {
                mine.extend(items);
            }
        }
        appended
    }

    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert(self.series_field, Value::Array(self.series));
        Value::Object(fields)
    }
}

impl Serialize for StreamPoint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.fields.len() + 1))?;
        for (k, v) in self.fields.iter() {
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry(&self.series_field, &self.series)?;
        map.end()
    }
}

fn into_items(v: Option<Value>) -> Vec<Value> {
    match v {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}
