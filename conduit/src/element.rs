//! Elements flowing between operators.
//!
//! Operators exchange either opaque binary [`Chunk`]s or structured event [`Slice`]s. A [`Batch`]
//! is either of the two, as it travels between execution nodes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// The kind of elements a lazy sequence produces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    /// No data; the input of sources and the output of sinks.
    Void,
    /// Opaque binary chunks.
    Bytes,
    /// Structured, schema-tagged records.
    Events,
}

impl ElementType {
    /// All element types, in the order type inference probes them.
    pub const ALL: [ElementType; 3] = [ElementType::Void, ElementType::Events, ElementType::Bytes];
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Void => write!(f, "void"),
            ElementType::Bytes => write!(f, "bytes"),
            ElementType::Events => write!(f, "events"),
        }
    }
}

/// A single field value of an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    /// An absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A floating point number.
    Double(f64),
    /// A string.
    String(String),
    /// Nanoseconds since the UNIX epoch.
    Time(i64),
    /// A span of nanoseconds.
    Duration(i64),
}

impl Value {
    /// Compares two values of compatible kinds; numbers compare across kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(x), Bool(y)) => x.partial_cmp(y),
            (String(x), String(y)) => x.partial_cmp(y),
            (Time(x), Time(y)) => x.partial_cmp(y),
            (Duration(x), Duration(y)) => x.partial_cmp(y),
            (Int(x), Int(y)) => x.partial_cmp(y),
            (UInt(x), UInt(y)) => x.partial_cmp(y),
            (x, y) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(x) => Some(*x as f64),
            Value::UInt(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    /// Parses a literal as written in pipeline text.
    ///
    /// Integers, floating point numbers and booleans are recognized; `null` is `Null`;
    /// everything else is a string, with surrounding double quotes removed.
    pub fn parse_literal(text: &str) -> Value {
        if text == "null" {
            Value::Null
        } else if let Ok(x) = text.parse::<bool>() {
            Value::Bool(x)
        } else if let Ok(x) = text.parse::<i64>() {
            Value::Int(x)
        } else if let Ok(x) = text.parse::<u64>() {
            Value::UInt(x)
        } else if let Ok(x) = text.parse::<f64>() {
            Value::Double(x)
        } else {
            Value::String(text.trim_matches('"').to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::UInt(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(x) => write!(f, "\"{}\"", x),
            Value::Time(x) => write!(f, "{}ns", x),
            Value::Duration(x) => write!(f, "{}ns", x),
        }
    }
}

/// One event: a map from field names to values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// An event without fields.
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a field, replacing any field of the same name.
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
    /// Looks up a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
    /// Iterates over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// A batch of events sharing one schema; a "table slice".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Slice {
    schema: String,
    rows: Vec<Record>,
}

impl Slice {
    /// Creates a slice from a schema name and its events.
    pub fn new(schema: &str, rows: Vec<Record>) -> Self {
        Slice { schema: schema.to_string(), rows }
    }
    /// The schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }
    /// The events.
    pub fn rows(&self) -> &[Record] {
        &self.rows[..]
    }
    /// The number of events.
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    /// True if there are no events.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// Copies out the events in `range`.
    pub fn subslice(&self, range: Range<usize>) -> Slice {
        Slice { schema: self.schema.clone(), rows: self.rows[range].to_vec() }
    }
    /// Keeps only the events satisfying `predicate`.
    pub fn retain<F: FnMut(&Record) -> bool>(&mut self, predicate: F) {
        self.rows.retain(predicate);
    }
}

/// A chunk of opaque bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    bytes: Vec<u8>,
}

impl Chunk {
    /// The bytes of the chunk.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..]
    }
    /// The number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
    /// True if the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk { bytes }
    }
}

/// A unit of data exchanged between execution nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Batch {
    /// A chunk of bytes.
    Bytes(Chunk),
    /// A slice of events.
    Events(Slice),
}

impl Batch {
    /// The element type of the batch.
    pub fn element_type(&self) -> ElementType {
        match self {
            Batch::Bytes(_) => ElementType::Bytes,
            Batch::Events(_) => ElementType::Events,
        }
    }
    /// The number of elements: bytes for chunks, events for slices.
    pub fn len(&self) -> usize {
        match self {
            Batch::Bytes(chunk) => chunk.len(),
            Batch::Events(slice) => slice.len(),
        }
    }
    /// True if the batch carries no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The slice of an events batch.
    pub fn into_events(self) -> Option<Slice> {
        match self {
            Batch::Events(slice) => Some(slice),
            Batch::Bytes(_) => None,
        }
    }
    /// The chunk of a bytes batch.
    pub fn into_bytes(self) -> Option<Chunk> {
        match self {
            Batch::Bytes(chunk) => Some(chunk),
            Batch::Events(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(Value::Int(3).compare(&Value::Double(3.5)), Some(Ordering::Less));
        assert_eq!(Value::UInt(4).compare(&Value::Int(4)), Some(Ordering::Equal));
        assert_eq!(Value::String("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn literals_parse_to_the_narrowest_kind() {
        assert_eq!(Value::parse_literal("42"), Value::Int(42));
        assert_eq!(Value::parse_literal("18446744073709551615"), Value::UInt(u64::MAX));
        assert_eq!(Value::parse_literal("1.5"), Value::Double(1.5));
        assert_eq!(Value::parse_literal("true"), Value::Bool(true));
        assert_eq!(Value::parse_literal("\"x y\""), Value::String("x y".into()));
        assert_eq!(Value::parse_literal("null"), Value::Null);
    }

    #[test]
    fn subslices_keep_schema() {
        let rows = (0..5).map(|i| Record::new().with("i", Value::Int(i))).collect();
        let slice = Slice::new("numbers", rows);
        let sub = slice.subslice(1..3);
        assert_eq!(sub.schema(), "numbers");
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.rows()[0].get("i"), Some(&Value::Int(1)));
        assert_eq!(Batch::Events(sub).element_type(), ElementType::Events);
    }
}
