use std::fmt::Display;

use serde::Serialize;

const ENCRYPTED_STATE_COLLECTION_PREFIX: &str = "enxcol_.";
const ENCRYPTED_STATE_COLLECTION_SUFFIXES: [&str; 3] = [".esc", ".ecc", ".ecoc"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Namespace {
    pub db: String,
    pub collection: String
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { db: db.into(), collection: collection.into() }
    }

    // State collections backing queryable encryption. Their contents describe encrypted
    // fields, so queries against them never produce statistics.
    pub fn is_encrypted_state_collection(&self) -> bool {
        self.collection.starts_with(ENCRYPTED_STATE_COLLECTION_PREFIX)
            && ENCRYPTED_STATE_COLLECTION_SUFFIXES.iter().any(|s| self.collection.ends_with(s))
    }

    pub fn estimated_size(&self) -> usize {
        self.db.len() + self.collection.len()
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinarySubtype(pub u8);

impl BinarySubtype {
    pub const GENERIC: BinarySubtype = BinarySubtype(0);
    pub const UUID: BinarySubtype = BinarySubtype(4);
    // Client-side field level encryption payload
    pub const ENCRYPTED: BinarySubtype = BinarySubtype(6);

    pub fn is_encrypted(&self) -> bool {
        *self == Self::ENCRYPTED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Date(i64), // millis since epoch
    Binary { subtype: BinarySubtype, bytes: Vec<u8> },
    Array(Vec<Value>),
    Document(Document)
}

impl Value {
    // Names used for literal placeholders. All numeric types collapse to "number"
    // so that a query doesn't change shape when a driver picks a different width.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::Long(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Binary { .. } => "binData",
            Value::Array(_) => "array",
            Value::Document(_) => "object"
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Document(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None
        }
    }

    pub fn estimated_size(&self) -> usize {
        let payload = match self {
            Value::String(s) => s.len(),
            Value::Binary { bytes, .. } => bytes.len(),
            Value::Array(items) => items.iter().map(Value::estimated_size).sum(),
            Value::Document(doc) => doc.estimated_size(),
            _ => 0
        };
        std::mem::size_of::<Value>() + payload
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

/// Ordered field list. Field order is part of a query's shape, so this is
/// deliberately not a map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>
}

impl Document {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn estimated_size(&self) -> usize {
        self.fields.iter().map(|(n, v)| n.len() + v.estimated_size()).sum()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Document { fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// Builds a [`Document`] from `"name" => value` pairs.
#[macro_export]
macro_rules! doc {
    () => { $crate::types::Document::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::types::Document::new()$(.with($name, $value))+
    };
}

#[cfg(test)]
mod tests {
    use super::{Namespace, Value, BinarySubtype};

    #[test]
    fn encrypted_state_collections() {
        assert!(Namespace::new("test", "enxcol_.coll.esc").is_encrypted_state_collection());
        assert!(Namespace::new("test", "enxcol_.coll.ecoc").is_encrypted_state_collection());
        assert!(!Namespace::new("test", "enxcol_.coll.other").is_encrypted_state_collection());
        assert!(!Namespace::new("test", "coll.esc").is_encrypted_state_collection());
    }

    #[test]
    fn doc_macro_keeps_field_order() {
        let d = doc! { "b" => 1, "a" => "x", "c" => doc! { "d" => true } };
        let names: Vec<&str> = d.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(d.get("a"), Some(&Value::String("x".to_string())));
        assert!(d.get("z").is_none());
    }

    #[test]
    fn numeric_types_share_a_name() {
        assert_eq!(Value::Int(1).type_name(), Value::Double(1.0).type_name());
        assert_eq!(Value::Long(1).type_name(), "number");
        let bin = Value::Binary { subtype: BinarySubtype::ENCRYPTED, bytes: vec![1, 2] };
        assert_eq!(bin.type_name(), "binData");
        assert!(bin.is_scalar());
        assert!(!Value::from(vec![1, 2]).is_scalar());
    }
}
