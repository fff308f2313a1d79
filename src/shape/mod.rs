/*
    Query shapes. A shape is a query with every literal value replaced by a placeholder
    naming the literal's type, so {"a": 5} and {"a": 7} end up as the same key
    {"a": "?number"}. Optionally every identifier (field names and field path strings) is
    replaced by an HMAC of its original text, which keeps keys stable for identical inputs
    without exposing the names themselves.

    Shapes are compared and hashed by their canonical serialization which is computed once
    when the key is constructed. The serialization is just a tagged, length prefixed, big
    endian walk of the tree. It never leaves the process so there is no versioning.

    Building a key is split in two phases. Registration captures a ShapeDescriptor, which is
    nothing more than the request itself, and materializing turns a descriptor into a key
    with whatever builder (plain or redacting) the caller hands in. The cache entry keeps the
    descriptor so a redacted key can be produced later when the statistics are read.
 */
mod builder;
mod encryption;
mod redaction;

use std::fmt::Display;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::types::{Namespace, Value};

pub use builder::{ShapeKeyBuilder, MAX_SHAPE_DEPTH};
pub use redaction::{HmacKey, HmacKeyError, Redaction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("encountered an encrypted payload while building the query shape: {0}")]
    EncryptedPayloadDetected(&'static str),
    #[error("query is nested deeper than {0} levels")]
    DepthLimitExceeded(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Find,
    Aggregate,
    Count,
    Distinct
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Find => "find",
            CommandKind::Aggregate => "aggregate",
            CommandKind::Count => "count",
            CommandKind::Distinct => "distinct"
        }
    }
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command as handed over by the query engine.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub namespace: Namespace,
    pub command: CommandKind,
    pub body: crate::types::Document
}

impl QueryRequest {
    pub fn new(namespace: Namespace, command: CommandKind, body: crate::types::Document) -> Self {
        Self { namespace, command, body }
    }

    pub fn find(namespace: Namespace, body: crate::types::Document) -> Self {
        Self::new(namespace, CommandKind::Find, body)
    }

    pub fn aggregate(namespace: Namespace, body: crate::types::Document) -> Self {
        Self::new(namespace, CommandKind::Aggregate, body)
    }
}

/// Everything needed to (re)build a [`ShapeKey`] for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescriptor {
    request: QueryRequest,
    application_name: Option<String>
}

impl ShapeDescriptor {
    pub fn new(request: QueryRequest, application_name: Option<String>) -> Self {
        Self { request, application_name }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.request.namespace
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn materialize(&self, builder: &ShapeKeyBuilder) -> Result<ShapeKey, ShapeError> {
        builder.build(&self.request, self.application_name.as_deref())
    }

    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.request.namespace.estimated_size()
            + self.request.body.estimated_size()
            + self.application_name.as_ref().map_or(0, String::len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeNode {
    Placeholder(String),
    Verbatim(Value),
    Array(Vec<ShapeNode>),
    Object(Vec<(String, ShapeNode)>)
}

// Fixed seeds: the hash has to be identical for identical shapes across threads and
// across store instances.
const SHAPE_HASH_SEEDS: [u64; 4] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0x27d4_eb2f_1656_67c5
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShapeKeyHash(pub u64);

impl ShapeKeyHash {
    pub fn of(bytes: &[u8]) -> Self {
        let [k0, k1, k2, k3] = SHAPE_HASH_SEEDS;
        ShapeKeyHash(ahash::RandomState::with_seeds(k0, k1, k2, k3).hash_one(bytes))
    }
}

impl Display for ShapeKeyHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ShapeKey {
    command: CommandKind,
    namespace: Namespace,
    shape: Vec<(String, ShapeNode)>,
    application_name: Option<String>,
    canonical: Vec<u8>
}

impl ShapeKey {
    pub(crate) fn new(
        command: CommandKind,
        namespace: Namespace,
        shape: Vec<(String, ShapeNode)>,
        application_name: Option<String>
    ) -> ShapeKey {
        let mut canonical = Vec::new();
        append_str(&mut canonical, command.as_str());
        append_str(&mut canonical, &namespace.db);
        append_str(&mut canonical, &namespace.collection);
        match &application_name {
            Some(name) => {
                canonical.push(1);
                append_str(&mut canonical, name);
            }
            None => canonical.push(0)
        }
        append_fields(&mut canonical, &shape);
        ShapeKey { command, namespace, shape, application_name, canonical }
    }

    pub fn command(&self) -> CommandKind {
        self.command
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn shape(&self) -> &[(String, ShapeNode)] {
        &self.shape
    }

    pub fn field(&self, name: &str) -> Option<&ShapeNode> {
        self.shape.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }

    pub fn hash(&self) -> ShapeKeyHash {
        ShapeKeyHash::of(&self.canonical)
    }

    // The tree and the canonical form hold roughly the same information
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.canonical.len() * 2
    }

    /// Renders the key as the document reported by the introspection path:
    /// `{"queryShape": {"cmdNs": {...}, "command": ..., <fields>}, "applicationName": ...}`.
    pub fn to_json(&self) -> JsonValue {
        let mut query_shape = Map::new();
        query_shape.insert("cmdNs".to_string(), serde_json::json!({
            "db": self.namespace.db,
            "coll": self.namespace.collection
        }));
        query_shape.insert("command".to_string(), JsonValue::from(self.command.as_str()));
        for (name, node) in &self.shape {
            query_shape.insert(name.clone(), node_to_json(node));
        }
        let mut key = Map::new();
        key.insert("queryShape".to_string(), JsonValue::Object(query_shape));
        if let Some(app) = &self.application_name {
            key.insert("applicationName".to_string(), JsonValue::from(app.as_str()));
        }
        JsonValue::Object(key)
    }
}

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ShapeKey {}

impl std::hash::Hash for ShapeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl Serialize for ShapeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

const TAG_OBJECT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_PLACEHOLDER: u8 = 3;
const TAG_VERBATIM: u8 = 4;

fn append_str(buffer: &mut Vec<u8>, s: &str) {
    buffer.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buffer.extend_from_slice(s.as_bytes());
}

fn append_fields(buffer: &mut Vec<u8>, fields: &[(String, ShapeNode)]) {
    buffer.extend_from_slice(&(fields.len() as u32).to_be_bytes());
    for (name, node) in fields {
        append_str(buffer, name);
        append_node(buffer, node);
    }
}

fn append_node(buffer: &mut Vec<u8>, node: &ShapeNode) {
    match node {
        ShapeNode::Object(fields) => {
            buffer.push(TAG_OBJECT);
            append_fields(buffer, fields);
        }
        ShapeNode::Array(items) => {
            buffer.push(TAG_ARRAY);
            buffer.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                append_node(buffer, item);
            }
        }
        ShapeNode::Placeholder(placeholder) => {
            buffer.push(TAG_PLACEHOLDER);
            append_str(buffer, placeholder);
        }
        ShapeNode::Verbatim(value) => {
            buffer.push(TAG_VERBATIM);
            append_value(buffer, value);
        }
    }
}

fn append_value(buffer: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buffer.push(0),
        Value::Bool(b) => {
            buffer.push(1);
            buffer.push(*b as u8);
        }
        Value::Int(i) => {
            buffer.push(2);
            buffer.extend_from_slice(&i.to_be_bytes());
        }
        Value::Long(l) => {
            buffer.push(3);
            buffer.extend_from_slice(&l.to_be_bytes());
        }
        Value::Double(d) => {
            buffer.push(4);
            buffer.extend_from_slice(&d.to_bits().to_be_bytes());
        }
        Value::String(s) => {
            buffer.push(5);
            append_str(buffer, s);
        }
        Value::Date(millis) => {
            buffer.push(6);
            buffer.extend_from_slice(&millis.to_be_bytes());
        }
        Value::Binary { subtype, bytes } => {
            buffer.push(7);
            buffer.push(subtype.0);
            buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buffer.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            buffer.push(8);
            buffer.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                append_value(buffer, item);
            }
        }
        Value::Document(doc) => {
            buffer.push(9);
            buffer.extend_from_slice(&(doc.len() as u32).to_be_bytes());
            for (name, v) in doc.iter() {
                append_str(buffer, name);
                append_value(buffer, v);
            }
        }
    }
}

fn node_to_json(node: &ShapeNode) -> JsonValue {
    match node {
        ShapeNode::Placeholder(p) => JsonValue::from(p.as_str()),
        ShapeNode::Verbatim(value) => value_to_json(value),
        ShapeNode::Array(items) => JsonValue::Array(items.iter().map(node_to_json).collect()),
        ShapeNode::Object(fields) => JsonValue::Object(
            fields.iter().map(|(n, v)| (n.clone(), node_to_json(v))).collect()
        )
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::from(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Long(l) => JsonValue::from(*l),
        Value::Double(d) => serde_json::Number::from_f64(*d).map_or(JsonValue::Null, JsonValue::Number),
        Value::String(s) => JsonValue::from(s.as_str()),
        Value::Date(millis) => serde_json::json!({ "$date": millis }),
        Value::Binary { subtype, bytes } => serde_json::json!({
            "$binary": hex::encode(bytes),
            "subType": subtype.0
        }),
        Value::Array(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Document(doc) => JsonValue::Object(
            doc.iter().map(|(n, v)| (n.to_string(), value_to_json(v))).collect()
        )
    }
}
