use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde_json::Value;

/// Process-unique identity of a node, segment application, or run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Generation token identifying one row.
///
/// A token is a tick, optionally namespaced by the ids of the nodes that
/// issued it. Nodes compare tokens for equality only: a node advances at most
/// once per distinct token, so two distinct namespaces never alias even when
/// their ticks coincide.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Rc<[u64]>);

impl Token {
    pub fn new(tick: u64) -> Self {
        Token(Rc::from(vec![tick]))
    }

    /// Derives a token for the namespace owned by `scope`.
    pub fn scoped(&self, scope: NodeId) -> Self {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.push(scope.get());
        parts.extend_from_slice(&self.0);
        Token(Rc::from(parts))
    }

    pub fn tick(&self) -> u64 {
        self.0.last().copied().unwrap_or_default()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?})", &self.0[..])
    }
}

/// How far a node has progressed through its origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: Option<u64>,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(completed: u64, total: Option<u64>) -> Self {
        Self {
            completed: Some(completed),
            total,
        }
    }
}

/// A 32-byte BLAKE3 hash, used to key memoized values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Hashes the canonical JSON encoding of a value.
    pub(crate) fn of_value(value: &Value) -> Self {
        Self::hash(value.to_string())
    }

    pub(crate) fn to_hex(self) -> String {
        crate::utils::hex(&self.0)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Address of a sub-value inside an object or an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Field(String),
    /// Array position, negative values count from the end.
    Index(i64),
}

impl Key {
    /// Looks the key up in `value`.
    ///
    /// Returns `Ok(None)` when the container has no such entry and an error
    /// when the value can't be indexed by this kind of key at all.
    pub fn lookup<'a>(&self, value: &'a Value) -> anyhow::Result<Option<&'a Value>> {
        match (self, value) {
            (Key::Field(field), Value::Object(map)) => Ok(map.get(field)),
            (Key::Index(index), Value::Array(items)) => {
                Ok(resolve_index(*index, items.len()).and_then(|i| items.get(i)))
            }
            (key, other) => anyhow::bail!("cannot take {key} from {}", type_name(other)),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(field) => write!(f, "{field:?}"),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Field(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Field(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Index(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Index(value.into())
    }
}

pub(crate) fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness: `null`, `false`, zero and empty collections are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Total order over values: null < bool < number < string < array < object.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (a, b) in a.iter().zip(b) {
                match compare(a, b) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        (a, b) => rank(a).cmp(&rank(b)),
    }
}

/// Renders a value for humans: strings raw, null empty, everything else JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
