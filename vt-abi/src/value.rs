//! Universal value type for data crossing the syscall boundary.
//!
//! `Value` is the only shape in which data moves between privilege rings:
//! syscall arguments and results, IPC message payloads, host events, and IRP
//! parameter bags are all `Value` trees. Keeping the schema closed means the
//! cross-boundary sanitizer reduces to depth and item capping: there is no
//! way to smuggle a callable or a back-reference through it.

use std::collections::BTreeMap;
use std::fmt;

use crate::{MAX_SANITIZE_DEPTH, MAX_SANITIZE_ITEMS};

/// Boundary value. A closed, acyclic tree of plain data.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null/nil/none.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map with deterministic iteration order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view: accepts both `Int` and `Float`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Fetch a map field, treating a missing field as `Null`.
    pub fn get(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        match self {
            Value::Map(map) => map.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Build a map value from key/value pairs.
    pub fn map(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Total number of nodes in this tree, counting containers and leaves.
    pub fn item_count(&self) -> usize {
        match self {
            Value::List(items) => 1 + items.iter().map(Value::item_count).sum::<usize>(),
            Value::Map(map) => 1 + map.values().map(Value::item_count).sum::<usize>(),
            _ => 1,
        }
    }

    /// Deep-copy this value for transfer to a more privileged ring.
    ///
    /// Enforces the boundary caps: recursion deeper than
    /// [`MAX_SANITIZE_DEPTH`] and any items beyond [`MAX_SANITIZE_ITEMS`]
    /// are replaced with `Null`. The sanitizer never fails: an offending
    /// subtree simply arrives empty.
    pub fn sanitized(&self) -> Value {
        let mut budget = MAX_SANITIZE_ITEMS;
        sanitize_inner(self, 0, &mut budget)
    }
}

fn sanitize_inner(value: &Value, depth: usize, budget: &mut usize) -> Value {
    if depth > MAX_SANITIZE_DEPTH || *budget == 0 {
        return Value::Null;
    }
    *budget -= 1;

    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Int(n) => Value::Int(*n),
        Value::Float(f) => Value::Float(*f),
        Value::Str(s) => Value::Str(s.clone()),
        Value::Bytes(b) => Value::Bytes(b.clone()),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| sanitize_inner(item, depth + 1, budget))
                .collect(),
        ),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_inner(v, depth + 1, budget)))
                .collect(),
        ),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<crate::Pid> for Value {
    fn from(pid: crate::Pid) -> Self {
        Value::Int(pid.0 as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let v = Value::map([
            ("name", Value::from("vt")),
            ("count", Value::Int(3)),
            ("flags", Value::List(vec![Value::Bool(true)])),
        ]);
        assert_eq!(v.get("name").as_str(), Some("vt"));
        assert_eq!(v.get("count").as_int(), Some(3));
        assert_eq!(v.get("missing"), &Value::Null);
        assert_eq!(v.get("flags").as_list().unwrap().len(), 1);
    }

    #[test]
    fn sanitize_passes_small_trees_through() {
        let v = Value::map([
            ("a", Value::Int(1)),
            ("b", Value::List(vec![Value::from("x"), Value::from("y")])),
        ]);
        assert_eq!(v.sanitized(), v);
    }

    #[test]
    fn sanitize_caps_depth() {
        // Build a chain deeper than the cap.
        let mut v = Value::Int(42);
        for _ in 0..(MAX_SANITIZE_DEPTH + 4) {
            v = Value::List(vec![v]);
        }
        let sanitized = v.sanitized();

        // Walk to the cap: the innermost survivor must be Null, not Int.
        let mut cursor = &sanitized;
        let mut depth = 0;
        while let Value::List(items) = cursor {
            cursor = &items[0];
            depth += 1;
        }
        assert!(depth <= MAX_SANITIZE_DEPTH + 1);
        assert_eq!(cursor, &Value::Null);
    }

    #[test]
    fn sanitize_caps_item_count() {
        let big = Value::List((0..MAX_SANITIZE_ITEMS as i64 + 100).map(Value::Int).collect());
        let sanitized = big.sanitized();
        let items = sanitized.as_list().unwrap();
        // Items beyond the budget arrive as Null rather than being dropped,
        // so the list shape survives but the overflow does not.
        assert_eq!(items.len(), MAX_SANITIZE_ITEMS + 100);
        assert_eq!(items[0], Value::Int(0));
        assert_eq!(items[items.len() - 1], Value::Null);
        let live = items.iter().filter(|v| !v.is_null()).count();
        assert!(live < MAX_SANITIZE_ITEMS);
    }

    #[test]
    fn item_count_counts_containers() {
        let v = Value::List(vec![Value::Int(1), Value::List(vec![Value::Int(2)])]);
        assert_eq!(v.item_count(), 4);
    }
}
