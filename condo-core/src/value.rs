//! The symbolic tree type shared by matcher expressions, role records,
//! watcher values, and service-document templates.
//!
//! A small, `Display`-able literal enum generalized to the EDN-like
//! tree the role/watcher wire format requires: keywords, symbols,
//! associative maps, and tagged literals (`#condo/watcher "k"`).

pub mod parser;

use std::fmt;

/// A parsed symbolic expression.
///
/// Map and set/vector/list children preserve declaration order — this
/// matters for matcher compilation (accessor order in `eq`) and for
/// template expansion (watcher substitution must walk children in a
/// stable order for deterministic rendering).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `:keyword`
    Keyword(String),
    /// A bare identifier, e.g. the leading `and`/`or`/`eq` of a list.
    Symbol(String),
    /// `(a b c)`
    List(Vec<Value>),
    /// `[a b c]`
    Vector(Vec<Value>),
    /// `#{a b c}`
    Set(Vec<Value>),
    /// `{:k v, :k2 v2}` — order-preserving, duplicate keys allowed (last wins
    /// is left to callers; the tree itself is a plain association list).
    Map(Vec<(Value, Value)>),
    /// `#namespace/name payload`, e.g. `#condo/watcher "cfg"`.
    Tagged(String, String, Box<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key (by keyword name, without the leading `:`) in a map.
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_keyword() == Some(key))
            .map(|(_, v)| v)
    }

    /// Convert to a `serde_json::Value`, the representation the external
    /// schema validator consumes.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Nil => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.clone()),
            Value::Keyword(k) => J::String(format!(":{k}")),
            Value::Symbol(s) => J::String(s.clone()),
            Value::List(items) | Value::Vector(items) | Value::Set(items) => {
                J::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let mut obj = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = match k {
                        Value::Keyword(k) => k.clone(),
                        Value::Str(s) => s.clone(),
                        Value::Symbol(s) => s.clone(),
                        other => other.to_string(),
                    };
                    obj.insert(key, v.to_json());
                }
                J::Object(obj)
            }
            Value::Tagged(_, _, inner) => inner.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::Symbol(s) => f.write_str(s),
            Value::List(items) => write_seq(f, '(', ')', items),
            Value::Vector(items) => write_seq(f, '[', ']', items),
            Value::Set(items) => write_seq(f, '{', '}', items),
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                write!(f, "}}")
            }
            Value::Tagged(ns, name, inner) => write!(f, "#{ns}/{name} {inner}"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: char, close: char, items: &[Value]) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}
