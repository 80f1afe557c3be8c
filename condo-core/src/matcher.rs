//! The matcher mini-language compiler.
//!
//! A matcher expression is compiled once, at role-parse time, into a
//! `Matcher` closure over a node's tag dictionary. Compilation is pure
//! and side-effect-free; a malformed expression yields a `MatcherError`
//! and the caller (role parsing) drops the role with a logged error
//! rather than treating it as fatal.

use crate::error::MatcherError;
use crate::value::Value;

/// Tags as they appear on a node: an ordered association list, not a
/// `HashMap` — declaration order is part of the node record even though
/// matcher evaluation itself doesn't depend on it.
pub type Tags<'a> = &'a [(String, String)];

fn tag_lookup<'a>(tags: Tags<'a>, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// A compiled predicate over a node's tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
    Eq(Vec<Accessor>),
}

/// One operand of an `eq` comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Tag(String),
    Literal(String),
    Nil,
}

impl Accessor {
    fn resolve<'a>(&'a self, tags: Tags<'a>) -> Option<&'a str> {
        match self {
            Accessor::Tag(key) => tag_lookup(tags, key),
            Accessor::Literal(s) => Some(s.as_str()),
            Accessor::Nil => None,
        }
    }
}

impl Matcher {
    pub fn eval(&self, tags: Tags<'_>) -> bool {
        match self {
            Matcher::And(parts) => parts.iter().all(|m| m.eval(tags)),
            Matcher::Or(parts) => parts.iter().any(|m| m.eval(tags)),
            Matcher::Not(inner) => !inner.eval(tags),
            Matcher::Eq(accessors) => {
                let mut values = accessors.iter().map(|a| a.resolve(tags));
                let first = match values.next() {
                    Some(v) => v,
                    None => return true, // unreachable: Eq always has >=1 accessor
                };
                values.all(|v| v == first)
            }
        }
    }
}

/// Compile a parsed expression into a [`Matcher`].
pub fn compile(expr: &Value) -> Result<Matcher, MatcherError> {
    let items = expr
        .as_list()
        .ok_or_else(|| MatcherError::NotAList(expr.to_string()))?;

    let (head, rest) = items
        .split_first()
        .ok_or_else(|| MatcherError::NotAList("()".to_string()))?;

    let op = head
        .as_symbol()
        .ok_or_else(|| MatcherError::UnknownOperator(head.to_string()))?;

    match op {
        "and" => {
            require_min(op, rest.len(), 1)?;
            let parts = rest.iter().map(compile).collect::<Result<_, _>>()?;
            Ok(Matcher::And(parts))
        }
        "or" => {
            require_min(op, rest.len(), 1)?;
            let parts = rest.iter().map(compile).collect::<Result<_, _>>()?;
            Ok(Matcher::Or(parts))
        }
        "not" => {
            if rest.len() != 1 {
                return Err(MatcherError::NotArity { got: rest.len() });
            }
            Ok(Matcher::Not(Box::new(compile(&rest[0])?)))
        }
        "eq" => {
            require_min(op, rest.len(), 1)?;
            let accessors = rest
                .iter()
                .map(compile_accessor)
                .collect::<Result<_, _>>()?;
            Ok(Matcher::Eq(accessors))
        }
        other => Err(MatcherError::UnknownOperator(other.to_string())),
    }
}

fn require_min(op: &str, got: usize, min: usize) -> Result<(), MatcherError> {
    if got < min {
        Err(MatcherError::Arity {
            op: op.to_string(),
            min,
            got,
        })
    } else {
        Ok(())
    }
}

fn compile_accessor(expr: &Value) -> Result<Accessor, MatcherError> {
    match expr {
        Value::Keyword(k) => Ok(Accessor::Tag(k.clone())),
        Value::Str(s) => Ok(Accessor::Literal(s.clone())),
        Value::Nil => Ok(Accessor::Nil),
        other => Err(MatcherError::BadAccessor(other.to_string())),
    }
}
