//! Error types shared across the crate.
//!
//! Small `thiserror` leaf enums per collaborator, with
//! `miette::Diagnostic` derived so parse failures can carry a source
//! span back to the operator.

use miette::Diagnostic;
use thiserror::Error;

/// A single malformed node encountered while parsing a symbolic value
/// (matcher expression, role record, watcher value, ...).
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,

    #[help]
    pub help: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Matcher compile-time failure. A role whose matcher produces one of
/// these is dropped, not fatal to the engine.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum MatcherError {
    #[error("malformed matcher expression: {0}")]
    Parse(#[from] ParseError),

    #[error("'{op}' requires at least {min} operand(s), got {got}")]
    Arity { op: String, min: usize, got: usize },

    #[error("'not' takes exactly one operand, got {got}")]
    NotArity { got: usize },

    #[error("unsupported accessor in 'eq': {0}")]
    BadAccessor(String),

    #[error("unknown matcher operator: {0}")]
    UnknownOperator(String),

    #[error("matcher expression must be a list, got: {0}")]
    NotAList(String),
}

/// Template-expansion failure.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum TemplateError {
    #[error("watcher tag payload must be a string literal: {0}")]
    BadWatcherTag(String),

    #[error("reference to watcher '{0}' with no registered value")]
    MissingWatcher(String),

    #[error("document failed schema validation: {0}")]
    Validation(String),

    #[error("document is not representable as JSON: {0}")]
    NotJson(String),
}

/// Failures talking to the remote KV store.
#[derive(Debug, Error, Diagnostic)]
pub enum ConsulError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("watch stream for '{0}' ended unexpectedly")]
    StreamEnded(String),
}

/// Errors surfaced by role/node record parsing. Both are non-fatal: the
/// triggering event becomes a no-op.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum RecordError {
    #[error("malformed node record: {0}")]
    Node(String),

    #[error("malformed role record: {0}")]
    Role(String),
}
