//! Parsing raw KV payloads into domain types.
//!
//! Node records are plain JSON; role records are symbolic values in the
//! EDN-like grammar `condo_core::value` parses. Both converters are
//! fallible and non-panicking — a parse failure becomes a `RecordError`
//! that the reconciler logs and treats as a no-op for that event,
//! never as a crash.

use crate::error::{ParseError, RecordError};
use crate::matcher;
use crate::state::{Node, Role, ServiceTemplate};
use crate::value::{parser, Value};

/// Node records are JSON objects `{ "ip": ..., "tags": { ... } }` with
/// tag iteration order preserved. `serde_json`'s `preserve_order`
/// feature (enabled workspace-wide) backs `serde_json::Map` with an
/// `IndexMap` instead of a `BTreeMap`, so iterating `tags` here yields
/// declaration order rather than sorting keys alphabetically.
pub fn parse_node(node_name: &str, raw: &str) -> Result<Node, RecordError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| RecordError::Node(format!("invalid JSON for node '{node_name}': {e}")))?;

    let ip = value
        .get("ip")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RecordError::Node(format!("node '{node_name}' missing 'ip' field")))?
        .to_string();

    let tags = match value.get("tags") {
        None => Vec::new(),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let v = v.as_str().ok_or_else(|| {
                    RecordError::Node(format!(
                        "node '{node_name}' tag '{k}' is not a string value"
                    ))
                })?;
                Ok((k.clone(), v.to_string()))
            })
            .collect::<Result<Vec<_>, RecordError>>()?,
        Some(_) => {
            return Err(RecordError::Node(format!(
                "node '{node_name}' field 'tags' is not an object"
            )))
        }
    };

    Ok(Node {
        name: node_name.to_string(),
        ip,
        tags,
    })
}

/// Role records are a symbolic associative value with keys `:matcher`
/// and `:services`. Any service-name key that is not a keyword is
/// logged and skipped by the caller via the `Vec` of warnings this
/// returns alongside the role.
pub fn parse_role(role_key: &str, raw: &str) -> Result<(Role, Vec<String>), RecordError> {
    let value = parser::parse(raw)
        .map_err(|e| RecordError::Role(format!("role '{role_key}': {e}")))?;

    let matcher_expr = value
        .map_get("matcher")
        .ok_or_else(|| RecordError::Role(format!("role '{role_key}' missing ':matcher' key")))?;

    let compiled = matcher::compile(matcher_expr)
        .map_err(|e| RecordError::Role(format!("role '{role_key}' matcher: {e}")))?;

    let services_value = value
        .map_get("services")
        .ok_or_else(|| RecordError::Role(format!("role '{role_key}' missing ':services' key")))?;

    let entries = services_value
        .as_map()
        .ok_or_else(|| RecordError::Role(format!("role '{role_key}' ':services' is not a map")))?;

    let mut services = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();

    for (key, template) in entries {
        match key.as_keyword() {
            Some(name) => services.push(ServiceTemplate {
                name: name.to_string(),
                template: template.clone(),
            }),
            None => warnings.push(format!(
                "role '{role_key}' service key '{key}' is not a keyword, skipping"
            )),
        }
    }

    Ok((
        Role {
            key: role_key.to_string(),
            matcher: compiled,
            services,
            role_nodes: Vec::new(),
        },
        warnings,
    ))
}

/// Parse a watcher value. An unparseable expression yields `Value::Nil`
/// with the error surfaced separately for logging — this is
/// intentionally infallible so the caller never has to treat a bad
/// watcher payload as fatal.
pub fn parse_watcher_value(raw: &str) -> (Value, Option<ParseError>) {
    match parser::parse(raw) {
        Ok(v) => (v, None),
        Err(e) => (Value::Nil, Some(e)),
    }
}
