//! The template expander.
//!
//! Takes a service-document template (a symbolic tree embedded in a
//! role), the watcher values currently known to the registry, and a
//! target node, and produces the JSON string ultimately written to
//! `services_prefix/<node>/<service>` — or `None` if validation fails.

use std::collections::HashMap;

use serde_json::json;

use crate::error::TemplateError;
use crate::state::Node;
use crate::validator::ServiceDocumentValidator;
use crate::value::Value;

/// Pure tree walk returning every watcher key referenced via
/// `#condo/watcher "K"` inside `v`. A tagged `condo/watcher` node whose
/// payload is not a string literal
/// is a structural error: logged and omitted by the caller, so this
/// returns the offending nodes separately rather than failing outright.
pub fn find_watchers(v: &Value) -> (Vec<String>, Vec<String>) {
    let mut keys = Vec::new();
    let mut errors = Vec::new();
    walk_find(v, &mut keys, &mut errors);
    (keys, errors)
}

fn walk_find(v: &Value, keys: &mut Vec<String>, errors: &mut Vec<String>) {
    match v {
        Value::Tagged(ns, name, payload) if ns == "condo" && name == "watcher" => match &**payload
        {
            Value::Str(k) => keys.push(k.clone()),
            other => errors.push(format!(
                "#condo/watcher payload must be a string literal, found: {other}"
            )),
        },
        Value::List(items) | Value::Vector(items) | Value::Set(items) => {
            for item in items {
                walk_find(item, keys, errors);
            }
        }
        Value::Map(entries) => {
            for (k, val) in entries {
                walk_find(k, keys, errors);
                walk_find(val, keys, errors);
            }
        }
        Value::Tagged(_, _, payload) => walk_find(payload, keys, errors),
        _ => {}
    }
}

/// Substitute every `#condo/watcher "K"` node with the current value of
/// watcher `K`. Substitution is non-recursive on the replacement: a
/// watcher value is never itself re-expanded, even if it happens to
/// contain a `#condo/watcher` tag.
///
/// Precondition: the caller has already `incref`'d the watcher registry
/// for every key `find_watchers` returns, so every key in `watchers` is
/// present. A reference to a key missing from the map is a programmer
/// error surfaced as `TemplateError::MissingWatcher`.
fn substitute(v: &Value, watchers: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    match v {
        Value::Tagged(ns, name, payload) if ns == "condo" && name == "watcher" => match &**payload
        {
            Value::Str(k) => watchers
                .get(k)
                .cloned()
                .ok_or_else(|| TemplateError::MissingWatcher(k.clone())),
            other => Err(TemplateError::BadWatcherTag(other.to_string())),
        },
        Value::List(items) => Ok(Value::List(substitute_all(items, watchers)?)),
        Value::Vector(items) => Ok(Value::Vector(substitute_all(items, watchers)?)),
        Value::Set(items) => Ok(Value::Set(substitute_all(items, watchers)?)),
        Value::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, val) in entries {
                out.push((substitute(k, watchers)?, substitute(val, watchers)?));
            }
            Ok(Value::Map(out))
        }
        Value::Tagged(ns, name, payload) => Ok(Value::Tagged(
            ns.clone(),
            name.clone(),
            Box::new(substitute(payload, watchers)?),
        )),
        leaf => Ok(leaf.clone()),
    }
}

fn substitute_all(
    items: &[Value],
    watchers: &HashMap<String, Value>,
) -> Result<Vec<Value>, TemplateError> {
    items.iter().map(|i| substitute(i, watchers)).collect()
}

/// Expand a service-document template for `node`.
///
/// Returns `Ok(None)` when schema validation fails — the caller logs
/// and omits the document, preserving any prior materialized entry,
/// rather than treating it as an error.
pub fn expand(
    template: &Value,
    watchers: &HashMap<String, Value>,
    node: &Node,
    validator: &dyn ServiceDocumentValidator,
) -> Result<Option<String>, TemplateError> {
    let substituted = substitute(template, watchers)?;
    let expanded_json = substituted.to_json();

    if let Err(reason) = validator.validate(&expanded_json) {
        tracing::warn!(%reason, "service document failed schema validation");
        return Ok(None);
    }

    let with_host = inject_host(expanded_json, &node.ip);

    serde_json::to_string(&with_host)
        .map(Some)
        .map_err(|e| TemplateError::NotJson(e.to_string()))
}

fn inject_host(mut doc: serde_json::Value, ip: &str) -> serde_json::Value {
    let host_entry = json!({"name": "HOST", "value": ip});

    if let Some(obj) = doc.as_object_mut() {
        let env = obj
            .entry("environment")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));

        if let serde_json::Value::Array(list) = env {
            list.insert(0, host_entry);
        } else {
            *env = serde_json::Value::Array(vec![host_entry]);
        }
    }

    doc
}
