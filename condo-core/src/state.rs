//! The in-memory world model.
//!
//! Owned exclusively by the reconciler task; `GetState` queries receive
//! a `Clone` of this struct rather than a reference, trading the cost of
//! a deep copy for never holding a reference across an await point.

use std::collections::HashMap;

use crate::matcher::Matcher;
use crate::value::Value;

/// An entry in the nodes prefix. Tag order is preserved
/// from the source JSON object, since it's observable through the
/// matcher's `eq` accessor ordering and the query endpoint's output.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub ip: String,
    pub tags: Vec<(String, String)>,
}

/// A single declared service inside a role: its name and its unexpanded
/// document template.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTemplate {
    pub name: String,
    pub template: Value,
}

/// A compiled role. `role_nodes` is derived, never authoritative input —
/// it is recomputed whenever nodes or the role itself change.
#[derive(Debug, Clone)]
pub struct Role {
    pub key: String,
    pub matcher: Matcher,
    pub services: Vec<ServiceTemplate>,
    pub role_nodes: Vec<String>,
}

/// A watched remote key. `watcher_roles` is a multiset — duplicates are
/// significant for reference counting, so it's a `Vec`, not a `HashSet`.
#[derive(Debug, Clone)]
pub struct Watcher {
    pub key: String,
    pub value: Value,
    pub watcher_roles: Vec<String>,
}

/// The materialized (node-name, service-name) -> rendered-document map.
/// Deterministic for a given (nodes, roles, watcher-values) snapshot.
pub type Vkv = HashMap<(String, String), String>;

/// The tuple (VKV, roles, nodes, watchers) — mutated by exactly one
/// agent, the reconciler.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub vkv: Vkv,
    pub roles: HashMap<String, Role>,
    pub nodes: HashMap<String, Node>,
    pub watchers: HashMap<String, Watcher>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role-keys whose `role_nodes` contains `node_name` (used by the
    /// query endpoint's per-node `roles` list).
    pub fn roles_for_node<'a>(&'a self, node_name: &str) -> Vec<&'a str> {
        self.roles
            .values()
            .filter(|r| r.role_nodes.iter().any(|n| n == node_name))
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Remove every VKV entry whose first component equals `node_name`.
    pub fn remove_node_vkv_entries(&mut self, node_name: &str) {
        self.vkv.retain(|(n, _), _| n != node_name);
    }

    /// Remove every VKV entry for (node, service) where node is in
    /// `role_nodes` and service is one of `role_services`.
    pub fn remove_role_vkv_entries(&mut self, role_nodes: &[String], role_services: &[String]) {
        self.vkv.retain(|(n, s), _| {
            !(role_nodes.iter().any(|rn| rn == n) && role_services.iter().any(|rs| rs == s))
        });
    }
}
