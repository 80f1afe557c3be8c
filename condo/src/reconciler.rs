//! The reconciler: the single-consumer event loop that owns `State`,
//! diffs it against the remote services prefix, and applies PUT/DELETE
//! to converge.
//!
//! One `tokio::select!` merging several event sources feeds a single
//! `loop { }`: node prefix watch, role prefix watch, watcher updates,
//! and external commands. Diffing the materialized map against its
//! previous snapshot follows a plain three-way classification (new,
//! changed, removed key) specialized to the PUT/DELETE policy below.

use std::sync::Arc;
use std::time::Duration;

use condo_core::consul::{ConsulClient, PrefixChange};
use condo_core::records::{parse_node, parse_role};
use condo_core::state::{Role, State};
use condo_core::template;
use condo_core::validator::ServiceDocumentValidator;
use condo_core::watchers::{WatcherEvent, WatcherRegistry};
use tokio::sync::{mpsc, oneshot};

const PUT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// A request to inspect state without mutating it, or to tear the
/// engine down.
pub enum Command {
    GetState(oneshot::Sender<State>),
    Stop(oneshot::Sender<()>),
}

/// A cheaply-cloneable front door for everything outside the
/// reconciler's own task — the query endpoint and `main` both hold one.
#[derive(Clone)]
pub struct ReconcilerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ReconcilerHandle {
    pub async fn get_state(&self) -> State {
        let (tx, rx) = oneshot::channel();
        // the reconciler task outlives every handle derived from it in
        // normal operation; a closed channel here means it already
        // exited, which GetState callers have no useful recovery from.
        let _ = self.commands.send(Command::GetState(tx));
        rx.await.expect("reconciler task ended before replying")
    }

    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Stop(tx));
        let _ = rx.await;
    }
}

struct Reconciler {
    state: State,
    watchers: WatcherRegistry,
    watcher_events: mpsc::UnboundedReceiver<WatcherEvent>,
    client: Arc<dyn ConsulClient>,
    validator: Arc<dyn ServiceDocumentValidator>,
    services_prefix: String,
}

/// Start the engine: opens the node and role prefix watches against
/// `client`, spawns the consumer task, and returns a handle plus the
/// task's join handle.
pub async fn spawn(
    client: Arc<dyn ConsulClient>,
    validator: Arc<dyn ServiceDocumentValidator>,
    nodes_prefix: String,
    roles_prefix: String,
    services_prefix: String,
) -> miette::Result<(ReconcilerHandle, tokio::task::JoinHandle<()>)> {
    let node_watch = client
        .watch_prefix(&nodes_prefix)
        .await
        .map_err(|e| miette::miette!("failed to start node prefix watch: {e}"))?;
    let role_watch = client
        .watch_prefix(&roles_prefix)
        .await
        .map_err(|e| miette::miette!("failed to start role prefix watch: {e}"))?;

    let (watcher_tx, watcher_events) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let reconciler = Reconciler {
        state: State::new(),
        watchers: WatcherRegistry::new(client.clone(), watcher_tx),
        watcher_events,
        client,
        validator,
        services_prefix,
    };

    let task = tokio::spawn(reconciler.run(node_watch, role_watch, command_rx));

    Ok((
        ReconcilerHandle {
            commands: command_tx,
        },
        task,
    ))
}

impl Reconciler {
    async fn run(
        mut self,
        mut node_watch: condo_core::consul::PrefixWatch,
        mut role_watch: condo_core::consul::PrefixWatch,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::GetState(reply)) => {
                            let _ = reply.send(self.state.clone());
                        }
                        Some(Command::Stop(reply)) => {
                            node_watch.stop.stop().await;
                            role_watch.stop.stop().await;
                            while node_watch.changes.recv().await.is_some() {}
                            while role_watch.changes.recv().await.is_some() {}
                            self.watchers.stop_all().await;
                            let _ = reply.send(());
                            return;
                        }
                        None => return,
                    }
                }

                Some(change) = node_watch.changes.recv() => {
                    self.apply_node_change(change).await;
                }

                Some(change) = role_watch.changes.recv() => {
                    self.apply_role_change(change).await;
                }

                Some(event) = self.watcher_events.recv() => {
                    match event {
                        WatcherEvent::Updated { key, value } => {
                            self.apply_watcher_updated(&key, value).await;
                        }
                        WatcherEvent::StreamEnded { key } => {
                            tracing::error!(%key, "watcher stream ended unexpectedly, terminating engine");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn apply_node_change(&mut self, change: PrefixChange) {
        let before = self.state.vkv.clone();

        match change {
            PrefixChange::New { key, value } => self.handle_node_new(&key, &value).await,
            PrefixChange::Updated { key, value } => {
                self.handle_node_removed(&key);
                self.handle_node_new(&key, &value).await;
            }
            PrefixChange::Removed { key } => self.handle_node_removed(&key),
        }

        self.diff_and_execute(before).await;
    }

    async fn apply_role_change(&mut self, change: PrefixChange) {
        let before = self.state.vkv.clone();

        match change {
            PrefixChange::New { key, value } => self.handle_role_new(&key, &value).await,
            PrefixChange::Updated { key, value } => {
                self.handle_role_removed(&key).await;
                self.handle_role_new(&key, &value).await;
            }
            PrefixChange::Removed { key } => self.handle_role_removed(&key).await,
        }

        self.diff_and_execute(before).await;
    }

    async fn apply_watcher_updated(&mut self, key: &str, value: condo_core::value::Value) {
        let before = self.state.vkv.clone();
        self.watchers.apply_update(key, value);
        self.sync_watchers_into_state();

        for role_key in self.watchers.roles_referencing(key) {
            self.rerender_role(&role_key);
        }

        self.diff_and_execute(before).await;
    }

    fn node_name(key: &str) -> &str {
        key.rsplit('/').next().unwrap_or(key)
    }

    async fn handle_node_new(&mut self, key: &str, raw: &str) {
        let name = Self::node_name(key).to_string();
        let node = match parse_node(&name, raw) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(node = %name, error = %e, "malformed node record, ignoring");
                return;
            }
        };

        self.state.nodes.insert(name.clone(), node);

        let matching: Vec<String> = self
            .state
            .roles
            .iter()
            .filter(|(_, role)| self.role_matches_node(role, &name))
            .map(|(key, _)| key.clone())
            .collect();

        for role_key in matching {
            if let Some(role) = self.state.roles.get_mut(&role_key) {
                if !role.role_nodes.iter().any(|n| n == &name) {
                    role.role_nodes.push(name.clone());
                }
            }
            self.render_role_for_node(&role_key, &name);
        }
    }

    fn handle_node_removed(&mut self, key: &str) {
        let name = Self::node_name(key);
        self.state.nodes.remove(name);
        for role in self.state.roles.values_mut() {
            role.role_nodes.retain(|n| n != name);
        }
        self.state.remove_node_vkv_entries(name);
    }

    fn role_matches_node(&self, role: &Role, node_name: &str) -> bool {
        self.state
            .nodes
            .get(node_name)
            .map(|node| role.matcher.eval(&node.tags))
            .unwrap_or(false)
    }

    async fn handle_role_new(&mut self, key: &str, raw: &str) {
        let role_key = Self::node_name(key).to_string();
        let (role, warnings) = match parse_role(&role_key, raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(role = %role_key, error = %e, "malformed role record, not installed");
                return;
            }
        };
        for w in warnings {
            tracing::warn!(role = %role_key, "{w}");
        }

        let mut watcher_keys: Vec<String> = Vec::new();
        for service in &role.services {
            let (keys, errors) = template::find_watchers(&service.template);
            for e in errors {
                tracing::warn!(role = %role_key, service = %service.name, "{e}");
            }
            for k in keys {
                if !watcher_keys.contains(&k) {
                    watcher_keys.push(k);
                }
            }
        }

        if let Err(e) = self.watchers.incref(&role_key, &watcher_keys).await {
            tracing::error!(role = %role_key, error = %e, "failed to subscribe role's watchers, not installed");
            return;
        }
        self.sync_watchers_into_state();

        let matching: Vec<String> = self
            .state
            .nodes
            .iter()
            .filter(|(_, node)| role.matcher.eval(&node.tags))
            .map(|(name, _)| name.clone())
            .collect();

        let mut role = role;
        role.role_nodes = matching.clone();
        self.state.roles.insert(role_key.clone(), role);

        for node_name in matching {
            self.render_role_for_node(&role_key, &node_name);
        }
    }

    async fn handle_role_removed(&mut self, key: &str) {
        let role_key = Self::node_name(key);
        if let Some(role) = self.state.roles.remove(role_key) {
            let services: Vec<String> = role.services.iter().map(|s| s.name.clone()).collect();
            self.state
                .remove_role_vkv_entries(&role.role_nodes, &services);
            self.watchers.decref(role_key).await;
            self.sync_watchers_into_state();
        }
    }

    fn rerender_role(&mut self, role_key: &str) {
        let node_names = match self.state.roles.get(role_key) {
            Some(role) => role.role_nodes.clone(),
            None => return,
        };
        for node_name in node_names {
            self.render_role_for_node(role_key, &node_name);
        }
    }

    /// Render every service declared by `role_key` for `node_name` and
    /// apply the rendering policy: on success overwrite the VKV entry;
    /// on validation failure preserve whatever entry is already there
    /// (spec.md §4.5's re-materialization precondition, §7).
    fn render_role_for_node(&mut self, role_key: &str, node_name: &str) {
        let (services, watcher_snapshot) = {
            let role = match self.state.roles.get(role_key) {
                Some(r) => r,
                None => return,
            };
            (role.services.clone(), self.watchers.snapshot())
        };

        let node = match self.state.nodes.get(node_name) {
            Some(n) => n.clone(),
            None => return,
        };

        for service in services {
            match template::expand(&service.template, &watcher_snapshot, &node, self.validator.as_ref()) {
                Ok(Some(doc)) => {
                    self.state
                        .vkv
                        .insert((node_name.to_string(), service.name.clone()), doc);
                }
                Ok(None) => {
                    tracing::warn!(
                        role = %role_key, node = %node_name, service = %service.name,
                        "service document failed validation, preserving prior rendering if any"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        role = %role_key, node = %node_name, service = %service.name,
                        error = %e, "template expansion failed, preserving prior rendering if any"
                    );
                }
            }
        }
    }

    /// Compute the symmetric difference between `before` and the
    /// current VKV and execute it against the services prefix (spec.md
    /// §4.5 diff execution).
    async fn diff_and_execute(&mut self, before: condo_core::state::Vkv) {
        let after = self.state.vkv.clone();

        for ((node, service), doc) in &after {
            let changed = match before.get(&(node.clone(), service.clone())) {
                Some(old) => old != doc,
                None => true,
            };
            if changed {
                let path = format!("{}/{}/{}", self.services_prefix, node, service);
                self.put_with_retry(&path, doc.clone()).await;
            }
        }

        for (node, service) in before.keys() {
            if !after.contains_key(&(node.clone(), service.clone())) {
                let path = format!("{}/{}/{}", self.services_prefix, node, service);
                if let Err(e) = self.client.delete(&path).await {
                    tracing::warn!(path = %path, error = %e, "DELETE failed, not retried");
                }
            }
        }
    }

    /// Mirror the watcher registry's entries into `state.watchers`
    /// (spec.md §6's query view). Called right after every mutation of
    /// the registry (`incref`, `decref`, a value update) so `state` stays
    /// continuously consistent with it — `GetState` only ever clones and
    /// replies, never mutates, per spec.md §4.5.
    fn sync_watchers_into_state(&mut self) {
        self.state.watchers = self
            .watchers
            .entries_snapshot()
            .into_iter()
            .map(|(key, value, roles)| {
                (
                    key.clone(),
                    condo_core::state::Watcher {
                        key,
                        value,
                        watcher_roles: roles,
                    },
                )
            })
            .collect();
    }

    /// PUT, retrying every 5 seconds until success (spec.md §4.5,
    /// §7). Blocks this task — by construction the only task mutating
    /// state — so no other event is processed mid-retry.
    async fn put_with_retry(&self, path: &str, body: String) {
        loop {
            match self.client.put(path, body.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "PUT failed, retrying in 5s");
                    tokio::time::sleep(PUT_RETRY_BACKOFF).await;
                }
            }
        }
    }
}
