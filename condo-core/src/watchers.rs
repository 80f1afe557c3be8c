//! The watcher registry.
//!
//! A registry/instance split: the registry owns lifecycle and reference
//! counting over a map of entries; each entry owns exactly one remote
//! long-poll task via a `StopHandle`. Forwarding of observed updates to
//! the reconciler happens over an `mpsc::UnboundedSender<WatcherEvent>`
//! the registry is constructed with.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::consul::{ConsulClient, KeyWatch, StopHandle};
use crate::error::ConsulError;
use crate::records::parse_watcher_value;
use crate::value::Value;

/// Emitted to the reconciler whenever a watched key's value changes, or
/// when a watch terminates unexpectedly (treated as fatal for that key).
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    Updated { key: String, value: Value },
    StreamEnded { key: String },
}

struct WatcherEntry {
    value: Value,
    roles: Vec<String>,
    stop: StopHandle,
}

/// Owns the reference-counted set of remote key watches.
pub struct WatcherRegistry {
    client: Arc<dyn ConsulClient>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    entries: HashMap<String, WatcherEntry>,
}

impl WatcherRegistry {
    pub fn new(client: Arc<dyn ConsulClient>, events: mpsc::UnboundedSender<WatcherEvent>) -> Self {
        Self {
            client,
            events,
            entries: HashMap::new(),
        }
    }

    /// Current value of `key`, if it is being watched.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Every watched key with its current value and referencing roles,
    /// for the query endpoint's diagnostic view.
    pub fn entries_snapshot(&self) -> Vec<(String, Value, Vec<String>)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone(), e.roles.clone()))
            .collect()
    }

    /// Add one reference from `role_key` to each of `keys`. For a key
    /// already watched, appends `role_key` to its roles list —
    /// duplicates are legitimate, since two services in the same role
    /// template can both reference the same watcher.
    ///
    /// Keys not yet watched are subscribed concurrently (`try_join_all`,
    /// so starting several watches doesn't serialize their round trips)
    /// and each blocks on its first remote read before being registered,
    /// so a role is never materialized against a watcher that hasn't
    /// resolved once.
    pub async fn incref(&mut self, role_key: &str, keys: &[String]) -> Result<(), ConsulError> {
        let mut new_keys = Vec::new();
        for key in keys {
            if !self.entries.contains_key(key) && !new_keys.contains(key) {
                new_keys.push(key.clone());
            }
        }

        let fetched = futures_util::future::try_join_all(
            new_keys.iter().map(|key| self.client.watch_key(key)),
        )
        .await?;

        for (key, watch) in new_keys.into_iter().zip(fetched) {
            let KeyWatch {
                initial,
                mut updates,
                stop,
            } = watch;

            let (value, parse_err) = parse_watcher_value(&initial);
            if let Some(e) = parse_err {
                tracing::warn!(key = %key, error = %e, "initial watcher value failed to parse, using nil");
            }

            let tx = self.events.clone();
            let key_owned = key.clone();
            tokio::spawn(async move {
                while let Some(raw) = updates.recv().await {
                    let (value, parse_err) = parse_watcher_value(&raw);
                    if let Some(e) = parse_err {
                        tracing::warn!(key = %key_owned, error = %e, "watcher value failed to parse, using nil");
                    }
                    if tx
                        .send(WatcherEvent::Updated {
                            key: key_owned.clone(),
                            value,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                // the channel closed without an explicit stop: the remote
                // watch ended unexpectedly, treated as fatal for this key.
                let _ = tx.send(WatcherEvent::StreamEnded { key: key_owned });
            });

            self.entries.insert(
                key,
                WatcherEntry {
                    value,
                    roles: Vec::new(),
                    stop,
                },
            );
        }

        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.roles.push(role_key.to_string());
            }
        }

        Ok(())
    }

    /// Remove exactly one occurrence of `role_key` from every watcher's
    /// roles list that contains it — true reference-count decrement, not
    /// a filter over roles. Watchers whose roles list becomes empty are
    /// stopped and dropped.
    pub async fn decref(&mut self, role_key: &str) {
        let mut drained = Vec::new();

        for (key, entry) in self.entries.iter_mut() {
            if let Some(pos) = entry.roles.iter().position(|r| r == role_key) {
                entry.roles.remove(pos);
                if entry.roles.is_empty() {
                    drained.push(key.clone());
                }
            }
        }

        for key in drained {
            if let Some(entry) = self.entries.remove(&key) {
                entry.stop.stop().await;
            }
        }
    }

    /// Apply a value update observed on the event stream. No-op if the
    /// key is no longer registered (a race against a concurrent `decref`
    /// that already stopped it).
    pub fn apply_update(&mut self, key: &str, value: Value) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value;
        }
    }

    pub fn is_watched(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn refcount(&self, key: &str) -> usize {
        self.entries.get(key).map(|e| e.roles.len()).unwrap_or(0)
    }

    /// Role-keys that reference `key`, with duplicates collapsed — used
    /// to fan a `WatcherUpdated` event out to every affected role
    /// exactly once.
    pub fn roles_referencing(&self, key: &str) -> Vec<String> {
        match self.entries.get(key) {
            None => Vec::new(),
            Some(entry) => {
                let mut roles = entry.roles.clone();
                roles.sort();
                roles.dedup();
                roles
            }
        }
    }

    /// Stop every remaining watch, as the final step of engine shutdown.
    pub async fn stop_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.stop.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::consul::PrefixWatch;

    struct FakeClient {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl ConsulClient for FakeClient {
        async fn watch_prefix(&self, _prefix: &str) -> Result<PrefixWatch, ConsulError> {
            unimplemented!("not exercised by these tests")
        }

        async fn watch_key(&self, key: &str) -> Result<KeyWatch, ConsulError> {
            let initial = self
                .values
                .lock()
                .await
                .get(key)
                .cloned()
                .unwrap_or_default();
            let (_tx, rx) = mpsc::unbounded_channel();
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
            let task = tokio::spawn(async move {
                let _ = stop_rx.await;
            });
            Ok(KeyWatch {
                initial,
                updates: rx,
                stop: StopHandle::new(stop_tx, task),
            })
        }

        async fn put(&self, _path: &str, _body: String) -> Result<(), ConsulError> {
            Ok(())
        }

        async fn delete(&self, _path: &str) -> Result<(), ConsulError> {
            Ok(())
        }
    }

    fn registry() -> (WatcherRegistry, mpsc::UnboundedReceiver<WatcherEvent>) {
        let mut values = HashMap::new();
        values.insert("cfg".to_string(), "3".to_string());
        let client = Arc::new(FakeClient {
            values: Mutex::new(values),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        (WatcherRegistry::new(client, tx), rx)
    }

    #[tokio::test]
    async fn incref_registers_a_new_watcher() {
        let (mut reg, _rx) = registry();
        reg.incref("web", &["cfg".to_string()]).await.unwrap();
        assert!(reg.is_watched("cfg"));
        assert_eq!(reg.refcount("cfg"), 1);
        assert_eq!(reg.value("cfg"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn incref_twice_appends_role_without_restarting_watch() {
        let (mut reg, _rx) = registry();
        reg.incref("web", &["cfg".to_string()]).await.unwrap();
        reg.incref("db", &["cfg".to_string()]).await.unwrap();
        assert_eq!(reg.refcount("cfg"), 2);
    }

    #[tokio::test]
    async fn decref_removes_one_occurrence_and_keeps_others() {
        let (mut reg, _rx) = registry();
        reg.incref("web", &["cfg".to_string()]).await.unwrap();
        reg.incref("db", &["cfg".to_string()]).await.unwrap();
        reg.decref("web").await;
        assert_eq!(reg.refcount("cfg"), 1);
        assert!(reg.is_watched("cfg"));
    }

    #[tokio::test]
    async fn decref_to_zero_stops_and_drops_the_watcher() {
        let (mut reg, _rx) = registry();
        reg.incref("web", &["cfg".to_string()]).await.unwrap();
        reg.decref("web").await;
        assert!(!reg.is_watched("cfg"));
    }

    #[tokio::test]
    async fn apply_update_is_a_noop_for_untracked_keys() {
        let (mut reg, _rx) = registry();
        reg.apply_update("missing", Value::Int(1));
        assert!(!reg.is_watched("missing"));
    }
}
