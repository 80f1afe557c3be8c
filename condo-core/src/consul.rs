//! The Consul client interface.
//!
//! A trait plus one HTTP-backed implementation over Consul's
//! blocking-query KV API, built on `reqwest` with an explicit
//! `ClientBuilder` timeout — a minimal trait of our own rather than a
//! dependency on the third-party `consul` crate, since the full client
//! surface is out of scope.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConsulError;

/// One change observed on a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixChange {
    New { key: String, value: String },
    Updated { key: String, value: String },
    Removed { key: String },
}

/// A handle that stops a background watch task. Consuming it awaits the
/// task's completion, so a caller that has stopped every watch knows
/// every background task has actually wound down.
pub struct StopHandle {
    notify: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StopHandle {
    /// Build a handle around a task's cancellation channel and join
    /// handle. Public so other `ConsulClient` implementations (and
    /// test doubles) can construct one.
    pub fn new(notify: tokio::sync::oneshot::Sender<()>, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            notify: Some(notify),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        if let Some(notify) = self.notify.take() {
            let _ = notify.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// A long-poll watch on a single key. `initial` is the value present at
/// subscription time, read synchronously before the watch is handed
/// back; subsequent values arrive on `updates`.
pub struct KeyWatch {
    pub initial: String,
    pub updates: mpsc::UnboundedReceiver<String>,
    pub stop: StopHandle,
}

/// A prefix watch: an initial snapshot expressed as `New` changes,
/// followed by further `PrefixChange`s as they occur.
pub struct PrefixWatch {
    pub changes: mpsc::UnboundedReceiver<PrefixChange>,
    pub stop: StopHandle,
}

#[async_trait]
pub trait ConsulClient: Send + Sync {
    /// Subscribe to every key under `prefix`. Ordering within the
    /// returned stream reflects remote ordering.
    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch, ConsulError>;

    /// Subscribe to a single key, blocking until its current value is
    /// available.
    async fn watch_key(&self, key: &str) -> Result<KeyWatch, ConsulError>;

    async fn put(&self, path: &str, body: String) -> Result<(), ConsulError>;

    async fn delete(&self, path: &str) -> Result<(), ConsulError>;
}

/// HTTP implementation against Consul's `/v1/kv` blocking-query API.
pub struct HttpConsulClient {
    client: reqwest::Client,
    base_url: String,
    wait: Duration,
}

impl HttpConsulClient {
    pub fn new(base_url: impl Into<String>, wait: Duration) -> Result<Self, ConsulError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(wait + Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            wait,
        })
    }

    /// Build the `/v1/kv/<path>` URL, percent-encoding each path segment
    /// so node/role/service names containing reserved characters don't
    /// corrupt the request.
    fn kv_url(&self, path: &str) -> String {
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/v1/kv/{}", self.base_url.trim_end_matches('/'), encoded)
    }
}

#[derive(Debug, serde::Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

fn decode_value(entry: &KvEntry) -> Result<String, ConsulError> {
    use base64::Engine;

    match &entry.value {
        None => Ok(String::new()),
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ConsulError::Decode(format!("key '{}': {e}", entry.key)))?;
            String::from_utf8(bytes)
                .map_err(|e| ConsulError::Decode(format!("key '{}': {e}", entry.key)))
        }
    }
}

#[async_trait]
impl ConsulClient for HttpConsulClient {
    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch, ConsulError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        let client = self.client.clone();
        let url = format!("{}?recurse=true", self.kv_url(prefix));
        let wait = self.wait;
        let prefix_owned = prefix.to_string();

        let task = tokio::spawn(async move {
            let mut index = 0u64;
            let mut known: std::collections::HashMap<String, (String, u64)> =
                std::collections::HashMap::new();

            loop {
                let query_url = format!("{url}&index={index}&wait={}s", wait.as_secs());

                tokio::select! {
                    _ = &mut stop_rx => return,
                    resp = client.get(&query_url).send() => {
                        let entries = match resp.and_then(|r| r.error_for_status()) {
                            Ok(r) => match r.json::<Vec<KvEntry>>().await {
                                Ok(entries) => entries,
                                Err(e) => {
                                    tracing::warn!(error = %e, prefix = %prefix_owned, "malformed prefix watch response");
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                    continue;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, prefix = %prefix_owned, "prefix watch request failed, retrying");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue;
                            }
                        };

                        let mut seen = std::collections::HashSet::new();
                        let mut max_index = index;

                        for entry in &entries {
                            max_index = max_index.max(entry.modify_index);
                            seen.insert(entry.key.clone());

                            let value = match decode_value(entry) {
                                Ok(v) => v,
                                Err(e) => {
                                    tracing::warn!(error = %e, key = %entry.key, "failed to decode KV value");
                                    continue;
                                }
                            };

                            let change = match known.get(&entry.key) {
                                None => PrefixChange::New { key: entry.key.clone(), value: value.clone() },
                                Some((old_value, _)) if old_value != &value => {
                                    PrefixChange::Updated { key: entry.key.clone(), value: value.clone() }
                                }
                                Some(_) => continue,
                            };

                            known.insert(entry.key.clone(), (value, entry.modify_index));
                            if tx.send(change).is_err() {
                                return;
                            }
                        }

                        let removed: Vec<String> = known
                            .keys()
                            .filter(|k| !seen.contains(*k))
                            .cloned()
                            .collect();

                        for key in removed {
                            known.remove(&key);
                            if tx.send(PrefixChange::Removed { key }).is_err() {
                                return;
                            }
                        }

                        index = max_index;
                    }
                }
            }
        });

        Ok(PrefixWatch {
            changes: rx,
            stop: StopHandle::new(stop_tx, task),
        })
    }

    async fn watch_key(&self, key: &str) -> Result<KeyWatch, ConsulError> {
        let url = self.kv_url(key);

        let resp = self
            .client
            .get(format!("{url}?index=0&wait={}s", self.wait.as_secs()))
            .send()
            .await?
            .error_for_status()?;

        let entries: Vec<KvEntry> = resp
            .json()
            .await
            .map_err(|e| ConsulError::Decode(e.to_string()))?;

        let (initial, mut index) = match entries.first() {
            Some(entry) => (decode_value(entry)?, entry.modify_index),
            None => (String::new(), 0),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        let client = self.client.clone();
        let wait = self.wait;
        let key_owned = key.to_string();

        let task = tokio::spawn(async move {
            loop {
                let query_url = format!("{url}?index={index}&wait={}s", wait.as_secs());

                tokio::select! {
                    _ = &mut stop_rx => return,
                    resp = client.get(&query_url).send() => {
                        let entries = match resp.and_then(|r| r.error_for_status()) {
                            Ok(r) => match r.json::<Vec<KvEntry>>().await {
                                Ok(e) => e,
                                Err(e) => {
                                    tracing::warn!(error = %e, key = %key_owned, "malformed key watch response");
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                    continue;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, key = %key_owned, "key watch request failed, retrying");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                continue;
                            }
                        };

                        match entries.first() {
                            Some(entry) => {
                                index = entry.modify_index;
                                let value = match decode_value(entry) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        tracing::warn!(error = %e, key = %key_owned, "failed to decode KV value");
                                        continue;
                                    }
                                };
                                if tx.send(value).is_err() {
                                    return;
                                }
                            }
                            None => {
                                tracing::error!(key = %key_owned, "watch stream ended: key no longer exists");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(KeyWatch {
            initial,
            updates: rx,
            stop: StopHandle::new(stop_tx, task),
        })
    }

    async fn put(&self, path: &str, body: String) -> Result<(), ConsulError> {
        let resp = self.client.put(self.kv_url(path)).body(body).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ConsulError::Status(resp.status()))
        }
    }

    async fn delete(&self, path: &str) -> Result<(), ConsulError> {
        let resp = self.client.delete(self.kv_url(path)).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ConsulError::Status(resp.status()))
        }
    }
}
