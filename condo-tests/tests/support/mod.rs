//! A fully in-process `ConsulClient` test double, in the spirit of the
//! teacher's `MockConfigLoader` (`proxy::watcher::file_watcher` tests):
//! no real network, but a faithful enough model of Consul's blocking-
//! query semantics to drive the reconciler end to end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use condo_core::consul::{ConsulClient, KeyWatch, PrefixChange, PrefixWatch, StopHandle};
use condo_core::error::ConsulError;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
struct Inner {
    prefix_senders: HashMap<String, mpsc::UnboundedSender<PrefixChange>>,
    key_senders: HashMap<String, mpsc::UnboundedSender<String>>,
    puts: Vec<(String, String)>,
    deletes: Vec<String>,
    remaining_put_failures: HashMap<String, u32>,
}

/// Drives a reconciler under test. Clone freely; every clone shares the
/// same underlying state.
#[derive(Clone)]
pub struct FakeConsulClient {
    inner: Arc<Mutex<Inner>>,
    seeded: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeConsulClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            seeded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish a `New`/`Updated` change on a prefix that has already
    /// been subscribed to via `watch_prefix`.
    pub async fn publish(&self, prefix: &str, key_suffix: &str, value: &str, is_update: bool) {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .prefix_senders
            .get(prefix)
            .unwrap_or_else(|| panic!("prefix '{prefix}' was never watched"))
            .clone();
        let key = format!("{prefix}/{key_suffix}");
        let change = if is_update {
            PrefixChange::Updated { key, value: value.to_string() }
        } else {
            PrefixChange::New { key, value: value.to_string() }
        };
        drop(inner);
        let _ = tx.send(change);
    }

    pub async fn remove(&self, prefix: &str, key_suffix: &str) {
        let inner = self.inner.lock().await;
        let tx = inner
            .prefix_senders
            .get(prefix)
            .unwrap_or_else(|| panic!("prefix '{prefix}' was never watched"))
            .clone();
        drop(inner);
        let _ = tx.send(PrefixChange::Removed {
            key: format!("{prefix}/{key_suffix}"),
        });
    }

    pub async fn update_watcher(&self, key: &str, value: &str) {
        let inner = self.inner.lock().await;
        let tx = inner
            .key_senders
            .get(key)
            .unwrap_or_else(|| panic!("watcher '{key}' was never subscribed"))
            .clone();
        drop(inner);
        let _ = tx.send(value.to_string());
    }

    /// Seed a key watch with its initial value, so a later `watch_key`
    /// call sees it as the first blocking read.
    pub async fn seed_watcher(&self, key: &str, value: &str) {
        self.seeded.lock().await.insert(key.to_string(), value.to_string());
    }

    pub async fn fail_next_puts(&self, path: &str, count: u32) {
        self.inner
            .lock()
            .await
            .remaining_put_failures
            .insert(path.to_string(), count);
    }

    pub async fn puts(&self) -> Vec<(String, String)> {
        self.inner.lock().await.puts.clone()
    }

    pub async fn deletes(&self) -> Vec<String> {
        self.inner.lock().await.deletes.clone()
    }
}

#[async_trait]
impl ConsulClient for FakeConsulClient {
    async fn watch_prefix(&self, prefix: &str) -> Result<PrefixWatch, ConsulError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .await
            .prefix_senders
            .insert(prefix.to_string(), tx);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
        });

        Ok(PrefixWatch {
            changes: rx,
            stop: StopHandle::new(stop_tx, task),
        })
    }

    async fn watch_key(&self, key: &str) -> Result<KeyWatch, ConsulError> {
        let initial = self
            .seeded
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.key_senders.insert(key.to_string(), tx);

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

    async fn put(&self, path: &str, body: String) -> Result<(), ConsulError> {
        let mut inner = self.inner.lock().await;
        if let Some(remaining) = inner.remaining_put_failures.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ConsulError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
            }
        }
        inner.puts.push((path.to_string(), body));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ConsulError> {
        self.inner.lock().await.deletes.push(path.to_string());
        Ok(())
    }
}
