use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::coord_service::{CoordService, WatchEvent};
use crate::errors::{CoordError, CoordResult};

#[derive(Debug, Default)]
struct Node {
    data: Vec<u8>,
}

/// In-process `CoordService` for tests. Delivers watch events synchronously
/// on mutation, with no network involved.
#[derive(Debug, Default)]
pub struct InMemoryCoordService {
    nodes: Mutex<HashMap<String, Node>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::Sender<WatchEvent>>>>,
    sequence: AtomicU64,
}

impl InMemoryCoordService {
    pub fn new() -> Self {
        Self::default()
    }

    fn parent_of(path: &str) -> String {
        match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
            None => "/".to_string(),
        }
    }

    fn notify(&self, parent: &str, event: WatchEvent) {
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(senders) = watchers.get_mut(parent) {
            senders.retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        }
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .lock()
            .unwrap()
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect()
    }
}

#[async_trait]
impl CoordService for InMemoryCoordService {
    async fn ensure_persistent_path(&self, path: &str) -> CoordResult<()> {
        self.nodes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert_with(Node::default);
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(CoordError::NodeExists(path.to_string()));
        }
        nodes.insert(path.to_string(), Node { data: data.clone() });
        drop(nodes);
        self.notify(
            &Self::parent_of(path),
            WatchEvent::ChildAdded {
                path: path.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn create_persistent(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        self.create_ephemeral(path, data).await
    }

    async fn create_sequential_ephemeral(&self, parent: &str, data: Vec<u8>) -> CoordResult<String> {
        self.ensure_persistent_path(parent).await?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let path = format!("{parent}/lock-{seq:010}");
        self.create_ephemeral(&path, data).await?;
        Ok(path)
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        let removed = self.nodes.lock().unwrap().remove(path).is_some();
        if !removed {
            return Err(CoordError::NoNode(path.to_string()));
        }
        self.notify(&Self::parent_of(path), WatchEvent::ChildRemoved { path: path.to_string() });
        Ok(())
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        Ok(self.children_of(path))
    }

    async fn get_data(&self, path: &str) -> CoordResult<Option<Vec<u8>>> {
        Ok(self.nodes.lock().unwrap().get(path).map(|n| n.data.clone()))
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(path).ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        node.data = data.clone();
        drop(nodes);
        self.notify(
            &Self::parent_of(path),
            WatchEvent::ChildUpdated {
                path: path.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        Ok(self.nodes.lock().unwrap().contains_key(path))
    }

    async fn watch_children(&self, path: &str) -> CoordResult<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(256);
        self.watchers.lock().unwrap().entry(path.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
