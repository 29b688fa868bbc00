use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode, WatchedEvent, WatchedEventType, Watcher, ZooKeeper};

use crate::coord_service::{CoordService, WatchEvent};
use crate::errors::{CoordError, CoordResult};

/// Forwards session-level events (disconnect, session expiry) so the
/// `ClusterController` can treat `SessionExpired` as fatal rather than
/// silently reconnecting into an inconsistent membership view.
struct SessionWatcher {
    tx: std::sync::mpsc::Sender<WatchedEvent>,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        let _ = self.tx.send(event);
    }
}

/// Re-arms itself on every `NodeChildrenChanged` notification (ZK watches
/// are one-shot) and diffs the refreshed child list against the last known
/// set to synthesize add/remove events onto `tx`.
struct ChildWatcher {
    client: Arc<ZooKeeper>,
    path: String,
    known: Arc<StdMutex<HashSet<String>>>,
    tx: mpsc::Sender<WatchEvent>,
}

impl Watcher for ChildWatcher {
    fn handle(&self, event: WatchedEvent) {
        if event.event_type != WatchedEventType::NodeChildrenChanged {
            return;
        }
        let rearmed = ChildWatcher {
            client: self.client.clone(),
            path: self.path.clone(),
            known: self.known.clone(),
            tx: self.tx.clone(),
        };
        let children = match self.client.get_children_w(&self.path, rearmed) {
            Ok(children) => children,
            Err(err) => {
                warn!(path = %self.path, error = %err, "failed to refresh children after watch fired");
                return;
            }
        };
        let current: HashSet<String> = children.into_iter().collect();
        let mut known = self.known.lock().unwrap();
        for added in current.difference(&known) {
            let child_path = format!("{}/{added}", self.path);
            let data = self
                .client
                .get_data(&child_path, false)
                .map(|(data, _)| data)
                .unwrap_or_default();
            let _ = self.tx.try_send(WatchEvent::ChildAdded {
                path: child_path,
                data,
            });
        }
        for removed in known.difference(&current) {
            let _ = self.tx.try_send(WatchEvent::ChildRemoved {
                path: format!("{}/{removed}", self.path),
            });
        }
        *known = current;
    }
}

/// `CoordService` backed by a real ZooKeeper ensemble via the `zookeeper`
/// crate. That crate's client is synchronous; every call here hops onto a
/// blocking task so it never stalls the tokio runtime.
pub struct ZkCoordService {
    client: Arc<ZooKeeper>,
}

impl std::fmt::Debug for ZkCoordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkCoordService").finish_non_exhaustive()
    }
}

impl ZkCoordService {
    pub fn connect(connect_string: &str, session_timeout: Duration) -> CoordResult<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let client = ZooKeeper::connect(connect_string, session_timeout, SessionWatcher { tx })
            .map_err(|e| CoordError::ConnectionLost(e.to_string()))?;
        std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                debug!(?event, "zookeeper session event");
            }
        });
        Ok(Self { client: Arc::new(client) })
    }
}

#[async_trait]
impl CoordService for ZkCoordService {
    async fn ensure_persistent_path(&self, path: &str) -> CoordResult<()> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || match client.exists(&path, false) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => client
                .create(&path, Vec::new(), Acl::open_unsafe().clone(), CreateMode::Persistent)
                .map(|_| ())
                .map_err(|e| CoordError::Other(e.to_string())),
            Err(e) => Err(CoordError::Other(e.to_string())),
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .create(&path, data, Acl::open_unsafe().clone(), CreateMode::Ephemeral)
                .map(|_| ())
                .map_err(|e| map_create_error(path.clone(), e))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn create_persistent(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .create(&path, data, Acl::open_unsafe().clone(), CreateMode::Persistent)
                .map(|_| ())
                .map_err(|e| map_create_error(path.clone(), e))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn create_sequential_ephemeral(&self, parent: &str, data: Vec<u8>) -> CoordResult<String> {
        self.ensure_persistent_path(parent).await?;
        let client = self.client.clone();
        let prefix = format!("{parent}/lock-");
        tokio::task::spawn_blocking(move || {
            client
                .create(
                    &prefix,
                    data,
                    Acl::open_unsafe().clone(),
                    CreateMode::EphemeralSequential,
                )
                .map_err(|e| CoordError::Other(e.to_string()))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .delete(&path, None)
                .map_err(|e| CoordError::Other(e.to_string()))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .get_children(&path, false)
                .map_err(|e| CoordError::Other(e.to_string()))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn get_data(&self, path: &str) -> CoordResult<Option<Vec<u8>>> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || match client.get_data(&path, false) {
            Ok((data, _)) => Ok(Some(data)),
            Err(zookeeper::ZkError::NoNode) => Ok(None),
            Err(e) => Err(CoordError::Other(e.to_string())),
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordResult<()> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .set_data(&path, data, None)
                .map(|_| ())
                .map_err(|e| CoordError::Other(e.to_string()))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        let client = self.client.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            client
                .exists(&path, false)
                .map(|stat| stat.is_some())
                .map_err(|e| CoordError::Other(e.to_string()))
        })
        .await
        .map_err(|e| CoordError::Other(e.to_string()))?
    }

    async fn watch_children(&self, path: &str) -> CoordResult<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let path = path.to_string();
        let known = Arc::new(StdMutex::new(HashSet::new()));

        tokio::task::spawn_blocking(move || {
            let watcher = ChildWatcher {
                client: client.clone(),
                path: path.clone(),
                known: known.clone(),
                tx: tx.clone(),
            };
            match client.get_children_w(&path, watcher) {
                Ok(children) => {
                    *known.lock().unwrap() = children.into_iter().collect();
                }
                Err(e) => warn!(%path, error = %e, "failed to install initial children watch"),
            }
        });

        Ok(rx)
    }
}

fn map_create_error(path: String, err: zookeeper::ZkError) -> CoordError {
    match err {
        zookeeper::ZkError::NodeExists => CoordError::NodeExists(path),
        other => CoordError::Other(other.to_string()),
    }
}
