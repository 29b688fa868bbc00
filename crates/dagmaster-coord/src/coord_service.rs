use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::CoordResult;

/// A change observed under a watched parent path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    ChildAdded { path: String, data: Vec<u8> },
    ChildRemoved { path: String },
    ChildUpdated { path: String, data: Vec<u8> },
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::ChildAdded { path, .. }
            | WatchEvent::ChildRemoved { path }
            | WatchEvent::ChildUpdated { path, .. } => path,
        }
    }
}

/// Typed wrapper over a hierarchical, watchable, ephemeral-node coordination
/// store (ZooKeeper-class). Implementations must never block the caller on a
/// watch callback: events are forwarded onto the channel returned by
/// `watch_children` and consumed on the caller's own loop.
#[async_trait]
pub trait CoordService: Send + Sync + std::fmt::Debug {
    async fn ensure_persistent_path(&self, path: &str) -> CoordResult<()>;

    async fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> CoordResult<()>;

    async fn create_persistent(&self, path: &str, data: Vec<u8>) -> CoordResult<()>;

    /// Creates an ephemeral, monotonically sequenced child under `parent`
    /// (e.g. `parent/lock-0000000001`) and returns its full path. Used by
    /// the distributed mutex recipe.
    async fn create_sequential_ephemeral(&self, parent: &str, data: Vec<u8>) -> CoordResult<String>;

    async fn delete(&self, path: &str) -> CoordResult<()>;

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    async fn get_data(&self, path: &str) -> CoordResult<Option<Vec<u8>>>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordResult<()>;

    async fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Installs a children-watch on `path`; events stream on the returned
    /// channel until it is dropped or the session expires.
    async fn watch_children(&self, path: &str) -> CoordResult<mpsc::Receiver<WatchEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_event_path_accessor_covers_all_variants() {
        assert_eq!(
            WatchEvent::ChildAdded {
                path: "/a".into(),
                data: vec![]
            }
            .path(),
            "/a"
        );
        assert_eq!(WatchEvent::ChildRemoved { path: "/b".into() }.path(), "/b");
        assert_eq!(
            WatchEvent::ChildUpdated {
                path: "/c".into(),
                data: vec![]
            }
            .path(),
            "/c"
        );
    }
}
