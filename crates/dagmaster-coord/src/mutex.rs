use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::coord_service::CoordService;
use crate::errors::{CoordError, CoordResult};

/// Exclusive lock recipe built on sequential ephemeral children: the holder
/// with the lowest sequence number under `lock_path` owns the lock. Waiters
/// poll rather than watch their predecessor, trading a little latency for a
/// much simpler implementation — acceptable here since failover locks are
/// held briefly and contended by at most a handful of Masters.
pub struct DistributedMutex {
    coord: Arc<dyn CoordService>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl DistributedMutex {
    pub fn new(coord: Arc<dyn CoordService>) -> Self {
        Self {
            coord,
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(30),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    pub async fn acquire(&self, lock_path: &str) -> CoordResult<DistributedMutexGuard> {
        let own_path = self.coord.create_sequential_ephemeral(lock_path, Vec::new()).await?;
        let own_name = own_path.rsplit('/').next().unwrap_or_default().to_string();

        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            let mut children = self.coord.get_children(lock_path).await?;
            children.sort();
            if children.first().map(String::as_str) == Some(own_name.as_str()) {
                debug!(lock_path, own_name, "acquired distributed mutex");
                return Ok(DistributedMutexGuard {
                    coord: self.coord.clone(),
                    path: own_path,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = self.coord.delete(&own_path).await;
                return Err(CoordError::Other(format!(
                    "timed out waiting for distributed mutex at {lock_path}"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Releases the held lock node when dropped or when `release` is called
/// explicitly. Prefer `release().await` on code paths that can await; the
/// `Drop` impl is a backstop for panics and early returns.
#[must_use = "the mutex is held until this guard is released or dropped"]
pub struct DistributedMutexGuard {
    coord: Arc<dyn CoordService>,
    path: String,
}

impl DistributedMutexGuard {
    pub async fn release(mut self) -> CoordResult<()> {
        let result = self.coord.delete(&self.path).await;
        self.path.clear();
        result
    }
}

impl Drop for DistributedMutexGuard {
    fn drop(&mut self) {
        if self.path.is_empty() {
            return;
        }
        let coord = self.coord.clone();
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = coord.delete(&path).await {
                        warn!(%path, error = %err, "failed to release distributed mutex node on drop");
                    }
                });
            }
            Err(_) => warn!(%path, "distributed mutex guard dropped outside a tokio runtime"),
        }
    }
}
