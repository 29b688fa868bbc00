use async_trait::async_trait;

use crate::execution_status::ExecutionStatus;

/// Reason a notification is being fired. Carries only the identifiers a
/// human-readable alert needs; formatting and transport belong to the
/// `Alerter` implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    ProcessEnd {
        process_instance_id: i64,
        state: ExecutionStatus,
    },
    WorkerToleranceWarning {
        process_instance_id: i64,
        task_name: String,
    },
    ServerDown {
        host: String,
    },
    ProcessTimeout {
        process_instance_id: i64,
    },
    MasterDown {
        host: String,
    },
}

/// Fire-and-forget notification sink. Real transport (email, SMS, webhook)
/// is out of scope here; implementations only need to get the message out
/// the door without blocking the caller's state machine on delivery.
#[async_trait]
pub trait Alerter: Send + Sync + std::fmt::Debug {
    async fn alert(&self, kind: AlertKind);

    /// Fires the same alert `times` times, honoring a `warn_times_failover`
    /// style config knob for alerts that should repeat until acknowledged.
    async fn alert_repeated(&self, kind: AlertKind, times: u32) {
        for _ in 0..times {
            self.alert(kind.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingAlerter(AtomicUsize);

    #[async_trait]
    impl Alerter for CountingAlerter {
        async fn alert(&self, _kind: AlertKind) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn alert_repeated_fires_n_times() {
        let alerter = CountingAlerter::default();
        alerter
            .alert_repeated(AlertKind::ServerDown { host: "h".into() }, 3)
            .await;
        assert_eq!(alerter.0.load(Ordering::SeqCst), 3);
    }
}
