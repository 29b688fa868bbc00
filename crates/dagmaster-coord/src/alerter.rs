use async_trait::async_trait;
use dagmaster_model::{AlertKind, Alerter};
use tracing::warn;

/// `Alerter` that only logs. Every other transport (email, SMS, webhook) is
/// out of scope for this core; production deployments swap this out for a
/// real sink without touching `ClusterController` or `DagEngine`.
#[derive(Debug, Default)]
pub struct LoggingAlerter;

#[async_trait]
impl Alerter for LoggingAlerter {
    async fn alert(&self, kind: AlertKind) {
        warn!(?kind, "alert fired");
    }
}
