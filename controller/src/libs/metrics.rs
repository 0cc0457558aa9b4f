//! Drains scheduler metric samples for the external sink

use tokio::sync::mpsc;
use tracing::{event, Level};
use vigil::models::MetricsQueueItem;

/// The task draining the metrics queue
///
/// The sink proper lives outside this process; this exporter is the handoff
/// point and logs each sample it forwards.
pub struct MetricsExporter {
    /// The queue samples arrive on
    queue: mpsc::UnboundedReceiver<MetricsQueueItem>,
}

impl MetricsExporter {
    /// Spawn the exporter and get the queue that feeds it
    pub fn spawn() -> mpsc::UnboundedSender<MetricsQueueItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        let exporter = MetricsExporter { queue: rx };
        tokio::spawn(exporter.export());
        tx
    }

    /// Drain samples until every sender is gone
    async fn export(mut self) {
        while let Some(item) = self.queue.recv().await {
            event!(
                Level::DEBUG,
                metric = %item.metric,
                check = %item.labels.name,
                namespace = %item.labels.namespace,
                status = %item.labels.status,
                escalated = item.labels.escalated,
                value = item.value,
                "metric sample"
            );
        }
    }
}
