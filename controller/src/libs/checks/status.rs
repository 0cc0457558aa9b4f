//! Publishes check statuses to the status subresource

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use vigil::models::{Check, CheckConfig, CheckCrdStatus, CheckStatus};
use vigil::{Clients, Error};

/// Where a scheduler publishes its status snapshots
///
/// The scheduler's in-memory status stays authoritative; a failed publish is
/// logged by the scheduler and retried implicitly on the next snapshot.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Publish a status snapshot for a check
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check this status is for
    /// * `status` - The snapshot to publish
    async fn publish(&self, config: &CheckConfig, status: &CheckStatus) -> Result<(), Error>;
}

/// A sink that merge patches the check's status subresource
pub struct CrdStatusSink {
    /// The checks api in this check's namespace
    api: Api<Check>,
}

impl CrdStatusSink {
    /// Create a new status sink for a check
    ///
    /// # Arguments
    ///
    /// * `clients` - The k8s client bundle
    /// * `config` - The config of the check this sink publishes for
    pub fn new(clients: &Clients, config: &CheckConfig) -> Self {
        CrdStatusSink {
            api: clients.checks_in(&config.namespace),
        }
    }
}

#[async_trait]
impl StatusSink for CrdStatusSink {
    /// Publish a status snapshot for a check
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check this status is for
    /// * `status` - The snapshot to publish
    async fn publish(&self, config: &CheckConfig, status: &CheckStatus) -> Result<(), Error> {
        // render the live status down to its persisted form
        let rendered = CheckCrdStatus::from(status);
        // merge patch just the status subresource
        let patch = Patch::Merge(json!({"status": rendered}));
        self.api
            .patch_status(&config.name, &PatchParams::default(), &patch)
            .await?;
        Ok(())
    }
}
