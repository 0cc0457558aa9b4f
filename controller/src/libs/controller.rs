//! The controller reconciling declared checks with live schedulers
//!
//! The controller tails the watch stream for Check resources and keeps one
//! scheduler alive per declared check: schedulers are created on ADDED,
//! replaced on materially MODIFIED, and torn down on DELETED. A periodic
//! audit compares the declared cluster state against the in-memory one.

use futures::StreamExt;
use kube::api::{ListParams, WatchEvent, WatchParams};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{event, instrument, Level};
use vigil::models::{Check, CheckConfig, CheckCrdStatus, CheckStatus, MetricLabels, MetricsQueueItem};
use vigil::{Clients, Conf, Error};

use super::checks::{CheckScheduler, CrdStatusSink, Escalator, K8sJobRunner, Notifier};
use super::crds;
use super::metrics::MetricsExporter;

/// Get the `namespace/name` key for a check resource
///
/// # Arguments
///
/// * `check` - The check to key
fn key_of(check: &Check) -> Option<String> {
    match (&check.metadata.namespace, &check.metadata.name) {
        (Some(namespace), Some(name)) => Some(format!("{namespace}/{name}")),
        _ => None,
    }
}

/// The controller owning every check scheduler
pub struct Controller {
    /// The vigil config
    conf: Conf,
    /// The k8s client bundle
    clients: Clients,
    /// The live schedulers keyed by `namespace/name`
    schedulers: HashMap<String, CheckScheduler>,
    /// The escalator shared by every scheduler
    escalator: Arc<dyn Escalator>,
    /// The queue metric samples are pushed onto
    metrics: mpsc::UnboundedSender<MetricsQueueItem>,
    /// The last resource version we processed
    resource_version: String,
}

impl Controller {
    /// Build the controller and its supporting tasks
    ///
    /// # Arguments
    ///
    /// * `conf` - The vigil config
    pub async fn new(conf: Conf) -> Result<Self, Error> {
        // build the client bundle for this environment
        let clients = Clients::new().await?;
        // make sure our crd exists before we watch it
        crds::create_or_update(&clients.kube).await?;
        // spawn the metrics exporter and keep the queue that feeds it
        let metrics = MetricsExporter::spawn();
        // build the escalator shared by every scheduler
        let escalator: Arc<dyn Escalator> = Arc::new(Notifier::new(&conf.escalation));
        Ok(Controller {
            conf,
            clients,
            schedulers: HashMap::default(),
            escalator,
            metrics,
            resource_version: String::default(),
        })
    }

    /// Run the controller until the stream errors or we are signalled
    pub async fn run(mut self) -> Result<(), Error> {
        // hydrate a scheduler for every check that already exists
        let initial = self.clients.checks.list(&ListParams::default()).await?;
        if let Some(version) = &initial.metadata.resource_version {
            self.resource_version = version.clone();
        }
        for check in initial {
            self.added(check).await;
        }
        // arm the periodic cluster audit
        let mut audit = tokio::time::interval(Duration::from_secs(
            self.conf.controller.check_cluster_interval,
        ));
        audit.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // intervals fire immediately so consume the first tick
        audit.tick().await;
        // listen for shutdown signals
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        event!(Level::INFO, "waiting for events");
        loop {
            // watch from a cloned api handle so the stream owns its client
            // and does not pin down the controller while events are handled
            let checks = self.clients.checks.clone();
            let version = self.resource_version.clone();
            // (re)establish the watch from the last version we processed
            let mut stream = checks.watch(&WatchParams::default(), &version).await?.boxed();
            // drain this stream until it dies
            loop {
                tokio::select! {
                    _ = audit.tick() => {
                        if let Err(error) = self.audit().await {
                            event!(Level::WARN, error = %error, "cluster audit failed");
                        }
                    }
                    _ = interrupt.recv() => {
                        self.shutdown().await;
                        return Ok(());
                    }
                    _ = terminate.recv() => {
                        self.shutdown().await;
                        return Ok(());
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => self.handle(event).await,
                        Some(Err(error)) => {
                            // a broken stream is re-established from the last version
                            event!(Level::WARN, error = %error, "watch stream failed");
                            break;
                        }
                        None => {
                            event!(Level::DEBUG, "watch stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Handle one watch event
    ///
    /// # Arguments
    ///
    /// * `event` - The watch event to handle
    async fn handle(&mut self, event: WatchEvent<Check>) {
        match event {
            WatchEvent::Added(check) => {
                self.track_version(&check);
                self.added(check).await;
            }
            WatchEvent::Modified(check) => {
                self.track_version(&check);
                self.modified(check).await;
            }
            WatchEvent::Deleted(check) => {
                self.track_version(&check);
                self.deleted(check).await;
            }
            WatchEvent::Bookmark(bookmark) => {
                self.resource_version = bookmark.metadata.resource_version.clone();
            }
            WatchEvent::Error(error) => {
                // the stream errors when the crd itself changes; state is
                // preserved in the status subresources so die and let the
                // supervisor restart us
                event!(
                    Level::ERROR,
                    code = error.code,
                    message = %error.message,
                    "watch stream returned an error; exiting"
                );
                std::process::exit(2);
            }
        }
    }

    /// Remember the resource version of an object we processed
    ///
    /// # Arguments
    ///
    /// * `check` - The check the event carried
    fn track_version(&mut self, check: &Check) {
        if let Some(version) = &check.metadata.resource_version {
            self.resource_version = version.clone();
        }
    }

    /// Build and store a scheduler for a check
    ///
    /// # Arguments
    ///
    /// * `config` - The parsed config to schedule
    /// * `pre_status` - The persisted status to recover from if any
    fn spawn_scheduler(&mut self, config: CheckConfig, pre_status: Option<CheckCrdStatus>) {
        let runner = Arc::new(K8sJobRunner::new(&self.clients, &config));
        let sink = Box::new(CrdStatusSink::new(&self.clients, &config));
        let key = config.key();
        let scheduler = CheckScheduler::spawn(
            config,
            pre_status,
            runner,
            sink,
            self.escalator.clone(),
            self.metrics.clone(),
        );
        self.schedulers.insert(key, scheduler);
    }

    /// Handle an ADDED check
    ///
    /// # Arguments
    ///
    /// * `check` - The check that was added
    async fn added(&mut self, check: Check) {
        // parse this check's config skipping the event when invalid
        let config = match CheckConfig::build(&check, &self.conf) {
            Ok(config) => config,
            Err(error) => {
                event!(Level::WARN, error = %error, "skipping check with invalid config");
                return;
            }
        };
        let key = config.key();
        // replace any scheduler we already had under this name
        if let Some(old) = self.schedulers.remove(&key) {
            event!(Level::WARN, check = %key, "replacing existing scheduler on ADDED");
            old.terminate(false).await;
        }
        event!(Level::INFO, check = %key, "starting scheduler");
        self.spawn_scheduler(config, check.status.clone());
    }

    /// Handle a MODIFIED check
    ///
    /// The api echoes status subresource writes back as MODIFIED events so
    /// only material config changes replace a scheduler.
    ///
    /// # Arguments
    ///
    /// * `check` - The check that was modified
    async fn modified(&mut self, check: Check) {
        let config = match CheckConfig::build(&check, &self.conf) {
            Ok(config) => config,
            Err(error) => {
                event!(Level::WARN, error = %error, "skipping modified check with invalid config");
                return;
            }
        };
        let key = config.key();
        match self.schedulers.get(&key) {
            Some(existing) if !existing.config().materially_differs(&config) => {
                // just a status echo
                event!(Level::DEBUG, check = %key, "ignoring status-only modification");
            }
            Some(_) => {
                event!(Level::INFO, check = %key, "config changed; restarting scheduler");
                if let Some(old) = self.schedulers.remove(&key) {
                    old.terminate(false).await;
                }
                // the live status is authoritative so no pre status here
                self.spawn_scheduler(config, None);
            }
            None => {
                // we never saw this check's ADDED so adopt it now
                event!(Level::WARN, check = %key, "modified check had no scheduler; adopting");
                self.spawn_scheduler(config, check.status.clone());
            }
        }
    }

    /// Handle a DELETED check
    ///
    /// # Arguments
    ///
    /// * `check` - The check that was deleted
    async fn deleted(&mut self, check: Check) {
        let key = match key_of(&check) {
            Some(key) => key,
            None => return,
        };
        // deleting an unknown check is a no-op
        if let Some(scheduler) = self.schedulers.remove(&key) {
            event!(Level::INFO, check = %key, "stopping scheduler");
            scheduler.terminate(false).await;
        }
    }

    /// Audit declared checks against live schedulers
    ///
    /// The audit is observational: divergence is logged and counted but
    /// never repaired.
    #[instrument(name = "Controller::audit", skip_all, err(Debug))]
    async fn audit(&self) -> Result<(), Error> {
        // list every declared check in the cluster
        let declared = self.clients.checks.list(&ListParams::default()).await?;
        let total = declared.items.len();
        let mut keys = HashSet::with_capacity(total);
        let mut divergences = 0u64;
        for check in declared.iter() {
            let key = match key_of(check) {
                Some(key) => key,
                None => continue,
            };
            keys.insert(key.clone());
            // every declared check should have a live scheduler
            let scheduler = match self.schedulers.get(&key) {
                Some(scheduler) => scheduler,
                None => {
                    event!(Level::WARN, check = %key, "declared check has no scheduler");
                    divergences += 1;
                    continue;
                }
            };
            // compare the persisted status against the live snapshot
            if let Some(persisted) = &check.status {
                let persisted = CheckStatus::hydrate(persisted);
                let live = scheduler.status();
                if persisted.attempt != live.attempt
                    || persisted.state != live.state
                    || persisted.status != live.status
                {
                    event!(
                        Level::WARN,
                        check = %key,
                        persisted_status = %persisted.status,
                        live_status = %live.status,
                        persisted_state = %persisted.state,
                        live_state = %live.state,
                        persisted_attempt = persisted.attempt,
                        live_attempt = live.attempt,
                        "persisted status diverges from live scheduler"
                    );
                    divergences += 1;
                    self.divergence_metric(scheduler);
                }
            }
        }
        // every live scheduler should have a declared check
        for (key, scheduler) in &self.schedulers {
            if !keys.contains(key) {
                event!(Level::WARN, check = %key, "scheduler has no declared check");
                divergences += 1;
                self.divergence_metric(scheduler);
            }
        }
        event!(
            Level::INFO,
            checks = total,
            schedulers = self.schedulers.len(),
            divergences,
            "cluster audit complete"
        );
        Ok(())
    }

    /// Emit a divergence sample for a scheduler the audit flagged
    ///
    /// # Arguments
    ///
    /// * `scheduler` - The scheduler that diverged
    fn divergence_metric(&self, scheduler: &CheckScheduler) {
        let status = scheduler.status();
        let labels = MetricLabels {
            name: scheduler.config().name.clone(),
            namespace: scheduler.config().namespace.clone(),
            status: status.status,
            escalated: status.escalated,
        };
        let sample = MetricsQueueItem::gauge("check_audit_divergence", labels, 1.0);
        // a closed queue just means the exporter is gone
        let _ = self.metrics.send(sample);
    }

    /// Terminate every scheduler and destroy any in flight jobs
    async fn shutdown(&mut self) {
        event!(Level::INFO, schedulers = self.schedulers.len(), "shutting down");
        for (key, scheduler) in self.schedulers.drain() {
            event!(Level::INFO, check = %key, "stopping scheduler");
            scheduler.terminate(true).await;
        }
    }
}
