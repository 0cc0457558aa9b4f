//! The per-check scheduler driving attempts, escalation, and recovery
//!
//! Each scheduler owns one check: its parsed config, its live status, and at
//! most one of an armed timer or an in flight job. The controller talks to a
//! scheduler only through its handle; the status itself has a single writer.

use chrono::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{event, instrument, Level};
use vigil::models::{
    CheckConfig, CheckCrdStatus, CheckState, CheckStatus, HealthStatus, MetricLabels,
    MetricsQueueItem,
};

use super::escalate::Escalator;
use super::runner::JobRunner;
use super::status::StatusSink;

/// Cast a std duration to a chrono one for timestamp math
///
/// # Arguments
///
/// * `interval` - The duration to cast
fn chrono_delta(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or(chrono::TimeDelta::MAX)
}

/// Seed a status and an initial interval from any persisted status
///
/// # Arguments
///
/// * `config` - The config of the check being recovered
/// * `pre_status` - The persisted status read at controller startup
fn recover(config: &CheckConfig, pre_status: Option<CheckCrdStatus>) -> (CheckStatus, Duration) {
    // with no persisted status we start fresh at the check interval
    let pre = match pre_status {
        Some(pre) => pre,
        None => return (CheckStatus::default(), config.check_interval),
    };
    let mut status = CheckStatus::hydrate(&pre);
    if status.state == CheckState::Running {
        // the previous controller died mid check and that job is dead to us
        // so uncount the interrupted attempt and reschedule asap
        status.state = CheckState::Idle;
        status.attempt = status.attempt.saturating_sub(1);
        (status, Duration::from_secs(1))
    } else if let Some(next_check) = status.next_check {
        let now = Utc::now();
        if next_check <= now {
            // the scheduled check was missed while we were down so catch up
            (status, Duration::from_secs(1))
        } else {
            // hold to the previously scheduled next check
            let delta = (next_check - now).to_std().unwrap_or(Duration::from_secs(1));
            (status, delta)
        }
    } else {
        (status, config.check_interval)
    }
}

/// A handle to a check's live scheduler
pub struct CheckScheduler {
    /// The config this scheduler was built from
    config: Arc<CheckConfig>,
    /// The runner owning this check's external job
    runner: Arc<dyn JobRunner>,
    /// Set to cancel the armed timer and stop the task
    shutdown: watch::Sender<bool>,
    /// The most recently published status snapshot
    snapshots: watch::Receiver<CheckStatus>,
    /// The join handle for this check's task
    handle: JoinHandle<()>,
}

impl CheckScheduler {
    /// Spawn the scheduler task for a check
    ///
    /// # Arguments
    ///
    /// * `config` - The parsed config for this check
    /// * `pre_status` - The persisted status to recover from if any
    /// * `runner` - The runner owning this check's external job
    /// * `sink` - Where status snapshots are published
    /// * `escalator` - Where escalations and recoveries are sent
    /// * `metrics` - The queue metric samples are pushed onto
    pub fn spawn(
        config: CheckConfig,
        pre_status: Option<CheckCrdStatus>,
        runner: Arc<dyn JobRunner>,
        sink: Box<dyn StatusSink>,
        escalator: Arc<dyn Escalator>,
        metrics: mpsc::UnboundedSender<MetricsQueueItem>,
    ) -> Self {
        let config = Arc::new(config);
        // seed our status and initial interval from any persisted status
        let (mut status, next_interval) = recover(&config, pre_status);
        // announce when the first attempt will begin
        status.next_check = Some(Utc::now() + chrono_delta(next_interval));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(status.clone());
        // build the task that owns this check's status
        let task = CheckTask {
            config: config.clone(),
            status,
            next_interval,
            runner: runner.clone(),
            sink,
            escalator,
            metrics,
            shutdown: shutdown_rx,
            snapshots: snapshot_tx,
        };
        let handle = tokio::spawn(task.run());
        CheckScheduler {
            config,
            runner,
            shutdown: shutdown_tx,
            snapshots: snapshot_rx,
            handle,
        }
    }

    /// Get the config this scheduler was built from
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Get the latest status snapshot this scheduler published
    pub fn status(&self) -> CheckStatus {
        self.snapshots.borrow().clone()
    }

    /// Stop this scheduler and destroy any job it has in flight
    ///
    /// The task exits at its next suspension point; a poll loop that is mid
    /// flight winds down within one job poll interval.
    ///
    /// # Arguments
    ///
    /// * `join` - Whether to wait for the current attempt to wind down
    pub async fn terminate(self, join: bool) {
        // flag the task down which also cancels any armed timer
        let _ = self.shutdown.send(true);
        // destroy the external job whether or not one is in flight
        if let Err(error) = self.runner.destroy().await {
            event!(
                Level::WARN,
                check = %self.config.key(),
                error = %error,
                "failed to destroy job during termination"
            );
        }
        if join {
            if let Err(error) = self.handle.await {
                event!(
                    Level::WARN,
                    check = %self.config.key(),
                    error = %error,
                    "scheduler task did not join cleanly"
                );
            }
        }
    }
}

/// The task state owning one check
struct CheckTask {
    /// The config of the check this task runs
    config: Arc<CheckConfig>,
    /// The live status this task exclusively owns
    status: CheckStatus,
    /// How long to wait before the next attempt
    next_interval: Duration,
    /// The runner owning this check's external job
    runner: Arc<dyn JobRunner>,
    /// Where status snapshots are published
    sink: Box<dyn StatusSink>,
    /// Where escalations and recoveries are sent
    escalator: Arc<dyn Escalator>,
    /// The queue metric samples are pushed onto
    metrics: mpsc::UnboundedSender<MetricsQueueItem>,
    /// Set when this task should stop
    shutdown: watch::Receiver<bool>,
    /// Where status snapshots are mirrored for the controller
    snapshots: watch::Sender<CheckStatus>,
}

impl CheckTask {
    /// Whether this task has been flagged down
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Publish the current status locally and to the sink
    ///
    /// The in-memory copy is authoritative; a failed patch is logged and the
    /// next snapshot carries the same data again.
    async fn publish(&mut self) {
        self.snapshots.send_replace(self.status.clone());
        if let Err(error) = self.sink.publish(&self.config, &self.status).await {
            event!(
                Level::WARN,
                check = %self.config.key(),
                error = %error,
                "failed to publish status"
            );
        }
    }

    /// Arm the timer for the next attempt
    ///
    /// # Arguments
    ///
    /// * `interval` - How long to wait before the next attempt
    fn arm(&mut self, interval: Duration) {
        self.next_interval = interval;
        self.status.next_check = Some(Utc::now() + chrono_delta(interval));
    }

    /// Alternate between waiting and running until we are flagged down
    #[instrument(name = "CheckTask::run", skip_all, fields(check = %self.config.key()))]
    async fn run(mut self) {
        // the initial arm was seeded at spawn so announce it
        self.publish().await;
        event!(
            Level::INFO,
            interval = self.next_interval.as_secs_f64(),
            "scheduler started"
        );
        loop {
            // wait for the timer unless we are flagged down first
            tokio::select! {
                () = tokio::time::sleep(self.next_interval) => (),
                changed = self.shutdown.changed() => {
                    // a dropped handle means the controller discarded us
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if self.stopping() {
                break;
            }
            self.attempt().await;
            if self.stopping() {
                break;
            }
        }
        event!(Level::DEBUG, "scheduler stopped");
    }

    /// Run one attempt of this check
    async fn attempt(&mut self) {
        // count this attempt up front so a lost controller can uncount it
        self.status.attempt += 1;
        self.status.runtime = chrono::Duration::zero();
        self.publish().await;
        event!(Level::INFO, attempt = self.status.attempt, "starting attempt");
        // mark the job in flight
        self.status.state = CheckState::Running;
        self.publish().await;
        match self.runner.start(&self.config).await {
            Ok(()) => {
                // watch the job until it reaches a terminal state
                self.watch_job().await;
                if self.stopping() {
                    // we were flagged down mid flight; make sure the job is
                    // gone even if it raced our handle's teardown
                    if let Err(error) = self.runner.destroy().await {
                        event!(Level::WARN, error = %error, "failed to destroy job on wind down");
                    }
                    return;
                }
                // grab whatever output the job produced before we tear it down
                match self.runner.logs().await {
                    Ok(logs) => self.status.logs = logs,
                    Err(error) => {
                        event!(Level::WARN, error = %error, "failed to collect logs");
                        self.status.logs = String::new();
                    }
                }
            }
            Err(error) => {
                // a refused start is a failed attempt
                event!(Level::WARN, error = %error, "failed to start job");
                self.status.status = HealthStatus::Critical;
                self.status.state = CheckState::Idle;
            }
        }
        // tear down the finished or refused job
        if let Err(error) = self.runner.destroy().await {
            event!(Level::WARN, error = %error, "failed to destroy job");
        }
        self.status.last_check = Some(Utc::now());
        self.publish().await;
        // apply the outcome policy and arm the next timer
        self.outcome().await;
        self.publish().await;
    }

    /// Poll the in flight job until it reaches a terminal state
    async fn watch_job(&mut self) {
        loop {
            // wind down if we were flagged down mid flight
            if self.stopping() {
                return;
            }
            match self.runner.poll().await {
                Ok(snapshot) => {
                    // track how long this attempt has been running
                    if let Some(start) = snapshot.start_time {
                        self.status.runtime = Utc::now() - start;
                    }
                    if snapshot.succeeded {
                        self.status.status = HealthStatus::Ok;
                        self.status.state = CheckState::Idle;
                        return;
                    }
                    if snapshot.failed {
                        self.status.status = HealthStatus::Critical;
                        self.status.state = CheckState::Idle;
                        return;
                    }
                    if self.timed_out() {
                        // a hung job is a failed attempt
                        event!(
                            Level::WARN,
                            runtime = self.status.runtime.num_seconds(),
                            "attempt timed out"
                        );
                        self.status.status = HealthStatus::Critical;
                        self.status.state = CheckState::Idle;
                        if let Err(error) = self.runner.destroy().await {
                            event!(Level::WARN, error = %error, "failed to destroy timed out job");
                        }
                        return;
                    }
                }
                // a failed poll is not a signal so try again next tick
                Err(error) => event!(Level::WARN, error = %error, "failed to poll job"),
            }
            tokio::time::sleep(self.config.job_poll_interval).await;
        }
    }

    /// Whether the current attempt has outlived the check's timeout
    fn timed_out(&self) -> bool {
        // zero means attempts are unbounded
        if self.config.timeout.is_zero() {
            return false;
        }
        match self.status.runtime.to_std() {
            Ok(runtime) => runtime > self.config.timeout,
            Err(_) => false,
        }
    }

    /// Apply the outcome policy after an attempt terminates
    async fn outcome(&mut self) {
        // decide the next interval and any notifications
        let interval = if self.status.status == HealthStatus::Ok && self.status.escalated {
            // recovery!
            self.notify(true).await;
            self.status.escalated = false;
            self.status.attempt = 0;
            self.config.check_interval
        } else if self.status.status == HealthStatus::Ok {
            // the check passed and all is well
            self.status.attempt = 0;
            self.config.check_interval
        } else if self.status.attempt >= self.config.max_attempts {
            // out of attempts so escalate and keep re-running at the
            // notification cadence until the check recovers
            self.notify(false).await;
            self.status.escalated = true;
            self.config.notification_interval
        } else {
            // failing but attempts remain
            self.config.retry_interval
        };
        self.emit_metrics();
        self.arm(interval);
        event!(
            Level::INFO,
            status = %self.status.status,
            attempt = self.status.attempt,
            escalated = self.status.escalated,
            runtime = self.status.runtime.num_seconds(),
            "attempt finished"
        );
    }

    /// Send an escalation or recovery notification
    ///
    /// Delivery failures never alter the outcome policy; the state machine
    /// keeps moving and the failure is logged.
    ///
    /// # Arguments
    ///
    /// * `recovery` - Whether this is a recovery rather then an escalation
    async fn notify(&self, recovery: bool) {
        if let Err(error) = self
            .escalator
            .notify(&self.config, &self.status, recovery)
            .await
        {
            event!(
                Level::ERROR,
                recovery,
                error = %error,
                "failed to deliver notification"
            );
        }
    }

    /// Emit the three samples for a finished attempt
    fn emit_metrics(&self) {
        let labels = MetricLabels {
            name: self.config.name.clone(),
            namespace: self.config.namespace.clone(),
            status: self.status.status,
            escalated: self.status.escalated,
        };
        // how long the attempt ran for
        let runtime = self.status.runtime.num_milliseconds() as f64 / 1000.0;
        self.send_metric(MetricsQueueItem::gauge(
            "check_runtime",
            labels.clone(),
            runtime,
        ));
        // bump the counter for the status this attempt landed on
        let counter = format!("check_{}_count", self.status.status.as_metric());
        self.send_metric(MetricsQueueItem::count(counter, labels.clone()));
        // whether this check is currently escalated
        let escalated = if self.status.escalated { 1.0 } else { 0.0 };
        self.send_metric(MetricsQueueItem::gauge(
            "check_escalations",
            labels,
            escalated,
        ));
    }

    /// Push one sample onto the metrics queue
    ///
    /// # Arguments
    ///
    /// * `item` - The sample to push
    fn send_metric(&self, item: MetricsQueueItem) {
        // a closed queue just means the exporter is gone
        if self.metrics.send(item).is_err() {
            event!(Level::DEBUG, "metrics queue closed");
        }
    }
}
