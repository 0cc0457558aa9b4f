//! The utilities for tests involving check schedulers

use async_trait::async_trait;
use chrono::prelude::*;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigil::models::{CheckConfig, CheckStatus, EscalationTarget, JobStatus};
use vigil::Error;

use crate::libs::checks::{Escalator, JobRunner, StatusSink};

/// Build a check config for tests without a live cluster
///
/// # Arguments
///
/// * `name` - The name of the fake check
/// * `check_interval` - The interval between successful checks
pub fn config(name: &str, check_interval: Duration) -> CheckConfig {
    CheckConfig {
        namespace: "monitoring".to_owned(),
        name: name.to_owned(),
        spec: json!({"restartPolicy": "Never", "containers": [{"name": name, "image": "checks/mock"}]}),
        check_interval,
        retry_interval: check_interval,
        notification_interval: check_interval,
        max_attempts: 3,
        timeout: Duration::ZERO,
        escalations: vec![EscalationTarget::Email {
            email: "oncall@example.com".to_owned(),
        }],
        escalation_template: "{namespace}/{name} is {status}".to_owned(),
        job_poll_interval: Duration::from_millis(5),
    }
}

/// One scripted run of a mock job
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// The job completes with this terminal snapshot
    Finish(JobStatus),
    /// The job refuses to start
    RefuseStart,
    /// The job stays active forever reporting this start time
    Hang(DateTime<Utc>),
}

/// A job runner that replays scripted outcomes instead of talking to k8s
pub struct MockRunner {
    /// The outcomes to hand out one per started job
    outcomes: Mutex<VecDeque<MockOutcome>>,
    /// The outcome to repeat once the script runs out
    repeat: Option<MockOutcome>,
    /// The outcome the current job is replaying
    current: Mutex<Option<MockOutcome>>,
    /// How many times start was called
    pub starts: AtomicUsize,
    /// How many times destroy was called
    pub destroys: AtomicUsize,
    /// The logs every job produces
    pub logs: String,
}

impl MockRunner {
    /// Build a runner that replays a script then repeats a fallback
    ///
    /// # Arguments
    ///
    /// * `script` - The outcomes to replay in order
    /// * `repeat` - The outcome to repeat once the script runs out
    pub fn new(script: Vec<MockOutcome>, repeat: Option<MockOutcome>) -> Self {
        MockRunner {
            outcomes: Mutex::new(script.into()),
            repeat,
            current: Mutex::new(None),
            starts: AtomicUsize::default(),
            destroys: AtomicUsize::default(),
            logs: "mock check output".to_owned(),
        }
    }

    /// Build a runner that repeats a single outcome forever
    ///
    /// # Arguments
    ///
    /// * `repeat` - The outcome every job replays
    pub fn repeating(repeat: MockOutcome) -> Self {
        Self::new(Vec::default(), Some(repeat))
    }
}

#[async_trait]
impl JobRunner for MockRunner {
    /// Pretend to create the external job for an attempt
    async fn start(&self, _config: &CheckConfig) -> Result<(), Error> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        // take the next scripted outcome falling back to the repeated one
        let next = match self.outcomes.lock().unwrap().pop_front() {
            Some(next) => next,
            None => match &self.repeat {
                Some(repeat) => repeat.clone(),
                None => return Err(Error::new("mock script exhausted")),
            },
        };
        match next {
            MockOutcome::RefuseStart => Err(Error::new("job creation refused")),
            outcome => {
                *self.current.lock().unwrap() = Some(outcome);
                Ok(())
            }
        }
    }

    /// Snapshot the current scripted job
    async fn poll(&self) -> Result<JobStatus, Error> {
        match self.current.lock().unwrap().clone() {
            Some(MockOutcome::Finish(snapshot)) => Ok(snapshot),
            Some(MockOutcome::Hang(start)) => Ok(JobStatus::running(start)),
            Some(MockOutcome::RefuseStart) | None => Err(Error::new("job not found")),
        }
    }

    /// Hand back the canned logs
    async fn logs(&self) -> Result<String, Error> {
        Ok(self.logs.clone())
    }

    /// Pretend to remove the job
    async fn destroy(&self) -> Result<(), Error> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

/// A sink recording every published snapshot
pub struct MockSink {
    /// Every snapshot published in order
    published: Arc<Mutex<Vec<CheckStatus>>>,
    /// Whether publishes should fail
    fail: bool,
}

impl MockSink {
    /// Build a sink recording snapshots into a shared vec
    ///
    /// # Arguments
    ///
    /// * `published` - The shared vec to record into
    pub fn recording(published: &Arc<Mutex<Vec<CheckStatus>>>) -> Self {
        MockSink {
            published: published.clone(),
            fail: false,
        }
    }

    /// Build a sink whose publishes always fail
    pub fn failing() -> Self {
        MockSink {
            published: Arc::default(),
            fail: true,
        }
    }
}

#[async_trait]
impl StatusSink for MockSink {
    /// Record or reject a published snapshot
    async fn publish(&self, _config: &CheckConfig, status: &CheckStatus) -> Result<(), Error> {
        if self.fail {
            return Err(Error::new("status patch refused"));
        }
        self.published.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// An escalator recording every notification
pub struct MockEscalator {
    /// The recovery flag of every notify call in order
    notified: Arc<Mutex<Vec<bool>>>,
}

impl MockEscalator {
    /// Build an escalator recording notifications into a shared vec
    ///
    /// # Arguments
    ///
    /// * `notified` - The shared vec to record into
    pub fn recording(notified: &Arc<Mutex<Vec<bool>>>) -> Self {
        MockEscalator {
            notified: notified.clone(),
        }
    }
}

#[async_trait]
impl Escalator for MockEscalator {
    /// Record a notification
    async fn notify(
        &self,
        _config: &CheckConfig,
        _status: &CheckStatus,
        recovery: bool,
    ) -> Result<(), Error> {
        self.notified.lock().unwrap().push(recovery);
        Ok(())
    }
}
