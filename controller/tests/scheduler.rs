//! Tests the check scheduler state machine against mock backends

use chrono::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use vigil::models::{
    write_timestamp, CheckConfig, CheckCrdStatus, CheckState, CheckStatus, HealthStatus,
    JobStatus, MetricsQueueItem,
};
use vigil::Error;
use vigil_controller::test_utilities::{self, MockEscalator, MockOutcome, MockRunner, MockSink};
use vigil_controller::CheckScheduler;

/// The pieces shared by every scheduler test
struct Harness {
    /// The mock runner behind the scheduler
    runner: Arc<MockRunner>,
    /// The recovery flag of every notification in order
    notified: Arc<Mutex<Vec<bool>>>,
    /// The queue metric samples land on
    metrics: mpsc::UnboundedReceiver<MetricsQueueItem>,
    /// The scheduler under test
    scheduler: CheckScheduler,
}

/// Spawn a scheduler against mock backends
///
/// # Arguments
///
/// * `config` - The check config to schedule
/// * `pre` - The persisted status to recover from if any
/// * `runner` - The mock runner to drive jobs with
fn harness(config: CheckConfig, pre: Option<CheckCrdStatus>, runner: MockRunner) -> Harness {
    let runner = Arc::new(runner);
    let published = Arc::new(Mutex::new(Vec::new()));
    let notified = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = CheckScheduler::spawn(
        config,
        pre,
        runner.clone(),
        Box::new(MockSink::recording(&published)),
        Arc::new(MockEscalator::recording(&notified)),
        tx,
    );
    Harness {
        runner,
        notified,
        metrics: rx,
        scheduler,
    }
}

/// Poll a scheduler's snapshots until a condition holds or time runs out
///
/// # Arguments
///
/// * `scheduler` - The scheduler to watch
/// * `cond` - The condition to wait for
async fn wait_for<F: Fn(&CheckStatus) -> bool>(scheduler: &CheckScheduler, cond: F) -> CheckStatus {
    for _ in 0..400 {
        let status = scheduler.status();
        if cond(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scheduler.status()
}

/// Drain every buffered metric sample
///
/// # Arguments
///
/// * `metrics` - The queue to drain
fn drain(metrics: &mut mpsc::UnboundedReceiver<MetricsQueueItem>) -> Vec<MetricsQueueItem> {
    let mut samples = Vec::new();
    while let Ok(item) = metrics.try_recv() {
        samples.push(item);
    }
    samples
}

#[tokio::test]
async fn attempts_pass() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_millis(20));
    let start = Utc::now();
    let runner = MockRunner::repeating(MockOutcome::Finish(JobStatus::success(start)));
    let mut harness = harness(config, None, runner);
    // wait for a passing attempt to land and settle
    let status = wait_for(&harness.scheduler, |status| {
        status.status == HealthStatus::Ok
            && status.state == CheckState::Idle
            && status.attempt == 0
            && status.last_check.is_some()
    })
    .await;
    assert_eq!(status.status, HealthStatus::Ok);
    assert_eq!(status.state, CheckState::Idle);
    assert_eq!(status.attempt, 0);
    assert!(!status.escalated);
    assert_eq!(status.logs, "mock check output");
    // the next check is rearmed into the future
    assert!(status.next_check.unwrap() > status.last_check.unwrap());
    harness.scheduler.terminate(true).await;
    // a passing check never notifies
    assert!(harness.notified.lock().unwrap().is_empty());
    // every attempt emits exactly three samples in order
    let samples = drain(&mut harness.metrics);
    assert!(!samples.is_empty());
    assert_eq!(samples.len() % 3, 0);
    for triple in samples.chunks(3) {
        assert_eq!(triple[0].metric, "check_runtime");
        assert_eq!(triple[1].metric, "check_ok_count");
        assert_eq!(triple[2].metric, "check_escalations");
        assert_eq!(triple[2].value, Some(0.0));
        assert_eq!(triple[0].labels.status, HealthStatus::Ok);
    }
    Ok(())
}

#[tokio::test]
async fn escalates_after_max_attempts() -> Result<(), Error> {
    let mut config = test_utilities::config("web", Duration::from_millis(10));
    config.retry_interval = Duration::from_millis(10);
    // park the scheduler after escalation so we can inspect it
    config.notification_interval = Duration::from_secs(600);
    let runner = MockRunner::repeating(MockOutcome::Finish(JobStatus::failure(Utc::now())));
    let harness = harness(config, None, runner);
    let status = wait_for(&harness.scheduler, |status| status.escalated).await;
    assert_eq!(status.status, HealthStatus::Critical);
    // the attempt counter is not reset by the escalation
    assert_eq!(status.attempt, 3);
    assert!(status.escalated);
    // escalated exactly once with recovery false
    assert_eq!(harness.notified.lock().unwrap().clone(), vec![false]);
    // the next run waits out the notification interval
    let gap = status.next_check.unwrap() - status.last_check.unwrap();
    assert!(gap > chrono::Duration::seconds(60));
    harness.scheduler.terminate(true).await;
    Ok(())
}

#[tokio::test]
async fn recovers_after_escalation() -> Result<(), Error> {
    let mut config = test_utilities::config("web", Duration::from_millis(10));
    config.retry_interval = Duration::from_millis(10);
    config.notification_interval = Duration::from_millis(10);
    // three failures to trip the escalation then passes forever
    let script = vec![
        MockOutcome::Finish(JobStatus::failure(Utc::now())),
        MockOutcome::Finish(JobStatus::failure(Utc::now())),
        MockOutcome::Finish(JobStatus::failure(Utc::now())),
    ];
    let repeat = MockOutcome::Finish(JobStatus::success(Utc::now()));
    let harness = harness(config, None, MockRunner::new(script, Some(repeat)));
    // wait for the escalation and then the recovery
    wait_for(&harness.scheduler, |status| status.escalated).await;
    let status = wait_for(&harness.scheduler, |status| {
        status.status == HealthStatus::Ok
            && status.state == CheckState::Idle
            && status.attempt == 0
            && !status.escalated
    })
    .await;
    assert_eq!(status.status, HealthStatus::Ok);
    assert_eq!(status.attempt, 0);
    assert!(!status.escalated);
    harness.scheduler.terminate(true).await;
    // exactly one escalation followed by exactly one recovery
    assert_eq!(harness.notified.lock().unwrap().clone(), vec![false, true]);
    Ok(())
}

#[tokio::test]
async fn refused_starts_are_critical() -> Result<(), Error> {
    let mut config = test_utilities::config("web", Duration::from_millis(10));
    config.retry_interval = Duration::from_millis(10);
    // keep the escalation out of this test's way
    config.max_attempts = 1000;
    let harness = harness(config, None, MockRunner::repeating(MockOutcome::RefuseStart));
    let status = wait_for(&harness.scheduler, |status| {
        status.status == HealthStatus::Critical && status.state == CheckState::Idle
    })
    .await;
    assert_eq!(status.status, HealthStatus::Critical);
    assert_eq!(status.state, CheckState::Idle);
    assert!(status.attempt >= 1);
    assert!(!status.escalated);
    harness.scheduler.terminate(true).await;
    // the refused job was still torn down
    assert!(harness.runner.destroys.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn hung_jobs_time_out() -> Result<(), Error> {
    let mut config = test_utilities::config("web", Duration::from_millis(10));
    config.retry_interval = Duration::from_millis(10);
    config.max_attempts = 1000;
    config.timeout = Duration::from_millis(50);
    // the job reports a start an hour ago and never finishes
    let stale = Utc::now() - chrono::Duration::hours(1);
    let harness = harness(config, None, MockRunner::repeating(MockOutcome::Hang(stale)));
    let status = wait_for(&harness.scheduler, |status| {
        status.status == HealthStatus::Critical
            && status.state == CheckState::Idle
            && status.runtime >= chrono::Duration::minutes(59)
    })
    .await;
    assert_eq!(status.status, HealthStatus::Critical);
    assert_eq!(status.state, CheckState::Idle);
    // the runtime reflects the reported start time
    assert!(status.runtime >= chrono::Duration::minutes(59));
    harness.scheduler.terminate(true).await;
    // the hung job was destroyed mid attempt and again on teardown
    assert!(harness.runner.destroys.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    Ok(())
}

#[tokio::test]
async fn recovers_from_mid_run_crash() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_secs(600));
    // the previous controller died while attempt 2 was in flight
    let pre = CheckCrdStatus {
        status: Some(HealthStatus::Critical),
        state: Some(CheckState::Running),
        attempt: Some("2".to_owned()),
        last_check: None,
        next_check: Some(write_timestamp(&(Utc::now() - chrono::Duration::seconds(5)))),
        logs: Some("old logs".to_owned()),
    };
    let runner = MockRunner::repeating(MockOutcome::Finish(JobStatus::success(Utc::now())));
    let harness = harness(config, Some(pre), runner);
    let status = harness.scheduler.status();
    // the interrupted attempt is uncounted and the lost job forgotten
    assert_eq!(status.attempt, 1);
    assert_eq!(status.state, CheckState::Idle);
    assert_eq!(status.logs, "old logs");
    // the check is rescheduled asap
    let delta = status.next_check.unwrap() - Utc::now();
    assert!(delta <= chrono::Duration::seconds(1));
    assert!(delta > chrono::Duration::milliseconds(200));
    harness.scheduler.terminate(true).await;
    Ok(())
}

#[tokio::test]
async fn recovery_does_not_double_count_attempt_zero() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_secs(600));
    // a mid run crash before the first attempt ever finished
    let pre = CheckCrdStatus {
        state: Some(CheckState::Running),
        attempt: Some("0".to_owned()),
        ..Default::default()
    };
    let runner = MockRunner::repeating(MockOutcome::Finish(JobStatus::success(Utc::now())));
    let harness = harness(config, Some(pre), runner);
    // the attempt counter floors at zero
    assert_eq!(harness.scheduler.status().attempt, 0);
    harness.scheduler.terminate(true).await;
    Ok(())
}

#[tokio::test]
async fn holds_future_next_check_across_restarts() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_secs(600));
    // the previous controller persisted a next check 30 seconds out
    let pre = CheckCrdStatus {
        status: Some(HealthStatus::Critical),
        state: Some(CheckState::Idle),
        attempt: Some("1".to_owned()),
        next_check: Some(write_timestamp(&(Utc::now() + chrono::Duration::seconds(30)))),
        ..Default::default()
    };
    let runner = MockRunner::repeating(MockOutcome::Finish(JobStatus::success(Utc::now())));
    let harness = harness(config, Some(pre), runner);
    let status = harness.scheduler.status();
    // the attempt counter carries over untouched
    assert_eq!(status.attempt, 1);
    // the original schedule is held instead of restarting the interval
    let delta = status.next_check.unwrap() - Utc::now();
    assert!(delta <= chrono::Duration::seconds(31));
    assert!(delta > chrono::Duration::seconds(25));
    harness.scheduler.terminate(true).await;
    Ok(())
}

#[tokio::test]
async fn publish_failures_are_not_fatal() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_millis(10));
    let runner = Arc::new(MockRunner::repeating(MockOutcome::Finish(
        JobStatus::success(Utc::now()),
    )));
    let notified = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    // every status patch is refused
    let scheduler = CheckScheduler::spawn(
        config,
        None,
        runner.clone(),
        Box::new(MockSink::failing()),
        Arc::new(MockEscalator::recording(&notified)),
        tx,
    );
    let status = wait_for(&scheduler, |status| {
        status.status == HealthStatus::Ok
            && status.state == CheckState::Idle
            && status.attempt == 0
    })
    .await;
    // the scheduler keeps running on its in-memory status
    assert_eq!(status.status, HealthStatus::Ok);
    assert_eq!(status.attempt, 0);
    scheduler.terminate(true).await;
    assert!(!drain(&mut rx).is_empty());
    Ok(())
}

#[tokio::test]
async fn termination_winds_down_in_flight_attempts() -> Result<(), Error> {
    let config = test_utilities::config("web", Duration::from_millis(10));
    // the job hangs forever and no timeout is set
    let harness = harness(
        config,
        None,
        MockRunner::repeating(MockOutcome::Hang(Utc::now())),
    );
    // let the attempt get in flight
    let status = wait_for(&harness.scheduler, |status| {
        status.state == CheckState::Running
    })
    .await;
    assert_eq!(status.state, CheckState::Running);
    let destroys = harness.runner.destroys.load(std::sync::atomic::Ordering::SeqCst);
    // termination must not hang on the in flight poll loop
    tokio::time::timeout(Duration::from_secs(2), harness.scheduler.terminate(true))
        .await
        .expect("termination hung on an in flight attempt");
    // the external job was destroyed on the way out
    assert!(harness.runner.destroys.load(std::sync::atomic::Ordering::SeqCst) > destroys);
    Ok(())
}
