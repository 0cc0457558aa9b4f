//! The Check custom resource and the models its schedulers run on

use chrono::prelude::*;
use chrono::SecondsFormat;
use kube_derive::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde_json::json;
use std::time::Duration;

use crate::conf::Conf;
use crate::Error;

/// The default escalation message body
///
/// Tokens are filled in from the check's config and live status when an
/// escalation or recovery is dispatched.
const DEFAULT_ESCALATION_TEMPLATE: &str = "
<p>
<b>Name:</b> {namespace}/{name}<br>
<b>Status:</b> {status}<br>
<b>Attempt:</b> {attempt}/{max_attempts}<br>
<b>Last Check:</b> {last_check}<br>
<b>More Details:</b><br> <pre>{logs}</pre><br>
</p>
";

/// An interval declared on a check
///
/// Bare numbers are minutes while strings follow the `[Nh][Nm][Ns]` form.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum Interval {
    /// A bare number of minutes
    Minutes(f64),
    /// A formatted time string
    Text(String),
}

impl Interval {
    /// Parse this interval down to a duration in seconds
    pub fn parse(&self) -> Result<Duration, Error> {
        match self {
            Interval::Minutes(minutes) => from_minutes(*minutes),
            Interval::Text(text) => parse_time(text),
        }
    }
}

/// Cast a number of minutes to a duration
///
/// # Arguments
///
/// * `minutes` - The number of minutes to cast
fn from_minutes(minutes: f64) -> Result<Duration, Error> {
    // negative, non finite, or absurdly large intervals are nonsense
    match Duration::try_from_secs_f64(minutes * 60.0) {
        Ok(duration) => Ok(duration),
        Err(_) => Err(Error::new(format!("invalid interval '{minutes}'"))),
    }
}

/// Parse either a bare number of minutes or a `[Nh][Nm][Ns]` time string
///
/// # Arguments
///
/// * `text` - The raw interval string to parse
pub fn parse_time(text: &str) -> Result<Duration, Error> {
    let trimmed = text.trim();
    // bare numbers are minutes
    if let Ok(minutes) = trimmed.parse::<f64>() {
        return from_minutes(minutes);
    }
    // the subset of hours/minutes/seconds is optional but the order is fixed;
    // an empty string matches with no parts set and carries a zero interval
    let regex = Regex::new(r"^((?P<hours>\d+)h)?((?P<minutes>\d+)m)?((?P<seconds>\d+)s)?$")?;
    let caps = caps_or_invalid(&regex, trimmed)?;
    // sum any parts that were set
    let mut seconds = 0u64;
    if let Some(hours) = caps.name("hours") {
        seconds += 3600 * hours.as_str().parse::<u64>()?;
    }
    if let Some(minutes) = caps.name("minutes") {
        seconds += 60 * minutes.as_str().parse::<u64>()?;
    }
    if let Some(secs) = caps.name("seconds") {
        seconds += secs.as_str().parse::<u64>()?;
    }
    Ok(Duration::from_secs(seconds))
}

/// Match an interval string against the interval regex
///
/// # Arguments
///
/// * `regex` - The compiled interval regex
/// * `trimmed` - The trimmed interval string
fn caps_or_invalid<'a>(regex: &Regex, trimmed: &'a str) -> Result<regex::Captures<'a>, Error> {
    match regex.captures(trimmed) {
        Some(caps) => Ok(caps),
        None => Err(Error::new(format!("invalid interval '{trimmed}'"))),
    }
}

/// A target to notify when a check escalates or recovers
///
/// Targets are opaque to the scheduler core and only interpreted by the
/// escalator that delivers notifications.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum EscalationTarget {
    /// Send an email to an address
    Email {
        /// The address to send to
        email: String,
    },
    /// POST a json body to a webhook
    Webhook {
        /// The url to POST to
        webhook: String,
    },
}

/// A full workload template declared on a check
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct CheckTemplate {
    /// The opaque pod spec handed to the job runner
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
}

/// Helps serde default the max attempts before escalation to 3
fn default_max_attempts() -> u64 {
    3
}

/// A declared monitoring check
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "vigil.dev",
    version = "v1",
    kind = "Check",
    namespaced,
    status = "CheckCrdStatus",
    doc = "Custom resource declaring a scheduled monitoring check"
)]
pub struct CheckSpec {
    /// The interval between successful checks
    pub check_interval: Interval,
    /// The interval between attempts while failing below max attempts
    #[serde(default)]
    pub retry_interval: Option<Interval>,
    /// The interval between re-runs after an escalation
    #[serde(default)]
    pub notification_interval: Option<Interval>,
    /// The number of consecutive failed attempts that triggers escalation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    /// The max runtime of a single attempt
    #[serde(default)]
    pub timeout: Option<Interval>,
    /// The targets to notify on escalation and recovery
    #[serde(default)]
    pub escalations: Vec<EscalationTarget>,
    /// The template to render notification bodies with
    #[serde(default)]
    pub escalation_template: Option<String>,
    /// A full workload template for this check
    #[serde(default)]
    pub template: Option<CheckTemplate>,
    /// The image to synthesize a workload from when no template is given
    #[serde(default)]
    pub image: Option<String>,
    /// A secret to expose to the synthesized workload as env vars
    #[serde(default, rename = "secretRef")]
    pub secret_ref: Option<String>,
    /// A config map holding the body of the check to mount at /checks
    #[serde(default)]
    pub check_cm: Option<String>,
    /// A url to pass to the synthesized workload as its only arg
    #[serde(default)]
    pub url: Option<String>,
}

/// The health of a check
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum HealthStatus {
    /// No attempt has completed yet
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    /// The most recent attempt succeeded
    #[serde(rename = "OK")]
    Ok,
    /// The most recent attempt failed
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl HealthStatus {
    /// Get this health status as a str
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Pending => "PENDING",
            HealthStatus::Ok => "OK",
            HealthStatus::Critical => "CRITICAL",
        }
    }

    /// Get this health status as a metric name segment
    pub fn as_metric(&self) -> &'static str {
        match self {
            HealthStatus::Pending => "pending",
            HealthStatus::Ok => "ok",
            HealthStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    /// Display this health status
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a check's scheduler is waiting or has a job in flight
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum CheckState {
    /// The timer is armed and no job exists
    #[default]
    #[serde(rename = "IDLE")]
    Idle,
    /// A job is in flight
    #[serde(rename = "RUNNING")]
    Running,
}

impl CheckState {
    /// Get this state as a str
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Idle => "IDLE",
            CheckState::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for CheckState {
    /// Display this state
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted status subresource of a check
///
/// Every field is optional so statuses written by older controllers still
/// hydrate.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct CheckCrdStatus {
    /// The health of this check
    #[serde(default)]
    pub status: Option<HealthStatus>,
    /// Whether the check's scheduler is idle or running
    #[serde(default)]
    pub state: Option<CheckState>,
    /// Consecutive failed attempts since the last OK
    #[serde(default)]
    pub attempt: Option<String>,
    /// When the most recent attempt completed
    #[serde(default, rename = "lastCheckTimestamp")]
    pub last_check: Option<String>,
    /// When the next attempt is scheduled to begin
    #[serde(default, rename = "nextCheckTimestamp")]
    pub next_check: Option<String>,
    /// The output collected from the most recent attempt
    #[serde(default)]
    pub logs: Option<String>,
}

/// Render a timestamp the way the status subresource stores it
///
/// # Arguments
///
/// * `time` - The timestamp to render
pub fn write_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp from a persisted status
///
/// Accepts rfc3339 plus the space separated legacy form older controllers
/// wrote.
///
/// # Arguments
///
/// * `raw` - The raw timestamp string
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    // try the rfc3339 form first
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // fall back to the legacy space separated form
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")?;
    Ok(naive.and_utc())
}

/// The live status owned exclusively by a check's scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct CheckStatus {
    /// The health of this check
    pub status: HealthStatus,
    /// Whether a job is in flight
    pub state: CheckState,
    /// Consecutive failed attempts since the last OK
    pub attempt: u64,
    /// When the most recent attempt completed
    pub last_check: Option<DateTime<Utc>>,
    /// When the next attempt is scheduled to begin
    pub next_check: Option<DateTime<Utc>>,
    /// The output collected from the most recent attempt
    pub logs: String,
    /// Whether this check is currently escalated
    pub escalated: bool,
    /// How long the most recent attempt ran for
    pub runtime: chrono::Duration,
}

impl Default for CheckStatus {
    /// Create the status of a check that has never run
    fn default() -> Self {
        CheckStatus {
            status: HealthStatus::Pending,
            state: CheckState::Idle,
            attempt: 0,
            last_check: None,
            next_check: None,
            logs: String::new(),
            escalated: false,
            runtime: chrono::Duration::zero(),
        }
    }
}

impl CheckStatus {
    /// Hydrate a live status from a persisted status subresource
    ///
    /// The escalated flag is not persisted so a rehydrated check always
    /// starts unescalated.
    ///
    /// # Arguments
    ///
    /// * `pre` - The persisted status read at controller startup
    pub fn hydrate(pre: &CheckCrdStatus) -> Self {
        let mut status = CheckStatus::default();
        if let Some(health) = pre.status {
            status.status = health;
        }
        if let Some(state) = pre.state {
            status.state = state;
        }
        if let Some(attempt) = &pre.attempt {
            status.attempt = attempt.parse().unwrap_or(0);
        }
        if let Some(last) = &pre.last_check {
            status.last_check = parse_timestamp(last).ok();
        }
        if let Some(next) = &pre.next_check {
            status.next_check = parse_timestamp(next).ok();
        }
        if let Some(logs) = &pre.logs {
            status.logs = logs.clone();
        }
        status
    }
}

impl From<&CheckStatus> for CheckCrdStatus {
    /// Render a live status down to its persisted form
    fn from(status: &CheckStatus) -> Self {
        CheckCrdStatus {
            status: Some(status.status),
            state: Some(status.state),
            attempt: Some(status.attempt.to_string()),
            last_check: status.last_check.as_ref().map(write_timestamp),
            next_check: status.next_check.as_ref().map(write_timestamp),
            logs: Some(status.logs.clone()),
        }
    }
}

/// A snapshot of an external job's progress
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobStatus {
    /// Whether the job has live pods
    pub active: bool,
    /// Whether the job completed successfully
    pub succeeded: bool,
    /// Whether the job failed
    pub failed: bool,
    /// When the job started if the backend has reported it
    pub start_time: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// Build a snapshot of a successfully completed job
    ///
    /// # Arguments
    ///
    /// * `start` - When this job started
    pub fn success(start: DateTime<Utc>) -> Self {
        JobStatus {
            succeeded: true,
            start_time: Some(start),
            ..Default::default()
        }
    }

    /// Build a snapshot of a failed job
    ///
    /// # Arguments
    ///
    /// * `start` - When this job started
    pub fn failure(start: DateTime<Utc>) -> Self {
        JobStatus {
            failed: true,
            start_time: Some(start),
            ..Default::default()
        }
    }

    /// Build a snapshot of a job that is still running
    ///
    /// # Arguments
    ///
    /// * `start` - When this job started
    pub fn running(start: DateTime<Utc>) -> Self {
        JobStatus {
            active: true,
            start_time: Some(start),
            ..Default::default()
        }
    }
}

/// The parsed, immutable config for one check's scheduler
///
/// A modified check replaces its scheduler wholesale rather then mutating
/// this config in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConfig {
    /// The namespace this check lives in
    pub namespace: String,
    /// The name of this check
    pub name: String,
    /// The opaque pod spec handed to the job runner
    pub spec: serde_json::Value,
    /// The interval between successful checks
    pub check_interval: Duration,
    /// The interval between attempts while failing below max attempts
    pub retry_interval: Duration,
    /// The interval between re-runs after an escalation
    pub notification_interval: Duration,
    /// The number of consecutive failed attempts that triggers escalation
    pub max_attempts: u64,
    /// The max runtime of a single attempt where zero is unbounded
    pub timeout: Duration,
    /// The targets to notify on escalation and recovery
    pub escalations: Vec<EscalationTarget>,
    /// The template to render notification bodies with
    pub escalation_template: String,
    /// How often to poll an in flight job
    pub job_poll_interval: Duration,
}

impl CheckConfig {
    /// Build the config for a check's scheduler from its declared resource
    ///
    /// # Arguments
    ///
    /// * `check` - The declared check resource
    /// * `conf` - The vigil config
    pub fn build(check: &Check, conf: &Conf) -> Result<Self, Error> {
        // a check without identity cannot be scheduled
        let name = match &check.metadata.name {
            Some(name) => name.clone(),
            None => return Err(Error::new("check has no name")),
        };
        let namespace = match &check.metadata.namespace {
            Some(namespace) => namespace.clone(),
            None => return Err(Error::new(format!("check {name} has no namespace"))),
        };
        // the check interval is required and must be positive
        let check_interval = check.spec.check_interval.parse()?;
        if check_interval.is_zero() {
            return Err(Error::new(format!(
                "check {namespace}/{name} has a zero check_interval"
            )));
        }
        // absent or zero retry/notification intervals fall back to the check interval
        let retry_interval = parse_or_zero(&check.spec.retry_interval)?;
        let retry_interval = fallback(retry_interval, check_interval);
        let notification_interval = parse_or_zero(&check.spec.notification_interval)?;
        let notification_interval = fallback(notification_interval, check_interval);
        // the timeout stays zero when unset meaning unbounded attempts
        let timeout = parse_or_zero(&check.spec.timeout)?;
        // take a declared pod spec or synthesize one from the compact form
        let spec = match check.spec.template.as_ref().and_then(|tmpl| tmpl.spec.clone()) {
            Some(spec) => spec,
            None => synthesize_pod_spec(&name, &check.spec)?,
        };
        let escalation_template = check
            .spec
            .escalation_template
            .clone()
            .unwrap_or_else(|| DEFAULT_ESCALATION_TEMPLATE.to_owned());
        Ok(CheckConfig {
            namespace,
            name,
            spec,
            check_interval,
            retry_interval,
            notification_interval,
            max_attempts: check.spec.max_attempts,
            timeout,
            escalations: check.spec.escalations.clone(),
            escalation_template,
            job_poll_interval: Duration::from_secs(conf.controller.job_poll_interval),
        })
    }

    /// Get the `namespace/name` key for this check
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Check whether another config differs in a way that requires a new scheduler
    ///
    /// The status subresource writes echo back as MODIFIED events so this
    /// must be exact equality on the parsed material fields.
    ///
    /// # Arguments
    ///
    /// * `other` - The config to compare against
    pub fn materially_differs(&self, other: &CheckConfig) -> bool {
        self.spec != other.spec
            || self.check_interval != other.check_interval
            || self.retry_interval != other.retry_interval
            || self.notification_interval != other.notification_interval
            || self.max_attempts != other.max_attempts
            || self.escalations != other.escalations
    }
}

/// Parse an optional interval defaulting to zero when absent
///
/// # Arguments
///
/// * `interval` - The interval to parse if one was declared
fn parse_or_zero(interval: &Option<Interval>) -> Result<Duration, Error> {
    match interval {
        Some(interval) => interval.parse(),
        None => Ok(Duration::ZERO),
    }
}

/// Fall back to a default duration when a parsed one is zero
///
/// # Arguments
///
/// * `parsed` - The parsed duration
/// * `default` - The duration to fall back to
fn fallback(parsed: Duration, default: Duration) -> Duration {
    if parsed.is_zero() { default } else { parsed }
}

/// Synthesize a pod spec from a check's compact workload form
///
/// # Arguments
///
/// * `name` - The name of the check
/// * `spec` - The declared check spec
fn synthesize_pod_spec(name: &str, spec: &CheckSpec) -> Result<serde_json::Value, Error> {
    // the compact form requires at least an image
    let image = match &spec.image {
        Some(image) => image,
        None => {
            return Err(Error::new(format!(
                "check {name} declares neither a template spec nor an image"
            )));
        }
    };
    // build the single container running this check
    let mut container = json!({"name": name, "image": image});
    if let Some(secret_ref) = &spec.secret_ref {
        container["envFrom"] = json!([{"secretRef": {"name": secret_ref}}]);
    }
    if spec.check_cm.is_some() {
        container["volumeMounts"] =
            json!([{"name": "checks", "mountPath": "/checks", "readOnly": true}]);
    }
    if let Some(url) = &spec.url {
        container["args"] = json!([url]);
    }
    // wrap the container in a never restarting pod spec
    let mut pod_spec = json!({"restartPolicy": "Never", "containers": [container]});
    if let Some(check_cm) = &spec.check_cm {
        pod_spec["volumes"] = json!([{"name": "checks", "configMap": {"name": check_cm}}]);
    }
    Ok(pod_spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a check resource for tests
    fn check(spec: serde_json::Value) -> Check {
        let spec: CheckSpec = serde_json::from_value(spec).unwrap();
        let mut check = Check::new("web", spec);
        check.metadata.namespace = Some("monitoring".to_owned());
        check
    }

    /// Bare numbers parse as minutes and strings as h/m/s
    #[test]
    fn parse_intervals() {
        assert_eq!(parse_time("2").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_time("0.5").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_time("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_time("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_time("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_time("2h5m1s").unwrap(), Duration::from_secs(7501));
        assert_eq!(
            Interval::Minutes(3.0).parse().unwrap(),
            Duration::from_secs(180)
        );
    }

    /// Garbage intervals are rejected rather then treated as zero
    #[test]
    fn reject_invalid_intervals() {
        assert!(parse_time("abc").is_err());
        assert!(parse_time("5x").is_err());
        assert!(parse_time("-3").is_err());
        assert!(Interval::Minutes(-1.0).parse().is_err());
    }

    /// An empty interval parses to zero so downstream defaults apply
    #[test]
    fn empty_intervals_are_zero() {
        assert_eq!(parse_time("").unwrap(), Duration::ZERO);
        assert_eq!(parse_time("  ").unwrap(), Duration::ZERO);
    }

    /// An explicitly empty interval falls back just like an absent one
    #[test]
    fn empty_interval_defaults() {
        let check = check(json!({
            "check_interval": "60s",
            "retry_interval": "",
            "image": "checks/ping"
        }));
        let config = CheckConfig::build(&check, &Conf::default()).unwrap();
        assert_eq!(config.retry_interval, Duration::from_secs(60));
    }

    /// Parsing then re-emitting an interval is stable in seconds
    #[test]
    fn interval_round_trip() {
        for raw in ["90s", "5m", "1h30m", "2", "1h1s"] {
            let parsed = parse_time(raw).unwrap();
            let rendered = format!("{}s", parsed.as_secs());
            assert_eq!(parse_time(&rendered).unwrap(), parsed);
        }
    }

    /// Absent intervals fall back to the check interval and max attempts to 3
    #[test]
    fn config_defaults() {
        let check = check(json!({"check_interval": "60s", "image": "checks/ping"}));
        let config = CheckConfig::build(&check, &Conf::default()).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.notification_interval, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout, Duration::ZERO);
        assert_eq!(config.job_poll_interval, Duration::from_secs(3));
        assert_eq!(config.key(), "monitoring/web");
    }

    /// A zero check interval is an invalid config
    #[test]
    fn reject_zero_check_interval() {
        let check = check(json!({"check_interval": 0, "image": "checks/ping"}));
        assert!(CheckConfig::build(&check, &Conf::default()).is_err());
    }

    /// A check with neither a template spec nor an image is invalid
    #[test]
    fn reject_missing_workload() {
        let check = check(json!({"check_interval": "60s"}));
        assert!(CheckConfig::build(&check, &Conf::default()).is_err());
    }

    /// The compact form synthesizes the same pod spec shape every time
    #[test]
    fn synthesized_pod_spec() {
        let check = check(json!({
            "check_interval": "60s",
            "image": "checks/ping",
            "secretRef": "ping-creds",
            "check_cm": "ping-checks",
            "url": "https://example.com"
        }));
        let config = CheckConfig::build(&check, &Conf::default()).unwrap();
        let container = &config.spec["containers"][0];
        assert_eq!(config.spec["restartPolicy"], "Never");
        assert_eq!(container["image"], "checks/ping");
        assert_eq!(container["envFrom"][0]["secretRef"]["name"], "ping-creds");
        assert_eq!(container["volumeMounts"][0]["mountPath"], "/checks");
        assert_eq!(container["args"][0], "https://example.com");
        assert_eq!(config.spec["volumes"][0]["configMap"]["name"], "ping-checks");
    }

    /// A status echo parses to an equal config and triggers no replacement
    #[test]
    fn status_echo_is_not_material() {
        let declared = json!({
            "check_interval": "60s",
            "retry_interval": "30s",
            "max_attempts": 2,
            "escalations": [{"email": "oncall@example.com"}],
            "image": "checks/ping"
        });
        let first = CheckConfig::build(&check(declared.clone()), &Conf::default()).unwrap();
        let echo = CheckConfig::build(&check(declared), &Conf::default()).unwrap();
        assert!(!first.materially_differs(&echo));
    }

    /// Material field changes require a scheduler replacement
    #[test]
    fn material_changes() {
        let base = check(json!({"check_interval": "60s", "image": "checks/ping"}));
        let config = CheckConfig::build(&base, &Conf::default()).unwrap();
        // a changed interval is material
        let faster = check(json!({"check_interval": "30s", "image": "checks/ping"}));
        let faster = CheckConfig::build(&faster, &Conf::default()).unwrap();
        assert!(config.materially_differs(&faster));
        // a changed workload is material
        let image = check(json!({"check_interval": "60s", "image": "checks/dns"}));
        let image = CheckConfig::build(&image, &Conf::default()).unwrap();
        assert!(config.materially_differs(&image));
        // a changed timeout alone is not
        let timeout = check(json!({"check_interval": "60s", "timeout": "90s", "image": "checks/ping"}));
        let timeout = CheckConfig::build(&timeout, &Conf::default()).unwrap();
        assert!(!config.materially_differs(&timeout));
    }

    /// A live status renders and hydrates back without drift
    #[test]
    fn status_round_trip() {
        let now = parse_timestamp("2026-08-01T12:00:00Z").unwrap();
        let status = CheckStatus {
            status: HealthStatus::Critical,
            state: CheckState::Idle,
            attempt: 2,
            last_check: Some(now),
            next_check: Some(now + chrono::Duration::seconds(60)),
            logs: "connection refused".to_owned(),
            escalated: false,
            runtime: chrono::Duration::seconds(4),
        };
        let rendered = CheckCrdStatus::from(&status);
        assert_eq!(rendered.attempt.as_deref(), Some("2"));
        assert_eq!(rendered.last_check.as_deref(), Some("2026-08-01T12:00:00Z"));
        let hydrated = CheckStatus::hydrate(&rendered);
        assert_eq!(hydrated.status, status.status);
        assert_eq!(hydrated.state, status.state);
        assert_eq!(hydrated.attempt, status.attempt);
        assert_eq!(hydrated.last_check, status.last_check);
        assert_eq!(hydrated.next_check, status.next_check);
        assert_eq!(hydrated.logs, status.logs);
    }

    /// Legacy space separated timestamps still hydrate
    #[test]
    fn legacy_timestamps() {
        let parsed = parse_timestamp("2026-08-01 12:00:00").unwrap();
        assert_eq!(write_timestamp(&parsed), "2026-08-01T12:00:00Z");
    }
}
