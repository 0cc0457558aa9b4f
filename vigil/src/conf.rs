//! The shared config for vigil

use std::path::Path;

/// Helps serde default the cluster audit interval to 60 seconds
fn default_check_cluster_interval() -> u64 {
    60
}

/// Helps serde default the job poll interval to 3 seconds
fn default_job_poll_interval() -> u64 {
    3
}

/// Settings for the controller and its check schedulers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Controller {
    /// How often to audit declared checks against live schedulers in seconds
    #[serde(default = "default_check_cluster_interval")]
    pub check_cluster_interval: u64,
    /// How often a scheduler polls its in flight job in seconds
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval: u64,
}

impl Default for Controller {
    /// Create a default controller config
    fn default() -> Self {
        Controller {
            check_cluster_interval: default_check_cluster_interval(),
            job_poll_interval: default_job_poll_interval(),
        }
    }
}

/// Helps serde default the escalation email sender
fn default_from() -> String {
    "vigil@localhost".to_owned()
}

/// The credentials for sending escalation emails through a mail API
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MailSettings {
    /// The API token to authenticate with
    pub token: Option<String>,
    /// The address escalation emails are sent from
    #[serde(default = "default_from")]
    pub from: String,
}

impl MailSettings {
    /// Get the mail API token from the config or the environment
    pub fn token(&self) -> Option<String> {
        // prefer an explicitly configured token over the environment
        match &self.token {
            Some(token) => Some(token.clone()),
            None => std::env::var("SENDGRID_API_KEY").ok(),
        }
    }
}

/// Settings for delivering escalation notifications
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Escalation {
    /// The mail API settings for email escalation targets
    #[serde(default)]
    pub mail: Option<MailSettings>,
}

/// The level to log events at
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Do not log any info
    Off,
    /// Log at the error level
    Error,
    /// Log at the warning level
    Warn,
    /// Log at the info level
    Info,
    /// Log at the debug level
    Debug,
    /// Log at the tracing level
    Trace,
}

impl Default for LogLevel {
    /// Set the default log level to info
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    /// Cast this log level to a tracing filter
    #[must_use]
    pub fn to_filter(self) -> tracing_subscriber::filter::LevelFilter {
        match self {
            LogLevel::Off => tracing_subscriber::filter::LevelFilter::OFF,
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
        }
    }
}

/// The settings for sending logs to stdout/stderr
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TracingLocal {
    /// The log level to use for stdout/stderr
    #[serde(default)]
    pub level: LogLevel,
}

/// The tracing settings to use
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Tracing {
    /// The settings for sending logs to stdout/stderr
    #[serde(default)]
    pub local: TracingLocal,
}

/// The config for the vigil controller
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Conf {
    /// The controller/scheduler settings
    #[serde(default)]
    pub controller: Controller,
    /// The escalation delivery settings
    #[serde(default)]
    pub escalation: Escalation,
    /// The tracing settings
    #[serde(default)]
    pub tracing: Tracing,
}

impl Conf {
    /// Creates a new [`Conf`] object
    ///
    /// # Arguments
    ///
    /// * `path` - The path to use when reading the config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // load from a file first
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Yaml))
            // then overlay any environment args ontop
            .add_source(
                config::Environment::with_prefix("vigil")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Make sure defaults land where the schedulers expect them
    #[test]
    fn defaults() {
        let conf = Conf::default();
        assert_eq!(conf.controller.check_cluster_interval, 60);
        assert_eq!(conf.controller.job_poll_interval, 3);
        assert!(conf.escalation.mail.is_none());
        assert_eq!(conf.tracing.local.level, LogLevel::Info);
    }
}
